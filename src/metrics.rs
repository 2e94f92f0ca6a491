//! Performance metrics and statistics tracking for the finance pipeline.

use crate::error::ErrorKind;
use crate::types::alert::RiskLevel;
use crate::types::model::ModelKind;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::info;

/// Metrics collector for pipeline activity
pub struct PipelineMetrics {
    /// Total requests handled
    pub requests_handled: AtomicU64,
    /// Total transactions stored
    pub transactions_submitted: AtomicU64,
    /// Total predictions served (labels, forecasts, scores)
    pub predictions_served: AtomicU64,
    /// Total alerts published
    pub alerts_generated: AtomicU64,
    /// Successful trainings by model kind
    trainings: RwLock<HashMap<ModelKind, u64>>,
    /// Failed trainings by model kind
    training_failures: RwLock<HashMap<ModelKind, u64>>,
    /// Training wall-clock times (in milliseconds) by model kind
    training_times: RwLock<HashMap<ModelKind, Vec<u64>>>,
    /// Request handling times (in microseconds)
    request_times: RwLock<Vec<u64>>,
    /// Scored transactions by risk level
    scores_by_level: RwLock<HashMap<RiskLevel, u64>>,
    /// Anomaly score distribution buckets
    score_buckets: RwLock<[u64; 10]>,
    /// Failed requests by error kind
    errors_by_kind: RwLock<HashMap<ErrorKind, u64>>,
    /// Start time for rate calculation
    start_time: Instant,
}

impl PipelineMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            requests_handled: AtomicU64::new(0),
            transactions_submitted: AtomicU64::new(0),
            predictions_served: AtomicU64::new(0),
            alerts_generated: AtomicU64::new(0),
            trainings: RwLock::new(HashMap::new()),
            training_failures: RwLock::new(HashMap::new()),
            training_times: RwLock::new(HashMap::new()),
            request_times: RwLock::new(Vec::with_capacity(1000)),
            scores_by_level: RwLock::new(HashMap::new()),
            score_buckets: RwLock::new([0; 10]),
            errors_by_kind: RwLock::new(HashMap::new()),
            start_time: Instant::now(),
        }
    }

    /// Record a handled request
    pub fn record_request(&self, processing_time: Duration) {
        self.requests_handled.fetch_add(1, Ordering::Relaxed);

        if let Ok(mut times) = self.request_times.write() {
            times.push(processing_time.as_micros() as u64);
            // Keep only last 10000 for memory efficiency
            if times.len() > 10000 {
                times.drain(0..5000);
            }
        }
    }

    pub fn record_submitted(&self, count: usize) {
        self.transactions_submitted
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_prediction(&self) {
        self.predictions_served.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed training run
    pub fn record_training(&self, kind: ModelKind, duration: Duration) {
        if let Ok(mut trainings) = self.trainings.write() {
            *trainings.entry(kind).or_insert(0) += 1;
        }
        if let Ok(mut times) = self.training_times.write() {
            let kind_times = times.entry(kind).or_insert_with(Vec::new);
            kind_times.push(duration.as_millis() as u64);
            // Keep only last 1000 per kind
            if kind_times.len() > 1000 {
                kind_times.drain(0..500);
            }
        }
    }

    pub fn record_training_failure(&self, kind: ModelKind) {
        if let Ok(mut failures) = self.training_failures.write() {
            *failures.entry(kind).or_insert(0) += 1;
        }
    }

    /// Record an anomaly score
    pub fn record_score(&self, score: f64, risk_level: RiskLevel) {
        self.record_prediction();

        if let Ok(mut by_level) = self.scores_by_level.write() {
            *by_level.entry(risk_level).or_insert(0) += 1;
        }

        let bucket = (score.clamp(0.0, 1.0) * 10.0).min(9.0) as usize;
        if let Ok(mut buckets) = self.score_buckets.write() {
            buckets[bucket] += 1;
        }
    }

    pub fn record_alert(&self) {
        self.alerts_generated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self, kind: ErrorKind) {
        if let Ok(mut errors) = self.errors_by_kind.write() {
            *errors.entry(kind).or_insert(0) += 1;
        }
    }

    /// Get request handling time statistics
    pub fn get_request_stats(&self) -> ProcessingStats {
        match self.request_times.read() {
            Ok(times) => ProcessingStats::from_samples(&times),
            Err(_) => ProcessingStats::default(),
        }
    }

    /// Get training stats per model kind
    pub fn get_training_stats(&self) -> HashMap<ModelKind, TrainingStats> {
        let (Ok(times), Ok(trainings), Ok(failures)) = (
            self.training_times.read(),
            self.trainings.read(),
            self.training_failures.read(),
        ) else {
            return HashMap::new();
        };

        ModelKind::ALL
            .iter()
            .filter_map(|kind| {
                let succeeded = trainings.get(kind).copied().unwrap_or(0);
                let failed = failures.get(kind).copied().unwrap_or(0);
                if succeeded == 0 && failed == 0 {
                    return None;
                }
                let latency = times
                    .get(kind)
                    .map(|t| ProcessingStats::from_samples(t))
                    .unwrap_or_default();
                Some((
                    *kind,
                    TrainingStats {
                        succeeded,
                        failed,
                        mean_ms: latency.mean_us,
                        p50_ms: latency.p50_us,
                        p99_ms: latency.p99_us,
                    },
                ))
            })
            .collect()
    }

    /// Get current throughput (requests per second)
    pub fn get_throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.requests_handled.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Get score distribution
    pub fn get_score_distribution(&self) -> [u64; 10] {
        self.score_buckets.read().map(|b| *b).unwrap_or([0; 10])
    }

    /// Get scored transactions by risk level
    pub fn get_scores_by_level(&self) -> HashMap<RiskLevel, u64> {
        self.scores_by_level
            .read()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    pub fn get_errors_by_kind(&self) -> HashMap<ErrorKind, u64> {
        self.errors_by_kind
            .read()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    /// Print summary statistics
    pub fn print_summary(&self) {
        let requests = self.requests_handled.load(Ordering::Relaxed);
        let submitted = self.transactions_submitted.load(Ordering::Relaxed);
        let predictions = self.predictions_served.load(Ordering::Relaxed);
        let alerts = self.alerts_generated.load(Ordering::Relaxed);

        let processing = self.get_request_stats();
        let throughput = self.get_throughput();

        info!(
            requests,
            submitted,
            predictions,
            alerts,
            throughput = format!("{:.1} req/s", throughput),
            mean_us = processing.mean_us,
            p50_us = processing.p50_us,
            p95_us = processing.p95_us,
            p99_us = processing.p99_us,
            "Pipeline metrics summary"
        );

        for (kind, stats) in &self.get_training_stats() {
            info!(
                kind = %kind,
                succeeded = stats.succeeded,
                failed = stats.failed,
                mean_ms = stats.mean_ms,
                p50_ms = stats.p50_ms,
                p99_ms = stats.p99_ms,
                "Training summary"
            );
        }

        let by_level = self.get_scores_by_level();
        let scored: u64 = by_level.values().sum();
        if scored > 0 {
            for level in [RiskLevel::Low, RiskLevel::Medium, RiskLevel::High] {
                let count = by_level.get(&level).copied().unwrap_or(0);
                info!(
                    risk_level = level.as_str(),
                    count,
                    share = format!("{:.1}%", count as f64 / scored as f64 * 100.0),
                    "Risk level summary"
                );
            }

            let distribution = self.get_score_distribution();
            let buckets: Vec<String> = distribution
                .iter()
                .enumerate()
                .map(|(i, count)| format!("{:.1}-{:.1}:{}", i as f64 / 10.0, (i + 1) as f64 / 10.0, count))
                .collect();
            info!(buckets = %buckets.join(" "), "Anomaly score distribution");
        }

        for (kind, count) in &self.get_errors_by_kind() {
            info!(kind = %kind, count, "Request errors");
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Latency statistics over a window of samples
#[derive(Debug, Default)]
pub struct ProcessingStats {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

impl ProcessingStats {
    fn from_samples(samples: &[u64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        let mut sorted = samples.to_vec();
        sorted.sort_unstable();

        let sum: u64 = sorted.iter().sum();
        let count = sorted.len();
        let at = |q: f64| sorted[((count as f64 * q) as usize).min(count - 1)];

        Self {
            count: count as u64,
            mean_us: sum / count as u64,
            p50_us: at(0.5),
            p95_us: at(0.95),
            p99_us: at(0.99),
            max_us: sorted[count - 1],
        }
    }
}

/// Training statistics for one model kind
#[derive(Debug)]
pub struct TrainingStats {
    pub succeeded: u64,
    pub failed: u64,
    pub mean_ms: u64,
    pub p50_ms: u64,
    pub p99_ms: u64,
}

/// Real-time metrics reporter that logs periodic summaries
pub struct MetricsReporter {
    metrics: std::sync::Arc<PipelineMetrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    pub fn new(metrics: std::sync::Arc<PipelineMetrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs,
        }
    }

    /// Start the periodic reporting task
    pub async fn start(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs));
        // The first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            self.metrics.print_summary();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_recording() {
        let metrics = PipelineMetrics::new();

        metrics.record_request(Duration::from_micros(100));
        metrics.record_request(Duration::from_micros(200));
        metrics.record_score(0.82, RiskLevel::High);
        metrics.record_score(0.31, RiskLevel::Low);
        metrics.record_alert();

        assert_eq!(metrics.requests_handled.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.predictions_served.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.alerts_generated.load(Ordering::Relaxed), 1);

        let distribution = metrics.get_score_distribution();
        assert_eq!(distribution[8], 1);
        assert_eq!(distribution[3], 1);
        assert_eq!(metrics.get_scores_by_level()[&RiskLevel::High], 1);

        let stats = metrics.get_request_stats();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.mean_us, 150);
        assert_eq!(stats.max_us, 200);
    }

    #[test]
    fn test_training_stats() {
        let metrics = PipelineMetrics::new();

        metrics.record_training(ModelKind::Anomaly, Duration::from_millis(40));
        metrics.record_training(ModelKind::Anomaly, Duration::from_millis(60));
        metrics.record_training_failure(ModelKind::Anomaly);
        metrics.record_training_failure(ModelKind::Forecaster);

        let stats = metrics.get_training_stats();
        assert_eq!(stats[&ModelKind::Anomaly].succeeded, 2);
        assert_eq!(stats[&ModelKind::Anomaly].failed, 1);
        assert_eq!(stats[&ModelKind::Anomaly].mean_ms, 50);
        assert_eq!(stats[&ModelKind::Forecaster].succeeded, 0);
        assert!(!stats.contains_key(&ModelKind::Categorizer));
    }

    #[test]
    fn test_score_bucket_bounds() {
        let metrics = PipelineMetrics::new();
        metrics.record_score(1.0, RiskLevel::High);
        metrics.record_score(0.0, RiskLevel::Low);
        let distribution = metrics.get_score_distribution();
        assert_eq!(distribution[9], 1);
        assert_eq!(distribution[0], 1);
    }
}
