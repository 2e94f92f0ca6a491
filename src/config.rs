//! Configuration management for the finance pipeline

use crate::types::alert::RiskLevelThresholds;
use anyhow::{Context, Result};
use config::{Config, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub nats: NatsConfig,
    pub pipeline: PipelineConfig,
    pub training: TrainingConfig,
    pub features: FeatureConfig,
    pub categorizer: CategorizerConfig,
    pub forecaster: ForecasterConfig,
    pub anomaly: AnomalyConfig,
    pub logging: LoggingConfig,
}

/// NATS connection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct NatsConfig {
    /// NATS server URL
    pub url: String,
    /// Subject the service answers requests on
    pub request_subject: String,
    /// Subject for outgoing anomaly alerts
    pub alert_subject: String,
}

/// Request handling configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Maximum requests handled concurrently
    pub workers: usize,
}

/// Training limits shared by all model kinds
#[derive(Debug, Clone, Deserialize)]
pub struct TrainingConfig {
    /// Wall-clock budget for one training run
    pub timeout_ms: u64,
    /// Labeled transactions needed before the categorizer can train
    #[serde(default = "default_min_categorizer_examples")]
    pub min_categorizer_examples: usize,
    /// Days of history needed before the forecaster can train
    #[serde(default = "default_min_forecast_history_days")]
    pub min_forecast_history_days: i64,
    /// Transactions needed before the anomaly scorer can train
    #[serde(default = "default_min_anomaly_samples")]
    pub min_anomaly_samples: usize,
    /// Only the most recent transactions are used for training
    #[serde(default = "default_max_transactions")]
    pub max_transactions: usize,
    /// Trailing days of history the forecaster trains on
    #[serde(default = "default_max_history_days")]
    pub max_history_days: i64,
}

impl TrainingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_min_categorizer_examples() -> usize {
    1
}

fn default_min_forecast_history_days() -> i64 {
    14
}

fn default_min_anomaly_samples() -> usize {
    20
}

fn default_max_transactions() -> usize {
    10_000
}

fn default_max_history_days() -> i64 {
    730
}

/// Feature extraction configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FeatureConfig {
    /// Longest accepted transaction description
    pub max_description_len: usize,
}

/// Naive Bayes categorizer configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CategorizerConfig {
    /// Additive smoothing
    pub alpha: f64,
    /// Add adjacent-token bigrams to the vocabulary
    #[serde(default = "default_true")]
    pub bigrams: bool,
}

fn default_true() -> bool {
    true
}

/// Spending forecaster configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ForecasterConfig {
    /// Longest forecast horizon accepted
    pub max_horizon_days: u32,
    /// Half-width of the interval in standard deviations
    pub interval_z: f64,
    /// Interval multiplier for days forecast from the historical mean
    pub degraded_widening: f64,
    /// Observations a weekday needs before its profile is trusted
    pub min_weekday_samples: usize,
}

/// Isolation forest configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AnomalyConfig {
    /// Number of isolation trees
    pub trees: usize,
    /// Subsample size per tree
    pub sample_size: usize,
    /// RNG seed, fixed so training is reproducible
    pub seed: u64,
    /// Risk level classification thresholds
    pub risk_levels: RiskLevelThresholds,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl AppConfig {
    /// Load configuration from file
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/config.toml")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()
            .context("Failed to build configuration")?;

        let app: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        app.validate()?;
        Ok(app)
    }

    /// Reject settings the estimators cannot work with
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.pipeline.workers > 0, "pipeline.workers must be positive");
        anyhow::ensure!(self.training.timeout_ms > 0, "training.timeout_ms must be positive");
        anyhow::ensure!(
            self.training.min_categorizer_examples > 0,
            "training.min_categorizer_examples must be positive"
        );
        anyhow::ensure!(
            self.training.min_anomaly_samples >= 2,
            "training.min_anomaly_samples must be at least 2"
        );
        anyhow::ensure!(
            self.training.max_history_days >= self.training.min_forecast_history_days,
            "training.max_history_days must cover training.min_forecast_history_days"
        );
        anyhow::ensure!(
            self.training.max_history_days <= 36_500,
            "training.max_history_days must not exceed 36500"
        );
        anyhow::ensure!(self.categorizer.alpha > 0.0, "categorizer.alpha must be positive");
        anyhow::ensure!(
            self.forecaster.interval_z >= 0.0,
            "forecaster.interval_z must not be negative"
        );
        anyhow::ensure!(
            self.forecaster.degraded_widening >= 1.0,
            "forecaster.degraded_widening must be at least 1"
        );
        anyhow::ensure!(self.anomaly.trees > 0, "anomaly.trees must be positive");
        anyhow::ensure!(
            self.anomaly.sample_size >= 2,
            "anomaly.sample_size must be at least 2"
        );
        anyhow::ensure!(
            self.anomaly.risk_levels.is_valid(),
            "anomaly.risk_levels must satisfy 0 <= medium <= high <= 1"
        );
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            nats: NatsConfig {
                url: "nats://localhost:4222".to_string(),
                request_subject: "finance.requests".to_string(),
                alert_subject: "finance.alerts".to_string(),
            },
            pipeline: PipelineConfig { workers: 4 },
            training: TrainingConfig {
                timeout_ms: 30_000,
                min_categorizer_examples: default_min_categorizer_examples(),
                min_forecast_history_days: default_min_forecast_history_days(),
                min_anomaly_samples: default_min_anomaly_samples(),
                max_transactions: default_max_transactions(),
                max_history_days: default_max_history_days(),
            },
            features: FeatureConfig {
                max_description_len: 200,
            },
            categorizer: CategorizerConfig {
                alpha: 0.1,
                bigrams: true,
            },
            forecaster: ForecasterConfig {
                max_horizon_days: 90,
                interval_z: 1.96,
                degraded_widening: 2.0,
                min_weekday_samples: 2,
            },
            anomaly: AnomalyConfig {
                trees: 100,
                sample_size: 256,
                seed: 42,
                risk_levels: RiskLevelThresholds::default(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "json".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.nats.url, "nats://localhost:4222");
        assert_eq!(config.forecaster.max_horizon_days, 90);
        assert_eq!(config.training.min_forecast_history_days, 14);
        assert_eq!(config.anomaly.seed, 42);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_path() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            r#"
[nats]
url = "nats://broker:4222"
request_subject = "svc.requests"
alert_subject = "svc.alerts"

[pipeline]
workers = 2

[training]
timeout_ms = 500
min_forecast_history_days = 21

[features]
max_description_len = 120

[categorizer]
alpha = 0.5

[forecaster]
max_horizon_days = 60
interval_z = 1.0
degraded_widening = 3.0
min_weekday_samples = 3

[anomaly]
trees = 50
sample_size = 128
seed = 7

[anomaly.risk_levels]
medium = 0.5
high = 0.8

[logging]
level = "debug"
format = "pretty"
"#
        )
        .unwrap();

        let config = AppConfig::load_from_path(file.path()).unwrap();
        assert_eq!(config.nats.request_subject, "svc.requests");
        assert_eq!(config.training.timeout(), Duration::from_millis(500));
        assert_eq!(config.training.min_forecast_history_days, 21);
        // Omitted keys fall back to defaults
        assert_eq!(config.training.min_anomaly_samples, 20);
        assert!(config.categorizer.bigrams);
        assert_eq!(config.anomaly.risk_levels.high, 0.8);
    }

    #[test]
    fn test_invalid_thresholds_rejected() {
        let mut config = AppConfig::default();
        config.anomaly.risk_levels = RiskLevelThresholds {
            medium: 0.9,
            high: 0.3,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_negative_interval_rejected() {
        let mut config = AppConfig::default();
        config.forecaster.interval_z = -1.0;
        assert!(config.validate().is_err());

        config.forecaster.interval_z = 0.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_history_window_must_cover_minimum() {
        let mut config = AppConfig::default();
        config.training.max_history_days = 7;
        assert!(config.validate().is_err());

        config.training.max_history_days = 1_000_000;
        assert!(config.validate().is_err());
    }
}
