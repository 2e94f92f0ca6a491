//! Isolation forest anomaly scorer.
//!
//! Trees are grown on random subsamples of the standardized numeric feature
//! vectors. Points that are isolated after few splits get scores close to 1.
//! Training is seeded, so the same history always yields the same forest.

use crate::config::AnomalyConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::feature_extractor::{FeatureVector, NUMERIC_FEATURES, NUMERIC_FEATURE_COUNT};
use crate::models::{AnomalyModel, Estimator, Fitted};
use crate::types::alert::{RiskLevel, RiskLevelThresholds};
use crate::types::prediction::{AnomalyScore, Contribution};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use tracing::debug;

type Sample = [f64; NUMERIC_FEATURE_COUNT];

/// Euler-Mascheroni constant, used by the average path length estimate
const EULER_GAMMA: f64 = 0.5772156649;

/// Features named in a score's explanation
const MAX_EXPLAINED_FEATURES: usize = 3;

const AMOUNT_VS_30D_INDEX: usize = 5;

#[derive(Debug, Clone)]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        size: usize,
    },
}

/// One isolation tree; nodes live in an arena and the root is pushed last.
#[derive(Debug, Clone)]
struct IsolationTree {
    nodes: Vec<Node>,
}

impl IsolationTree {
    fn grow(samples: &[Sample], max_depth: usize, rng: &mut StdRng) -> Self {
        let mut nodes = Vec::new();
        let refs: Vec<&Sample> = samples.iter().collect();
        grow_node(&mut nodes, &refs, 0, max_depth, rng);
        Self { nodes }
    }

    fn path_length(&self, sample: &Sample) -> f64 {
        let mut index = self.nodes.len() - 1;
        let mut depth = 0.0;
        loop {
            match &self.nodes[index] {
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    index = if sample[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                    depth += 1.0;
                }
                Node::Leaf { size } => return depth + average_path_length(*size),
            }
        }
    }
}

fn grow_node(
    nodes: &mut Vec<Node>,
    samples: &[&Sample],
    depth: usize,
    max_depth: usize,
    rng: &mut StdRng,
) -> usize {
    let splittable: Vec<(usize, f64, f64)> = if depth >= max_depth || samples.len() <= 1 {
        Vec::new()
    } else {
        (0..NUMERIC_FEATURE_COUNT)
            .filter_map(|feature| {
                let (min, max) = samples.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), s| {
                    (lo.min(s[feature]), hi.max(s[feature]))
                });
                (min < max).then_some((feature, min, max))
            })
            .collect()
    };

    if splittable.is_empty() {
        nodes.push(Node::Leaf {
            size: samples.len(),
        });
        return nodes.len() - 1;
    }

    let (feature, min, max) = splittable[rng.gen_range(0..splittable.len())];
    let threshold = rng.gen_range(min..max);
    let (left_samples, right_samples): (Vec<&Sample>, Vec<&Sample>) =
        samples.iter().copied().partition(|s| s[feature] <= threshold);

    let left = grow_node(nodes, &left_samples, depth + 1, max_depth, rng);
    let right = grow_node(nodes, &right_samples, depth + 1, max_depth, rng);
    nodes.push(Node::Split {
        feature,
        threshold,
        left,
        right,
    });
    nodes.len() - 1
}

/// Average path length of an unsuccessful search in a binary search tree of `n` points.
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

/// Trained isolation forest for one user.
#[derive(Debug, Clone)]
pub struct IsolationForest {
    trees: Vec<IsolationTree>,
    means: Sample,
    std_devs: Sample,
    sample_size: usize,
    thresholds: RiskLevelThresholds,
}

impl IsolationForest {
    pub fn train(features: &[FeatureVector], config: &AnomalyConfig) -> PipelineResult<Self> {
        if features.len() < 2 {
            return Err(PipelineError::InsufficientData(format!(
                "anomaly scorer needs at least 2 transactions, found {}",
                features.len()
            )));
        }

        let raw: Vec<Sample> = features.iter().map(FeatureVector::numeric).collect();
        let (means, std_devs) = column_stats(&raw);
        let samples: Vec<Sample> = raw.iter().map(|s| standardize(s, &means, &std_devs)).collect();

        let sample_size = config.sample_size.min(samples.len());
        let max_depth = (sample_size as f64).log2().ceil() as usize;
        let mut rng = StdRng::seed_from_u64(config.seed);

        let trees = (0..config.trees)
            .map(|_| {
                let subsample: Vec<Sample> =
                    rand::seq::index::sample(&mut rng, samples.len(), sample_size)
                        .into_iter()
                        .map(|i| samples[i])
                        .collect();
                IsolationTree::grow(&subsample, max_depth, &mut rng)
            })
            .collect();

        Ok(Self {
            trees,
            means,
            std_devs,
            sample_size,
            thresholds: config.risk_levels,
        })
    }

    /// Fit on a user's feature history and report the training score profile.
    pub fn fit(
        features: &[FeatureVector],
        config: &AnomalyConfig,
        min_samples: usize,
    ) -> PipelineResult<Fitted> {
        if features.len() < min_samples {
            return Err(PipelineError::InsufficientData(format!(
                "anomaly scorer needs {} transactions, found {}",
                min_samples,
                features.len()
            )));
        }

        let model = Self::train(features, config)?;

        let scores: Vec<AnomalyScore> = features.iter().map(|f| model.score(f)).collect();
        let mean_score = scores.iter().map(|s| s.score).sum::<f64>() / scores.len() as f64;
        let high = scores
            .iter()
            .filter(|s| s.risk_level == RiskLevel::High)
            .count();

        let mut metrics = BTreeMap::new();
        metrics.insert("mean_score".to_string(), mean_score);
        metrics.insert("high_risk_share".to_string(), high as f64 / scores.len() as f64);
        metrics.insert("trees".to_string(), model.trees.len() as f64);
        metrics.insert("sample_size".to_string(), model.sample_size as f64);
        let thresholds = model.thresholds();
        metrics.insert("medium_threshold".to_string(), thresholds.medium);
        metrics.insert("high_threshold".to_string(), thresholds.high);

        debug!(
            samples = features.len(),
            trees = model.trees.len(),
            mean_score,
            "Isolation forest fitted"
        );

        Ok(Fitted {
            samples: features.len(),
            metrics,
            estimator: Estimator::Anomaly(Box::new(model)),
        })
    }

    /// Cut points captured when the model was trained.
    pub fn thresholds(&self) -> RiskLevelThresholds {
        self.thresholds
    }

    fn raw_score(&self, sample: &Sample) -> f64 {
        let mean_path = self
            .trees
            .iter()
            .map(|tree| tree.path_length(sample))
            .sum::<f64>()
            / self.trees.len().max(1) as f64;
        let normalizer = average_path_length(self.sample_size);
        if normalizer <= 0.0 {
            return 0.5;
        }
        2f64.powf(-mean_path / normalizer).clamp(0.0, 1.0)
    }
}

impl AnomalyModel for IsolationForest {
    fn score(&self, features: &FeatureVector) -> AnomalyScore {
        let raw = features.numeric();
        let z = standardize(&raw, &self.means, &self.std_devs);
        let score = self.raw_score(&z);
        let risk_level = RiskLevel::from_score(score, &self.thresholds);

        let mut explanation: Vec<Contribution> = NUMERIC_FEATURES
            .iter()
            .zip(z.iter())
            .map(|(name, value)| Contribution::new(*name, *value))
            .collect();
        explanation.sort_by(|a, b| b.weight.abs().total_cmp(&a.weight.abs()));
        explanation.truncate(MAX_EXPLAINED_FEATURES);

        let reasons = if risk_level == RiskLevel::Low {
            Vec::new()
        } else {
            explain_reasons(features, &raw)
        };

        AnomalyScore {
            score,
            risk_level,
            explanation,
            reasons,
        }
    }
}

/// Human-readable reasons behind a flagged score.
fn explain_reasons(features: &FeatureVector, raw: &Sample) -> Vec<String> {
    let mut reasons = Vec::new();
    if raw[AMOUNT_VS_30D_INDEX] > 3.0 {
        reasons.push("Amount significantly higher than usual spending".to_string());
    }
    if features.is_night() {
        reasons.push("Unusual transaction time".to_string());
    }
    if features.category_frequency < 0.05 {
        reasons.push("Rare category for this user".to_string());
    }
    if reasons.is_empty() {
        reasons.push("General spending pattern deviation".to_string());
    }
    reasons
}

/// Per-column mean and population standard deviation; zero spread becomes 1.
fn column_stats(samples: &[Sample]) -> (Sample, Sample) {
    let n = samples.len() as f64;
    let mut means = [0.0; NUMERIC_FEATURE_COUNT];
    let mut std_devs = [1.0; NUMERIC_FEATURE_COUNT];
    for column in 0..NUMERIC_FEATURE_COUNT {
        let mean = samples.iter().map(|s| s[column]).sum::<f64>() / n;
        let variance = samples.iter().map(|s| (s[column] - mean).powi(2)).sum::<f64>() / n;
        means[column] = mean;
        if variance > 0.0 {
            std_devs[column] = variance.sqrt();
        }
    }
    (means, std_devs)
}

fn standardize(sample: &Sample, means: &Sample, std_devs: &Sample) -> Sample {
    let mut z = [0.0; NUMERIC_FEATURE_COUNT];
    for (i, value) in z.iter_mut().enumerate() {
        *value = (sample[i] - means[i]) / std_devs[i];
    }
    z
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn config() -> AnomalyConfig {
        AnomalyConfig {
            trees: 100,
            sample_size: 256,
            seed: 42,
            risk_levels: RiskLevelThresholds::default(),
        }
    }

    fn vector(day: u32, hour: u32, amount: f64, category_frequency: f64) -> FeatureVector {
        FeatureVector {
            transaction_id: Uuid::new_v4(),
            timestamp: Utc.with_ymd_and_hms(2026, 3, day, hour, 0, 0).unwrap(),
            amount,
            rolling_mean_7d: -40.0,
            rolling_mean_30d: -40.0,
            day_of_week: (day + 6) % 7,
            hour,
            category_frequency,
            category: Some("Dining".to_string()),
            tokens: vec!["lunch".to_string()],
        }
    }

    fn history() -> Vec<FeatureVector> {
        (0..60)
            .map(|i| {
                let amount = -(30.0 + (i % 7) as f64 * 3.0);
                vector(1 + i % 28, 10 + i % 6, amount, 0.5 + (i % 5) as f64 * 0.05)
            })
            .collect()
    }

    fn outlier() -> FeatureVector {
        let mut v = vector(14, 3, -2500.0, 0.01);
        v.rolling_mean_7d = -400.0;
        v.rolling_mean_30d = -120.0;
        v
    }

    #[test]
    fn test_average_path_length() {
        assert_eq!(average_path_length(0), 0.0);
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        let c256 = average_path_length(256);
        assert!((c256 - 10.24).abs() < 0.01);
    }

    #[test]
    fn test_scores_are_deterministic() {
        let mut data = history();
        data.push(outlier());

        let a = IsolationForest::train(&data, &config()).unwrap();
        let b = IsolationForest::train(&data, &config()).unwrap();

        for features in &data {
            assert_eq!(a.score(features).score, b.score(features).score);
        }
    }

    #[test]
    fn test_outlier_scores_above_typical() {
        let mut data = history();
        data.push(outlier());
        let model = IsolationForest::train(&data, &config()).unwrap();

        let typical: Vec<f64> = history().iter().map(|f| model.score(f).score).collect();
        let mean_typical = typical.iter().sum::<f64>() / typical.len() as f64;
        let flagged = model.score(&outlier());

        assert!(flagged.score > mean_typical + 0.1);
        assert!(flagged.score > 0.6);
        assert_ne!(flagged.risk_level, RiskLevel::Low);
        assert_eq!(flagged.explanation.len(), MAX_EXPLAINED_FEATURES);
        assert!(flagged
            .reasons
            .iter()
            .any(|r| r == "Unusual transaction time"));
        assert!(flagged.reasons.iter().any(|r| r == "Rare category for this user"));
        assert!(typical.iter().all(|s| (0.0..=1.0).contains(s)));
    }

    #[test]
    fn test_low_risk_has_no_reasons() {
        let model = IsolationForest::train(&history(), &config()).unwrap();
        let scored = history()
            .iter()
            .map(|f| model.score(f))
            .find(|s| s.risk_level == RiskLevel::Low)
            .unwrap();
        assert!(scored.reasons.is_empty());
    }

    #[test]
    fn test_thresholds_captured_at_training() {
        let mut cfg = config();
        cfg.risk_levels = RiskLevelThresholds {
            medium: 0.3,
            high: 0.9,
        };
        let model = IsolationForest::train(&history(), &cfg).unwrap();
        assert_eq!(model.thresholds(), cfg.risk_levels);
    }

    #[test]
    fn test_fit_requires_min_samples() {
        let data = history();
        assert!(matches!(
            IsolationForest::fit(&data[..10], &config(), 20),
            Err(PipelineError::InsufficientData(_))
        ));

        let fitted = IsolationForest::fit(&data, &config(), 20).unwrap();
        assert_eq!(fitted.samples, 60);
        assert_eq!(fitted.metrics["sample_size"], 60.0);
        assert!(fitted.metrics["mean_score"] > 0.0 && fitted.metrics["mean_score"] < 1.0);
        assert_eq!(fitted.metrics["medium_threshold"], config().risk_levels.medium);
        assert_eq!(fitted.metrics["high_threshold"], config().risk_levels.high);
    }
}
