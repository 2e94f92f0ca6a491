//! Per-user models: estimator capabilities, trained model records and the registry.
//!
//! The pipeline talks to estimators only through [`CategoryModel`],
//! [`ForecastModel`] and [`AnomalyModel`]; what sits behind them is owned by
//! the estimator modules.

pub mod anomaly;
pub mod categorizer;
pub mod forecaster;
pub mod registry;

pub use anomaly::IsolationForest;
pub use categorizer::NaiveBayesCategorizer;
pub use forecaster::SeasonalForecaster;
pub use registry::{ModelRegistry, TrainingPermit};

use crate::error::PipelineResult;
use crate::feature_extractor::FeatureVector;
use crate::types::model::{ModelKey, ModelKind};
use crate::types::prediction::{AnomalyScore, CategoryPrediction, Forecast};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;

/// Description → category over a closed label set.
pub trait CategoryModel: Send + Sync {
    fn predict(&self, description: &str) -> CategoryPrediction;
}

/// Horizon → per-category daily spending forecast.
pub trait ForecastModel: Send + Sync {
    fn forecast(&self, horizon_days: u32) -> PipelineResult<Forecast>;
}

/// Feature vector → anomaly score and risk level.
pub trait AnomalyModel: Send + Sync {
    fn score(&self, features: &FeatureVector) -> AnomalyScore;
}

/// Fitted estimator behind its capability interface
pub enum Estimator {
    Categorizer(Box<dyn CategoryModel>),
    Forecaster(Box<dyn ForecastModel>),
    Anomaly(Box<dyn AnomalyModel>),
}

impl Estimator {
    pub fn kind(&self) -> ModelKind {
        match self {
            Estimator::Categorizer(_) => ModelKind::Categorizer,
            Estimator::Forecaster(_) => ModelKind::Forecaster,
            Estimator::Anomaly(_) => ModelKind::Anomaly,
        }
    }
}

/// Result of fitting an estimator, before it is bound to a user
pub struct Fitted {
    pub estimator: Estimator,
    pub samples: usize,
    pub metrics: BTreeMap<String, f64>,
}

/// A model trained for exactly one user.
///
/// Immutable once built; a retrain produces a new value that replaces this
/// one in the registry.
pub struct TrainedModel {
    pub user_id: String,
    pub trained_at: DateTime<Utc>,
    pub samples: usize,
    estimator: Estimator,
}

impl TrainedModel {
    pub fn new(user_id: impl Into<String>, samples: usize, estimator: Estimator) -> Self {
        Self {
            user_id: user_id.into(),
            trained_at: Utc::now(),
            samples,
            estimator,
        }
    }

    pub fn kind(&self) -> ModelKind {
        self.estimator.kind()
    }

    pub fn key(&self) -> ModelKey {
        ModelKey::new(self.user_id.clone(), self.kind())
    }

    pub fn as_categorizer(&self) -> Option<&dyn CategoryModel> {
        match &self.estimator {
            Estimator::Categorizer(model) => Some(model.as_ref()),
            _ => None,
        }
    }

    pub fn as_forecaster(&self) -> Option<&dyn ForecastModel> {
        match &self.estimator {
            Estimator::Forecaster(model) => Some(model.as_ref()),
            _ => None,
        }
    }

    pub fn as_anomaly(&self) -> Option<&dyn AnomalyModel> {
        match &self.estimator {
            Estimator::Anomaly(model) => Some(model.as_ref()),
            _ => None,
        }
    }
}

impl fmt::Debug for TrainedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrainedModel")
            .field("user_id", &self.user_id)
            .field("kind", &self.kind())
            .field("trained_at", &self.trained_at)
            .field("samples", &self.samples)
            .finish()
    }
}
