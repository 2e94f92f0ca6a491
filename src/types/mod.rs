//! Type definitions for the finance pipeline

pub mod alert;
pub mod message;
pub mod model;
pub mod prediction;
pub mod transaction;

pub use alert::{AnomalyAlert, RiskLevel, RiskLevelThresholds};
pub use message::{PipelineReply, PipelineRequest};
pub use model::{ModelKey, ModelKind, TrainingReport};
pub use prediction::{
    AnomalySweep, AnomalyScore, CategoryPrediction, Forecast, ForecastBasis, PredictionResult,
    SpendingInsights,
};
pub use transaction::{DateRange, NewTransaction, Transaction};
