//! Request and reply messages exchanged with the service over NATS

use crate::error::{ErrorKind, PipelineError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::model::ModelKind;
use super::prediction::{AnomalyScore, DailyForecast, Forecast, PredictionResult};
use super::transaction::{DateRange, NewTransaction, Transaction};

/// A request, tagged by `op`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PipelineRequest {
    SubmitTransaction {
        transaction: NewTransaction,
    },
    SubmitBatch {
        transactions: Vec<NewTransaction>,
    },
    CorrectCategory {
        user_id: String,
        transaction_id: Uuid,
        category: String,
    },
    Train {
        user_id: String,
        kind: ModelKind,
    },
    PredictCategory {
        user_id: String,
        description: String,
    },
    Forecast {
        user_id: String,
        horizon_days: u32,
    },
    ScoreTransaction {
        user_id: String,
        transaction_id: Uuid,
    },
    DetectAnomalies {
        user_id: String,
    },
    TrainedAt {
        user_id: String,
        kind: ModelKind,
    },
    Invalidate {
        user_id: String,
        kind: ModelKind,
    },
    CategoryBreakdown {
        user_id: String,
        #[serde(default)]
        range: DateRange,
    },
}

impl PipelineRequest {
    /// Operation name, as it appears in the `op` tag
    pub fn op(&self) -> &'static str {
        match self {
            PipelineRequest::SubmitTransaction { .. } => "submit_transaction",
            PipelineRequest::SubmitBatch { .. } => "submit_batch",
            PipelineRequest::CorrectCategory { .. } => "correct_category",
            PipelineRequest::Train { .. } => "train",
            PipelineRequest::PredictCategory { .. } => "predict_category",
            PipelineRequest::Forecast { .. } => "forecast",
            PipelineRequest::ScoreTransaction { .. } => "score_transaction",
            PipelineRequest::DetectAnomalies { .. } => "detect_anomalies",
            PipelineRequest::TrainedAt { .. } => "trained_at",
            PipelineRequest::Invalidate { .. } => "invalidate",
            PipelineRequest::CategoryBreakdown { .. } => "category_breakdown",
        }
    }
}

/// Reply envelope, tagged by `status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PipelineReply {
    Ok { data: serde_json::Value },
    Error { kind: ErrorKind, reason: String },
}

impl PipelineReply {
    /// Successful reply carrying `data`
    pub fn ok<T: Serialize>(data: &T) -> Self {
        match serde_json::to_value(data) {
            Ok(data) => PipelineReply::Ok { data },
            Err(e) => PipelineReply::Error {
                kind: ErrorKind::Internal,
                reason: format!("failed to encode reply: {}", e),
            },
        }
    }

    pub fn error(error: &PipelineError) -> Self {
        PipelineReply::Error {
            kind: error.kind(),
            reason: error.to_string(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, PipelineReply::Ok { .. })
    }
}

/// Reply data for a stored transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmittedTransaction {
    #[serde(flatten)]
    pub transaction: Transaction,
    /// Present when the user has a trained anomaly model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anomaly: Option<AnomalyScore>,
}

/// Reply data for a scored transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredTransaction {
    #[serde(flatten)]
    pub prediction: PredictionResult,
    pub reasons: Vec<String>,
}

/// Reply data for a forecast
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastReply {
    pub horizon_days: u32,
    pub total_predicted: f64,
    pub daily_predictions: Vec<DailyForecast>,
    /// One envelope per category and day
    pub predictions: Vec<PredictionResult>,
}

impl From<Forecast> for ForecastReply {
    fn from(forecast: Forecast) -> Self {
        Self {
            horizon_days: forecast.horizon_days,
            total_predicted: forecast.total_predicted,
            daily_predictions: forecast.daily_predictions.clone(),
            predictions: forecast.into_predictions(),
        }
    }
}
