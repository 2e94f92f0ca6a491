//! Prediction outputs returned to callers. Never persisted.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::alert::RiskLevel;

/// A named feature and how much it pushed the prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    pub feature: String,
    pub weight: f64,
}

impl Contribution {
    pub fn new(feature: impl Into<String>, weight: f64) -> Self {
        Self {
            feature: feature.into(),
            weight,
        }
    }
}

/// What a prediction is about
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Subject {
    Transaction(Uuid),
    Description(String),
    Day(NaiveDate),
}

/// Predicted value, shaped by model kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PredictionValue {
    Category {
        label: String,
    },
    Amount {
        category: String,
        predicted: f64,
        lower: f64,
        upper: f64,
        basis: ForecastBasis,
    },
    Risk {
        level: RiskLevel,
    },
}

/// Uniform prediction envelope handed to the outer layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub subject: Subject,
    pub value: PredictionValue,
    /// Probability for labels, anomaly score for risk, absent for amounts
    pub confidence: Option<f64>,
    /// Contributing features, strongest first
    pub explanation: Vec<Contribution>,
}

/// Categorizer output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryPrediction {
    pub category: String,
    /// Normalized probability over the trained label set
    pub confidence: f64,
    pub explanation: Vec<Contribution>,
}

impl CategoryPrediction {
    pub fn into_result(self, description: &str) -> PredictionResult {
        PredictionResult {
            subject: Subject::Description(description.to_string()),
            value: PredictionValue::Category {
                label: self.category,
            },
            confidence: Some(self.confidence),
            explanation: self.explanation,
        }
    }
}

/// Anomaly scorer output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyScore {
    /// Score in [0, 1]; higher is more unusual
    pub score: f64,
    pub risk_level: RiskLevel,
    pub explanation: Vec<Contribution>,
    pub reasons: Vec<String>,
}

impl AnomalyScore {
    pub fn into_result(self, transaction_id: Uuid) -> PredictionResult {
        PredictionResult {
            subject: Subject::Transaction(transaction_id),
            value: PredictionValue::Risk {
                level: self.risk_level,
            },
            confidence: Some(self.score),
            explanation: self.explanation,
        }
    }
}

/// A transaction flagged by an anomaly sweep
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlaggedTransaction {
    pub transaction_id: Uuid,
    pub amount: f64,
    pub description: String,
    pub category: Option<String>,
    pub score: AnomalyScore,
}

/// How a forecast point was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastBasis {
    /// Weekday profile of the category
    Seasonal,
    /// Beyond the seasonal signal: category mean with widened bounds
    HistoricalMean,
}

/// Predicted spending for one category on one day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub date: NaiveDate,
    pub predicted_amount: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub basis: ForecastBasis,
}

/// Predicted spending over all categories for one day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyForecast {
    pub date: NaiveDate,
    pub predicted_amount: f64,
}

/// Per-category daily forecasts, each series ordered by date, with their aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub horizon_days: u32,
    /// Sum of predicted spending over all categories and days
    pub total_predicted: f64,
    /// Predicted spending per day summed over categories, ordered by date
    pub daily_predictions: Vec<DailyForecast>,
    pub categories: BTreeMap<String, Vec<ForecastPoint>>,
}

impl Forecast {
    /// Build a forecast and its daily aggregate from per-category series.
    pub fn new(horizon_days: u32, categories: BTreeMap<String, Vec<ForecastPoint>>) -> Self {
        let mut by_day: BTreeMap<NaiveDate, f64> = BTreeMap::new();
        for point in categories.values().flatten() {
            *by_day.entry(point.date).or_insert(0.0) += point.predicted_amount;
        }
        let daily_predictions: Vec<DailyForecast> = by_day
            .into_iter()
            .map(|(date, predicted_amount)| DailyForecast {
                date,
                predicted_amount,
            })
            .collect();
        let total_predicted = daily_predictions.iter().map(|d| d.predicted_amount).sum();

        Self {
            horizon_days,
            total_predicted,
            daily_predictions,
            categories,
        }
    }

    pub fn empty() -> Self {
        Self::new(0, BTreeMap::new())
    }

    pub fn is_empty(&self) -> bool {
        self.categories.values().all(|points| points.is_empty())
    }

    /// Flatten into prediction envelopes, category by category.
    pub fn into_predictions(self) -> Vec<PredictionResult> {
        self.categories
            .into_iter()
            .flat_map(|(category, points)| {
                points.into_iter().map(move |p| PredictionResult {
                    subject: Subject::Day(p.date),
                    value: PredictionValue::Amount {
                        category: category.clone(),
                        predicted: p.predicted_amount,
                        lower: p.lower_bound,
                        upper: p.upper_bound,
                        basis: p.basis,
                    },
                    confidence: None,
                    explanation: Vec::new(),
                })
            })
            .collect()
    }
}

/// Spending summary for one category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryStat {
    pub total: f64,
    pub average: f64,
    pub count: usize,
    /// Share of all spending, in percent
    pub percentage: f64,
}

/// Recent spending of one category against the time before it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryChange {
    pub recent_amount: f64,
    pub historical_amount: f64,
    pub change_percent: f64,
}

/// Recent-window spending compared with the user's earlier history
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpendingInsights {
    /// Spending in the recent window divided by its length in days
    pub recent_avg_daily: f64,
    /// Earlier spending divided by the number of earlier days with spending
    pub historical_avg_daily: f64,
    /// Categories spent on in both periods
    pub category_changes: BTreeMap<String, CategoryChange>,
}

/// Result of an anomaly sweep over a user's history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalySweep {
    /// Non-low transactions, highest score first
    pub flagged: Vec<FlaggedTransaction>,
    pub insights: SpendingInsights,
}
