//! Risk levels and anomaly alert data structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::prediction::Contribution;
use super::transaction::Transaction;

/// Risk level classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Determine risk level from score and thresholds
    pub fn from_score(score: f64, thresholds: &RiskLevelThresholds) -> Self {
        if score >= thresholds.high {
            RiskLevel::High
        } else if score >= thresholds.medium {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

/// Cut points on the anomaly score.
///
/// `score < medium` is low, `score < high` is medium, anything else is high.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskLevelThresholds {
    pub medium: f64,
    pub high: f64,
}

impl RiskLevelThresholds {
    /// Thresholds must be ordered and inside the score range.
    pub fn is_valid(&self) -> bool {
        (0.0..=1.0).contains(&self.medium)
            && (0.0..=1.0).contains(&self.high)
            && self.medium <= self.high
    }
}

impl Default for RiskLevelThresholds {
    fn default() -> Self {
        Self {
            medium: 0.55,
            high: 0.70,
        }
    }
}

/// Alert generated when a transaction scores at high risk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyAlert {
    /// Unique alert identifier
    pub alert_id: String,

    /// Associated transaction ID
    pub transaction_id: Uuid,

    pub user_id: String,

    /// Anomaly score (0.0 - 1.0)
    pub anomaly_score: f64,

    pub risk_level: RiskLevel,

    /// Features that contributed most to the score
    pub contributions: Vec<Contribution>,

    /// Human-readable explanations
    pub reasons: Vec<String>,

    /// Alert generation timestamp
    pub timestamp: DateTime<Utc>,

    pub amount: f64,

    pub description: String,
}

impl AnomalyAlert {
    /// Create a new alert for a scored transaction
    pub fn new(transaction: &Transaction, anomaly_score: f64, risk_level: RiskLevel) -> Self {
        Self {
            alert_id: Uuid::new_v4().to_string(),
            transaction_id: transaction.id,
            user_id: transaction.user_id.clone(),
            anomaly_score,
            risk_level,
            contributions: Vec::new(),
            reasons: Vec::new(),
            timestamp: Utc::now(),
            amount: transaction.amount,
            description: transaction.description.clone(),
        }
    }

    /// Attach the explanation behind the score
    pub fn with_explanation(mut self, contributions: Vec<Contribution>, reasons: Vec<String>) -> Self {
        self.contributions = contributions;
        self.reasons = reasons;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::transaction::NewTransaction;

    #[test]
    fn test_risk_level_from_score() {
        let thresholds = RiskLevelThresholds::default();

        assert_eq!(RiskLevel::from_score(0.1, &thresholds), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(0.549, &thresholds), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(0.55, &thresholds), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(0.69, &thresholds), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(0.70, &thresholds), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(1.0, &thresholds), RiskLevel::High);
    }

    #[test]
    fn test_threshold_validation() {
        assert!(RiskLevelThresholds::default().is_valid());
        assert!(!RiskLevelThresholds { medium: 0.8, high: 0.4 }.is_valid());
        assert!(!RiskLevelThresholds { medium: 0.4, high: 1.2 }.is_valid());
    }

    #[test]
    fn test_anomaly_alert_serialization() {
        let tx = NewTransaction::new("user_1", Utc::now(), -2400.0, "Electronics Megastore")
            .into_transaction(200)
            .unwrap();

        let alert = AnomalyAlert::new(&tx, 0.82, RiskLevel::High).with_explanation(
            vec![Contribution::new("amount", 6.1)],
            vec!["Amount significantly higher than usual spending".to_string()],
        );

        let json = serde_json::to_string(&alert).unwrap();
        let deserialized: AnomalyAlert = serde_json::from_str(&json).unwrap();

        assert_eq!(alert.transaction_id, deserialized.transaction_id);
        assert_eq!(alert.anomaly_score, deserialized.anomaly_score);
        assert_eq!(deserialized.risk_level, RiskLevel::High);
        assert_eq!(deserialized.reasons.len(), 1);
    }
}
