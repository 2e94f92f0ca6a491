//! Model identity and training bookkeeping

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Prediction task a trained model serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Categorizer,
    Forecaster,
    Anomaly,
}

impl ModelKind {
    pub const ALL: [ModelKind; 3] = [
        ModelKind::Categorizer,
        ModelKind::Forecaster,
        ModelKind::Anomaly,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Categorizer => "categorizer",
            ModelKind::Forecaster => "forecaster",
            ModelKind::Anomaly => "anomaly",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "categorizer" => Ok(ModelKind::Categorizer),
            "forecaster" => Ok(ModelKind::Forecaster),
            "anomaly" => Ok(ModelKind::Anomaly),
            other => Err(format!("unknown model kind: {}", other)),
        }
    }
}

/// Registry key: one active model per user and kind
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelKey {
    pub user_id: String,
    pub kind: ModelKind,
}

impl ModelKey {
    pub fn new(user_id: impl Into<String>, kind: ModelKind) -> Self {
        Self {
            user_id: user_id.into(),
            kind,
        }
    }
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.user_id, self.kind)
    }
}

/// Outcome of a successful training run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub user_id: String,
    pub kind: ModelKind,
    pub trained_at: DateTime<Utc>,
    /// Number of examples (transactions or days) the model saw
    pub samples: usize,
    /// In-sample quality figures, named per model kind
    pub metrics: BTreeMap<String, f64>,
    pub duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_kind_round_trip_names() {
        for kind in ModelKind::ALL {
            assert_eq!(kind.as_str().parse::<ModelKind>().unwrap(), kind);
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
        assert!("isolation_forest".parse::<ModelKind>().is_err());
    }

    #[test]
    fn test_model_key_display() {
        let key = ModelKey::new("alice", ModelKind::Forecaster);
        assert_eq!(key.to_string(), "alice/forecaster");
    }
}
