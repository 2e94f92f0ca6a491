//! Transaction data structures

use crate::error::{PipelineError, PipelineResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Longest accepted user identifier.
pub const MAX_USER_ID_LEN: usize = 50;

/// Longest accepted category label.
pub const MAX_CATEGORY_LEN: usize = 64;

/// Label used for spending that has no category yet.
pub const UNCATEGORIZED: &str = "Uncategorized";

/// Where a transaction's category came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategorySource {
    /// Supplied or corrected by the user
    Manual,
    /// Filled in by the user's categorizer model
    Predicted,
}

/// A stored transaction.
///
/// Amounts are signed: negative values are money going out (spending),
/// positive values are money coming in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique transaction identifier
    pub id: Uuid,

    /// Owner of the transaction
    pub user_id: String,

    /// When the transaction happened
    pub timestamp: DateTime<Utc>,

    /// Signed amount
    pub amount: f64,

    /// Sanitized description text
    pub description: String,

    /// Category label, `None` until classified
    #[serde(default)]
    pub category: Option<String>,

    /// Origin of `category`
    #[serde(default)]
    pub category_source: Option<CategorySource>,

    /// Categorizer confidence when the category was predicted
    #[serde(default)]
    pub category_confidence: Option<f64>,
}

impl Transaction {
    /// True when money left the account.
    pub fn is_spending(&self) -> bool {
        self.amount < 0.0
    }

    /// Spent magnitude, zero for income.
    pub fn spent(&self) -> f64 {
        if self.is_spending() {
            -self.amount
        } else {
            0.0
        }
    }

    /// Category label the user assigned, ignoring model predictions.
    pub fn manual_category(&self) -> Option<&str> {
        match self.category_source {
            Some(CategorySource::Manual) => self.category.as_deref(),
            _ => None,
        }
    }

    /// Category label used for grouping spending.
    pub fn category_or_uncategorized(&self) -> &str {
        self.category.as_deref().unwrap_or(UNCATEGORIZED)
    }
}

/// Optional inclusive bounds on transaction timestamps
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
}

impl DateRange {
    /// Range with no bounds
    pub fn all() -> Self {
        Self::default()
    }

    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        self.start.map_or(true, |s| timestamp >= s) && self.end.map_or(true, |e| timestamp <= e)
    }
}

/// Payload for submitting a transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTransaction {
    pub user_id: String,

    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    pub amount: f64,

    pub description: String,

    #[serde(default)]
    pub category: Option<String>,
}

impl NewTransaction {
    /// Create a new uncategorized transaction payload
    pub fn new(
        user_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        amount: f64,
        description: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            timestamp,
            amount,
            description: description.into(),
            category: None,
        }
    }

    /// Attach a manual category
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Validate the payload and turn it into a stored transaction with a fresh id.
    pub fn into_transaction(self, max_description_len: usize) -> PipelineResult<Transaction> {
        validate_user_id(&self.user_id)?;

        if !self.amount.is_finite() {
            return Err(PipelineError::Validation(format!(
                "amount must be finite, got {}",
                self.amount
            )));
        }

        let description = sanitize_text(&self.description);
        if description.is_empty() {
            return Err(PipelineError::Validation(
                "description is required".to_string(),
            ));
        }
        if description.chars().count() > max_description_len {
            return Err(PipelineError::Validation(format!(
                "description exceeds {} characters",
                max_description_len
            )));
        }

        let category = match self.category {
            Some(raw) => normalize_category(&raw)?,
            None => None,
        };
        let category_source = category.as_ref().map(|_| CategorySource::Manual);

        Ok(Transaction {
            id: Uuid::new_v4(),
            user_id: self.user_id,
            timestamp: self.timestamp,
            amount: self.amount,
            description,
            category,
            category_source,
            category_confidence: None,
        })
    }
}

/// Check a user id: non-empty, bounded, alphanumeric plus `_` and `-`.
pub fn validate_user_id(user_id: &str) -> PipelineResult<()> {
    if user_id.is_empty() || user_id.len() > MAX_USER_ID_LEN {
        return Err(PipelineError::Validation(format!(
            "user id must be 1..={} characters",
            MAX_USER_ID_LEN
        )));
    }
    if !user_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(PipelineError::Validation(format!(
            "invalid user id format: {:?}",
            user_id
        )));
    }
    Ok(())
}

/// Trim a category label; blank labels count as absent.
pub fn normalize_category(raw: &str) -> PipelineResult<Option<String>> {
    let label = sanitize_text(raw);
    if label.is_empty() {
        return Ok(None);
    }
    if label.chars().count() > MAX_CATEGORY_LEN {
        return Err(PipelineError::Validation(format!(
            "category exceeds {} characters",
            MAX_CATEGORY_LEN
        )));
    }
    Ok(Some(label))
}

/// Drop control characters and surrounding whitespace.
fn sanitize_text(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control())
        .collect::<String>()
        .trim()
        .to_string()
}
