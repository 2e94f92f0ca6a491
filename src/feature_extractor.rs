//! Feature extraction for the per-user models.
//!
//! Turns an ordered transaction history into one [`FeatureVector`] per
//! transaction and into a dense per-day spending history for forecasting.
//! Every statistic for the record at index `i` is computed from records
//! `0..=i` only, so features never look ahead.

use crate::error::{PipelineError, PipelineResult};
use crate::types::prediction::{CategoryChange, CategoryStat, SpendingInsights};
use crate::types::transaction::{DateRange, Transaction};
use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// Names of the numeric features, in the order [`FeatureVector::numeric`] emits them.
pub const NUMERIC_FEATURES: [&str; NUMERIC_FEATURE_COUNT] = [
    "amount",
    "amount_log",
    "rolling_mean_7d",
    "rolling_mean_30d",
    "amount_vs_7d_mean",
    "amount_vs_30d_mean",
    "day_of_week",
    "hour",
    "is_weekend",
    "is_night",
    "category_frequency",
];

pub const NUMERIC_FEATURE_COUNT: usize = 11;

const RATIO_EPSILON: f64 = 1e-6;

/// Length of the recent window in spending insights
pub const RECENT_WINDOW_DAYS: usize = 30;

/// Features of one transaction. Derived on demand, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub transaction_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub amount: f64,
    /// Mean amount over the trailing 7 days, current record included
    pub rolling_mean_7d: f64,
    /// Mean amount over the trailing 30 days, current record included
    pub rolling_mean_30d: f64,
    /// 0 = Monday .. 6 = Sunday
    pub day_of_week: u32,
    pub hour: u32,
    /// Share of records so far that carry the same category
    pub category_frequency: f64,
    pub category: Option<String>,
    pub tokens: Vec<String>,
}

impl FeatureVector {
    pub fn is_weekend(&self) -> bool {
        self.day_of_week >= 5
    }

    pub fn is_night(&self) -> bool {
        self.hour >= 22 || self.hour <= 6
    }

    /// Numeric model input, ordered as [`NUMERIC_FEATURES`].
    pub fn numeric(&self) -> [f64; NUMERIC_FEATURE_COUNT] {
        let magnitude = self.amount.abs();
        [
            self.amount,
            self.amount.signum() * magnitude.ln_1p(),
            self.rolling_mean_7d,
            self.rolling_mean_30d,
            magnitude / (self.rolling_mean_7d.abs() + RATIO_EPSILON),
            magnitude / (self.rolling_mean_30d.abs() + RATIO_EPSILON),
            self.day_of_week as f64,
            self.hour as f64,
            if self.is_weekend() { 1.0 } else { 0.0 },
            if self.is_night() { 1.0 } else { 0.0 },
            self.category_frequency,
        ]
    }
}

/// Dense per-day spending per category, oldest day first.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyHistory {
    pub start: NaiveDate,
    pub days: usize,
    /// Spent magnitude per day; every series has `days` entries
    pub categories: BTreeMap<String, Vec<f64>>,
}

impl DailyHistory {
    pub fn end(&self) -> NaiveDate {
        self.date_at(self.days.saturating_sub(1))
    }

    pub fn date_at(&self, index: usize) -> NaiveDate {
        self.start + Duration::days(index as i64)
    }

    /// Total spending per day over all categories.
    pub fn totals(&self) -> Vec<f64> {
        let mut totals = vec![0.0; self.days];
        for series in self.categories.values() {
            for (total, value) in totals.iter_mut().zip(series) {
                *total += value;
            }
        }
        totals
    }
}

/// Lowercase, turn punctuation into separators, split on whitespace.
pub fn tokenize(text: &str) -> Vec<String> {
    let normalized: String = text
        .chars()
        .flat_map(|c| {
            let c = if c.is_alphanumeric() { c } else { ' ' };
            c.to_lowercase()
        })
        .collect();
    normalized.split_whitespace().map(str::to_string).collect()
}

/// Feature extractor for a single user's transaction history.
pub struct FeatureExtractor;

impl FeatureExtractor {
    /// Create a new feature extractor.
    pub fn new() -> Self {
        Self
    }

    /// Extract one feature vector per transaction.
    ///
    /// The input must be ordered by timestamp.
    pub fn extract(&self, transactions: &[Transaction]) -> PipelineResult<Vec<FeatureVector>> {
        self.extract_in_range(transactions, &DateRange::all())
    }

    /// Extract features for the transactions inside `range`.
    ///
    /// Records before the range still feed the rolling statistics.
    pub fn extract_in_range(
        &self,
        transactions: &[Transaction],
        range: &DateRange,
    ) -> PipelineResult<Vec<FeatureVector>> {
        if transactions.is_empty() {
            return Err(PipelineError::InsufficientData(
                "feature extraction needs at least one transaction".to_string(),
            ));
        }
        ensure_ordered(transactions)?;

        let mut features = Vec::with_capacity(transactions.len());
        let mut window_7d = TrailingWindow::new(Duration::days(7));
        let mut window_30d = TrailingWindow::new(Duration::days(30));
        let mut category_counts: HashMap<&str, usize> = HashMap::new();

        for (index, tx) in transactions.iter().enumerate() {
            let rolling_mean_7d = window_7d.push(transactions, index);
            let rolling_mean_30d = window_30d.push(transactions, index);

            let seen = category_counts
                .entry(tx.category_or_uncategorized())
                .or_insert(0);
            *seen += 1;
            let category_frequency = *seen as f64 / (index + 1) as f64;

            if !range.contains(tx.timestamp) {
                continue;
            }

            features.push(FeatureVector {
                transaction_id: tx.id,
                timestamp: tx.timestamp,
                amount: tx.amount,
                rolling_mean_7d,
                rolling_mean_30d,
                day_of_week: tx.timestamp.weekday().num_days_from_monday(),
                hour: tx.timestamp.hour(),
                category_frequency,
                category: tx.category.clone(),
                tokens: tokenize(&tx.description),
            });
        }

        Ok(features)
    }

    /// Build the per-day spending history used by the forecaster.
    ///
    /// The history ends on the last transaction day and reaches back to the
    /// first transaction day or `max_days` days, whichever is shorter. It must
    /// cover at least `min_days` days.
    pub fn daily_history(
        &self,
        transactions: &[Transaction],
        min_days: i64,
        max_days: i64,
    ) -> PipelineResult<DailyHistory> {
        let (first, last) = match (transactions.first(), transactions.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => {
                return Err(PipelineError::InsufficientData(
                    "no transaction history".to_string(),
                ))
            }
        };
        ensure_ordered(transactions)?;

        let end = last.timestamp.date_naive();
        let earliest = end - Duration::days(max_days.max(1) - 1);
        let start = first.timestamp.date_naive().max(earliest);
        let span = (end - start).num_days() + 1;
        if span < min_days {
            return Err(PipelineError::InsufficientData(format!(
                "forecasting needs {} days of history, found {}",
                min_days, span
            )));
        }

        let days = span as usize;
        let mut categories: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for tx in transactions
            .iter()
            .filter(|tx| tx.is_spending() && tx.timestamp.date_naive() >= start)
        {
            let offset = (tx.timestamp.date_naive() - start).num_days() as usize;
            let series = categories
                .entry(tx.category_or_uncategorized().to_string())
                .or_insert_with(|| vec![0.0; days]);
            series[offset] += tx.spent();
        }

        if categories.is_empty() {
            return Err(PipelineError::InsufficientData(
                "history contains no spending".to_string(),
            ));
        }

        Ok(DailyHistory {
            start,
            days,
            categories,
        })
    }

    /// Spending totals, averages, counts and share per category.
    pub fn category_breakdown(&self, transactions: &[Transaction]) -> BTreeMap<String, CategoryStat> {
        let mut sums: BTreeMap<String, (f64, usize)> = BTreeMap::new();
        for tx in transactions.iter().filter(|tx| tx.is_spending()) {
            let entry = sums
                .entry(tx.category_or_uncategorized().to_string())
                .or_insert((0.0, 0));
            entry.0 += tx.spent();
            entry.1 += 1;
        }

        let grand_total: f64 = sums.values().map(|(total, _)| total).sum();
        sums.into_iter()
            .map(|(category, (total, count))| {
                let percentage = if grand_total > 0.0 {
                    total / grand_total * 100.0
                } else {
                    0.0
                };
                (
                    category,
                    CategoryStat {
                        total,
                        average: total / count as f64,
                        count,
                        percentage,
                    },
                )
            })
            .collect()
    }

    /// Compare the last [`RECENT_WINDOW_DAYS`] days of spending with the days before.
    ///
    /// Looks back at most `max_days` days. A history without spending yields
    /// empty insights.
    pub fn spending_insights(
        &self,
        transactions: &[Transaction],
        max_days: i64,
    ) -> PipelineResult<SpendingInsights> {
        let daily = match self.daily_history(transactions, 1, max_days) {
            Ok(daily) => daily,
            Err(PipelineError::InsufficientData(_)) => return Ok(SpendingInsights::default()),
            Err(e) => return Err(e),
        };

        let split = daily.days.saturating_sub(RECENT_WINDOW_DAYS);
        let totals = daily.totals();
        let (earlier, recent) = totals.split_at(split);
        let active_days = earlier.iter().filter(|total| **total > 0.0).count();
        let historical_avg_daily = if active_days > 0 {
            earlier.iter().sum::<f64>() / active_days as f64
        } else {
            0.0
        };

        let category_changes = daily
            .categories
            .iter()
            .filter_map(|(category, series)| {
                let historical_amount: f64 = series[..split].iter().sum();
                let recent_amount: f64 = series[split..].iter().sum();
                (historical_amount > 0.0 && recent_amount > 0.0).then(|| {
                    (
                        category.clone(),
                        CategoryChange {
                            recent_amount,
                            historical_amount,
                            change_percent: (recent_amount - historical_amount) / historical_amount
                                * 100.0,
                        },
                    )
                })
            })
            .collect();

        Ok(SpendingInsights {
            recent_avg_daily: recent.iter().sum::<f64>() / RECENT_WINDOW_DAYS as f64,
            historical_avg_daily,
            category_changes,
        })
    }

    /// Get the number of numeric features produced.
    pub fn feature_count(&self) -> usize {
        NUMERIC_FEATURE_COUNT
    }

    /// Get numeric feature names.
    pub fn feature_names(&self) -> &'static [&'static str] {
        &NUMERIC_FEATURES
    }
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new()
    }
}

fn ensure_ordered(transactions: &[Transaction]) -> PipelineResult<()> {
    if let Some(pair) = transactions
        .windows(2)
        .find(|pair| pair[1].timestamp < pair[0].timestamp)
    {
        return Err(PipelineError::Validation(format!(
            "transactions must be ordered by timestamp ({} follows {})",
            pair[1].id, pair[0].id
        )));
    }
    Ok(())
}

/// Running mean over `(t - span, t]`, restricted to records already visited.
struct TrailingWindow {
    span: Duration,
    start: usize,
    sum: f64,
}

impl TrailingWindow {
    fn new(span: Duration) -> Self {
        Self {
            span,
            start: 0,
            sum: 0.0,
        }
    }

    /// Admit record `index` and return the window mean.
    fn push(&mut self, transactions: &[Transaction], index: usize) -> f64 {
        let now = transactions[index].timestamp;
        self.sum += transactions[index].amount;
        while self.start < index && transactions[self.start].timestamp <= now - self.span {
            self.sum -= transactions[self.start].amount;
            self.start += 1;
        }
        self.sum / (index + 1 - self.start) as f64
    }
}
