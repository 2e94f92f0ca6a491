//! The pipeline facade.
//!
//! [`FinancePipeline`] is what the outer layer talks to: it validates and
//! stores transactions, trains per-user models under a wall-clock budget and
//! answers predictions from whatever model the registry currently holds.

use crate::config::AppConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::feature_extractor::{FeatureExtractor, FeatureVector};
use crate::models::{
    AnomalyModel, CategoryModel, Fitted, ForecastModel, IsolationForest, ModelRegistry,
    NaiveBayesCategorizer, SeasonalForecaster, TrainedModel,
};
use crate::store::{InMemoryTransactionStore, TransactionStore};
use crate::types::model::{ModelKey, ModelKind, TrainingReport};
use crate::types::prediction::{
    AnomalyScore, AnomalySweep, CategoryPrediction, CategoryStat, FlaggedTransaction, Forecast,
    SpendingInsights,
};
use crate::types::alert::RiskLevel;
use crate::types::transaction::{
    normalize_category, validate_user_id, CategorySource, DateRange, NewTransaction, Transaction,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

type TrainingJob = Box<dyn FnOnce() -> PipelineResult<Fitted> + Send>;

/// Entry point for transactions, training and predictions.
pub struct FinancePipeline {
    config: AppConfig,
    store: Arc<dyn TransactionStore>,
    registry: ModelRegistry,
    extractor: FeatureExtractor,
}

impl FinancePipeline {
    pub fn new(config: AppConfig, store: Arc<dyn TransactionStore>) -> Self {
        Self {
            config,
            store,
            registry: ModelRegistry::new(),
            extractor: FeatureExtractor::new(),
        }
    }

    /// Pipeline backed by a process-local store
    pub fn in_memory(config: AppConfig) -> Self {
        Self::new(config, Arc::new(InMemoryTransactionStore::new()))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Validate and store a transaction.
    ///
    /// An uncategorized transaction is labeled by the user's categorizer
    /// when one is trained.
    pub fn submit(&self, new_tx: NewTransaction) -> PipelineResult<Transaction> {
        let mut tx = new_tx.into_transaction(self.config.features.max_description_len)?;
        self.auto_categorize(&mut tx)?;
        self.store.insert(tx.clone())?;

        debug!(
            user_id = %tx.user_id,
            transaction_id = %tx.id,
            category = ?tx.category,
            "Transaction stored"
        );
        Ok(tx)
    }

    /// Validate and store several transactions. Nothing is stored if any one is invalid.
    pub fn submit_batch(&self, batch: Vec<NewTransaction>) -> PipelineResult<Vec<Transaction>> {
        let max_len = self.config.features.max_description_len;
        let mut transactions = batch
            .into_iter()
            .enumerate()
            .map(|(index, new_tx)| {
                new_tx.into_transaction(max_len).map_err(|e| match e {
                    PipelineError::Validation(reason) => {
                        PipelineError::Validation(format!("item {}: {}", index, reason))
                    }
                    other => other,
                })
            })
            .collect::<PipelineResult<Vec<_>>>()?;

        for tx in &mut transactions {
            self.auto_categorize(tx)?;
        }
        self.store.insert_batch(transactions.clone())?;

        debug!(count = transactions.len(), "Transaction batch stored");
        Ok(transactions)
    }

    /// Set a user-assigned category on a stored transaction.
    pub fn correct_category(
        &self,
        user_id: &str,
        transaction_id: Uuid,
        category: &str,
    ) -> PipelineResult<Transaction> {
        validate_user_id(user_id)?;
        let label = normalize_category(category)?
            .ok_or_else(|| PipelineError::Validation("category is required".to_string()))?;

        let updated = self
            .store
            .update_category(user_id, transaction_id, label, CategorySource::Manual, None)?
            .ok_or_else(|| not_found(user_id, transaction_id))?;

        info!(
            user_id = %user_id,
            transaction_id = %transaction_id,
            category = ?updated.category,
            "Category corrected"
        );
        Ok(updated)
    }

    /// Train `kind` for `user_id` from the stored history and make it the active model.
    ///
    /// Fails with `Conflict` while another run for the same key is in flight and
    /// with `Timeout` when the run exceeds the configured budget; in both cases
    /// the previously active model stays in place.
    pub async fn train(&self, user_id: &str, kind: ModelKind) -> PipelineResult<TrainingReport> {
        validate_user_id(user_id)?;
        let history = self.training_history(user_id)?;
        let job = self.training_job(kind, history);
        self.run_training(ModelKey::new(user_id, kind), job).await
    }

    pub(crate) async fn run_training<F>(&self, key: ModelKey, job: F) -> PipelineResult<TrainingReport>
    where
        F: FnOnce() -> PipelineResult<Fitted> + Send + 'static,
    {
        let permit = self.registry.begin_training(&key)?;
        let budget = self.config.training.timeout();
        let started = Instant::now();

        // The permit travels with the job, so an abandoned run keeps its key
        // claimed until the blocking thread actually returns.
        let task = tokio::task::spawn_blocking(move || (job(), permit));
        let (fitted, _permit) = match tokio::time::timeout(budget, task).await {
            Ok(Ok((result, permit))) => (result?, permit),
            Ok(Err(join_error)) => {
                return Err(PipelineError::Internal(format!(
                    "training task for {} failed: {}",
                    key, join_error
                )))
            }
            Err(_) => {
                warn!(
                    user_id = %key.user_id,
                    kind = %key.kind,
                    budget_ms = self.config.training.timeout_ms,
                    "Training exceeded its budget, result will be discarded"
                );
                return Err(PipelineError::Timeout {
                    user_id: key.user_id.clone(),
                    kind: key.kind,
                    budget_ms: self.config.training.timeout_ms,
                });
            }
        };

        if fitted.estimator.kind() != key.kind {
            return Err(PipelineError::Internal(format!(
                "training for {} produced a {} model",
                key,
                fitted.estimator.kind()
            )));
        }

        let metrics = fitted.metrics;
        let model = TrainedModel::new(key.user_id.clone(), fitted.samples, fitted.estimator);
        let trained_at = model.trained_at;
        let samples = model.samples;
        self.registry.put(model)?;

        let duration_ms = started.elapsed().as_millis() as u64;
        info!(
            user_id = %key.user_id,
            kind = %key.kind,
            samples,
            duration_ms,
            "Model trained"
        );

        Ok(TrainingReport {
            user_id: key.user_id,
            kind: key.kind,
            trained_at,
            samples,
            metrics,
            duration_ms,
        })
    }

    /// Most recent transactions, capped by `training.max_transactions`.
    fn training_history(&self, user_id: &str) -> PipelineResult<Vec<Transaction>> {
        if self.store.count(user_id)? == 0 {
            return Err(PipelineError::InsufficientData(format!(
                "no transactions stored for user {}",
                user_id
            )));
        }
        let mut history = self.store.list(user_id, &DateRange::all())?;
        let excess = history
            .len()
            .saturating_sub(self.config.training.max_transactions);
        history.drain(..excess);
        Ok(history)
    }

    fn training_job(&self, kind: ModelKind, history: Vec<Transaction>) -> TrainingJob {
        let training = self.config.training.clone();
        match kind {
            ModelKind::Categorizer => {
                let config = self.config.categorizer.clone();
                Box::new(move || {
                    NaiveBayesCategorizer::fit(&history, &config, training.min_categorizer_examples)
                })
            }
            ModelKind::Forecaster => {
                let config = self.config.forecaster.clone();
                Box::new(move || {
                    let daily = FeatureExtractor::new().daily_history(
                        &history,
                        training.min_forecast_history_days,
                        training.max_history_days,
                    )?;
                    Ok(SeasonalForecaster::fit(&daily, &config))
                })
            }
            ModelKind::Anomaly => {
                let config = self.config.anomaly.clone();
                Box::new(move || {
                    if history.len() < training.min_anomaly_samples {
                        return Err(PipelineError::InsufficientData(format!(
                            "anomaly scorer needs {} transactions, found {}",
                            training.min_anomaly_samples,
                            history.len()
                        )));
                    }
                    let features = FeatureExtractor::new().extract(&history)?;
                    IsolationForest::fit(&features, &config, training.min_anomaly_samples)
                })
            }
        }
    }

    /// Categorize a description with the user's categorizer.
    pub fn predict_category(
        &self,
        user_id: &str,
        description: &str,
    ) -> PipelineResult<CategoryPrediction> {
        validate_user_id(user_id)?;
        let model = self
            .registry
            .require(&ModelKey::new(user_id, ModelKind::Categorizer))?;
        Ok(categorizer_of(&model)?.predict(description))
    }

    /// Forecast daily spending per category for the next `horizon_days` days.
    pub fn forecast(&self, user_id: &str, horizon_days: u32) -> PipelineResult<Forecast> {
        validate_user_id(user_id)?;
        let cap = self.config.forecaster.max_horizon_days;
        if horizon_days > cap {
            return Err(PipelineError::Validation(format!(
                "horizon of {} days exceeds the {} day cap",
                horizon_days, cap
            )));
        }
        let model = self
            .registry
            .require(&ModelKey::new(user_id, ModelKind::Forecaster))?;
        forecaster_of(&model)?.forecast(horizon_days)
    }

    /// Score one stored transaction against the user's anomaly model.
    pub fn score_transaction(
        &self,
        user_id: &str,
        transaction_id: Uuid,
    ) -> PipelineResult<(Transaction, AnomalyScore)> {
        validate_user_id(user_id)?;
        let model = self
            .registry
            .require(&ModelKey::new(user_id, ModelKind::Anomaly))?;
        let scorer = anomaly_of(&model)?;

        let (tx, features) = self.features_for(user_id, transaction_id)?;
        let score = scorer.score(&features);
        debug!(
            user_id = %user_id,
            transaction_id = %transaction_id,
            score = score.score,
            risk_level = score.risk_level.as_str(),
            "Transaction scored"
        );
        Ok((tx, score))
    }

    /// Score every stored transaction and return those above low risk, highest
    /// first, along with recent-versus-earlier spending insights.
    pub fn detect_anomalies(&self, user_id: &str) -> PipelineResult<AnomalySweep> {
        validate_user_id(user_id)?;
        let model = self
            .registry
            .require(&ModelKey::new(user_id, ModelKind::Anomaly))?;
        let scorer = anomaly_of(&model)?;

        let history = self.store.list(user_id, &DateRange::all())?;
        if history.is_empty() {
            return Ok(AnomalySweep {
                flagged: Vec::new(),
                insights: SpendingInsights::default(),
            });
        }
        let features = self.extractor.extract(&history)?;
        let insights = self
            .extractor
            .spending_insights(&history, self.config.training.max_history_days)?;

        let mut flagged: Vec<FlaggedTransaction> = history
            .into_iter()
            .zip(features.iter())
            .filter_map(|(tx, vector)| {
                let score = scorer.score(vector);
                (score.risk_level != RiskLevel::Low).then(|| FlaggedTransaction {
                    transaction_id: tx.id,
                    amount: tx.amount,
                    description: tx.description,
                    category: tx.category,
                    score,
                })
            })
            .collect();
        flagged.sort_by(|a, b| b.score.score.total_cmp(&a.score.score));
        Ok(AnomalySweep { flagged, insights })
    }

    /// When the active model of `kind` was trained, if there is one.
    pub fn last_trained_at(
        &self,
        user_id: &str,
        kind: ModelKind,
    ) -> PipelineResult<Option<DateTime<Utc>>> {
        validate_user_id(user_id)?;
        self.registry.trained_at(&ModelKey::new(user_id, kind))
    }

    /// Drop the active model of `kind`. Returns whether one was present.
    pub fn invalidate(&self, user_id: &str, kind: ModelKind) -> PipelineResult<bool> {
        validate_user_id(user_id)?;
        let removed = self.registry.invalidate(&ModelKey::new(user_id, kind))?;
        if removed {
            info!(user_id = %user_id, kind = %kind, "Model invalidated");
        }
        Ok(removed)
    }

    /// Spending per category within `range`.
    pub fn category_breakdown(
        &self,
        user_id: &str,
        range: &DateRange,
    ) -> PipelineResult<BTreeMap<String, CategoryStat>> {
        validate_user_id(user_id)?;
        let history = self.store.list(user_id, range)?;
        Ok(self.extractor.category_breakdown(&history))
    }

    fn auto_categorize(&self, tx: &mut Transaction) -> PipelineResult<()> {
        if tx.category.is_some() {
            return Ok(());
        }
        let key = ModelKey::new(tx.user_id.clone(), ModelKind::Categorizer);
        if let Some(model) = self.registry.get(&key)? {
            let prediction = categorizer_of(&model)?.predict(&tx.description);
            tx.category = Some(prediction.category);
            tx.category_source = Some(CategorySource::Predicted);
            tx.category_confidence = Some(prediction.confidence);
        }
        Ok(())
    }

    /// Features of one transaction, computed from the history up to and including it.
    fn features_for(
        &self,
        user_id: &str,
        transaction_id: Uuid,
    ) -> PipelineResult<(Transaction, FeatureVector)> {
        let tx = self
            .store
            .get(user_id, transaction_id)?
            .ok_or_else(|| not_found(user_id, transaction_id))?;
        let prior = DateRange {
            start: None,
            end: Some(tx.timestamp),
        };
        let mut history = self.store.list(user_id, &prior)?;
        // Records sharing the timestamp but stored later are not prior history
        let index = history
            .iter()
            .position(|stored| stored.id == transaction_id)
            .ok_or_else(|| not_found(user_id, transaction_id))?;
        history.truncate(index + 1);

        let vector = self
            .extractor
            .extract(&history)?
            .pop()
            .ok_or_else(|| PipelineError::Internal("feature extraction returned nothing".to_string()))?;
        Ok((tx, vector))
    }
}

fn not_found(user_id: &str, transaction_id: Uuid) -> PipelineError {
    PipelineError::NotFound(format!(
        "transaction {} for user {}",
        transaction_id, user_id
    ))
}

fn wrong_kind(model: &TrainedModel, expected: ModelKind) -> PipelineError {
    PipelineError::Internal(format!(
        "registry holds a {} model under the {} key",
        model.kind(),
        expected
    ))
}

fn categorizer_of(model: &TrainedModel) -> PipelineResult<&dyn CategoryModel> {
    model
        .as_categorizer()
        .ok_or_else(|| wrong_kind(model, ModelKind::Categorizer))
}

fn forecaster_of(model: &TrainedModel) -> PipelineResult<&dyn ForecastModel> {
    model
        .as_forecaster()
        .ok_or_else(|| wrong_kind(model, ModelKind::Forecaster))
}

fn anomaly_of(model: &TrainedModel) -> PipelineResult<&dyn AnomalyModel> {
    model
        .as_anomaly()
        .ok_or_else(|| wrong_kind(model, ModelKind::Anomaly))
}
