//! Request dispatch: decoded requests in, reply envelopes and alerts out.

use crate::error::{PipelineError, PipelineResult};
use crate::metrics::PipelineMetrics;
use crate::pipeline::FinancePipeline;
use crate::types::alert::{AnomalyAlert, RiskLevel};
use crate::types::message::{
    ForecastReply, PipelineReply, PipelineRequest, ScoredTransaction, SubmittedTransaction,
};
use crate::types::model::{ModelKey, ModelKind};
use crate::types::prediction::AnomalyScore;
use crate::types::transaction::Transaction;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Result of handling one request
#[derive(Debug)]
pub struct HandlerOutcome {
    pub reply: PipelineReply,
    /// Alert to publish, set when a transaction scored at high risk
    pub alert: Option<AnomalyAlert>,
}

impl HandlerOutcome {
    fn reply(reply: PipelineReply) -> Self {
        Self { reply, alert: None }
    }
}

/// Routes requests to the pipeline and records metrics.
#[derive(Clone)]
pub struct RequestHandler {
    pipeline: Arc<FinancePipeline>,
    metrics: Arc<PipelineMetrics>,
}

impl RequestHandler {
    pub fn new(pipeline: Arc<FinancePipeline>, metrics: Arc<PipelineMetrics>) -> Self {
        Self { pipeline, metrics }
    }

    /// Decode a raw payload and handle it. Malformed payloads get a validation error reply.
    pub async fn handle_payload(&self, payload: &[u8]) -> HandlerOutcome {
        match serde_json::from_slice::<PipelineRequest>(payload) {
            Ok(request) => self.handle(request).await,
            Err(e) => {
                warn!(error = %e, "Failed to deserialize request");
                let error = PipelineError::Validation(format!("malformed request: {}", e));
                self.metrics.record_error(error.kind());
                HandlerOutcome::reply(PipelineReply::error(&error))
            }
        }
    }

    pub async fn handle(&self, request: PipelineRequest) -> HandlerOutcome {
        let started = Instant::now();
        let op = request.op();

        let outcome = match self.dispatch(request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                debug!(op, error = %e, "Request failed");
                self.metrics.record_error(e.kind());
                HandlerOutcome::reply(PipelineReply::error(&e))
            }
        };

        self.metrics.record_request(started.elapsed());
        outcome
    }

    async fn dispatch(&self, request: PipelineRequest) -> PipelineResult<HandlerOutcome> {
        let pipeline = &self.pipeline;
        match request {
            PipelineRequest::SubmitTransaction { transaction } => {
                let tx = pipeline.submit(transaction)?;
                self.metrics.record_submitted(1);
                // Already stored: a scoring failure does not fail the submit
                let (anomaly, alert) = match self.score_if_trained(&tx) {
                    Ok(scored) => scored,
                    Err(e) => {
                        warn!(
                            user_id = %tx.user_id,
                            transaction_id = %tx.id,
                            error = %e,
                            "Scoring a submitted transaction failed"
                        );
                        self.metrics.record_error(e.kind());
                        (None, None)
                    }
                };
                Ok(HandlerOutcome {
                    reply: PipelineReply::ok(&SubmittedTransaction {
                        transaction: tx,
                        anomaly,
                    }),
                    alert,
                })
            }
            PipelineRequest::SubmitBatch { transactions } => {
                let stored = pipeline.submit_batch(transactions)?;
                self.metrics.record_submitted(stored.len());
                Ok(HandlerOutcome::reply(PipelineReply::ok(&stored)))
            }
            PipelineRequest::CorrectCategory {
                user_id,
                transaction_id,
                category,
            } => {
                let tx = pipeline.correct_category(&user_id, transaction_id, &category)?;
                Ok(HandlerOutcome::reply(PipelineReply::ok(&tx)))
            }
            PipelineRequest::Train { user_id, kind } => {
                let started = Instant::now();
                match pipeline.train(&user_id, kind).await {
                    Ok(report) => {
                        self.metrics.record_training(kind, started.elapsed());
                        Ok(HandlerOutcome::reply(PipelineReply::ok(&report)))
                    }
                    Err(e) => {
                        self.metrics.record_training_failure(kind);
                        Err(e)
                    }
                }
            }
            PipelineRequest::PredictCategory {
                user_id,
                description,
            } => {
                let prediction = pipeline.predict_category(&user_id, &description)?;
                self.metrics.record_prediction();
                Ok(HandlerOutcome::reply(PipelineReply::ok(
                    &prediction.into_result(&description),
                )))
            }
            PipelineRequest::Forecast {
                user_id,
                horizon_days,
            } => {
                let forecast = pipeline.forecast(&user_id, horizon_days)?;
                self.metrics.record_prediction();
                Ok(HandlerOutcome::reply(PipelineReply::ok(&ForecastReply::from(
                    forecast,
                ))))
            }
            PipelineRequest::ScoreTransaction {
                user_id,
                transaction_id,
            } => {
                let (tx, score) = pipeline.score_transaction(&user_id, transaction_id)?;
                let alert = self.observe_score(&tx, &score);
                let reasons = score.reasons.clone();
                Ok(HandlerOutcome {
                    reply: PipelineReply::ok(&ScoredTransaction {
                        prediction: score.into_result(tx.id),
                        reasons,
                    }),
                    alert,
                })
            }
            PipelineRequest::DetectAnomalies { user_id } => {
                let sweep = pipeline.detect_anomalies(&user_id)?;
                for item in &sweep.flagged {
                    self.metrics.record_score(item.score.score, item.score.risk_level);
                }
                Ok(HandlerOutcome::reply(PipelineReply::ok(&sweep)))
            }
            PipelineRequest::TrainedAt { user_id, kind } => {
                let trained_at = pipeline.last_trained_at(&user_id, kind)?;
                Ok(HandlerOutcome::reply(PipelineReply::ok(&json!({
                    "user_id": user_id,
                    "kind": kind,
                    "trained_at": trained_at,
                }))))
            }
            PipelineRequest::Invalidate { user_id, kind } => {
                let removed = pipeline.invalidate(&user_id, kind)?;
                Ok(HandlerOutcome::reply(PipelineReply::ok(&json!({
                    "removed": removed,
                }))))
            }
            PipelineRequest::CategoryBreakdown { user_id, range } => {
                let breakdown = pipeline.category_breakdown(&user_id, &range)?;
                Ok(HandlerOutcome::reply(PipelineReply::ok(&breakdown)))
            }
        }
    }

    /// Score a freshly stored transaction when the user has an anomaly model.
    fn score_if_trained(
        &self,
        tx: &Transaction,
    ) -> PipelineResult<(Option<AnomalyScore>, Option<AnomalyAlert>)> {
        let key = ModelKey::new(tx.user_id.clone(), ModelKind::Anomaly);
        if self.pipeline.registry().get(&key)?.is_none() {
            return Ok((None, None));
        }
        match self.pipeline.score_transaction(&tx.user_id, tx.id) {
            Ok((_, score)) => {
                let alert = self.observe_score(tx, &score);
                Ok((Some(score), alert))
            }
            // Invalidated between the check and the score
            Err(PipelineError::UntrainedModel { .. }) => Ok((None, None)),
            Err(e) => Err(e),
        }
    }

    fn observe_score(&self, tx: &Transaction, score: &AnomalyScore) -> Option<AnomalyAlert> {
        self.metrics.record_score(score.score, score.risk_level);
        if score.risk_level != RiskLevel::High {
            return None;
        }
        self.metrics.record_alert();
        Some(
            AnomalyAlert::new(tx, score.score, score.risk_level)
                .with_explanation(score.explanation.clone(), score.reasons.clone()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::error::ErrorKind;
    use crate::store::{InMemoryTransactionStore, TransactionStore};
    use crate::types::transaction::{CategorySource, DateRange, NewTransaction};
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::atomic::{AtomicBool, Ordering};
    use uuid::Uuid;

    fn handler() -> RequestHandler {
        RequestHandler::new(
            Arc::new(FinancePipeline::in_memory(AppConfig::default())),
            Arc::new(PipelineMetrics::new()),
        )
    }

    #[tokio::test]
    async fn test_malformed_payload() {
        let handler = handler();
        let outcome = handler.handle_payload(b"{not json").await;
        match outcome.reply {
            PipelineReply::Error { kind, .. } => assert_eq!(kind, ErrorKind::Validation),
            other => panic!("unexpected reply {:?}", other),
        }
        assert!(outcome.alert.is_none());
    }

    #[tokio::test]
    async fn test_submit_and_breakdown() {
        let handler = handler();
        let payload = br#"{
            "op": "submit_transaction",
            "transaction": {
                "user_id": "demo_user",
                "timestamp": "2026-03-02T09:30:00Z",
                "amount": -4.5,
                "description": "Starbucks Coffee",
                "category": "Food & Dining"
            }
        }"#;
        let outcome = handler.handle_payload(payload).await;
        let PipelineReply::Ok { data } = outcome.reply else {
            panic!("submit failed");
        };
        assert_eq!(data["category"], "Food & Dining");
        assert!(data["id"].is_string());
        assert!(data.get("anomaly").is_none());

        let outcome = handler
            .handle_payload(br#"{"op":"category_breakdown","user_id":"demo_user"}"#)
            .await;
        let PipelineReply::Ok { data } = outcome.reply else {
            panic!("breakdown failed");
        };
        assert_eq!(data["Food & Dining"]["count"], 1);
        assert_eq!(handler.metrics.requests_handled.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_errors_carry_kind_and_reason() {
        let handler = handler();
        let outcome = handler
            .handle(PipelineRequest::Forecast {
                user_id: "demo_user".to_string(),
                horizon_days: 7,
            })
            .await;
        assert_eq!(
            outcome.reply,
            PipelineReply::Error {
                kind: ErrorKind::UntrainedModel,
                reason: "No trained forecaster model for user demo_user".to_string(),
            }
        );

        let outcome = handler
            .handle(PipelineRequest::Train {
                user_id: "demo_user".to_string(),
                kind: ModelKind::Anomaly,
            })
            .await;
        assert!(matches!(
            outcome.reply,
            PipelineReply::Error {
                kind: ErrorKind::InsufficientData,
                ..
            }
        ));
        assert_eq!(
            handler.metrics.get_training_stats()[&ModelKind::Anomaly].failed,
            1
        );
    }

    /// In-memory store whose listing can be made to fail after setup
    struct FlakyStore {
        inner: InMemoryTransactionStore,
        fail_list: AtomicBool,
    }

    impl TransactionStore for FlakyStore {
        fn insert(&self, transaction: Transaction) -> PipelineResult<()> {
            self.inner.insert(transaction)
        }

        fn insert_batch(&self, transactions: Vec<Transaction>) -> PipelineResult<()> {
            self.inner.insert_batch(transactions)
        }

        fn get(&self, user_id: &str, id: Uuid) -> PipelineResult<Option<Transaction>> {
            self.inner.get(user_id, id)
        }

        fn list(&self, user_id: &str, range: &DateRange) -> PipelineResult<Vec<Transaction>> {
            if self.fail_list.load(Ordering::SeqCst) {
                return Err(PipelineError::Internal("store unavailable".to_string()));
            }
            self.inner.list(user_id, range)
        }

        fn update_category(
            &self,
            user_id: &str,
            id: Uuid,
            category: String,
            source: CategorySource,
            confidence: Option<f64>,
        ) -> PipelineResult<Option<Transaction>> {
            self.inner
                .update_category(user_id, id, category, source, confidence)
        }

        fn count(&self, user_id: &str) -> PipelineResult<usize> {
            self.inner.count(user_id)
        }
    }

    #[tokio::test]
    async fn test_stored_submit_survives_scoring_failure() {
        let store = Arc::new(FlakyStore {
            inner: InMemoryTransactionStore::new(),
            fail_list: AtomicBool::new(false),
        });
        let shared: Arc<dyn TransactionStore> = store.clone();
        let handler = RequestHandler::new(
            Arc::new(FinancePipeline::new(AppConfig::default(), shared)),
            Arc::new(PipelineMetrics::new()),
        );

        let start = Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap();
        let history = (0..30)
            .map(|day| {
                NewTransaction::new("demo_user", start + Duration::days(day), -20.0 - day as f64, "Lunch")
                    .with_category("Dining")
            })
            .collect();
        handler.pipeline.submit_batch(history).unwrap();
        handler
            .pipeline
            .train("demo_user", ModelKind::Anomaly)
            .await
            .unwrap();

        store.fail_list.store(true, Ordering::SeqCst);
        let outcome = handler
            .handle(PipelineRequest::SubmitTransaction {
                transaction: NewTransaction::new("demo_user", start + Duration::days(30), -25.0, "Lunch"),
            })
            .await;

        let PipelineReply::Ok { data } = outcome.reply else {
            panic!("stored transaction reported as failed: {:?}", outcome.reply);
        };
        assert!(data.get("anomaly").is_none());
        assert!(outcome.alert.is_none());
        assert_eq!(store.count("demo_user").unwrap(), 31);
    }

    #[tokio::test]
    async fn test_trained_at_before_training() {
        let handler = handler();
        let outcome = handler
            .handle(PipelineRequest::TrainedAt {
                user_id: "demo_user".to_string(),
                kind: ModelKind::Categorizer,
            })
            .await;
        let PipelineReply::Ok { data } = outcome.reply else {
            panic!("trained_at failed");
        };
        assert!(data["trained_at"].is_null());
        assert_eq!(data["kind"], "categorizer");
    }
}
