//! End-to-end flows through the pipeline facade and the request handler.

use chrono::{DateTime, Duration, TimeZone, Utc};
use finance_pipeline::config::AppConfig;
use finance_pipeline::handler::RequestHandler;
use finance_pipeline::metrics::PipelineMetrics;
use finance_pipeline::pipeline::FinancePipeline;
use finance_pipeline::types::message::{PipelineReply, PipelineRequest};
use finance_pipeline::types::model::ModelKind;
use finance_pipeline::types::prediction::ForecastBasis;
use finance_pipeline::types::transaction::NewTransaction;
use finance_pipeline::{ErrorKind, PipelineError};
use std::sync::Arc;

fn day(offset: i64, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, hour, 15, 0).unwrap() + Duration::days(offset)
}

/// Thirty days with a $50 grocery run every 7 days and everyday spending in between.
fn thirty_days(user: &str) -> Vec<NewTransaction> {
    let mut transactions = Vec::new();
    for offset in 0..30 {
        if offset % 7 == 0 {
            let description = format!("GROCERIES #{}", 1000 + offset * 37);
            transactions.push(
                NewTransaction::new(user, day(offset, 11), -50.0, description).with_category("Groceries"),
            );
        }
        transactions.push(
            NewTransaction::new(user, day(offset, 8), -4.5 - (offset % 3) as f64, "Starbucks Coffee")
                .with_category("Food & Dining"),
        );
        if offset % 3 == 0 {
            transactions.push(
                NewTransaction::new(user, day(offset, 18), -40.0, "Shell Gas Station")
                    .with_category("Transportation"),
            );
        }
        if offset == 5 {
            transactions.push(
                NewTransaction::new(user, day(offset, 20), -15.99, "Netflix Subscription")
                    .with_category("Entertainment"),
            );
        }
    }
    transactions.sort_by_key(|tx| tx.timestamp);
    transactions
}

#[tokio::test]
async fn test_recurring_groceries_are_recognized() {
    let pipeline = FinancePipeline::in_memory(AppConfig::default());
    pipeline.submit_batch(thirty_days("alice")).unwrap();

    let report = pipeline.train("alice", ModelKind::Categorizer).await.unwrap();
    assert_eq!(report.kind, ModelKind::Categorizer);
    assert_eq!(report.metrics["labels"], 4.0);

    let prediction = pipeline.predict_category("alice", "GROCERIES #4521").unwrap();
    assert_eq!(prediction.category, "Groceries");
    assert!(prediction.confidence > 0.5);
    assert_eq!(prediction.explanation[0].feature, "groceries");

    assert!(pipeline
        .last_trained_at("alice", ModelKind::Categorizer)
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_forecast_degrades_past_history_span() {
    let pipeline = FinancePipeline::in_memory(AppConfig::default());
    pipeline.submit_batch(thirty_days("alice")).unwrap();
    let report = pipeline.train("alice", ModelKind::Forecaster).await.unwrap();
    assert_eq!(report.samples, 30);

    let forecast = pipeline.forecast("alice", 45).unwrap();
    assert_eq!(forecast.horizon_days, 45);
    let coffee = &forecast.categories["Food & Dining"];
    assert_eq!(coffee.len(), 45);
    assert!(coffee[..30].iter().all(|p| p.basis == ForecastBasis::Seasonal));
    assert!(coffee[30..].iter().all(|p| p.basis == ForecastBasis::HistoricalMean));
    assert!(coffee.iter().all(|p| p.lower_bound >= 0.0));
    assert_eq!(forecast.daily_predictions.len(), 45);
    let summed: f64 = forecast
        .categories
        .values()
        .flatten()
        .map(|p| p.predicted_amount)
        .sum();
    assert!((forecast.total_predicted - summed).abs() < 1e-6);

    assert!(pipeline.forecast("alice", 0).unwrap().is_empty());
    assert!(matches!(
        pipeline.forecast("alice", 120),
        Err(PipelineError::Validation(_))
    ));
}

#[tokio::test]
async fn test_forecast_needs_two_weeks() {
    let pipeline = FinancePipeline::in_memory(AppConfig::default());
    let short: Vec<NewTransaction> = thirty_days("alice")
        .into_iter()
        .filter(|tx| tx.timestamp < day(10, 0))
        .collect();
    pipeline.submit_batch(short).unwrap();

    assert!(matches!(
        pipeline.train("alice", ModelKind::Forecaster).await,
        Err(PipelineError::InsufficientData(_))
    ));
}

#[tokio::test]
async fn test_anomaly_sweep_and_alerts() {
    let metrics = Arc::new(PipelineMetrics::new());
    let pipeline = Arc::new(FinancePipeline::in_memory(AppConfig::default()));
    let handler = RequestHandler::new(pipeline.clone(), metrics.clone());

    let mut history: Vec<NewTransaction> = (0..40)
        .map(|offset| {
            NewTransaction::new(
                "alice",
                day(offset, 9 + (offset % 8) as u32),
                -(20.0 + (offset % 5) as f64 * 4.0),
                "Corner Cafe Lunch",
            )
            .with_category("Food & Dining")
        })
        .collect();
    history.push(
        NewTransaction::new("alice", day(40, 3), -3000.0, "Luxury Watch Boutique")
            .with_category("Luxury"),
    );
    let stored = pipeline.submit_batch(history).unwrap();
    let outlier_id = stored[40].id;

    let outcome = handler
        .handle(PipelineRequest::Train {
            user_id: "alice".to_string(),
            kind: ModelKind::Anomaly,
        })
        .await;
    assert!(outcome.reply.is_ok());

    let sweep = pipeline.detect_anomalies("alice").unwrap();
    let flagged = &sweep.flagged;
    assert!(!flagged.is_empty());
    assert_eq!(flagged[0].transaction_id, outlier_id);
    assert!(flagged
        .windows(2)
        .all(|w| w[0].score.score >= w[1].score.score));
    assert!(flagged[0]
        .score
        .reasons
        .iter()
        .any(|r| r == "Amount significantly higher than usual spending"));
    // The outlier lands in the recent window and lifts recent daily spending
    assert!(sweep.insights.recent_avg_daily > sweep.insights.historical_avg_daily);
    assert!(sweep.insights.category_changes.contains_key("Food & Dining"));

    let outcome = handler
        .handle(PipelineRequest::ScoreTransaction {
            user_id: "alice".to_string(),
            transaction_id: outlier_id,
        })
        .await;
    let PipelineReply::Ok { data } = &outcome.reply else {
        panic!("scoring failed: {:?}", outcome.reply);
    };
    let high = data["value"]["level"] == "high";
    assert_eq!(outcome.alert.is_some(), high);
    if let Some(alert) = &outcome.alert {
        assert_eq!(alert.transaction_id, outlier_id);
        assert_eq!(alert.user_id, "alice");
    }

    // Once an anomaly model exists, submissions are scored on arrival
    let outcome = handler
        .handle(PipelineRequest::SubmitTransaction {
            transaction: NewTransaction::new("alice", day(41, 12), -24.0, "Corner Cafe Lunch"),
        })
        .await;
    let PipelineReply::Ok { data } = &outcome.reply else {
        panic!("submit failed: {:?}", outcome.reply);
    };
    assert!(data["anomaly"]["score"].is_number());
}

#[tokio::test]
async fn test_other_users_models_are_not_visible() {
    let metrics = Arc::new(PipelineMetrics::new());
    let pipeline = Arc::new(FinancePipeline::in_memory(AppConfig::default()));
    let handler = RequestHandler::new(pipeline.clone(), metrics);

    pipeline.submit_batch(thirty_days("alice")).unwrap();
    pipeline.train("alice", ModelKind::Categorizer).await.unwrap();

    let outcome = handler
        .handle(PipelineRequest::PredictCategory {
            user_id: "bob".to_string(),
            description: "GROCERIES #4521".to_string(),
        })
        .await;
    assert!(matches!(
        outcome.reply,
        PipelineReply::Error {
            kind: ErrorKind::UntrainedModel,
            ..
        }
    ));
}

#[test]
fn test_shipped_config_matches_defaults() {
    let shipped = AppConfig::load_from_path("config/config.toml").unwrap();
    let defaults = AppConfig::default();

    assert_eq!(shipped.nats.request_subject, defaults.nats.request_subject);
    assert_eq!(shipped.training.timeout_ms, defaults.training.timeout_ms);
    assert_eq!(
        shipped.training.max_history_days,
        defaults.training.max_history_days
    );
    assert_eq!(
        shipped.forecaster.max_horizon_days,
        defaults.forecaster.max_horizon_days
    );
    assert_eq!(shipped.anomaly.risk_levels, defaults.anomaly.risk_levels);
    assert_eq!(shipped.anomaly.seed, defaults.anomaly.seed);
}
