//! Finance Pipeline - Main Entry Point
//!
//! Answers pipeline requests received over NATS and publishes anomaly alerts.
//! Requests are handled in parallel, bounded by the configured worker count.

use anyhow::{Context, Result};
use finance_pipeline::{
    config::{AppConfig, LoggingConfig},
    consumer::RequestConsumer,
    handler::RequestHandler,
    metrics::{MetricsReporter, PipelineMetrics},
    pipeline::FinancePipeline,
    producer::ReplyProducer,
};
use futures::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| {
        EnvFilter::try_new(format!("finance_pipeline={}", logging.level))
    })?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match logging.format.as_str() {
        "json" => builder.json().init(),
        _ => builder.init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = AppConfig::load()?;
    init_tracing(&config.logging)?;

    info!("Starting Finance Pipeline");
    info!(
        "Risk levels: low<{:.2}, medium<{:.2}, high>={:.2}",
        config.anomaly.risk_levels.medium,
        config.anomaly.risk_levels.high,
        config.anomaly.risk_levels.high
    );
    info!(
        timeout_ms = config.training.timeout_ms,
        max_horizon_days = config.forecaster.max_horizon_days,
        "Training limits"
    );

    // Initialize metrics
    let metrics = Arc::new(PipelineMetrics::new());

    let pipeline = Arc::new(FinancePipeline::in_memory(config.clone()));
    let handler = RequestHandler::new(pipeline, metrics.clone());

    // Connect to NATS
    let client = async_nats::connect(&config.nats.url)
        .await
        .with_context(|| format!("Failed to connect to NATS at {}", config.nats.url))?;
    info!("Connected to NATS at {}", config.nats.url);

    let consumer = RequestConsumer::new(client.clone(), &config.nats.request_subject);
    let producer = ReplyProducer::new(client.clone(), &config.nats.alert_subject);

    // Parallel processing configuration
    let num_workers = config.pipeline.workers;
    info!(
        "Starting request loop with {} parallel workers",
        num_workers
    );
    info!("Listening on subject: {}", consumer.subject());
    info!("Publishing alerts to: {}", producer.alert_subject());

    // Semaphore to limit concurrent processing
    let semaphore = Arc::new(Semaphore::new(num_workers));
    let handled_count = Arc::new(AtomicU64::new(0));

    // Start metrics reporter (logs a summary every 30 seconds)
    let metrics_clone = metrics.clone();
    tokio::spawn(async move {
        let reporter = MetricsReporter::new(metrics_clone, 30);
        reporter.start().await;
    });

    let mut subscription = consumer.subscribe().await?;

    while let Some(message) = subscription.next().await {
        // Acquire permit (limits concurrent tasks)
        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .context("Worker semaphore closed")?;

        let handler = handler.clone();
        let producer = producer.clone();
        let handled_count = handled_count.clone();

        tokio::spawn(async move {
            let outcome = handler.handle_payload(&message.payload).await;

            match message.reply {
                Some(reply_to) => {
                    if let Err(e) = producer.reply(reply_to, &outcome.reply).await {
                        error!(error = %e, "Failed to send reply");
                    }
                }
                None => warn!(
                    subject = %message.subject,
                    "Request without reply subject, reply dropped"
                ),
            }

            if let Some(alert) = outcome.alert {
                if let Err(e) = producer.publish_alert(&alert).await {
                    error!(
                        transaction_id = %alert.transaction_id,
                        error = %e,
                        "Failed to publish anomaly alert"
                    );
                } else {
                    info!(
                        user_id = %alert.user_id,
                        transaction_id = %alert.transaction_id,
                        anomaly_score = alert.anomaly_score,
                        "Anomaly alert published"
                    );
                }
            }

            let count = handled_count.fetch_add(1, Ordering::Relaxed) + 1;
            if count % 100 == 0 {
                info!(handled = count, "Processing milestone");
            }

            // Release permit when done
            drop(permit);
        });
    }

    // Print final summary
    info!("Pipeline shutting down...");
    metrics.print_summary();

    Ok(())
}
