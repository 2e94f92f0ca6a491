//! Demo Transaction Producer
//!
//! Generates a few months of sample transactions for a demo user, submits them
//! to the pipeline over NATS, trains every model kind and prints a forecast.

use chrono::{DateTime, Duration, Utc};
use finance_pipeline::types::message::{PipelineReply, PipelineRequest};
use finance_pipeline::types::model::ModelKind;
use finance_pipeline::types::transaction::NewTransaction;
use rand::Rng;
use tracing::{info, warn};

/// (typical spend, description, category); positive entries are income
const SAMPLE_TRANSACTIONS: &[(f64, &str, &str)] = &[
    (-45.67, "Whole Foods Market", "Food & Dining"),
    (-12.50, "Starbucks Coffee", "Food & Dining"),
    (-89.23, "Restaurant Dinner", "Food & Dining"),
    (-156.78, "Grocery Shopping Safeway", "Food & Dining"),
    (-23.45, "McDonald's Drive Thru", "Food & Dining"),
    (-67.89, "Shell Gas Station", "Transportation"),
    (-15.00, "Uber Ride Downtown", "Transportation"),
    (-8.50, "Metro Transit Pass", "Transportation"),
    (-25.00, "Airport Parking Fee", "Transportation"),
    (-234.56, "Amazon Online Purchase", "Shopping"),
    (-78.90, "Target Store", "Shopping"),
    (-145.67, "Clothing Store H&M", "Shopping"),
    (-56.78, "Best Buy Electronics", "Shopping"),
    (-1250.00, "Monthly Rent Payment", "Bills & Utilities"),
    (-89.45, "Electric Bill PG&E", "Bills & Utilities"),
    (-65.00, "Internet Service Comcast", "Bills & Utilities"),
    (-45.99, "Phone Bill Verizon", "Bills & Utilities"),
    (-34.56, "Water Utility Bill", "Bills & Utilities"),
    (-15.99, "Netflix Subscription", "Entertainment"),
    (-9.99, "Spotify Premium", "Entertainment"),
    (-45.00, "Movie Theater Tickets", "Entertainment"),
    (-67.89, "Concert Ticket", "Entertainment"),
    (-25.00, "Pharmacy CVS Prescription", "Healthcare"),
    (-150.00, "Doctor Visit Copay", "Healthcare"),
    (-89.99, "Dental Cleaning", "Healthcare"),
    (4500.00, "Salary Deposit", "Income"),
    (750.00, "Freelance Payment", "Income"),
    (125.00, "Investment Dividend", "Income"),
    (50.00, "Cashback Reward", "Income"),
];

const BATCH_SIZE: usize = 50;

/// Sample transaction generator
struct TransactionGenerator {
    rng: rand::rngs::ThreadRng,
    user_id: String,
}

impl TransactionGenerator {
    fn new(user_id: &str) -> Self {
        Self {
            rng: rand::thread_rng(),
            user_id: user_id.to_string(),
        }
    }

    /// One to five labeled transactions per day over the last `days` days, oldest first
    fn generate(&mut self, days: i64, now: DateTime<Utc>) -> Vec<NewTransaction> {
        let mut transactions = Vec::new();
        for days_back in (0..days).rev() {
            let midnight = (now - Duration::days(days_back))
                .date_naive()
                .and_hms_opt(0, 0, 0)
                .unwrap_or_default()
                .and_utc();

            for _ in 0..self.rng.gen_range(1..=5) {
                let (amount, description, category) =
                    SAMPLE_TRANSACTIONS[self.rng.gen_range(0..SAMPLE_TRANSACTIONS.len())];
                let varied = (amount * self.rng.gen_range(0.8..1.2) * 100.0).round() / 100.0;
                let timestamp = midnight
                    + Duration::hours(self.rng.gen_range(6..=22))
                    + Duration::minutes(self.rng.gen_range(0..60));

                transactions.push(
                    NewTransaction::new(self.user_id.clone(), timestamp, varied, description)
                        .with_category(category),
                );
            }
        }
        transactions.sort_by_key(|tx| tx.timestamp);
        transactions
    }
}

async fn send(
    client: &async_nats::Client,
    subject: &str,
    request: &PipelineRequest,
) -> anyhow::Result<PipelineReply> {
    let payload = serde_json::to_vec(request)?;
    let message = client.request(subject.to_string(), payload.into()).await?;
    Ok(serde_json::from_slice(&message.payload)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("demo_producer=info".parse()?),
        )
        .init();

    info!("Starting Demo Transaction Producer");

    // Parse arguments
    let args: Vec<String> = std::env::args().collect();
    let nats_url = args.get(1).map(|s| s.as_str()).unwrap_or("nats://localhost:4222");
    let subject = args.get(2).map(|s| s.as_str()).unwrap_or("finance.requests");
    let user_id = args.get(3).map(|s| s.as_str()).unwrap_or("demo_user");
    let days: i64 = args.get(4).and_then(|s| s.parse().ok()).unwrap_or(90);

    info!(
        nats_url = %nats_url,
        subject = %subject,
        user_id = %user_id,
        days,
        "Configuration loaded"
    );

    let transactions = TransactionGenerator::new(user_id).generate(days, Utc::now());
    info!("Generated {} sample transactions", transactions.len());

    // Connect to NATS
    let client = match async_nats::connect(nats_url).await {
        Ok(c) => {
            info!("Connected to NATS");
            c
        }
        Err(e) => {
            warn!(error = %e, "Failed to connect to NATS. Running in dry-run mode.");
            return run_dry_mode(&transactions);
        }
    };

    let batches = transactions.len().div_ceil(BATCH_SIZE);
    for (i, batch) in transactions.chunks(BATCH_SIZE).enumerate() {
        let request = PipelineRequest::SubmitBatch {
            transactions: batch.to_vec(),
        };
        match send(&client, subject, &request).await? {
            PipelineReply::Ok { .. } => info!("Uploaded batch {}/{}", i + 1, batches),
            PipelineReply::Error { kind, reason } => {
                warn!(kind = %kind, reason = %reason, "Batch rejected")
            }
        }
    }

    for kind in ModelKind::ALL {
        let request = PipelineRequest::Train {
            user_id: user_id.to_string(),
            kind,
        };
        match send(&client, subject, &request).await? {
            PipelineReply::Ok { data } => info!(kind = %kind, report = %data, "Model trained"),
            PipelineReply::Error { kind: error, reason } => {
                warn!(kind = %kind, error = %error, reason = %reason, "Training failed")
            }
        }
    }

    let request = PipelineRequest::PredictCategory {
        user_id: user_id.to_string(),
        description: "STARBUCKS #4521 COFFEE".to_string(),
    };
    if let PipelineReply::Ok { data } = send(&client, subject, &request).await? {
        info!(prediction = %data, "Sample categorization");
    }

    let request = PipelineRequest::Forecast {
        user_id: user_id.to_string(),
        horizon_days: 7,
    };
    match send(&client, subject, &request).await? {
        PipelineReply::Ok { data } => {
            info!("7 day forecast:\n{}", serde_json::to_string_pretty(&data)?)
        }
        PipelineReply::Error { kind, reason } => {
            warn!(kind = %kind, reason = %reason, "Forecast failed")
        }
    }

    info!("Demo complete");
    Ok(())
}

fn run_dry_mode(transactions: &[NewTransaction]) -> anyhow::Result<()> {
    info!("Running in dry-run mode (no NATS connection)");

    for (i, transaction) in transactions.iter().enumerate() {
        if i % 25 == 0 {
            let request = PipelineRequest::SubmitTransaction {
                transaction: transaction.clone(),
            };
            info!(
                "Sample request {}:\n{}",
                i + 1,
                serde_json::to_string_pretty(&request)?
            );
        }
    }

    Ok(())
}
