//! Personal Finance Pipeline Library
//!
//! Transaction feature extraction and per-user model training and inference:
//! a Naive Bayes categorizer, a weekday-seasonal spending forecaster and an
//! isolation forest anomaly scorer, served over NATS request/reply.

pub mod config;
pub mod consumer;
pub mod error;
pub mod feature_extractor;
pub mod handler;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod producer;
pub mod store;
pub mod types;

pub use config::AppConfig;
pub use consumer::RequestConsumer;
pub use error::{ErrorKind, PipelineError, PipelineResult};
pub use feature_extractor::FeatureExtractor;
pub use handler::RequestHandler;
pub use pipeline::FinancePipeline;
pub use producer::ReplyProducer;
pub use store::{InMemoryTransactionStore, TransactionStore};
pub use types::{alert::AnomalyAlert, transaction::Transaction};
