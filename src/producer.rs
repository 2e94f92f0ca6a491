//! NATS publishing for replies and anomaly alerts

use crate::types::alert::AnomalyAlert;
use crate::types::message::PipelineReply;
use anyhow::{Context, Result};
use async_nats::{Client, Subject};
use tracing::debug;

/// Publishes reply envelopes and alerts
#[derive(Clone)]
pub struct ReplyProducer {
    client: Client,
    alert_subject: String,
}

impl ReplyProducer {
    /// Create a new producer publishing alerts on `alert_subject`
    pub fn new(client: Client, alert_subject: &str) -> Self {
        Self {
            client,
            alert_subject: alert_subject.to_string(),
        }
    }

    /// Send a reply to the requester's inbox
    pub async fn reply(&self, reply_to: Subject, reply: &PipelineReply) -> Result<()> {
        let payload = serde_json::to_vec(reply).context("Failed to encode reply")?;
        self.client
            .publish(reply_to.clone(), payload.into())
            .await
            .with_context(|| format!("Failed to publish reply to {}", reply_to))?;

        debug!(reply_to = %reply_to, ok = reply.is_ok(), "Reply sent");
        Ok(())
    }

    /// Publish an anomaly alert
    pub async fn publish_alert(&self, alert: &AnomalyAlert) -> Result<()> {
        let payload = serde_json::to_vec(alert)?;

        self.client
            .publish(self.alert_subject.clone(), payload.into())
            .await?;

        debug!(
            alert_id = %alert.alert_id,
            transaction_id = %alert.transaction_id,
            user_id = %alert.user_id,
            anomaly_score = alert.anomaly_score,
            "Published anomaly alert"
        );

        Ok(())
    }

    pub fn alert_subject(&self) -> &str {
        &self.alert_subject
    }
}
