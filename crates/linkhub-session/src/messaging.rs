//! Single and bulk text delivery through a connected session.

use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use linkhub_core::{normalize_number, to_address, Error, Result, SessionId};
use linkhub_engine::{MessageContent, ProtocolEngine};

use crate::manager::SessionManager;

/// Outcome of one bulk recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum BulkStatus {
    /// Message accepted by the network
    Sent,
    /// Number is not registered on the network
    NotFound,
    /// Delivery failed
    Error,
}

/// Per-recipient result of a bulk send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BulkResult {
    /// Number as given by the caller
    pub number: String,
    /// Outcome
    pub status: BulkStatus,
    /// Failure description when status is error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SessionManager {
    /// Send a text message to one recipient.
    ///
    /// The number is normalized to the configured country code and must be
    /// registered on the network. Returns the engine's message receipt.
    pub async fn send_message(
        &self,
        session_id: &SessionId,
        number: &str,
        text: &str,
    ) -> Result<serde_json::Value> {
        let engine = self.inner.connected_engine(session_id)?;
        let receipt = self.deliver(&engine, number, text).await?;
        info!("Sent message from {}", session_id);
        Ok(receipt)
    }

    /// Send the same text to every recipient in order, pausing between
    /// consecutive recipients.
    ///
    /// Individual failures are reported per recipient and never abort the
    /// batch; only a session that is not connected fails the whole call.
    pub async fn send_bulk(
        &self,
        session_id: &SessionId,
        numbers: &[String],
        text: &str,
    ) -> Result<Vec<BulkResult>> {
        let engine = self.inner.connected_engine(session_id)?;
        let delay = self.inner.config.bulk_delay;

        let mut results = Vec::with_capacity(numbers.len());
        for (index, number) in numbers.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(delay).await;
            }

            let result = match self.deliver(&engine, number, text).await {
                Ok(_) => BulkResult {
                    number: number.clone(),
                    status: BulkStatus::Sent,
                    error: None,
                },
                Err(Error::RecipientNotFound(_)) | Err(Error::InvalidRecipient(_)) => {
                    debug!("Bulk recipient {:?} not on the network", number);
                    BulkResult {
                        number: number.clone(),
                        status: BulkStatus::NotFound,
                        error: None,
                    }
                }
                Err(e) => {
                    warn!("Bulk send to {:?} failed: {}", number, e);
                    BulkResult {
                        number: number.clone(),
                        status: BulkStatus::Error,
                        error: Some(e.to_string()),
                    }
                }
            };
            results.push(result);
        }

        let sent = results
            .iter()
            .filter(|r| r.status == BulkStatus::Sent)
            .count();
        info!(
            "Bulk send from {}: {}/{} delivered",
            session_id,
            sent,
            results.len()
        );
        Ok(results)
    }

    async fn deliver(
        &self,
        engine: &Arc<dyn ProtocolEngine>,
        number: &str,
        text: &str,
    ) -> Result<serde_json::Value> {
        let digits = normalize_number(number, &self.inner.config.country_code)
            .ok_or_else(|| Error::InvalidRecipient(number.to_string()))?;
        let address = to_address(&digits);

        let resolved = engine
            .lookup(&address)
            .await?
            .ok_or_else(|| Error::RecipientNotFound(number.to_string()))?;

        engine.send(&resolved, &MessageContent::text(text)).await
    }
}
