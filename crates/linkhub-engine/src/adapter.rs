//! The capability interface between the session lifecycle and a protocol engine.
//!
//! The lifecycle never looks inside an engine. It relies on the signals of
//! [`EngineEvent`] and the operations of [`ProtocolEngine`], which lets the
//! production bridge and the scripted test engine be swapped freely.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use linkhub_core::{DisconnectReason, EngineUser, Result, SessionId};

use crate::auth::{AuthStorage, Credentials};

/// Signal emitted by an engine, delivered in emission order.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A new QR challenge to show to the user
    Qr(String),
    /// The connection opened
    Open {
        /// Account the engine logged in as
        user: Option<EngineUser>,
    },
    /// The connection closed
    Closed(DisconnectReason),
    /// Credentials changed and should be persisted as-is
    CredentialsUpdated(Credentials),
}

/// Message body handed to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    /// Plain text message
    Text {
        /// Message text
        text: String,
    },
}

impl MessageContent {
    /// Create a text message.
    pub fn text(text: impl Into<String>) -> Self {
        MessageContent::Text { text: text.into() }
    }
}

/// One live connection instance of a protocol engine.
#[async_trait]
pub trait ProtocolEngine: Send + Sync + std::fmt::Debug {
    /// Whether the credentials this engine runs with are already linked.
    fn is_registered(&self) -> bool;

    /// Ask the network for a pairing code for `phone_number` (digits only).
    async fn request_pairing_code(&self, phone_number: &str) -> Result<String>;

    /// Unlink this device from the account.
    async fn logout(&self) -> Result<()>;

    /// Drop the connection without unlinking. Best-effort, never fails.
    fn close(&self);

    /// Resolve an address to its canonical form, `None` if unregistered.
    async fn lookup(&self, address: &str) -> Result<Option<String>>;

    /// Send a message to a resolved address.
    async fn send(&self, address: &str, content: &MessageContent) -> Result<serde_json::Value>;
}

/// Engine handle plus its event stream.
#[derive(Debug)]
pub struct EngineConnection {
    /// The engine instance
    pub engine: Arc<dyn ProtocolEngine>,
    /// Events emitted by the engine
    pub events: mpsc::UnboundedReceiver<EngineEvent>,
}

/// Creates engine instances bound to a session's auth storage.
#[async_trait]
pub trait EngineFactory: Send + Sync {
    /// Start a new engine and begin its handshake.
    async fn connect(
        &self,
        session_id: &SessionId,
        auth: &AuthStorage,
        credentials: Credentials,
    ) -> Result<EngineConnection>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_content_wire_shape() {
        let json = serde_json::to_value(MessageContent::text("hi")).unwrap();
        assert_eq!(json, serde_json::json!({"type": "text", "text": "hi"}));
    }
}
