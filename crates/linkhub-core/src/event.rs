//! Realtime session events delivered to observers.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::SessionStatus;

/// Identity of the account an engine is logged in as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EngineUser {
    /// Network user id, e.g. `"620000:12@s.whatsapp.net"`
    pub id: String,
    /// Display name of the account
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Outbound event scoped to one session.
///
/// Serialized as `{"event": "<name>", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "event", content = "data")]
pub enum SessionEvent {
    /// Status changed
    #[serde(rename = "session:status")]
    Status {
        /// New status
        status: SessionStatus,
    },
    /// A QR challenge, rendered as an image data URL
    #[serde(rename = "session:qr")]
    Qr {
        /// `data:image/svg+xml;base64,...` payload
        qr: String,
    },
    /// Pairing code to type on the phone
    #[serde(rename = "session:pairing-code")]
    PairingCode {
        /// Code grouped as `XXXX-XXXX`
        code: String,
    },
    /// Connection opened
    #[serde(rename = "session:connected")]
    Connected {
        /// Account the engine logged in as
        user: Option<EngineUser>,
    },
    /// User-facing failure
    #[serde(rename = "session:error")]
    Error {
        /// Error message
        message: String,
    },
}

impl SessionEvent {
    /// Event name on the realtime channel.
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::Status { .. } => "session:status",
            SessionEvent::Qr { .. } => "session:qr",
            SessionEvent::PairingCode { .. } => "session:pairing-code",
            SessionEvent::Connected { .. } => "session:connected",
            SessionEvent::Error { .. } => "session:error",
        }
    }

    /// Shorthand for a status event.
    pub fn status(status: SessionStatus) -> Self {
        SessionEvent::Status { status }
    }

    /// Shorthand for an error event.
    pub fn error(message: impl Into<String>) -> Self {
        SessionEvent::Error {
            message: message.into(),
        }
    }
}
