//! MCP Tool Types
//!
//! This module defines all MCP tool parameter and response types.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use linkhub_core::{split_recipients, SessionEvent, SessionMetadata, SessionStatus};
use linkhub_session::{BulkResult, BulkStatus};

// =============================================================================
// Session Management Tools
// =============================================================================

/// Parameters for session_list
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionListParams {}

/// Response for session_list
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionListResponse {
    /// Every known session
    pub sessions: Vec<SessionMetadata>,

    /// Number of sessions
    pub count: usize,

    /// Number of sessions with a running engine
    pub live: usize,
}

/// Parameters for session_create
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionCreateParams {
    /// Session identifier (letters, digits, `_`, `.`, `-`)
    pub session_id: String,

    /// Display name
    #[serde(default)]
    pub name: Option<String>,

    /// Phone number; when set, link with a pairing code instead of a QR
    #[serde(default)]
    pub phone_number: Option<String>,
}

/// Response for session_create and session_reconnect
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionCreateResponse {
    /// Session identifier
    pub session_id: String,

    /// Status right after creation
    pub status: SessionStatus,

    /// Success message
    pub message: String,
}

/// Parameters for tools addressing one session
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionIdParams {
    /// Session identifier
    pub session_id: String,
}

/// Response for tools that only acknowledge
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionActionResponse {
    /// Session identifier
    pub session_id: String,

    /// Success message
    pub message: String,
}

// =============================================================================
// Messaging Tools
// =============================================================================

/// Parameters for message_send
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MessageSendParams {
    /// Sending session
    pub session_id: String,

    /// Recipient phone number; a leading 0 is replaced by the country code
    pub number: String,

    /// Message text
    pub message: String,
}

/// Response for message_send
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MessageSendResponse {
    /// Sending session
    pub session_id: String,

    /// Recipient as given
    pub number: String,

    /// Engine receipt of the sent message
    pub receipt: serde_json::Value,

    /// Success message
    pub message: String,
}

/// Bulk recipients as a list or as one string separated by commas or newlines
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum RecipientList {
    /// Explicit list
    List(Vec<String>),
    /// Separated text
    Text(String),
}

impl RecipientList {
    /// Trimmed, non-empty numbers in order.
    pub fn into_numbers(self) -> Vec<String> {
        match self {
            RecipientList::List(numbers) => numbers
                .into_iter()
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty())
                .collect(),
            RecipientList::Text(text) => split_recipients(&text),
        }
    }
}

/// Parameters for message_send_bulk
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MessageSendBulkParams {
    /// Sending session
    pub session_id: String,

    /// Recipients
    pub numbers: RecipientList,

    /// Message text
    pub message: String,
}

/// Response for message_send_bulk
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MessageSendBulkResponse {
    /// Sending session
    pub session_id: String,

    /// Number of recipients
    pub total: usize,

    /// Recipients the message was sent to
    pub sent: usize,

    /// Recipients not registered on the network
    pub not_found: usize,

    /// Recipients whose delivery failed
    pub failed: usize,

    /// Per-recipient results in input order
    pub results: Vec<BulkResult>,
}

impl MessageSendBulkResponse {
    /// Summarize per-recipient results.
    pub fn new(session_id: String, results: Vec<BulkResult>) -> Self {
        let count = |status: BulkStatus| results.iter().filter(|r| r.status == status).count();
        Self {
            session_id,
            total: results.len(),
            sent: count(BulkStatus::Sent),
            not_found: count(BulkStatus::NotFound),
            failed: count(BulkStatus::Error),
            results,
        }
    }
}

// =============================================================================
// Event Tools
// =============================================================================

/// Parameters for session_wait_for_event
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WaitForEventParams {
    /// Session to observe
    pub session_id: String,

    /// Only return this event (e.g. "session:qr", "session:connected")
    #[serde(default)]
    pub event: Option<String>,

    /// Timeout in milliseconds
    #[serde(default = "default_wait_timeout")]
    pub timeout_ms: u64,
}

fn default_wait_timeout() -> u64 {
    30000
}

/// Parameters for session_link
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionLinkParams {
    /// Session identifier (letters, digits, `_`, `.`, `-`)
    pub session_id: String,

    /// Display name
    #[serde(default)]
    pub name: Option<String>,

    /// Phone number; when set, link with a pairing code instead of a QR
    #[serde(default)]
    pub phone_number: Option<String>,

    /// Timeout in milliseconds
    #[serde(default = "default_wait_timeout")]
    pub timeout_ms: u64,
}

/// Response for session_wait_for_event and session_link
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WaitForEventResponse {
    /// Observed session
    pub session_id: String,

    /// Whether an event arrived before the timeout
    pub received: bool,

    /// Time waited in milliseconds
    pub waited_ms: u64,

    /// The event, when received
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<SessionEvent>,

    /// Result message
    pub message: String,
}
