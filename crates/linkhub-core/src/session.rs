//! Session types for messaging session management.

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

lazy_static! {
    // Ids name an auth directory on disk, so no separators and no leading dot.
    static ref SESSION_ID_PATTERN: Regex = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]{0,63}$").unwrap();
}

/// Caller-assigned identifier of a messaging session.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Parse and validate a session identifier.
    ///
    /// Identifiers are 1-64 characters of `[A-Za-z0-9_.-]` starting with an
    /// alphanumeric character.
    pub fn parse(raw: impl AsRef<str>) -> Result<Self> {
        let raw = raw.as_ref().trim();
        if SESSION_ID_PATTERN.is_match(raw) {
            Ok(Self(raw.to_string()))
        } else {
            Err(Error::InvalidSessionId(raw.to_string()))
        }
    }

    /// Get the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Connection status of a messaging session.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Engine created, handshake in progress
    Connecting,
    /// Waiting for the user to enter a pairing code
    Pairing,
    /// A QR challenge is waiting to be scanned
    QrReady,
    /// Connection is open
    Connected,
    /// Connection is closed
    #[default]
    Disconnected,
}

impl SessionStatus {
    /// Get the wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Connecting => "connecting",
            SessionStatus::Pairing => "pairing",
            SessionStatus::QrReady => "qr_ready",
            SessionStatus::Connected => "connected",
            SessionStatus::Disconnected => "disconnected",
        }
    }

    /// Whether a session last seen in this status is recreated at startup.
    pub fn is_restorable(&self) -> bool {
        matches!(self, SessionStatus::Connecting | SessionStatus::Connected)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable descriptor of a session, one entry per session in the metadata file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    /// Session identifier
    pub session_id: SessionId,
    /// Display name (defaults to the identifier)
    #[serde(default)]
    pub name: String,
    /// Phone number of the linked account
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    /// Last known status
    #[serde(default)]
    pub status: SessionStatus,
    /// First creation time
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// Last time the connection opened
    #[serde(default)]
    pub last_connected: Option<DateTime<Utc>>,
}

impl SessionMetadata {
    /// Create a fresh descriptor named after its identifier.
    pub fn new(session_id: SessionId, created_at: DateTime<Utc>) -> Self {
        Self {
            name: session_id.to_string(),
            session_id,
            phone_number: None,
            status: SessionStatus::Connecting,
            created_at,
            last_connected: None,
        }
    }
}

/// Partial update merged into one metadata entry.
///
/// `None` fields leave the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataPatch {
    /// New display name
    pub name: Option<String>,
    /// New phone number
    pub phone_number: Option<String>,
    /// New status
    pub status: Option<SessionStatus>,
    /// New last-connected time
    pub last_connected: Option<DateTime<Utc>>,
}

impl MetadataPatch {
    /// Patch that only changes the status.
    pub fn status(status: SessionStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Patch that only changes the display name.
    pub fn name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Set the phone number.
    pub fn with_phone_number(mut self, phone_number: impl Into<String>) -> Self {
        self.phone_number = Some(phone_number.into());
        self
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the last-connected time.
    pub fn with_last_connected(mut self, at: DateTime<Utc>) -> Self {
        self.last_connected = Some(at);
        self
    }

    /// Merge this patch into an entry.
    pub fn apply_to(self, entry: &mut SessionMetadata) {
        if let Some(name) = self.name {
            entry.name = name;
        }
        if let Some(phone_number) = self.phone_number {
            entry.phone_number = Some(phone_number);
        }
        if let Some(status) = self.status {
            entry.status = status;
        }
        if let Some(at) = self.last_connected {
            entry.last_connected = Some(at);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_parse() {
        let id = SessionId::parse("sales-01").unwrap();
        assert_eq!(id.as_str(), "sales-01");
        assert_eq!(format!("{id}"), "sales-01");
    }

    #[test]
    fn test_session_id_trims_whitespace() {
        let id = SessionId::parse("  s1 ").unwrap();
        assert_eq!(id.as_str(), "s1");
    }

    #[test]
    fn test_session_id_rejects_paths() {
        for raw in ["", "../x", ".hidden", "a/b", "a\\b", "with space"] {
            assert!(
                matches!(SessionId::parse(raw), Err(Error::InvalidSessionId(_))),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_session_id_length_limit() {
        assert!(SessionId::parse("a".repeat(64)).is_ok());
        assert!(SessionId::parse("a".repeat(65)).is_err());
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&SessionStatus::QrReady).unwrap(),
            "\"qr_ready\""
        );
        let status: SessionStatus = serde_json::from_str("\"connected\"").unwrap();
        assert_eq!(status, SessionStatus::Connected);
        assert_eq!(SessionStatus::Pairing.to_string(), "pairing");
    }

    #[test]
    fn test_status_restorable() {
        assert!(SessionStatus::Connecting.is_restorable());
        assert!(SessionStatus::Connected.is_restorable());
        assert!(!SessionStatus::QrReady.is_restorable());
        assert!(!SessionStatus::Pairing.is_restorable());
        assert!(!SessionStatus::Disconnected.is_restorable());
    }

    #[test]
    fn test_metadata_defaults_name_to_id() {
        let id = SessionId::parse("s1").unwrap();
        let meta = SessionMetadata::new(id, Utc::now());
        assert_eq!(meta.name, "s1");
        assert_eq!(meta.status, SessionStatus::Connecting);
        assert_eq!(meta.last_connected, None);
    }

    #[test]
    fn test_metadata_camel_case_layout() {
        let meta = SessionMetadata::new(SessionId::parse("s1").unwrap(), Utc::now());
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["sessionId"], "s1");
        assert_eq!(json["status"], "connecting");
        assert!(json.get("createdAt").is_some());
        assert!(json["lastConnected"].is_null());
        assert!(json.get("phoneNumber").is_none());
    }

    #[test]
    fn test_metadata_tolerates_sparse_entries() {
        let meta: SessionMetadata = serde_json::from_str(r#"{"sessionId":"old"}"#).unwrap();
        assert_eq!(meta.session_id.as_str(), "old");
        assert_eq!(meta.status, SessionStatus::Disconnected);
    }

    #[test]
    fn test_patch_merge() {
        let mut meta = SessionMetadata::new(SessionId::parse("s1").unwrap(), Utc::now());
        let now = Utc::now();

        MetadataPatch::status(SessionStatus::Connected)
            .with_phone_number("620000")
            .with_last_connected(now)
            .apply_to(&mut meta);

        assert_eq!(meta.status, SessionStatus::Connected);
        assert_eq!(meta.phone_number.as_deref(), Some("620000"));
        assert_eq!(meta.last_connected, Some(now));
        assert_eq!(meta.name, "s1");

        MetadataPatch::name("Sales").apply_to(&mut meta);
        assert_eq!(meta.name, "Sales");
        assert_eq!(meta.status, SessionStatus::Connected);
    }
}
