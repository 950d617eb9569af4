//! Disconnect reasons reported by protocol engines.
//!
//! Engines report a numeric status code when a connection closes. The code
//! decides whether the session is reconnected automatically (recoverable) or
//! left disconnected until the user links it again (terminal).

use serde::{Deserialize, Serialize};

/// Reason a connection closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u16", into = "u16")]
pub enum DisconnectReason {
    /// Stream closed by the server (428)
    ConnectionClosed,
    /// Network loss or keepalive timeout (408)
    ConnectionLost,
    /// Another connection took over this session (440)
    ConnectionReplaced,
    /// Server asked the client to restart the stream (515)
    RestartRequired,
    /// Account logged out from the device list (401)
    LoggedOut,
    /// Stored credentials are corrupt or incompatible (500)
    BadSession,
    /// Any other code
    Other(u16),
}

impl DisconnectReason {
    /// Map a status code to a reason.
    pub fn from_code(code: u16) -> Self {
        match code {
            428 => DisconnectReason::ConnectionClosed,
            408 => DisconnectReason::ConnectionLost,
            440 => DisconnectReason::ConnectionReplaced,
            515 => DisconnectReason::RestartRequired,
            401 => DisconnectReason::LoggedOut,
            500 => DisconnectReason::BadSession,
            other => DisconnectReason::Other(other),
        }
    }

    /// Get the status code of this reason.
    pub fn code(&self) -> u16 {
        match self {
            DisconnectReason::ConnectionClosed => 428,
            DisconnectReason::ConnectionLost => 408,
            DisconnectReason::ConnectionReplaced => 440,
            DisconnectReason::RestartRequired => 515,
            DisconnectReason::LoggedOut => 401,
            DisconnectReason::BadSession => 500,
            DisconnectReason::Other(code) => *code,
        }
    }

    /// Terminal reasons halt automatic reconnection.
    ///
    /// Only an explicit logout and unusable credentials are terminal; every
    /// other code, including unknown ones, is retried.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DisconnectReason::LoggedOut | DisconnectReason::BadSession
        )
    }
}

impl From<u16> for DisconnectReason {
    fn from(code: u16) -> Self {
        Self::from_code(code)
    }
}

impl From<DisconnectReason> for u16 {
    fn from(reason: DisconnectReason) -> Self {
        reason.code()
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectReason::Other(code) => write!(f, "code {code}"),
            known => write!(f, "{:?} ({})", known, known.code()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_codes() {
        assert_eq!(
            DisconnectReason::from_code(428),
            DisconnectReason::ConnectionClosed
        );
        assert_eq!(
            DisconnectReason::from_code(401),
            DisconnectReason::LoggedOut
        );
        assert_eq!(
            DisconnectReason::from_code(999),
            DisconnectReason::Other(999)
        );
    }

    #[test]
    fn test_terminal_classification() {
        assert!(DisconnectReason::LoggedOut.is_terminal());
        assert!(DisconnectReason::BadSession.is_terminal());

        assert!(!DisconnectReason::ConnectionClosed.is_terminal());
        assert!(!DisconnectReason::ConnectionLost.is_terminal());
        assert!(!DisconnectReason::ConnectionReplaced.is_terminal());
        assert!(!DisconnectReason::RestartRequired.is_terminal());
        assert!(!DisconnectReason::Other(411).is_terminal());
    }

    #[test]
    fn test_serde_as_code() {
        let json = serde_json::to_string(&DisconnectReason::RestartRequired).unwrap();
        assert_eq!(json, "515");

        let reason: DisconnectReason = serde_json::from_str("440").unwrap();
        assert_eq!(reason, DisconnectReason::ConnectionReplaced);
    }

    #[test]
    fn test_display() {
        assert_eq!(DisconnectReason::LoggedOut.to_string(), "LoggedOut (401)");
        assert_eq!(DisconnectReason::Other(403).to_string(), "code 403");
    }
}
