//! # linkhub-core
//!
//! Core types for the linkhub session multiplexer.
//!
//! This crate contains all fundamental types with **no internal dependencies**
//! on other linkhub crates. It provides:
//!
//! - Session types (SessionId, SessionStatus, SessionMetadata)
//! - Disconnect reason classification
//! - Recipient number normalization
//! - Realtime event payloads
//! - Server configuration
//! - Error types
//!
//! ## Architecture
//!
//! This is Layer 0 in the architecture - all other crates depend on this one,
//! but this crate has no dependencies on other linkhub crates.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod disconnect;
pub mod error;
pub mod event;
pub mod recipient;
pub mod session;

// Re-export commonly used types
pub use config::{
    EngineSettings, LifecycleSettings, MessagingSettings, ServerConfig, ServerSettings,
    StorageSettings,
};
pub use disconnect::DisconnectReason;
pub use error::{Error, Result};
pub use event::{EngineUser, SessionEvent};
pub use recipient::{
    digits_only, format_pairing_code, normalize_number, split_recipients, to_address, user_number,
};
pub use session::{MetadataPatch, SessionId, SessionMetadata, SessionStatus};
