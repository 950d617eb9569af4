//! # linkhub-engine
//!
//! Protocol engine adapter for linkhub.
//!
//! This crate provides:
//! - The capability interface every protocol engine implements
//! - Per-session durable auth storage
//! - A subprocess bridge engine speaking newline-delimited JSON
//! - A scripted engine for tests
//!
//! ## Architecture
//!
//! This is Layer 1 in the architecture - it depends on linkhub-core and is
//! consumed by the session lifecycle crate.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapter;
pub mod auth;
pub mod bridge;
pub mod testing;

// Re-export commonly used types
pub use adapter::{EngineConnection, EngineEvent, EngineFactory, MessageContent, ProtocolEngine};
pub use auth::{AuthRoot, AuthStorage, Credentials};
pub use bridge::{BridgeEngine, BridgeEngineFactory};
