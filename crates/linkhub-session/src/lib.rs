//! # linkhub-session
//!
//! Session lifecycle management for linkhub.
//!
//! This crate provides:
//! - The session registry and its creation protocol
//! - The connection lifecycle state machine driven by engine events
//! - Cancellable fixed-delay reconnection
//! - The durable metadata mirror
//! - Session-scoped event broadcasting and the realtime channel
//! - Single and bulk message sending
//!
//! ## Architecture
//!
//! This is Layer 2 in the architecture - it depends on linkhub-core and
//! linkhub-engine to manage messaging session lifecycles.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod broadcast;
mod lifecycle;
pub mod manager;
pub mod messaging;
pub mod metadata;
pub mod qr;
pub mod realtime;
pub mod reconnect;
mod record;

// Re-export commonly used types
pub use broadcast::{EventBroadcaster, ObserverHandle, ObserverId, OutboundEvent};
pub use manager::{NewSession, SessionInfo, SessionManager, SessionManagerConfig};
pub use messaging::{BulkResult, BulkStatus};
pub use metadata::{MetadataMap, MetadataStore};
pub use realtime::{
    CreateSessionRequest, InboundFrame, RealtimeChannel, RealtimeClient, PAIRING_METHOD,
};
pub use reconnect::{ReconnectHandle, ReconnectScheduler};
