//! Realtime channel for observers.
//!
//! Each connected client is an observer on the [`EventBroadcaster`]. Clients
//! send JSON frames shaped `{"event": "<name>", "data": ...}`:
//!
//! - `join:session` with a session id subscribes the client to that session
//! - `create:session` with `{sessionId, name?, method, phoneNumber?}` opens a
//!   session; `method: "pairing"` selects the pairing-code flow
//!
//! Failures of a client's own request are delivered to that client only as
//! `session:error`.

use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use linkhub_core::{SessionEvent, SessionId};

use crate::broadcast::{ObserverHandle, OutboundEvent};
use crate::manager::{NewSession, SessionManager};

/// Linking method selecting the pairing-code flow.
pub const PAIRING_METHOD: &str = "pairing";

/// Frame sent by a realtime client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum InboundFrame {
    /// Subscribe to a session's events
    #[serde(rename = "join:session")]
    JoinSession(String),
    /// Create a session
    #[serde(rename = "create:session")]
    CreateSession(CreateSessionRequest),
}

/// Payload of `create:session`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    /// Session identifier; requests without one are ignored
    #[serde(default)]
    pub session_id: Option<String>,
    /// Display name
    #[serde(default)]
    pub name: Option<String>,
    /// `"qr"` or `"pairing"`
    #[serde(default)]
    pub method: Option<String>,
    /// Phone number, used only with the pairing method
    #[serde(default)]
    pub phone_number: Option<String>,
}

impl CreateSessionRequest {
    /// Whether the pairing-code flow was requested.
    pub fn wants_pairing(&self) -> bool {
        self.method.as_deref() == Some(PAIRING_METHOD)
    }
}

/// Accepts realtime clients on top of a session manager.
#[derive(Clone)]
pub struct RealtimeChannel {
    manager: SessionManager,
}

impl RealtimeChannel {
    /// Create a channel bound to `manager`.
    pub fn new(manager: SessionManager) -> Self {
        Self { manager }
    }

    /// Register a new client.
    pub fn connect(&self) -> RealtimeClient {
        let (observer, events) = self.manager.broadcaster().observer();
        debug!("Realtime client {} connected", observer.id());
        RealtimeClient {
            manager: self.manager.clone(),
            observer,
            events,
        }
    }
}

/// One realtime client. Dropping it removes the client from every scope.
pub struct RealtimeClient {
    manager: SessionManager,
    observer: ObserverHandle,
    events: mpsc::UnboundedReceiver<OutboundEvent>,
}

impl RealtimeClient {
    /// Observer handle of this client.
    pub fn observer(&self) -> &ObserverHandle {
        &self.observer
    }

    /// Handle one inbound frame.
    pub async fn handle(&self, frame: InboundFrame) {
        match frame {
            InboundFrame::JoinSession(raw) => {
                self.join(&raw);
            }
            InboundFrame::CreateSession(request) => self.create(request).await,
        }
    }

    /// Subscribe to a session by id. Returns false for an invalid id.
    pub fn join(&self, raw: &str) -> bool {
        match SessionId::parse(raw) {
            Ok(session_id) => {
                self.manager
                    .broadcaster()
                    .subscribe(&self.observer, &session_id);
                debug!("Realtime client {} joined {}", self.observer.id(), session_id);
                true
            }
            Err(e) => {
                warn!("Realtime client {} sent bad join: {}", self.observer.id(), e);
                false
            }
        }
    }

    async fn create(&self, request: CreateSessionRequest) {
        let Some(raw) = request
            .session_id
            .as_deref()
            .filter(|raw| !raw.trim().is_empty())
        else {
            debug!("Ignoring create:session without a session id");
            return;
        };

        let session_id = match SessionId::parse(raw) {
            Ok(session_id) => session_id,
            Err(e) => {
                warn!("Realtime create:session rejected: {}", e);
                return;
            }
        };

        let mut new_session = NewSession::new(session_id.clone());
        new_session.name = request.name.clone();
        if request.wants_pairing() {
            new_session.phone_number = request.phone_number.clone();
        }

        match self.manager.open_session(new_session).await {
            Ok(info) => info!(
                "Realtime client {} created {} ({})",
                self.observer.id(),
                session_id,
                info.status
            ),
            Err(e) => {
                warn!("Realtime create of {} failed: {}", session_id, e);
                self.observer
                    .send(&session_id, SessionEvent::error(e.to_string()));
            }
        }
    }

    /// Wait for the next event delivered to this client.
    pub async fn next_event(&mut self) -> Option<OutboundEvent> {
        self.events.recv().await
    }

    /// Next already-delivered event, if any.
    pub fn try_next_event(&mut self) -> Option<OutboundEvent> {
        self.events.try_recv().ok()
    }
}

impl Drop for RealtimeClient {
    fn drop(&mut self) {
        self.manager
            .broadcaster()
            .unsubscribe_all(self.observer.id());
    }
}
