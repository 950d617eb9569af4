//! In-memory state of one live session.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use linkhub_core::{EngineUser, SessionId, SessionStatus};
use linkhub_engine::{AuthStorage, ProtocolEngine};

use crate::manager::SessionInfo;
use crate::reconnect::ReconnectHandle;

/// Registry entry owning one engine instance and the tasks attached to it.
#[derive(Debug)]
pub(crate) struct SessionRecord {
    pub session_id: SessionId,
    /// Distinguishes this engine instance from earlier ones under the same id.
    pub generation: u64,
    pub status: SessionStatus,
    pub engine: Arc<dyn ProtocolEngine>,
    pub auth: AuthStorage,
    pub qr: Option<String>,
    pub phone_number: Option<String>,
    pub user: Option<EngineUser>,
    pub created_at: DateTime<Utc>,
    pub last_connected: Option<DateTime<Utc>>,
    pub pending_reconnect: Option<ReconnectHandle>,
    /// Ended for good by a terminal close or an explicit disconnect; later
    /// closes from this engine are ignored.
    pub ended: bool,
    pub pairing_task: Option<JoinHandle<()>>,
    pub event_task: Option<JoinHandle<()>>,
}

impl SessionRecord {
    pub fn new(
        session_id: SessionId,
        generation: u64,
        engine: Arc<dyn ProtocolEngine>,
        auth: AuthStorage,
    ) -> Self {
        Self {
            session_id,
            generation,
            status: SessionStatus::Connecting,
            engine,
            auth,
            qr: None,
            phone_number: None,
            user: None,
            created_at: Utc::now(),
            last_connected: None,
            pending_reconnect: None,
            ended: false,
            pairing_task: None,
            event_task: None,
        }
    }

    /// Move to `status`. The QR payload only survives while a QR is shown.
    pub fn set_status(&mut self, status: SessionStatus) {
        self.status = status;
        if status != SessionStatus::QrReady {
            self.qr = None;
        }
    }

    /// Cancel the pending reconnect, if any. Returns whether one existed.
    pub fn cancel_reconnect(&mut self) -> bool {
        match self.pending_reconnect.take() {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Take the pending reconnect if it is the attempt identified by `ticket`.
    pub fn take_reconnect(&mut self, ticket: u64) -> Option<ReconnectHandle> {
        if self.pending_reconnect.as_ref().map(|h| h.ticket()) == Some(ticket) {
            self.pending_reconnect.take()
        } else {
            None
        }
    }

    pub fn stop_pairing(&mut self) {
        if let Some(task) = self.pairing_task.take() {
            task.abort();
        }
    }

    /// Stop everything attached to this record without touching the engine.
    pub fn stop_tasks(&mut self) {
        self.cancel_reconnect();
        self.stop_pairing();
        if let Some(task) = self.event_task.take() {
            task.abort();
        }
    }

    /// Stop all tasks and release the engine without logging out, keeping
    /// the record in place.
    pub fn retire(&mut self) {
        self.stop_tasks();
        self.engine.close();
    }

    /// Retire the record and drop it.
    pub fn discard(mut self) {
        self.retire();
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.session_id.clone(),
            status: self.status,
            qr: self.qr.clone(),
            phone_number: self.phone_number.clone(),
            user: self.user.clone(),
            created_at: self.created_at,
            last_connected: self.last_connected,
            reconnect_pending: self.pending_reconnect.is_some(),
        }
    }
}
