//! Connection lifecycle driven by engine events.
//!
//! Each engine instance gets one event loop. Events are applied to the
//! registry record only while that instance is still the live one for its
//! session, so a replaced engine can never touch its successor.

use std::sync::{Arc, Weak};

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use linkhub_core::{
    format_pairing_code, user_number, DisconnectReason, EngineUser, MetadataPatch, SessionEvent,
    SessionId, SessionStatus,
};
use linkhub_engine::{Credentials, EngineEvent, ProtocolEngine};

use crate::manager::ManagerInner;
use crate::qr;
use crate::record::SessionRecord;

/// Message published when the network ends a session for good.
pub(crate) const SESSION_ENDED_MESSAGE: &str = "Session ended. Please re-link.";

impl ManagerInner {
    pub(crate) fn spawn_event_loop(
        self: &Arc<Self>,
        session_id: SessionId,
        generation: u64,
        mut events: mpsc::UnboundedReceiver<EngineEvent>,
    ) -> JoinHandle<()> {
        let inner = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                inner.handle_engine_event(&session_id, generation, event);
            }
            debug!(
                "Event stream of {} (generation {}) ended",
                session_id, generation
            );
        })
    }

    pub(crate) fn spawn_pairing(
        self: &Arc<Self>,
        session_id: SessionId,
        generation: u64,
        engine: Arc<dyn ProtocolEngine>,
        phone_number: String,
    ) -> JoinHandle<()> {
        let inner = Arc::downgrade(self);
        let delay = self.config.pairing_code_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let result = engine.request_pairing_code(&phone_number).await;

            let Some(inner) = inner.upgrade() else {
                return;
            };
            if !inner.is_current(&session_id, generation) {
                return;
            }

            match result {
                Ok(code) => {
                    info!("Pairing code issued for {}", session_id);
                    inner.broadcaster.publish(
                        &session_id,
                        SessionEvent::PairingCode {
                            code: format_pairing_code(&code),
                        },
                    );
                }
                Err(e) => {
                    warn!("Pairing code request for {} failed: {}", session_id, e);
                    inner.broadcaster.publish(
                        &session_id,
                        SessionEvent::error(format!("Failed to get pairing code: {}", e)),
                    );
                }
            }
        })
    }

    fn handle_engine_event(
        self: &Arc<Self>,
        session_id: &SessionId,
        generation: u64,
        event: EngineEvent,
    ) {
        match event {
            EngineEvent::Qr(payload) => self.on_qr(session_id, generation, payload),
            EngineEvent::Open { user } => self.on_open(session_id, generation, user),
            EngineEvent::Closed(reason) => self.on_closed(session_id, generation, reason),
            EngineEvent::CredentialsUpdated(credentials) => {
                self.on_credentials(session_id, generation, credentials)
            }
        }
    }

    /// Run `apply` on the record if `generation` is still its live engine.
    fn with_current<R>(
        &self,
        session_id: &SessionId,
        generation: u64,
        apply: impl FnOnce(&mut SessionRecord) -> R,
    ) -> Option<R> {
        let mut sessions = self.sessions.lock();
        match sessions.get_mut(session_id) {
            Some(record) if record.generation == generation => Some(apply(record)),
            _ => {
                trace!(
                    "Ignoring event from retired engine {} (generation {})",
                    session_id,
                    generation
                );
                None
            }
        }
    }

    fn on_qr(&self, session_id: &SessionId, generation: u64, payload: String) {
        let accepted = self.with_current(session_id, generation, |record| {
            if record.status == SessionStatus::Pairing {
                return false;
            }
            record.set_status(SessionStatus::QrReady);
            record.qr = Some(payload.clone());
            true
        });
        match accepted {
            Some(true) => {}
            Some(false) => {
                debug!("Ignoring QR for {} while pairing by code", session_id);
                return;
            }
            None => return,
        }

        self.metadata
            .update(session_id, MetadataPatch::status(SessionStatus::QrReady));
        match qr::render_data_url(&payload) {
            Ok(qr) => {
                self.broadcaster.publish(session_id, SessionEvent::Qr { qr });
            }
            Err(e) => warn!("Failed to render QR for {}: {}", session_id, e),
        }
        self.broadcaster
            .publish(session_id, SessionEvent::status(SessionStatus::QrReady));
    }

    fn on_open(&self, session_id: &SessionId, generation: u64, user: Option<EngineUser>) {
        let now = Utc::now();
        let phone_number = self.with_current(session_id, generation, |record| {
            record.set_status(SessionStatus::Connected);
            record.cancel_reconnect();
            record.stop_pairing();
            record.last_connected = Some(now);
            if let Some(user) = &user {
                record.phone_number = Some(user_number(&user.id).to_string());
            }
            record.user = user.clone();
            record.phone_number.clone()
        });
        let Some(phone_number) = phone_number else {
            return;
        };

        self.reconnect_attempts.lock().remove(session_id);

        let mut patch = MetadataPatch::status(SessionStatus::Connected).with_last_connected(now);
        if let Some(phone_number) = phone_number {
            patch = patch.with_phone_number(phone_number);
        }
        if let Some(name) = user.as_ref().and_then(|u| u.name.clone()) {
            patch = patch.with_name(name);
        }
        self.metadata.update(session_id, patch);

        info!("Session {} connected", session_id);
        self.broadcaster
            .publish(session_id, SessionEvent::Connected { user });
        self.broadcaster
            .publish(session_id, SessionEvent::status(SessionStatus::Connected));
    }

    fn on_closed(
        self: &Arc<Self>,
        session_id: &SessionId,
        generation: u64,
        reason: DisconnectReason,
    ) {
        let terminal = reason.is_terminal();
        let applied = self.with_current(session_id, generation, |record| {
            if record.ended {
                return false;
            }
            record.set_status(SessionStatus::Disconnected);
            record.cancel_reconnect();
            record.stop_pairing();
            record.ended = terminal;
            true
        });
        match applied {
            Some(true) => {}
            Some(false) => {
                debug!("Ignoring close ({}) of ended session {}", reason, session_id);
                return;
            }
            None => return,
        }

        self.metadata
            .update(session_id, MetadataPatch::status(SessionStatus::Disconnected));
        self.broadcaster
            .publish(session_id, SessionEvent::status(SessionStatus::Disconnected));

        if terminal {
            warn!("Session {} ended: {}", session_id, reason);
            self.broadcaster
                .publish(session_id, SessionEvent::error(SESSION_ENDED_MESSAGE));
            return;
        }

        info!("Session {} closed ({})", session_id, reason);
        self.schedule_reconnect(session_id, generation);
    }

    /// Count one reconnect cycle and schedule the next attempt on the record
    /// of `generation`, unless the attempt limit is reached.
    fn schedule_reconnect(self: &Arc<Self>, session_id: &SessionId, generation: u64) {
        let attempt = {
            let mut attempts = self.reconnect_attempts.lock();
            let count = attempts.entry(session_id.clone()).or_insert(0);
            *count += 1;
            *count
        };
        if let Some(max) = self.config.max_reconnect_attempts {
            if attempt > max {
                error!(
                    "Giving up on session {} after {} reconnect attempts",
                    session_id, max
                );
                self.broadcaster.publish(
                    session_id,
                    SessionEvent::error(format!(
                        "Reconnect limit reached after {} attempts",
                        max
                    )),
                );
                return;
            }
        }

        info!(
            "Reconnecting session {} in {:?} (attempt {})",
            session_id,
            self.scheduler.delay(),
            attempt
        );
        let inner = Arc::downgrade(self);
        let target = session_id.clone();
        let handle = self
            .scheduler
            .schedule(session_id, move |ticket| run_reconnect(inner, target, ticket));

        let orphan = {
            let mut sessions = self.sessions.lock();
            match sessions.get_mut(session_id) {
                Some(record) if record.generation == generation => {
                    record.pending_reconnect = Some(handle);
                    None
                }
                _ => Some(handle),
            }
        };
        if let Some(handle) = orphan {
            handle.cancel();
        }
    }

    fn on_credentials(&self, session_id: &SessionId, generation: u64, credentials: Credentials) {
        let Some(auth) = self.with_current(session_id, generation, |record| record.auth.clone())
        else {
            return;
        };
        match auth.save_credentials(&credentials) {
            Ok(()) => trace!("Saved credentials of {}", session_id),
            Err(e) => error!("Failed to save credentials of {}: {}", session_id, e),
        }
    }
}

async fn run_reconnect(inner: Weak<ManagerInner>, session_id: SessionId, ticket: u64) {
    let Some(inner) = inner.upgrade() else {
        return;
    };

    let slot = inner.slot(&session_id);
    let _guard = slot.lock().await;

    let claimed = inner
        .sessions
        .lock()
        .get_mut(&session_id)
        .and_then(|record| record.take_reconnect(ticket));
    if claimed.is_none() {
        debug!("Reconnect #{} of {} was superseded", ticket, session_id);
        return;
    }

    info!("Reconnecting session {}", session_id);
    if let Err(e) = inner.create_locked(&session_id, None).await {
        error!("Reconnect of {} failed: {}", session_id, e);
        inner.broadcaster.publish(
            &session_id,
            SessionEvent::error(format!("Reconnect failed: {}", e)),
        );

        // The retired record is kept as disconnected; retry on it.
        let generation = inner
            .sessions
            .lock()
            .get(&session_id)
            .map(|record| record.generation);
        if let Some(generation) = generation {
            inner.schedule_reconnect(&session_id, generation);
        }
    }
}
