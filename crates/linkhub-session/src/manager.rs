//! Session manager for coordinating multiple messaging sessions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use schemars::JsonSchema;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use linkhub_core::{
    digits_only, EngineUser, Error, MetadataPatch, Result, ServerConfig, SessionEvent, SessionId,
    SessionMetadata, SessionStatus,
};
use linkhub_engine::{AuthRoot, AuthStorage, EngineConnection, EngineFactory, ProtocolEngine};

use crate::broadcast::EventBroadcaster;
use crate::metadata::MetadataStore;
use crate::reconnect::ReconnectScheduler;
use crate::record::SessionRecord;

/// Configuration for session manager.
#[derive(Debug, Clone)]
pub struct SessionManagerConfig {
    /// Maximum number of sessions known to the metadata store
    pub max_sessions: usize,

    /// Delay before reconnecting after a recoverable close
    pub reconnect_delay: Duration,

    /// Delay between engine creation and the pairing-code request
    pub pairing_code_delay: Duration,

    /// Consecutive reconnect attempts allowed before giving up (unbounded if None)
    pub max_reconnect_attempts: Option<u32>,

    /// Country code replacing a leading trunk zero in recipient numbers
    pub country_code: String,

    /// Pause between consecutive recipients of a bulk send
    pub bulk_delay: Duration,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            max_sessions: 10,
            reconnect_delay: Duration::from_millis(3000),
            pairing_code_delay: Duration::from_millis(3000),
            max_reconnect_attempts: None,
            country_code: "62".to_string(),
            bulk_delay: Duration::from_millis(500),
        }
    }
}

impl SessionManagerConfig {
    /// Derive manager settings from the server configuration.
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            max_sessions: config.server.max_sessions,
            reconnect_delay: config.lifecycle.reconnect_delay(),
            pairing_code_delay: config.lifecycle.pairing_code_delay(),
            max_reconnect_attempts: config.lifecycle.max_reconnect_attempts,
            country_code: config.messaging.country_code.clone(),
            bulk_delay: config.messaging.bulk_delay(),
        }
    }
}

/// Request to open a named session from an outer surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSession {
    /// Session identifier
    pub session_id: SessionId,
    /// Display name stored after creation
    pub name: Option<String>,
    /// Phone number selecting the pairing-code flow
    pub phone_number: Option<String>,
}

impl NewSession {
    /// Request for `session_id` with no name and the QR flow.
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            name: None,
            phone_number: None,
        }
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Use the pairing-code flow for `phone_number`.
    pub fn with_phone_number(mut self, phone_number: impl Into<String>) -> Self {
        self.phone_number = Some(phone_number.into());
        self
    }
}

/// Information about a live session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    /// Session ID
    pub session_id: SessionId,

    /// Session status
    pub status: SessionStatus,

    /// Raw QR payload, present only while status is qr_ready
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr: Option<String>,

    /// Phone number of the linked account
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,

    /// Account the engine is logged in as
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<EngineUser>,

    /// Creation time
    pub created_at: DateTime<Utc>,

    /// Last time the connection opened
    pub last_connected: Option<DateTime<Utc>>,

    /// Whether a reconnect attempt is scheduled
    pub reconnect_pending: bool,
}

pub(crate) struct ManagerInner {
    pub sessions: Mutex<HashMap<SessionId, SessionRecord>>,
    slots: Mutex<HashMap<SessionId, Arc<tokio::sync::Mutex<()>>>>,
    pub factory: Arc<dyn EngineFactory>,
    pub auth: AuthRoot,
    pub metadata: MetadataStore,
    pub broadcaster: EventBroadcaster,
    pub scheduler: ReconnectScheduler,
    pub config: SessionManagerConfig,
    pub reconnect_attempts: Mutex<HashMap<SessionId, u32>>,
    generation: AtomicU64,
}

impl ManagerInner {
    /// Per-id lock serializing create, delete and disconnect of one session.
    pub fn slot(&self, session_id: &SessionId) -> Arc<tokio::sync::Mutex<()>> {
        let mut slots = self.slots.lock();
        Arc::clone(
            slots
                .entry(session_id.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    /// Whether `generation` is still the live engine instance for the session.
    pub fn is_current(&self, session_id: &SessionId, generation: u64) -> bool {
        self.sessions
            .lock()
            .get(session_id)
            .is_some_and(|record| record.generation == generation)
    }

    /// Create the engine for a session. The caller holds the session slot.
    pub async fn create_locked(
        self: &Arc<Self>,
        session_id: &SessionId,
        phone_number: Option<&str>,
    ) -> Result<SessionInfo> {
        let phone_number = match phone_number {
            Some(raw) => {
                let digits = digits_only(raw);
                if digits.is_empty() {
                    return Err(Error::InvalidInput(format!(
                        "Phone number must contain digits: {:?}",
                        raw
                    )));
                }
                Some(digits)
            }
            None => None,
        };

        let replacing = {
            let mut sessions = self.sessions.lock();
            match sessions.get_mut(session_id) {
                Some(record) if record.status == SessionStatus::Connected => {
                    debug!("Session {} already connected", session_id);
                    return Ok(record.info());
                }
                Some(record) => {
                    info!(
                        "Replacing {} engine for session {}",
                        record.status, session_id
                    );
                    record.retire();
                    true
                }
                None => false,
            }
        };

        let started = self.start_engine(session_id).await;
        let (auth, EngineConnection { engine, events }) = match started {
            Ok(started) => started,
            Err(e) => {
                error!("Failed to start engine for {}: {}", session_id, e);
                if replacing {
                    self.keep_disconnected(session_id);
                }
                return Err(e);
            }
        };

        let pairing_phone = phone_number
            .clone()
            .filter(|_| !engine.is_registered());

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let stored = self
            .metadata
            .update(session_id, MetadataPatch::status(SessionStatus::Connecting));

        let mut record =
            SessionRecord::new(session_id.clone(), generation, Arc::clone(&engine), auth);
        record.created_at = stored.created_at;
        record.last_connected = stored.last_connected;
        record.phone_number = phone_number.or(stored.phone_number);
        if pairing_phone.is_some() {
            record.set_status(SessionStatus::Pairing);
        }
        let info = record.info();
        self.sessions.lock().insert(session_id.clone(), record);

        self.broadcaster
            .publish(session_id, SessionEvent::status(SessionStatus::Connecting));
        if let Some(phone) = &pairing_phone {
            self.metadata.update(
                session_id,
                MetadataPatch::status(SessionStatus::Pairing).with_phone_number(phone.clone()),
            );
            self.broadcaster
                .publish(session_id, SessionEvent::status(SessionStatus::Pairing));
        }

        let event_task = self.spawn_event_loop(session_id.clone(), generation, events);
        let pairing_task = pairing_phone
            .map(|phone| self.spawn_pairing(session_id.clone(), generation, engine, phone));
        if let Some(record) = self.sessions.lock().get_mut(session_id) {
            record.event_task = Some(event_task);
            record.pairing_task = pairing_task;
        }

        info!("Created engine for session {} ({})", session_id, info.status);
        Ok(info)
    }

    async fn start_engine(&self, session_id: &SessionId) -> Result<(AuthStorage, EngineConnection)> {
        let auth = self.auth.open(session_id)?;
        let credentials = auth.load_credentials()?;
        let connection = self.factory.connect(session_id, &auth, credentials).await?;
        Ok((auth, connection))
    }

    /// Leave a retired record in the registry as disconnected after its
    /// replacement failed to start.
    fn keep_disconnected(&self, session_id: &SessionId) {
        let changed = self
            .sessions
            .lock()
            .get_mut(session_id)
            .map(|record| {
                let changed = record.status != SessionStatus::Disconnected;
                record.set_status(SessionStatus::Disconnected);
                changed
            })
            .unwrap_or(false);
        if changed {
            self.metadata
                .update(session_id, MetadataPatch::status(SessionStatus::Disconnected));
            self.broadcaster
                .publish(session_id, SessionEvent::status(SessionStatus::Disconnected));
        }
    }

    /// Engine of a session that is currently connected.
    pub fn connected_engine(&self, session_id: &SessionId) -> Result<Arc<dyn ProtocolEngine>> {
        let sessions = self.sessions.lock();
        let record = sessions
            .get(session_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.clone()))?;
        if record.status != SessionStatus::Connected {
            return Err(Error::SessionNotConnected(session_id.clone()));
        }
        Ok(Arc::clone(&record.engine))
    }
}

/// Session manager for coordinating multiple messaging sessions.
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct SessionManager {
    pub(crate) inner: Arc<ManagerInner>,
}

impl SessionManager {
    /// Create a session manager over explicit components.
    pub fn new(
        factory: Arc<dyn EngineFactory>,
        auth: AuthRoot,
        metadata: MetadataStore,
        config: SessionManagerConfig,
    ) -> Self {
        let scheduler = ReconnectScheduler::new(config.reconnect_delay);
        Self {
            inner: Arc::new(ManagerInner {
                sessions: Mutex::new(HashMap::new()),
                slots: Mutex::new(HashMap::new()),
                factory,
                auth,
                metadata,
                broadcaster: EventBroadcaster::new(),
                scheduler,
                config,
                reconnect_attempts: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(1),
            }),
        }
    }

    /// Create a session manager laid out on disk as `config` describes.
    pub fn from_config(factory: Arc<dyn EngineFactory>, config: &ServerConfig) -> Self {
        Self::new(
            factory,
            AuthRoot::new(&config.storage.sessions_dir),
            MetadataStore::new(config.storage.metadata_file()),
            SessionManagerConfig::from_config(config),
        )
    }

    /// Event hub observers subscribe to.
    pub fn broadcaster(&self) -> &EventBroadcaster {
        &self.inner.broadcaster
    }

    /// Durable metadata mirror.
    pub fn metadata(&self) -> &MetadataStore {
        &self.inner.metadata
    }

    /// Per-session auth storage root.
    pub fn auth_root(&self) -> &AuthRoot {
        &self.inner.auth
    }

    /// Manager configuration.
    pub fn config(&self) -> &SessionManagerConfig {
        &self.inner.config
    }

    /// Create (or recreate) the engine for a session.
    ///
    /// A session that is already connected is returned unchanged. Any other
    /// live engine under the same id is stopped before the new one starts; if
    /// the new one then fails to start, the old record stays as disconnected.
    /// With `phone_number` set and an unregistered engine, the pairing-code
    /// flow starts after the configured delay.
    pub async fn create_session(
        &self,
        session_id: &SessionId,
        phone_number: Option<&str>,
    ) -> Result<SessionInfo> {
        let slot = self.inner.slot(session_id);
        let _guard = slot.lock().await;
        self.inner.reconnect_attempts.lock().remove(session_id);
        self.inner.create_locked(session_id, phone_number).await
    }

    /// Admit and create a session, storing its display name.
    ///
    /// New ids are refused once the metadata store holds `max_sessions`
    /// entries.
    pub async fn open_session(&self, request: NewSession) -> Result<SessionInfo> {
        let NewSession {
            session_id,
            name,
            phone_number,
        } = request;

        let known = self.inner.sessions.lock().contains_key(&session_id)
            || self.inner.metadata.contains(&session_id);
        let max = self.inner.config.max_sessions;
        if !known && self.inner.metadata.len() >= max {
            warn!("Refusing session {}: limit of {} reached", session_id, max);
            return Err(Error::SessionLimitReached(max));
        }

        let info = self
            .create_session(&session_id, phone_number.as_deref())
            .await?;
        if let Some(name) = name.filter(|n| !n.trim().is_empty()) {
            self.inner
                .metadata
                .update(&session_id, MetadataPatch::name(name.trim()));
        }
        Ok(info)
    }

    /// Log out and forget a session: engine, auth directory and metadata.
    pub async fn delete_session(&self, session_id: &SessionId) -> Result<()> {
        let slot = self.inner.slot(session_id);
        let _guard = slot.lock().await;

        let record = self.inner.sessions.lock().remove(session_id);
        let was_live = record.is_some();
        if let Some(mut record) = record {
            record.stop_tasks();
            if let Err(e) = record.engine.logout().await {
                debug!("Logout of {} failed: {}", session_id, e);
            }
            record.engine.close();
        }

        if let Err(e) = self.inner.auth.remove(session_id) {
            error!("Failed to remove auth state of {}: {}", session_id, e);
        }
        let removed = self.inner.metadata.remove(session_id);
        self.inner.reconnect_attempts.lock().remove(session_id);

        if !was_live && removed.is_none() {
            return Err(Error::SessionNotFound(session_id.clone()));
        }
        info!("Deleted session {}", session_id);
        Ok(())
    }

    /// Log a session out and mark it disconnected, keeping its metadata.
    pub async fn disconnect_session(&self, session_id: &SessionId) -> Result<()> {
        let slot = self.inner.slot(session_id);
        let _guard = slot.lock().await;

        let engine = self.inner.sessions.lock().get_mut(session_id).map(|record| {
            record.cancel_reconnect();
            record.stop_pairing();
            record.set_status(SessionStatus::Disconnected);
            record.ended = true;
            Arc::clone(&record.engine)
        });
        if engine.is_none() && !self.inner.metadata.contains(session_id) {
            return Err(Error::SessionNotFound(session_id.clone()));
        }

        if let Some(engine) = engine {
            if let Err(e) = engine.logout().await {
                debug!("Logout of {} failed: {}", session_id, e);
            }
        }

        self.inner.metadata.update(
            session_id,
            MetadataPatch::status(SessionStatus::Disconnected),
        );
        self.inner
            .broadcaster
            .publish(session_id, SessionEvent::status(SessionStatus::Disconnected));
        info!("Disconnected session {}", session_id);
        Ok(())
    }

    /// Recreate the engine for a session.
    pub async fn reconnect_session(&self, session_id: &SessionId) -> Result<SessionInfo> {
        self.create_session(session_id, None).await
    }

    /// Get a live session by ID.
    pub fn get_session(&self, session_id: &SessionId) -> Option<SessionInfo> {
        self.inner
            .sessions
            .lock()
            .get(session_id)
            .map(|record| record.info())
    }

    /// Stored descriptor with the live status overlaid.
    pub fn session_status(&self, session_id: &SessionId) -> Result<SessionMetadata> {
        let live = self.get_session(session_id);
        match (self.inner.metadata.get(session_id), live) {
            (Some(entry), Some(live)) => Ok(overlay(entry, &live)),
            (Some(entry), None) => Ok(entry),
            (None, Some(live)) => Ok(descriptor_of(&live)),
            (None, None) => Err(Error::SessionNotFound(session_id.clone())),
        }
    }

    /// Every known session, stored descriptors with live status overlaid.
    pub fn list_sessions(&self) -> Vec<SessionMetadata> {
        let mut live: HashMap<SessionId, SessionInfo> = self
            .inner
            .sessions
            .lock()
            .iter()
            .map(|(id, record)| (id.clone(), record.info()))
            .collect();

        let mut listed: Vec<SessionMetadata> = self
            .inner
            .metadata
            .read()
            .into_values()
            .map(|entry| match live.remove(&entry.session_id) {
                Some(info) => overlay(entry, &info),
                None => entry,
            })
            .collect();
        listed.extend(live.values().map(descriptor_of));
        listed.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        listed
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.inner.sessions.lock().len()
    }

    /// Recreate every stored session last seen connecting or connected.
    ///
    /// Returns the number of sessions restored.
    pub async fn restore_sessions(&self) -> usize {
        let restorable: Vec<SessionId> = self
            .inner
            .metadata
            .read()
            .into_values()
            .filter(|entry| entry.status.is_restorable())
            .map(|entry| entry.session_id)
            .collect();

        let mut restored = 0;
        for session_id in restorable {
            match self.create_session(&session_id, None).await {
                Ok(_) => restored += 1,
                Err(e) => error!("Failed to restore session {}: {}", session_id, e),
            }
        }
        info!("Restored {} sessions", restored);
        restored
    }

    /// Stop every live engine without logging out. Metadata is left as is so
    /// the sessions restore on the next start.
    pub fn shutdown(&self) {
        let records: Vec<SessionRecord> = self
            .inner
            .sessions
            .lock()
            .drain()
            .map(|(_, record)| record)
            .collect();

        let count = records.len();
        for record in records {
            record.discard();
        }
        info!("Closed {} sessions", count);
    }
}

fn overlay(mut entry: SessionMetadata, live: &SessionInfo) -> SessionMetadata {
    entry.status = live.status;
    entry
}

fn descriptor_of(live: &SessionInfo) -> SessionMetadata {
    let mut entry = SessionMetadata::new(live.session_id.clone(), live.created_at);
    entry.status = live.status;
    entry.phone_number = live.phone_number.clone();
    entry.last_connected = live.last_connected;
    entry
}

#[cfg(test)]
mod tests {
    use super::*;
    use linkhub_engine::testing::ScriptedEngineFactory;

    fn id(raw: &str) -> SessionId {
        SessionId::parse(raw).unwrap()
    }

    fn manager(factory: &ScriptedEngineFactory) -> (tempfile::TempDir, SessionManager) {
        let tmp = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(
            Arc::new(factory.clone()),
            AuthRoot::new(tmp.path().join("sessions")),
            MetadataStore::new(tmp.path().join("data").join("sessions.json")),
            SessionManagerConfig::default(),
        );
        (tmp, manager)
    }

    #[test]
    fn test_config_from_server_config() {
        let mut server = ServerConfig::default();
        server.server.max_sessions = 3;
        server.lifecycle.max_reconnect_attempts = Some(5);
        server.messaging.country_code = "44".to_string();

        let config = SessionManagerConfig::from_config(&server);
        assert_eq!(config.max_sessions, 3);
        assert_eq!(config.max_reconnect_attempts, Some(5));
        assert_eq!(config.country_code, "44");
        assert_eq!(config.reconnect_delay, Duration::from_millis(3000));
    }

    #[tokio::test]
    async fn test_create_session() {
        let factory = ScriptedEngineFactory::new();
        let (_tmp, manager) = manager(&factory);

        let info = manager.create_session(&id("s1"), None).await.unwrap();
        assert_eq!(info.status, SessionStatus::Connecting);
        assert_eq!(manager.session_count(), 1);
        assert_eq!(factory.connect_count(), 1);

        let stored = manager.metadata().get(&id("s1")).unwrap();
        assert_eq!(stored.status, SessionStatus::Connecting);
        assert_eq!(stored.name, "s1");
    }

    #[tokio::test]
    async fn test_create_failure_leaves_no_record() {
        let factory = ScriptedEngineFactory::new();
        factory.fail_next_connect("boom");
        let (_tmp, manager) = manager(&factory);

        let err = manager.create_session(&id("s1"), None).await.unwrap_err();
        assert!(matches!(err, Error::Engine(_)));
        assert!(manager.get_session(&id("s1")).is_none());
    }

    #[tokio::test]
    async fn test_failed_recreate_keeps_disconnected_record() {
        let factory = ScriptedEngineFactory::new();
        let (_tmp, manager) = manager(&factory);
        manager.create_session(&id("s1"), None).await.unwrap();
        let first = factory.latest("s1").unwrap();

        factory.fail_next_connect("boom");
        assert!(manager.create_session(&id("s1"), None).await.is_err());

        assert!(first.is_closed());
        let live = manager.get_session(&id("s1")).unwrap();
        assert_eq!(live.status, SessionStatus::Disconnected);
        assert_eq!(
            manager.metadata().get(&id("s1")).unwrap().status,
            SessionStatus::Disconnected
        );
    }

    #[tokio::test]
    async fn test_create_rejects_phone_without_digits() {
        let factory = ScriptedEngineFactory::new();
        let (_tmp, manager) = manager(&factory);

        let err = manager
            .create_session(&id("s1"), Some("call me"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(factory.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_open_session_enforces_limit() {
        let factory = ScriptedEngineFactory::new();
        let tmp = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(
            Arc::new(factory.clone()),
            AuthRoot::new(tmp.path().join("sessions")),
            MetadataStore::new(tmp.path().join("sessions.json")),
            SessionManagerConfig {
                max_sessions: 1,
                ..Default::default()
            },
        );

        manager.open_session(NewSession::new(id("s1"))).await.unwrap();
        let err = manager
            .open_session(NewSession::new(id("s2")))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SessionLimitReached(1)));

        // An existing id is not a new admission.
        manager.open_session(NewSession::new(id("s1"))).await.unwrap();
    }

    #[tokio::test]
    async fn test_open_session_stores_name() {
        let factory = ScriptedEngineFactory::new();
        let (_tmp, manager) = manager(&factory);

        manager
            .open_session(NewSession::new(id("s1")).with_name("Sales"))
            .await
            .unwrap();
        assert_eq!(manager.session_status(&id("s1")).unwrap().name, "Sales");
    }

    #[tokio::test]
    async fn test_status_of_unknown_session() {
        let factory = ScriptedEngineFactory::new();
        let (_tmp, manager) = manager(&factory);

        let err = manager.session_status(&id("nope")).unwrap_err();
        assert!(matches!(err, Error::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_unknown_session() {
        let factory = ScriptedEngineFactory::new();
        let (_tmp, manager) = manager(&factory);

        let err = manager.delete_session(&id("nope")).await.unwrap_err();
        assert!(matches!(err, Error::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn test_shutdown_closes_without_logout() {
        let factory = ScriptedEngineFactory::new();
        let (_tmp, manager) = manager(&factory);

        manager.create_session(&id("s1"), None).await.unwrap();
        manager.create_session(&id("s2"), None).await.unwrap();
        manager.shutdown();

        assert_eq!(manager.session_count(), 0);
        for engine in factory.engines() {
            assert!(engine.is_closed());
            assert!(!engine.is_logged_out());
        }
        assert_eq!(manager.metadata().len(), 2);
    }

    #[tokio::test]
    async fn test_list_sessions_sorted() {
        let factory = ScriptedEngineFactory::new();
        let (_tmp, manager) = manager(&factory);

        manager.create_session(&id("b"), None).await.unwrap();
        manager.create_session(&id("a"), None).await.unwrap();

        let ids: Vec<String> = manager
            .list_sessions()
            .into_iter()
            .map(|entry| entry.session_id.to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
