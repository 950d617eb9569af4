//! Scripted protocol engine for tests.
//!
//! The factory hands out [`ScriptedEngine`]s that never touch the network.
//! Tests push engine events with [`ScriptedEngine::emit`] and its helpers and
//! inspect what the session layer asked the engine to do.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;

use linkhub_core::{DisconnectReason, EngineUser, Error, Result, SessionId};

use crate::adapter::{EngineConnection, EngineEvent, EngineFactory, MessageContent, ProtocolEngine};
use crate::auth::{AuthStorage, Credentials};

#[derive(Debug)]
struct Script {
    registered: Option<bool>,
    pairing_code: std::result::Result<String, String>,
    contacts: HashSet<String>,
    send_failures: HashSet<String>,
    connect_failures: VecDeque<String>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            registered: None,
            pairing_code: Ok("ABCD1234".to_string()),
            contacts: HashSet::new(),
            send_failures: HashSet::new(),
            connect_failures: VecDeque::new(),
        }
    }
}

/// Factory of scripted engines. Clones share the same script and history.
#[derive(Debug, Clone, Default)]
pub struct ScriptedEngineFactory {
    script: Arc<Mutex<Script>>,
    engines: Arc<Mutex<Vec<Arc<ScriptedEngine>>>>,
}

impl ScriptedEngineFactory {
    /// Create a factory whose engines follow the stored credentials.
    pub fn new() -> Self {
        Self::default()
    }

    /// Force the registration flag new engines report.
    pub fn with_registered(self, registered: bool) -> Self {
        self.script.lock().registered = Some(registered);
        self
    }

    /// Code returned by pairing-code requests.
    pub fn with_pairing_code(self, code: impl Into<String>) -> Self {
        self.script.lock().pairing_code = Ok(code.into());
        self
    }

    /// Make pairing-code requests fail with `message`.
    pub fn with_pairing_failure(self, message: impl Into<String>) -> Self {
        self.script.lock().pairing_code = Err(message.into());
        self
    }

    /// Register an address so lookups resolve it.
    pub fn with_contact(self, address: impl Into<String>) -> Self {
        self.script.lock().contacts.insert(address.into());
        self
    }

    /// Make sends to `address` fail.
    pub fn with_send_failure(self, address: impl Into<String>) -> Self {
        self.script.lock().send_failures.insert(address.into());
        self
    }

    /// Make the next `connect` call fail with `message`.
    pub fn fail_next_connect(&self, message: impl Into<String>) {
        self.script.lock().connect_failures.push_back(message.into());
    }

    /// Every engine created so far, oldest first.
    pub fn engines(&self) -> Vec<Arc<ScriptedEngine>> {
        self.engines.lock().clone()
    }

    /// Engines created for one session, oldest first.
    pub fn engines_for(&self, session_id: &str) -> Vec<Arc<ScriptedEngine>> {
        self.engines
            .lock()
            .iter()
            .filter(|e| e.session_id.as_str() == session_id)
            .cloned()
            .collect()
    }

    /// Most recent engine of one session.
    pub fn latest(&self, session_id: &str) -> Option<Arc<ScriptedEngine>> {
        self.engines_for(session_id).pop()
    }

    /// Number of connect calls that produced an engine.
    pub fn connect_count(&self) -> usize {
        self.engines.lock().len()
    }

    /// Engines of one session that have not been closed.
    pub fn live_count(&self, session_id: &str) -> usize {
        self.engines_for(session_id)
            .iter()
            .filter(|e| !e.is_closed())
            .count()
    }
}

#[async_trait]
impl EngineFactory for ScriptedEngineFactory {
    async fn connect(
        &self,
        session_id: &SessionId,
        auth: &AuthStorage,
        credentials: Credentials,
    ) -> Result<EngineConnection> {
        let registered = {
            let mut script = self.script.lock();
            if let Some(message) = script.connect_failures.pop_front() {
                return Err(Error::Engine(message));
            }
            script
                .registered
                .unwrap_or_else(|| credentials.is_registered())
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let engine = Arc::new(ScriptedEngine {
            session_id: session_id.clone(),
            auth_dir: auth.dir().to_path_buf(),
            credentials,
            registered: AtomicBool::new(registered),
            events: tx,
            script: Arc::clone(&self.script),
            closed: AtomicBool::new(false),
            logged_out: AtomicBool::new(false),
            pairing_requests: Mutex::new(Vec::new()),
            lookups: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
        });
        self.engines.lock().push(Arc::clone(&engine));

        Ok(EngineConnection {
            engine,
            events: rx,
        })
    }
}

/// Engine instance driven by the test.
#[derive(Debug)]
pub struct ScriptedEngine {
    session_id: SessionId,
    auth_dir: PathBuf,
    credentials: Credentials,
    registered: AtomicBool,
    events: mpsc::UnboundedSender<EngineEvent>,
    script: Arc<Mutex<Script>>,
    closed: AtomicBool,
    logged_out: AtomicBool,
    pairing_requests: Mutex<Vec<String>>,
    lookups: Mutex<Vec<String>>,
    sent: Mutex<Vec<(String, MessageContent)>>,
}

impl ScriptedEngine {
    /// Session this engine was created for.
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Auth directory the engine was bound to.
    pub fn auth_dir(&self) -> &Path {
        &self.auth_dir
    }

    /// Credentials handed to `connect`.
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Push an event. Returns false when nobody listens anymore.
    pub fn emit(&self, event: EngineEvent) -> bool {
        self.events.send(event).is_ok()
    }

    /// Emit a QR challenge.
    pub fn qr(&self, payload: &str) -> bool {
        self.emit(EngineEvent::Qr(payload.to_string()))
    }

    /// Emit a connection open for user `user_id`.
    pub fn open(&self, user_id: &str) -> bool {
        self.emit(EngineEvent::Open {
            user: Some(EngineUser {
                id: user_id.to_string(),
                name: None,
            }),
        })
    }

    /// Emit a connection open with a full user.
    pub fn open_as(&self, user: EngineUser) -> bool {
        self.emit(EngineEvent::Open { user: Some(user) })
    }

    /// Emit a connection close.
    pub fn disconnect(&self, reason: DisconnectReason) -> bool {
        self.emit(EngineEvent::Closed(reason))
    }

    /// Emit a credentials update.
    pub fn update_credentials(&self, value: serde_json::Value) -> bool {
        let creds = Credentials::new(value);
        self.registered
            .store(creds.is_registered(), Ordering::SeqCst);
        self.emit(EngineEvent::CredentialsUpdated(creds))
    }

    /// Whether `close` was called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Whether `logout` was called.
    pub fn is_logged_out(&self) -> bool {
        self.logged_out.load(Ordering::SeqCst)
    }

    /// Phone numbers pairing codes were requested for.
    pub fn pairing_requests(&self) -> Vec<String> {
        self.pairing_requests.lock().clone()
    }

    /// Addresses looked up.
    pub fn lookups(&self) -> Vec<String> {
        self.lookups.lock().clone()
    }

    /// Messages sent, with their addresses.
    pub fn sent(&self) -> Vec<(String, MessageContent)> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl ProtocolEngine for ScriptedEngine {
    fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    async fn request_pairing_code(&self, phone_number: &str) -> Result<String> {
        self.pairing_requests.lock().push(phone_number.to_string());
        self.script.lock().pairing_code.clone().map_err(Error::Engine)
    }

    async fn logout(&self) -> Result<()> {
        self.logged_out.store(true, Ordering::SeqCst);
        let _ = self.events.send(EngineEvent::Closed(DisconnectReason::LoggedOut));
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    async fn lookup(&self, address: &str) -> Result<Option<String>> {
        if self.is_closed() {
            return Err(Error::Engine("Connection closed".to_string()));
        }
        self.lookups.lock().push(address.to_string());
        let known = self.script.lock().contacts.contains(address);
        Ok(known.then(|| address.to_string()))
    }

    async fn send(&self, address: &str, content: &MessageContent) -> Result<serde_json::Value> {
        if self.script.lock().send_failures.contains(address) {
            return Err(Error::Engine(format!("Send to {address} failed")));
        }
        let mut sent = self.sent.lock();
        sent.push((address.to_string(), content.clone()));
        Ok(json!({ "key": { "remoteJid": address, "id": format!("MSG{}", sent.len()) } }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthRoot;

    fn storage(tmp: &tempfile::TempDir, id: &str) -> (SessionId, AuthStorage) {
        let id = SessionId::parse(id).unwrap();
        let storage = AuthRoot::new(tmp.path()).open(&id).unwrap();
        (id, storage)
    }

    #[tokio::test]
    async fn test_connect_records_engines() {
        let tmp = tempfile::tempdir().unwrap();
        let (id, auth) = storage(&tmp, "s1");
        let factory = ScriptedEngineFactory::new();

        let mut conn = factory
            .connect(&id, &auth, Credentials::default())
            .await
            .unwrap();

        assert_eq!(factory.connect_count(), 1);
        let engine = factory.latest("s1").unwrap();
        assert!(engine.qr("2@abc"));
        assert_eq!(conn.events.recv().await, Some(EngineEvent::Qr("2@abc".into())));
        assert!(!conn.engine.is_registered());
    }

    #[tokio::test]
    async fn test_connect_failure_is_consumed() {
        let tmp = tempfile::tempdir().unwrap();
        let (id, auth) = storage(&tmp, "s1");
        let factory = ScriptedEngineFactory::new();
        factory.fail_next_connect("handshake failed");

        let err = factory
            .connect(&id, &auth, Credentials::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Engine(_)));

        assert!(factory
            .connect(&id, &auth, Credentials::default())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_registered_follows_credentials() {
        let tmp = tempfile::tempdir().unwrap();
        let (id, auth) = storage(&tmp, "s1");
        let factory = ScriptedEngineFactory::new();

        let conn = factory
            .connect(&id, &auth, Credentials::new(json!({"registered": true})))
            .await
            .unwrap();
        assert!(conn.engine.is_registered());
    }

    #[tokio::test]
    async fn test_lookup_and_send() {
        let tmp = tempfile::tempdir().unwrap();
        let (id, auth) = storage(&tmp, "s1");
        let factory = ScriptedEngineFactory::new().with_contact("62811@s.whatsapp.net");
        let conn = factory
            .connect(&id, &auth, Credentials::default())
            .await
            .unwrap();

        assert_eq!(
            conn.engine.lookup("62811@s.whatsapp.net").await.unwrap(),
            Some("62811@s.whatsapp.net".to_string())
        );
        assert_eq!(conn.engine.lookup("62899@s.whatsapp.net").await.unwrap(), None);

        conn.engine
            .send("62811@s.whatsapp.net", &MessageContent::text("hi"))
            .await
            .unwrap();
        assert_eq!(factory.latest("s1").unwrap().sent().len(), 1);
    }

    #[tokio::test]
    async fn test_logout_emits_terminal_close() {
        let tmp = tempfile::tempdir().unwrap();
        let (id, auth) = storage(&tmp, "s1");
        let factory = ScriptedEngineFactory::new();
        let mut conn = factory
            .connect(&id, &auth, Credentials::default())
            .await
            .unwrap();

        conn.engine.logout().await.unwrap();

        assert_eq!(
            conn.events.recv().await,
            Some(EngineEvent::Closed(DisconnectReason::LoggedOut))
        );
        assert!(factory.latest("s1").unwrap().is_logged_out());
    }
}
