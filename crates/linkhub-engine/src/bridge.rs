//! Subprocess bridge engine.
//!
//! The bridge runs the real protocol implementation in a child process, one
//! per session, and talks newline-delimited JSON over its stdio.
//!
//! Requests written to the child's stdin:
//! ```text
//! {"id": 1, "method": "connect", "params": {"sessionId": "s1", "authDir": "...", "credentials": {...}}}
//! {"id": 2, "method": "requestPairingCode", "params": {"phoneNumber": "62812..."}}
//! {"id": 3, "method": "lookup", "params": {"address": "62812...@s.whatsapp.net"}}
//! {"id": 4, "method": "send", "params": {"address": "...", "content": {"type": "text", "text": "hi"}}}
//! {"id": 5, "method": "logout", "params": {}}
//! ```
//!
//! Lines read from the child's stdout are either responses to a request id or
//! unsolicited events:
//! ```text
//! {"type": "response", "id": 1, "result": null}
//! {"type": "response", "id": 2, "error": "rate limited"}
//! {"type": "qr", "qr": "2@abc..."}
//! {"type": "open", "user": {"id": "620000:12@s.whatsapp.net", "name": "Sales"}}
//! {"type": "close", "code": 428}
//! {"type": "creds", "creds": {...}}
//! ```
//!
//! Anything else on stdout is logged at debug level and ignored. If the child
//! exits without being closed and without reporting a close first, the engine
//! reports a lost connection.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use linkhub_core::{DisconnectReason, EngineSettings, EngineUser, Error, Result, SessionId};

use crate::adapter::{EngineConnection, EngineEvent, EngineFactory, MessageContent, ProtocolEngine};
use crate::auth::{AuthStorage, Credentials};

/// Default time to wait for a bridge response.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type PendingReply = oneshot::Sender<std::result::Result<Value, String>>;

/// Request line written to the bridge.
#[derive(Debug, Serialize)]
struct BridgeRequest<'a> {
    id: u64,
    method: &'a str,
    params: Value,
}

/// Line read from the bridge.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BridgeMessage {
    Response {
        id: u64,
        #[serde(default)]
        result: Value,
        #[serde(default)]
        error: Option<String>,
    },
    Qr {
        qr: String,
    },
    Open {
        #[serde(default)]
        user: Option<EngineUser>,
    },
    Close {
        code: u16,
    },
    Creds {
        creds: Value,
    },
}

/// State shared between the engine handle and its stdout reader.
#[derive(Debug, Default)]
struct BridgeShared {
    pending: parking_lot::Mutex<HashMap<u64, PendingReply>>,
    registered: AtomicBool,
    closing: AtomicBool,
    /// The bridge reported a close for the current connection.
    closed: AtomicBool,
}

impl BridgeShared {
    fn dispatch(&self, message: BridgeMessage, events: &mpsc::UnboundedSender<EngineEvent>) {
        let event = match message {
            BridgeMessage::Response { id, result, error } => {
                let reply = self.pending.lock().remove(&id);
                match reply {
                    Some(tx) => {
                        let _ = tx.send(match error {
                            Some(message) => Err(message),
                            None => Ok(result),
                        });
                    }
                    None => debug!("Dropping response for unknown request id {}", id),
                }
                return;
            }
            BridgeMessage::Qr { qr } => EngineEvent::Qr(qr),
            BridgeMessage::Open { user } => {
                self.closed.store(false, Ordering::SeqCst);
                EngineEvent::Open { user }
            }
            BridgeMessage::Close { code } => {
                self.closed.store(true, Ordering::SeqCst);
                EngineEvent::Closed(DisconnectReason::from_code(code))
            }
            BridgeMessage::Creds { creds } => {
                let creds = Credentials::new(creds);
                self.registered
                    .store(creds.is_registered(), Ordering::SeqCst);
                EngineEvent::CredentialsUpdated(creds)
            }
        };
        // The receiver is gone once the session was torn down.
        let _ = events.send(event);
    }

    fn fail_pending(&self, reason: &str) {
        for (_, tx) in self.pending.lock().drain() {
            let _ = tx.send(Err(reason.to_string()));
        }
    }
}

/// Engine handle backed by a bridge child process.
pub struct BridgeEngine {
    session_id: SessionId,
    shared: Arc<BridgeShared>,
    stdin: tokio::sync::Mutex<ChildStdin>,
    child: parking_lot::Mutex<Child>,
    next_id: AtomicU64,
    request_timeout: Duration,
}

impl std::fmt::Debug for BridgeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeEngine")
            .field("session_id", &self.session_id)
            .field("registered", &self.shared.registered.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl BridgeEngine {
    /// Send a request and wait for its response.
    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        if self.shared.closing.load(Ordering::SeqCst) {
            return Err(Error::Engine("Bridge is closed".to_string()));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(id, tx);

        let mut line = serde_json::to_vec(&BridgeRequest { id, method, params })?;
        line.push(b'\n');

        debug!(
            "Bridge request: session_id={}, id={}, method={}",
            self.session_id, id, method
        );

        let written = {
            let mut stdin = self.stdin.lock().await;
            match stdin.write_all(&line).await {
                Ok(()) => stdin.flush().await,
                Err(e) => Err(e),
            }
        };
        if let Err(e) = written {
            self.shared.pending.lock().remove(&id);
            return Err(Error::Engine(format!("Failed to write to bridge: {e}")));
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(message))) => Err(Error::Engine(message)),
            Ok(Err(_)) => Err(Error::Engine("Bridge dropped the request".to_string())),
            Err(_) => {
                self.shared.pending.lock().remove(&id);
                Err(Error::Engine(format!(
                    "Bridge did not answer '{}' within {}ms",
                    method,
                    self.request_timeout.as_millis()
                )))
            }
        }
    }
}

#[async_trait]
impl ProtocolEngine for BridgeEngine {
    fn is_registered(&self) -> bool {
        self.shared.registered.load(Ordering::SeqCst)
    }

    async fn request_pairing_code(&self, phone_number: &str) -> Result<String> {
        let value = self
            .request("requestPairingCode", json!({ "phoneNumber": phone_number }))
            .await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::Engine(format!("Unexpected pairing code reply: {value}")))
    }

    async fn logout(&self) -> Result<()> {
        self.request("logout", json!({})).await.map(|_| ())
    }

    fn close(&self) {
        if self.shared.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut child = self.child.lock();
        if let Err(e) = child.start_kill() {
            debug!(
                "Bridge for session {} already exited: {}",
                self.session_id, e
            );
        }
        self.shared.fail_pending("bridge closed");
        info!("Closed bridge engine: session_id={}", self.session_id);
    }

    async fn lookup(&self, address: &str) -> Result<Option<String>> {
        let value = self
            .request("lookup", json!({ "address": address }))
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn send(&self, address: &str, content: &MessageContent) -> Result<Value> {
        self.request("send", json!({ "address": address, "content": content }))
            .await
    }
}

impl Drop for BridgeEngine {
    fn drop(&mut self) {
        self.shared.closing.store(true, Ordering::SeqCst);
    }
}

/// Spawns one bridge process per session.
#[derive(Debug, Clone)]
pub struct BridgeEngineFactory {
    settings: EngineSettings,
    request_timeout: Duration,
}

impl BridgeEngineFactory {
    /// Create a factory for the configured bridge command.
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            settings,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Set the time to wait for bridge responses.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

#[async_trait]
impl EngineFactory for BridgeEngineFactory {
    async fn connect(
        &self,
        session_id: &SessionId,
        auth: &AuthStorage,
        credentials: Credentials,
    ) -> Result<EngineConnection> {
        info!(
            "Spawning bridge: session_id={}, command='{}', args={:?}",
            session_id, self.settings.command, self.settings.args
        );

        let mut child = Command::new(&self.settings.command)
            .args(&self.settings.args)
            .envs(&self.settings.env)
            .env("LINKHUB_SESSION_ID", session_id.as_str())
            .env("LINKHUB_AUTH_DIR", auth.dir())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                error!("Failed to spawn bridge '{}': {}", self.settings.command, e);
                Error::Engine(format!(
                    "Failed to spawn bridge '{}': {e}",
                    self.settings.command
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Engine("Bridge stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Engine("Bridge stdout unavailable".to_string()))?;

        let shared = Arc::new(BridgeShared::default());
        shared
            .registered
            .store(credentials.is_registered(), Ordering::SeqCst);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        tokio::spawn(read_bridge_output(
            session_id.clone(),
            stdout,
            Arc::clone(&shared),
            events_tx,
        ));

        let engine = Arc::new(BridgeEngine {
            session_id: session_id.clone(),
            shared,
            stdin: tokio::sync::Mutex::new(stdin),
            child: parking_lot::Mutex::new(child),
            next_id: AtomicU64::new(1),
            request_timeout: self.request_timeout,
        });

        let params = json!({
            "sessionId": session_id.as_str(),
            "authDir": auth.dir().to_string_lossy(),
            "credentials": credentials,
        });
        if let Err(e) = engine.request("connect", params).await {
            warn!("Bridge handshake failed: session_id={}, {}", session_id, e);
            engine.close();
            return Err(e);
        }

        Ok(EngineConnection {
            engine,
            events: events_rx,
        })
    }
}

async fn read_bridge_output(
    session_id: SessionId,
    stdout: ChildStdout,
    shared: Arc<BridgeShared>,
    events: mpsc::UnboundedSender<EngineEvent>,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<BridgeMessage>(line) {
                    Ok(message) => shared.dispatch(message, &events),
                    Err(e) => debug!(
                        "Ignoring bridge output: session_id={}, {}: {}",
                        session_id, e, line
                    ),
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!("Bridge read failed: session_id={}, {}", session_id, e);
                break;
            }
        }
    }

    shared.fail_pending("bridge exited");
    if shared.closed.load(Ordering::SeqCst) {
        debug!("Bridge exited after reporting close: session_id={}", session_id);
    } else if !shared.closing.load(Ordering::SeqCst) {
        warn!("Bridge exited unexpectedly: session_id={}", session_id);
        let _ = events.send(EngineEvent::Closed(DisconnectReason::ConnectionLost));
    }
}
