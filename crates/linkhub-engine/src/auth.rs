//! Per-session durable auth storage.
//!
//! Every session owns one directory under the auth root. The engine's
//! credentials live in `creds.json` inside it; engines may keep their own
//! key files alongside.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use linkhub_core::{Result, SessionId};

const CREDENTIALS_FILE: &str = "creds.json";

/// Opaque engine credentials.
///
/// Only the `registered` flag is interpreted; everything else belongs to the
/// engine and is stored verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials(serde_json::Value);

impl Credentials {
    /// Wrap an engine credential document.
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// Whether the credentials belong to a linked device.
    pub fn is_registered(&self) -> bool {
        self.0
            .get("registered")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }

    /// Whether no credentials have been stored yet.
    pub fn is_empty(&self) -> bool {
        self.0.is_null()
    }

    /// Borrow the raw document.
    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }
}

/// Root directory holding one auth directory per session.
#[derive(Debug, Clone)]
pub struct AuthRoot {
    root: PathBuf,
}

impl AuthRoot {
    /// Create a root at `root`. Nothing is touched on disk until a session opens.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory path.
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Directory of one session.
    pub fn session_dir(&self, session_id: &SessionId) -> PathBuf {
        self.root.join(session_id.as_str())
    }

    /// Open the storage of a session, creating its directory if absent.
    pub fn open(&self, session_id: &SessionId) -> Result<AuthStorage> {
        let dir = self.session_dir(session_id);
        if !dir.exists() {
            debug!("Creating auth directory: {}", dir.display());
        }
        std::fs::create_dir_all(&dir)?;
        Ok(AuthStorage { dir })
    }

    /// Whether a session has auth storage on disk.
    pub fn exists(&self, session_id: &SessionId) -> bool {
        self.session_dir(session_id).exists()
    }

    /// Remove the storage of a session. Missing storage is not an error.
    pub fn remove(&self, session_id: &SessionId) -> Result<()> {
        let dir = self.session_dir(session_id);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
            info!("Removed auth directory: {}", dir.display());
        }
        Ok(())
    }
}

/// Auth storage of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthStorage {
    dir: PathBuf,
}

impl AuthStorage {
    /// Directory of this storage.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load stored credentials.
    ///
    /// A missing file yields empty credentials. An unparsable file is logged
    /// and also yields empty credentials, so the engine starts a fresh link.
    pub fn load_credentials(&self) -> Result<Credentials> {
        let path = self.dir.join(CREDENTIALS_FILE);
        if !path.exists() {
            return Ok(Credentials::default());
        }
        let content = std::fs::read_to_string(&path)?;
        match serde_json::from_str(&content) {
            Ok(value) => Ok(Credentials::new(value)),
            Err(e) => {
                warn!("Ignoring unreadable credentials at {}: {}", path.display(), e);
                Ok(Credentials::default())
            }
        }
    }

    /// Persist credentials, replacing the stored file atomically.
    pub fn save_credentials(&self, credentials: &Credentials) -> Result<()> {
        let path = self.dir.join(CREDENTIALS_FILE);
        let tmp = self.dir.join(format!("{CREDENTIALS_FILE}.tmp"));
        std::fs::write(&tmp, serde_json::to_vec_pretty(credentials)?)?;
        std::fs::rename(&tmp, &path)?;
        debug!("Saved credentials: {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn id(raw: &str) -> SessionId {
        SessionId::parse(raw).unwrap()
    }

    #[test]
    fn test_open_creates_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let root = AuthRoot::new(tmp.path().join("sessions"));

        assert!(!root.exists(&id("s1")));
        let storage = root.open(&id("s1")).unwrap();
        assert!(storage.dir().is_dir());
        assert!(root.exists(&id("s1")));
    }

    #[test]
    fn test_open_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let root = AuthRoot::new(tmp.path());
        let first = root.open(&id("s1")).unwrap();
        let second = root.open(&id("s1")).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_missing_credentials_are_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = AuthRoot::new(tmp.path()).open(&id("s1")).unwrap();
        let creds = storage.load_credentials().unwrap();
        assert!(creds.is_empty());
        assert!(!creds.is_registered());
    }

    #[test]
    fn test_credentials_persist_verbatim() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = AuthRoot::new(tmp.path()).open(&id("s1")).unwrap();
        let creds = Credentials::new(json!({"registered": true, "me": {"id": "620000@x"}}));

        storage.save_credentials(&creds).unwrap();
        let loaded = storage.load_credentials().unwrap();

        assert_eq!(loaded, creds);
        assert!(loaded.is_registered());
        assert!(!storage.dir().join("creds.json.tmp").exists());
    }

    #[test]
    fn test_corrupt_credentials_are_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = AuthRoot::new(tmp.path()).open(&id("s1")).unwrap();
        std::fs::write(storage.dir().join("creds.json"), "{not json").unwrap();

        let creds = storage.load_credentials().unwrap();
        assert!(creds.is_empty());
    }

    #[test]
    fn test_remove_deletes_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let root = AuthRoot::new(tmp.path());
        let storage = root.open(&id("s1")).unwrap();
        std::fs::write(storage.dir().join("pre-key-1.json"), "{}").unwrap();

        root.remove(&id("s1")).unwrap();
        assert!(!root.exists(&id("s1")));

        // Removing again is fine
        root.remove(&id("s1")).unwrap();
    }
}
