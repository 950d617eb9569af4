//! Durable mirror of per-session metadata.
//!
//! All entries live in one JSON document keyed by session id. Every change
//! rewrites the whole document, so the store serializes read-modify-write
//! cycles behind a single lock.
//!
//! File access is synchronous and runs on the caller's thread while the lock
//! is held. The document holds one small entry per session, bounded by the
//! session limit; move the I/O to `spawn_blocking` if that ever grows.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use linkhub_core::{Error, MetadataPatch, Result, SessionId, SessionMetadata};

/// All stored entries, ordered by session id.
pub type MetadataMap = BTreeMap<SessionId, SessionMetadata>;

/// JSON-file backed metadata store. Clones share the same lock.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl MetadataStore {
    /// Store backed by the document at `path`. Nothing is touched until the
    /// first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Location of the backing document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every entry. A missing or unreadable document reads as empty.
    pub fn read(&self) -> MetadataMap {
        let _guard = self.lock.lock();
        self.load()
    }

    /// Entry for one session.
    pub fn get(&self, session_id: &SessionId) -> Option<SessionMetadata> {
        self.read().remove(session_id)
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether an entry exists for `session_id`.
    pub fn contains(&self, session_id: &SessionId) -> bool {
        self.read().contains_key(session_id)
    }

    /// Replace the whole document.
    pub fn write(&self, entries: &MetadataMap) {
        let _guard = self.lock.lock();
        self.persist(entries);
    }

    /// Merge `patch` into the entry for `session_id`, creating the entry
    /// when absent. Returns the merged entry.
    pub fn update(&self, session_id: &SessionId, patch: MetadataPatch) -> SessionMetadata {
        let _guard = self.lock.lock();
        let mut entries = self.load();
        let entry = entries
            .entry(session_id.clone())
            .or_insert_with(|| SessionMetadata::new(session_id.clone(), Utc::now()));
        patch.apply_to(entry);
        let merged = entry.clone();
        self.persist(&entries);
        merged
    }

    /// Delete the entry for `session_id`, returning it if it existed.
    pub fn remove(&self, session_id: &SessionId) -> Option<SessionMetadata> {
        let _guard = self.lock.lock();
        let mut entries = self.load();
        let removed = entries.remove(session_id);
        if removed.is_some() {
            self.persist(&entries);
        }
        removed
    }

    fn load(&self) -> MetadataMap {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return MetadataMap::new(),
            Err(e) => {
                error!("Failed to read metadata {}: {}", self.path.display(), e);
                return MetadataMap::new();
            }
        };

        if raw.trim().is_empty() {
            return MetadataMap::new();
        }

        let document: BTreeMap<String, serde_json::Value> = match serde_json::from_str(&raw) {
            Ok(document) => document,
            Err(e) => {
                error!("Metadata {} is not valid JSON: {}", self.path.display(), e);
                self.backup_corrupt();
                return MetadataMap::new();
            }
        };

        document
            .into_iter()
            .filter_map(|(key, value)| {
                let parsed = SessionId::parse(&key).and_then(|id| {
                    let mut entry = serde_json::from_value::<SessionMetadata>(value)?;
                    if entry.session_id != id {
                        return Err(Error::InvalidInput(format!(
                            "entry is for session {}",
                            entry.session_id
                        )));
                    }
                    if entry.name.trim().is_empty() {
                        entry.name = id.to_string();
                    }
                    Ok((id, entry))
                });
                match parsed {
                    Ok(pair) => Some(pair),
                    Err(e) => {
                        warn!("Skipping metadata entry {:?}: {}", key, e);
                        None
                    }
                }
            })
            .collect()
    }

    fn persist(&self, entries: &MetadataMap) {
        if let Err(e) = self.save(entries) {
            error!("Failed to write metadata {}: {}", self.path.display(), e);
        }
    }

    fn save(&self, entries: &MetadataMap) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        debug!("Wrote {} metadata entries", entries.len());
        Ok(())
    }

    fn backup_corrupt(&self) {
        let backup = self.path.with_extension("json.corrupt");
        match fs::copy(&self.path, &backup) {
            Ok(_) => warn!("Kept unreadable metadata at {}", backup.display()),
            Err(e) => warn!("Failed to back up unreadable metadata: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use linkhub_core::SessionStatus;

    fn id(raw: &str) -> SessionId {
        SessionId::parse(raw).unwrap()
    }

    fn store() -> (tempfile::TempDir, MetadataStore) {
        let tmp = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(tmp.path().join("data").join("sessions.json"));
        (tmp, store)
    }

    #[test]
    fn test_missing_file_reads_empty() {
        let (_tmp, store) = store();
        assert!(store.read().is_empty());
        assert!(store.is_empty());
    }

    #[test]
    fn test_update_creates_entry_and_directory() {
        let (_tmp, store) = store();
        let entry = store.update(&id("s1"), MetadataPatch::status(SessionStatus::QrReady));

        assert_eq!(entry.session_id, id("s1"));
        assert_eq!(entry.name, "s1");
        assert_eq!(entry.status, SessionStatus::QrReady);
        assert!(store.path().exists());
        assert_eq!(store.get(&id("s1")), Some(entry));
    }

    #[test]
    fn test_update_merges_and_preserves_created_at() {
        let (_tmp, store) = store();
        let first = store.update(&id("s1"), MetadataPatch::status(SessionStatus::Connecting));
        let second = store.update(
            &id("s1"),
            MetadataPatch::status(SessionStatus::Connected).with_phone_number("620000"),
        );

        assert_eq!(second.created_at, first.created_at);
        assert_eq!(second.phone_number.as_deref(), Some("620000"));
        assert_eq!(second.status, SessionStatus::Connected);

        let renamed = store.update(&id("s1"), MetadataPatch::name("Sales"));
        assert_eq!(renamed.name, "Sales");
        assert_eq!(renamed.phone_number.as_deref(), Some("620000"));
    }

    #[test]
    fn test_remove() {
        let (_tmp, store) = store();
        store.update(&id("s1"), MetadataPatch::default());
        store.update(&id("s2"), MetadataPatch::default());

        assert!(store.remove(&id("s1")).is_some());
        assert!(store.remove(&id("s1")).is_none());
        assert_eq!(store.read().keys().cloned().collect::<Vec<_>>(), vec![id("s2")]);
    }

    #[test]
    fn test_survives_reopen() {
        let (tmp, store) = store();
        store.update(
            &id("s1"),
            MetadataPatch::status(SessionStatus::Connected).with_name("Support"),
        );

        let reopened = MetadataStore::new(tmp.path().join("data").join("sessions.json"));
        let entry = reopened.get(&id("s1")).unwrap();
        assert_eq!(entry.name, "Support");
        assert_eq!(entry.status, SessionStatus::Connected);
    }

    #[test]
    fn test_corrupt_file_reads_empty_and_is_backed_up() {
        let (_tmp, store) = store();
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), "{not json").unwrap();

        assert!(store.read().is_empty());
        assert!(store.path().with_extension("json.corrupt").exists());
    }

    #[test]
    fn test_bad_entry_is_skipped() {
        let (_tmp, store) = store();
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(
            store.path(),
            r#"{
                "good": {"sessionId": "good", "name": "good", "status": "connected",
                         "createdAt": "2024-01-01T00:00:00Z"},
                "bad": {"status": 17}
            }"#,
        )
        .unwrap();

        let entries = store.read();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[&id("good")].status, SessionStatus::Connected);
    }

    #[test]
    fn test_missing_name_defaults_to_id() {
        let (_tmp, store) = store();
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(
            store.path(),
            r#"{
                "plain": {"sessionId": "plain", "status": "connected",
                          "createdAt": "2024-01-01T00:00:00Z"},
                "blank": {"sessionId": "blank", "name": " ", "status": "connected",
                          "createdAt": "2024-01-01T00:00:00Z"}
            }"#,
        )
        .unwrap();

        let entries = store.read();
        assert_eq!(entries[&id("plain")].name, "plain");
        assert_eq!(entries[&id("blank")].name, "blank");
    }

    #[test]
    fn test_entry_under_wrong_key_is_skipped() {
        let (_tmp, store) = store();
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(
            store.path(),
            r#"{
                "a": {"sessionId": "b", "name": "b", "status": "connected",
                      "createdAt": "2024-01-01T00:00:00Z"}
            }"#,
        )
        .unwrap();

        assert!(store.read().is_empty());
        assert!(!store.contains(&id("b")));
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let (_tmp, store) = store();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    store.update(&id(&format!("s{i}")), MetadataPatch::default());
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.len(), 8);
    }
}
