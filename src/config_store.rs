//! On-disk document store: atomic writes, SHA-256 fingerprinting, timestamped
//! backups, an advisory lock file, and default-document seeding (spec §4.2).

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::document::Document;
use crate::validate::{self, ValidationErrors};

const PRIMARY_FILE: &str = "userdb.edn";
const SWAP_FILE: &str = "userdb.swp.edn";
const LOCK_FILE: &str = "userdb.edn.lock";
const BACKUP_DIR: &str = "backup";

#[derive(Debug, Error)]
pub enum ConfigStoreError {
    #[error("failed to read '{path}': {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to write '{path}': {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },

    /// Unparsable document on disk. Operator intervention required; the
    /// last backup is the recovery path (spec §7).
    #[error("'{path}' is not valid JSON: {message}")]
    Format { path: String, message: String },

    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    /// Mutation attempted while the lock is valid (spec §7 `LockHeld`).
    #[error("locked for {reason} until {human_expiry}")]
    LockHeld {
        reason: String,
        human_expiry: String,
    },
}

/// Result of reading the lock file (spec §4.2).
#[derive(Debug, Clone)]
pub struct LockState {
    pub locked: bool,
    pub reason: Option<String>,
    pub expires_at_ms: Option<i64>,
    pub human_expiry: Option<String>,
}

impl LockState {
    fn unlocked() -> Self {
        Self {
            locked: false,
            reason: None,
            expires_at_ms: None,
            human_expiry: None,
        }
    }
}

pub struct ConfigStore {
    db_folder: PathBuf,
}

impl ConfigStore {
    pub fn new(db_folder: impl Into<PathBuf>) -> Self {
        Self {
            db_folder: db_folder.into(),
        }
    }

    fn primary_path(&self) -> PathBuf {
        self.db_folder.join(PRIMARY_FILE)
    }

    fn swap_path(&self) -> PathBuf {
        self.db_folder.join(SWAP_FILE)
    }

    fn lock_path(&self) -> PathBuf {
        self.db_folder.join(LOCK_FILE)
    }

    fn backup_path(&self, epoch_millis: i64) -> PathBuf {
        self.db_folder
            .join(BACKUP_DIR)
            .join(format!("userdb{epoch_millis}.edn"))
    }

    /// Create `dbFolder` if missing and seed the default document if the
    /// primary file is absent (spec §4.2 seeding).
    pub async fn ensure_seeded(&self) -> Result<(), ConfigStoreError> {
        tokio::fs::create_dir_all(&self.db_folder)
            .await
            .map_err(|source| ConfigStoreError::Write {
                path: self.db_folder.display().to_string(),
                source,
            })?;

        let primary = self.primary_path();
        if tokio::fs::metadata(&primary).await.is_err() {
            let seed = Document::default_seed();
            let body = serde_json::to_string_pretty(&seed).expect("default seed serializes");
            tokio::fs::write(&primary, body)
                .await
                .map_err(|source| ConfigStoreError::Write {
                    path: primary.display().to_string(),
                    source,
                })?;
        }
        Ok(())
    }

    /// Read the primary document, compute its SHA-256, parse, validate, and
    /// attach the digest to the returned document.
    pub async fn read(&self) -> Result<Document, ConfigStoreError> {
        let path = self.primary_path();
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|source| ConfigStoreError::Read {
                path: path.display().to_string(),
                source,
            })?;

        let sha = hex_sha256(&bytes);

        let raw: serde_json::Value = serde_json::from_slice(&bytes).map_err(|e| ConfigStoreError::Format {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        // A misspelled or unknown key in a closed record (the document
        // itself, a room, a member) gets a humanized, did-you-mean
        // `ValidationError` here, ahead of whatever `Deserialize` would
        // otherwise report for it (spec §4.1).
        let shape_errors = validate::validate_raw_shape(&raw);
        if !shape_errors.is_empty() {
            return Err(ConfigStoreError::Validation(ValidationErrors(shape_errors)));
        }

        let mut document: Document = serde_json::from_value(raw).map_err(|e| ConfigStoreError::Format {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        validate::validate(&document)?;
        document.file_sha256 = Some(sha);
        Ok(document)
    }

    /// SHA-256 of the current on-disk bytes, without parsing. Used by the
    /// watcher to suppress no-op syncs.
    pub async fn current_sha(&self) -> Result<String, ConfigStoreError> {
        let path = self.primary_path();
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|source| ConfigStoreError::Read {
                path: path.display().to_string(),
                source,
            })?;
        Ok(hex_sha256(&bytes))
    }

    /// Strip the SHA, validate, back up the current file, then atomically
    /// replace the primary file with the canonical pretty-printed form.
    /// Returns the written document (SHA stripped, matching what's on disk).
    pub async fn write(&self, mut document: Document) -> Result<Document, ConfigStoreError> {
        document.file_sha256 = None;
        validate::validate(&document)?;

        self.backup_current().await?;

        let body = serde_json::to_string_pretty(&document).expect("document serializes");
        let swap = self.swap_path();
        tokio::fs::write(&swap, &body)
            .await
            .map_err(|source| ConfigStoreError::Write {
                path: swap.display().to_string(),
                source,
            })?;

        let primary = self.primary_path();
        if let Err(rename_err) = tokio::fs::rename(&swap, &primary).await {
            // Platforms lacking atomic rename (or cross-device moves): fall
            // back to copy-then-delete. Loses atomicity only under a crash
            // between the two steps, never under concurrent writers, since
            // the mutator's lock already serializes writers (spec §4.2/§7).
            tracing::warn!(
                error = %rename_err,
                "atomic rename failed, falling back to copy-then-delete"
            );
            tokio::fs::copy(&swap, &primary)
                .await
                .map_err(|source| ConfigStoreError::Write {
                    path: primary.display().to_string(),
                    source,
                })?;
            let _ = tokio::fs::remove_file(&swap).await;
        }

        Ok(document)
    }

    async fn backup_current(&self) -> Result<(), ConfigStoreError> {
        let primary = self.primary_path();
        let Ok(existing) = tokio::fs::read(&primary).await else {
            return Ok(()); // nothing to back up yet (first write / missing file)
        };

        let backup_dir = self.db_folder.join(BACKUP_DIR);
        tokio::fs::create_dir_all(&backup_dir)
            .await
            .map_err(|source| ConfigStoreError::Write {
                path: backup_dir.display().to_string(),
                source,
            })?;

        let epoch_millis = jiff::Timestamp::now().as_millisecond();
        let backup = self.backup_path(epoch_millis);
        tokio::fs::write(&backup, existing)
            .await
            .map_err(|source| ConfigStoreError::Write {
                path: backup.display().to_string(),
                source,
            })?;
        Ok(())
    }

    /// Acquire the advisory lock file. Does not check whether it's already
    /// held — callers must `read_lock` first (spec §4.2/§5: the lock is
    /// advisory, not enforced at the filesystem level).
    pub async fn lock(
        &self,
        reason: &str,
        timeout: std::time::Duration,
    ) -> Result<(), ConfigStoreError> {
        let expires_at_ms = jiff::Timestamp::now().as_millisecond() + timeout.as_millis() as i64;
        let human =
            jiff::Timestamp::from_millisecond(expires_at_ms).map_or_else(|_| "unknown".to_string(), |t| t.to_string());
        let body = format!("{reason}\n{expires_at_ms}\n{human}\n");
        tokio::fs::write(self.lock_path(), body)
            .await
            .map_err(|source| ConfigStoreError::Write {
                path: self.lock_path().display().to_string(),
                source,
            })
    }

    /// Read the lock file. A past expiry is automatically cleared as a side
    /// effect (spec §4.2).
    pub async fn read_lock(&self) -> Result<LockState, ConfigStoreError> {
        let path = self.lock_path();
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(LockState::unlocked()),
            Err(source) => {
                return Err(ConfigStoreError::Read {
                    path: path.display().to_string(),
                    source,
                });
            }
        };

        let mut lines = content.lines();
        let reason = lines.next().unwrap_or_default().to_string();
        let expires_at_ms: i64 = lines.next().and_then(|l| l.parse().ok()).unwrap_or(0);
        let human_expiry = lines.next().unwrap_or_default().to_string();

        let now_ms = jiff::Timestamp::now().as_millisecond();
        if expires_at_ms <= now_ms {
            self.clear_lock().await?;
            return Ok(LockState::unlocked());
        }

        Ok(LockState {
            locked: true,
            reason: Some(reason),
            expires_at_ms: Some(expires_at_ms),
            human_expiry: Some(human_expiry),
        })
    }

    pub async fn clear_lock(&self) -> Result<(), ConfigStoreError> {
        match tokio::fs::remove_file(self.lock_path()).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(ConfigStoreError::Write {
                path: self.lock_path().display().to_string(),
                source,
            }),
        }
    }
}

fn hex_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Filesystem path helpers shared with the watcher, so it can recognize
/// events for the primary document without duplicating the layout.
pub fn primary_file_name() -> &'static str {
    PRIMARY_FILE
}

pub fn is_primary_document(path: &Path) -> bool {
    path.file_name().and_then(|n| n.to_str()) == Some(PRIMARY_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{GroupKey, Room};

    #[tokio::test]
    async fn ensure_seeded_creates_folder_and_default_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("nested"));
        store.ensure_seeded().await.unwrap();

        let doc = store.read().await.unwrap();
        assert!(doc.groups.contains_key(&GroupKey::owner()));
        assert!(doc.groups.contains_key(&GroupKey::bot()));
    }

    #[tokio::test]
    async fn read_attaches_sha_and_write_strips_it() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        store.ensure_seeded().await.unwrap();

        let doc = store.read().await.unwrap();
        assert!(doc.file_sha256.is_some());

        let written = store.write(doc).await.unwrap();
        assert!(written.file_sha256.is_none());
    }

    #[tokio::test]
    async fn write_creates_timestamped_backup() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        store.ensure_seeded().await.unwrap();

        let doc = store.read().await.unwrap();
        store.write(doc).await.unwrap();

        let backups: Vec<_> = std::fs::read_dir(dir.path().join("backup"))
            .unwrap()
            .collect();
        assert_eq!(backups.len(), 1);
    }

    #[tokio::test]
    async fn write_rejects_invalid_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        store.ensure_seeded().await.unwrap();

        let mut doc = store.read().await.unwrap();
        doc.groups.remove(&GroupKey::owner());
        let err = store.write(doc).await.unwrap_err();
        assert!(matches!(err, ConfigStoreError::Validation(_)));
    }

    #[tokio::test]
    async fn read_reports_a_misspelled_key_with_a_suggestion() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        store.ensure_seeded().await.unwrap();

        tokio::fs::write(
            store.primary_path(),
            r#"{"group": {"group/owner": "Owner", "group/bot": "Bot"}, "rooms": [], "members": []}"#,
        )
        .await
        .unwrap();

        let err = store.read().await.unwrap_err();
        match err {
            ConfigStoreError::Validation(errors) => {
                assert!(errors.0.iter().any(|e| e.message.contains("did you mean 'groups'")));
            }
            other => panic!("expected a Validation error with a suggestion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn round_trip_preserves_room_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        store.ensure_seeded().await.unwrap();

        let mut doc = store.read().await.unwrap();
        for name in ["Zeta", "Alpha", "Middle"] {
            doc.rooms.push(Room {
                name: name.to_string(),
                room_id: None,
                members: [GroupKey::owner()].into_iter().collect(),
                admins: [GroupKey::owner()].into_iter().collect(),
                only_admins_can_speak: false,
            });
        }
        store.write(doc).await.unwrap();

        let reloaded = store.read().await.unwrap();
        let names: Vec<_> = reloaded.rooms.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Zeta", "Alpha", "Middle"]);
    }

    #[tokio::test]
    async fn expired_lock_is_cleared_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        store.ensure_seeded().await.unwrap();

        store
            .lock("test", std::time::Duration::from_millis(0))
            .await
            .unwrap();
        // Expiry is "now"; a read a few milliseconds later must see it as expired.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let state = store.read_lock().await.unwrap();
        assert!(!state.locked);
        assert!(tokio::fs::metadata(store.lock_path()).await.is_err());
    }

    #[tokio::test]
    async fn unexpired_lock_reports_locked() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        store.ensure_seeded().await.unwrap();

        store
            .lock("busy", std::time::Duration::from_secs(60))
            .await
            .unwrap();
        let state = store.read_lock().await.unwrap();
        assert!(state.locked);
        assert_eq!(state.reason.as_deref(), Some("busy"));
    }
}
