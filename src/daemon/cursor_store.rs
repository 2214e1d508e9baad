//! Crash-recoverable discovery cursors
//!
//! The state file is `{ lastSignatures, lastUpdated, version, pendingAccruals? }`.
//! Every write goes to a temp file first, the previous snapshot is copied to
//! `<state>.backup`, and the temp file is renamed over the state file.

use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use solana_sdk::{pubkey::Pubkey, signature::Signature};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::types::TrackedAsset;

pub const STATE_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode state: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Corrupt state file {}: {reason}", .path.display())]
    Corrupt { path: PathBuf, reason: String },
}

/// On-disk snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    pub last_signatures: BTreeMap<String, String>,
    pub last_updated: DateTime<Utc>,
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_accruals: Option<BTreeMap<String, u64>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub signature: Signature,
    /// Unknown for cursors restored from disk
    pub slot: Option<u64>,
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> PersistenceError + '_ {
    move |source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug)]
pub struct CursorStore {
    path: PathBuf,
    cursors: RwLock<HashMap<Pubkey, Cursor>>,
    restored_pending: RwLock<HashMap<Pubkey, u64>>,
    write_lock: tokio::sync::Mutex<()>,
}

impl CursorStore {
    /// Empty store writing to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cursors: RwLock::new(HashMap::new()),
            restored_pending: RwLock::new(HashMap::new()),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Load cursors for the configured assets.
    ///
    /// A missing file starts empty. An unreadable file falls back to the
    /// backup. A version mismatch discards the snapshot. Entries for assets
    /// that are no longer configured are dropped.
    pub fn open(path: impl Into<PathBuf>, assets: &[TrackedAsset]) -> Self {
        let store = Self::new(path);
        let snapshot = match Self::read_snapshot(&store.path) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "State file unreadable, trying backup");
                Self::read_snapshot(&store.backup_path()).unwrap_or_else(|e| {
                    warn!(error = %e, "Backup unreadable, starting without cursors");
                    None
                })
            }
        };

        let Some(snapshot) = snapshot else {
            info!(path = %store.path.display(), "No persisted state, starting fresh");
            return store;
        };

        if snapshot.version != STATE_VERSION {
            warn!(
                found = snapshot.version,
                expected = STATE_VERSION,
                "State file version mismatch, discarding snapshot"
            );
            return store;
        }

        let known: HashMap<String, Pubkey> = assets
            .iter()
            .map(|asset| (asset.mint.to_string(), asset.mint))
            .collect();

        {
            let mut cursors = store.cursors.write();
            for (mint, signature) in &snapshot.last_signatures {
                let Some(mint_key) = known.get(mint) else {
                    debug!(%mint, "Dropping cursor for asset no longer tracked");
                    continue;
                };
                match Signature::from_str(signature) {
                    Ok(signature) => {
                        cursors.insert(*mint_key, Cursor { signature, slot: None });
                    }
                    Err(e) => warn!(%mint, error = %e, "Ignoring malformed cursor"),
                }
            }
        }

        if let Some(pending) = &snapshot.pending_accruals {
            let mut restored = store.restored_pending.write();
            for (mint, amount) in pending {
                if let Some(mint_key) = known.get(mint) {
                    restored.insert(*mint_key, *amount);
                }
            }
        }

        info!(
            cursors = store.cursors.read().len(),
            last_updated = %snapshot.last_updated,
            "Restored persisted state"
        );
        store
    }

    /// Read and decode a snapshot; `None` when the file does not exist
    pub fn read_snapshot(path: &Path) -> Result<Option<PersistedState>, PersistenceError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err(path)(e)),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| PersistenceError::Corrupt {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_path(&self) -> PathBuf {
        with_suffix(&self.path, ".backup")
    }

    pub fn cursor(&self, mint: &Pubkey) -> Option<Signature> {
        self.cursors.read().get(mint).map(|c| c.signature)
    }

    /// Move the cursor forward. A cursor from an older slot than the current
    /// one is refused.
    pub fn advance(&self, mint: Pubkey, signature: Signature, slot: u64) -> bool {
        let mut cursors = self.cursors.write();
        if let Some(current) = cursors.get(&mint) {
            if current.signature == signature {
                return false;
            }
            if matches!(current.slot, Some(current_slot) if slot < current_slot) {
                warn!(%mint, slot, current = ?current.slot, "Refusing to move cursor backwards");
                return false;
            }
        }
        cursors.insert(
            mint,
            Cursor {
                signature,
                slot: Some(slot),
            },
        );
        true
    }

    /// Pending accruals restored from disk, handed out once
    pub fn take_restored_pending(&self) -> HashMap<Pubkey, u64> {
        std::mem::take(&mut *self.restored_pending.write())
    }

    fn build_snapshot(&self, pending: Option<&HashMap<Pubkey, u64>>) -> PersistedState {
        PersistedState {
            last_signatures: self
                .cursors
                .read()
                .iter()
                .map(|(mint, cursor)| (mint.to_string(), cursor.signature.to_string()))
                .collect(),
            last_updated: Utc::now(),
            version: STATE_VERSION,
            pending_accruals: pending.map(|pending| {
                pending
                    .iter()
                    .map(|(mint, amount)| (mint.to_string(), *amount))
                    .collect()
            }),
        }
    }

    /// Atomically rewrite the state file
    pub async fn persist(&self, pending: Option<&HashMap<Pubkey, u64>>) -> Result<(), PersistenceError> {
        let snapshot = self.build_snapshot(pending);
        let body = serde_json::to_vec_pretty(&snapshot)?;

        let _guard = self.write_lock.lock().await;
        let tmp = with_suffix(&self.path, ".tmp");

        let mut file = tokio::fs::File::create(&tmp).await.map_err(io_err(&tmp))?;
        file.write_all(&body).await.map_err(io_err(&tmp))?;
        file.sync_all().await.map_err(io_err(&tmp))?;
        drop(file);

        if tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            let backup = self.backup_path();
            tokio::fs::copy(&self.path, &backup)
                .await
                .map_err(io_err(&backup))?;
        }

        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(io_err(&self.path))?;

        debug!(
            path = %self.path.display(),
            cursors = snapshot.last_signatures.len(),
            "Persisted daemon state"
        );
        Ok(())
    }
}
