use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::LedgerConfig;
use crate::error::LedgerError;
use crate::models::Document;

mod maintenance;
pub(crate) mod migrate;

pub use maintenance::{CleanupReport, StoreStats};

/// File-backed store for the single ledger document.
///
/// The in-memory document is authoritative; the file trails it by at most
/// the autosave policy (change count or age of the oldest unsaved change).
/// All mutation goes through [`RecordStore::mutate`], which serializes
/// writers behind one lock.
#[derive(Debug, Clone)]
pub struct RecordStore {
    path: PathBuf,
    backup_dir: PathBuf,
    autosave_max_changes: u32,
    autosave_max_age: Duration,
    backup_retention_days: i64,
    state: Arc<RwLock<Document>>,
    dirty: Arc<AtomicU32>,
    last_save: Arc<Mutex<Instant>>,
    save_gate: Arc<tokio::sync::Mutex<()>>,
}

impl RecordStore {
    /// Loads (or initializes) the document at `config.file` and persists the
    /// normalized form right away, so a fresh ledger gets its initial file
    /// and a migrated one is rewritten in current shape.
    pub async fn open(config: &LedgerConfig) -> Result<Self, LedgerError> {
        if let Some(parent) = config.file.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|err| {
                    LedgerError::persistence(format!("creating {}: {err}", parent.display()))
                })?;
            }
        }

        let doc = load_document(&config.file).await?;
        let store = Self {
            path: config.file.clone(),
            backup_dir: config.backup_dir.clone(),
            autosave_max_changes: config.autosave_max_changes.max(1),
            autosave_max_age: config.autosave_max_age,
            backup_retention_days: config.backup_retention_days,
            state: Arc::new(RwLock::new(doc)),
            dirty: Arc::new(AtomicU32::new(0)),
            last_save: Arc::new(Mutex::new(Instant::now())),
            save_gate: Arc::new(tokio::sync::Mutex::new(())),
        };
        store.persist().await?;
        info!(file = %store.path.display(), "record store ready");
        Ok(store)
    }

    /// Read access against a consistent snapshot of the document.
    pub async fn with<T>(&self, f: impl FnOnce(&Document) -> T) -> T {
        let doc = self.state.read().await;
        f(&doc)
    }

    /// Runs one serialized mutation. The closure must validate before it
    /// touches state: on `Err` nothing is assumed changed and no dirty mark
    /// is recorded.
    pub async fn mutate<T>(
        &self,
        f: impl FnOnce(&mut Document) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let value = {
            let mut doc = self.state.write().await;
            f(&mut doc)?
        };
        self.mark_dirty().await;
        Ok(value)
    }

    /// Records one unsaved change and gives the autosave policy a chance to
    /// flush.
    pub async fn mark_dirty(&self) {
        self.dirty.fetch_add(1, Ordering::SeqCst);
        self.autosave_if_due().await;
    }

    /// Flushes when enough changes queued up or the oldest unsaved change is
    /// past the age bound. No-op with nothing to save. Save failures are
    /// logged and the changes stay queued for the next attempt.
    pub async fn autosave_if_due(&self) {
        let changes = self.dirty.load(Ordering::SeqCst);
        if changes == 0 {
            return;
        }
        let stale = self.last_save.lock().unwrap().elapsed() >= self.autosave_max_age;
        if changes >= self.autosave_max_changes || stale {
            if let Err(err) = self.persist().await {
                error!(error = %err, "autosave failed, changes remain queued");
            }
        }
    }

    /// Synchronous flush for shutdown and explicit admin action.
    pub async fn force_save(&self) -> Result<(), LedgerError> {
        self.persist().await
    }

    async fn persist(&self) -> Result<(), LedgerError> {
        // One write in flight at a time; mutations keep landing on the
        // in-memory document meanwhile and count toward the next save.
        let _gate = self.save_gate.lock().await;

        // Count first, snapshot second: every change counted here is in the
        // snapshot, and one that lands between the two keeps its count for
        // the next save.
        let pending = self.dirty.load(Ordering::SeqCst);
        let snapshot = {
            let mut doc = self.state.write().await;
            doc.refresh_metadata();
            doc.clone()
        };

        let bytes =
            serde_json::to_vec_pretty(&snapshot).map_err(LedgerError::persistence)?;

        if tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            let backup = sidecar_path(&self.path, "backup");
            if let Err(err) = tokio::fs::copy(&self.path, &backup).await {
                warn!(error = %err, "could not refresh the .backup sidecar");
            }
        }

        let tmp = self.path.with_extension(format!("{}.tmp", Uuid::new_v4()));
        tokio::fs::write(&tmp, &bytes).await.map_err(|err| {
            LedgerError::persistence(format!("writing {}: {err}", tmp.display()))
        })?;
        if let Err(err) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(LedgerError::persistence(format!(
                "replacing {}: {err}",
                self.path.display()
            )));
        }

        self.dirty.fetch_sub(pending, Ordering::SeqCst);
        *self.last_save.lock().unwrap() = Instant::now();
        debug!(bytes = bytes.len(), "ledger persisted");
        Ok(())
    }
}

/// Reads and parses the document. A missing file yields the empty schema; an
/// unparseable one is preserved as a `.corrupted_<timestamp>` sidecar and
/// replaced by the empty schema. Parsing itself is the schema merge: fields
/// absent from the file take their defaults, unknown keys are retained in
/// the document's `extra` map, and `normalize` repairs what serde cannot.
async fn load_document(path: &Path) -> Result<Document, LedgerError> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            info!(file = %path.display(), "no ledger file yet, starting with an empty schema");
            return Ok(Document::empty());
        }
        Err(err) => {
            return Err(LedgerError::persistence(format!(
                "reading {}: {err}",
                path.display()
            )));
        }
    };

    match serde_json::from_str::<Document>(&raw) {
        Ok(mut doc) => {
            let report = migrate::normalize(&mut doc);
            if !report.is_clean() {
                info!(?report, "normalized ledger document at load");
            }
            Ok(doc)
        }
        Err(err) => {
            warn!(error = %err, file = %path.display(), "ledger file is unreadable, reinitializing");
            quarantine(path).await;
            Ok(Document::empty())
        }
    }
}

/// Best-effort rename of a corrupted file to a timestamped sidecar. The
/// original bytes must survive; failing to rename only costs us that.
async fn quarantine(path: &Path) {
    let stamp = Utc::now().format("%Y%m%d_%H%M%S");
    let sidecar = sidecar_path(path, &format!("corrupted_{stamp}"));
    match tokio::fs::rename(path, &sidecar).await {
        Ok(()) => info!(sidecar = %sidecar.display(), "corrupted ledger file preserved"),
        Err(err) => warn!(error = %err, "could not preserve the corrupted ledger file"),
    }
}

/// `<file>.<suffix>` next to the main file, keeping the original extension.
fn sidecar_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".{suffix}"));
    PathBuf::from(name)
}
