//! Metadata store — the durable `id -> FileRecord` mapping.
//!
//! Two backends satisfy the same contract:
//! - [`SnapshotStore`]: the whole mapping in memory behind one lock, persisted
//!   as a single JSON snapshot on every write.
//! - [`SqliteStore`]: one row per record in an embedded SQLite database.
//!
//! Both are insert-only: `register` never overwrites an existing id.

use crate::{models::file_record::FileRecord, services::sqlite_store::SqliteStore};
use chrono::Utc;
use std::{
    collections::HashMap,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
    sync::RwLock,
};
use tracing::{debug, error, info};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("id `{0}` is already registered")]
    DuplicateId(String),
    #[error("failed to serialize metadata snapshot: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Handle to whichever metadata backend the service was configured with.
#[derive(Clone)]
pub enum MetadataStore {
    Snapshot(Arc<SnapshotStore>),
    Sqlite(SqliteStore),
}

impl MetadataStore {
    /// Look up a record by id.
    pub async fn get(&self, id: &str) -> StoreResult<Option<FileRecord>> {
        match self {
            MetadataStore::Snapshot(store) => Ok(store.get(id).await),
            MetadataStore::Sqlite(store) => store.get(id).await,
        }
    }

    /// Whether `id` is already taken.
    pub async fn contains(&self, id: &str) -> StoreResult<bool> {
        Ok(self.get(id).await?.is_some())
    }

    /// Durably insert a new record. Fails with `DuplicateId` instead of
    /// overwriting.
    pub async fn register(&self, record: FileRecord) -> StoreResult<()> {
        match self {
            MetadataStore::Snapshot(store) => store.register(record).await,
            MetadataStore::Sqlite(store) => store.register(record).await,
        }
    }

    /// Number of registered records.
    pub async fn len(&self) -> StoreResult<usize> {
        match self {
            MetadataStore::Snapshot(store) => Ok(store.len().await),
            MetadataStore::Sqlite(store) => store.len().await,
        }
    }

    /// Readiness probe for the durable location.
    pub async fn ping(&self) -> StoreResult<()> {
        match self {
            MetadataStore::Snapshot(store) => store.ping().await,
            MetadataStore::Sqlite(store) => store.ping().await,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            MetadataStore::Snapshot(_) => "json",
            MetadataStore::Sqlite(_) => "sqlite",
        }
    }
}

/// In-memory mapping persisted as one JSON document.
///
/// Readers share the read lock. `register` holds the write lock across
/// clone, insert, save and commit, so concurrent uploads are serialized and
/// the in-memory view only changes once the snapshot is on disk.
///
/// Every write rewrites the whole snapshot, which is O(n) in the number of
/// records. Use the SQLite backend when that stops being cheap.
pub struct SnapshotStore {
    path: PathBuf,
    records: RwLock<HashMap<String, FileRecord>>,
}

impl SnapshotStore {
    /// Open the snapshot at `path`, creating its parent directory if needed.
    pub async fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let records = load(&path).await;
        info!(
            path = %path.display(),
            records = records.len(),
            "loaded metadata snapshot"
        );
        Ok(Self {
            path,
            records: RwLock::new(records),
        })
    }

    pub async fn get(&self, id: &str) -> Option<FileRecord> {
        self.records.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn register(&self, record: FileRecord) -> StoreResult<()> {
        let mut guard = self.records.write().await;
        if guard.contains_key(&record.id) {
            return Err(StoreError::DuplicateId(record.id));
        }

        let mut next = guard.clone();
        next.insert(record.id.clone(), record);
        save(&self.path, &next).await?;
        *guard = next;
        Ok(())
    }

    /// Confirm the snapshot directory is still writable.
    pub async fn ping(&self) -> StoreResult<()> {
        let dir = snapshot_dir(&self.path);
        let probe = dir.join(format!(".probe-{}", Uuid::new_v4()));
        fs::write(&probe, b"ok").await?;
        fs::remove_file(&probe).await?;
        Ok(())
    }
}

fn snapshot_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Read the persisted snapshot.
///
/// Never fails the caller. A missing file is an empty store. A file that
/// cannot be read or parsed is moved aside to `<path>.corrupt-<unix-ts>` and
/// logged as an error, so the previous metadata is kept for inspection
/// rather than overwritten by the next save.
pub async fn load(path: &Path) -> HashMap<String, FileRecord> {
    let raw = match fs::read(path).await {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "no metadata snapshot yet");
            return HashMap::new();
        }
        Err(err) => {
            error!(path = %path.display(), error = %err, "metadata snapshot unreadable");
            quarantine(path).await;
            return HashMap::new();
        }
    };

    match serde_json::from_slice::<HashMap<String, FileRecord>>(&raw) {
        Ok(records) => records,
        Err(err) => {
            error!(path = %path.display(), error = %err, "metadata snapshot is corrupt");
            quarantine(path).await;
            HashMap::new()
        }
    }
}

async fn quarantine(path: &Path) {
    let mut target = path.as_os_str().to_owned();
    target.push(format!(".corrupt-{}", Utc::now().timestamp()));
    let target = PathBuf::from(target);
    match fs::rename(path, &target).await {
        Ok(()) => error!(
            from = %path.display(),
            to = %target.display(),
            "moved unreadable metadata snapshot aside"
        ),
        Err(err) => error!(
            path = %path.display(),
            error = %err,
            "could not move unreadable metadata snapshot aside"
        ),
    }
}

/// Replace the snapshot with `records`.
///
/// Writes a sibling temp file, syncs it and renames it over the snapshot,
/// so a crash leaves either the old or the new snapshot, never half of one.
pub async fn save(path: &Path, records: &HashMap<String, FileRecord>) -> StoreResult<()> {
    let body = serde_json::to_vec_pretty(records)?;
    let tmp_path = snapshot_dir(path).join(format!(".snapshot-{}.tmp", Uuid::new_v4()));

    let written = async {
        let mut file = File::create(&tmp_path).await?;
        file.write_all(&body).await?;
        file.flush().await?;
        file.sync_all().await?;
        fs::rename(&tmp_path, path).await
    }
    .await;

    if let Err(err) = written {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(StoreError::Io(err));
    }
    Ok(())
}
