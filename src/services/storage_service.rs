//! src/services/storage_service.rs
//!
//! StorageService — the upload-and-register flow and file retrieval.
//! Payload bytes live flat in the content directory as `<id>[.<ext>]`;
//! metadata lives in the configured [`MetadataStore`].
//!
//! Consistency order for uploads: the file is published first, then the
//! record is registered. If registration fails the published file is
//! removed, so neither survives without the other.

use crate::{
    models::{
        file_record::{FileRecord, display_name, stored_filename},
        file_type::{category_of, normalize_mime},
    },
    services::{
        id_service::{IdGenerator, RandomIdGenerator, is_safe_id},
        metadata_store::{MetadataStore, StoreError},
    },
};
use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt, pin_mut};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("file `{0}` not found")]
    NotFound(String),
    #[error("`{0}` is not a valid file id")]
    InvalidId(String),
    #[error("file type `{0}` is not allowed")]
    UnsupportedType(String),
    #[error("payload exceeds {limit} bytes")]
    PayloadTooLarge { limit: u64 },
    #[error("malformed upload: {0}")]
    MalformedUpload(String),
    #[error("no free id after {0} attempts")]
    IdSpaceExhausted(usize),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Client-declared attributes of an incoming upload.
#[derive(Debug, Clone)]
pub struct NewUpload {
    /// Filename from the multipart field, untrusted.
    pub original_name: String,
    /// Content type from the multipart field, untrusted.
    pub mime_type: String,
    /// Scheme and host the public URL is built from, e.g. `http://host:3000`.
    pub public_base: String,
}

/// Prefix of in-flight upload files inside the content directory.
const PARTIAL_PREFIX: &str = ".upload-";
const PARTIAL_SUFFIX: &str = ".part";
const MAX_ID_ATTEMPTS: usize = 5;

#[derive(Clone)]
pub struct StorageService {
    /// Registered file records.
    pub store: MetadataStore,

    /// Content directory holding one file per record.
    pub base_path: PathBuf,

    /// Largest accepted payload, in bytes.
    pub max_upload_bytes: u64,

    ids: Arc<dyn IdGenerator>,
}

impl StorageService {
    pub fn new(store: MetadataStore, base_path: impl Into<PathBuf>, max_upload_bytes: u64) -> Self {
        Self::with_id_generator(store, base_path, max_upload_bytes, Arc::new(RandomIdGenerator))
    }

    pub fn with_id_generator(
        store: MetadataStore,
        base_path: impl Into<PathBuf>,
        max_upload_bytes: u64,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            store,
            base_path: base_path.into(),
            max_upload_bytes,
            ids,
        }
    }

    fn file_path(&self, stored_filename: &str) -> PathBuf {
        self.base_path.join(stored_filename)
    }

    /// Validate, persist and register one upload.
    ///
    /// - Rejects undeclared or disallowed types before touching the disk.
    /// - Streams bytes into a temp file in the content directory, counting
    ///   them; exceeding `max_upload_bytes` aborts and removes the temp file.
    /// - Publishes the temp file under a fresh id without clobbering
    ///   anything, then registers the record.
    pub async fn store_upload<S>(&self, upload: NewUpload, stream: S) -> StorageResult<FileRecord>
    where
        S: Stream<Item = Result<Bytes, StorageError>>,
    {
        let mime_type = normalize_mime(&upload.mime_type);
        let Some(category) = category_of(&mime_type) else {
            return Err(StorageError::UnsupportedType(mime_type));
        };
        let original_name = display_name(&upload.original_name);

        fs::create_dir_all(&self.base_path).await?;
        let tmp_path = self.base_path.join(format!(
            "{}{}{}",
            PARTIAL_PREFIX,
            Uuid::new_v4(),
            PARTIAL_SUFFIX
        ));

        let size_bytes = match self.write_partial(&tmp_path, stream).await {
            Ok(size) => size,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(err);
            }
        };

        for attempt in 1..=MAX_ID_ATTEMPTS {
            let id = self.ids.generate();
            if !is_safe_id(&id) {
                warn!(id = %id, "id generator produced an unsafe id");
                continue;
            }
            match self.store.contains(&id).await {
                Ok(false) => {}
                Ok(true) => {
                    debug!(id = %id, attempt, "id already registered, retrying");
                    continue;
                }
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(err.into());
                }
            }

            let stored = stored_filename(&id, &original_name);
            let file_path = self.file_path(&stored);
            match publish(&tmp_path, &file_path).await {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    debug!(path = %file_path.display(), attempt, "stored name taken, retrying");
                    continue;
                }
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(err.into());
                }
            }

            let record = FileRecord {
                public_url: format!("{}/{}", upload.public_base.trim_end_matches('/'), id),
                id,
                stored_filename: stored,
                original_name: original_name.clone(),
                mime_type: mime_type.clone(),
                size_bytes,
                uploaded_at: Utc::now(),
            };

            match self.store.register(record.clone()).await {
                Ok(()) => {
                    info!(
                        id = %record.id,
                        size = record.size_bytes,
                        mime = %record.mime_type,
                        category = %category,
                        "registered upload"
                    );
                    return Ok(record);
                }
                Err(StoreError::DuplicateId(id)) => {
                    // Lost a race for the id; take the payload back and retry.
                    debug!(id = %id, attempt, "id registered concurrently, retrying");
                    fs::rename(&file_path, &tmp_path).await?;
                }
                Err(err) => {
                    if let Err(cleanup) = fs::remove_file(&file_path).await {
                        warn!(
                            path = %file_path.display(),
                            error = %cleanup,
                            "could not remove file after metadata failure"
                        );
                    }
                    return Err(err.into());
                }
            }
        }

        let _ = fs::remove_file(&tmp_path).await;
        Err(StorageError::IdSpaceExhausted(MAX_ID_ATTEMPTS))
    }

    /// Stream `stream` into `tmp_path`, returning the byte count.
    /// The caller removes `tmp_path` on error.
    async fn write_partial<S>(&self, tmp_path: &Path, stream: S) -> StorageResult<u64>
    where
        S: Stream<Item = Result<Bytes, StorageError>>,
    {
        let mut file = File::create(tmp_path).await?;
        let mut size_bytes: u64 = 0;
        pin_mut!(stream);
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            size_bytes += chunk.len() as u64;
            if size_bytes > self.max_upload_bytes {
                return Err(StorageError::PayloadTooLarge {
                    limit: self.max_upload_bytes,
                });
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        file.sync_all().await?;
        Ok(size_bytes)
    }

    /// Fetch the record for a request-supplied id.
    pub async fn get_record(&self, id: &str) -> StorageResult<FileRecord> {
        if !is_safe_id(id) {
            return Err(StorageError::InvalidId(id.to_string()));
        }
        self.store
            .get(id)
            .await?
            .ok_or_else(|| StorageError::NotFound(id.to_string()))
    }

    /// Fetch a record and open its payload for streaming out.
    ///
    /// A record whose file has gone missing is reported as not found.
    pub async fn open_file(&self, id: &str) -> StorageResult<(FileRecord, File)> {
        let record = self.get_record(id).await?;
        let file = File::open(self.file_path(&record.stored_filename))
            .await
            .map_err(|err| {
                if err.kind() == ErrorKind::NotFound {
                    warn!(id = %id, "record has no file on disk");
                    StorageError::NotFound(id.to_string())
                } else {
                    StorageError::Io(err)
                }
            })?;
        Ok((record, file))
    }

    /// Remove partial uploads left behind by a previous process.
    pub async fn sweep_partials(&self) -> StorageResult<usize> {
        let mut removed = 0;
        let mut entries = match fs::read_dir(&self.base_path).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(PARTIAL_PREFIX) && name.ends_with(PARTIAL_SUFFIX) {
                match fs::remove_file(entry.path()).await {
                    Ok(()) => removed += 1,
                    Err(err) => debug!("failed to remove partial upload {}: {}", name, err),
                }
            }
        }
        if removed > 0 {
            info!(removed, "removed stale partial uploads");
        }
        Ok(removed)
    }
}

/// Move `tmp` to `target` without ever replacing an existing `target`.
///
/// Hard-linking fails atomically when `target` exists. Filesystems without
/// hard links fall back to an existence check plus rename.
async fn publish(tmp: &Path, target: &Path) -> io::Result<()> {
    match fs::hard_link(tmp, target).await {
        Ok(()) => {
            if let Err(err) = fs::remove_file(tmp).await {
                debug!("failed to remove temp file {}: {}", tmp.display(), err);
            }
            Ok(())
        }
        Err(err) if err.kind() == ErrorKind::AlreadyExists => Err(err),
        Err(err) => {
            debug!("hard link unavailable ({}), falling back to rename", err);
            rename_no_clobber(tmp, target).await
        }
    }
}

/// Rename that refuses to replace an existing `target`.
async fn rename_no_clobber(tmp: &Path, target: &Path) -> io::Result<()> {
    if fs::try_exists(target).await? {
        return Err(io::Error::from(ErrorKind::AlreadyExists));
    }
    fs::rename(tmp, target).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::metadata_store::SnapshotStore;
    use futures::stream;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Hands out a fixed sequence of ids, then repeats the last one.
    struct ScriptedIds(Mutex<Vec<&'static str>>);

    impl IdGenerator for ScriptedIds {
        fn generate(&self) -> String {
            let mut ids = self.0.lock().unwrap();
            if ids.len() > 1 {
                ids.remove(0).to_string()
            } else {
                ids[0].to_string()
            }
        }
    }

    async fn service(dir: &TempDir, max: u64) -> StorageService {
        let store = SnapshotStore::open(dir.path().join("meta/files.json"))
            .await
            .unwrap();
        StorageService::new(
            MetadataStore::Snapshot(Arc::new(store)),
            dir.path().join("files"),
            max,
        )
    }

    fn upload(name: &str, mime: &str) -> NewUpload {
        NewUpload {
            original_name: name.into(),
            mime_type: mime.into(),
            public_base: "http://localhost:3000/".into(),
        }
    }

    fn body(chunks: &[&'static [u8]]) -> impl Stream<Item = Result<Bytes, StorageError>> {
        stream::iter(
            chunks
                .iter()
                .map(|c| Ok(Bytes::from_static(c)))
                .collect::<Vec<_>>(),
        )
    }

    async fn visible_files(dir: &Path) -> Vec<String> {
        let mut names = Vec::new();
        if let Ok(mut entries) = fs::read_dir(dir).await {
            while let Some(entry) = entries.next_entry().await.unwrap() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names
    }

    #[tokio::test]
    async fn stores_file_and_registers_record() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir, 1024).await;

        let record = svc
            .store_upload(upload("notes.txt", "text/plain"), body(&[b"hello ", b"world!"]))
            .await
            .unwrap();

        assert_eq!(record.size_bytes, 12);
        assert_eq!(record.original_name, "notes.txt");
        assert_eq!(record.stored_filename, format!("{}.txt", record.id));
        assert_eq!(record.public_url, format!("http://localhost:3000/{}", record.id));

        let on_disk = fs::read(svc.base_path.join(&record.stored_filename))
            .await
            .unwrap();
        assert_eq!(on_disk, b"hello world!");
        assert_eq!(svc.get_record(&record.id).await.unwrap(), record);
        assert_eq!(visible_files(&svc.base_path).await.len(), 1);
    }

    #[tokio::test]
    async fn unsupported_type_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir, 1024).await;

        let err = svc
            .store_upload(upload("a.out", "application/x-executable"), body(&[b"\x7fELF"]))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::UnsupportedType(_)));
        assert!(visible_files(&svc.base_path).await.is_empty());
        assert_eq!(svc.store.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn oversized_payload_is_discarded() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir, 8).await;

        let err = svc
            .store_upload(upload("big.txt", "text/plain"), body(&[b"12345", b"67890"]))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::PayloadTooLarge { limit: 8 }));
        assert!(visible_files(&svc.base_path).await.is_empty());
        assert_eq!(svc.store.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn payload_at_limit_is_accepted() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir, 10).await;
        let record = svc
            .store_upload(upload("ten.txt", "text/plain"), body(&[b"0123456789"]))
            .await
            .unwrap();
        assert_eq!(record.size_bytes, 10);
    }

    #[tokio::test]
    async fn empty_payload_is_accepted() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir, 10).await;
        let record = svc
            .store_upload(upload("blank.png", "image/png"), body(&[]))
            .await
            .unwrap();
        assert_eq!(record.size_bytes, 0);
        let (_, file) = svc.open_file(&record.id).await.unwrap();
        assert_eq!(file.metadata().await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn stream_errors_leave_no_partial_file() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir, 1024).await;

        let failing = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(StorageError::MalformedUpload("connection reset".into())),
        ]);
        let err = svc
            .store_upload(upload("x.txt", "text/plain"), failing)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::MalformedUpload(_)));
        assert!(visible_files(&svc.base_path).await.is_empty());
    }

    #[tokio::test]
    async fn colliding_id_is_retried_without_overwrite() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(dir.path().join("files.json"))
            .await
            .unwrap();
        let svc = StorageService::with_id_generator(
            MetadataStore::Snapshot(Arc::new(store)),
            dir.path().join("files"),
            1024,
            Arc::new(ScriptedIds(Mutex::new(vec!["first", "first", "second"]))),
        );

        let a = svc
            .store_upload(upload("a.txt", "text/plain"), body(&[b"aaa"]))
            .await
            .unwrap();
        let b = svc
            .store_upload(upload("b.txt", "text/plain"), body(&[b"bbb"]))
            .await
            .unwrap();

        assert_eq!(a.id, "first");
        assert_eq!(b.id, "second");
        assert_eq!(fs::read(svc.base_path.join("first.txt")).await.unwrap(), b"aaa");
        assert_eq!(fs::read(svc.base_path.join("second.txt")).await.unwrap(), b"bbb");
    }

    #[tokio::test]
    async fn exhausted_ids_clean_up() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(dir.path().join("files.json"))
            .await
            .unwrap();
        let svc = StorageService::with_id_generator(
            MetadataStore::Snapshot(Arc::new(store)),
            dir.path().join("files"),
            1024,
            Arc::new(ScriptedIds(Mutex::new(vec!["only"]))),
        );

        svc.store_upload(upload("a.txt", "text/plain"), body(&[b"a"]))
            .await
            .unwrap();
        let err = svc
            .store_upload(upload("b.txt", "text/plain"), body(&[b"b"]))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::IdSpaceExhausted(_)));
        assert_eq!(visible_files(&svc.base_path).await, vec!["only.txt".to_string()]);
    }

    #[tokio::test]
    async fn lookups_reject_unsafe_and_unknown_ids() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir, 1024).await;

        assert!(matches!(
            svc.get_record("../meta").await,
            Err(StorageError::InvalidId(_))
        ));
        assert!(matches!(
            svc.open_file("nope").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn publish_never_replaces_existing_files() {
        let dir = TempDir::new().unwrap();
        let tmp = dir.path().join(".upload-x.part");
        let target = dir.path().join("taken.txt");
        fs::write(&tmp, b"new").await.unwrap();
        fs::write(&target, b"old").await.unwrap();

        let err = publish(&tmp, &target).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        let err = rename_no_clobber(&tmp, &target).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);

        assert_eq!(fs::read(&target).await.unwrap(), b"old");
        assert_eq!(fs::read(&tmp).await.unwrap(), b"new");
    }

    #[tokio::test]
    async fn rename_fallback_moves_payload() {
        let dir = TempDir::new().unwrap();
        let tmp = dir.path().join(".upload-y.part");
        let target = dir.path().join("free.txt");
        fs::write(&tmp, b"payload").await.unwrap();

        rename_no_clobber(&tmp, &target).await.unwrap();

        assert_eq!(fs::read(&target).await.unwrap(), b"payload");
        assert!(!fs::try_exists(&tmp).await.unwrap());
    }

    #[tokio::test]
    async fn sweep_removes_only_partials() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir, 1024).await;
        fs::create_dir_all(&svc.base_path).await.unwrap();
        fs::write(svc.base_path.join(".upload-dead.part"), b"x")
            .await
            .unwrap();
        fs::write(svc.base_path.join("keep.txt"), b"y").await.unwrap();

        assert_eq!(svc.sweep_partials().await.unwrap(), 1);
        assert_eq!(visible_files(&svc.base_path).await, vec!["keep.txt".to_string()]);
    }
}
