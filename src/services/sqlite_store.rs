//! SQLite-backed metadata store: one row per `FileRecord`.

use crate::{
    models::file_record::FileRecord,
    services::metadata_store::{StoreError, StoreResult},
};
use chrono::{DateTime, Utc};
use sqlx::{
    Row, SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
};
use std::{path::Path, str::FromStr, sync::Arc};
use tracing::{debug, info};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS files (
    id              TEXT PRIMARY KEY NOT NULL,
    stored_filename TEXT NOT NULL,
    original_name   TEXT NOT NULL,
    mime_type       TEXT NOT NULL,
    size_bytes      INTEGER NOT NULL,
    uploaded_at     TEXT NOT NULL,
    public_url      TEXT NOT NULL
)
"#;

#[derive(Clone)]
pub struct SqliteStore {
    /// Shared SQLite connection pool.
    pub db: Arc<SqlitePool>,
}

impl SqliteStore {
    /// Connect to `database_url`, creating the database file and the
    /// `files` table when they do not exist yet.
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let db_path = database_url
            .trim_start_matches("sqlite://")
            .trim_start_matches("sqlite:")
            .trim_start_matches("file:");
        debug!("Interpreted SQLite path => {}", db_path);

        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
                info!("Created missing directory {:?}", parent);
            }
        }

        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    /// Wrap an existing pool and make sure the schema is present.
    pub async fn from_pool(pool: SqlitePool) -> StoreResult<Self> {
        sqlx::query(SCHEMA).execute(&pool).await?;
        Ok(Self { db: Arc::new(pool) })
    }

    pub async fn get(&self, id: &str) -> StoreResult<Option<FileRecord>> {
        let row = sqlx::query(
            "SELECT id, stored_filename, original_name, mime_type, size_bytes,
                    uploaded_at, public_url
             FROM files WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&*self.db)
        .await?;

        row.map(|row| record_from_row(&row)).transpose()
    }

    pub async fn register(&self, record: FileRecord) -> StoreResult<()> {
        let size_bytes = i64::try_from(record.size_bytes).map_err(|_| {
            StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "size does not fit in an SQLite integer",
            ))
        })?;

        let result = sqlx::query(
            "INSERT INTO files (
                id, stored_filename, original_name, mime_type, size_bytes,
                uploaded_at, public_url
             ) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.stored_filename)
        .bind(&record.original_name)
        .bind(&record.mime_type)
        .bind(size_bytes)
        .bind(record.uploaded_at)
        .bind(&record.public_url)
        .execute(&*self.db)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(StoreError::DuplicateId(record.id)),
            Err(err) => Err(StoreError::Sqlx(err)),
        }
    }

    pub async fn len(&self) -> StoreResult<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files")
            .fetch_one(&*self.db)
            .await?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    pub async fn ping(&self) -> StoreResult<()> {
        let one: i64 = sqlx::query_scalar("SELECT 1").fetch_one(&*self.db).await?;
        if one == 1 {
            Ok(())
        } else {
            Err(StoreError::Io(std::io::Error::other(format!(
                "unexpected result: {}",
                one
            ))))
        }
    }
}

fn record_from_row(row: &SqliteRow) -> StoreResult<FileRecord> {
    let size_bytes: i64 = row.try_get("size_bytes")?;
    let uploaded_at: DateTime<Utc> = row.try_get("uploaded_at")?;
    Ok(FileRecord {
        id: row.try_get("id")?,
        stored_filename: row.try_get("stored_filename")?,
        original_name: row.try_get("original_name")?,
        mime_type: row.try_get("mime_type")?,
        size_bytes: u64::try_from(size_bytes).unwrap_or(0),
        uploaded_at,
        public_url: row.try_get("public_url")?,
    })
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_store() -> SqliteStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        SqliteStore::from_pool(pool).await.unwrap()
    }

    fn record(id: &str, size_bytes: u64) -> FileRecord {
        FileRecord {
            id: id.to_string(),
            stored_filename: format!("{}.png", id),
            original_name: "cat.png".into(),
            mime_type: "image/png".into(),
            size_bytes,
            uploaded_at: Utc::now(),
            public_url: format!("http://localhost/{}", id),
        }
    }

    #[tokio::test]
    async fn register_then_get() {
        let store = memory_store().await;
        store.register(record("abc", 42)).await.unwrap();

        let found = store.get("abc").await.unwrap().expect("row present");
        assert_eq!(found.stored_filename, "abc.png");
        assert_eq!(found.size_bytes, 42);
        assert_eq!(store.len().await.unwrap(), 1);
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() {
        let store = memory_store().await;
        store.register(record("abc", 1)).await.unwrap();
        let err = store.register(record("abc", 2)).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateId(id) if id == "abc"));
        assert_eq!(store.get("abc").await.unwrap().unwrap().size_bytes, 1);
    }

    #[tokio::test]
    async fn ping_succeeds_on_open_pool() {
        let store = memory_store().await;
        store.ping().await.unwrap();
    }
}
