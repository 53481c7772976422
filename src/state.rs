//! Shared application state handed to every handler.

use crate::{
    config::{AppConfig, MetadataBackend},
    middleware::rate_limit::SlidingWindowLimiter,
    services::{
        metadata_store::{MetadataStore, SnapshotStore},
        sqlite_store::SqliteStore,
        storage_service::StorageService,
    },
};
use anyhow::{Context, Result};
use std::{sync::Arc, time::Duration};
use tokio::fs;

#[derive(Clone)]
pub struct AppState {
    pub storage: StorageService,
    pub upload_limiter: Arc<SlidingWindowLimiter>,
    /// Configured base for public URLs; derived from `Host` when unset.
    pub public_base_url: Option<String>,
    /// Host used in public URLs when the request carries no usable `Host`.
    pub fallback_host: String,
    pub trust_proxy: bool,
}

impl AppState {
    /// Open the metadata backend and content directory described by `cfg`.
    pub async fn build(cfg: &AppConfig) -> Result<Self> {
        fs::create_dir_all(&cfg.content_dir)
            .await
            .with_context(|| format!("creating content directory {}", cfg.content_dir))?;

        let store = match cfg.metadata_backend {
            MetadataBackend::Json => {
                let snapshot = SnapshotStore::open(&cfg.metadata_path)
                    .await
                    .with_context(|| format!("opening metadata snapshot {}", cfg.metadata_path))?;
                MetadataStore::Snapshot(Arc::new(snapshot))
            }
            MetadataBackend::Sqlite => {
                let sqlite = SqliteStore::connect(&cfg.database_url)
                    .await
                    .with_context(|| format!("opening metadata database {}", cfg.database_url))?;
                MetadataStore::Sqlite(sqlite)
            }
        };

        let storage = StorageService::new(store, &cfg.content_dir, cfg.max_upload_bytes);
        storage
            .sweep_partials()
            .await
            .context("removing stale partial uploads")?;

        Ok(Self {
            storage,
            upload_limiter: Arc::new(SlidingWindowLimiter::new(
                cfg.rate_limit_max,
                Duration::from_secs(cfg.rate_limit_window_secs),
            )),
            public_base_url: cfg.public_base_url.clone(),
            fallback_host: cfg.addr(),
            trust_proxy: cfg.trust_proxy,
        })
    }
}
