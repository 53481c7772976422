//! Storage, metadata and id services behind the HTTP handlers.

pub mod id_service;
pub mod metadata_store;
pub mod sqlite_store;
pub mod storage_service;
