//! Core data models for the file-hosting service.
//!
//! `FileRecord` is the only persisted entity. It serializes with camelCase
//! keys both in API responses and in the metadata snapshot.

pub mod file_record;
pub mod file_type;
