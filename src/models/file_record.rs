//! Represents one uploaded file and the metadata registered for it.

use chrono::{DateTime, Utc};
use sanitize_filename::{Options, sanitize_with_options};
use serde::{Deserialize, Serialize};

/// Metadata for a single stored file.
///
/// A record is created exactly once, when an upload completes, and is never
/// mutated afterwards. The payload bytes live in the content directory under
/// `stored_filename`; this struct never holds them.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    /// Short public identifier, also the stem of the stored filename.
    pub id: String,

    /// `id` plus the sanitized extension of the original filename.
    pub stored_filename: String,

    /// Client filename, reduced to a sanitized last path component.
    pub original_name: String,

    /// Normalized, client-declared content type.
    pub mime_type: String,

    /// Number of bytes actually received.
    pub size_bytes: u64,

    /// When the record was registered.
    pub uploaded_at: DateTime<Utc>,

    /// Fully-qualified URL resolving to the file.
    pub public_url: String,
}

/// Longest extension carried over from the client filename.
const MAX_EXTENSION_LEN: usize = 16;

/// Name shown for an upload when the client's filename has nothing usable.
const FALLBACK_NAME: &str = "file";

/// Reduce a client-supplied filename to a safe display name.
///
/// Both `/` and `\` count as separators so that names produced by Windows
/// browsers (`C:\fakepath\a.png`) keep only their last component. The rest
/// goes through `sanitize_filename` with Windows rules on every platform:
/// reserved device names and control characters are dropped and the result
/// is capped at 255 bytes.
pub fn display_name(raw: &str) -> String {
    let last = raw.rsplit(['/', '\\']).next().unwrap_or("");
    let cleaned = sanitize_with_options(
        last,
        Options {
            windows: true,
            truncate: true,
            replacement: "",
        },
    );
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Extension to append to the stored filename, if the original has a safe one.
///
/// Only ASCII alphanumeric extensions up to 16 characters survive, lowercased.
/// Anything else yields `None` and the file is stored under the bare id.
pub fn safe_extension(original_name: &str) -> Option<String> {
    let (stem, ext) = original_name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || ext.len() > MAX_EXTENSION_LEN {
        return None;
    }
    if !ext.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Build `<id>.<ext>` or plain `<id>` when there is no safe extension.
pub fn stored_filename(id: &str, original_name: &str) -> String {
    match safe_extension(original_name) {
        Some(ext) => format!("{}.{}", id, ext),
        None => id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_strips_directories() {
        assert_eq!(display_name("notes.txt"), "notes.txt");
        assert_eq!(display_name("../../etc/passwd"), "passwd");
        assert_eq!(display_name(r"C:\fakepath\photo.png"), "photo.png");
        assert_eq!(display_name("dir/"), "file");
        assert_eq!(display_name(".."), "file");
    }

    #[test]
    fn display_name_is_bounded_and_portable() {
        let long = display_name(&"a".repeat(10_000));
        assert!(!long.is_empty() && long.len() <= 255);

        assert_eq!(display_name("CON"), "file");
        assert_eq!(display_name("bad\u{0}na\u{7}me.txt"), "badname.txt");
        assert_eq!(display_name("what?.txt"), "what.txt");
        assert_eq!(display_name("r\u{e9}sum\u{e9}.pdf"), "r\u{e9}sum\u{e9}.pdf");
    }

    #[test]
    fn extension_is_sanitized() {
        assert_eq!(safe_extension("notes.txt").as_deref(), Some("txt"));
        assert_eq!(safe_extension("Archive.TAR.GZ").as_deref(), Some("gz"));
        assert_eq!(safe_extension("README"), None);
        assert_eq!(safe_extension(".bashrc"), None);
        assert_eq!(safe_extension("weird.p$p"), None);
        assert_eq!(safe_extension("trailing."), None);
    }

    #[test]
    fn stored_filename_uses_id_as_stem() {
        assert_eq!(stored_filename("abc123", "photo.JPG"), "abc123.jpg");
        assert_eq!(stored_filename("abc123", "Makefile"), "abc123");
    }

    #[test]
    fn serializes_with_camel_case_keys() {
        let record = FileRecord {
            id: "abc".into(),
            stored_filename: "abc.txt".into(),
            original_name: "notes.txt".into(),
            mime_type: "text/plain".into(),
            size_bytes: 10,
            uploaded_at: Utc::now(),
            public_url: "http://localhost:3000/abc".into(),
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["storedFilename"], "abc.txt");
        assert_eq!(value["sizeBytes"], 10);
        assert_eq!(value["publicUrl"], "http://localhost:3000/abc");
    }
}
