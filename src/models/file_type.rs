//! Upload type policy: which declared content types are accepted.
//!
//! The policy is data. Extend [`ALLOWED_TYPES`] to accept more formats.
//! Only the client-declared type is checked; the bytes are never sniffed,
//! so a client can mislabel content. Responses carry `nosniff` for that reason.

use std::fmt;

/// Broad grouping of accepted uploads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileCategory {
    Image,
    Video,
    Audio,
    Document,
}

impl fmt::Display for FileCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FileCategory::Image => "image",
            FileCategory::Video => "video",
            FileCategory::Audio => "audio",
            FileCategory::Document => "document",
        };
        f.write_str(name)
    }
}

/// Accepted content types, per category.
pub const ALLOWED_TYPES: &[(FileCategory, &[&str])] = &[
    (
        FileCategory::Image,
        &["image/jpeg", "image/png", "image/gif", "image/webp"],
    ),
    (
        FileCategory::Video,
        &["video/mp4", "video/webm", "video/quicktime"],
    ),
    (
        FileCategory::Audio,
        &["audio/mpeg", "audio/wav", "audio/ogg"],
    ),
    (
        FileCategory::Document,
        &["application/pdf", "text/plain", "application/zip"],
    ),
];

/// Lowercase a content type and drop any parameters (`; charset=...`).
pub fn normalize_mime(raw: &str) -> String {
    raw.split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

/// Category of a declared content type, or `None` when it is not accepted.
pub fn category_of(mime: &str) -> Option<FileCategory> {
    let normalized = normalize_mime(mime);
    ALLOWED_TYPES
        .iter()
        .find(|(_, types)| types.contains(&normalized.as_str()))
        .map(|(category, _)| *category)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_listed_types() {
        assert_eq!(category_of("image/png"), Some(FileCategory::Image));
        assert_eq!(category_of("video/quicktime"), Some(FileCategory::Video));
        assert_eq!(category_of("audio/ogg"), Some(FileCategory::Audio));
        assert_eq!(category_of("application/zip"), Some(FileCategory::Document));
    }

    #[test]
    fn normalizes_case_and_parameters() {
        assert_eq!(normalize_mime("Text/Plain; charset=UTF-8"), "text/plain");
        assert_eq!(
            category_of("TEXT/PLAIN; charset=utf-8"),
            Some(FileCategory::Document)
        );
    }

    #[test]
    fn rejects_everything_else() {
        assert_eq!(category_of("application/x-executable"), None);
        assert_eq!(category_of("image/svg+xml"), None);
        assert_eq!(category_of("text/html"), None);
        assert_eq!(category_of(""), None);
    }
}
