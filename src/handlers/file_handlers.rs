//! HTTP handlers for uploading and retrieving files.
//! Upload bodies are streamed to disk and downloads are streamed back out;
//! neither is buffered in memory. Storage concerns live in `StorageService`.

use crate::{
    errors::AppError,
    models::file_record::FileRecord,
    services::storage_service::{NewUpload, StorageError},
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{
        Path, State,
        multipart::{Multipart, MultipartError, MultipartRejection},
    },
    http::{HeaderMap, HeaderValue, StatusCode, Uri, header},
    response::Response,
};
use futures::StreamExt;
use serde::Serialize;
use tokio_util::io::ReaderStream;
use tracing::debug;

/// Multipart field carrying the file.
const FILE_FIELD: &str = "file";
const FALLBACK_MIME: &str = "application/octet-stream";

/// Which of the two upload endpoints is answering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// `POST /upload`: url, filename, size.
    Form,
    /// `POST /api/upload`: additionally echoes the id.
    Api,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    pub url: String,
    pub filename: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl UploadResponse {
    fn from_record(record: FileRecord, shape: ResponseShape) -> Self {
        Self {
            success: true,
            url: record.public_url,
            filename: record.original_name,
            size: record.size_bytes,
            id: match shape {
                ResponseShape::Form => None,
                ResponseShape::Api => Some(record.id),
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct InfoResponse {
    pub success: bool,
    pub data: FileRecord,
}

/// POST `/upload` — browser form upload.
pub async fn upload_form(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, AppError> {
    handle_upload(&state, &uri, &headers, multipart, ResponseShape::Form).await
}

/// POST `/api/upload` — programmatic upload, echoes the id.
pub async fn upload_api(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, AppError> {
    handle_upload(&state, &uri, &headers, multipart, ResponseShape::Api).await
}

async fn handle_upload(
    state: &AppState,
    uri: &Uri,
    headers: &HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
    shape: ResponseShape,
) -> Result<Json<UploadResponse>, AppError> {
    let mut multipart = multipart.map_err(|rejection| {
        debug!("upload without multipart body: {}", rejection);
        AppError::no_file()
    })?;
    let limit = state.storage.max_upload_bytes;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => return Err(AppError::no_file()),
            Err(err) => return Err(multipart_error(err, limit).into()),
        };

        // Only a field named `file` with a non-empty filename is an upload.
        // Browsers send `filename=""` when nothing was picked.
        let original_name = match (field.name(), field.file_name()) {
            (Some(FILE_FIELD), Some(name)) if !name.is_empty() => name.to_string(),
            _ => continue,
        };
        let upload = NewUpload {
            original_name,
            mime_type: field.content_type().unwrap_or(FALLBACK_MIME).to_string(),
            public_base: public_base(state, uri, headers),
        };

        let body = field.map(move |chunk| chunk.map_err(|err| multipart_error(err, limit)));
        let record = state.storage.store_upload(upload, body).await?;
        return Ok(Json(UploadResponse::from_record(record, shape)));
    }
}

fn multipart_error(err: MultipartError, limit: u64) -> StorageError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        StorageError::PayloadTooLarge { limit }
    } else {
        StorageError::MalformedUpload(err.body_text())
    }
}

/// Scheme and host that public URLs start with.
///
/// The host comes from `Host`, then the request URI's authority (HTTP/2),
/// then the bind address.
fn public_base(state: &AppState, uri: &Uri, headers: &HeaderMap) -> String {
    if let Some(base) = &state.public_base_url {
        return base.clone();
    }

    let scheme = if state.trust_proxy {
        headers
            .get("X-Forwarded-Proto")
            .and_then(|v| v.to_str().ok())
            .filter(|proto| matches!(*proto, "http" | "https"))
            .unwrap_or("http")
    } else {
        "http"
    };

    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| uri.authority().map(|authority| authority.as_str()))
        .filter(|host| is_plausible_host(host))
        .unwrap_or(state.fallback_host.as_str());

    format!("{}://{}", scheme, host)
}

/// `host[:port]`, bracketed IPv6 included. Keeps the `Host` header from
/// injecting paths or credentials into generated URLs.
fn is_plausible_host(host: &str) -> bool {
    !host.is_empty()
        && host.len() <= 255
        && host
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'-' | b':' | b'[' | b']'))
}

/// GET `/{id}` — stream the stored file.
pub async fn get_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let (record, file) = state.storage.open_file(&id).await?;
    let body = Body::from_stream(ReaderStream::new(file));

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    set_file_headers(response.headers_mut(), &record);

    Ok(response)
}

/// GET `/api/info/{id}` — the record as JSON.
pub async fn file_info(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<InfoResponse>, AppError> {
    let record = state.storage.get_record(&id).await?;
    Ok(Json(InfoResponse {
        success: true,
        data: record,
    }))
}

/// Catch-all for unknown routes.
pub async fn not_found() -> AppError {
    AppError::not_found()
}

fn set_file_headers(headers: &mut HeaderMap, record: &FileRecord) {
    let content_type = HeaderValue::from_str(&record.mime_type).unwrap_or_else(|_| {
        let guessed = mime_guess::from_path(&record.stored_filename).first_or_octet_stream();
        HeaderValue::from_str(guessed.as_ref())
            .unwrap_or_else(|_| HeaderValue::from_static(FALLBACK_MIME))
    });
    headers.insert(header::CONTENT_TYPE, content_type);

    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(record.size_bytes));

    if let Ok(value) = HeaderValue::from_str(
        &record
            .uploaded_at
            .format("%a, %d %b %Y %H:%M:%S GMT")
            .to_string(),
    ) {
        headers.insert(header::LAST_MODIFIED, value);
    }

    if let Ok(value) = HeaderValue::from_str(&content_disposition(&record.original_name)) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    // Types are client-declared; browsers must not second-guess them.
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
}

/// Inline `Content-Disposition` carrying the original filename.
///
/// Control characters, quotes and backslashes never reach the header.
/// Non-ASCII names get an RFC 5987 `filename*` parameter next to an ASCII
/// fallback.
fn content_disposition(filename: &str) -> String {
    let sanitized: String = filename
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| match c {
            '"' | '\\' => '_',
            c if !c.is_ascii() => '_',
            c => c,
        })
        .collect();

    if sanitized == filename {
        return format!("inline; filename=\"{}\"", filename);
    }

    format!(
        "inline; filename=\"{}\"; filename*=UTF-8''{}",
        sanitized,
        urlencoding::encode(filename)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disposition_plain_ascii() {
        assert_eq!(
            content_disposition("notes.txt"),
            "inline; filename=\"notes.txt\""
        );
    }

    #[test]
    fn disposition_escapes_quotes_and_unicode() {
        let value = content_disposition("r\u{e9}sum\u{e9} \"v2\".pdf");
        assert!(value.starts_with("inline; filename=\"r_sum_ _v2_.pdf\""));
        assert!(value.contains("filename*=UTF-8''r%C3%A9sum%C3%A9%20%22v2%22.pdf"));
        assert!(HeaderValue::from_str(&value).is_ok());
    }

    #[test]
    fn host_header_is_checked() {
        assert!(is_plausible_host("localhost:3000"));
        assert!(is_plausible_host("[::1]:8080"));
        assert!(!is_plausible_host("evil.com/path"));
        assert!(!is_plausible_host("user@evil.com"));
        assert!(!is_plausible_host(""));
    }

    #[test]
    fn form_shape_omits_id() {
        let record = FileRecord {
            id: "abc".into(),
            stored_filename: "abc.txt".into(),
            original_name: "notes.txt".into(),
            mime_type: "text/plain".into(),
            size_bytes: 3,
            uploaded_at: chrono::Utc::now(),
            public_url: "http://h/abc".into(),
        };
        let form = serde_json::to_value(UploadResponse::from_record(
            record.clone(),
            ResponseShape::Form,
        ))
        .unwrap();
        assert!(form.get("id").is_none());
        assert_eq!(form["filename"], "notes.txt");

        let api =
            serde_json::to_value(UploadResponse::from_record(record, ResponseShape::Api)).unwrap();
        assert_eq!(api["id"], "abc");
        assert_eq!(api["success"], true);
    }
}
