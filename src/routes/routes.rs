//! Defines routes for the file-hosting service.
//!
//! ## Structure
//! - **Upload endpoints** (rate limited per client)
//!   - `POST /upload`     — form upload, `{success, url, filename, size}`
//!   - `POST /api/upload` — API upload, additionally echoes `id`
//!
//! - **Retrieval endpoints**
//!   - `GET /{id}`          — stream the stored file
//!   - `GET /api/info/{id}` — `{success, data: FileRecord}`
//!
//! - **Ambient**
//!   - `GET /`                 — upload page
//!   - `GET /healthz`, `/readyz` — probes
//!
//! Static segments take priority over `/{id}`, so `healthz` and friends never
//! reach the file lookup.

use crate::{
    handlers::{
        file_handlers::{file_info, get_file, not_found, upload_api, upload_form},
        health_handlers::{healthz, readyz},
        ui_handlers::index,
    },
    middleware::{cors::create_cors_layer, rate_limit::upload_rate_limit},
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

/// Room for multipart boundaries and part headers on top of the payload.
const MULTIPART_OVERHEAD: u64 = 64 * 1024;

/// Build the full application router.
pub fn routes(state: AppState, cors_origins: &[String]) -> Router {
    let body_limit = usize::try_from(
        state
            .storage
            .max_upload_bytes
            .saturating_add(MULTIPART_OVERHEAD),
    )
    .unwrap_or(usize::MAX);

    let uploads = Router::new()
        .route("/upload", post(upload_form))
        .route("/api/upload", post(upload_api))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            upload_rate_limit,
        ))
        .layer(DefaultBodyLimit::max(body_limit));

    Router::new()
        .route("/", get(index))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/api/info/{id}", get(file_info))
        .route("/{id}", get(get_file))
        .merge(uploads)
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .layer(create_cors_layer(cors_origins))
        .with_state(state)
}
