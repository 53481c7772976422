//! `/healthz` answers as long as the process serves requests.
//! `/readyz` also checks that uploads could be accepted right now: the
//! metadata backend answers and the content directory is writable.

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::{collections::HashMap, path::Path};
use tokio::fs;
use uuid::Uuid;

const DISK_PROBE: &[u8] = b"readyz";

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    backend: Option<&'static str>,
    error: Option<String>,
}

impl CheckStatus {
    fn from_result(result: Result<(), String>, backend: Option<&'static str>) -> Self {
        match result {
            Ok(()) => Self {
                ok: true,
                backend,
                error: None,
            },
            Err(error) => Self {
                ok: false,
                backend,
                error: Some(error),
            },
        }
    }
}

/// `GET /healthz`. No I/O.
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

/// `GET /readyz`: 200 when every check passes, 503 otherwise.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let store = &state.storage.store;
    let metadata = store.ping().await.map_err(|e| e.to_string());
    let disk = disk_round_trip(&state.storage.base_path).await;

    let mut checks = HashMap::new();
    checks.insert(
        "metadata",
        CheckStatus::from_result(metadata, Some(store.backend_name())),
    );
    checks.insert("disk", CheckStatus::from_result(disk, None));

    let ready = checks.values().all(|check| check.ok);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = ReadyResponse {
        status: if ready { "ok" } else { "error" },
        checks,
    };
    (status, Json(body))
}

/// Write, read back and remove a dot-file in the content directory.
///
/// A leftover probe file is logged but does not fail readiness.
async fn disk_round_trip(dir: &Path) -> Result<(), String> {
    let probe = dir.join(format!(".readyz-{}", Uuid::new_v4()));
    fs::write(&probe, DISK_PROBE)
        .await
        .map_err(|e| format!("could not write probe file: {}", e))?;

    let read = fs::read(&probe).await;
    if let Err(e) = fs::remove_file(&probe).await {
        tracing::warn!(path = %probe.display(), error = %e, "could not remove readiness probe file");
    }

    match read {
        Ok(bytes) if bytes == DISK_PROBE => Ok(()),
        Ok(_) => Err("probe file content mismatch".to_string()),
        Err(e) => Err(format!("could not read probe file: {}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn disk_round_trip_leaves_nothing_behind() {
        let dir = TempDir::new().unwrap();
        disk_round_trip(dir.path()).await.unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn missing_directory_is_not_ready() {
        let dir = TempDir::new().unwrap();
        let err = disk_round_trip(&dir.path().join("gone")).await.unwrap_err();
        assert!(err.contains("could not write"));
    }
}
