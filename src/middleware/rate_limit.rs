//! Per-client upload rate limiting.
//!
//! A sliding window: each client may make at most `max_attempts` upload
//! attempts within any `window`. Every attempt that reaches the upload
//! routes counts, accepted or not.

use crate::{errors::AppError, state::AppState};
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderValue, Request, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{
    collections::{HashMap, VecDeque},
    net::SocketAddr,
    sync::Mutex,
    time::{Duration, Instant},
};

/// Once this many clients are tracked, idle entries are pruned on the next check.
const PRUNE_THRESHOLD: usize = 1024;

/// Outcome of a rate limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitResult {
    Allowed,
    Denied {
        /// Time until the oldest attempt in the window expires.
        retry_after: Duration,
    },
}

impl RateLimitResult {
    #[cfg(test)]
    fn is_allowed(&self) -> bool {
        matches!(self, RateLimitResult::Allowed)
    }
}

/// Sliding-window limiter keyed by client address.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    max_attempts: usize,
    window: Duration,
    clients: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl SlidingWindowLimiter {
    pub fn new(max_attempts: u32, window: Duration) -> Self {
        Self {
            max_attempts: max_attempts as usize,
            window,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Count an attempt for `client`, or deny it when the window is full.
    pub fn check(&self, client: &str) -> RateLimitResult {
        self.check_at(client, Instant::now())
    }

    fn check_at(&self, client: &str, now: Instant) -> RateLimitResult {
        let mut clients = self
            .clients
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if clients.len() >= PRUNE_THRESHOLD {
            let window = self.window;
            clients.retain(|_, attempts| {
                evict_expired(attempts, now, window);
                !attempts.is_empty()
            });
        }

        let attempts = clients.entry(client.to_string()).or_default();
        evict_expired(attempts, now, self.window);

        if attempts.len() >= self.max_attempts {
            let retry_after = attempts
                .front()
                .map(|oldest| self.window.saturating_sub(now.duration_since(*oldest)))
                .unwrap_or(self.window);
            return RateLimitResult::Denied { retry_after };
        }

        attempts.push_back(now);
        RateLimitResult::Allowed
    }

    /// Number of clients currently tracked.
    #[cfg(test)]
    fn tracked_clients(&self) -> usize {
        self.clients
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

fn evict_expired(attempts: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(oldest) = attempts.front() {
        if now.duration_since(*oldest) >= window {
            attempts.pop_front();
        } else {
            break;
        }
    }
}

/// Client address used as the rate limit key.
///
/// Forwarding headers are only honoured when the service sits behind a
/// trusted proxy; otherwise any client could pick its own key.
pub fn client_key(req: &Request<Body>, trust_proxy: bool) -> String {
    if trust_proxy {
        if let Some(forwarded) = req
            .headers()
            .get("X-Forwarded-For")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
        {
            return forwarded.to_string();
        }

        if let Some(real_ip) = req
            .headers()
            .get("X-Real-IP")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
        {
            return real_ip.to_string();
        }
    }

    if let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }

    "unknown".to_string()
}

/// Middleware guarding the upload routes.
pub async fn upload_rate_limit(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let client = client_key(&req, state.trust_proxy);

    match state.upload_limiter.check(&client) {
        RateLimitResult::Allowed => next.run(req).await,
        RateLimitResult::Denied { retry_after } => {
            tracing::warn!(client = %client, "upload rate limit exceeded");
            let mut response = AppError::rate_limited().into_response();
            let secs = retry_after.as_secs().max(1);
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
            response
        }
    }
}
