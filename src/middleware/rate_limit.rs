use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::middleware::auth::CurrentUser;

#[derive(Debug)]
struct WindowState {
    start: Instant,
    count: u32,
}

/// Fixed one-second windows, one per authenticated user. Extraction is the
/// expensive path (every upload fans out to the vision service), so one
/// admin hammering uploads must not starve the others — hence per-user
/// windows instead of a global one.
#[derive(Clone, Debug)]
pub struct UploadLimiter {
    rps: u32,
    windows: Arc<Mutex<HashMap<String, WindowState>>>,
}

impl UploadLimiter {
    fn new(rps: u32) -> Self {
        Self {
            rps: rps.max(1),
            windows: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn allow(&self, user: &str) -> bool {
        let mut guard = self.windows.lock().expect("rate limiter mutex poisoned");
        let now = Instant::now();
        let window = guard.entry(user.to_string()).or_insert(WindowState {
            start: now,
            count: 0,
        });
        if now.duration_since(window.start) >= Duration::from_secs(1) {
            window.start = now;
            window.count = 0;
        }
        if window.count < self.rps {
            window.count += 1;
            true
        } else {
            false
        }
    }
}

pub async fn per_user_rps_middleware(
    State(state): State<UploadLimiter>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let user = req
        .extensions()
        .get::<CurrentUser>()
        .map(|u| u.0.clone())
        .unwrap_or_else(|| "anonymous".to_string());
    if !state.allow(&user) {
        return (StatusCode::TOO_MANY_REQUESTS, "rate_limit_exceeded").into_response();
    }
    next.run(req).await
}

pub fn new_rps_state(rps: u32) -> UploadLimiter {
    UploadLimiter::new(rps)
}
