use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::{body::Body, extract::State, http::Request, middleware::Next, response::Response};

/// Paths that report on the server itself and stay out of the error rate.
const PROBE_PATHS: [&str; 3] = ["/healthz", "/health", "/metrics"];

/// Request and server-error totals since start-up.
#[derive(Debug, Default)]
pub struct RequestCounters {
    total: AtomicU64,
    errors: AtomicU64,
}

impl RequestCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, server_error: bool) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if server_error {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Fraction of requests answered with a 5xx, or `None` before the first request.
    pub fn error_rate(&self) -> Option<f64> {
        let total = self.total();
        (total > 0).then(|| self.errors() as f64 / total as f64)
    }
}

// Counts every non-probe request and whether it ended in a server error.
pub async fn track_requests(
    State(counters): State<Arc<RequestCounters>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if PROBE_PATHS.contains(&req.uri().path()) {
        return next.run(req).await;
    }

    let res = next.run(req).await;
    counters.record(res.status().is_server_error());
    res
}
