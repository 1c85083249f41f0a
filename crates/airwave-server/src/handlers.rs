use axum::{
    Json,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::server::AppState;

#[derive(Serialize)]
struct HealthResponse<'a> {
    status: &'a str,
}

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

/// Full health report. Answers 503 when any alert is critical.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let inputs = state.report_inputs().await;
    let report = state.reporter.generate_report(&inputs);

    let status = if report.is_critical() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status, Json(report))
}

/// Prometheus text exposition.
pub async fn metrics() -> Response {
    match airwave_monitor::metrics::render_metrics() {
        Some(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics not initialized").into_response(),
    }
}
