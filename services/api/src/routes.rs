use crate::infra::{AppState, Tracker};
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Extension, Json, Router};
use case_tracker::error::AppError;
use case_tracker::tracker::{
    BatchSummary, MailTransport, Portal, RefreshMode, RefreshReport, SnapshotStore,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub(crate) struct RefreshQuery {
    /// Notify even when nothing changed. Defaults to on.
    #[serde(default = "forced_by_default")]
    pub(crate) force: bool,
}

fn forced_by_default() -> bool {
    true
}

impl RefreshQuery {
    fn mode(&self) -> RefreshMode {
        if self.force {
            RefreshMode::Forced
        } else {
            RefreshMode::OnDemand
        }
    }
}

pub(crate) fn with_tracker_routes<P, S, T>(tracker: Arc<Tracker<P, S, T>>) -> Router
where
    P: Portal + 'static,
    S: SnapshotStore + 'static,
    T: MailTransport + 'static,
{
    Router::new()
        .route(
            "/refresh",
            get(refresh_endpoint::<P, S, T>).post(refresh_endpoint::<P, S, T>),
        )
        .route(
            "/refresh/:applicant",
            get(refresh_applicant_endpoint::<P, S, T>)
                .post(refresh_applicant_endpoint::<P, S, T>),
        )
        .with_state(tracker)
        .route("/health", get(healthcheck))
        .route("/ready", get(readiness_endpoint))
        .route("/metrics", get(metrics_endpoint))
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

/// Refreshes every applicant and answers once all of them were attempted.
/// Individual failures are logged by the pipeline and only counted here.
pub(crate) async fn refresh_endpoint<P, S, T>(
    State(tracker): State<Arc<Tracker<P, S, T>>>,
    Query(query): Query<RefreshQuery>,
) -> Json<BatchSummary>
where
    P: Portal + 'static,
    S: SnapshotStore + 'static,
    T: MailTransport + 'static,
{
    Json(tracker.refresh(query.mode()).await)
}

/// Refreshes one applicant, addressed as `type:identifier`. A failed cycle
/// answers 502 with the stage it stopped at.
pub(crate) async fn refresh_applicant_endpoint<P, S, T>(
    State(tracker): State<Arc<Tracker<P, S, T>>>,
    Path(applicant): Path<String>,
    Query(query): Query<RefreshQuery>,
) -> Result<Json<RefreshReport>, AppError>
where
    P: Portal + 'static,
    S: SnapshotStore + 'static,
    T: MailTransport + 'static,
{
    let report = tracker.refresh_applicant(&applicant, query.mode()).await?;
    Ok(Json(report))
}
