//! API route definitions.

use std::convert::Infallible;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::{routing::get, Json, Router};
use futures::stream::Stream;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::state::AppState;
use crate::service::ServiceError;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(service_status))
        .route("/equipment", get(list_equipment))
        .route("/equipment/{id}/snapshot", get(equipment_snapshot))
        .route("/equipment/{id}/status", get(equipment_status))
        .route("/equipment/{id}/alerts", get(equipment_alerts))
        .route("/facilities/{id}/stats", get(facility_stats))
        .route("/fleet", get(fleet_overview))
        .route("/stream/{id}", get(stream_equipment))
}

fn envelope(data: Value) -> Json<Value> {
    Json(json!({
        "data": data,
        "meta": {
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION")
        }
    }))
}

fn not_found(err: ServiceError) -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": err.to_string() })),
    )
}

async fn health() -> Json<Value> {
    envelope(json!({ "status": "ok" }))
}

async fn service_status(State(state): State<AppState>) -> Json<Value> {
    let stats = state.service.service_stats().await;
    envelope(json!(stats))
}

#[derive(Deserialize)]
struct ListQuery {
    facility_id: Option<String>,
}

async fn list_equipment(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Json<Value> {
    let entries = state
        .service
        .equipment_list(query.facility_id.as_deref())
        .await;
    let total = entries.len();
    envelope(json!({ "equipment": entries, "total": total }))
}

async fn equipment_snapshot(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.service.snapshot(&id).await {
        Ok(snapshot) => envelope(json!(snapshot)).into_response(),
        Err(e) => not_found(e).into_response(),
    }
}

async fn equipment_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.service.equipment_status(&id).await {
        Ok(status) => envelope(json!(status)).into_response(),
        Err(e) => not_found(e).into_response(),
    }
}

async fn equipment_alerts(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.service.alerts_for(&id).await {
        Ok(alerts) => {
            let total = alerts.len();
            envelope(json!({ "alerts": alerts, "total": total })).into_response()
        }
        Err(e) => not_found(e).into_response(),
    }
}

async fn facility_stats(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<Value> {
    let stats = state.service.facility_stats(&id).await;
    envelope(json!(stats))
}

async fn fleet_overview(State(state): State<AppState>) -> Json<Value> {
    let overview = state.service.fleet_overview().await;
    envelope(json!(overview))
}

/// SSE stream of commit ticks for one equipment: the current latest sample
/// on connect, then one event per commit that includes this equipment.
async fn stream_equipment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let initial: Vec<Result<Event, Infallible>> = match state.service.snapshot(&id).await {
        Ok(snapshot) => Event::default()
            .event("sample")
            .json_data(&snapshot.latest)
            .map(|e| vec![Ok(e)])
            .unwrap_or_default(),
        Err(_) => Vec::new(),
    };

    let subscription = state.service.subscribe(&id).await;
    let live = futures::stream::unfold(subscription, |mut sub| async move {
        let sample = sub.next().await?;
        let event = Event::default().event("sample").json_data(&sample).ok()?;
        Some((Ok::<_, Infallible>(event), sub))
    });

    let stream = futures::stream::iter(initial).chain(live);

    Sse::new(stream).keep_alive(KeepAlive::default())
}
