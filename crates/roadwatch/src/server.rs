//! HTTP ingestion and read boundary.
//!
//! Producers POST one reading per request; dashboards poll the GET routes.
//! Bodies are read as raw bytes and decoded leniently, so a malformed body
//! never turns into a 4xx for the producer.

use std::future::IntoFuture;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::escalation::Trigger;
use crate::ingest::Payload;

/// Rows returned by the history routes.
const HISTORY_ROWS: usize = 50;

/// Build the router.
pub fn router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/location", get(get_location).post(post_location))
        .route("/api/vibration", get(get_vibration).post(post_vibration))
        .route("/api/radar", get(get_radar).post(post_radar))
        .route("/api/radar/map", get(get_radar_map))
        .route("/api/alcohol", get(get_alcohol).post(post_alcohol))
        .route("/api/drowsiness", get(get_drowsiness).post(post_drowsiness))
        .route("/api/alerts", get(get_alerts))
        .route("/api/sos", post(post_sos))
        .route("/api/gsm-status", get(get_gsm_status))
        .route("/api/road-data", get(get_road_data).post(post_road_data))
        .route("/api/sensor-logs", get(get_sensor_logs))
        .with_state(engine)
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
}

/// Serve until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the address cannot be bound or the server fails.
pub async fn run(engine: Arc<Engine>, bind: &str) -> Result<()> {
    let listener = TcpListener::bind(bind)
        .await
        .map_err(|source| Error::ServerBind {
            addr: bind.to_string(),
            source,
        })?;
    info!("Listening on http://{}", bind);

    let serve = axum::serve(listener, router(engine)).into_future();
    tokio::select! {
        result = serve => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutdown signal received"),
    }
    Ok(())
}

fn ok() -> Json<serde_json::Value> {
    Json(json!({ "success": true }))
}

fn unavailable(e: &Error) -> Response {
    warn!(error = %e, "Store unavailable for read");
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "success": false, "error": e.to_string() })),
    )
        .into_response()
}

// === GPS ===

async fn post_location(State(engine): State<Arc<Engine>>, body: Bytes) -> impl IntoResponse {
    engine.ingest_gps(&Payload::parse(&body)).await;
    ok()
}

async fn get_location(State(engine): State<Arc<Engine>>) -> impl IntoResponse {
    Json(engine.gps().await)
}

// === Vibration ===

async fn post_vibration(State(engine): State<Arc<Engine>>, body: Bytes) -> impl IntoResponse {
    engine.ingest_vibration(&Payload::parse(&body)).await;
    ok()
}

async fn get_vibration(State(engine): State<Arc<Engine>>) -> impl IntoResponse {
    Json(engine.vibration().await)
}

// === Radar ===

async fn post_radar(State(engine): State<Arc<Engine>>, body: Bytes) -> impl IntoResponse {
    let stored = engine.ingest_radar(&Payload::parse(&body)).await.is_some();
    Json(json!({ "success": true, "stored": stored }))
}

async fn get_radar(State(engine): State<Arc<Engine>>) -> impl IntoResponse {
    Json(engine.radar().await)
}

async fn get_radar_map(State(engine): State<Arc<Engine>>) -> impl IntoResponse {
    Json(engine.radar_map())
}

// === Alcohol ===

async fn post_alcohol(State(engine): State<Arc<Engine>>, body: Bytes) -> impl IntoResponse {
    engine.ingest_alcohol(&Payload::parse(&body)).await;
    ok()
}

async fn get_alcohol(State(engine): State<Arc<Engine>>) -> impl IntoResponse {
    Json(engine.alcohol().await)
}

// === Drowsiness and alerts ===

async fn post_drowsiness(State(engine): State<Arc<Engine>>, body: Bytes) -> impl IntoResponse {
    let (_, outcome) = engine.ingest_drowsiness(&Payload::parse(&body)).await;
    Json(json!({
        "success": true,
        "voiceAlert": outcome.voice_alert,
        "severity": outcome.severity,
    }))
}

async fn get_drowsiness(State(engine): State<Arc<Engine>>) -> impl IntoResponse {
    Json(engine.drowsiness().await)
}

async fn get_alerts(State(engine): State<Arc<Engine>>) -> impl IntoResponse {
    Json(engine.alerts().await)
}

// === SOS ===

async fn post_sos(State(engine): State<Arc<Engine>>, body: Bytes) -> impl IntoResponse {
    let payload = Payload::parse(&body);
    let trigger = Trigger::parse(
        payload
            .str("type")
            .or_else(|| payload.str("trigger"))
            .unwrap_or_default(),
    );
    let outcome = engine.escalate(trigger, payload.str("message")).await;
    Json(json!({
        "success": outcome.accepted,
        "accepted": outcome.accepted,
        "detail": outcome.detail,
        "incidentId": outcome.incident_id,
        "message": outcome.message,
    }))
}

async fn get_gsm_status(State(engine): State<Arc<Engine>>) -> impl IntoResponse {
    Json(engine.gsm_status().await)
}

// === History ===

async fn post_road_data(State(engine): State<Arc<Engine>>, body: Bytes) -> Response {
    match engine.record_road_event(&Payload::parse(&body)).await {
        Ok(id) => (
            StatusCode::CREATED,
            Json(json!({
                "success": true,
                "id": id,
                "message": "Road event recorded",
            })),
        )
            .into_response(),
        Err(e) => unavailable(&e),
    }
}

async fn get_road_data(State(engine): State<Arc<Engine>>) -> Response {
    match engine.recent_incidents(HISTORY_ROWS).await {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => unavailable(&e),
    }
}

async fn get_sensor_logs(State(engine): State<Arc<Engine>>) -> Response {
    match engine.recent_sensor_logs(HISTORY_ROWS).await {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => unavailable(&e),
    }
}
