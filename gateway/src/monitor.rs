//! Monitor Port (C9, §4.9, §6): three read-only JSON projections over the
//! Device Registry, served with `axum` the way the teacher serves its own
//! ingestion HTTP surface.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::registry::Registry;

/// Devices with no activity in this window are surfaced as `issues` by
/// `/connections` (§4.9: "any devices with now - lastActivityAt > 30 s").
const STALE_AFTER_MS: i64 = 30_000;

#[derive(Clone)]
pub struct MonitorState {
    pub registry: Arc<Registry>,
    pub started_at_ms: i64,
    pub device_port: u16,
    pub monitor_port: u16,
}

pub fn router(state: MonitorState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/devices", get(devices))
        .route("/connections", get(connections))
        .fallback(not_found)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Serialize)]
struct HealthzResponse {
    status: &'static str,
    #[serde(rename = "uptimeSec")]
    uptime_sec: i64,
    #[serde(rename = "devicePort")]
    device_port: u16,
    #[serde(rename = "monitorPort")]
    monitor_port: u16,
}

async fn healthz(State(s): State<MonitorState>) -> Json<HealthzResponse> {
    Json(HealthzResponse {
        status: "ok",
        uptime_sec: (now_ms() - s.started_at_ms) / 1000,
        device_port: s.device_port,
        monitor_port: s.monitor_port,
    })
}

#[derive(Serialize)]
struct DeviceView {
    #[serde(rename = "deviceId")]
    device_id: String,
    #[serde(rename = "connectedAt")]
    connected_at: i64,
    #[serde(rename = "lastActivityAt")]
    last_activity_at: i64,
    #[serde(rename = "bytesReceived")]
    bytes_received: u64,
    #[serde(rename = "packetsProcessed")]
    packets_processed: u64,
}

#[derive(Serialize)]
struct DevicesResponse {
    devices: Vec<DeviceView>,
}

async fn devices(State(s): State<MonitorState>) -> Json<DevicesResponse> {
    let devices = s
        .registry
        .snapshot()
        .into_iter()
        .map(|d| DeviceView {
            device_id: d.device_id,
            connected_at: d.connected_at_ms,
            last_activity_at: d.last_activity_at_ms,
            bytes_received: d.bytes_received,
            packets_processed: d.packets_processed,
        })
        .collect();
    Json(DevicesResponse { devices })
}

#[derive(Serialize)]
struct ConnectionsResponse {
    #[serde(rename = "activeConnections")]
    active_connections: usize,
    issues: Vec<String>,
}

async fn connections(State(s): State<MonitorState>) -> Json<ConnectionsResponse> {
    let now = now_ms();
    let snapshot = s.registry.snapshot();
    let issues = snapshot
        .iter()
        .filter(|d| now - d.last_activity_at_ms > STALE_AFTER_MS)
        .map(|d| d.device_id.clone())
        .collect();
    Json(ConnectionsResponse {
        active_connections: snapshot.len(),
        issues,
    })
}

async fn not_found() -> impl IntoResponse {
    StatusCode::NOT_FOUND
}
