//! 状态端点（只用于存活检查与排障）。
//!
//! - GET /health
//! - GET /metrics
//! - GET /logs?limit=N

use axum::{
    Json, Router,
    extract::{Query, State},
    response::IntoResponse,
    routing::get,
};
use domain::to_epoch_ms;
use ems_bridge::BridgeHandle;
use ems_storage::InMemoryRecordStore;
use ems_telemetry::metrics;
use serde::Deserialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

const DEFAULT_LOG_LIMIT: usize = 50;

#[derive(Clone)]
pub struct StatusState {
    pub connector: String,
    pub bridge: BridgeHandle,
    pub store: Arc<InMemoryRecordStore>,
}

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    pub limit: Option<usize>,
}

pub fn router(state: StatusState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(get_metrics))
        .route("/logs", get(get_logs))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn health(State(state): State<StatusState>) -> impl IntoResponse {
    let last_heartbeat = state
        .bridge
        .last_heartbeat()
        .map(|heartbeat| to_epoch_ms(&heartbeat.last_heartbeat));
    Json(serde_json::json!({
        "ok": true,
        "connector": state.connector,
        "bridge": state.bridge.state().to_string(),
        "last_heartbeat": last_heartbeat,
        "backlog": state.bridge.backlog_len(),
    }))
}

async fn get_metrics() -> impl IntoResponse {
    Json(metrics().snapshot())
}

async fn get_logs(State(state): State<StatusState>, Query(query): Query<LogQuery>) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT);
    Json(state.store.recent_logs(limit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use domain::{LogEntry, LogLevel};
    use ems_bridge::{BridgeConfig, BrokerBridge};
    use ems_storage::RecordStore;
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tower::ServiceExt;

    fn state() -> StatusState {
        let (bridge, _events) = BrokerBridge::new(BridgeConfig {
            client_id: "status-test".to_string(),
            host: "127.0.0.1".to_string(),
            port: 1883,
            username: None,
            password: None,
            keep_alive_seconds: 30,
            channel_capacity: 8,
            topic_root: "boiler".to_string(),
            reconnect_delay: Duration::from_secs(1),
            backlog_capacity: 8,
            heartbeat_interval: Duration::from_secs(30),
            event_capacity: 8,
        });
        StatusState {
            connector: "boiler".to_string(),
            bridge: bridge.handle(),
            store: Arc::new(InMemoryRecordStore::new(10)),
        }
    }

    async fn get_json(app: Router, uri: &str) -> serde_json::Value {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn health_reports_bridge_state() {
        let body = get_json(router(state()), "/health").await;
        assert_eq!(body["connector"], "boiler");
        assert_eq!(body["bridge"], "connecting");
        assert!(body["last_heartbeat"].is_null());
    }

    #[tokio::test]
    async fn logs_are_newest_first_and_limited() {
        let state = state();
        for msg in ["first", "second", "third"] {
            state
                .store
                .record_log(&LogEntry {
                    timestamp: 1,
                    msg: msg.to_string(),
                    emitter: "boiler".to_string(),
                    level: LogLevel::Info,
                })
                .await
                .unwrap();
        }
        let body = get_json(router(state), "/logs?limit=2").await;
        let msgs: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|entry| entry["msg"].as_str().unwrap())
            .collect();
        assert_eq!(msgs, vec!["third", "second"]);
    }

    #[tokio::test]
    async fn metrics_snapshot_is_served() {
        let body = get_json(router(state()), "/metrics").await;
        assert!(body.get("raw_messages").is_some());
    }
}
