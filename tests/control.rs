//! Control client tests against a local axum server mocking the backend's
//! REST endpoints.
#![cfg(feature = "control")]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use sentinel_feed::control::{ControlClient, FeedbackType, spawn_detached};
use sentinel_feed::{EventSummary, FeedError, ThreatLevel};
use serde_json::{Value, json};
use tokio::net::TcpListener;

#[derive(Clone, Default)]
struct Backend {
    calls: Arc<Mutex<Vec<String>>>,
}

impl Backend {
    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

async fn list_videos() -> Json<Value> {
    Json(json!(["lobby_01.mp4", "aisle_07.mp4"]))
}

async fn start_simulation(State(backend): State<Backend>, Json(body): Json<Value>) -> Json<Value> {
    backend.record(format!("start:{}", body["filename"].as_str().unwrap_or_default()));
    Json(json!({"status": "started"}))
}

async fn stop_simulation(State(backend): State<Backend>) -> Json<Value> {
    backend.record("stop");
    Json(json!({"status": "stopped"}))
}

async fn start_live(State(backend): State<Backend>) -> Json<Value> {
    backend.record("live");
    Json(json!({"status": "live"}))
}

async fn feedback(State(backend): State<Backend>, Json(body): Json<Value>) -> Json<Value> {
    backend.record(format!(
        "feedback:{}:{}",
        body["event_id"].as_str().unwrap_or_default(),
        body["feedback_type"].as_str().unwrap_or_default()
    ));
    Json(json!({"status": "ok", "conclusion": "Threshold for loitering raised."}))
}

async fn events() -> Json<Value> {
    Json(json!([
        {"clip_id": "aaaaaaaa-1", "timestamp": 1718000100.0, "duration": 10.0,
         "trigger_level": "SUSPICIOUS", "final_level": "THREAT", "max_intent": 0.9,
         "mean_intent": 0.7, "weapon_detected": true, "video_url": "/videos/a.mp4"},
        {"clip_id": "bbbbbbbb-2", "timestamp": 1718000000.0, "duration": 10.0,
         "trigger_level": "SUSPICIOUS", "final_level": "NONE", "max_intent": 0.6,
         "mean_intent": 0.4, "weapon_detected": false}
    ]))
}

async fn start_backend(backend: Backend) -> SocketAddr {
    let app = Router::new()
        .route("/api/test/videos", get(list_videos))
        .route("/api/test/start", post(start_simulation))
        .route("/api/test/stop", post(stop_simulation))
        .route("/api/live/start", post(start_live))
        .route("/api/feedback", post(feedback))
        .route("/api/events", get(events))
        .with_state(backend);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn drives_simulation_and_live_mode() {
    let backend = Backend::default();
    let addr = start_backend(backend.clone()).await;
    let client = ControlClient::new(format!("http://{addr}/")).unwrap();

    let videos = client.list_videos().await.unwrap();
    assert_eq!(videos, vec!["lobby_01.mp4", "aisle_07.mp4"]);

    client.start_simulation("aisle_07.mp4").await.unwrap();
    client.stop_simulation().await.unwrap();
    client.start_live().await.unwrap();

    assert_eq!(backend.calls(), vec!["start:aisle_07.mp4", "stop", "live"]);
}

#[tokio::test]
async fn feedback_returns_the_conclusion() {
    let backend = Backend::default();
    let addr = start_backend(backend.clone()).await;
    let client = ControlClient::new(format!("http://{addr}")).unwrap();

    let report = client
        .submit_feedback("aaaaaaaa-1", FeedbackType::Inaccurate)
        .await
        .unwrap();
    assert_eq!(report.conclusion, "Threshold for loitering raised.");
    assert_eq!(backend.calls(), vec!["feedback:aaaaaaaa-1:inaccurate"]);
}

#[tokio::test]
async fn lists_and_summarises_events() {
    let addr = start_backend(Backend::default()).await;
    let base = format!("http://{addr}");
    let client = ControlClient::new(base.clone()).unwrap();

    let events = client.list_events().await.unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].level(), Some(&ThreatLevel::Threat));
    assert_eq!(events[0].video_href(&base), Some(format!("{base}/videos/a.mp4")));

    let summary = EventSummary::from_events(&events);
    assert_eq!(summary.total_visits, 2);
    assert_eq!(summary.threats, 1);
    assert_eq!(summary.suspicious, 2);
}

#[tokio::test]
async fn error_status_is_reported() {
    let app = Router::new().route(
        "/api/live/start",
        post(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let client = ControlClient::new(format!("http://{addr}")).unwrap();
    let err = client.start_live().await.unwrap_err();
    assert!(matches!(err, FeedError::Http(_)));

    // Unknown routes are errors too.
    assert!(client.list_events().await.is_err());
}

#[tokio::test]
async fn detached_requests_never_fail_the_caller() {
    let client = ControlClient::new("http://127.0.0.1:9").unwrap();
    let task = spawn_detached("start live", async move { client.start_live().await });
    // The request fails; the task only logs it.
    task.await.unwrap();
}
