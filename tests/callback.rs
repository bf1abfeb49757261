//! Callback endpoint integration tests

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use beacon_voice::callback::{self, CallbackContext};
use beacon_voice::playback::Player;
use beacon_voice::{ClientState, StateCell};
use tower::ServiceExt;

mod common;
use common::{RecordingSpeaker, ScriptedBackend, ScriptedMicrophone, reply_wav, test_config, utterance};

struct Fixture {
    state: Arc<StateCell>,
    microphone: Arc<ScriptedMicrophone>,
    speaker: Arc<RecordingSpeaker>,
    backend: Arc<ScriptedBackend>,
    context: Arc<CallbackContext>,
}

impl Fixture {
    fn new() -> Self {
        let config = test_config();
        let state = Arc::new(StateCell::new());
        let microphone = Arc::new(ScriptedMicrophone::new());
        let speaker = Arc::new(RecordingSpeaker::instant());
        let backend = Arc::new(ScriptedBackend::new());
        let player = Arc::new(Player::new(speaker.clone(), microphone.clone(), &config));

        let context = Arc::new(CallbackContext::new(
            &config,
            Arc::clone(&state),
            microphone.clone(),
            backend.clone(),
            player,
            Arc::new(AtomicBool::new(true)),
        ));

        Self {
            state,
            microphone,
            speaker,
            backend,
            context,
        }
    }

    async fn post(&self, uri: &str, body: impl Into<Body>) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .body(body.into())
            .unwrap();
        self.send(request).await
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = callback::router(Arc::clone(&self.context))
            .oneshot(request)
            .await
            .unwrap();

        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        (status, json)
    }
}

/// A short spoken reply followed by the 0.8s confirmation silence
fn spoken_reply() -> Vec<beacon_voice::audio::AudioFrame> {
    utterance(5, 80)
}

#[tokio::test]
async fn test_health_reports_state() {
    let fixture = Fixture::new();

    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let (status, json) = fixture.send(request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["state"], "idle");
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn test_chime_invalid_json() {
    let fixture = Fixture::new();

    let (status, json) = fixture.post("/chime", "{not json").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["status"], "error");
    assert_eq!(json["error"], "Invalid JSON");
    assert_eq!(fixture.speaker.plays(), 0);
}

#[tokio::test]
async fn test_chime_rejected_while_busy() {
    let fixture = Fixture::new();
    let guard = fixture.state.acquire(ClientState::Processing).unwrap();

    let (status, json) = fixture
        .post("/chime", r#"{"text":"Your build finished","type":"notification"}"#)
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "rejected");
    assert_eq!(json["error"], "Client busy");
    assert_eq!(fixture.speaker.plays(), 0);
    assert_eq!(fixture.microphone.opens(), 0);
    assert_eq!(fixture.state.get(), ClientState::Processing);
    drop(guard);
}

#[tokio::test]
async fn test_chime_confirmed() {
    let fixture = Fixture::new();
    fixture.microphone.push_script(spoken_reply());
    fixture.backend.push_text("Yes please");

    let (status, json) = fixture
        .post("/chime", r#"{"text":"Your build finished"}"#)
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "confirmed");
    assert!(json.get("error").is_none());
    assert_eq!(fixture.speaker.plays(), 1);
    assert_eq!(fixture.backend.stt_calls(), 1);
    assert!(fixture.state.is_idle());
}

#[tokio::test]
async fn test_chime_declined() {
    let fixture = Fixture::new();
    fixture.microphone.push_script(spoken_reply());
    fixture.backend.push_text("No, not now.");

    let (_, json) = fixture.post("/chime", r#"{"text":"Reminder"}"#).await;

    assert_eq!(json["status"], "rejected");
}

#[tokio::test]
async fn test_chime_silence_times_out() {
    let fixture = Fixture::new();

    let (status, json) = fixture.post("/chime", Body::empty()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "timeout");
    assert_eq!(fixture.backend.stt_calls(), 0);
    assert!(fixture.state.is_idle());
}

#[tokio::test]
async fn test_chime_stt_failure_counts_as_confirmed() {
    let fixture = Fixture::new();
    fixture.microphone.push_script(spoken_reply());
    fixture.backend.push_text_failure("stt unavailable");

    let (_, json) = fixture.post("/chime", r#"{"text":"Reminder"}"#).await;

    assert_eq!(json["status"], "confirmed");
}

#[tokio::test]
async fn test_play_without_audio() {
    let fixture = Fixture::new();

    let (status, json) = fixture.post("/play", Body::empty()).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "No audio data");
}

#[tokio::test]
async fn test_play_rejects_non_wav() {
    let fixture = Fixture::new();

    let (status, json) = fixture.post("/play", "ID3 not a wav file").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].is_string());
    assert_eq!(fixture.speaker.plays(), 0);
}

#[tokio::test]
async fn test_play_conflicts_while_busy() {
    let fixture = Fixture::new();
    let guard = fixture.state.acquire(ClientState::Listening).unwrap();

    let (status, json) = fixture.post("/play", reply_wav(100)).await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["ok"], false);
    assert_eq!(json["error"], "Client busy");
    assert_eq!(fixture.speaker.plays(), 0);
    drop(guard);
}

#[tokio::test]
async fn test_play_pushed_audio() {
    let fixture = Fixture::new();

    let (status, json) = fixture.post("/play", reply_wav(100)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ok"], true);
    assert_eq!(fixture.speaker.plays(), 1);
    // Pushed audio never listens for barge-in
    assert_eq!(fixture.microphone.opens(), 0);
    assert!(fixture.state.is_idle());
}
