//! Callback server for daemon-initiated requests
//!
//! - `POST /chime` plays the notification chime and asks the user whether
//!   they want to hear it
//! - `POST /play` plays pushed WAV audio
//! - `GET /health` reports liveness and the current state
//!
//! Both POST handlers take the client through the same busy/free gate as the
//! wake loop, so a callback never records or plays over a conversation.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::audio::{AudioClip, Microphone, Tone};
use crate::backend::Backend;
use crate::config::Config;
use crate::confirm::{self, ConfirmationResult};
use crate::playback::Player;
use crate::recorder::{Recorder, RecorderSettings};
use crate::state::{ClientState, StateCell};
use crate::{Error, Result};

/// Largest accepted request body
const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Notification announced by a chime
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChimeRequest {
    /// Notification text
    #[serde(default)]
    pub text: String,

    /// Notification kind
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

/// Everything the callback handlers need
pub struct CallbackContext {
    state: Arc<StateCell>,
    microphone: Arc<dyn Microphone>,
    backend: Arc<dyn Backend>,
    player: Arc<Player>,
    confirmation: Recorder,
    running: Arc<AtomicBool>,
}

impl CallbackContext {
    /// Build from configuration and shared collaborators
    #[must_use]
    pub fn new(
        config: &Config,
        state: Arc<StateCell>,
        microphone: Arc<dyn Microphone>,
        backend: Arc<dyn Backend>,
        player: Arc<Player>,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            state,
            microphone,
            backend,
            player,
            confirmation: Recorder::new(RecorderSettings::confirmation(&config.audio)),
            running,
        }
    }

    /// Chime and wait for the user's answer
    ///
    /// Returns `None` without side effects if the client is busy.
    pub fn run_chime(&self, request: &ChimeRequest) -> Option<ConfirmationResult> {
        let Some(_guard) = self.state.acquire(ClientState::Listening) else {
            tracing::info!(state = %self.state.get(), "client busy, rejecting chime");
            return None;
        };

        tracing::info!(
            kind = request.kind.as_deref().unwrap_or("notification"),
            text = %request.text.chars().take(80).collect::<String>(),
            "chime requested"
        );

        self.player.play_tone(Tone::Chime);
        let result = self.listen_for_confirmation();
        tracing::info!(result = %result, "chime answered");
        Some(result)
    }

    /// Record a short reply and classify it
    ///
    /// Silence or a recording failure is a timeout; a transcription failure
    /// after speech was heard counts as confirmed.
    fn listen_for_confirmation(&self) -> ConfirmationResult {
        let recorded = self
            .microphone
            .open()
            .and_then(|mut source| self.confirmation.record(source.as_mut(), &self.running));

        let utterance = match recorded {
            Ok(Some(utterance)) => utterance,
            Ok(None) => {
                tracing::info!("no speech during confirmation window");
                return ConfirmationResult::Timeout;
            }
            Err(e) => {
                tracing::error!(error = %e, "confirmation listen failed");
                return ConfirmationResult::Timeout;
            }
        };

        let text = utterance
            .to_wav()
            .and_then(|wav| self.backend.speech_to_text(wav));

        match text {
            Ok(text) => {
                let result = confirm::classify(&text);
                tracing::info!(text = %text, result = %result, "confirmation transcribed");
                result
            }
            Err(e) => {
                tracing::warn!(error = %e, "confirmation STT failed, assuming confirmed");
                ConfirmationResult::Confirmed
            }
        }
    }

    /// Play pushed audio without barge-in
    ///
    /// # Errors
    ///
    /// Returns [`CallbackError::Busy`] if the client is not idle, or
    /// [`CallbackError::PlaybackFailed`] if the output device fails
    pub fn play_pushed(&self, clip: &AudioClip) -> std::result::Result<(), CallbackError> {
        let Some(_guard) = self.state.acquire(ClientState::Speaking) else {
            tracing::info!(state = %self.state.get(), "client busy, rejecting pushed audio");
            return Err(CallbackError::Busy);
        };

        self.player
            .play_clip(clip, false)
            .map(|_| ())
            .map_err(|e| CallbackError::PlaybackFailed(e.to_string()))
    }
}

/// Build the callback router
pub fn router(context: Arc<CallbackContext>) -> Router {
    Router::new()
        .route("/chime", post(chime))
        .route("/play", post(play))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(context)
}

/// Bind the callback listener on all interfaces
///
/// # Errors
///
/// Returns error if the port cannot be bound
pub async fn bind(port: u16) -> Result<TcpListener> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Callback(format!("failed to bind {addr}: {e}")))
}

/// Serve callbacks until `shutdown` resolves
///
/// # Errors
///
/// Returns error if the server fails
pub async fn serve(
    listener: TcpListener,
    context: Arc<CallbackContext>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "callback server listening");
    }

    axum::serve(listener, router(context))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| Error::Callback(e.to_string()))?;

    tracing::info!("callback server stopped");
    Ok(())
}

/// Chime response body
#[derive(Debug, Serialize)]
struct ChimeResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'static str>,
}

async fn chime(
    State(context): State<Arc<CallbackContext>>,
    body: Bytes,
) -> std::result::Result<Json<ChimeResponse>, CallbackError> {
    let request: ChimeRequest = if body.is_empty() {
        ChimeRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|_| CallbackError::InvalidJson)?
    };

    let result = tokio::task::spawn_blocking(move || context.run_chime(&request))
        .await
        .map_err(|e| CallbackError::Internal(e.to_string()))?;

    Ok(Json(match result {
        Some(result) => ChimeResponse {
            status: result.as_str(),
            error: None,
        },
        None => ChimeResponse {
            status: "rejected",
            error: Some("Client busy"),
        },
    }))
}

/// Play response body
#[derive(Debug, Serialize)]
struct PlayResponse {
    ok: bool,
}

async fn play(
    State(context): State<Arc<CallbackContext>>,
    body: Bytes,
) -> std::result::Result<Json<PlayResponse>, CallbackError> {
    if body.is_empty() {
        return Err(CallbackError::NoAudio);
    }

    tracing::info!(bytes = body.len(), "received audio to play");

    let clip = context
        .player
        .decode(&body)
        .map_err(|e| CallbackError::InvalidAudio(e.to_string()))?;

    tokio::task::spawn_blocking(move || context.play_pushed(&clip))
        .await
        .map_err(|e| CallbackError::Internal(e.to_string()))??;

    Ok(Json(PlayResponse { ok: true }))
}

/// Health response body
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    state: &'static str,
}

async fn health(State(context): State<Arc<CallbackContext>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        state: context.state.get().as_str(),
    })
}

/// Callback handler errors
#[derive(Debug)]
pub enum CallbackError {
    /// Chime body is not JSON
    InvalidJson,
    /// Play body is empty
    NoAudio,
    /// Play body is not a readable WAV file
    InvalidAudio(String),
    /// Another activity holds the client
    Busy,
    /// Output device failed
    PlaybackFailed(String),
    /// Blocking task failed
    Internal(String),
}

impl IntoResponse for CallbackError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Self::InvalidJson => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({"status": "error", "error": "Invalid JSON"}),
            ),
            Self::NoAudio => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({"error": "No audio data"}),
            ),
            Self::InvalidAudio(msg) => (StatusCode::BAD_REQUEST, serde_json::json!({"error": msg})),
            Self::Busy => (
                StatusCode::CONFLICT,
                serde_json::json!({"ok": false, "error": "Client busy"}),
            ),
            Self::PlaybackFailed(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({"ok": false, "error": msg}),
            ),
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "callback task failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    serde_json::json!({"error": "Internal error"}),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}
