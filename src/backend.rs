//! Voice daemon HTTP API
//!
//! All calls are blocking and carry their own timeout. They run on the
//! wake loop thread, the registrar thread, or a blocking pool thread, never
//! directly on the async runtime.

use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

const REGISTER_TIMEOUT: Duration = Duration::from_secs(5);
const TRANSCRIBE_TIMEOUT: Duration = Duration::from_secs(60);
const STT_TIMEOUT: Duration = Duration::from_secs(10);

/// How the daemon reaches this client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationRecord {
    /// Client identifier
    pub client_id: String,

    /// Base URL of the callback server
    pub callback_url: String,

    /// Daemon host
    pub daemon_host: String,

    /// Daemon port
    pub daemon_port: u16,
}

/// Daemon answer to a recorded question
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoiceReply {
    /// Synthesized speech as WAV
    pub audio: Vec<u8>,

    /// What the daemon heard
    pub transcript: String,

    /// What the daemon answered
    pub response_text: String,
}

/// Operations the voice daemon provides
pub trait Backend: Send + Sync {
    /// Announce this client and its callback URL
    ///
    /// # Errors
    ///
    /// Returns error if the daemon is unreachable or refuses
    fn register(&self, record: &RegistrationRecord) -> Result<()>;

    /// Withdraw this client
    ///
    /// # Errors
    ///
    /// Returns error if the daemon is unreachable
    fn unregister(&self, client_id: &str) -> Result<()>;

    /// Send a recorded question and receive the spoken answer
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the daemon reports an error
    fn transcribe(&self, wav: Vec<u8>) -> Result<VoiceReply>;

    /// Transcribe a short reply without answering it
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the daemon reports an error
    fn speech_to_text(&self, wav: Vec<u8>) -> Result<String>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterRequest<'a> {
    client_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    callback_url: Option<&'a str>,
}

#[derive(Deserialize)]
struct SttResponse {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: String,
}

/// [`Backend`] over HTTP
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
}

impl HttpBackend {
    /// Client for the daemon at `base_url` (e.g. `http://127.0.0.1:3847`)
    ///
    /// Must not be called from within an async runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder().build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn post_audio(&self, path: &str, wav: Vec<u8>, timeout: Duration) -> Result<Response> {
        tracing::debug!(bytes = wav.len(), path, "sending audio to daemon");
        Ok(self
            .client
            .post(self.url(path))
            .header("Content-Type", "application/octet-stream")
            .body(wav)
            .timeout(timeout)
            .send()?)
    }
}

impl Backend for HttpBackend {
    fn register(&self, record: &RegistrationRecord) -> Result<()> {
        let body = RegisterRequest {
            client_id: &record.client_id,
            callback_url: Some(&record.callback_url),
        };

        let response = self
            .client
            .post(self.url("/voice/register"))
            .json(&body)
            .timeout(REGISTER_TIMEOUT)
            .send()?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let text = response.text().unwrap_or_default();
            return Err(Error::Backend(format!("registration failed: {status} {text}")));
        }

        tracing::debug!(client_id = %record.client_id, "registered with daemon");
        Ok(())
    }

    fn unregister(&self, client_id: &str) -> Result<()> {
        let body = RegisterRequest {
            client_id,
            callback_url: None,
        };

        self.client
            .post(self.url("/voice/unregister"))
            .json(&body)
            .timeout(REGISTER_TIMEOUT)
            .send()?;

        Ok(())
    }

    fn transcribe(&self, wav: Vec<u8>) -> Result<VoiceReply> {
        let response = self.post_audio("/voice/transcribe", wav, TRANSCRIBE_TIMEOUT)?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(error_from_response(response));
        }

        let transcript = decoded_header(response.headers(), "X-Transcription");
        let response_text = decoded_header(response.headers(), "X-Response-Text");
        let audio = response.bytes()?.to_vec();

        tracing::info!(transcript = %transcript, "daemon heard");
        tracing::info!(response = %truncate(&response_text, 100), "daemon answered");

        Ok(VoiceReply {
            audio,
            transcript,
            response_text,
        })
    }

    fn speech_to_text(&self, wav: Vec<u8>) -> Result<String> {
        let response = self.post_audio("/voice/stt", wav, STT_TIMEOUT)?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(error_from_response(response));
        }

        let parsed: SttResponse = response.json()?;
        Ok(parsed.text)
    }
}

/// Build an error from a non-200 response, preferring the JSON `error` field
fn error_from_response(response: Response) -> Error {
    let status = response.status();
    let body = response.text().unwrap_or_default();

    let message = serde_json::from_str::<ErrorResponse>(&body)
        .map(|e| e.error)
        .unwrap_or_else(|_| truncate(&body, 200).to_string());

    tracing::warn!(%status, error = %message, "daemon error");
    Error::Backend(format!("{status}: {message}"))
}

/// Percent-decoded header value, empty when missing
fn decoded_header(headers: &HeaderMap, name: &str) -> String {
    let Some(raw) = headers.get(name).and_then(|v| v.to_str().ok()) else {
        return String::new();
    };

    urlencoding::decode(raw).map_or_else(|_| raw.to_string(), |s| s.into_owned())
}

fn truncate(text: &str, max_chars: usize) -> &str {
    text.char_indices()
        .nth(max_chars)
        .map_or(text, |(i, _)| &text[..i])
}
