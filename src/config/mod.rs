//! Configuration for the voice client
//!
//! Every option lives in one TOML file (see [`file`]). Each section is a
//! partial overlay on top of defaults; unknown keys are rejected so typos
//! surface at startup instead of silently falling back to defaults.

pub mod file;

use std::time::Duration;

use serde::Deserialize;

use crate::{Error, Result};

/// Voice client configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Voice daemon connection
    pub daemon: DaemonConfig,

    /// Client identity and callback listener
    pub client: ClientConfig,

    /// Microphone capture and voice activity detection
    pub audio: AudioConfig,

    /// Wake word model
    pub wake_word: WakeWordConfig,

    /// Speaker output
    pub playback: PlaybackConfig,

    /// Follow-up and barge-in behavior
    pub conversation: ConversationConfig,

    /// Registration renewal
    pub heartbeat: HeartbeatConfig,
}

/// Voice daemon connection
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    /// Daemon host name or address
    pub host: String,

    /// Daemon HTTP port
    pub port: u16,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3847,
        }
    }
}

impl DaemonConfig {
    /// Base URL of the daemon HTTP API
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Client identity and callback listener
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    /// Identifier the daemon knows this client by (defaults to the hostname)
    pub id: String,

    /// Port the callback server listens on
    pub callback_port: u16,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            id: default_client_id(),
            callback_port: 3849,
        }
    }
}

/// Microphone capture and voice activity detection
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AudioConfig {
    /// Capture sample rate in Hz
    pub sample_rate: u32,

    /// Capture channel count (only the first channel is used)
    pub channels: u16,

    /// Samples per frame
    pub frame_size: usize,

    /// Mean absolute amplitude (16-bit scale) above which a frame counts as speech
    pub silence_threshold: f32,

    /// Seconds of silence that end a recording
    pub silence_duration: f64,

    /// Longest recording in seconds
    pub max_recording: f64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            frame_size: 1280,
            silence_threshold: 500.0,
            silence_duration: 1.5,
            max_recording: 15.0,
        }
    }
}

impl AudioConfig {
    /// Number of whole frames that fit in `seconds`
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn frames_for(&self, seconds: f64) -> usize {
        if seconds <= 0.0 || self.frame_size == 0 {
            return 0;
        }
        (seconds * f64::from(self.sample_rate) / self.frame_size as f64) as usize
    }

    /// Consecutive silent frames that end a recording (at least one)
    #[must_use]
    pub fn silence_frames(&self) -> usize {
        self.frames_for(self.silence_duration).max(1)
    }

    /// Frame budget for a single recording (at least one)
    #[must_use]
    pub fn max_frames(&self) -> usize {
        self.frames_for(self.max_recording).max(1)
    }

    /// Wall-clock length of one frame
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn frame_duration(&self) -> Duration {
        Duration::from_secs_f64(self.frame_size as f64 / f64::from(self.sample_rate))
    }
}

/// Wake word model
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WakeWordConfig {
    /// Model name or path to a model file
    pub model: String,

    /// Score above which a wake trigger fires
    pub threshold: f32,

    /// Inference framework passed to the worker ("onnx" or "tflite")
    pub inference_framework: String,

    /// Worker command that hosts the model
    pub worker: String,
}

impl Default for WakeWordConfig {
    fn default() -> Self {
        Self {
            model: "hey_jarvis".to_string(),
            threshold: 0.5,
            inference_framework: "onnx".to_string(),
            worker: "beacon-wake-worker".to_string(),
        }
    }
}

/// Speaker output
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlaybackConfig {
    /// Linear volume multiplier
    pub volume: f32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self { volume: 1.0 }
    }
}

/// Follow-up and barge-in behavior
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConversationConfig {
    /// Seconds to wait for a follow-up question after a response (0 disables)
    pub follow_up_duration: f64,

    /// Let sustained speech interrupt response playback
    pub enable_stop_interrupt: bool,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            follow_up_duration: 3.0,
            enable_stop_interrupt: true,
        }
    }
}

/// Registration renewal
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HeartbeatConfig {
    /// Seconds between re-registrations
    pub interval: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self { interval: 30 }
    }
}

impl HeartbeatConfig {
    /// Interval as a [`Duration`]
    #[must_use]
    pub const fn period(&self) -> Duration {
        Duration::from_secs(self.interval)
    }
}

/// Hostname of this machine, or a fixed fallback
fn default_client_id() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "beacon-voice".to_string())
}

impl Config {
    /// Load configuration from `path`, or the default location when `None`
    ///
    /// A missing file yields defaults. Environment overrides are applied
    /// after the file and before validation.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed, or a value is invalid
    pub fn load(path: Option<&std::path::Path>) -> Result<Self> {
        let mut config = file::load_config_file(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text
    ///
    /// # Errors
    ///
    /// Returns error if the text is not valid configuration
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `BEACON_DAEMON_HOST`, `BEACON_DAEMON_PORT` and `BEACON_CLIENT_ID`
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("BEACON_DAEMON_HOST") {
            self.daemon.host = host;
        }

        if let Ok(port) = std::env::var("BEACON_DAEMON_PORT") {
            match port.parse() {
                Ok(port) => self.daemon.port = port,
                Err(e) => {
                    tracing::warn!(value = %port, error = %e, "ignoring invalid BEACON_DAEMON_PORT");
                }
            }
        }

        if let Ok(id) = std::env::var("BEACON_CLIENT_ID") {
            self.client.id = id;
        }
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first invalid option
    pub fn validate(&self) -> Result<()> {
        fn invalid(msg: &str) -> Result<()> {
            Err(Error::Config(msg.to_string()))
        }

        if self.daemon.host.trim().is_empty() {
            return invalid("daemon.host must not be empty");
        }
        if self.daemon.port == 0 {
            return invalid("daemon.port must be non-zero");
        }
        if self.client.id.trim().is_empty() {
            return invalid("client.id must not be empty");
        }

        let audio = &self.audio;
        if !(8000..=48000).contains(&audio.sample_rate) {
            return invalid("audio.sample_rate must be between 8000 and 48000");
        }
        if audio.channels == 0 {
            return invalid("audio.channels must be at least 1");
        }
        if audio.frame_size == 0 {
            return invalid("audio.frame_size must be at least 1");
        }
        if !(audio.silence_threshold > 0.0 && audio.silence_threshold < 32768.0) {
            return invalid("audio.silence_threshold must be between 0 and 32768");
        }
        if audio.silence_duration <= 0.0 {
            return invalid("audio.silence_duration must be positive");
        }
        if audio.max_recording <= 0.0 {
            return invalid("audio.max_recording must be positive");
        }

        if !(self.wake_word.threshold > 0.0 && self.wake_word.threshold < 1.0) {
            return invalid("wake_word.threshold must be between 0 and 1");
        }
        if self.wake_word.model.trim().is_empty() {
            return invalid("wake_word.model must not be empty");
        }

        if !(0.0..=2.0).contains(&self.playback.volume) {
            return invalid("playback.volume must be between 0.0 and 2.0");
        }
        if self.conversation.follow_up_duration < 0.0 {
            return invalid("conversation.follow_up_duration must not be negative");
        }
        if self.heartbeat.interval == 0 {
            return invalid("heartbeat.interval must be at least 1 second");
        }

        Ok(())
    }
}
