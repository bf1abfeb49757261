//! Beacon Voice - wake-word voice client for the Beacon voice daemon
//!
//! Listens for a wake phrase, records the question, sends it to the daemon
//! and plays the spoken answer, with one follow-up question allowed without
//! repeating the wake phrase. The daemon can also push chimes and audio back
//! through a small callback server.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   frames   ┌───────────┐  trigger  ┌──────────────┐
//! │  Microphone  ├───────────►│ Wake gate ├──────────►│ Conversation │
//! └──────────────┘            └───────────┘           └──────┬───────┘
//!                                                            │
//!        ┌──────────────┬─────────────────┬──────────────────┤
//!        ▼              ▼                 ▼                  ▼
//!   ┌──────────┐  ┌──────────┐     ┌────────────┐     ┌────────────┐
//!   │ Recorder │  │ Backend  │     │  Playback  │     │ StateCell  │
//!   └──────────┘  └────┬─────┘     └────────────┘     └─────▲──────┘
//!                      │ HTTP                               │
//!                 ┌────▼─────┐    callbacks   ┌─────────────┴──┐
//!                 │  Daemon  ├───────────────►│ Callback server│
//!                 └──────────┘                └────────────────┘
//! ```

pub mod audio;
pub mod backend;
pub mod callback;
pub mod client;
pub mod config;
pub mod confirm;
pub mod conversation;
pub mod error;
pub mod playback;
pub mod process;
pub mod recorder;
pub mod registrar;
pub mod state;
pub mod supervisor;
pub mod wake;

pub use backend::{Backend, HttpBackend, RegistrationRecord, VoiceReply};
pub use client::VoiceClient;
pub use config::Config;
pub use confirm::ConfirmationResult;
pub use conversation::{Conversation, ConversationOutcome};
pub use error::{Error, Result};
pub use state::{ClientState, StateCell};
