//! Classification of a spoken reply to a notification chime

use std::fmt;

use serde::{Deserialize, Serialize};

/// Phrases that decline the notification (checked first)
const REJECTION_PHRASES: &[&str] = &[
    "not now",
    "later",
    "no",
    "busy",
    "stop",
    "ignore",
    "never mind",
    "nevermind",
];

/// Phrases that accept the notification
const CONFIRMATION_PHRASES: &[&str] = &[
    "yeah", "yes", "what's up", "go ahead", "what", "hey", "yep", "sure", "okay", "ok", "go",
    "tell me", "shoot",
];

/// How the user answered a chime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmationResult {
    /// The user wants to hear the notification
    Confirmed,
    /// The user declined
    Rejected,
    /// Nothing was said
    Timeout,
}

impl ConfirmationResult {
    /// Lowercase wire name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Rejected => "rejected",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for ConfirmationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify transcribed text
///
/// Matching is by substring, so "know" counts as "no". Speech that matches
/// nothing is taken as a confirmation.
#[must_use]
pub fn classify(text: &str) -> ConfirmationResult {
    let lower = text.trim().to_lowercase();
    if lower.is_empty() {
        return ConfirmationResult::Timeout;
    }

    if REJECTION_PHRASES.iter().any(|p| lower.contains(p)) {
        return ConfirmationResult::Rejected;
    }

    match CONFIRMATION_PHRASES.iter().find(|p| lower.contains(**p)) {
        Some(phrase) => tracing::debug!(phrase, "confirmation phrase heard"),
        None => tracing::debug!(text = %lower, "unrecognized reply, assuming confirmed"),
    }
    ConfirmationResult::Confirmed
}
