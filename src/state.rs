//! Client state and the busy/free gate
//!
//! [`StateCell`] is the only state shared between the wake loop and the
//! callback server. Leaving `Idle` is a compare-and-set, so two callers racing
//! for the microphone cannot both win. Each change and its notification
//! happen under one lock, so the observer sees changes in the order they
//! were made.

use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Prefix of state lines written with `--state-output`
pub const STATE_LINE_PREFIX: &str = "STATE:";

/// Conversation state of the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ClientState {
    /// Listening for the wake word only
    Idle = 0,
    /// Recording user speech
    Listening = 1,
    /// Waiting for the daemon
    Processing = 2,
    /// Playing audio
    Speaking = 3,
}

impl ClientState {
    /// Stable lowercase name, used by state output and the health endpoint
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Processing => "processing",
            Self::Speaking => "speaking",
        }
    }

    /// Parse a name produced by [`ClientState::as_str`]
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "idle" => Some(Self::Idle),
            "listening" => Some(Self::Listening),
            "processing" => Some(Self::Processing),
            "speaking" => Some(Self::Speaking),
            _ => None,
        }
    }

    pub(crate) const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Idle),
            1 => Some(Self::Listening),
            2 => Some(Self::Processing),
            3 => Some(Self::Speaking),
            _ => None,
        }
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Callback invoked after every state change
pub type StateObserver = Box<dyn Fn(ClientState) + Send + Sync>;

/// Observer that prints `STATE:<name>` lines to stdout
#[must_use]
pub fn stdout_observer() -> StateObserver {
    Box::new(|state| {
        let mut out = std::io::stdout().lock();
        let _ = writeln!(out, "{STATE_LINE_PREFIX}{state}");
        let _ = out.flush();
    })
}

/// Parse a line written by [`stdout_observer`]
#[must_use]
pub fn parse_state_line(line: &str) -> Option<ClientState> {
    ClientState::from_name(line.trim().strip_prefix(STATE_LINE_PREFIX)?)
}

/// Atomic holder for [`ClientState`]
pub struct StateCell {
    value: AtomicU8,
    observer: Option<StateObserver>,
    /// Held across a change and its notification
    order: Mutex<()>,
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StateCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateCell")
            .field("state", &self.get())
            .finish_non_exhaustive()
    }
}

impl StateCell {
    /// Create a cell in the `Idle` state
    #[must_use]
    pub const fn new() -> Self {
        Self {
            value: AtomicU8::new(ClientState::Idle as u8),
            observer: None,
            order: Mutex::new(()),
        }
    }

    /// Create a cell that reports every change to `observer`
    #[must_use]
    pub fn with_observer(observer: StateObserver) -> Self {
        Self {
            value: AtomicU8::new(ClientState::Idle as u8),
            observer: Some(observer),
            order: Mutex::new(()),
        }
    }

    /// Current state
    #[must_use]
    pub fn get(&self) -> ClientState {
        ClientState::from_u8(self.value.load(Ordering::SeqCst)).unwrap_or(ClientState::Idle)
    }

    /// Whether the client is free
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.get() == ClientState::Idle
    }

    /// Unconditionally move to `state`
    ///
    /// Only the holder of a [`StateGuard`] should call this, to advance
    /// through the phases of the activity it owns.
    pub fn set(&self, state: ClientState) {
        let _order = self.lock_order();
        let previous = self.value.swap(state as u8, Ordering::SeqCst);
        if previous != state as u8 {
            tracing::debug!(state = %state, "state changed");
            self.notify(state);
        }
    }

    /// Move from `Idle` to `state` if and only if currently `Idle`
    ///
    /// Returns a guard that puts the cell back to `Idle` when dropped, or
    /// `None` if the client is busy.
    #[must_use]
    pub fn acquire(&self, state: ClientState) -> Option<StateGuard<'_>> {
        if state == ClientState::Idle {
            return None;
        }

        let _order = self.lock_order();
        self.value
            .compare_exchange(
                ClientState::Idle as u8,
                state as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .ok()?;

        tracing::debug!(state = %state, "state acquired");
        self.notify(state);
        Some(StateGuard { cell: self })
    }

    /// Report the current state to the observer without changing it
    pub fn announce(&self) {
        let _order = self.lock_order();
        self.notify(self.get());
    }

    fn lock_order(&self) -> MutexGuard<'_, ()> {
        self.order.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, state: ClientState) {
        if let Some(observer) = &self.observer {
            observer(state);
        }
    }
}

/// Exclusive ownership of a non-idle state; resets to `Idle` on drop
#[must_use = "dropping the guard immediately releases the client"]
pub struct StateGuard<'a> {
    cell: &'a StateCell,
}

impl StateGuard<'_> {
    /// Advance to another phase while keeping ownership
    pub fn advance(&self, state: ClientState) {
        self.cell.set(state);
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        self.cell.set(ClientState::Idle);
    }
}
