//! Runs the voice client as a child process and follows its state
//!
//! The child is started with `--state-output`. A reader thread parses its
//! `STATE:` lines and leaves the latest one in a single slot; the supervisor
//! loop picks it up on its next poll. Stopping the child is SIGTERM, a grace
//! period, then SIGKILL.

use std::ffi::OsString;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::process;
use crate::state::{self, ClientState};
use crate::{Error, Result};

/// How often the supervisor applies the latest state and checks the child
pub const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Empty slot marker
const NO_STATE: u8 = u8::MAX;

/// Why supervision ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorExit {
    /// The child exited on its own
    ChildExited(ExitStatus),
    /// The supervisor was asked to stop and stopped the child
    Stopped(ExitStatus),
}

/// Parent process for the voice client
#[derive(Debug, Clone)]
pub struct Supervisor {
    program: PathBuf,
    args: Vec<OsString>,
    grace: Duration,
}

impl Supervisor {
    /// Supervise `program` run with `args`
    #[must_use]
    pub fn new(program: impl Into<PathBuf>, args: Vec<OsString>) -> Self {
        Self {
            program: program.into(),
            args,
            grace: process::DEFAULT_GRACE,
        }
    }

    /// Change the SIGTERM grace period
    #[must_use]
    pub const fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Supervise, logging each state change
    ///
    /// # Errors
    ///
    /// Returns error if the child cannot be started or waited on
    pub fn run(&self, running: &AtomicBool) -> Result<SupervisorExit> {
        self.run_with(running, |state| {
            tracing::info!(state = %state, status = describe(state), "voice client state");
        })
    }

    /// Supervise, passing each state change to `on_state`
    ///
    /// Returns when the child exits or `running` is cleared.
    ///
    /// # Errors
    ///
    /// Returns error if the child cannot be started or waited on
    pub fn run_with(
        &self,
        running: &AtomicBool,
        mut on_state: impl FnMut(ClientState),
    ) -> Result<SupervisorExit> {
        let mut child = self.spawn()?;
        tracing::info!(pid = child.id(), program = %self.program.display(), "voice client started");

        let pending = Arc::new(AtomicU8::new(NO_STATE));
        let reader = match self.start_reader(&mut child, Arc::clone(&pending)) {
            Ok(reader) => reader,
            Err(e) => {
                let _ = process::terminate(&mut child, self.grace);
                return Err(e);
            }
        };

        let mut shown: Option<ClientState> = None;
        let exit = loop {
            apply_pending(&pending, &mut shown, &mut on_state);

            if let Some(status) = child.try_wait()? {
                if status.success() {
                    tracing::info!(%status, "voice client exited");
                } else {
                    tracing::warn!(%status, "voice client exited");
                }
                break SupervisorExit::ChildExited(status);
            }

            if !running.load(Ordering::SeqCst) {
                tracing::info!("stopping voice client");
                let status = process::terminate(&mut child, self.grace)?;
                tracing::info!(%status, "voice client stopped");
                break SupervisorExit::Stopped(status);
            }

            std::thread::sleep(POLL_INTERVAL);
        };

        if reader.join().is_err() {
            tracing::warn!("state reader panicked");
        }
        // Lines written just before exit
        apply_pending(&pending, &mut shown, &mut on_state);

        Ok(exit)
    }

    fn spawn(&self) -> Result<Child> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        // Own process group, so terminal signals reach only the supervisor
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        command.spawn().map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("failed to start {}: {e}", self.program.display()),
            ))
        })
    }

    fn start_reader(&self, child: &mut Child, pending: Arc<AtomicU8>) -> Result<JoinHandle<()>> {
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Io(std::io::Error::other("child stdout unavailable")))?;

        let handle = std::thread::Builder::new()
            .name("state-reader".to_string())
            .spawn(move || {
                for line in BufReader::new(stdout).lines() {
                    let Ok(line) = line else { break };
                    match state::parse_state_line(&line) {
                        Some(state) => pending.store(state as u8, Ordering::SeqCst),
                        None => tracing::debug!(line = %line, "voice client output"),
                    }
                }
            })?;

        Ok(handle)
    }
}

fn apply_pending(
    pending: &AtomicU8,
    shown: &mut Option<ClientState>,
    on_state: &mut impl FnMut(ClientState),
) {
    let Some(state) = ClientState::from_u8(pending.swap(NO_STATE, Ordering::SeqCst)) else {
        return;
    };
    if *shown != Some(state) {
        *shown = Some(state);
        on_state(state);
    }
}

/// Human-readable status for a state
#[must_use]
pub const fn describe(state: ClientState) -> &'static str {
    match state {
        ClientState::Idle => "Listening for wake word",
        ClientState::Listening => "Recording...",
        ClientState::Processing => "Processing...",
        ClientState::Speaking => "Speaking...",
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn shell(script: &str) -> Supervisor {
        Supervisor::new("sh", vec!["-c".into(), script.into()])
            .with_grace(Duration::from_millis(500))
    }

    #[test]
    fn test_child_exit_is_reported() {
        let running = AtomicBool::new(true);
        let seen = Mutex::new(Vec::new());

        let exit = shell("echo STATE:idle; echo hello; echo STATE:idle; exit 3")
            .run_with(&running, |s| seen.lock().unwrap().push(s))
            .unwrap();

        let SupervisorExit::ChildExited(status) = exit else {
            panic!("expected child exit, got {exit:?}");
        };
        assert_eq!(status.code(), Some(3));
        assert_eq!(*seen.lock().unwrap(), vec![ClientState::Idle]);
    }

    #[test]
    fn test_stop_terminates_child() {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(600));
            flag.store(false, Ordering::SeqCst);
        });

        let seen = Mutex::new(Vec::new());
        let exit = shell("echo STATE:speaking; exec sleep 30")
            .run_with(&running, |s| seen.lock().unwrap().push(s))
            .unwrap();

        assert!(matches!(exit, SupervisorExit::Stopped(_)));
        assert_eq!(*seen.lock().unwrap(), vec![ClientState::Speaking]);
    }

    #[test]
    fn test_missing_program_fails() {
        let running = AtomicBool::new(true);
        assert!(
            Supervisor::new("/nonexistent/beacon-voice", Vec::new())
                .run(&running)
                .is_err()
        );
    }
}
