//! Child process termination with SIGTERM → SIGKILL escalation

use std::io;
use std::process::{Child, ExitStatus};
use std::time::Duration;

#[cfg(unix)]
use std::time::Instant;

#[cfg(unix)]
use nix::sys::signal::{self, Signal};
#[cfg(unix)]
use nix::unistd::{self, Pid};

/// Default grace period between SIGTERM and SIGKILL
pub const DEFAULT_GRACE: Duration = Duration::from_secs(5);

#[cfg(unix)]
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Stop a child process, escalating to SIGKILL after `grace`
///
/// 1. Send SIGTERM and poll for exit for up to `grace`
/// 2. If still running, kill it, along with its whole process group when
///    it leads one
/// 3. Wait for reaping
///
/// On non-unix platforms the child is killed immediately.
///
/// # Errors
///
/// Returns error if signalling or waiting on the process fails
pub fn terminate(child: &mut Child, grace: Duration) -> io::Result<ExitStatus> {
    if let Some(status) = child.try_wait()? {
        return Ok(status);
    }

    #[cfg(unix)]
    {
        terminate_unix(child, grace)
    }

    #[cfg(not(unix))]
    {
        let _ = grace;
        child.kill()?;
        child.wait()
    }
}

#[cfg(unix)]
fn terminate_unix(child: &mut Child, grace: Duration) -> io::Result<ExitStatus> {
    let pid = i32::try_from(child.id())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "child pid out of range"))?;

    if let Err(e) = signal::kill(Pid::from_raw(pid), Signal::SIGTERM) {
        // Already gone
        if e == nix::errno::Errno::ESRCH {
            return child.wait();
        }
        return Err(io::Error::other(e));
    }

    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        if let Some(status) = child.try_wait()? {
            tracing::debug!(pid, %status, "child exited after SIGTERM");
            return Ok(status);
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    tracing::warn!(pid, grace_ms = grace.as_millis(), "child ignored SIGTERM, killing");
    let group_leader = unistd::getpgid(Some(Pid::from_raw(pid))) == Ok(Pid::from_raw(pid));
    if group_leader {
        if let Err(e) = signal::killpg(Pid::from_raw(pid), Signal::SIGKILL) {
            tracing::warn!(pid, error = %e, "failed to kill process group");
            child.kill()?;
        }
    } else {
        child.kill()?;
    }
    child.wait()
}

#[cfg(test)]
mod tests {
    use std::process::Command;

    use super::*;

    #[test]
    #[cfg(unix)]
    fn test_terminate_responds_to_sigterm() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        let start = std::time::Instant::now();

        let status = terminate(&mut child, DEFAULT_GRACE).unwrap();
        assert!(!status.success());
        assert!(start.elapsed() < DEFAULT_GRACE);
    }

    #[test]
    #[cfg(unix)]
    fn test_terminate_escalates_when_ignored() {
        let mut child = Command::new("sh")
            .args(["-c", "trap '' TERM; sleep 30"])
            .spawn()
            .unwrap();
        std::thread::sleep(Duration::from_millis(100));

        let status = terminate(&mut child, Duration::from_millis(300)).unwrap();
        assert!(!status.success());
    }

    /// Whether `pid` is gone or only waiting to be reaped
    #[cfg(target_os = "linux")]
    fn is_dead(pid: &str) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Err(_) => true,
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .is_some_and(|rest| rest.trim_start().starts_with('Z')),
        }
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_escalation_kills_process_group() {
        use std::io::{BufRead, BufReader};
        use std::os::unix::process::CommandExt;
        use std::process::Stdio;

        let mut child = Command::new("sh")
            .args(["-c", "trap '' TERM; sleep 30 & echo $!; wait"])
            .stdout(Stdio::piped())
            .process_group(0)
            .spawn()
            .unwrap();

        let mut line = String::new();
        BufReader::new(child.stdout.take().unwrap())
            .read_line(&mut line)
            .unwrap();
        let grandchild = line.trim().to_string();
        assert!(!is_dead(&grandchild));

        terminate(&mut child, Duration::from_millis(300)).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while !is_dead(&grandchild) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(is_dead(&grandchild), "grandchild {grandchild} survived");
    }

    #[test]
    #[cfg(unix)]
    fn test_terminate_already_exited() {
        let mut child = Command::new("true").spawn().unwrap();
        std::thread::sleep(Duration::from_millis(100));

        assert!(terminate(&mut child, DEFAULT_GRACE).unwrap().success());
    }
}
