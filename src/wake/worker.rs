//! Wake word model hosted in a helper process
//!
//! The worker is started with `--model`, `--framework` and `--sample-rate`,
//! prints `READY port=<n>` once its model is loaded, and then serves on
//! localhost:
//!
//! - `POST /score` with little-endian i16 samples → `{"scores": {"name": 0.93}}`
//! - `POST /reset` → any 2xx

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::time::Duration;

use serde::Deserialize;

use super::{ModelScore, WakeWordModel};
use crate::audio::AudioFrame;
use crate::config::WakeWordConfig;
use crate::process;
use crate::{Error, Result};

/// Longest wait for the worker to load its model
const STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-frame scoring timeout
const SCORE_TIMEOUT: Duration = Duration::from_secs(2);

/// Grace period before the worker is killed
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
struct ScoreResponse {
    scores: BTreeMap<String, f32>,
}

/// Wake word model served by a child process
pub struct WakeWorker {
    child: Child,
    client: reqwest::blocking::Client,
    base_url: String,
}

impl WakeWorker {
    /// Start the worker and wait until it reports ready
    ///
    /// # Errors
    ///
    /// Returns error if the worker cannot be started or never becomes ready
    pub fn spawn(config: &WakeWordConfig, sample_rate: u32) -> Result<Self> {
        let mut child = Command::new(&config.worker)
            .arg("--model")
            .arg(&config.model)
            .arg("--framework")
            .arg(&config.inference_framework)
            .arg("--sample-rate")
            .arg(sample_rate.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| Error::WakeWord(format!("failed to start {}: {e}", config.worker)))?;

        let Some(stdout) = child.stdout.take() else {
            let _ = process::terminate(&mut child, SHUTDOWN_GRACE);
            return Err(Error::WakeWord("worker stdout unavailable".to_string()));
        };

        let (ready_tx, ready_rx) = mpsc::channel();
        let spawned = std::thread::Builder::new()
            .name("wake-worker-output".to_string())
            .spawn(move || {
                let mut ready_tx = Some(ready_tx);
                for line in BufReader::new(stdout).lines() {
                    let Ok(line) = line else { break };
                    if let Some(port) = parse_ready_line(&line) {
                        if let Some(tx) = ready_tx.take() {
                            let _ = tx.send(port);
                        }
                        continue;
                    }
                    tracing::debug!(line = %line, "wake worker");
                }
            });

        if let Err(e) = spawned {
            let _ = process::terminate(&mut child, SHUTDOWN_GRACE);
            return Err(e.into());
        }

        let port = match ready_rx.recv_timeout(STARTUP_TIMEOUT) {
            Ok(port) => port,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                let _ = process::terminate(&mut child, SHUTDOWN_GRACE);
                return Err(Error::WakeWord(format!(
                    "worker not ready after {}s",
                    STARTUP_TIMEOUT.as_secs()
                )));
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                let status = process::terminate(&mut child, SHUTDOWN_GRACE)
                    .map(|s| s.to_string())
                    .unwrap_or_default();
                return Err(Error::WakeWord(format!(
                    "worker exited before becoming ready {status}"
                )));
            }
        };

        let client = reqwest::blocking::Client::builder()
            .timeout(SCORE_TIMEOUT)
            .build()
            .map_err(|e| Error::WakeWord(e.to_string()))?;

        tracing::info!(
            model = %config.model,
            framework = %config.inference_framework,
            port,
            "wake word worker ready"
        );

        Ok(Self {
            child,
            client,
            base_url: format!("http://127.0.0.1:{port}"),
        })
    }
}

impl WakeWordModel for WakeWorker {
    fn score(&mut self, frame: &AudioFrame) -> Result<Vec<ModelScore>> {
        let body: Vec<u8> = frame
            .samples()
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();

        let response = self
            .client
            .post(format!("{}/score", self.base_url))
            .header("Content-Type", "application/octet-stream")
            .body(body)
            .send()?;

        if !response.status().is_success() {
            return Err(Error::WakeWord(format!(
                "worker returned {}",
                response.status()
            )));
        }

        let parsed: ScoreResponse = response.json()?;
        Ok(parsed
            .scores
            .into_iter()
            .map(|(model, score)| ModelScore { model, score })
            .collect())
    }

    fn reset(&mut self) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/reset", self.base_url))
            .send()?;

        if !response.status().is_success() {
            return Err(Error::WakeWord(format!(
                "worker reset returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

impl Drop for WakeWorker {
    fn drop(&mut self) {
        match process::terminate(&mut self.child, SHUTDOWN_GRACE) {
            Ok(status) => tracing::debug!(%status, "wake word worker stopped"),
            Err(e) => tracing::warn!(error = %e, "failed to stop wake word worker"),
        }
    }
}

/// Parse `READY port=<n>`
fn parse_ready_line(line: &str) -> Option<u16> {
    line.trim()
        .strip_prefix("READY")?
        .split_whitespace()
        .find_map(|field| field.strip_prefix("port="))
        .and_then(|port| port.parse().ok())
}
