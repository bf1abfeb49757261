//! Registration with the daemon and periodic renewal

use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::backend::{Backend, RegistrationRecord};
use crate::config::Config;

/// Longest sleep between checks of the running flag
const STOP_SLICE: Duration = Duration::from_millis(200);

/// Keeps the daemon's registration of this client fresh
pub struct Registrar {
    backend: Arc<dyn Backend>,
    record: RegistrationRecord,
    handle: Option<JoinHandle<()>>,
}

impl Registrar {
    /// Register once, then renew every `interval` on a background thread
    ///
    /// Registration failures are logged and retried on the next tick.
    ///
    /// # Errors
    ///
    /// Returns error if the heartbeat thread cannot be started
    pub fn start(
        backend: Arc<dyn Backend>,
        record: RegistrationRecord,
        interval: Duration,
        running: Arc<AtomicBool>,
    ) -> std::io::Result<Self> {
        register(backend.as_ref(), &record);

        let handle = {
            let backend = Arc::clone(&backend);
            let record = record.clone();
            std::thread::Builder::new()
                .name("heartbeat".to_string())
                .spawn(move || heartbeat(backend.as_ref(), &record, interval, &running))?
        };

        Ok(Self {
            backend,
            record,
            handle: Some(handle),
        })
    }

    /// The record sent on every registration
    #[must_use]
    pub const fn record(&self) -> &RegistrationRecord {
        &self.record
    }

    /// Join the heartbeat thread and unregister
    ///
    /// The running flag must already be cleared.
    pub fn stop(mut self) {
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            tracing::warn!("heartbeat thread panicked");
        }

        match self.backend.unregister(&self.record.client_id) {
            Ok(()) => tracing::info!("unregistered from daemon"),
            Err(e) => tracing::debug!(error = %e, "unregister failed"),
        }
    }
}

fn register(backend: &dyn Backend, record: &RegistrationRecord) {
    match backend.register(record) {
        Ok(()) => tracing::info!(
            daemon = %format!("{}:{}", record.daemon_host, record.daemon_port),
            callback_url = %record.callback_url,
            "registered with daemon"
        ),
        Err(e) => tracing::warn!(error = %e, "cannot register with daemon"),
    }
}

fn heartbeat(
    backend: &dyn Backend,
    record: &RegistrationRecord,
    interval: Duration,
    running: &AtomicBool,
) {
    loop {
        let deadline = Instant::now() + interval;
        loop {
            if !running.load(Ordering::SeqCst) {
                tracing::debug!("heartbeat stopped");
                return;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            std::thread::sleep(remaining.min(STOP_SLICE));
        }

        tracing::debug!("heartbeat");
        register(backend, record);
    }
}

/// Registration record for this client
#[must_use]
pub fn registration_record(config: &Config) -> RegistrationRecord {
    RegistrationRecord {
        client_id: config.client.id.clone(),
        callback_url: format!("http://{}:{}", local_ip(), config.client.callback_port),
        daemon_host: config.daemon.host.clone(),
        daemon_port: config.daemon.port,
    }
}

/// Address of the interface that routes to the LAN
///
/// A UDP connect sends no packets; it only selects a route.
#[must_use]
pub fn local_ip() -> IpAddr {
    let probe = || -> std::io::Result<IpAddr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80))?;
        Ok(socket.local_addr()?.ip())
    };

    probe()
        .ok()
        .filter(|ip| !ip.is_unspecified())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}
