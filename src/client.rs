//! Voice client: wake loop, callback server and heartbeat wired together
//!
//! The wake loop and every conversation run on the calling thread. The
//! callback server runs on a small tokio runtime, the heartbeat on its own
//! thread. They coordinate only through the shared [`StateCell`] and the
//! running flag.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::Result;
use crate::audio::{FrameSource, Microphone, Speaker};
use crate::backend::Backend;
use crate::callback::{self, CallbackContext};
use crate::config::Config;
use crate::conversation::Conversation;
use crate::playback::Player;
use crate::registrar::{self, Registrar};
use crate::state::StateCell;
use crate::wake::{WakeWordGate, WakeWordModel};

/// Sleep while another activity holds the client
const BUSY_POLL: Duration = Duration::from_millis(50);

/// Wait before reopening a failed microphone
const DEVICE_RETRY: Duration = Duration::from_secs(1);

/// Longest wait for the callback server to drain
const SERVER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// The running voice client
pub struct VoiceClient {
    config: Config,
    state: Arc<StateCell>,
    microphone: Arc<dyn Microphone>,
    speaker: Arc<dyn Speaker>,
    backend: Arc<dyn Backend>,
    running: Arc<AtomicBool>,
}

impl VoiceClient {
    /// Assemble a client from its devices and daemon connection
    #[must_use]
    pub fn new(
        config: Config,
        state: Arc<StateCell>,
        microphone: Arc<dyn Microphone>,
        speaker: Arc<dyn Speaker>,
        backend: Arc<dyn Backend>,
    ) -> Self {
        Self {
            config,
            state,
            microphone,
            speaker,
            backend,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Flag that keeps the client running; clear it to stop
    #[must_use]
    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Run until the running flag is cleared or a signal arrives
    ///
    /// # Errors
    ///
    /// Returns error if the microphone, the callback port or the heartbeat
    /// thread is unavailable at startup
    pub fn run(self, model: Box<dyn WakeWordModel>) -> Result<()> {
        // Fail fast on a missing microphone
        drop(self.microphone.open()?);

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("callback")
            .enable_all()
            .build()?;

        let listener = runtime.block_on(callback::bind(self.config.client.callback_port))?;

        let player = Arc::new(Player::new(
            Arc::clone(&self.speaker),
            Arc::clone(&self.microphone),
            &self.config,
        ));

        let context = Arc::new(CallbackContext::new(
            &self.config,
            Arc::clone(&self.state),
            Arc::clone(&self.microphone),
            Arc::clone(&self.backend),
            Arc::clone(&player),
            Arc::clone(&self.running),
        ));

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        let server = runtime.spawn(callback::serve(listener, context, async {
            let _ = shutdown_rx.await;
        }));
        runtime.spawn(watch_signals(Arc::clone(&self.running)));

        let registrar = Registrar::start(
            Arc::clone(&self.backend),
            registrar::registration_record(&self.config),
            self.config.heartbeat.period(),
            Arc::clone(&self.running),
        )?;

        let conversation = Conversation::new(
            &self.config,
            Arc::clone(&self.state),
            Arc::clone(&self.microphone),
            Arc::clone(&self.backend),
            player,
            Arc::clone(&self.running),
        );

        let mut gate = WakeWordGate::new(model, self.config.wake_word.threshold);
        self.state.announce();

        tracing::info!(
            model = %self.config.wake_word.model,
            threshold = self.config.wake_word.threshold,
            "listening for wake word"
        );
        self.listen(&mut gate, &conversation);

        tracing::info!("shutting down");
        self.running.store(false, Ordering::SeqCst);
        registrar.stop();

        let _ = shutdown_tx.send(());
        let served = runtime.block_on(async {
            tokio::time::timeout(SERVER_SHUTDOWN_TIMEOUT, server).await
        });
        match served {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => tracing::warn!(error = %e, "callback server failed"),
            Ok(Err(e)) => tracing::warn!(error = %e, "callback server task failed"),
            Err(_) => tracing::warn!("callback server did not stop in time"),
        }
        runtime.shutdown_timeout(Duration::from_secs(1));

        tracing::info!("voice client stopped");
        Ok(())
    }

    /// Wake loop: score frames while idle, run a conversation per trigger
    ///
    /// The capture stream is released whenever the client is busy so the
    /// recorder or a callback can open their own.
    fn listen(&self, gate: &mut WakeWordGate, conversation: &Conversation) {
        let mut source: Option<Box<dyn FrameSource>> = None;

        while self.running.load(Ordering::SeqCst) {
            if !self.state.is_idle() {
                if source.take().is_some() {
                    tracing::debug!(state = %self.state.get(), "released microphone");
                }
                std::thread::sleep(BUSY_POLL);
                continue;
            }

            if source.is_none() {
                match self.microphone.open() {
                    Ok(opened) => source = Some(opened),
                    Err(e) => {
                        tracing::warn!(error = %e, "cannot open microphone, retrying");
                        std::thread::sleep(DEVICE_RETRY);
                        continue;
                    }
                }
            }
            let Some(stream) = source.as_mut() else {
                continue;
            };

            let frame = match stream.read_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!(error = %e, "microphone read failed, reopening");
                    source = None;
                    std::thread::sleep(DEVICE_RETRY);
                    continue;
                }
            };

            let trigger = match gate.process(&frame, self.state.get()) {
                Ok(trigger) => trigger,
                Err(e) => {
                    tracing::warn!(error = %e, "wake word scoring failed, skipping frame");
                    continue;
                }
            };

            if trigger.is_some() {
                source = None;
                let outcome = conversation.handle_wake();
                tracing::info!(?outcome, "conversation finished");
                gate.reset();
            }
        }
    }
}

/// Clear `running` on Ctrl-C or SIGTERM
pub async fn watch_signals(running: Arc<AtomicBool>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received ctrl-c"),
        () = terminate => tracing::info!("received SIGTERM"),
    }

    running.store(false, Ordering::SeqCst);
}
