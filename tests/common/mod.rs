//! Shared test utilities
//!
//! Scripted stand-ins for the microphone, speaker, daemon and wake word
//! model, so the voice pipeline runs without audio hardware or a network.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use beacon_voice::audio::{AudioClip, AudioFrame, FrameSource, Microphone, Speaker, wav};
use beacon_voice::wake::{ModelScore, WakeWordModel};
use beacon_voice::{Backend, Config, Error, RegistrationRecord, Result, VoiceReply};

/// Samples per frame in test configs (10ms at 16kHz)
pub const FRAME: usize = 160;

/// Amplitude well above the test silence threshold
pub const LOUD: i16 = 3000;

/// Amplitude well below the test silence threshold
pub const QUIET: i16 = 20;

/// Config with small frames and short windows
///
/// Silence ends a recording after 5 frames, a recording is capped at 100
/// frames and a follow-up waits 10 frames for speech.
#[must_use]
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.audio.frame_size = FRAME;
    config.audio.silence_threshold = 500.0;
    config.audio.silence_duration = 0.05;
    config.audio.max_recording = 1.0;
    config.conversation.follow_up_duration = 0.1;
    config.conversation.enable_stop_interrupt = false;
    config.client.id = "test-client".to_string();
    config.client.callback_port = 0;
    config
}

/// `count` speech frames
#[must_use]
pub fn speech(count: usize) -> Vec<AudioFrame> {
    (0..count).map(|_| AudioFrame::constant(FRAME, LOUD)).collect()
}

/// `count` silent frames
#[must_use]
pub fn silence(count: usize) -> Vec<AudioFrame> {
    (0..count).map(|_| AudioFrame::constant(FRAME, QUIET)).collect()
}

/// Speech followed by silence
#[must_use]
pub fn utterance(speech_frames: usize, silent_frames: usize) -> Vec<AudioFrame> {
    let mut frames = speech(speech_frames);
    frames.extend(silence(silent_frames));
    frames
}

/// A short mono WAV, as the daemon would send
#[must_use]
pub fn reply_wav(millis: u32) -> Vec<u8> {
    let rate = 16000;
    let len = (rate * millis / 1000) as usize;
    let samples: Vec<i16> = (0..len).map(|i| if i % 2 == 0 { 1000 } else { -1000 }).collect();
    wav::encode_pcm16(&samples, rate).expect("failed to encode reply wav")
}

/// Microphone that hands out one frame script per `open`
///
/// A stream plays its script, then silence forever. Each silent frame
/// sleeps briefly so endless readers do not spin. Streams count as live
/// until dropped.
#[derive(Default)]
pub struct ScriptedMicrophone {
    scripts: Mutex<VecDeque<Vec<AudioFrame>>>,
    opens: AtomicUsize,
    live: Arc<AtomicUsize>,
    fail: AtomicBool,
}

impl ScriptedMicrophone {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the frames the next opened stream will deliver
    pub fn push_script(&self, frames: Vec<AudioFrame>) {
        self.scripts.lock().unwrap().push_back(frames);
    }

    /// Make every later `open` fail
    pub fn fail_opens(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    /// Streams opened so far
    #[must_use]
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Streams opened and not yet dropped
    #[must_use]
    pub fn live_streams(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

impl Microphone for ScriptedMicrophone {
    fn open(&self) -> Result<Box<dyn FrameSource>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Audio("no input device".to_string()));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_add(1, Ordering::SeqCst);
        let script = self.scripts.lock().unwrap().pop_front().unwrap_or_default();
        Ok(Box::new(ScriptedSource {
            frames: script.into(),
            live: Arc::clone(&self.live),
        }))
    }
}

struct ScriptedSource {
    frames: VecDeque<AudioFrame>,
    live: Arc<AtomicUsize>,
}

impl Drop for ScriptedSource {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FrameSource for ScriptedSource {
    fn read_frame(&mut self) -> Result<AudioFrame> {
        if let Some(frame) = self.frames.pop_front() {
            return Ok(frame);
        }
        std::thread::sleep(Duration::from_millis(1));
        Ok(AudioFrame::constant(FRAME, QUIET))
    }
}

/// Speaker that records what it was asked to play
///
/// In real-time mode each clip takes its own duration to play and honours
/// the stop flag, like a real device.
#[derive(Default)]
pub struct RecordingSpeaker {
    realtime: bool,
    played: Mutex<Vec<Duration>>,
    stopped: AtomicUsize,
}

impl RecordingSpeaker {
    /// Speaker that returns immediately
    #[must_use]
    pub fn instant() -> Self {
        Self::default()
    }

    /// Speaker that blocks for the clip's duration
    #[must_use]
    pub fn realtime() -> Self {
        Self {
            realtime: true,
            ..Self::default()
        }
    }

    /// Durations of every clip played, in order
    #[must_use]
    pub fn played(&self) -> Vec<Duration> {
        self.played.lock().unwrap().clone()
    }

    /// Clips played so far
    #[must_use]
    pub fn plays(&self) -> usize {
        self.played.lock().unwrap().len()
    }

    /// Clips cut short by the stop flag
    #[must_use]
    pub fn stopped(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl Speaker for RecordingSpeaker {
    fn play(&self, clip: &AudioClip, stop: &AtomicBool) -> Result<bool> {
        self.played.lock().unwrap().push(clip.duration());

        if !self.realtime {
            return Ok(true);
        }

        let deadline = Instant::now() + clip.duration();
        while Instant::now() < deadline {
            if stop.load(Ordering::SeqCst) {
                self.stopped.fetch_add(1, Ordering::SeqCst);
                return Ok(false);
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        Ok(true)
    }
}

/// Daemon stand-in with queued answers and call counters
#[derive(Default)]
pub struct ScriptedBackend {
    replies: Mutex<VecDeque<std::result::Result<VoiceReply, String>>>,
    texts: Mutex<VecDeque<std::result::Result<String, String>>>,
    hold: Mutex<Option<Receiver<()>>>,
    register_failures: Mutex<VecDeque<String>>,
    register_attempts: AtomicUsize,
    registered: Mutex<Vec<RegistrationRecord>>,
    unregisters: AtomicUsize,
    transcribes: AtomicUsize,
    stt_calls: AtomicUsize,
    uploads: Mutex<Vec<usize>>,
}

impl ScriptedBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an answer carrying `audio`
    pub fn push_reply(&self, audio: Vec<u8>) {
        self.replies.lock().unwrap().push_back(Ok(VoiceReply {
            audio,
            transcript: "what time is it".to_string(),
            response_text: "It is noon.".to_string(),
        }));
    }

    /// Queue a failed transcription
    pub fn push_failure(&self, message: &str) {
        self.replies
            .lock()
            .unwrap()
            .push_back(Err(message.to_string()));
    }

    /// Queue a speech-to-text result
    pub fn push_text(&self, text: &str) {
        self.texts.lock().unwrap().push_back(Ok(text.to_string()));
    }

    /// Queue a failed speech-to-text call
    pub fn push_text_failure(&self, message: &str) {
        self.texts
            .lock()
            .unwrap()
            .push_back(Err(message.to_string()));
    }

    /// Refuse the next registration attempt
    pub fn push_register_failure(&self, message: &str) {
        self.register_failures
            .lock()
            .unwrap()
            .push_back(message.to_string());
    }

    /// Block the next `transcribe` until the returned sender fires or drops
    pub fn hold_transcribe(&self) -> Sender<()> {
        let (tx, rx) = mpsc::channel();
        *self.hold.lock().unwrap() = Some(rx);
        tx
    }

    /// Registration calls, refused ones included
    #[must_use]
    pub fn register_attempts(&self) -> usize {
        self.register_attempts.load(Ordering::SeqCst)
    }

    /// Records from accepted registrations
    #[must_use]
    pub fn registrations(&self) -> Vec<RegistrationRecord> {
        self.registered.lock().unwrap().clone()
    }

    #[must_use]
    pub fn unregisters(&self) -> usize {
        self.unregisters.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn transcribes(&self) -> usize {
        self.transcribes.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn stt_calls(&self) -> usize {
        self.stt_calls.load(Ordering::SeqCst)
    }

    /// Byte sizes of every WAV upload, in order
    #[must_use]
    pub fn uploads(&self) -> Vec<usize> {
        self.uploads.lock().unwrap().clone()
    }
}

impl Backend for ScriptedBackend {
    fn register(&self, record: &RegistrationRecord) -> Result<()> {
        self.register_attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.register_failures.lock().unwrap().pop_front() {
            return Err(Error::Backend(format!("registration failed: {message}")));
        }
        self.registered.lock().unwrap().push(record.clone());
        Ok(())
    }

    fn unregister(&self, _client_id: &str) -> Result<()> {
        self.unregisters.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn transcribe(&self, wav: Vec<u8>) -> Result<VoiceReply> {
        self.transcribes.fetch_add(1, Ordering::SeqCst);
        self.uploads.lock().unwrap().push(wav.len());

        let hold = self.hold.lock().unwrap().take();
        if let Some(rx) = hold {
            let _ = rx.recv_timeout(Duration::from_secs(5));
        }

        match self.replies.lock().unwrap().pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(message)) => Err(Error::Backend(message)),
            None => Err(Error::Backend("no scripted reply".to_string())),
        }
    }

    fn speech_to_text(&self, _wav: Vec<u8>) -> Result<String> {
        self.stt_calls.fetch_add(1, Ordering::SeqCst);
        match self.texts.lock().unwrap().pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(Error::Backend(message)),
            None => Err(Error::Backend("no scripted text".to_string())),
        }
    }
}

/// Wake word model that fires on chosen calls
pub struct ScriptedWakeModel {
    fire_on: Vec<usize>,
    calls: Arc<AtomicUsize>,
    resets: Arc<AtomicUsize>,
}

impl ScriptedWakeModel {
    /// Score 0.9 on the listed (1-based) calls and 0.0 otherwise
    #[must_use]
    pub fn firing_on(fire_on: Vec<usize>) -> Self {
        Self {
            fire_on,
            calls: Arc::new(AtomicUsize::new(0)),
            resets: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared counter of `score` calls
    #[must_use]
    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    /// Shared counter of `reset` calls
    #[must_use]
    pub fn resets(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.resets)
    }
}

impl WakeWordModel for ScriptedWakeModel {
    fn score(&mut self, _frame: &AudioFrame) -> Result<Vec<ModelScore>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let score = if self.fire_on.contains(&call) { 0.9 } else { 0.0 };
        Ok(vec![ModelScore {
            model: "hey_jarvis".to_string(),
            score,
        }])
    }

    fn reset(&mut self) -> Result<()> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
