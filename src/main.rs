use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use beacon_voice::audio::{AudioClip, CpalMicrophone, CpalSpeaker, Microphone, Speaker, Tone};
use beacon_voice::client;
use beacon_voice::config::file::config_file_path;
use beacon_voice::state::{self, StateCell};
use beacon_voice::supervisor::{Supervisor, SupervisorExit};
use beacon_voice::wake::WakeWorker;
use beacon_voice::{Config, HttpBackend, VoiceClient};

/// Beacon Voice - wake-word voice client for the Beacon voice daemon
#[derive(Parser)]
#[command(name = "beacon-voice", version, about)]
struct Cli {
    /// Config file (default: ~/.config/omni/beacon-voice/config.toml)
    #[arg(short, long, env = "BEACON_VOICE_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Listen for the wake word and talk to the daemon (default)
    Run {
        /// Print `STATE:<name>` lines to stdout on every state change
        #[arg(long)]
        state_output: bool,
    },
    /// Run the voice client as a child process and follow its state
    Supervise,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Validate the configuration and print the effective values
    CheckConfig,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity; RUST_LOG wins when set
    let filter = match cli.verbose {
        0 => "info,beacon_voice=info",
        1 => "info,beacon_voice=debug",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    // Logs go to stderr so stdout stays free for state lines
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli.config.as_deref();

    match cli.command.unwrap_or(Command::Run {
        state_output: false,
    }) {
        Command::Run { state_output } => run_client(config_path, state_output),
        Command::Supervise => supervise(config_path, cli.verbose),
        Command::TestMic { duration } => test_mic(config_path, duration),
        Command::TestSpeaker => test_speaker(config_path),
        Command::CheckConfig => check_config(config_path),
    }
}

fn run_client(config_path: Option<&Path>, state_output: bool) -> anyhow::Result<()> {
    let config = Config::load(config_path)?;

    tracing::info!(
        client_id = %config.client.id,
        daemon = %config.daemon.base_url(),
        callback_port = config.client.callback_port,
        "starting beacon voice client"
    );

    let state = if state_output {
        StateCell::with_observer(state::stdout_observer())
    } else {
        StateCell::new()
    };

    let backend = HttpBackend::new(config.daemon.base_url())?;
    let model = WakeWorker::spawn(&config.wake_word, config.audio.sample_rate)?;
    let microphone = CpalMicrophone::new(&config.audio);

    let client = VoiceClient::new(
        config,
        Arc::new(state),
        Arc::new(microphone),
        Arc::new(CpalSpeaker::new()),
        Arc::new(backend),
    );
    client.run(Box::new(model))?;

    Ok(())
}

fn supervise(config_path: Option<&Path>, verbose: u8) -> anyhow::Result<()> {
    let exe = std::env::current_exe()?;

    let mut args: Vec<OsString> = Vec::new();
    if let Some(path) = config_path {
        args.push("--config".into());
        args.push(path.into());
    }
    for _ in 0..verbose {
        args.push("-v".into());
    }
    args.push("run".into());
    args.push("--state-output".into());

    let running = Arc::new(AtomicBool::new(true));
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()?;
    runtime.spawn(client::watch_signals(Arc::clone(&running)));

    let exit = Supervisor::new(exe, args).run(&running)?;
    runtime.shutdown_background();

    match exit {
        SupervisorExit::ChildExited(status) if !status.success() => {
            anyhow::bail!("voice client exited with {status}")
        }
        SupervisorExit::ChildExited(_) | SupervisorExit::Stopped(_) => Ok(()),
    }
}

fn test_mic(config_path: Option<&Path>, duration: u64) -> anyhow::Result<()> {
    let config = Config::load(config_path)?;
    let audio = &config.audio;

    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");
    println!(
        "Sample rate: {} Hz, frame: {} samples, speech threshold: {}",
        audio.sample_rate, audio.frame_size, audio.silence_threshold
    );
    println!("---");

    let microphone = CpalMicrophone::new(audio);
    let mut source = microphone.open()?;

    for i in 0..duration {
        let start = Instant::now();
        let mut total = 0.0_f64;
        let mut frames = 0_u32;
        let mut peak = 0_u16;

        while start.elapsed() < Duration::from_secs(1) {
            let frame = source.read_frame()?;
            total += f64::from(frame.energy());
            frames += 1;
            peak = frame
                .samples()
                .iter()
                .map(|s| s.unsigned_abs())
                .fold(peak, u16::max);
        }

        let energy = if frames == 0 {
            0.0
        } else {
            total / f64::from(frames)
        };

        // Visual meter, threshold at the midpoint
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy / f64::from(audio.silence_threshold) * 25.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);
        let speech = if energy > f64::from(audio.silence_threshold) {
            "speech"
        } else {
            ""
        };

        println!(
            "[{:2}s] Energy: {:7.1} | Peak: {:5} | [{}] {}",
            i + 1,
            energy,
            peak,
            meter,
            speech
        );
    }

    drop(source);

    println!("\n---");
    println!("If the meter moved when you spoke, your mic is working!");
    println!("If speech never crossed the threshold, lower audio.silence_threshold.");
    println!("If energy stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

fn test_speaker(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = Config::load(config_path)?;
    let speaker = CpalSpeaker::new();
    let stop = AtomicBool::new(false);

    println!("Testing speaker output...");
    println!("You should hear the listening chime, then a 440Hz tone for 2 seconds\n");

    speaker.play(&Tone::Listening.render(config.playback.volume), &stop)?;
    std::thread::sleep(Duration::from_millis(300));

    let sample_rate = 24000_u32;
    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..sample_rate * 2)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (std::f32::consts::TAU * 440.0 * t).sin() * 0.3 * config.playback.volume
        })
        .collect();

    println!("Playing {} samples at {} Hz...", samples.len(), sample_rate);
    let completed = speaker.play(&AudioClip::mono(samples, sample_rate), &stop)?;

    println!("\n---");
    if completed {
        println!("If you heard the tone, your speakers are working!");
    } else {
        println!("Playback did not finish; the output device may be stalled.");
    }
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");
    println!("  3. Try: pavucontrol (to check output levels)");

    Ok(())
}

fn check_config(config_path: Option<&Path>) -> anyhow::Result<()> {
    let path = config_path.map(Path::to_path_buf).or_else(config_file_path);
    let config = Config::load(config_path)?;

    match &path {
        Some(path) if path.exists() => println!("Config file: {}", path.display()),
        Some(path) => println!("Config file: {} (not found, using defaults)", path.display()),
        None => println!("Config file: none (using defaults)"),
    }
    println!();
    println!("Daemon:            {}", config.daemon.base_url());
    println!("Client id:         {}", config.client.id);
    println!("Callback port:     {}", config.client.callback_port);
    println!(
        "Audio:             {} Hz, {} ch, {} samples/frame",
        config.audio.sample_rate, config.audio.channels, config.audio.frame_size
    );
    println!(
        "Silence:           threshold {}, {}s ({} frames), max {}s ({} frames)",
        config.audio.silence_threshold,
        config.audio.silence_duration,
        config.audio.silence_frames(),
        config.audio.max_recording,
        config.audio.max_frames()
    );
    println!(
        "Wake word:         {} > {} ({}, worker {})",
        config.wake_word.model,
        config.wake_word.threshold,
        config.wake_word.inference_framework,
        config.wake_word.worker
    );
    println!("Volume:            {}", config.playback.volume);
    println!(
        "Follow-up window:  {}s, barge-in {}",
        config.conversation.follow_up_duration,
        if config.conversation.enable_stop_interrupt {
            "on"
        } else {
            "off"
        }
    );
    println!("Heartbeat:         every {}s", config.heartbeat.interval);
    println!("\nConfiguration is valid.");

    Ok(())
}
