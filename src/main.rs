use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use voice_relay::daemon::build_synthesizer;
use voice_relay::voice::{
    AudioCapture, AudioPlayback, AudioSink, FrameSource, SAMPLE_RATE, Waveform,
    list_devices,
};
use voice_relay::{Config, Daemon};

/// Voice relay - wake word, spoken command, spoken reply
#[derive(Parser)]
#[command(name = "voice-relay", version, about)]
struct Cli {
    /// Config file (defaults to ~/.config/voice-relay/config.toml)
    #[arg(short, long, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Test TTS output
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
    /// List audio input and output devices
    Devices,
    /// Print the resolved configuration and check it
    CheckConfig,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,voice_relay=info",
        1 => "info,voice_relay=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(cli.config.as_deref())?;

    // Handle subcommands
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration } => test_mic(&config, duration).await,
            Command::TestSpeaker => test_speaker(&config).await,
            Command::TestTts { text } => test_tts(&config, &text).await,
            Command::Devices => show_devices(),
            Command::CheckConfig => check_config(&config),
        };
    }

    tracing::debug!(?config, "loaded configuration");

    let daemon = Daemon::new(config)?;
    tracing::info!("voice relay ready - say \"{}\"", daemon.wake_words().join("\" or \""));

    // Run until interrupted
    if let Some(summary) = daemon.run().await? {
        println!("{summary}");
    }

    Ok(())
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(config: &Config, duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = AudioCapture::new(config.audio.input_device.as_deref())?;
    println!("Device: {}", capture.device_name());
    println!("Sample rate: {SAMPLE_RATE} Hz");
    println!("---");

    capture.open()?;
    let second = usize::try_from(SAMPLE_RATE)?;

    for i in 0..duration {
        let frame = capture.next_frame(second).await?;
        let energy = frame.rms();
        let peak = frame
            .to_f32()
            .iter()
            .map(|s| s.abs())
            .fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );
    }

    capture.close();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Run: voice-relay devices");
    println!("  2. Set RELAY_INPUT_DEVICE to the right input");
    println!("  3. Run: arecord -l (to list devices)");
    println!("  4. Try: pavucontrol (to check levels)");

    Ok(())
}

/// Test speaker output with a sine wave
#[allow(clippy::future_not_send)]
async fn test_speaker(config: &Config) -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let mut playback = AudioPlayback::new(config.audio.output_device.as_deref())?;

    // 2 seconds of 440Hz sine wave at 24kHz sample rate
    let sample_rate = 24000_u32;
    let frequency = 440.0_f32;
    let num_samples = usize::try_from(sample_rate * 2)?;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    println!("Playing {} samples at {} Hz...", samples.len(), sample_rate);
    playback.play(&Waveform::new(samples, sample_rate)).await?;

    println!("Playing wake chime...");
    tokio::time::sleep(Duration::from_millis(500)).await;
    playback.play(&Waveform::chime()).await?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: voice-relay devices");
    println!("  2. Run: pactl list sinks short");
    println!("  3. Try: pavucontrol (to check output levels)");

    Ok(())
}

/// Test TTS output through the configured provider
#[allow(clippy::future_not_send)]
async fn test_tts(config: &Config, text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let synthesizer = build_synthesizer(config)?;

    println!("Synthesizing speech with {}...", synthesizer.name());
    let waveform = synthesizer.synthesize(text).await?;
    println!(
        "Got {} samples at {} Hz ({:.1}s)",
        waveform.samples.len(),
        waveform.sample_rate,
        waveform.duration().as_secs_f32()
    );

    println!("Playing audio...");
    let mut playback = AudioPlayback::new(config.audio.output_device.as_deref())?;
    playback.play(&waveform).await?;

    println!("\n---");
    println!("If you heard the speech, TTS is working!");

    Ok(())
}

/// List audio devices
fn show_devices() -> anyhow::Result<()> {
    let (inputs, outputs) = list_devices()?;

    println!("Input devices:");
    for name in &inputs {
        println!("  {name}");
    }
    println!("\nOutput devices:");
    for name in &outputs {
        println!("  {name}");
    }

    Ok(())
}

/// Print the resolved configuration and validate it
fn check_config(config: &Config) -> anyhow::Result<()> {
    println!("Wake words:        {}", config.wake.words.join(", "));
    println!("Threshold:         {}", config.wake.threshold);
    println!("Warm-up frames:    {}", config.wake.warmup_frames);
    println!("Silence:           {:?}", config.recording.silence_duration);
    println!("Max command:       {:?}", config.recording.max_duration);
    println!("VAD:               {} ({:?} frames)", config.vad.kind, config.recording.frame_duration);
    println!("Conversation:      {:?}", config.conversation_timeout);
    println!("Settle delay:      {:?}", config.audio.settle_delay);
    println!("STT:               {} ({})", config.stt.provider, config.stt.model);
    println!("TTS:               {} ({})", config.tts.provider, config.tts.model);
    println!(
        "Reasoner:          {} {} (timeout {:?})",
        config.reasoner.program,
        config.reasoner.args.join(" "),
        config.reasoner.timeout
    );
    println!(
        "Input device:      {}",
        config.audio.input_device.as_deref().unwrap_or("(default)")
    );
    println!(
        "Output device:     {}",
        config.audio.output_device.as_deref().unwrap_or("(default)")
    );

    config.validate()?;
    println!("\nConfiguration OK");

    Ok(())
}
