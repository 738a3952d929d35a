use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cookmode_voice::voice::{
    AudioCapture, AudioPlayback, CpalOutputDevice, IntentClassifier, Microphone, SampleSource,
    Services, SpeechToText, StreamingPlayer, Synthesizer, TextToSpeech, VoiceActivityDetector,
    calculate_rms,
};
use cookmode_voice::{Config, CookingSession, Recipe};

/// Cookmode - hands-free voice assistant for guided cooking
#[derive(Parser)]
#[command(name = "cookmode", version, about)]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(short, long, env = "COOKMODE_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a voice session for a recipe
    Run {
        /// Recipe JSON file handed over by the recipe flow
        #[arg(short, long)]
        recipe: PathBuf,
        /// Step index to start at (0-based)
        #[arg(short, long, default_value = "0")]
        step: usize,
        /// Directory to write reply audio into when the session ends
        #[arg(long)]
        save_dir: Option<PathBuf>,
    },
    /// Test microphone input and voice-activity detection
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Test streamed TTS output
    TestTts {
        /// Text to speak
        #[arg(default_value = "안녕하세요! 음성 합성 테스트입니다.")]
        text: String,
        /// Write the collected audio to this file
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Check that the external services are reachable
    Check,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,cookmode_voice=info",
        1 => "info,cookmode_voice=debug",
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
    tracing::debug!(?config, "loaded configuration");

    match cli.command {
        Command::Run {
            recipe,
            step,
            save_dir,
        } => run_session(config, &recipe, step, save_dir).await,
        Command::TestMic { duration } => test_mic(&config, duration).await,
        Command::TestSpeaker => test_speaker().await,
        Command::TestTts { text, out } => test_tts(&config, &text, out).await,
        Command::Check => check_services(&config).await,
    }
}

/// Run a voice session until Ctrl-C
#[allow(clippy::future_not_send)]
async fn run_session(
    config: Config,
    recipe_path: &std::path::Path,
    step: usize,
    save_dir: Option<PathBuf>,
) -> anyhow::Result<()> {
    let recipe = Recipe::load(recipe_path)?;

    let services = Services {
        transcriber: Arc::new(SpeechToText::new(&config.services.stt_url)?),
        classifier: Arc::new(IntentClassifier::new(&config.services.classify_url)?),
        synthesizer: Arc::new(TextToSpeech::new(
            &config.services.tts_url,
            config.voice.clone(),
        )?),
    };

    let microphone = Microphone::open();
    if !microphone.is_live() {
        eprintln!("warning: no microphone found, voice commands are disabled for this session");
    }

    let mut session = CookingSession::new(
        config,
        recipe,
        microphone,
        services,
        Box::new(CpalOutputDevice),
    )
    .start_at(step);
    if let Some(dir) = save_dir {
        session = session.save_replies_to(dir);
    }

    tracing::info!("cookmode ready - speak to move between steps, Ctrl-C to stop");

    let summary = session
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for Ctrl-C");
            }
        })
        .await?;

    println!(
        "Session ended on step {} ({} utterances, {} replies)",
        summary.final_step + 1,
        summary.utterances,
        summary.replies
    );
    for path in &summary.saved {
        println!("  saved {}", path.display());
    }

    Ok(())
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(config: &Config, duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = AudioCapture::new()?;
    capture.start()?;

    println!("Sample rate: {} Hz", capture.sample_rate());
    println!("VAD threshold: {}", config.vad.threshold);
    println!("---");

    let mut detector = VoiceActivityDetector::new(&config.vad);

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = capture.take_samples()?;
        let energy = calculate_rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);
        let event = detector.process(&samples, Instant::now());

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}] {:?}{}",
            i + 1,
            energy,
            peak,
            meter,
            detector.state(),
            event.map(|e| format!(" {e:?}")).unwrap_or_default()
        );
    }

    capture.release();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let playback = AudioPlayback::new();

    // Generate 2 seconds of 440Hz sine wave at 24kHz sample rate
    let sample_rate = 24000_u32;
    let frequency = 440.0_f32;
    let duration_secs = 2.0_f32;
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let num_samples = (sample_rate as f32 * duration_secs) as usize;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    println!("Playing {} samples at {} Hz...", samples.len(), sample_rate);

    playback.play(samples, sample_rate).await?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}

/// Test streamed TTS output
#[allow(clippy::future_not_send)]
async fn test_tts(config: &Config, text: &str, out: Option<PathBuf>) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let tts = TextToSpeech::new(&config.services.tts_url, config.voice.clone())?;
    let stream = tts.synthesize(text).await?;
    println!("Streaming at {} Hz...", stream.sample_rate);

    let (_stop_tx, mut stop_rx) = tokio::sync::watch::channel(false);
    let mut player = StreamingPlayer::new(Box::new(CpalOutputDevice))
        .with_chunk_timeout(config.services.request_timeout());
    let asset = player.play_and_collect(stream, &mut stop_rx).await?;
    println!("Collected {} bytes of WAV audio", asset.bytes.len());

    // Let the scheduled tail play out before closing the output
    let pcm_bytes = asset.bytes.len().saturating_sub(44) as u64;
    let secs = pcm_bytes / 2 / u64::from(asset.sample_rate.max(1));
    tokio::time::sleep(Duration::from_secs(secs + 1)).await;
    player.stop();

    if let Some(path) = out {
        std::fs::write(&path, &asset.bytes)?;
        println!("Wrote {}", path.display());
    }

    println!("\n---");
    println!("If you heard the speech, TTS is working!");

    Ok(())
}

/// Check each service's health endpoint
async fn check_services(config: &Config) -> anyhow::Result<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()?;

    let mut failed = 0;
    for (name, base) in [
        ("stt", &config.services.stt_url),
        ("classify", &config.services.classify_url),
        ("tts", &config.services.tts_url),
    ] {
        let url = format!("{}/health", base.trim_end_matches('/'));
        match client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => println!("{name:<9} ok      {url}"),
            Ok(resp) => {
                failed += 1;
                println!("{name:<9} {}     {url}", resp.status().as_u16());
            }
            Err(e) => {
                failed += 1;
                println!("{name:<9} down    {url} ({e})");
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} service(s) unreachable");
    }
    Ok(())
}
