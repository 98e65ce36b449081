use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use assist_client::actions::DeviceRequestHandler;
use assist_client::audio::{
    AudioSink, AudioSource, ConversationStream, DEFAULT_FLUSH_SIZE, DEFAULT_SAMPLE_RATE,
    DeviceSink, DeviceSource, DuplexAudioStream, WavFileSink, WavFileSource, bytes_to_samples,
    samples_to_bytes,
};
use assist_client::config::{ConfigOverrides, DeviceRegistrar, TriggerConfig};
use assist_client::credentials::resolve_access_token;
use assist_client::display::{BrowserDisplay, DisplaySink};
use assist_client::indicator::{FileIndicator, ListeningIndicator, LogIndicator};
use assist_client::trigger::{
    ButtonTrigger, SpeechToText, TriggerFlag, TriggerSource, WakeWordTrigger, spawn_all,
};
use assist_client::{Config, ConversationSession, SessionRunner, SessionSettings, WebSocketTransport};

/// Assist - push-to-talk client for a streaming voice assistant
#[derive(Parser)]
#[command(name = "assist", version, about)]
struct Cli {
    /// Assistant service endpoint (ws:// or wss://)
    #[arg(long, env = "ASSIST_ENDPOINT")]
    endpoint: Option<String>,

    /// OAuth credentials file
    #[arg(long, env = "ASSIST_CREDENTIALS")]
    credentials: Option<PathBuf>,

    /// Device identity file (`{"id", "model_id"}`)
    #[arg(long)]
    device_config: Option<PathBuf>,

    /// Registered device instance id
    #[arg(long, env = "ASSIST_DEVICE_ID")]
    device_id: Option<String>,

    /// Registered device model id
    #[arg(long, env = "ASSIST_DEVICE_MODEL_ID")]
    device_model_id: Option<String>,

    /// Project to register a new device instance under when no device id is
    /// known
    #[arg(long, env = "ASSIST_PROJECT_ID")]
    project_id: Option<String>,

    /// Device registration API root
    #[arg(long, env = "ASSIST_REGISTRATION_ENDPOINT")]
    registration_endpoint: Option<String>,

    /// Language code of the assistant [default: en-US]
    #[arg(long, env = "ASSIST_LANG")]
    lang: Option<String>,

    /// Show visual responses in the browser
    #[arg(long)]
    display: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Read the request from this audio file instead of the microphone
    #[arg(short = 'i', long)]
    input_audio_file: Option<PathBuf>,

    /// Write the response to this audio file instead of the speaker
    #[arg(short = 'o', long)]
    output_audio_file: Option<PathBuf>,

    /// Audio sample rate in hertz [default: 16000]
    #[arg(long)]
    audio_sample_rate: Option<u32>,

    /// Audio sample width in bytes [default: 2]
    #[arg(long)]
    audio_sample_width: Option<usize>,

    /// Bytes per chunk sent to the service [default: 3200]
    #[arg(long)]
    audio_iter_size: Option<usize>,

    /// Bytes per audio device or file block [default: 6400]
    #[arg(long)]
    audio_block_size: Option<usize>,

    /// Bytes of silence written when draining playback [default: 25600]
    #[arg(long)]
    audio_flush_size: Option<usize>,

    /// Exchange deadline in seconds [default: 185]
    #[arg(long)]
    deadline: Option<u64>,

    /// Run a single conversation and exit
    #[arg(long)]
    once: bool,

    /// Button value file to poll (e.g. /sys/class/gpio/gpio23/value)
    #[arg(long, env = "ASSIST_BUTTON")]
    button: Option<PathBuf>,

    /// Listen for the wake phrase (needs ASSIST_STT_API_KEY)
    #[arg(long)]
    wake_word: bool,

    /// Listening indicator value file (e.g. /sys/class/leds/led0/brightness)
    #[arg(long, env = "ASSIST_INDICATOR")]
    indicator: Option<PathBuf>,

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
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            endpoint: self.endpoint.clone(),
            credentials: self.credentials.clone(),
            device_config: self.device_config.clone(),
            device_id: self.device_id.clone(),
            device_model_id: self.device_model_id.clone(),
            project_id: self.project_id.clone(),
            registration_endpoint: self.registration_endpoint.clone(),
            lang: self.lang.clone(),
            display: self.display,
            deadline_secs: self.deadline,
            sample_rate: self.audio_sample_rate,
            sample_width: self.audio_sample_width,
            iter_size: self.audio_iter_size,
            block_size: self.audio_block_size,
            flush_size: self.audio_flush_size,
            input_file: self.input_audio_file.clone(),
            output_file: self.output_audio_file.clone(),
            button: self.button.clone(),
            wake_word: self.wake_word,
            indicator: self.indicator.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,assist_client=info",
        1 => "info,assist_client=debug,assist=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    if let Some(cmd) = &cli.command {
        match cmd {
            Command::TestMic { duration } => test_mic(*duration, cli.audio_sample_rate).await?,
            Command::TestSpeaker => test_speaker(cli.audio_sample_rate).await?,
        }
        return Ok(ExitCode::SUCCESS);
    }

    let mut config = Config::load(cli.overrides())?;
    tracing::debug!(?config, "loaded configuration");

    let token = resolve_access_token(config.access_token.take(), config.credentials_path.as_deref())
        .await?;

    let registrar = DeviceRegistrar::new(config.registration_endpoint.clone());
    let device = config.device.clone().into_identity(&registrar, &token).await?;

    tracing::info!(endpoint = %config.endpoint, "connecting to assistant service");
    let transport = WebSocketTransport::new(config.endpoint.clone(), token);

    let audio = open_audio(&config)?;

    let indicator: Arc<dyn ListeningIndicator> = match &config.indicator_path {
        Some(path) => Arc::new(FileIndicator::new(path)),
        None => Arc::new(LogIndicator),
    };
    indicator.set(false);

    let dispatcher = device_handler(&device.id, Arc::clone(&indicator));

    let settings = SessionSettings {
        language_code: config.language_code.clone(),
        device,
        display: config.display,
        deadline: config.deadline,
    };
    let mut session = ConversationSession::new(audio, transport, settings, Arc::new(dispatcher))
        .with_indicator(Arc::clone(&indicator));
    if config.display {
        let display: Arc<dyn DisplaySink> = Arc::new(BrowserDisplay::in_temp_dir());
        session = session.with_display(display);
    }

    let flag = Arc::new(TriggerFlag::new());
    let mut runner = SessionRunner::new(session, Arc::clone(&flag));

    let mode = if config.audio.uses_files() {
        Mode::SingleTurn
    } else if cli.once {
        Mode::Once
    } else {
        Mode::Triggers(trigger_sources(config.triggers, config.audio.sample_rate)?)
    };

    tokio::select! {
        result = serve(&mut runner, &flag, mode) => {
            result?;
            Ok(ExitCode::SUCCESS)
        }
        _ = tokio::signal::ctrl_c() => {
            indicator.set(false);
            tracing::info!("interrupted");
            Ok(ExitCode::from(1))
        }
    }
}

/// How conversations get started
enum Mode {
    /// One turn against audio files
    SingleTurn,
    /// One conversation, starting immediately
    Once,
    /// Conversations on demand until a fatal error
    Triggers(Vec<Box<dyn TriggerSource>>),
}

#[allow(clippy::future_not_send)]
async fn serve(
    runner: &mut SessionRunner<ConversationStream, WebSocketTransport>,
    flag: &Arc<TriggerFlag>,
    mode: Mode,
) -> assist_client::Result<()> {
    match mode {
        Mode::SingleTurn => runner.run_single_turn().await,
        Mode::Once => runner.run_conversation().await.map(|_| ()),
        Mode::Triggers(sources) => {
            if sources.is_empty() {
                tracing::warn!("no trigger sources configured, nothing will start a conversation");
            }
            let _handles = spawn_all(sources, flag)?;
            runner.run().await
        }
    }
}

/// Open the audio path, swapping in files where requested
fn open_audio(config: &Config) -> anyhow::Result<ConversationStream> {
    let audio = &config.audio;

    let source: Box<dyn AudioSource> = match &audio.input_file {
        Some(path) => Box::new(WavFileSource::new(path, audio.sample_rate, audio.block_size)),
        None => Box::new(DeviceSource::new(audio.sample_rate)?),
    };
    let sink: Box<dyn AudioSink> = match &audio.output_file {
        Some(path) => Box::new(WavFileSink::new(path, audio.sample_rate)),
        None => Box::new(DeviceSink::new(audio.sample_rate, audio.flush_size)?),
    };

    let mut stream = ConversationStream::new(source, sink, audio.sample_rate, audio.iter_size);
    stream.set_volume_percent(audio.volume_percent);
    Ok(stream)
}

/// Handlers for the device traits this client implements
fn device_handler(device_id: &str, indicator: Arc<dyn ListeningIndicator>) -> DeviceRequestHandler {
    DeviceRequestHandler::new(device_id)
        .command("action.devices.commands.OnOff", |params: Value| async move {
            let on = params.get("on").and_then(Value::as_bool).unwrap_or(false);
            tracing::info!(on, "turning device {}", if on { "on" } else { "off" });
        })
        .command("com.example.commands.BlinkLight", move |params: Value| {
            blink(Arc::clone(&indicator), params)
        })
}

/// Blink the indicator `number` times at `speed` (SLOWLY, NORMALLY, QUICKLY)
async fn blink(indicator: Arc<dyn ListeningIndicator>, params: Value) {
    let number = params
        .get("number")
        .and_then(|n| n.as_u64().or_else(|| n.as_str().and_then(|s| s.parse().ok())))
        .unwrap_or(1);
    let period = match params.get("speed").and_then(Value::as_str) {
        Some("SLOWLY") => Duration::from_secs(2),
        Some("QUICKLY") => Duration::from_millis(500),
        _ => Duration::from_secs(1),
    };

    tracing::info!(number, period_ms = u64::try_from(period.as_millis()).unwrap_or(u64::MAX), "device is blinking");
    for _ in 0..number {
        indicator.set(true);
        tokio::time::sleep(period / 2).await;
        indicator.set(false);
        tokio::time::sleep(period / 2).await;
    }
}

fn trigger_sources(
    triggers: TriggerConfig,
    sample_rate: u32,
) -> anyhow::Result<Vec<Box<dyn TriggerSource>>> {
    let mut sources: Vec<Box<dyn TriggerSource>> = Vec::new();

    if let Some(path) = triggers.button_path {
        sources.push(Box::new(
            ButtonTrigger::new(path).active_low(triggers.button_active_low),
        ));
    }

    #[cfg(unix)]
    if triggers.signal {
        sources.push(Box::new(assist_client::trigger::SignalTrigger));
    }

    if let Some(wake) = triggers.wake_word {
        let stt = SpeechToText::new(wake.provider, wake.api_key, wake.model)?;
        sources.push(Box::new(WakeWordTrigger::new(
            wake.phrases,
            sample_rate,
            Arc::new(stt),
        )));
    }

    Ok(sources)
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64, sample_rate: Option<u32>) -> anyhow::Result<()> {
    let sample_rate = sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE);
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let (tx, mut rx) = mpsc::channel(256);
    let mut capture = DeviceSource::new(sample_rate)?;
    capture.start(tx)?;

    println!("Sample rate: {sample_rate} Hz");
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let mut samples = Vec::new();
        while let Ok(block) = rx.try_recv() {
            samples.extend(bytes_to_samples(&block));
        }
        let energy = calculate_rms(&samples);
        let peak = samples
            .iter()
            .map(|s| f32::from(*s).abs() / 32768.0)
            .fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );
    }

    capture.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: arecord -l (to list devices)");
    println!("  3. Try: pavucontrol (to check levels)");

    Ok(())
}

/// Calculate RMS energy of 16-bit samples, normalized to [0, 1]
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples
        .iter()
        .map(|&s| {
            let v = f32::from(s) / 32768.0;
            v * v
        })
        .sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Test speaker output with a sine wave
async fn test_speaker(sample_rate: Option<u32>) -> anyhow::Result<()> {
    let sample_rate = sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE);
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let frequency = 440.0_f32;
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    let samples: Vec<i16> = (0..sample_rate * 2)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            ((2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 * 32767.0) as i16
        })
        .collect();

    println!("Playing {} samples at {} Hz...", samples.len(), sample_rate);

    let bytes = samples_to_bytes(&samples);
    tokio::task::spawn_blocking(move || -> assist_client::Result<()> {
        let mut playback = DeviceSink::new(sample_rate, DEFAULT_FLUSH_SIZE)?;
        playback.start()?;
        playback.write(&bytes)?;
        playback.flush()?;
        playback.stop();
        Ok(())
    })
    .await??;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");
    println!("  3. Try: pavucontrol (to check output levels)");

    Ok(())
}
