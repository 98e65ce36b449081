//! Configuration management for the assistant client
//!
//! Values are layered: command line (which clap already merges with its
//! environment variables) over the TOML file over built-in defaults. Secrets
//! are only read from the environment or the file.

pub mod device;
pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

pub use device::{DeviceIdentity, DeviceRegistrar, DeviceSetup};
pub use file::AssistConfigFile;

use crate::audio::{
    DEFAULT_BLOCK_SIZE, DEFAULT_FLUSH_SIZE, DEFAULT_ITER_SIZE, DEFAULT_SAMPLE_RATE,
    DEFAULT_SAMPLE_WIDTH, DEFAULT_VOLUME_PERCENT,
};
use crate::trigger::SttProvider;
use crate::{Error, Result};

/// Default service endpoint
pub const DEFAULT_ENDPOINT: &str = "wss://embeddedassistant.googleapis.com/v1alpha2/assist";

/// Default device registration API root
pub const DEFAULT_REGISTRATION_ENDPOINT: &str = "https://embeddedassistant.googleapis.com/v1alpha2";

/// Default language code
pub const DEFAULT_LANGUAGE: &str = "en-US";

/// Default exchange deadline
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(60 * 3 + 5);

/// Assistant client configuration
#[derive(Debug)]
pub struct Config {
    /// Service endpoint URL
    pub endpoint: String,

    /// OAuth credentials file
    pub credentials_path: Option<PathBuf>,

    /// Explicit access token (`ASSIST_ACCESS_TOKEN`)
    pub access_token: Option<SecretString>,

    /// Device identity, or what is needed to register one
    pub device: DeviceSetup,

    /// Device registration API root
    pub registration_endpoint: String,

    /// Language code sent with every turn
    pub language_code: String,

    /// Render visual responses
    pub display: bool,

    /// Bound on one whole exchange
    pub deadline: Duration,

    /// Audio settings
    pub audio: AudioConfig,

    /// Trigger settings
    pub triggers: TriggerConfig,

    /// Listening indicator value file; logs only when unset
    pub indicator_path: Option<PathBuf>,
}

/// Audio settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioConfig {
    /// Sample rate in hertz
    pub sample_rate: u32,
    /// Sample width in bytes; only 2 (LINEAR16) is supported
    pub sample_width: usize,
    /// Bytes per chunk handed to the exchange
    pub iter_size: usize,
    /// Bytes per device or file block
    pub block_size: usize,
    /// Bytes of silence written when draining playback
    pub flush_size: usize,
    /// Initial output volume, 0-100
    pub volume_percent: u8,
    /// Read input from this file instead of the microphone
    pub input_file: Option<PathBuf>,
    /// Write output to this file instead of the speaker
    pub output_file: Option<PathBuf>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            sample_width: DEFAULT_SAMPLE_WIDTH,
            iter_size: DEFAULT_ITER_SIZE,
            block_size: DEFAULT_BLOCK_SIZE,
            flush_size: DEFAULT_FLUSH_SIZE,
            volume_percent: DEFAULT_VOLUME_PERCENT,
            input_file: None,
            output_file: None,
        }
    }
}

impl AudioConfig {
    /// Whether either side of the audio path is a file
    #[must_use]
    pub const fn uses_files(&self) -> bool {
        self.input_file.is_some() || self.output_file.is_some()
    }
}

/// Trigger settings
#[derive(Debug)]
pub struct TriggerConfig {
    /// Button value file
    pub button_path: Option<PathBuf>,
    /// Button reads `0` while pressed
    pub button_active_low: bool,
    /// Listen for `SIGUSR2`
    pub signal: bool,
    /// Wake phrase listener; `None` when disabled
    pub wake_word: Option<WakeWordConfig>,
}

/// Wake phrase listener settings
#[derive(Debug)]
pub struct WakeWordConfig {
    /// Phrases that start a conversation
    pub phrases: Vec<String>,
    /// Transcription backend
    pub provider: SttProvider,
    /// Transcription model; provider default when unset
    pub model: Option<String>,
    /// Transcription API key
    pub api_key: SecretString,
}

/// Values supplied on the command line (or through clap's `env`)
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub endpoint: Option<String>,
    pub credentials: Option<PathBuf>,
    pub device_config: Option<PathBuf>,
    pub device_id: Option<String>,
    pub device_model_id: Option<String>,
    pub project_id: Option<String>,
    pub registration_endpoint: Option<String>,
    pub lang: Option<String>,
    pub display: bool,
    pub deadline_secs: Option<u64>,
    pub sample_rate: Option<u32>,
    pub sample_width: Option<usize>,
    pub iter_size: Option<usize>,
    pub block_size: Option<usize>,
    pub flush_size: Option<usize>,
    pub input_file: Option<PathBuf>,
    pub output_file: Option<PathBuf>,
    pub button: Option<PathBuf>,
    pub wake_word: bool,
    pub indicator: Option<PathBuf>,
}

/// Secrets read from the environment
#[derive(Debug, Default)]
pub struct EnvSecrets {
    /// `ASSIST_ACCESS_TOKEN`
    pub access_token: Option<SecretString>,
    /// `ASSIST_STT_API_KEY`
    pub stt_api_key: Option<SecretString>,
}

impl EnvSecrets {
    /// Read secrets from the process environment
    #[must_use]
    pub fn from_env() -> Self {
        let read = |name: &str| {
            std::env::var(name)
                .ok()
                .filter(|v| !v.is_empty())
                .map(SecretString::from)
        };
        Self {
            access_token: read("ASSIST_ACCESS_TOKEN"),
            stt_api_key: read("ASSIST_STT_API_KEY"),
        }
    }
}

impl Config {
    /// Load configuration from the standard file, environment and `overrides`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for unsupported values, or a device identity
    /// that is missing and cannot be registered
    pub fn load(overrides: ConfigOverrides) -> Result<Self> {
        Self::resolve(overrides, file::load_config_file(), EnvSecrets::from_env())
    }

    /// Combine already loaded sources
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for unsupported values, or a device identity
    /// that is missing and cannot be registered
    pub fn resolve(
        overrides: ConfigOverrides,
        fc: AssistConfigFile,
        secrets: EnvSecrets,
    ) -> Result<Self> {
        let audio = AudioConfig {
            sample_rate: overrides
                .sample_rate
                .or(fc.audio.sample_rate)
                .unwrap_or(DEFAULT_SAMPLE_RATE),
            sample_width: overrides
                .sample_width
                .or(fc.audio.sample_width)
                .unwrap_or(DEFAULT_SAMPLE_WIDTH),
            iter_size: overrides
                .iter_size
                .or(fc.audio.iter_size)
                .unwrap_or(DEFAULT_ITER_SIZE),
            block_size: overrides
                .block_size
                .or(fc.audio.block_size)
                .unwrap_or(DEFAULT_BLOCK_SIZE),
            flush_size: overrides
                .flush_size
                .or(fc.audio.flush_size)
                .unwrap_or(DEFAULT_FLUSH_SIZE),
            volume_percent: fc.audio.volume.unwrap_or(DEFAULT_VOLUME_PERCENT).min(100),
            input_file: overrides.input_file,
            output_file: overrides.output_file,
        };

        if audio.sample_width != DEFAULT_SAMPLE_WIDTH {
            return Err(Error::Config(format!(
                "unsupported sample width {}; only 16-bit (2 byte) audio is supported",
                audio.sample_width
            )));
        }
        if audio.sample_rate == 0 || audio.iter_size == 0 || audio.block_size == 0 {
            return Err(Error::Config(
                "sample rate, iter size and block size must be positive".to_string(),
            ));
        }

        let device_config_path = overrides
            .device_config
            .or_else(|| fc.device_config.map(PathBuf::from))
            .or_else(default_device_config_path)
            .unwrap_or_else(|| PathBuf::from("device_config.json"));
        let device = DeviceSetup::resolve(
            overrides.device_id.or(fc.device_id),
            overrides.device_model_id.or(fc.device_model_id),
            overrides.project_id.or(fc.project_id),
            &device_config_path,
        )?;

        let wake_enabled = overrides.wake_word || fc.trigger.wake_word.unwrap_or(false);
        let wake_word = if wake_enabled {
            let provider = fc
                .trigger
                .stt_provider
                .as_deref()
                .map_or(Ok(SttProvider::Whisper), str::parse::<SttProvider>)?;
            let api_key = secrets
                .stt_api_key
                .or_else(|| fc.trigger.stt_api_key.map(SecretString::from))
                .ok_or_else(|| {
                    Error::Config("wake word listening needs ASSIST_STT_API_KEY".to_string())
                })?;
            Some(WakeWordConfig {
                phrases: fc.trigger.wake_phrases.unwrap_or_else(|| {
                    vec![crate::trigger::DEFAULT_WAKE_PHRASE.to_string()]
                }),
                provider,
                model: fc.trigger.stt_model,
                api_key,
            })
        } else {
            None
        };

        let triggers = TriggerConfig {
            button_path: overrides
                .button
                .or_else(|| fc.trigger.button.map(PathBuf::from)),
            button_active_low: fc.trigger.button_active_low.unwrap_or(false),
            signal: fc.trigger.signal.unwrap_or(true),
            wake_word,
        };

        Ok(Self {
            endpoint: overrides
                .endpoint
                .or(fc.endpoint)
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            credentials_path: overrides
                .credentials
                .or_else(|| fc.credentials.map(PathBuf::from))
                .or_else(default_credentials_path),
            access_token: secrets.access_token,
            device,
            registration_endpoint: overrides
                .registration_endpoint
                .or(fc.registration_endpoint)
                .unwrap_or_else(|| DEFAULT_REGISTRATION_ENDPOINT.to_string()),
            language_code: overrides
                .lang
                .or(fc.lang)
                .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
            display: overrides.display || fc.display.unwrap_or(false),
            deadline: overrides
                .deadline_secs
                .or(fc.deadline_secs)
                .map_or(DEFAULT_DEADLINE, Duration::from_secs),
            audio,
            triggers,
            indicator_path: overrides
                .indicator
                .or_else(|| fc.indicator.map(PathBuf::from)),
        })
    }
}

/// `~/.config/google-oauthlib-tool/credentials.json`
#[must_use]
pub fn default_credentials_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| {
        d.config_dir()
            .join("google-oauthlib-tool")
            .join("credentials.json")
    })
}

/// `~/.config/googlesamples-assistant/device_config.json`
#[must_use]
pub fn default_device_config_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| {
        d.config_dir()
            .join("googlesamples-assistant")
            .join("device_config.json")
    })
}
