//! TOML configuration file loading
//!
//! Supports `~/.config/assist/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct AssistConfigFile {
    /// Service endpoint URL
    pub endpoint: Option<String>,

    /// Path to the OAuth credentials file
    pub credentials: Option<String>,

    /// Path to the device identity file
    pub device_config: Option<String>,

    /// Registered device instance id
    pub device_id: Option<String>,

    /// Registered device model id
    pub device_model_id: Option<String>,

    /// Project used to register a new device instance
    pub project_id: Option<String>,

    /// Device registration API root
    pub registration_endpoint: Option<String>,

    /// Language code (e.g. "en-US")
    pub lang: Option<String>,

    /// Render visual responses
    pub display: Option<bool>,

    /// Exchange deadline in seconds
    pub deadline_secs: Option<u64>,

    /// Listening indicator value file
    pub indicator: Option<String>,

    /// Audio settings
    #[serde(default)]
    pub audio: AudioFileConfig,

    /// Trigger settings
    #[serde(default)]
    pub trigger: TriggerFileConfig,
}

/// Audio settings
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    pub sample_rate: Option<u32>,
    pub sample_width: Option<usize>,
    pub iter_size: Option<usize>,
    pub block_size: Option<usize>,
    pub flush_size: Option<usize>,
    /// Initial output volume, 0-100
    pub volume: Option<u8>,
}

/// Trigger settings
#[derive(Debug, Default, Deserialize)]
pub struct TriggerFileConfig {
    /// Button value file (e.g. `/sys/class/gpio/gpio23/value`)
    pub button: Option<String>,

    /// Button reads `0` while pressed
    pub button_active_low: Option<bool>,

    /// Listen for `SIGUSR2`
    pub signal: Option<bool>,

    /// Listen for a wake phrase
    pub wake_word: Option<bool>,

    /// Wake phrases
    pub wake_phrases: Option<Vec<String>>,

    /// STT provider ("whisper" or "deepgram")
    pub stt_provider: Option<String>,

    /// STT model
    pub stt_model: Option<String>,

    /// STT API key
    pub stt_api_key: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `AssistConfigFile::default()` if the file doesn't exist or can't be parsed.
#[must_use]
pub fn load_config_file() -> AssistConfigFile {
    config_file_path().map_or_else(AssistConfigFile::default, |path| load_config_file_from(&path))
}

/// Load a TOML config file from `path`, falling back to defaults
#[must_use]
pub fn load_config_file_from(path: &Path) -> AssistConfigFile {
    if !path.exists() {
        return AssistConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                AssistConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            AssistConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/assist/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("assist").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_parses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
lang = "de-DE"

[audio]
volume = 80

[trigger]
wake_phrases = ["hey computer"]
"#,
        )
        .unwrap();

        let file = load_config_file_from(&path);
        assert_eq!(file.lang.as_deref(), Some("de-DE"));
        assert_eq!(file.audio.volume, Some(80));
        assert_eq!(file.audio.sample_rate, None);
        assert_eq!(file.trigger.wake_phrases, Some(vec!["hey computer".to_string()]));
    }

    #[test]
    fn malformed_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "lang = [").unwrap();

        assert!(load_config_file_from(&path).lang.is_none());
    }

    #[test]
    fn missing_file_is_default() {
        assert!(load_config_file_from(Path::new("/nonexistent/config.toml")).endpoint.is_none());
    }
}
