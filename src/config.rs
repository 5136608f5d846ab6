use crate::playback::MissingAudioPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_DIR: &str = "interlinear-reader";
const CONFIG_FILE: &str = "config.json";

pub const DEFAULT_API_URL: &str = "http://localhost:8000/api";
pub const DEFAULT_MEDIA_ORIGIN: &str = "http://localhost:8000";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MISSING_AUDIO: &str = "advance";
pub const DEFAULT_STREAM_BUFFER: usize = 32;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Base of the REST surface, e.g. `http://localhost:8000/api`
    pub api_url: String,
    /// Origin that relative clip URLs are resolved against
    pub media_origin: String,
    pub request_timeout_secs: u64,
    /// `advance` or `stall`
    pub missing_audio: String,
    pub stream_buffer: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            media_origin: DEFAULT_MEDIA_ORIGIN.to_string(),
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            missing_audio: DEFAULT_MISSING_AUDIO.to_string(),
            stream_buffer: DEFAULT_STREAM_BUFFER,
        }
    }
}

impl ReaderConfig {
    pub fn missing_audio_policy(&self) -> MissingAudioPolicy {
        match self.missing_audio.as_str() {
            "stall" => MissingAudioPolicy::Stall,
            _ => MissingAudioPolicy::AdvanceAfterReadingTime,
        }
    }

    pub fn resolve_media_url(&self, reference: &str) -> String {
        resolve_media_url(&self.media_origin, reference)
    }
}

/// Resolve a clip reference from the backend into a playable URL
pub fn resolve_media_url(origin: &str, reference: &str) -> String {
    let reference = reference.trim();
    if reference.starts_with("http://") || reference.starts_with("https://") {
        return reference.to_string();
    }
    format!(
        "{}/{}",
        origin.trim_end_matches('/'),
        reference.trim_start_matches('/')
    )
}

pub fn normalize_url(input: &str, fallback: &str) -> String {
    let trimmed = input.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn normalize_missing_audio(input: &str) -> String {
    match input.trim().to_ascii_lowercase().as_str() {
        "stall" => "stall".to_string(),
        "advance" => "advance".to_string(),
        _ => DEFAULT_MISSING_AUDIO.to_string(),
    }
}

/// Default location: `<user config dir>/interlinear-reader/config.json`
pub fn default_config_path() -> Result<PathBuf, String> {
    let dir = dirs::config_dir()
        .ok_or_else(|| "Failed to resolve config dir".to_string())?
        .join(CONFIG_DIR);
    fs::create_dir_all(&dir).map_err(|e| format!("Failed to create config dir: {}", e))?;
    Ok(dir.join(CONFIG_FILE))
}

/// Load the config file (creating it with defaults if missing), then apply
/// environment overrides.
pub fn load(path: Option<&Path>) -> Result<ReaderConfig, String> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => default_config_path()?,
    };
    let mut config = load_or_create(&path)?;
    apply_env_overrides(&mut config);
    normalize_config(&mut config);
    Ok(config)
}

pub fn load_or_create(path: &Path) -> Result<ReaderConfig, String> {
    if !path.exists() {
        let config = ReaderConfig::default();
        save_raw(path, &config)?;
        return Ok(config);
    }

    let raw = fs::read_to_string(path).map_err(|e| format!("Failed to read config: {}", e))?;
    match serde_json::from_str::<ReaderConfig>(&raw) {
        Ok(mut config) => {
            normalize_config(&mut config);
            Ok(config)
        }
        Err(e) => {
            tracing::warn!("Config at {:?} is corrupt ({}), regenerating", path, e);
            let backup = path.with_extension("json.bak");
            let _ = fs::copy(path, backup);
            let config = ReaderConfig::default();
            save_raw(path, &config)?;
            Ok(config)
        }
    }
}

fn save_raw(path: &Path, config: &ReaderConfig) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("Failed to create config dir: {}", e))?;
    }
    let json = serde_json::to_string_pretty(config)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;
    fs::write(path, json).map_err(|e| format!("Failed to save config: {}", e))
}

fn apply_env_overrides(config: &mut ReaderConfig) {
    if let Ok(url) = std::env::var("READER_API_URL") {
        config.api_url = url;
    }
    if let Ok(origin) = std::env::var("READER_MEDIA_ORIGIN") {
        config.media_origin = origin;
    }
    if let Ok(timeout) = std::env::var("READER_REQUEST_TIMEOUT_SECS") {
        match timeout.trim().parse::<u64>() {
            Ok(secs) => config.request_timeout_secs = secs,
            Err(_) => tracing::warn!("Ignoring invalid READER_REQUEST_TIMEOUT_SECS '{}'", timeout),
        }
    }
    if let Ok(policy) = std::env::var("READER_MISSING_AUDIO") {
        config.missing_audio = policy;
    }
}

fn normalize_config(config: &mut ReaderConfig) {
    config.api_url = normalize_url(&config.api_url, DEFAULT_API_URL);
    config.media_origin = normalize_url(&config.media_origin, DEFAULT_MEDIA_ORIGIN);
    config.request_timeout_secs = config.request_timeout_secs.max(1);
    config.missing_audio = normalize_missing_audio(&config.missing_audio);
    config.stream_buffer = config.stream_buffer.max(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);

        let config = load_or_create(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.missing_audio_policy(), MissingAudioPolicy::AdvanceAfterReadingTime);
    }

    #[test]
    fn test_corrupt_file_is_backed_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "{ not json").unwrap();

        let config = load_or_create(&path).unwrap();
        assert_eq!(config.request_timeout_secs, DEFAULT_TIMEOUT_SECS);
        assert!(path.with_extension("json.bak").exists());
    }

    #[test]
    fn test_values_are_normalized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(
            &path,
            r#"{"api_url": "http://example.test/api///", "request_timeout_secs": 0,
                "missing_audio": "STALL"}"#,
        )
        .unwrap();

        let config = load_or_create(&path).unwrap();
        assert_eq!(config.api_url, "http://example.test/api");
        assert_eq!(config.media_origin, DEFAULT_MEDIA_ORIGIN);
        assert_eq!(config.request_timeout_secs, 1);
        assert_eq!(config.missing_audio_policy(), MissingAudioPolicy::Stall);
    }

    #[test]
    fn test_resolve_media_url() {
        let config = ReaderConfig::default();
        assert_eq!(
            config.resolve_media_url("/static/audio_1.wav"),
            "http://localhost:8000/static/audio_1.wav"
        );
        assert_eq!(
            config.resolve_media_url("https://cdn.test/a.wav"),
            "https://cdn.test/a.wav"
        );
    }
}
