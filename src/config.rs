//! Configuration loading for the Legal Sathi client.
//!
//! Config lives in a TOML file (`./sathi.toml` or the platform config
//! dir). The Gemini API key can always be overridden by the
//! `GEMINI_API_KEY` environment variable, which takes precedence over
//! the file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::SathiError;
use crate::language::Language;

/// Environment variable consulted before the config file's `api_key`.
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Gemini API key. `GEMINI_API_KEY` wins over this value.
    pub api_key: Option<String>,
    /// Response language code (en / hi / mr / pa / raj).
    pub language: String,
    pub assist: AssistSettings,
    pub voice: VoiceSettings,
    pub storage: StorageSettings,
}

/// Models used by the single-shot assist endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistSettings {
    /// Model for legal-advice chat.
    pub advice_model: String,
    /// Model for document analysis.
    pub analysis_model: String,
}

impl Default for AssistSettings {
    fn default() -> Self {
        Self {
            advice_model: "gemini-3-pro-preview".to_string(),
            analysis_model: "gemini-3-flash-preview".to_string(),
        }
    }
}

/// Live voice session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceSettings {
    /// Native-audio dialog model for the streaming session.
    pub model: String,
    /// Prebuilt voice profile name.
    pub voice_name: String,
    /// Output gain, 0.0..=1.0.
    pub volume: f32,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            model: "gemini-2.5-flash-native-audio-preview-09-2025".to_string(),
            voice_name: "Zephyr".to_string(),
            volume: 1.0,
        }
    }
}

/// Local storage settings (identity database, saved login token).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Override for the data directory. Defaults to the platform data dir.
    pub data_dir: Option<PathBuf>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SathiError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&contents)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(s: &str) -> Result<Self, SathiError> {
        toml::from_str(s).map_err(|e| SathiError::Config(format!("invalid config: {e}")))
    }

    /// Load configuration from the default paths, falling back to defaults.
    pub fn load() -> Result<Self, SathiError> {
        let mut paths = vec![PathBuf::from("sathi.toml")];
        if let Some(dirs) = project_dirs() {
            paths.push(dirs.config_dir().join("config.toml"));
        }

        for path in &paths {
            if path.exists() {
                tracing::info!(path = %path.display(), "Loading config");
                return Self::from_file(path);
            }
        }

        tracing::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Resolve the Gemini API key: environment first, then config file.
    ///
    /// Surfaced before any connection attempt so a missing key never
    /// produces a half-initialized session.
    pub fn resolve_api_key(&self) -> Result<String, SathiError> {
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.is_empty() {
                return Ok(key);
            }
        }
        match self.api_key.as_deref() {
            Some(key) if !key.is_empty() => Ok(key.to_string()),
            _ => Err(SathiError::Config(format!(
                "Gemini API key is required: set {API_KEY_ENV} or api_key in the config file"
            ))),
        }
    }

    /// The active response language (config code, `en` when unset or unknown).
    pub fn language(&self) -> Language {
        Language::from_str_code(&self.language).unwrap_or_default()
    }

    /// Directory for the identity database and saved login token.
    pub fn data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.storage.data_dir {
            return dir.clone();
        }
        project_dirs()
            .map(|d| d.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from(".sathi"))
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", "sathi")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.language(), Language::En);
        assert_eq!(config.voice.voice_name, "Zephyr");
        assert!(config.voice.model.contains("native-audio"));
        assert!((config.voice.volume - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn parse_partial_toml() {
        let config = Config::from_toml(
            r#"
            language = "hi"

            [voice]
            voice_name = "Aoede"
            "#,
        )
        .unwrap();
        assert_eq!(config.language(), Language::Hi);
        assert_eq!(config.voice.voice_name, "Aoede");
        // Untouched sections keep their defaults
        assert_eq!(config.assist.advice_model, "gemini-3-pro-preview");
    }

    #[test]
    fn unknown_language_falls_back_to_english() {
        let config = Config::from_toml(r#"language = "tlh""#).unwrap();
        assert_eq!(config.language(), Language::En);
    }

    #[test]
    fn invalid_toml_is_a_config_error() {
        let err = Config::from_toml("language = [").unwrap_err();
        assert!(matches!(err, SathiError::Config(_)));
    }

    #[test]
    fn missing_api_key_is_a_config_error() {
        // The env var may be set on developer machines; only assert the
        // file-only path when it is absent.
        if std::env::var(API_KEY_ENV).is_err() {
            let config = Config::default();
            let err = config.resolve_api_key().unwrap_err();
            assert!(matches!(err, SathiError::Config(_)));

            let config = Config {
                api_key: Some("file-key".to_string()),
                ..Default::default()
            };
            assert_eq!(config.resolve_api_key().unwrap(), "file-key");
        }
    }
}
