//! Configuration management
//!
//! Settings live in `~/.metgpt/config.yaml`. A missing file means defaults.
//! Environment variables override file values when a setting is resolved:
//!
//! - `METGPT_HOME` replaces the `~/.metgpt` directory
//! - `METGPT_API_KEY` (or `GEMINI_API_KEY`) overrides `api_key`
//! - `METGPT_MODEL` overrides both chat models
//! - `METGPT_IMAGE_MODEL` overrides `image_model`

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use crate::storage::models::{AspectRatio, SubscriptionTier};

/// Default Gemini API base URL.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Keys accepted by `metgpt config get/set`.
pub const CONFIG_KEYS: [&str; 10] = [
    "namespace",
    "api_key",
    "base_url",
    "free_model",
    "pro_model",
    "image_model",
    "aspect_ratio",
    "orphan_policy",
    "cancel_on_switch",
    "pro_usage_limit",
];

/// Root directory for config, database, logs and images.
pub fn metgpt_home() -> Result<PathBuf> {
    if let Ok(dir) = env::var("METGPT_HOME") {
        if !dir.is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    Ok(dirs::home_dir()
        .context("Could not find home directory")?
        .join(".metgpt"))
}

/// What to do with a streamed update whose session was deleted meanwhile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrphanPolicy {
    /// Drop the update.
    #[default]
    Discard,
    /// Re-create the session and apply the update to it.
    Recreate,
}

impl FromStr for OrphanPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "discard" => Ok(OrphanPolicy::Discard),
            "recreate" => Ok(OrphanPolicy::Recreate),
            other => Err(format!(
                "Unknown orphan policy: '{other}'. Expected one of: discard, recreate"
            )),
        }
    }
}

impl std::fmt::Display for OrphanPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrphanPolicy::Discard => write!(f, "discard"),
            OrphanPolicy::Recreate => write!(f, "recreate"),
        }
    }
}

/// Errors raised when reading or changing individual settings.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The key is not a known setting.
    #[error("Unknown config key '{0}'. Valid keys: {keys}", keys = CONFIG_KEYS.join(", "))]
    UnknownKey(String),

    /// The value cannot be parsed for the key.
    #[error("Invalid value for '{key}': {reason}")]
    InvalidValue {
        /// Setting name.
        key: String,
        /// Why parsing failed.
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Prefix for storage keys (`<namespace>_sessions_v1`, ...)
    pub namespace: String,

    /// Gemini API key
    pub api_key: Option<String>,

    /// Gemini API base URL
    pub base_url: String,

    /// Chat model for the free tier
    pub free_model: String,

    /// Chat model for the pro tier
    pub pro_model: String,

    /// Image generation model
    pub image_model: String,

    /// Default aspect ratio for generated images
    pub aspect_ratio: AspectRatio,

    /// Handling of updates for sessions deleted mid-generation
    pub orphan_policy: OrphanPolicy,

    /// Cancel the in-flight generation when switching away from its session
    pub cancel_on_switch: bool,

    /// Pro-only agent uses granted to free-tier users
    pub pro_usage_limit: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace: "metgpt".to_string(),
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            free_model: "gemini-2.5-flash".to_string(),
            pro_model: "gemini-2.5-pro".to_string(),
            image_model: "gemini-2.5-flash-image".to_string(),
            aspect_ratio: AspectRatio::default(),
            orphan_policy: OrphanPolicy::default(),
            cancel_on_switch: true,
            pro_usage_limit: 2,
        }
    }
}

impl Config {
    /// Loads the config file, falling back to defaults when it does not exist.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    /// Loads a config file from an explicit path.
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_saphyr::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Writes the config to the default location.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        self.save_to(&path)
    }

    /// Writes the config to an explicit path, creating parent directories.
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let yaml = serde_saphyr::to_string(self).context("Failed to serialize config")?;
        fs::write(path, yaml).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(metgpt_home()?.join("config.yaml"))
    }

    /// API key with env var precedence.
    pub fn resolved_api_key(&self) -> Option<String> {
        env::var("METGPT_API_KEY")
            .ok()
            .or_else(|| env::var("GEMINI_API_KEY").ok())
            .or_else(|| self.api_key.clone())
            .filter(|k| !k.is_empty())
    }

    /// Chat model for a tier with env var precedence.
    pub fn chat_model(&self, tier: SubscriptionTier) -> String {
        if let Ok(model) = env::var("METGPT_MODEL") {
            return model;
        }
        match tier {
            SubscriptionTier::Free => self.free_model.clone(),
            SubscriptionTier::Pro => self.pro_model.clone(),
        }
    }

    /// Image model with env var precedence.
    pub fn resolved_image_model(&self) -> String {
        env::var("METGPT_IMAGE_MODEL").unwrap_or_else(|_| self.image_model.clone())
    }

    /// Reads one setting as display text. The API key is masked.
    pub fn get(&self, key: &str) -> Result<String, ConfigError> {
        let value = match key {
            "namespace" => self.namespace.clone(),
            "api_key" => match &self.api_key {
                Some(k) if k.chars().count() > 4 => {
                    let tail: String = k.chars().skip(k.chars().count() - 4).collect();
                    format!("****{tail}")
                }
                Some(_) => "****".to_string(),
                None => "(not set)".to_string(),
            },
            "base_url" => self.base_url.clone(),
            "free_model" => self.free_model.clone(),
            "pro_model" => self.pro_model.clone(),
            "image_model" => self.image_model.clone(),
            "aspect_ratio" => self.aspect_ratio.to_string(),
            "orphan_policy" => self.orphan_policy.to_string(),
            "cancel_on_switch" => self.cancel_on_switch.to_string(),
            "pro_usage_limit" => self.pro_usage_limit.to_string(),
            other => return Err(ConfigError::UnknownKey(other.to_string())),
        };
        Ok(value)
    }

    /// Changes one setting from its text form.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidValue {
            key: key.to_string(),
            reason,
        };
        match key {
            "namespace" => {
                let valid = value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
                if value.is_empty() || !valid {
                    return Err(invalid("use letters, digits and underscores".to_string()));
                }
                self.namespace = value.to_string();
            }
            "api_key" => self.api_key = Some(value.to_string()).filter(|v| !v.is_empty()),
            "base_url" => self.base_url = value.trim_end_matches('/').to_string(),
            "free_model" => self.free_model = value.to_string(),
            "pro_model" => self.pro_model = value.to_string(),
            "image_model" => self.image_model = value.to_string(),
            "aspect_ratio" => self.aspect_ratio = value.parse().map_err(invalid)?,
            "orphan_policy" => self.orphan_policy = value.parse().map_err(invalid)?,
            "cancel_on_switch" => {
                self.cancel_on_switch = value
                    .parse()
                    .map_err(|_| invalid("expected true or false".to_string()))?
            }
            "pro_usage_limit" => {
                self.pro_usage_limit = value
                    .parse()
                    .map_err(|_| invalid("expected a non-negative integer".to_string()))?
            }
            other => return Err(ConfigError::UnknownKey(other.to_string())),
        }
        Ok(())
    }
}
