use std::path::{Path, PathBuf};

use facevault_core::settings::SettingsError;
use facevault_core::DeveloperSettings;
use reqwest::Url;
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_API_ROOT: &str = "http://127.0.0.1:8000";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;
/// Versioned prefix appended to the server root.
pub const API_PREFIX: &str = "/api/v1";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid API root {root:?}: {reason}")]
    InvalidRoot { root: String, reason: String },
    #[error("invalid [developer] settings: {0}")]
    InvalidDeveloper(#[from] SettingsError),
}

/// Client configuration, loaded from `FACEVAULT_*` environment variables
/// over an optional TOML file.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Server root, without the `/api/v1` prefix or a trailing slash.
    pub api_root: String,
    /// Per-request HTTP timeout.
    pub request_timeout_secs: u64,
    /// Initial developer settings for new sessions.
    pub developer: DeveloperSettings,
}

/// On-disk layout. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    api_root: Option<String>,
    request_timeout_secs: Option<u64>,
    developer: DeveloperSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_root: DEFAULT_API_ROOT.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            developer: DeveloperSettings::default(),
        }
    }
}

impl Config {
    /// Load from environment variables only.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_sources(FileConfig::default(), |key| std::env::var(key).ok())
    }

    /// Load from `path` (or `$FACEVAULT_CONFIG`) with the environment on top.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("FACEVAULT_CONFIG").map(PathBuf::from));

        let file = match path {
            Some(path) => {
                let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                    path: path.clone(),
                    source,
                })?;
                tracing::debug!(path = %path.display(), "loaded config file");
                toml::from_str(&text)?
            }
            None => FileConfig::default(),
        };

        Self::from_sources(file, |key| std::env::var(key).ok())
    }

    /// Parse a TOML document with no environment overrides.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Self::from_sources(toml::from_str(text)?, |_| None)
    }

    fn from_sources(
        file: FileConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let raw_root = env("FACEVAULT_API_URL")
            .or_else(|| env("FACEVAULT_API_ROOT"))
            .or(file.api_root)
            .unwrap_or_else(|| DEFAULT_API_ROOT.to_string());

        let request_timeout_secs = env_u64(&env, "FACEVAULT_REQUEST_TIMEOUT_SECS")
            .or(file.request_timeout_secs)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);

        Ok(Self {
            api_root: normalize_api_root(&raw_root)?,
            request_timeout_secs,
            developer: file.developer.validated()?,
        })
    }

    /// `api_root` plus the versioned prefix.
    pub fn api_base(&self) -> String {
        format!("{}{}", self.api_root, API_PREFIX)
    }

    /// Full URL of an API endpoint, e.g. `endpoint("/stats")`.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_base(), path.trim_start_matches('/'))
    }

    /// Resolve a result's photo URL. Relative URLs hang off the server root
    /// (they already carry `/api/v1`); absolute ones are returned as is.
    pub fn photo_url(&self, photo_url: &str) -> String {
        if Url::parse(photo_url).is_ok() {
            return photo_url.to_string();
        }
        format!("{}/{}", self.api_root, photo_url.trim_start_matches('/'))
    }
}

/// Strip a trailing `/api/v1` (with or without slash) and any trailing
/// slashes, then check what is left is an http(s) URL.
pub fn normalize_api_root(raw: &str) -> Result<String, ConfigError> {
    let mut root = raw.trim().trim_end_matches('/');
    if let Some(stripped) = root.strip_suffix(API_PREFIX) {
        root = stripped.trim_end_matches('/');
    }

    let invalid = |reason: String| ConfigError::InvalidRoot {
        root: raw.to_string(),
        reason,
    };
    let url = Url::parse(root).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme {:?}", url.scheme())));
    }

    Ok(root.to_string())
}

fn env_u64(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u64> {
    let value = env(key)?;
    match value.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %value, "ignoring unparseable setting");
            None
        }
    }
}
