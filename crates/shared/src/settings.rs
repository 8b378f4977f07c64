use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:streamGenerateContent?alt=sse";

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_app_id_header() -> String {
    "x-client-info".to_string()
}

fn default_app_id() -> String {
    concat!("order-interpreter/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_request_timeout() -> Option<u64> {
    Some(120)
}

fn default_match_threshold() -> f64 {
    0.88
}

/// Connection settings for the streaming text backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSettings {
    /// Full URL of the streaming endpoint
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Header carrying the application identifier
    #[serde(default = "default_app_id_header")]
    pub app_id_header: String,
    #[serde(default = "default_app_id")]
    pub app_id: String,
    /// Sent as `x-goog-api-key` when present
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Upper bound for the whole request including the streamed body.
    /// `None` leaves the session open until the server closes it or the
    /// caller cancels.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: Option<u64>,
    /// Fail the session on a malformed frame instead of skipping it
    #[serde(default)]
    pub strict_frames: bool,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            app_id_header: default_app_id_header(),
            app_id: default_app_id(),
            api_key: None,
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
            strict_frames: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterpreterSettings {
    #[serde(default)]
    pub stream: StreamSettings,
    /// Minimum Jaro-Winkler similarity for a fuzzy catalog match
    #[serde(default = "default_match_threshold")]
    pub match_threshold: f64,
}

impl Default for InterpreterSettings {
    fn default() -> Self {
        Self {
            stream: StreamSettings::default(),
            match_threshold: default_match_threshold(),
        }
    }
}

impl InterpreterSettings {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read settings from {}", path.display()))?;
        let settings = serde_json::from_slice(&bytes)
            .with_context(|| format!("invalid settings file {}", path.display()))?;
        Ok(settings)
    }

    /// Overlay values from the environment on top of the file settings.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(endpoint) = non_empty("ORDER_STREAM_ENDPOINT") {
            self.stream.endpoint = endpoint;
        }
        if let Some(app_id) = non_empty("ORDER_APP_ID") {
            self.stream.app_id = app_id;
        }
        if let Some(key) = non_empty("GEMINI_API_KEY") {
            self.stream.api_key = Some(key);
        }
    }
}

/// `settings.json` inside the platform config directory.
pub fn config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("com.local", "Order Interpreter", "OrderInterpreter")
        .map(|proj| proj.config_dir().join("settings.json"))
}

/// Load settings from `path` (or the default config path) and fall back to
/// defaults when the file is missing or unreadable. The flag tells whether a
/// file was actually used.
pub fn load_settings_or_default(path: Option<&Path>) -> (InterpreterSettings, bool) {
    let path = path.map(Path::to_path_buf).or_else(config_path);
    if let Some(path) = path {
        if path.exists() {
            match InterpreterSettings::load(&path) {
                Ok(settings) => return (settings, true),
                Err(e) => tracing::warn!("ignoring settings file: {:#}", e),
            }
        }
    }
    (InterpreterSettings::default(), false)
}
