/// Client configuration
///
/// One config value parameterizes every page variant: file cap, progress
/// cadence, field names and endpoint.
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable overriding the API base URL
pub const BASE_URL_ENV: &str = "I2V_API_BASE";

/// Base URL used when nothing else is configured
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// Prompt the generation server falls back to; pre-fills the prompt field
pub const DEFAULT_PROMPT: &str = "Realistic continuation of the reference image as a forward walking video. \
The camera moves steadily ahead, maintaining natural height (~1.7m). \
The environment gradually changes in perspective and depth, with warm golden-hour lighting and soft shadows. \
Few people visible, peaceful ambiance. Real physical motion only, no zooms or cinematic dolly effects. \
Feels like walking calmly toward the scene.\n\
Style notes:\n\
forward linear motion, warm golden light, slow pace, natural camera sway, cinematic realism.";

/// Client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Scheme + host (+ port) of the generation server
    pub base_url: String,

    /// Path of the generate endpoint
    pub generate_path: String,

    /// Multipart field shared by every uploaded file
    pub file_field: String,

    /// Multipart field carrying the prompt
    pub prompt_field: String,

    /// Upper bound on selected files; `None` means uncapped
    pub max_files: Option<usize>,

    /// Request timeout in seconds; `None` waits indefinitely
    pub timeout_secs: Option<u64>,

    /// Content type the result payload is wrapped as
    pub result_mime: String,

    /// File name suggested for the downloaded result
    pub download_name: String,

    /// Heuristic progress parameters
    pub progress: ProgressConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            generate_path: "/api/generate".to_string(),
            file_field: "files".to_string(),
            prompt_field: "prompt".to_string(),
            max_files: None,
            timeout_secs: None,
            result_mime: "video/mp4".to_string(),
            download_name: "tour-agency-preview.mp4".to_string(),
            progress: ProgressConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Create config pointing at `base_url`
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::default().with_base_url(base_url)
    }

    /// Default config with the base URL taken from `I2V_API_BASE` when set
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Override the base URL from the environment, if present and non-empty
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(BASE_URL_ENV) {
            if !url.trim().is_empty() {
                self.base_url = normalize_base_url(&url);
            }
        }
    }

    /// With base URL
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = normalize_base_url(&url.into());
        self
    }

    /// With a file cap
    pub fn with_max_files(mut self, max: usize) -> Self {
        self.max_files = Some(max);
        self
    }

    /// With request timeout
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// With heuristic progress parameters
    pub fn with_progress(mut self, progress: ProgressConfig) -> Self {
        self.progress = progress;
        self
    }

    /// Full URL of the generate endpoint
    pub fn generate_url(&self) -> String {
        join_url(&self.base_url, &self.generate_path)
    }

    /// Full URL of the health probe
    pub fn health_url(&self) -> String {
        join_url(&self.base_url, "/health")
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Save configuration to JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write config: {:?}", path))?;
        Ok(())
    }

    /// Load configuration from JSON
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {:?}", path))?;
        let mut config: Self = serde_json::from_str(&json)?;
        config.base_url = normalize_base_url(&config.base_url);
        Ok(config)
    }
}

/// Parameters of the simulated progress bar.
///
/// The server reports nothing while it works, so these numbers only shape a
/// UX approximation. They never describe real server-side progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressConfig {
    /// Percentage shown as soon as the request is sent
    pub initial: u8,

    /// Percentage added on every tick
    pub step: u8,

    /// Tick interval in milliseconds
    pub interval_ms: u64,

    /// Highest simulated value; must stay below 100
    pub ceiling: u8,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            initial: 10,
            step: 5,
            interval_ms: 800,
            ceiling: 90,
        }
    }
}

impl ProgressConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }

    /// Ceiling clamped below 100 so only a settled response reaches 100
    pub fn effective_ceiling(&self) -> u8 {
        self.ceiling.min(99)
    }
}

fn normalize_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

fn join_url(base: &str, path: &str) -> String {
    if path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}
