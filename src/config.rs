use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub media: MediaConfig,
    #[serde(default)]
    pub intake: IntakeConfig,
    #[serde(default)]
    pub expansion: ExpansionConfig,
    #[serde(default)]
    pub transcription: TranscriptionConfig,
    pub transport: TransportConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MediaConfig {
    /// Root directory accepted media is stored under, in date-bucketed
    /// subfolders (`YYYY.MM.DD/`).
    pub root: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IntakeConfig {
    /// Quiet period after the last attachment of a media group before
    /// the batch is reported, in seconds.
    #[serde(default = "default_batch_window_secs")]
    pub batch_window_secs: u64,
    /// Category assigned to every record created through intake.
    #[serde(default = "default_category")]
    pub category: String,
    /// Public site base URL, used for passive "view" links.
    #[serde(default = "default_site_url")]
    pub site_url: String,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            batch_window_secs: default_batch_window_secs(),
            category: default_category(),
            site_url: default_site_url(),
        }
    }
}

fn default_batch_window_secs() -> u64 {
    2
}
fn default_category() -> String {
    "events".to_string()
}
fn default_site_url() -> String {
    "http://localhost:3000".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExpansionConfig {
    /// `disabled` or `openrouter`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TranscriptionConfig {
    /// `disabled` or `openai`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct TransportConfig {
    /// Chat id of the single fixed reviewer that approves drafts.
    pub reviewer_chat_id: i64,
    /// Long-poll wait, in seconds.
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
}

fn default_poll_timeout_secs() -> u64 {
    30
}

impl ExpansionConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

impl TranscriptionConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.intake.batch_window_secs == 0 {
        anyhow::bail!("intake.batch_window_secs must be > 0");
    }

    if config.intake.category.trim().is_empty() {
        anyhow::bail!("intake.category must not be empty");
    }

    if config.expansion.is_enabled() && config.expansion.model.is_none() {
        anyhow::bail!(
            "expansion.model must be specified when provider is '{}'",
            config.expansion.provider
        );
    }

    match config.expansion.provider.as_str() {
        "disabled" | "openrouter" => {}
        other => anyhow::bail!(
            "Unknown expansion provider: '{}'. Must be disabled or openrouter.",
            other
        ),
    }

    if config.transcription.is_enabled() && config.transcription.model.is_none() {
        anyhow::bail!(
            "transcription.model must be specified when provider is '{}'",
            config.transcription.provider
        );
    }

    match config.transcription.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown transcription provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    Ok(config)
}
