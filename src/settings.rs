use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use config::Config;
use serde::Deserialize;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

/// Runtime settings. Layered as defaults, then an optional `phishscan.toml`
/// (or the file given with `--config`), then `PHISH_*` environment variables
/// with `__` between nested keys, e.g. `PHISH_FETCH__DEADLINE_SECS=60`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub input: PathBuf,
    pub checkpoint: PathBuf,
    pub url_column: String,
    pub batch_size: usize,
    pub row_delay_ms: u64,
    pub fetch: FetchSettings,
    pub semantic: SemanticSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            input: PathBuf::from("phishing_dataset.csv"),
            checkpoint: PathBuf::from("phishing_dataset_features.csv"),
            url_column: "url".to_string(),
            batch_size: 1000,
            row_delay_ms: 6000,
            fetch: FetchSettings::default(),
            semantic: SemanticSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    pub request_timeout_secs: u64,
    /// Hard limit for one row's fetch, static and rendered together.
    pub deadline_secs: u64,
    pub render_settle_secs: u64,
    pub dynamic_fallback: bool,
    pub chrome_executable: Option<PathBuf>,
    pub user_agent: String,
    pub accept_language: String,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: 10,
            deadline_secs: 90,
            render_settle_secs: 10,
            dynamic_fallback: true,
            chrome_executable: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            accept_language: "zh-TW,zh;q=0.9,en-US;q=0.8,en;q=0.7".to_string(),
        }
    }
}

impl FetchSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }

    pub fn render_settle(&self) -> Duration {
        Duration::from_secs(self.render_settle_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SemanticSettings {
    pub enabled: bool,
    pub api_key: Option<String>,
    pub model: String,
    pub endpoint: String,
    pub temperature: f32,
    pub max_retries: u32,
    pub base_backoff_secs: u64,
    pub request_timeout_secs: u64,
    /// Page text beyond this many characters is not sent to the model.
    pub max_chars: usize,
}

impl Default for SemanticSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: None,
            model: "gemini-2.5-flash-lite".to_string(),
            endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            temperature: 0.4,
            max_retries: 3,
            base_backoff_secs: 5,
            request_timeout_secs: 60,
            max_chars: 20_000,
        }
    }
}

impl Settings {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => config::File::from(p).required(true),
            None => config::File::with_name("phishscan").required(false),
        };
        let mut settings: Settings = Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix("PHISH")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("failed to read settings")?
            .try_deserialize()
            .context("invalid settings")?;

        if settings.semantic.api_key.is_none() {
            settings.semantic.api_key = std::env::var("GOOGLE_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty());
        }
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.batch_size > 0, "batch_size must be at least 1");
        anyhow::ensure!(self.fetch.deadline_secs > 0, "fetch.deadline_secs must be at least 1");
        anyhow::ensure!(self.semantic.max_retries > 0, "semantic.max_retries must be at least 1");
        Ok(())
    }

    pub fn row_delay(&self) -> Duration {
        Duration::from_millis(self.row_delay_ms)
    }
}
