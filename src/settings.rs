use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{error::RecorderError, fs::operations::replace_atomically};

pub const DEFAULT_INTERVAL_SECS: u64 = 180;
/// One capture a day is the slowest schedule.
pub const MAX_INTERVAL_SECS: u64 = 24 * 60 * 60;
pub const MAX_RETENTION_DAYS: u32 = 10 * 366;

/// Checks a capture interval in seconds.
pub fn validate_interval(interval: u64) -> Result<u64, RecorderError> {
    if interval == 0 || interval > MAX_INTERVAL_SECS {
        return Err(RecorderError::InvalidCommand(format!(
            "interval must be between 1 and {MAX_INTERVAL_SECS} seconds"
        )));
    }
    Ok(interval)
}

pub fn validate_retention_days(days: u32) -> Result<u32, RecorderError> {
    if days > MAX_RETENTION_DAYS {
        return Err(RecorderError::InvalidCommand(format!(
            "retentionDays must be at most {MAX_RETENTION_DAYS}"
        )));
    }
    Ok(days)
}

/// Persisted configuration shared by the host, the CLI and the dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Seconds between two scheduled captures.
    pub interval: u64,
    pub retention_days: u32,
    pub max_screenshots: usize,
    pub auto_cleanup: bool,
    pub model_name: String,
    /// Text model used for summarizing a time range.
    pub summary_model: String,
    /// Name of the environment variable that holds the API key. The key itself is never stored.
    pub api_key_env: String,
    pub base_url: String,
    pub enable_thinking: bool,
    pub thinking_budget: u32,
    pub request_timeout_secs: u64,
    /// Replaces the built-in analysis prompt.
    pub prompt: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL_SECS,
            retention_days: 30,
            max_screenshots: 50,
            auto_cleanup: true,
            model_name: "qwen3-vl-plus".into(),
            summary_model: "qwen-plus".into(),
            api_key_env: "DASHSCOPE_API_KEY".into(),
            base_url: "https://dashscope.aliyuncs.com/api/v1".into(),
            enable_thinking: false,
            thinking_budget: 50,
            request_timeout_secs: 60,
            prompt: None,
        }
    }
}

impl Settings {
    /// `MODEL_NAME` and `SCREENSHOT_INTERVAL` take precedence over the file.
    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(model) = env("MODEL_NAME").filter(|v| !v.trim().is_empty()) {
            self.model_name = model;
        }
        if let Some(interval) = env("SCREENSHOT_INTERVAL") {
            match interval.trim().parse::<u64>().ok().map(validate_interval) {
                Some(Ok(v)) => self.interval = v,
                _ => warn!("Ignoring invalid SCREENSHOT_INTERVAL {interval:?}"),
            }
        }
    }

    /// Resets values that a hand-edited file may carry out of range.
    fn sanitize(&mut self) {
        let defaults = Settings::default();
        if let Err(e) = validate_interval(self.interval) {
            warn!("Ignoring stored interval: {e}");
            self.interval = defaults.interval;
        }
        if let Err(e) = validate_retention_days(self.retention_days) {
            warn!("Ignoring stored retention: {e}");
            self.retention_days = defaults.retention_days;
        }
        if self.request_timeout_secs == 0 {
            self.request_timeout_secs = defaults.request_timeout_secs;
        }
    }
}

/// Partial update sent through `update_settings`. Absent fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SettingsPatch {
    pub interval: Option<u64>,
    #[serde(alias = "retention_days")]
    pub retention_days: Option<u32>,
    #[serde(alias = "max_screenshots")]
    pub max_screenshots: Option<usize>,
    #[serde(alias = "auto_cleanup")]
    pub auto_cleanup: Option<bool>,
    #[serde(alias = "model_name")]
    pub model_name: Option<String>,
    #[serde(alias = "summary_model")]
    pub summary_model: Option<String>,
    #[serde(alias = "api_key_env")]
    pub api_key_env: Option<String>,
    #[serde(alias = "base_url")]
    pub base_url: Option<String>,
    #[serde(alias = "enable_thinking")]
    pub enable_thinking: Option<bool>,
    #[serde(alias = "thinking_budget")]
    pub thinking_budget: Option<u32>,
    #[serde(alias = "request_timeout_secs")]
    pub request_timeout_secs: Option<u64>,
    pub prompt: Option<String>,
    /// Accepted from older extensions and dropped. Keys are only read from `apiKeyEnv`.
    #[serde(alias = "api_key")]
    pub api_key: Option<String>,
}

impl SettingsPatch {
    /// Fields that were sent but are never applied.
    pub fn ignored(&self) -> Vec<&'static str> {
        let mut ignored = vec![];
        if self.api_key.is_some() {
            ignored.push("apiKey");
        }
        ignored
    }

    /// Produces the merged settings and the names of the fields that were present, or an error
    /// describing the first invalid value. `settings` itself is left untouched.
    pub fn merge(&self, settings: &Settings) -> Result<(Settings, Vec<&'static str>), RecorderError> {
        let mut merged = settings.clone();
        let mut updated = vec![];

        if let Some(interval) = self.interval {
            merged.interval = validate_interval(interval)?;
            updated.push("interval");
        }
        if let Some(v) = self.retention_days {
            merged.retention_days = validate_retention_days(v)?;
            updated.push("retentionDays");
        }
        if let Some(v) = self.max_screenshots {
            merged.max_screenshots = v;
            updated.push("maxScreenshots");
        }
        if let Some(v) = self.auto_cleanup {
            merged.auto_cleanup = v;
            updated.push("autoCleanup");
        }
        for (value, target, name) in [
            (&self.model_name, &mut merged.model_name, "modelName"),
            (&self.summary_model, &mut merged.summary_model, "summaryModel"),
            (&self.api_key_env, &mut merged.api_key_env, "apiKeyEnv"),
            (&self.base_url, &mut merged.base_url, "baseUrl"),
        ] {
            if let Some(value) = value {
                if value.trim().is_empty() {
                    return Err(RecorderError::InvalidCommand(format!("{name} can't be empty")));
                }
                *target = value.trim().to_string();
                updated.push(name);
            }
        }
        if let Some(v) = self.enable_thinking {
            merged.enable_thinking = v;
            updated.push("enableThinking");
        }
        if let Some(v) = self.thinking_budget {
            merged.thinking_budget = v;
            updated.push("thinkingBudget");
        }
        if let Some(v) = self.request_timeout_secs {
            if v == 0 {
                return Err(RecorderError::InvalidCommand(
                    "requestTimeoutSecs must be at least 1 second".into(),
                ));
            }
            merged.request_timeout_secs = v;
            updated.push("requestTimeoutSecs");
        }
        if let Some(prompt) = &self.prompt {
            // An empty prompt switches back to the built-in one.
            merged.prompt = Some(prompt.clone()).filter(|v| !v.trim().is_empty());
            updated.push("prompt");
        }

        Ok((merged, updated))
    }
}

/// Owns the settings file.
pub struct SettingsStore {
    path: PathBuf,
    data: Settings,
}

impl SettingsStore {
    pub async fn load(path: PathBuf) -> Result<Self> {
        Self::load_with_env(path, |name| std::env::var(name).ok()).await
    }

    async fn load_with_env(path: PathBuf, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut data = match tokio::fs::read(&path).await {
            Ok(contents) => serde_json::from_slice(&contents).unwrap_or_else(|e| {
                warn!("Settings in {path:?} are invalid, using defaults: {e}");
                Settings::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Settings::default(),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read settings from {path:?}"))
            }
        };
        data.sanitize();
        data.apply_env(env);
        debug!("Loaded settings {data:?}");
        Ok(Self { path, data })
    }

    pub fn get(&self) -> &Settings {
        &self.data
    }

    /// Writes `settings` to disk and only then makes them current.
    pub async fn replace(&mut self, settings: Settings) -> Result<()> {
        let serialized = serde_json::to_vec_pretty(&settings)?;
        replace_atomically(&self.path, &serialized)
            .await
            .with_context(|| format!("Failed to write settings to {:?}", self.path))?;
        self.data = settings;
        Ok(())
    }
}
