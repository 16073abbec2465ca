//! Turns screenshots into short activity descriptions using a remote vision-language model.

pub mod dashscope;
pub mod prompt;

use std::path::Path;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::{daemon::storage::entities::Confidence, error::RecorderError, settings::Settings};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Analysis {
    pub description: String,
    pub confidence: Confidence,
}

/// Everything a single request needs. Built per request so that settings changes apply to the
/// next capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptConfig {
    pub base_url: String,
    pub model: String,
    pub api_key_env: String,
    pub enable_thinking: bool,
    pub thinking_budget: u32,
    pub timeout_secs: u64,
    pub prompt: String,
}

impl PromptConfig {
    /// The API key is looked up on every request so that a key exported after startup is used.
    pub fn api_key(&self) -> Result<String, RecorderError> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| {
                RecorderError::AnalysisFailed(format!(
                    "API key environment variable {} is not set",
                    self.api_key_env
                ))
            })
    }

    /// `context` describes the most recent activities and is appended to the prompt.
    pub fn from_settings(settings: &Settings, context: Option<&str>) -> Self {
        let base = settings
            .prompt
            .clone()
            .unwrap_or_else(|| prompt::DEFAULT_ANALYSIS_PROMPT.to_string());
        Self {
            base_url: settings.base_url.clone(),
            model: settings.model_name.clone(),
            api_key_env: settings.api_key_env.clone(),
            enable_thinking: settings.enable_thinking,
            thinking_budget: settings.thinking_budget,
            timeout_secs: settings.request_timeout_secs,
            prompt: prompt::with_context(&base, context),
        }
    }

    pub fn for_summary(settings: &Settings, prompt: String) -> Self {
        Self {
            base_url: settings.base_url.clone(),
            model: settings.summary_model.clone(),
            api_key_env: settings.api_key_env.clone(),
            enable_thinking: false,
            thinking_budget: 0,
            timeout_secs: settings.request_timeout_secs,
            prompt,
        }
    }
}

/// Remote model used by the capture workflow. Every failure, including timeouts and malformed
/// responses, is an [RecorderError::AnalysisFailed].
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, image_path: &Path, config: &PromptConfig) -> Result<Analysis, RecorderError>;

    /// Text-only completion used for summaries of a time range.
    async fn summarize(&self, config: &PromptConfig) -> Result<String, RecorderError>;
}
