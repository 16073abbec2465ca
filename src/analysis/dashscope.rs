use std::{path::Path, time::Duration};

use async_trait::async_trait;
use base64::{prelude::BASE64_STANDARD, Engine};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::error::RecorderError;

use super::{prompt::extract_confidence, Analysis, Analyzer, PromptConfig};

const MULTIMODAL_ENDPOINT: &str = "services/aigc/multimodal-generation/generation";
const TEXT_ENDPOINT: &str = "services/aigc/text-generation/generation";

#[derive(Serialize)]
struct GenerationRequest<'a> {
    model: &'a str,
    input: GenerationInput<'a>,
    parameters: GenerationParameters,
}

#[derive(Serialize)]
struct GenerationInput<'a> {
    messages: Vec<RequestMessage<'a>>,
}

#[derive(Serialize)]
struct RequestMessage<'a> {
    role: &'static str,
    content: RequestContent<'a>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum RequestContent<'a> {
    Parts(Vec<RequestPart<'a>>),
    Text(&'a str),
}

#[derive(Serialize)]
#[serde(untagged)]
enum RequestPart<'a> {
    Image { image: String },
    Text { text: &'a str },
}

#[derive(Serialize, Default)]
struct GenerationParameters {
    #[serde(skip_serializing_if = "Option::is_none")]
    incremental_output: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    enable_thinking: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking_budget: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result_format: Option<&'static str>,
}

/// Body of a response, or of a single server-sent event when streaming.
#[derive(Deserialize, Debug, Default)]
struct GenerationChunk {
    output: Option<ChunkOutput>,
    code: Option<String>,
    message: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct ChunkOutput {
    #[serde(default)]
    choices: Vec<Choice>,
    text: Option<String>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize, Debug)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<ResponseContent>,
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum ResponseContent {
    Text(String),
    Parts(Vec<ResponsePart>),
}

#[derive(Deserialize, Debug)]
struct ResponsePart {
    text: Option<String>,
}

impl GenerationChunk {
    fn error(&self) -> Option<String> {
        self.code
            .as_deref()
            .filter(|v| !v.is_empty())
            .map(|code| format!("{code}: {}", self.message.as_deref().unwrap_or("no message")))
    }

    /// Answer text carried by this chunk. Reasoning content is not part of the answer.
    fn answer_text(&self) -> String {
        let Some(output) = &self.output else {
            return String::new();
        };
        let mut text = String::new();
        for choice in &output.choices {
            match &choice.message.content {
                Some(ResponseContent::Text(v)) => text.push_str(v),
                Some(ResponseContent::Parts(parts)) => {
                    parts
                        .iter()
                        .filter_map(|v| v.text.as_deref())
                        .for_each(|v| text.push_str(v));
                }
                None => {}
            }
        }
        if output.choices.is_empty() {
            if let Some(v) = &output.text {
                text.push_str(v);
            }
        }
        text
    }
}

/// Accumulates the answer from a `text/event-stream` body fed in arbitrary pieces.
#[derive(Default)]
struct SseDecoder {
    buffer: Vec<u8>,
    answer: String,
    events: usize,
}

impl SseDecoder {
    fn feed(&mut self, bytes: &[u8]) -> Result<(), RecorderError> {
        self.buffer.extend_from_slice(bytes);
        while let Some(position) = self.buffer.iter().position(|v| *v == b'\n') {
            let line = self.buffer.drain(..=position).collect::<Vec<_>>();
            self.handle_line(&line)?;
        }
        Ok(())
    }

    fn handle_line(&mut self, line: &[u8]) -> Result<(), RecorderError> {
        let line = String::from_utf8_lossy(line);
        let Some(data) = line.trim_end_matches(['\r', '\n']).strip_prefix("data:") else {
            // `id:`, `event:` and comment lines carry nothing we need.
            return Ok(());
        };
        let data = data.trim();
        if data.is_empty() || data == "[DONE]" {
            return Ok(());
        }

        let chunk = serde_json::from_str::<GenerationChunk>(data).map_err(|e| {
            RecorderError::analysis(format!("Malformed event from API: {e}"))
        })?;
        if let Some(error) = chunk.error() {
            return Err(RecorderError::analysis(format!("API reported an error {error}")));
        }
        self.events += 1;
        self.answer.push_str(&chunk.answer_text());
        Ok(())
    }

    fn finish(mut self) -> Result<String, RecorderError> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            self.handle_line(&rest)?;
        }
        debug!("Received {} events", self.events);
        Ok(self.answer)
    }
}

fn request_error(error: reqwest::Error) -> RecorderError {
    if error.is_timeout() {
        RecorderError::analysis("Request to the model timed out")
    } else {
        RecorderError::analysis(format!("Request to the model failed: {error}"))
    }
}

/// Turns a non-success status into an error, using the API's error body when there is one.
async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, RecorderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<GenerationChunk>(&body)
        .ok()
        .and_then(|v| v.error())
        .unwrap_or(body);
    warn!("Model API returned {status}: {detail}");
    Err(RecorderError::analysis(format!("API returned {status}: {detail}")))
}

/// [Analyzer] backed by the DashScope generation API.
pub struct DashScopeAnalyzer {
    client: reqwest::Client,
}

impl DashScopeAnalyzer {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn endpoint(config: &PromptConfig, path: &str) -> String {
        format!("{}/{path}", config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl Analyzer for DashScopeAnalyzer {
    #[instrument(skip(self, config), fields(model = %config.model))]
    async fn analyze(&self, image_path: &Path, config: &PromptConfig) -> Result<Analysis, RecorderError> {
        let api_key = config.api_key()?;
        let image = tokio::fs::read(image_path)
            .await
            .map_err(|e| RecorderError::analysis(format!("Failed to read {image_path:?}: {e}")))?;

        let request = GenerationRequest {
            model: &config.model,
            input: GenerationInput {
                messages: vec![RequestMessage {
                    role: "user",
                    content: RequestContent::Parts(vec![
                        RequestPart::Image {
                            image: format!("data:image/png;base64,{}", BASE64_STANDARD.encode(image)),
                        },
                        RequestPart::Text {
                            text: &config.prompt,
                        },
                    ]),
                }],
            },
            parameters: GenerationParameters {
                incremental_output: Some(true),
                enable_thinking: config.enable_thinking.then_some(true),
                thinking_budget: config.enable_thinking.then_some(config.thinking_budget),
                result_format: None,
            },
        };

        let response = self
            .client
            .post(Self::endpoint(config, MULTIMODAL_ENDPOINT))
            .bearer_auth(api_key)
            .header("X-DashScope-SSE", "enable")
            .timeout(Duration::from_secs(config.timeout_secs))
            .json(&request)
            .send()
            .await
            .map_err(request_error)?;
        let response = ensure_success(response).await?;

        let mut decoder = SseDecoder::default();
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            decoder.feed(&chunk.map_err(request_error)?)?;
        }
        let answer = decoder.finish()?;

        if answer.trim().is_empty() {
            return Err(RecorderError::analysis("No answer content received from API"));
        }
        let (description, confidence) = extract_confidence(&answer);
        info!("Analysis finished with {confidence} confidence");
        Ok(Analysis {
            description,
            confidence,
        })
    }

    #[instrument(skip(self, config), fields(model = %config.model))]
    async fn summarize(&self, config: &PromptConfig) -> Result<String, RecorderError> {
        let api_key = config.api_key()?;
        let request = GenerationRequest {
            model: &config.model,
            input: GenerationInput {
                messages: vec![RequestMessage {
                    role: "user",
                    content: RequestContent::Text(&config.prompt),
                }],
            },
            parameters: GenerationParameters {
                result_format: Some("message"),
                ..Default::default()
            },
        };

        let response = self
            .client
            .post(Self::endpoint(config, TEXT_ENDPOINT))
            .bearer_auth(api_key)
            .timeout(Duration::from_secs(config.timeout_secs))
            .json(&request)
            .send()
            .await
            .map_err(request_error)?;
        let response = ensure_success(response).await?;
        let chunk = response
            .json::<GenerationChunk>()
            .await
            .map_err(|e| RecorderError::analysis(format!("Malformed response from API: {e}")))?;
        if let Some(error) = chunk.error() {
            return Err(RecorderError::analysis(format!("API reported an error {error}")));
        }

        let text = chunk.answer_text();
        if text.trim().is_empty() {
            return Err(RecorderError::analysis("No text in response output"));
        }
        Ok(text.trim().to_string())
    }
}
