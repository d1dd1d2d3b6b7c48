//! Anthropic Messages API adapter (spec.md §4.1).
//!
//! Anthropic splits the system prompt out of the message array and reports
//! usage under different field names than the OpenAI family, so it gets its
//! own adapter rather than folding into [`crate::providers::openai`].

use anyhow::{Result, bail};
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};

use crate::providers::{
    BoxStream, ChatMessage, Choice, CompletionRequest, CompletionResponse, Provider,
    ProviderConfig, ProviderKind, StreamEvent, Summarizer, Usage,
};

const DEFAULT_BASE: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

/// Adapter for Anthropic's Claude Messages API.
pub struct AnthropicProvider {
    config: ProviderConfig,
    client: reqwest::Client,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let base_url = config
            .api_base
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE.to_string());
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            config,
            client,
            base_url,
        })
    }

    /// Anthropic separates the system prompt from the conversation messages.
    fn split_messages(request: &CompletionRequest) -> (Option<String>, Vec<AnthropicMessage>) {
        let mut system = None;
        let mut messages = Vec::new();
        for msg in &request.messages {
            if msg.role == "system" {
                system = Some(msg.content.clone());
            } else {
                messages.push(AnthropicMessage {
                    role: msg.role.clone(),
                    content: msg.content.clone(),
                });
            }
        }
        (system, messages)
    }

    fn request_body(&self, request: &CompletionRequest, stream: bool) -> serde_json::Value {
        let (system, messages) = Self::split_messages(request);
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": messages,
            "max_tokens": request.max_tokens.unwrap_or(4096),
            "stream": stream,
        });
        if let Some(temperature) = request.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }
        if let Some(sys) = system {
            body["system"] = serde_json::json!(sys);
        }
        body
    }

    fn apply_headers(&self, mut builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder = builder.header("Content-Type", "application/json");
        if let Some(key) = &self.config.api_key {
            builder = builder.header("x-api-key", key);
        }
        builder = builder.header("anthropic-version", ANTHROPIC_VERSION);
        for (name, value) in &self.config.custom_headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder
    }

    fn parse_response(&self, json: serde_json::Value) -> Result<CompletionResponse> {
        let id = json.get("id").and_then(|v| v.as_str()).unwrap_or("").to_string();
        let model = json.get("model").and_then(|v| v.as_str()).unwrap_or("").to_string();

        let content = json
            .get("content")
            .and_then(|v| v.as_array())
            .and_then(|arr| {
                arr.iter()
                    .find(|block| block.get("type").and_then(|t| t.as_str()) == Some("text"))
                    .and_then(|block| block.get("text").and_then(|t| t.as_str()))
            })
            .unwrap_or("");

        let stop_reason = json.get("stop_reason").and_then(|v| v.as_str()).map(str::to_string);

        let usage = json.get("usage").map(|u| {
            let input = u.get("input_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
            let output = u.get("output_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
            Usage {
                prompt_tokens: input,
                completion_tokens: output,
                total_tokens: input + output,
            }
        });

        Ok(CompletionResponse {
            id,
            model,
            choices: vec![Choice {
                index: 0,
                message: ChatMessage {
                    role: "assistant".to_string(),
                    content: content.to_string(),
                },
                finish_reason: stop_reason,
            }],
            usage,
            cost_override: None,
        })
    }
}

impl Provider for AnthropicProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        let body = self.request_body(request, false);
        let url = format!("{}/v1/messages", self.base_url);
        let response = self.apply_headers(self.client.post(&url)).json(&body).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            bail!("Anthropic API error: HTTP {status} - {text}");
        }

        let json: serde_json::Value = response.json().await?;
        self.parse_response(json)
    }

    async fn complete_stream(
        &self,
        request: &CompletionRequest,
    ) -> Result<BoxStream<Result<StreamEvent>>> {
        let body = self.request_body(request, true);
        let url = format!("{}/v1/messages", self.base_url);
        let response = self.apply_headers(self.client.post(&url)).json(&body).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            bail!("Anthropic API error: HTTP {status} - {text}");
        }

        let byte_stream = response.bytes_stream();
        let events = stream::unfold(byte_stream, |mut stream| async move {
            while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => return Some((Err(anyhow::anyhow!("stream error: {e}")), stream)),
                };
                let text = String::from_utf8_lossy(&chunk).into_owned();
                for line in text.lines() {
                    let line = line.trim();
                    let Some(data) = line.strip_prefix("data: ") else { continue };
                    let Ok(json) = serde_json::from_str::<serde_json::Value>(data) else {
                        continue;
                    };
                    match json.get("type").and_then(|v| v.as_str()) {
                        Some("content_block_delta") => {
                            if let Some(text) = json["delta"]["text"].as_str()
                                && !text.is_empty()
                            {
                                return Some((
                                    Ok(StreamEvent::Delta { content: text.to_string() }),
                                    stream,
                                ));
                            }
                        }
                        Some("message_stop") => return Some((Ok(StreamEvent::Done), stream)),
                        Some("error") => {
                            let msg = json["error"]["message"].as_str().unwrap_or("unknown error");
                            return Some((Err(anyhow::anyhow!("Anthropic error: {msg}")), stream));
                        }
                        _ => {}
                    }
                }
            }
            None
        });

        Ok(Box::pin(events))
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        // Anthropic has no public model-listing endpoint; report the known
        // current lineup instead of failing the call.
        Ok(vec![
            "claude-opus-4-5-20251001".to_string(),
            "claude-sonnet-4-5-20251001".to_string(),
            "claude-3-5-haiku-20241022".to_string(),
        ])
    }
}

impl Summarizer for AnthropicProvider {
    fn provider_kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn resolved_model(&self) -> String {
        if self.config.model.is_empty() {
            "claude-sonnet-4-5-20251001".to_string()
        } else {
            self.config.model.clone()
        }
    }
}
