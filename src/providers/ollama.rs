//! Ollama adapter (spec.md §4.1).
//!
//! Talks to `/api/generate` rather than an OpenAI-shaped chat endpoint, and
//! auto-discovers a model via `/api/tags` when the caller leaves
//! [`ProviderConfig::model`] empty. Discovery prefers code-specialized
//! models in a fixed priority order before falling back to whatever is
//! first in the locally pulled list.
//!
//! [`Summarizer::resolved_model`] is synchronous and can't hit the network,
//! so it reports a static fallback (`"codellama"`) when no model was
//! configured; the actual discovered model (which may differ) is what ends
//! up in the wire request and the returned [`CompletionResponse::model`].
//! This means a cache key computed before discovery runs can diverge
//! slightly from the model that actually answered — acceptable for a local,
//! zero-cost backend where a cache miss just costs a second free inference.

use anyhow::{Result, bail};

use crate::providers::{
    ChatMessage, Choice, CompletionRequest, CompletionResponse, Provider, ProviderConfig,
    ProviderKind, Summarizer, Usage,
};

pub(crate) const DEFAULT_BASE: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "codellama";

/// Code-specialized models preferred over general-purpose ones, in order,
/// followed by a general-model fallback tier ranked above plain
/// first-available. `deepseek-coder` (bare, no version suffix) sits right
/// after `deepseek-coder-v2` so a locally pulled `deepseek-coder:latest`
/// still matches the stem even though it predates the v2 release.
const MODEL_PRIORITY: &[&str] = &[
    "deepseek-coder-v2",
    "deepseek-coder",
    "codellama",
    "codegemma",
    "starcoder2",
    "wizardcoder",
    "phind-codellama",
    "mistral",
    "llama3.2",
    "llama3",
    "llama2",
];

pub struct OllamaProvider {
    config: ProviderConfig,
    client: reqwest::Client,
    base_url: String,
}

impl OllamaProvider {
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

    /// Pull the locally available model list and pick one per
    /// [`MODEL_PRIORITY`], falling back to the first model reported, then
    /// to [`DEFAULT_MODEL`] if nothing is installed or `/api/tags` fails.
    async fn discover_model(&self) -> String {
        let url = format!("{}/api/tags", self.base_url);
        let Ok(response) = self.client.get(&url).send().await else {
            return DEFAULT_MODEL.to_string();
        };
        let Ok(json) = response.json::<serde_json::Value>().await else {
            return DEFAULT_MODEL.to_string();
        };
        let names: Vec<String> = json["models"]
            .as_array()
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m.get("name").and_then(|n| n.as_str()).map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        for candidate in MODEL_PRIORITY {
            if let Some(found) = names.iter().find(|n| n.to_lowercase().contains(candidate)) {
                return found.clone();
            }
        }
        names.into_iter().next().unwrap_or_else(|| DEFAULT_MODEL.to_string())
    }

    /// Ollama's `/api/generate` takes one prompt string, not a role array;
    /// fold the conversation the same way the other role-less backends do.
    fn build_prompt(request: &CompletionRequest) -> String {
        request
            .messages
            .iter()
            .map(|msg| msg.content.clone())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

impl Provider for OllamaProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        let model = if self.config.model.is_empty() {
            self.discover_model().await
        } else {
            request.model.clone()
        };

        let prompt = Self::build_prompt(request);
        let body = serde_json::json!({
            "model": model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "temperature": request.temperature,
                "num_predict": request.max_tokens,
            },
        });

        let url = format!("{}/api/generate", self.base_url);
        let response = self.client.post(&url).json(&body).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            bail!("Ollama API error: HTTP {status} - {text}");
        }

        let json: serde_json::Value = response.json().await?;
        let text = json.get("response").and_then(|v| v.as_str()).unwrap_or("").to_string();
        let prompt_tokens = json.get("prompt_eval_count").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
        let completion_tokens = json.get("eval_count").and_then(|v| v.as_u64()).unwrap_or(0) as u32;

        Ok(CompletionResponse {
            id: String::new(),
            model,
            choices: vec![Choice {
                index: 0,
                message: ChatMessage {
                    role: "assistant".to_string(),
                    content: text,
                },
                finish_reason: json
                    .get("done")
                    .and_then(|v| v.as_bool())
                    .filter(|d| *d)
                    .map(|_| "stop".to_string()),
            }],
            usage: Some(Usage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            }),
            cost_override: Some(0.0),
        })
    }

    async fn complete_stream(
        &self,
        _request: &CompletionRequest,
    ) -> Result<crate::providers::BoxStream<Result<crate::providers::StreamEvent>>> {
        bail!("Ollama provider: streaming is not implemented")
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            bail!("failed to list Ollama models: HTTP {}", response.status());
        }
        let json: serde_json::Value = response.json().await?;
        Ok(json["models"]
            .as_array()
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m.get("name").and_then(|n| n.as_str()).map(str::to_string))
                    .collect()
            })
            .unwrap_or_default())
    }
}

impl Summarizer for OllamaProvider {
    fn provider_kind(&self) -> ProviderKind {
        ProviderKind::Ollama
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn resolved_model(&self) -> String {
        if self.config.model.is_empty() {
            DEFAULT_MODEL.to_string()
        } else {
            self.config.model.clone()
        }
    }
}
