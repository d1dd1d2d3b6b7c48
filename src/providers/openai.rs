//! OpenAI-compatible wire adapter (spec.md §4.1).
//!
//! One adapter serves every backend that speaks the `/v1/chat/completions`
//! shape: OpenAI itself, OpenRouter, Zhipu, and the four local-server
//! presets (`LocalServer`, `Vllm`, `LmStudio`, `LlamaCppServer`), which
//! differ only in default endpoint, default auth env-var, and whether the
//! 404-fallback path applies. Zhipu additionally gets the same kind of
//! rate-limit pacing as the Google adapter (spec.md §4.1 "Rate-limit
//! pacing"), just with its own interval/in-flight numbers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use futures_util::stream::{self, StreamExt};
use tokio::sync::{Mutex, Semaphore};

use crate::providers::{
    BoxStream, ChatMessage, Choice, CompletionRequest, CompletionResponse, Provider,
    ProviderConfig, ProviderKind, StreamEvent, Summarizer, Usage,
};

const ZHIPU_MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(300);
const ZHIPU_MAX_IN_FLIGHT: usize = 10;

/// Default `(api_base, auth_env_var)` for each of the four local-server
/// presets, in enum-declaration order (spec.md §4.5/§6).
pub fn local_preset_defaults(kind: ProviderKind) -> (&'static str, &'static str) {
    match kind {
        ProviderKind::LocalServer => ("http://localhost:8000", "LOCAL_LLM_API_KEY"),
        ProviderKind::Vllm => ("http://localhost:1234", "VLLM_API_KEY"),
        ProviderKind::Lmstudio => ("http://localhost:8080", "LMSTUDIO_API_KEY"),
        ProviderKind::LlamacppServer => ("http://localhost:8000", "LLAMACPP_SERVER_API_KEY"),
        other => unreachable!("{other:?} is not a local-server preset"),
    }
}

/// Default `api_base` (no `/v1` suffix) per provider kind.
fn default_api_base(kind: ProviderKind) -> &'static str {
    match kind {
        ProviderKind::Openai => "https://api.openai.com",
        ProviderKind::Openrouter => "https://openrouter.ai/api",
        ProviderKind::Zhipu => "https://open.bigmodel.cn/api/paas",
        ProviderKind::LocalServer
        | ProviderKind::Vllm
        | ProviderKind::Lmstudio
        | ProviderKind::LlamacppServer => local_preset_defaults(kind).0,
        other => unreachable!("{other:?} is not served by the OpenAI-compatible adapter"),
    }
}

/// Whether `kind` is one of the four local-server presets that get the
/// 404-at-`/v1`-then-retry-without-`/v1` fallback (spec.md §4.1).
fn is_local_preset(kind: ProviderKind) -> bool {
    matches!(
        kind,
        ProviderKind::LocalServer
            | ProviderKind::Vllm
            | ProviderKind::Lmstudio
            | ProviderKind::LlamacppServer
    )
}

/// Adapter for the OpenAI API and every OpenAI-compatible backend.
pub struct OpenAiCompatProvider {
    config: ProviderConfig,
    client: reqwest::Client,
    base_url: String,
    /// Only armed for [`ProviderKind::Zhipu`]; `None` elsewhere so other
    /// backends pay no pacing overhead.
    pacing: Option<ZhipuPacing>,
}

struct ZhipuPacing {
    in_flight: Arc<Semaphore>,
    last_sent: Arc<Mutex<Option<Instant>>>,
}

impl ZhipuPacing {
    fn new() -> Self {
        Self {
            in_flight: Arc::new(Semaphore::new(ZHIPU_MAX_IN_FLIGHT)),
            last_sent: Arc::new(Mutex::new(None)),
        }
    }

    async fn pace(&self) -> tokio::sync::SemaphorePermit<'_> {
        let permit = self.in_flight.acquire().await.expect("semaphore is never closed");
        let mut last_sent = self.last_sent.lock().await;
        if let Some(last) = *last_sent {
            let elapsed = last.elapsed();
            if elapsed < ZHIPU_MIN_REQUEST_INTERVAL {
                tokio::time::sleep(ZHIPU_MIN_REQUEST_INTERVAL - elapsed).await;
            }
        }
        *last_sent = Some(Instant::now());
        permit
    }
}

impl OpenAiCompatProvider {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let base_url = config
            .api_base
            .clone()
            .unwrap_or_else(|| default_api_base(config.kind).to_string());

        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        let pacing = (config.kind == ProviderKind::Zhipu).then(ZhipuPacing::new);

        Ok(Self {
            config,
            client,
            base_url,
            pacing,
        })
    }

    fn request_body(&self, request: &CompletionRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": request.messages.iter().map(|m| serde_json::json!({
                "role": m.role,
                "content": m.content,
            })).collect::<Vec<_>>(),
            "stream": request.stream,
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if let Some(temperature) = request.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }
        if let serde_json::Value::Object(ref mut map) = body {
            for (key, value) in &self.config.extra_params {
                map.insert(key.clone(), value.clone());
            }
        }
        body
    }

    fn apply_headers(&self, mut builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder = builder.header("Content-Type", "application/json");
        if let Some(key) = &self.config.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }
        if self.config.kind == ProviderKind::Openrouter {
            builder = builder
                .header("HTTP-Referer", "https://github.com/codeconcat/codeconcat")
                .header("X-Title", "codeconcat");
        }
        for (name, value) in &self.config.custom_headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder
    }

    fn parse_response(&self, json: serde_json::Value) -> Result<CompletionResponse> {
        let id = json.get("id").and_then(|v| v.as_str()).unwrap_or("").to_string();
        let model = json.get("model").and_then(|v| v.as_str()).unwrap_or("").to_string();

        let choices_json = json
            .get("choices")
            .and_then(|v| v.as_array())
            .ok_or_else(|| anyhow::anyhow!("invalid response: missing choices"))?;

        let choices = choices_json
            .iter()
            .map(|c| Choice {
                index: c.get("index").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
                message: ChatMessage {
                    role: c["message"]["role"].as_str().unwrap_or("assistant").to_string(),
                    content: c["message"]["content"].as_str().unwrap_or("").to_string(),
                },
                finish_reason: c.get("finish_reason").and_then(|v| v.as_str()).map(str::to_string),
            })
            .collect();

        let usage = json.get("usage").filter(|u| !u.is_null()).map(|u| Usage {
            prompt_tokens: u.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
            completion_tokens: u.get("completion_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
            total_tokens: u.get("total_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
        });

        // OpenRouter reports an authoritative `usage.total_cost` that
        // overrides the local per-token calculation (spec.md §4.1).
        let cost_override = json
            .get("usage")
            .and_then(|u| u.get("total_cost"))
            .and_then(|v| v.as_f64());

        Ok(CompletionResponse {
            id,
            model,
            choices,
            usage,
            cost_override,
        })
    }

    async fn post_chat(&self, path: &str, body: &serde_json::Value) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        let builder = self.apply_headers(self.client.post(&url));
        Ok(builder.json(body).send().await?)
    }
}

impl Provider for OpenAiCompatProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        let _permit = match &self.pacing {
            Some(pacing) => Some(pacing.pace().await),
            None => None,
        };

        let body = self.request_body(request);

        let response = self.post_chat("/v1/chat/completions", &body).await?;

        let response = if is_local_preset(self.config.kind) && response.status().as_u16() == 404 {
            self.post_chat("/chat/completions", &body).await?
        } else {
            response
        };

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            bail!("{:?} API error: HTTP {status} - {text}", self.config.kind);
        }

        let json: serde_json::Value = response.json().await?;
        self.parse_response(json)
    }

    async fn complete_stream(
        &self,
        request: &CompletionRequest,
    ) -> Result<BoxStream<Result<StreamEvent>>> {
        let mut body = self.request_body(request);
        body["stream"] = serde_json::json!(true);

        let response = self.post_chat("/v1/chat/completions", &body).await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            bail!("{:?} API error: HTTP {status} - {text}", self.config.kind);
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
                    if data == "[DONE]" {
                        return Some((Ok(StreamEvent::Done), stream));
                    }
                    let Ok(json) = serde_json::from_str::<serde_json::Value>(data) else {
                        continue;
                    };
                    if let Some(content) = json["choices"][0]["delta"]["content"].as_str()
                        && !content.is_empty()
                    {
                        return Some((Ok(StreamEvent::Delta { content: content.to_string() }), stream));
                    }
                }
            }
            None
        });

        Ok(Box::pin(events))
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/v1/models", self.base_url);
        let response = self.apply_headers(self.client.get(&url)).send().await?;
        if !response.status().is_success() {
            bail!("failed to list models: HTTP {}", response.status());
        }
        #[derive(serde::Deserialize)]
        struct Entry {
            id: String,
        }
        #[derive(serde::Deserialize)]
        struct ModelList {
            data: Vec<Entry>,
        }
        let list: ModelList = response.json().await?;
        Ok(list.data.into_iter().map(|e| e.id).collect())
    }
}

impl Summarizer for OpenAiCompatProvider {
    fn provider_kind(&self) -> ProviderKind {
        self.config.kind
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn resolved_model(&self) -> String {
        if self.config.model.is_empty() {
            "gpt-4o-mini".to_string()
        } else {
            self.config.model.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_bases_follow_enum_declaration_order() {
        assert_eq!(default_api_base(ProviderKind::LocalServer), "http://localhost:8000");
        assert_eq!(default_api_base(ProviderKind::Vllm), "http://localhost:1234");
        assert_eq!(default_api_base(ProviderKind::Lmstudio), "http://localhost:8080");
        assert_eq!(default_api_base(ProviderKind::LlamacppServer), "http://localhost:8000");
    }

    #[test]
    fn only_local_presets_get_the_404_fallback() {
        assert!(is_local_preset(ProviderKind::LocalServer));
        assert!(is_local_preset(ProviderKind::Vllm));
        assert!(!is_local_preset(ProviderKind::Openai));
        assert!(!is_local_preset(ProviderKind::Openrouter));
    }

    #[test]
    fn resolved_model_falls_back_when_empty() {
        let cfg = ProviderConfig::new(ProviderKind::Openai);
        let provider = OpenAiCompatProvider::new(cfg).unwrap();
        assert_eq!(provider.resolved_model(), "gpt-4o-mini");
    }

    #[test]
    fn resolved_model_honors_explicit_choice() {
        let mut cfg = ProviderConfig::new(ProviderKind::Openai);
        cfg.model = "gpt-4o".to_string();
        let provider = OpenAiCompatProvider::new(cfg).unwrap();
        assert_eq!(provider.resolved_model(), "gpt-4o");
    }

    #[test]
    fn zhipu_gets_pacing_other_kinds_dont() {
        let zhipu = OpenAiCompatProvider::new(ProviderConfig::new(ProviderKind::Zhipu)).unwrap();
        assert!(zhipu.pacing.is_some());
        let openai = OpenAiCompatProvider::new(ProviderConfig::new(ProviderKind::Openai)).unwrap();
        assert!(openai.pacing.is_none());
    }

    #[tokio::test]
    async fn zhipu_pacing_enforces_minimum_interval() {
        let provider = OpenAiCompatProvider::new(ProviderConfig::new(ProviderKind::Zhipu)).unwrap();
        let pacing = provider.pacing.as_ref().unwrap();
        let start = Instant::now();
        pacing.pace().await;
        pacing.pace().await;
        assert!(start.elapsed() >= ZHIPU_MIN_REQUEST_INTERVAL);
    }

    #[test]
    fn parse_response_extracts_usage_and_cost_override() {
        let cfg = ProviderConfig::new(ProviderKind::Openrouter);
        let provider = OpenAiCompatProvider::new(cfg).unwrap();
        let json = serde_json::json!({
            "id": "x", "model": "m",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "hi"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 5, "completion_tokens": 1, "total_tokens": 6, "total_cost": 0.002}
        });
        let resp = provider.parse_response(json).unwrap();
        assert_eq!(resp.choices[0].message.content, "hi");
        assert_eq!(resp.cost_override, Some(0.002));
    }
}
