//! Provider abstraction: one wire adapter per LLM backend, unified behind a
//! single summarization contract.
//!
//! [`Provider`] is the low-level chat-completion primitive (request in,
//! response out) that each adapter implements against its backend's actual
//! wire format. [`Summarizer`] sits on top of it and supplies the
//! cache/retry/cost-accounting pre-flight that every `summarize_*` call
//! shares, so adapters only need to build a prompt and hand it to
//! [`summarize_common`].

pub mod anthropic;
pub mod factory;
pub mod google;
pub mod llamacpp;
pub mod ollama;
pub mod openai;
pub mod retry;

pub use factory::{ProviderFactory, list_available_providers};
pub use retry::{RetryConfig, with_retry, with_retry_cancellable};

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;

use crate::cache::SummaryCache;
use crate::metrics::global_collector;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Provider-level errors that can be mapped into [`anyhow::Error`].
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("model not found: {0}")]
    ModelNotFound(String),
    #[error("request failed: {0}")]
    RequestFailed(String),
    #[error("streaming error: {0}")]
    Stream(String),
    #[error("provider dependency unavailable: {0}")]
    Unavailable(String),
}

// ---------------------------------------------------------------------------
// ProviderKind / ProviderConfig
// ---------------------------------------------------------------------------

/// Tag identifying which wire adapter a [`ProviderConfig`] selects.
///
/// The four local-server presets (`LocalServer`, `Vllm`, `LmStudio`,
/// `LlamaCppServer`) share a single OpenAI-compatible adapter and differ only
/// in their default `api_base` and auth env-var name (see
/// [`openai::local_preset_defaults`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderKind {
    Openai,
    Anthropic,
    Openrouter,
    Google,
    Zhipu,
    Ollama,
    Llamacpp,
    LocalServer,
    Vllm,
    Lmstudio,
    LlamacppServer,
}

impl ProviderKind {
    /// Short lowercase tag used in cache keys, env-var lookups and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Openai => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Openrouter => "openrouter",
            ProviderKind::Google => "google",
            ProviderKind::Zhipu => "zhipu",
            ProviderKind::Ollama => "ollama",
            ProviderKind::Llamacpp => "llamacpp",
            ProviderKind::LocalServer => "local_server",
            ProviderKind::Vllm => "vllm",
            ProviderKind::Lmstudio => "lmstudio",
            ProviderKind::LlamacppServer => "llamacpp_server",
        }
    }

    /// All eleven provider kinds, used by the registry to probe availability.
    pub const ALL: [ProviderKind; 11] = [
        ProviderKind::Openai,
        ProviderKind::Anthropic,
        ProviderKind::Openrouter,
        ProviderKind::Google,
        ProviderKind::Zhipu,
        ProviderKind::Ollama,
        ProviderKind::Llamacpp,
        ProviderKind::LocalServer,
        ProviderKind::Vllm,
        ProviderKind::Lmstudio,
        ProviderKind::LlamacppServer,
    ];
}

/// Caller-owned, read-only (from the provider's perspective) configuration
/// for a single provider instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_base: Option<String>,
    /// Empty string means "provider picks a default" (Ollama auto-discovers).
    #[serde(default)]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout")]
    pub timeout: Duration,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay: Duration,
    #[serde(default = "default_true")]
    pub cache_enabled: bool,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl: Duration,
    #[serde(default)]
    pub cost_per_1k_input_tokens: f64,
    #[serde(default)]
    pub cost_per_1k_output_tokens: f64,
    #[serde(default)]
    pub custom_headers: HashMap<String, String>,
    #[serde(default)]
    pub extra_params: HashMap<String, serde_json::Value>,
}

fn default_temperature() -> f64 {
    0.3
}
fn default_max_tokens() -> u32 {
    500
}
fn default_timeout() -> Duration {
    Duration::from_secs(30)
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay() -> Duration {
    Duration::from_secs(1)
}
fn default_true() -> bool {
    true
}
fn default_cache_ttl() -> Duration {
    Duration::from_secs(3600)
}

impl ProviderConfig {
    /// A minimal config for `kind`, everything else at spec defaults.
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            api_key: None,
            api_base: None,
            model: String::new(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout: default_timeout(),
            max_retries: default_max_retries(),
            retry_delay: default_retry_delay(),
            cache_enabled: default_true(),
            cache_ttl: default_cache_ttl(),
            cost_per_1k_input_tokens: 0.0,
            cost_per_1k_output_tokens: 0.0,
            custom_headers: HashMap::new(),
            extra_params: HashMap::new(),
        }
    }

    fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            retry_delay: self.retry_delay,
        }
    }
}

// ---------------------------------------------------------------------------
// Common wire-level types
// ---------------------------------------------------------------------------

/// A boxed, pinned, sendable stream.
pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send>>;

/// A chat message with a role and content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

/// Request for a chat completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub stream: bool,
}

/// A single completion choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub message: ChatMessage,
    pub finish_reason: Option<String>,
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Response from a chat completion. `cost_override` is set by adapters
/// (OpenRouter) whose wire response already carries an authoritative cost
/// figure, bypassing the local per-token calculation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub id: String,
    pub model: String,
    pub choices: Vec<Choice>,
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_override: Option<f64>,
}

/// A streaming event from a completion.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Delta { content: String },
    Done,
    Error { message: String },
}

// ---------------------------------------------------------------------------
// Provider trait — low-level chat-completion primitive
// ---------------------------------------------------------------------------

/// Common interface for all model providers.
///
/// Implementations should be kept thin: translate requests, handle auth, and
/// return responses in the unified format. Cache lookups, retries, and cost
/// accounting live one layer up in [`Summarizer`].
pub trait Provider: Send + Sync {
    fn complete(
        &self,
        request: &CompletionRequest,
    ) -> impl Future<Output = anyhow::Result<CompletionResponse>> + Send;

    /// Streaming variant, kept as ambient surface (see `SPEC_FULL.md` §10.2)
    /// but never invoked by the summarization processor.
    fn complete_stream(
        &self,
        request: &CompletionRequest,
    ) -> impl Future<Output = anyhow::Result<BoxStream<anyhow::Result<StreamEvent>>>> + Send;

    /// List models known to this backend. Best-effort; an empty vec does not
    /// indicate an error.
    fn list_models(&self) -> impl Future<Output = anyhow::Result<Vec<String>>> + Send {
        async { Ok(Vec::new()) }
    }
}

// ---------------------------------------------------------------------------
// Dyn-compatible wrapper for Provider
// ---------------------------------------------------------------------------

type StreamFuture<'a> = Pin<
    Box<dyn Future<Output = anyhow::Result<BoxStream<anyhow::Result<StreamEvent>>>> + Send + 'a>,
>;

/// Object-safe version of [`Provider`], using boxed futures.
pub trait ProviderDyn: Send + Sync {
    fn complete_dyn<'a>(
        &'a self,
        request: &'a CompletionRequest,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<CompletionResponse>> + Send + 'a>>;

    fn complete_stream_dyn<'a>(&'a self, request: &'a CompletionRequest) -> StreamFuture<'a>;

    fn list_models_dyn<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<String>>> + Send + 'a>>;
}

impl<T: Provider + Send + Sync + 'static> ProviderDyn for T {
    fn complete_dyn<'a>(
        &'a self,
        request: &'a CompletionRequest,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<CompletionResponse>> + Send + 'a>> {
        Box::pin(self.complete(request))
    }

    fn complete_stream_dyn<'a>(&'a self, request: &'a CompletionRequest) -> StreamFuture<'a> {
        Box::pin(self.complete_stream(request))
    }

    fn list_models_dyn<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<String>>> + Send + 'a>> {
        Box::pin(self.list_models())
    }
}

// ---------------------------------------------------------------------------
// Summarization contract (spec.md §4.1)
// ---------------------------------------------------------------------------

/// Optional per-file context handed to the prompt builder.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummarizeContext {
    pub file_path: Option<String>,
    #[serde(default)]
    pub imports: Vec<String>,
    pub num_functions: Option<usize>,
    pub num_classes: Option<usize>,
}

/// Result of one `summarize_code`/`summarize_function` call. Never carries a
/// Rust-level error: failure is encoded in `.error` with an empty `.summary`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummarizationResult {
    pub summary: String,
    pub tokens_used: u32,
    pub cost_estimate: f64,
    pub model_used: String,
    pub provider: String,
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub metadata: SummarizationMetadata,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummarizationMetadata {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Best-effort model information, never fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub provider: String,
    pub model: String,
    pub temperature: f64,
    pub context_window: Option<u32>,
    pub max_output: Option<u32>,
    pub cost_per_1k_input: f64,
    pub cost_per_1k_output: f64,
}

/// Adapters implement this on top of [`Provider`] to get cache lookup, retry,
/// and cost accounting for free. See `summarize_common` for the shared
/// pre-flight (spec.md §4.1 "Common pre-flight for both summarize
/// operations").
pub trait Summarizer: Provider {
    fn provider_kind(&self) -> ProviderKind;
    fn config(&self) -> &ProviderConfig;
    fn resolved_model(&self) -> String;

    fn summarize_code(
        &self,
        cache: Option<&SummaryCache>,
        content: &str,
        language: &str,
        context: Option<&SummarizeContext>,
        max_length: Option<u32>,
        cancel: Option<&CancellationToken>,
    ) -> impl Future<Output = SummarizationResult> + Send
    where
        Self: Sized,
    {
        async move {
            let model = self.resolved_model();
            let messages = crate::prompts::build_code_summary_prompt(content, language, context);
            let max_tokens = max_length.unwrap_or(self.config().max_tokens);
            summarize_common(
                self,
                cache,
                "summarize_code",
                content,
                language,
                None,
                &model,
                messages,
                max_tokens,
                cancel,
            )
            .await
        }
    }

    fn summarize_function(
        &self,
        cache: Option<&SummaryCache>,
        function_code: &str,
        function_name: &str,
        language: &str,
        context: Option<&SummarizeContext>,
        cancel: Option<&CancellationToken>,
    ) -> impl Future<Output = SummarizationResult> + Send
    where
        Self: Sized,
    {
        async move {
            let model = self.resolved_model();
            let messages = crate::prompts::build_function_summary_prompt(
                function_code,
                function_name,
                language,
                context,
            );
            summarize_common(
                self,
                cache,
                "summarize_function",
                function_code,
                language,
                Some(function_name),
                &model,
                messages,
                200,
                cancel,
            )
            .await
        }
    }

    fn get_model_info(&self) -> impl Future<Output = ModelInfo> + Send
    where
        Self: Sized,
    {
        async move {
            let cfg = self.config();
            ModelInfo {
                provider: self.provider_kind().as_str().to_string(),
                model: self.resolved_model(),
                temperature: cfg.temperature,
                context_window: None,
                max_output: Some(cfg.max_tokens),
                cost_per_1k_input: cfg.cost_per_1k_input_tokens,
                cost_per_1k_output: cfg.cost_per_1k_output_tokens,
            }
        }
    }

    /// A minimal round-trip; any failure (including a dependency being
    /// entirely absent) collapses to `false`.
    fn validate_connection(&self) -> impl Future<Output = bool> + Send
    where
        Self: Sized,
    {
        async move {
            let req = CompletionRequest {
                model: self.resolved_model(),
                messages: vec![ChatMessage::user("ping")],
                max_tokens: Some(1),
                temperature: Some(0.0),
                stream: false,
            };
            self.complete(&req).await.is_ok()
        }
    }
}

/// Shared pre-flight logic used by every `Summarizer::summarize_*`
/// implementation: cache lookup, retry-wrapped request, cost accounting,
/// cache population.
#[allow(clippy::too_many_arguments)]
pub async fn summarize_common<P: Summarizer>(
    provider: &P,
    cache: Option<&SummaryCache>,
    operation: &str,
    content_for_key: &str,
    language: &str,
    function_name: Option<&str>,
    model: &str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    cancel: Option<&CancellationToken>,
) -> SummarizationResult {
    let cfg = provider.config();
    let provider_name = provider.provider_kind().as_str();

    let cache_key = cache.filter(|_| cfg.cache_enabled).map(|_| {
        crate::cache::compute_key(
            content_for_key,
            provider_name,
            model,
            operation,
            language,
            function_name,
        )
    });

    if let Some(token) = cancel
        && token.is_cancelled()
    {
        return SummarizationResult {
            summary: String::new(),
            tokens_used: 0,
            cost_estimate: 0.0,
            model_used: model.to_string(),
            provider: provider_name.to_string(),
            cached: false,
            error: Some("summarization cancelled".to_string()),
            metadata: SummarizationMetadata::default(),
        };
    }

    if let (Some(cache), Some(key)) = (cache, &cache_key)
        && cfg.cache_enabled
        && let Some(entry) = cache.get(key, cfg.cache_ttl).await
    {
        return SummarizationResult {
            summary: entry.summary,
            tokens_used: 0,
            cost_estimate: 0.0,
            model_used: model.to_string(),
            provider: provider_name.to_string(),
            cached: true,
            error: None,
            metadata: SummarizationMetadata::default(),
        };
    }

    let timer = global_collector().start_request(provider_name, model);

    let request = CompletionRequest {
        model: model.to_string(),
        messages,
        max_tokens: Some(max_tokens),
        temperature: Some(cfg.temperature),
        stream: false,
    };

    let retry_cfg = cfg.retry_config();
    let outcome = with_retry_cancellable(&retry_cfg, cancel, || async {
        tokio::time::timeout(cfg.timeout, provider.complete(&request))
            .await
            .map_err(|_| anyhow::anyhow!("provider request timed out after {:?}", cfg.timeout))?
    })
    .await;

    match outcome {
        Ok(response) => {
            let choice = response.choices.first();
            let summary = choice.map(|c| c.message.content.clone()).unwrap_or_default();
            let usage = response.usage.unwrap_or_default();
            let cost = response.cost_override.unwrap_or_else(|| {
                (usage.prompt_tokens as f64 / 1000.0) * cfg.cost_per_1k_input_tokens
                    + (usage.completion_tokens as f64 / 1000.0) * cfg.cost_per_1k_output_tokens
            });

            timer.success(usage.prompt_tokens, usage.completion_tokens, cost);

            if let (Some(cache), Some(key)) = (cache, &cache_key)
                && cfg.cache_enabled
                && !summary.is_empty()
            {
                cache.set(key, &summary, serde_json::json!({"tokens": usage.total_tokens})).await;
            }

            SummarizationResult {
                summary,
                tokens_used: usage.total_tokens,
                cost_estimate: cost,
                model_used: response.model,
                provider: provider_name.to_string(),
                cached: false,
                error: None,
                metadata: SummarizationMetadata {
                    input_tokens: usage.prompt_tokens,
                    output_tokens: usage.completion_tokens,
                },
            }
        }
        Err(e) => {
            timer.failure();
            SummarizationResult {
                summary: String::new(),
                tokens_used: 0,
                cost_estimate: 0.0,
                model_used: model.to_string(),
                provider: provider_name.to_string(),
                cached: false,
                error: Some(e.to_string()),
                metadata: SummarizationMetadata::default(),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Dyn-compatible wrapper for Summarizer
// ---------------------------------------------------------------------------

type SummarizeFuture<'a> = Pin<Box<dyn Future<Output = SummarizationResult> + Send + 'a>>;

/// Object-safe version of [`Summarizer`], used by the factory/registry and
/// the summarization processor to hold heterogeneous providers behind one
/// handle.
pub trait SummarizerDyn: Send + Sync {
    fn summarize_code_dyn<'a>(
        &'a self,
        cache: Option<&'a SummaryCache>,
        content: &'a str,
        language: &'a str,
        context: Option<&'a SummarizeContext>,
        max_length: Option<u32>,
        cancel: Option<&'a CancellationToken>,
    ) -> SummarizeFuture<'a>;

    fn summarize_function_dyn<'a>(
        &'a self,
        cache: Option<&'a SummaryCache>,
        function_code: &'a str,
        function_name: &'a str,
        language: &'a str,
        context: Option<&'a SummarizeContext>,
        cancel: Option<&'a CancellationToken>,
    ) -> SummarizeFuture<'a>;

    fn get_model_info_dyn<'a>(&'a self) -> Pin<Box<dyn Future<Output = ModelInfo> + Send + 'a>>;

    fn validate_connection_dyn<'a>(&'a self) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>>;

    fn provider_kind(&self) -> ProviderKind;
}

impl<T: Summarizer + Send + Sync + 'static> SummarizerDyn for T {
    fn summarize_code_dyn<'a>(
        &'a self,
        cache: Option<&'a SummaryCache>,
        content: &'a str,
        language: &'a str,
        context: Option<&'a SummarizeContext>,
        max_length: Option<u32>,
        cancel: Option<&'a CancellationToken>,
    ) -> SummarizeFuture<'a> {
        Box::pin(self.summarize_code(cache, content, language, context, max_length, cancel))
    }

    fn summarize_function_dyn<'a>(
        &'a self,
        cache: Option<&'a SummaryCache>,
        function_code: &'a str,
        function_name: &'a str,
        language: &'a str,
        context: Option<&'a SummarizeContext>,
        cancel: Option<&'a CancellationToken>,
    ) -> SummarizeFuture<'a> {
        Box::pin(self.summarize_function(cache, function_code, function_name, language, context, cancel))
    }

    fn get_model_info_dyn<'a>(&'a self) -> Pin<Box<dyn Future<Output = ModelInfo> + Send + 'a>> {
        Box::pin(self.get_model_info())
    }

    fn validate_connection_dyn<'a>(&'a self) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(self.validate_connection())
    }

    fn provider_kind(&self) -> ProviderKind {
        Summarizer::provider_kind(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_completion_request_skips_none_temperature() {
        let request = CompletionRequest {
            model: "gpt-4".to_string(),
            messages: vec![ChatMessage::user("Hello")],
            max_tokens: Some(100),
            temperature: None,
            stream: false,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("gpt-4"));
        assert!(!json.contains("temperature"));
    }

    #[test]
    fn deserialize_completion_response() {
        let json = r#"{
            "id": "test-id",
            "model": "gpt-4",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "Hi"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 5, "completion_tokens": 1, "total_tokens": 6}
        }"#;
        let response: CompletionResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.id, "test-id");
        assert_eq!(response.choices[0].message.content, "Hi");
        assert_eq!(response.usage.unwrap().total_tokens, 6);
    }

    #[test]
    fn provider_kind_as_str_matches_spec_tags() {
        assert_eq!(ProviderKind::Openai.as_str(), "openai");
        assert_eq!(ProviderKind::LlamacppServer.as_str(), "llamacpp_server");
    }

    #[test]
    fn provider_config_defaults_match_spec() {
        let cfg = ProviderConfig::new(ProviderKind::Openai);
        assert_eq!(cfg.temperature, 0.3);
        assert_eq!(cfg.max_tokens, 500);
        assert_eq!(cfg.timeout, Duration::from_secs(30));
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.retry_delay, Duration::from_secs(1));
        assert!(cfg.cache_enabled);
        assert_eq!(cfg.cache_ttl, Duration::from_secs(3600));
    }

    struct MockProvider;

    impl Provider for MockProvider {
        async fn complete(&self, request: &CompletionRequest) -> anyhow::Result<CompletionResponse> {
            Ok(CompletionResponse {
                id: "mock-id".to_string(),
                model: request.model.clone(),
                choices: vec![Choice {
                    index: 0,
                    message: ChatMessage::user("mock response"),
                    finish_reason: Some("stop".to_string()),
                }],
                usage: Some(Usage {
                    prompt_tokens: 5,
                    completion_tokens: 2,
                    total_tokens: 7,
                }),
                cost_override: None,
            })
        }

        async fn complete_stream(
            &self,
            _request: &CompletionRequest,
        ) -> anyhow::Result<BoxStream<anyhow::Result<StreamEvent>>> {
            anyhow::bail!("mock: streaming not implemented")
        }
    }

    impl Summarizer for MockProvider {
        fn provider_kind(&self) -> ProviderKind {
            ProviderKind::Openai
        }

        fn config(&self) -> &ProviderConfig {
            static CFG: std::sync::OnceLock<ProviderConfig> = std::sync::OnceLock::new();
            CFG.get_or_init(|| ProviderConfig::new(ProviderKind::Openai))
        }

        fn resolved_model(&self) -> String {
            "mock-model".to_string()
        }
    }

    #[tokio::test]
    async fn mock_provider_complete() {
        let provider = MockProvider;
        let req = CompletionRequest {
            model: "test-model".to_string(),
            messages: vec![ChatMessage::user("Hello")],
            max_tokens: None,
            temperature: None,
            stream: false,
        };

        let resp = provider.complete(&req).await.unwrap();
        assert_eq!(resp.choices[0].message.content, "mock response");
    }

    #[tokio::test]
    async fn summarize_code_without_cache_returns_result() {
        let provider = MockProvider;
        let result = provider.summarize_code(None, "fn f() {}", "rust", None, None, None).await;
        assert_eq!(result.summary, "mock response");
        assert!(!result.cached);
        assert_eq!(result.tokens_used, 7);
    }

    #[tokio::test]
    async fn summarize_code_with_cancelled_token_skips_the_call() {
        let provider = MockProvider;
        let token = CancellationToken::new();
        token.cancel();
        let result = provider
            .summarize_code(None, "fn f() {}", "rust", None, None, Some(&token))
            .await;
        assert!(result.summary.is_empty());
        assert!(result.error.is_some());
    }
}
