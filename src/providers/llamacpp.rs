//! In-process llama.cpp (GGUF) adapter (spec.md §4.1).
//!
//! Unlike every other adapter in this module, this one doesn't speak HTTP:
//! it loads a GGUF file directly into the process via `mistralrs` and runs
//! inference through its engine, which owns its own dedicated worker thread
//! so a synchronous forward pass never stalls the async runtime (spec.md
//! §5's "heavy CPU-bound calls...dispatched to a worker-thread pool").
//!
//! The model load is *not* done in [`LlamaCppProvider::new`] — spec.md §9
//! flags the naive constructor-blocks-on-load design as wrong for a
//! cooperative scheduler, so loading is deferred to [`LlamaCppProvider::engine`],
//! invoked lazily on the first [`Provider::complete`] call.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use mistralrs::{GgufModelBuilder, Model, TextMessageRole, TextMessages};
use tokio::sync::OnceCell;

use crate::providers::{
    BoxStream, ChatMessage, Choice, CompletionRequest, CompletionResponse, Provider,
    ProviderConfig, ProviderKind, StreamEvent, Summarizer, Usage,
};

const DEFAULT_MODEL_ID: &str = "local-gguf";
const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

/// GGUF-specific knobs that don't fit [`ProviderConfig`]'s HTTP-shaped
/// fields, read out of `extra_params` by [`Self::from_provider_config`].
#[derive(Debug, Clone)]
pub struct LlamaCppConfig {
    pub model_path: PathBuf,
    pub n_ctx: u32,
    pub n_threads: Option<u32>,
    pub n_gpu_layers: u32,
    pub seed: u64,
}

impl LlamaCppConfig {
    /// `api_base` doubles as the GGUF file path for this adapter — there is
    /// no URL to speak of, and every other field on [`ProviderConfig`] is
    /// already taken for HTTP-shaped concerns that don't apply here.
    fn from_provider_config(config: &ProviderConfig) -> Result<Self> {
        let model_path = config.api_base.as_ref().map(PathBuf::from).ok_or_else(|| {
            anyhow::anyhow!("llama.cpp provider requires `api_base` set to a GGUF file path")
        })?;

        let extra_u64 = |key: &str| config.extra_params.get(key).and_then(|v| v.as_u64());

        Ok(Self {
            model_path,
            n_ctx: extra_u64("n_ctx").unwrap_or(4096) as u32,
            n_threads: extra_u64("n_threads").map(|v| v as u32),
            n_gpu_layers: extra_u64("n_gpu_layers").unwrap_or(0) as u32,
            seed: extra_u64("seed").unwrap_or(0),
        })
    }
}

pub struct LlamaCppProvider {
    config: ProviderConfig,
    llama_config: LlamaCppConfig,
    engine: OnceCell<Arc<Model>>,
}

impl LlamaCppProvider {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let llama_config = LlamaCppConfig::from_provider_config(&config)?;
        Ok(Self {
            config,
            llama_config,
            engine: OnceCell::new(),
        })
    }

    /// Load the GGUF model on first use and cache the handle for the
    /// lifetime of this provider instance.
    async fn engine(&self) -> Result<&Arc<Model>> {
        self.engine
            .get_or_try_init(|| async {
                let path = &self.llama_config.model_path;
                let dir = path
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .unwrap_or_else(|| std::path::Path::new("."))
                    .to_string_lossy()
                    .to_string();
                let filename = path
                    .file_name()
                    .ok_or_else(|| anyhow::anyhow!("llama.cpp model path has no file name"))?
                    .to_string_lossy()
                    .to_string();

                let model = GgufModelBuilder::new(dir, vec![filename])
                    .build()
                    .await
                    .context("failed to load GGUF model")?;
                Ok(Arc::new(model))
            })
            .await
    }

    /// Split the folded message list into a system prompt (falling back to
    /// a generic default when the caller didn't supply one) and the
    /// remaining turns collapsed into a single user block.
    fn split_prompt(request: &CompletionRequest) -> (String, String) {
        let mut system = None;
        let mut user_parts = Vec::new();
        for msg in &request.messages {
            match msg.role.as_str() {
                "system" => system = Some(msg.content.clone()),
                _ => user_parts.push(msg.content.clone()),
            }
        }
        (
            system.unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            user_parts.join("\n\n"),
        )
    }

    /// Canonical Llama2 instruction template (spec.md §4.1).
    fn wrap_llama2(system: &str, user: &str) -> String {
        format!("<s>[INST] <<SYS>>\n{system}\n<</SYS>>\n\n{user} [/INST]")
    }

    /// Token counts are never read off the engine for this backend; spec.md
    /// §4.1 mandates the cheap ⌈chars/4⌉ estimate instead.
    fn estimate_tokens(text: &str) -> u32 {
        ((text.chars().count() + 3) / 4) as u32
    }
}

impl Provider for LlamaCppProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        let engine = self.engine().await?;

        let (system, user) = Self::split_prompt(request);
        let prompt = Self::wrap_llama2(&system, &user);
        let messages = TextMessages::new().add_message(TextMessageRole::User, prompt);

        let response = engine
            .send_chat_request(messages)
            .await
            .context("llama.cpp inference failed")?;

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        let prompt_tokens = Self::estimate_tokens(&system) + Self::estimate_tokens(&user);
        let completion_tokens = Self::estimate_tokens(&content);

        Ok(CompletionResponse {
            id: String::new(),
            model: request.model.clone(),
            choices: vec![Choice {
                index: 0,
                message: ChatMessage {
                    role: "assistant".to_string(),
                    content,
                },
                finish_reason: Some("stop".to_string()),
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
    ) -> Result<BoxStream<Result<StreamEvent>>> {
        bail!("llama.cpp provider: streaming is not implemented")
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        Ok(vec![
            self.llama_config
                .model_path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| DEFAULT_MODEL_ID.to_string()),
        ])
    }
}

impl Summarizer for LlamaCppProvider {
    fn provider_kind(&self) -> ProviderKind {
        ProviderKind::Llamacpp
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn resolved_model(&self) -> String {
        if self.config.model.is_empty() {
            DEFAULT_MODEL_ID.to_string()
        } else {
            self.config.model.clone()
        }
    }
}
