//! Factory & registry (spec.md §4.5).
//!
//! [`ProviderFactory::build`] turns a [`ProviderConfig`] into a boxed
//! [`SummarizerDyn`], filling in a missing `api_key` from the environment
//! first so callers constructing a config entirely in-process don't have to
//! re-derive the per-provider env-var table themselves.
//! [`list_available_providers`] probes which adapters are actually usable
//! right now — cloud providers by credential presence, local servers and
//! Ollama by a short-timeout HTTP probe.

use std::time::Duration;

use anyhow::Result;

use crate::keystore::read_env_key;
use crate::providers::{ProviderConfig, ProviderKind, SummarizerDyn};

/// Builds a [`SummarizerDyn`] for a given [`ProviderConfig`].
pub struct ProviderFactory;

impl ProviderFactory {
    /// Construct the adapter selected by `config.kind`.
    ///
    /// If `config.api_key` is `None`, the environment is consulted first
    /// (spec.md §6's env-var table) before falling through to the adapter's
    /// own default (most adapters treat a missing key as "send no auth
    /// header", which is valid for unauthenticated local servers).
    pub fn build(config: &ProviderConfig) -> Result<Box<dyn SummarizerDyn>> {
        let mut config = config.clone();
        if config.api_key.is_none() {
            config.api_key = read_env_key(config.kind);
        }

        Ok(match config.kind {
            ProviderKind::Openai
            | ProviderKind::Openrouter
            | ProviderKind::Zhipu
            | ProviderKind::LocalServer
            | ProviderKind::Vllm
            | ProviderKind::Lmstudio
            | ProviderKind::LlamacppServer => {
                Box::new(crate::providers::openai::OpenAiCompatProvider::new(config)?)
            }
            ProviderKind::Anthropic => {
                Box::new(crate::providers::anthropic::AnthropicProvider::new(config)?)
            }
            ProviderKind::Google => Box::new(crate::providers::google::GoogleProvider::new(config)?),
            ProviderKind::Ollama => Box::new(crate::providers::ollama::OllamaProvider::new(config)?),
            ProviderKind::Llamacpp => {
                Box::new(crate::providers::llamacpp::LlamaCppProvider::new(config)?)
            }
        })
    }
}

const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Enumerate the subset of [`ProviderKind::ALL`] whose runtime dependencies
/// are currently satisfied. Cloud adapters are "available" when a
/// credential is discoverable in the environment; local-server adapters and
/// Ollama are probed live with a short timeout; the in-process llama.cpp
/// adapter is available when a GGUF path is configured via
/// `LLAMACPP_MODEL_PATH` and the file exists.
pub async fn list_available_providers() -> Vec<ProviderKind> {
    let mut available = Vec::new();
    for kind in ProviderKind::ALL {
        if is_available(kind).await {
            available.push(kind);
        }
    }
    available
}

async fn is_available(kind: ProviderKind) -> bool {
    match kind {
        ProviderKind::Openai
        | ProviderKind::Anthropic
        | ProviderKind::Openrouter
        | ProviderKind::Google
        | ProviderKind::Zhipu => read_env_key(kind).is_some(),
        ProviderKind::Ollama => probe_http(&format!(
            "{}/api/tags",
            crate::providers::ollama::DEFAULT_BASE
        ))
        .await,
        ProviderKind::LocalServer | ProviderKind::Vllm | ProviderKind::Lmstudio | ProviderKind::LlamacppServer => {
            let (base, _) = crate::providers::openai::local_preset_defaults(kind);
            probe_http(&format!("{base}/v1/models")).await
        }
        ProviderKind::Llamacpp => std::env::var("LLAMACPP_MODEL_PATH")
            .map(std::path::PathBuf::from)
            .is_ok_and(|p| p.is_file()),
    }
}

async fn probe_http(url: &str) -> bool {
    let Ok(client) = reqwest::Client::builder().timeout(PROBE_TIMEOUT).build() else {
        return false;
    };
    matches!(client.get(url).send().await, Ok(resp) if resp.status().is_success())
}
