//! Static model catalog (spec.md §4.6).
//!
//! A compile-time table mapping well-known model identifiers to pricing and
//! capability metadata. Consulted by the factory when a caller supplies a
//! model id but no explicit per-1k pricing, and by callers who want to pick
//! a model by cost/tier rather than by name.

use serde::{Deserialize, Serialize};

use crate::providers::ProviderKind;

/// Qualitative cost/capability label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Budget,
    Standard,
    Premium,
    Flagship,
}

/// One catalog entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub provider: ProviderKind,
    pub model_id: &'static str,
    pub display_name: &'static str,
    pub tier: ModelTier,
    pub context_window: u32,
    pub max_output: u32,
    pub cost_per_1k_input: f64,
    pub cost_per_1k_output: f64,
    pub supports_functions: bool,
    pub supports_vision: bool,
    pub supports_streaming: bool,
    pub tokenizer_hint: &'static str,
    pub notes: &'static str,
}

macro_rules! model {
    (
        $provider:expr, $id:expr, $name:expr, $tier:expr,
        ctx: $ctx:expr, out: $out:expr,
        in_cost: $in_cost:expr, out_cost: $out_cost:expr,
        fns: $fns:expr, vision: $vision:expr, stream: $stream:expr,
        tok: $tok:expr, notes: $notes:expr
    ) => {
        ModelConfig {
            provider: $provider,
            model_id: $id,
            display_name: $name,
            tier: $tier,
            context_window: $ctx,
            max_output: $out,
            cost_per_1k_input: $in_cost,
            cost_per_1k_output: $out_cost,
            supports_functions: $fns,
            supports_vision: $vision,
            supports_streaming: $stream,
            tokenizer_hint: $tok,
            notes: $notes,
        }
    };
}

/// The full static catalog, in no particular order.
pub static CATALOG: &[ModelConfig] = &[
    model!(
        ProviderKind::Openai, "gpt-4o", "GPT-4o", ModelTier::Premium,
        ctx: 128_000, out: 16_384,
        in_cost: 0.0025, out_cost: 0.01,
        fns: true, vision: true, stream: true,
        tok: "cl100k_base", notes: "flagship multimodal OpenAI model"
    ),
    model!(
        ProviderKind::Openai, "gpt-4o-mini", "GPT-4o mini", ModelTier::Standard,
        ctx: 128_000, out: 16_384,
        in_cost: 0.00015, out_cost: 0.0006,
        fns: true, vision: true, stream: true,
        tok: "cl100k_base", notes: "cheap default for summarization workloads"
    ),
    model!(
        ProviderKind::Openai, "o3-mini", "o3-mini", ModelTier::Premium,
        ctx: 200_000, out: 100_000,
        in_cost: 0.0011, out_cost: 0.0044,
        fns: true, vision: false, stream: true,
        tok: "o200k_base", notes: "reasoning model, no vision"
    ),
    model!(
        ProviderKind::Anthropic, "claude-opus-4-5-20251001", "Claude Opus 4.5", ModelTier::Flagship,
        ctx: 200_000, out: 8_192,
        in_cost: 0.005, out_cost: 0.025,
        fns: true, vision: true, stream: true,
        tok: "anthropic", notes: "top-tier Anthropic model"
    ),
    model!(
        ProviderKind::Anthropic, "claude-sonnet-4-5-20251001", "Claude Sonnet 4.5", ModelTier::Premium,
        ctx: 200_000, out: 8_192,
        in_cost: 0.003, out_cost: 0.015,
        fns: true, vision: true, stream: true,
        tok: "anthropic", notes: "balanced cost/quality Anthropic model"
    ),
    model!(
        ProviderKind::Anthropic, "claude-3-5-haiku-20241022", "Claude 3.5 Haiku", ModelTier::Budget,
        ctx: 200_000, out: 8_192,
        in_cost: 0.0008, out_cost: 0.004,
        fns: true, vision: false, stream: true,
        tok: "anthropic", notes: "cheapest current Anthropic model"
    ),
    model!(
        ProviderKind::Openrouter, "openai/gpt-4o-mini", "GPT-4o mini (OpenRouter)", ModelTier::Standard,
        ctx: 128_000, out: 16_384,
        in_cost: 0.00015, out_cost: 0.0006,
        fns: true, vision: true, stream: true,
        tok: "cl100k_base", notes: "OpenRouter usually reports total_cost directly"
    ),
    model!(
        ProviderKind::Google, "gemini-2.0-flash", "Gemini 2.0 Flash", ModelTier::Standard,
        ctx: 1_000_000, out: 8_192,
        in_cost: 0.0001, out_cost: 0.0004,
        fns: true, vision: true, stream: true,
        tok: "gemini", notes: "default Google model, very large context"
    ),
    model!(
        ProviderKind::Google, "gemini-2.0-pro", "Gemini 2.0 Pro", ModelTier::Premium,
        ctx: 2_000_000, out: 8_192,
        in_cost: 0.00125, out_cost: 0.005,
        fns: true, vision: true, stream: true,
        tok: "gemini", notes: "larger Google model for harder summaries"
    ),
    model!(
        ProviderKind::Zhipu, "glm-4-flash", "GLM-4-Flash", ModelTier::Budget,
        ctx: 128_000, out: 4_096,
        in_cost: 0.0, out_cost: 0.0,
        fns: true, vision: false, stream: true,
        tok: "zhipu", notes: "free tier Zhipu model"
    ),
    model!(
        ProviderKind::Zhipu, "glm-4-plus", "GLM-4-Plus", ModelTier::Premium,
        ctx: 128_000, out: 4_096,
        in_cost: 0.00007, out_cost: 0.00007,
        fns: true, vision: false, stream: true,
        tok: "zhipu", notes: "paid-tier Zhipu model"
    ),
    model!(
        ProviderKind::Ollama, "deepseek-coder-v2", "DeepSeek Coder V2 (Ollama)", ModelTier::Standard,
        ctx: 16_384, out: 4_096,
        in_cost: 0.0, out_cost: 0.0,
        fns: false, vision: false, stream: true,
        tok: "ollama", notes: "local, zero marginal cost"
    ),
    model!(
        ProviderKind::Ollama, "codellama", "Code Llama (Ollama)", ModelTier::Budget,
        ctx: 16_384, out: 4_096,
        in_cost: 0.0, out_cost: 0.0,
        fns: false, vision: false, stream: true,
        tok: "ollama", notes: "local, zero marginal cost"
    ),
    model!(
        ProviderKind::Llamacpp, "local-gguf", "Local GGUF", ModelTier::Budget,
        ctx: 4_096, out: 1_024,
        in_cost: 0.0, out_cost: 0.0,
        fns: false, vision: false, stream: false,
        tok: "estimated-chars-div-4", notes: "in-process inference, token counts estimated"
    ),
];

/// Look up a catalog entry by exact model id.
pub fn lookup(model_id: &str) -> Option<&'static ModelConfig> {
    CATALOG.iter().find(|m| m.model_id == model_id)
}

/// Conservative hard-coded defaults per provider family, used when the
/// caller's model id is not in [`CATALOG`] (spec.md §4.6 "Unknown models
/// fall back to conservative hard-coded defaults per provider family").
pub fn fallback_pricing(provider: ProviderKind) -> (f64, f64) {
    match provider {
        ProviderKind::Openai | ProviderKind::Openrouter => (0.0005, 0.0015),
        ProviderKind::Anthropic => (0.003, 0.015),
        ProviderKind::Google => (0.0005, 0.0015),
        ProviderKind::Zhipu => (0.0001, 0.0001),
        ProviderKind::Ollama
        | ProviderKind::Llamacpp
        | ProviderKind::LocalServer
        | ProviderKind::Vllm
        | ProviderKind::Lmstudio
        | ProviderKind::LlamacppServer => (0.0, 0.0),
    }
}

/// The model minimizing `cost_in + cost_out` at 1k/1k tokens, optionally
/// restricted to one provider and a minimum context window.
pub fn get_cheapest_model(
    provider: Option<ProviderKind>,
    min_context_window: Option<u32>,
) -> Option<&'static ModelConfig> {
    CATALOG
        .iter()
        .filter(|m| provider.is_none_or(|p| m.provider == p))
        .filter(|m| min_context_window.is_none_or(|ctx| m.context_window >= ctx))
        .min_by(|a, b| {
            let cost_a = a.cost_per_1k_input + a.cost_per_1k_output;
            let cost_b = b.cost_per_1k_input + b.cost_per_1k_output;
            cost_a.total_cmp(&cost_b)
        })
}

/// All models in `tier`.
pub fn get_models_by_tier(tier: ModelTier) -> Vec<&'static ModelConfig> {
    CATALOG.iter().filter(|m| m.tier == tier).collect()
}

/// Pure arithmetic: `(in/1000)*cost_in + (out/1000)*cost_out`. Falls back to
/// the provider-family default when `model_id` is unknown; the provider
/// cannot be inferred from the id alone so the caller supplies it.
pub fn estimate_cost(
    model_id: &str,
    provider: ProviderKind,
    input_tokens: u32,
    output_tokens: u32,
) -> f64 {
    let (cost_in, cost_out) = lookup(model_id)
        .map(|m| (m.cost_per_1k_input, m.cost_per_1k_output))
        .unwrap_or_else(|| fallback_pricing(provider));

    (input_tokens as f64 / 1000.0) * cost_in + (output_tokens as f64 / 1000.0) * cost_out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_known_model() {
        let m = lookup("gpt-4o-mini").unwrap();
        assert_eq!(m.provider, ProviderKind::Openai);
        assert_eq!(m.tier, ModelTier::Standard);
    }

    #[test]
    fn lookup_unknown_model_is_none() {
        assert!(lookup("not-a-real-model").is_none());
    }

    #[test]
    fn cheapest_model_overall_is_free_local_option() {
        let m = get_cheapest_model(None, None).unwrap();
        assert_eq!(m.cost_per_1k_input + m.cost_per_1k_output, 0.0);
    }

    #[test]
    fn cheapest_model_respects_provider_and_context_window() {
        let m = get_cheapest_model(Some(ProviderKind::Openai), Some(150_000)).unwrap();
        assert_eq!(m.provider, ProviderKind::Openai);
        assert!(m.context_window >= 150_000);
    }

    #[test]
    fn cheapest_model_with_unsatisfiable_constraint_is_none() {
        assert!(get_cheapest_model(Some(ProviderKind::Ollama), Some(10_000_000)).is_none());
    }

    #[test]
    fn models_by_tier_filters_correctly() {
        let flagship = get_models_by_tier(ModelTier::Flagship);
        assert!(flagship.iter().all(|m| m.tier == ModelTier::Flagship));
        assert!(!flagship.is_empty());
    }

    #[test]
    fn estimate_cost_known_model_matches_formula() {
        let cost = estimate_cost("gpt-4o-mini", ProviderKind::Openai, 120, 8);
        let expected = (120.0 / 1000.0) * 0.00015 + (8.0 / 1000.0) * 0.0006;
        assert!((cost - expected).abs() < 1e-9);
    }

    #[test]
    fn estimate_cost_unknown_model_uses_provider_fallback() {
        let cost = estimate_cost("some-future-model", ProviderKind::Anthropic, 1000, 1000);
        assert!((cost - (0.003 + 0.015)).abs() < 1e-9);
    }
}
