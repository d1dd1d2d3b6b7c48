//! AI summarization subsystem for a source-code concatenation tool.
//!
//! Enriches already-parsed source files with natural-language summaries
//! produced by remote or local LLM backends. Summaries are generated at two
//! granularities: whole-file and per-function.
//!
//! This crate is deliberately narrow: it does not parse source, does not
//! render output, and does not define a CLI or HTTP surface. Callers feed it
//! parsed files and a configuration; it hands back the same files decorated
//! with `ai_summary` / `ai_metadata`.
//!
//! The four load-bearing pieces are [`providers`] (the wire-protocol
//! adapters), [`cache`] (the content-addressed summary cache),
//! [`keystore`] (credential storage), and [`processor`] (batch
//! orchestration).

pub mod cache;
pub mod catalog;
pub mod keystore;
pub mod metrics;
pub mod processor;
pub mod prompts;
pub mod providers;

pub use cache::SummaryCache;
pub use catalog::{ModelConfig, ModelTier};
pub use processor::{AiMetadata, Declaration, ParsedFile, SummarizationProcessor, SummaryConfig};
pub use providers::{ProviderConfig, ProviderKind, SummarizationResult};

/// Re-exported so callers can cancel a [`SummarizationProcessor::process_batch_cancellable`]
/// call without taking a direct dependency on `tokio-util` themselves.
pub use tokio_util::sync::CancellationToken;
