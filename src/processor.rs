//! Summarization processor (spec.md §4.7).
//!
//! The orchestration layer between parsed source files and the provider
//! abstraction: filters which files are worth summarizing, builds the
//! per-file and per-function context, and fans calls out under a bounded
//! concurrency limit while preserving input order in the output.

use std::sync::{Arc, Mutex};

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::cache::SummaryCache;
use crate::providers::factory::ProviderFactory;
use crate::providers::{ProviderConfig, ProviderKind, SummarizeContext, SummarizerDyn};

/// A single function/method/class declaration extracted by the upstream
/// parser. Only the fields the processor actually reads are modeled here;
/// anything else the parser attaches rides along as opaque `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Declaration {
    pub kind: String,
    pub name: String,
    pub start_line: u32,
    #[serde(default)]
    pub end_line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_summary: Option<String>,
}

impl Declaration {
    fn is_summarizable(&self) -> bool {
        self.kind == "function" || self.kind == "method"
    }

    fn length(&self) -> u32 {
        self.end_line.unwrap_or(self.start_line + 20).saturating_sub(self.start_line)
    }
}

/// Metadata attached alongside `ai_summary` on a successful summarization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiMetadata {
    pub tokens_used: u32,
    pub cost_estimate: f64,
    pub model: String,
    pub cached: bool,
}

/// One parsed source file, as handed off by the upstream parser. The tuple
/// ⟨path, language, content, declarations, imports⟩ is the processor's only
/// contract with whatever produced it (spec.md §1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedFile {
    pub path: String,
    pub language: String,
    pub content: String,
    #[serde(default)]
    pub annotated_content: Option<String>,
    #[serde(default)]
    pub declarations: Vec<Declaration>,
    #[serde(default)]
    pub imports: Vec<String>,
    #[serde(default)]
    pub ai_summary: Option<String>,
    #[serde(default)]
    pub ai_metadata: Option<AiMetadata>,
}

impl ParsedFile {
    fn line_count(&self) -> usize {
        self.content.lines().count()
    }
}

fn default_min_file_lines() -> usize {
    20
}
fn default_max_content_chars() -> usize {
    50_000
}
fn default_max_functions_per_file() -> usize {
    10
}
fn default_min_function_lines() -> usize {
    10
}
fn default_max_concurrent() -> usize {
    5
}

/// The nested AI-summary configuration block (spec.md §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryConfig {
    #[serde(default)]
    pub enable_ai_summary: bool,
    pub provider: ProviderConfig,
    #[serde(default = "default_min_file_lines")]
    pub ai_min_file_lines: usize,
    #[serde(default)]
    pub ai_exclude_languages: Vec<String>,
    #[serde(default)]
    pub ai_include_languages: Vec<String>,
    #[serde(default)]
    pub ai_exclude_patterns: Vec<String>,
    #[serde(default = "default_max_content_chars")]
    pub ai_max_content_chars: usize,
    #[serde(default)]
    pub ai_summarize_functions: bool,
    #[serde(default = "default_max_functions_per_file")]
    pub ai_max_functions_per_file: usize,
    #[serde(default = "default_min_function_lines")]
    pub ai_min_function_lines: usize,
    #[serde(default = "default_max_concurrent")]
    pub ai_max_concurrent: usize,
}

impl SummaryConfig {
    /// A config with `enable_ai_summary: false` — every `process_*` call
    /// becomes a passthrough.
    pub fn disabled() -> Self {
        Self {
            enable_ai_summary: false,
            provider: ProviderConfig::new(ProviderKind::Openai),
            ai_min_file_lines: default_min_file_lines(),
            ai_exclude_languages: Vec::new(),
            ai_include_languages: Vec::new(),
            ai_exclude_patterns: Vec::new(),
            ai_max_content_chars: default_max_content_chars(),
            ai_summarize_functions: false,
            ai_max_functions_per_file: default_max_functions_per_file(),
            ai_min_function_lines: default_min_function_lines(),
            ai_max_concurrent: default_max_concurrent(),
        }
    }
}

const TRUNCATION_MARKER: &str = "\n... (content truncated)";

/// Counters surfaced through [`SummarizationProcessor::get_statistics`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessorStats {
    pub files_processed: u64,
    pub files_skipped: u64,
    pub files_failed: u64,
    pub functions_processed: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
}

/// Batch orchestration layer: filters eligible files, calls the configured
/// provider under bounded concurrency, and decorates results in place.
pub struct SummarizationProcessor {
    provider: Option<Arc<dyn SummarizerDyn>>,
    cache: Option<SummaryCache>,
    config: SummaryConfig,
    exclude_patterns: GlobSet,
    stats: Mutex<ProcessorStats>,
}

impl SummarizationProcessor {
    /// Construct a processor from `config`. A provider construction error
    /// logs a warning and degrades to the disabled state rather than
    /// failing the caller (spec.md §4.7 "graceful degradation").
    pub fn new(config: SummaryConfig) -> Self {
        let exclude_patterns = build_glob_set(&config.ai_exclude_patterns);

        let provider = config.enable_ai_summary.then(|| ProviderFactory::build(&config.provider));
        let provider = match provider {
            Some(Ok(p)) => Some(Arc::from(p)),
            Some(Err(e)) => {
                warn!("failed to construct AI provider, disabling summarization: {e}");
                None
            }
            None => None,
        };

        let cache = provider.is_some().then(SummaryCache::default_location);

        Self {
            provider,
            cache,
            config,
            exclude_patterns,
            stats: Mutex::new(ProcessorStats::default()),
        }
    }

    fn enabled(&self) -> bool {
        self.provider.is_some()
    }

    /// Whether `file` should be summarized at all (spec.md §4.7
    /// "Eligibility filter").
    fn is_eligible(&self, file: &ParsedFile) -> bool {
        if file.ai_summary.as_deref().is_some_and(|s| !s.is_empty()) {
            return false;
        }
        if file.line_count() < self.config.ai_min_file_lines {
            return false;
        }
        if self.config.ai_exclude_languages.iter().any(|l| l.eq_ignore_ascii_case(&file.language)) {
            return false;
        }
        if !self.config.ai_include_languages.is_empty()
            && !self
                .config
                .ai_include_languages
                .iter()
                .any(|l| l.eq_ignore_ascii_case(&file.language))
        {
            return false;
        }
        if self.exclude_patterns.is_match(&file.path) {
            return false;
        }
        true
    }

    /// Summarize a single file (and optionally its functions) in place. A
    /// no-op when summarization is disabled or `file` fails the eligibility
    /// filter.
    pub async fn process_file(&self, file: ParsedFile) -> ParsedFile {
        self.process_file_cancellable(file, None).await
    }

    /// [`Self::process_file`], honoring a batch-level [`CancellationToken`].
    async fn process_file_cancellable(
        &self,
        mut file: ParsedFile,
        cancel: Option<&CancellationToken>,
    ) -> ParsedFile {
        let Some(provider) = self.provider.clone() else {
            return file;
        };
        if !self.is_eligible(&file) {
            self.record_skip();
            return file;
        }

        let context = SummarizeContext {
            file_path: Some(file.path.clone()),
            imports: file.imports.iter().take(10).cloned().collect(),
            num_functions: Some(file.declarations.iter().filter(|d| d.is_summarizable()).count()),
            num_classes: Some(file.declarations.iter().filter(|d| d.kind == "class").count()),
        };

        let source = file.annotated_content.as_deref().unwrap_or(&file.content);
        let content = truncate_content(source, self.config.ai_max_content_chars);

        let result = provider
            .summarize_code_dyn(self.cache.as_ref(), &content, &file.language, Some(&context), None, cancel)
            .await;

        if result.error.is_none() && !result.summary.is_empty() {
            self.record_success(result.tokens_used, result.cost_estimate);
            file.ai_summary = Some(result.summary);
            file.ai_metadata = Some(AiMetadata {
                tokens_used: result.tokens_used,
                cost_estimate: result.cost_estimate,
                model: result.model_used,
                cached: result.cached,
            });
        } else {
            self.record_failure();
        }

        if self.config.ai_summarize_functions {
            self.summarize_functions(provider.as_ref(), &mut file, cancel).await;
        }

        file
    }

    /// Top `ai_max_functions_per_file` declarations by length, longest
    /// first, each summarized independently (spec.md §4.7 "Per-function").
    async fn summarize_functions(
        &self,
        provider: &dyn SummarizerDyn,
        file: &mut ParsedFile,
        cancel: Option<&CancellationToken>,
    ) {
        let lines: Vec<&str> = file.content.lines().collect();
        let language = file.language.clone();

        let mut candidates: Vec<usize> = file
            .declarations
            .iter()
            .enumerate()
            .filter(|(_, d)| d.is_summarizable())
            .map(|(i, _)| i)
            .collect();
        candidates.sort_by_key(|&i| std::cmp::Reverse(file.declarations[i].length()));

        for &i in candidates.iter().take(self.config.ai_max_functions_per_file) {
            if cancel.is_some_and(|t| t.is_cancelled()) {
                break;
            }

            let (start_line, end_line, name, length) = {
                let d = &file.declarations[i];
                (d.start_line, d.end_line, d.name.clone(), d.length())
            };
            if length < self.config.ai_min_function_lines as u32 {
                continue;
            }

            let end = end_line.unwrap_or(start_line + 20);
            let start_idx = start_line.saturating_sub(1) as usize;
            let end_idx = (end as usize).min(lines.len());
            if start_idx >= end_idx {
                continue;
            }
            let function_code = lines[start_idx..end_idx].join("\n");

            let result = provider
                .summarize_function_dyn(self.cache.as_ref(), &function_code, &name, &language, None, cancel)
                .await;

            if result.error.is_none() && !result.summary.is_empty() {
                file.declarations[i].ai_summary = Some(result.summary);
                self.record_success(result.tokens_used, result.cost_estimate);
                self.stats.lock().unwrap().functions_processed += 1;
            } else {
                self.record_failure();
            }
        }
    }

    /// Process every file concurrently, bounded by `ai_max_concurrent`
    /// (default 5), preserving input order in the returned vector (spec.md
    /// §4.7 "Batch concurrency").
    pub async fn process_batch(&self, files: Vec<ParsedFile>) -> Vec<ParsedFile> {
        self.process_batch_cancellable(files, None).await
    }

    /// [`Self::process_batch`], honoring a batch-level [`CancellationToken`]
    /// (SPEC_FULL.md §5): cancellation stops further retry attempts inside
    /// in-flight calls, is observable from a task still waiting on the
    /// semaphore, and never leaves a permit held after a task exits either
    /// way.
    pub async fn process_batch_cancellable(
        &self,
        files: Vec<ParsedFile>,
        cancel: Option<CancellationToken>,
    ) -> Vec<ParsedFile> {
        if !self.enabled() {
            return files;
        }

        let semaphore = Arc::new(Semaphore::new(self.config.ai_max_concurrent.max(1)));
        let tasks = files.into_iter().map(|file| {
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            async move {
                let permit = match &cancel {
                    Some(token) => {
                        tokio::select! {
                            permit = semaphore.acquire() => Some(permit.expect("semaphore is never closed")),
                            _ = token.cancelled() => None,
                        }
                    }
                    None => Some(semaphore.acquire().await.expect("semaphore is never closed")),
                };
                let Some(_permit) = permit else {
                    return file;
                };
                self.process_file_cancellable(file, cancel.as_ref()).await
            }
        });

        futures_util::future::join_all(tasks).await
    }

    /// Sweep expired cache entries. A no-op when summarization never
    /// constructed a cache.
    pub async fn cleanup(&self) {
        if let Some(cache) = &self.cache {
            cache.clear_expired(self.config.provider.cache_ttl).await;
        }
    }

    pub fn get_statistics(&self) -> ProcessorStats {
        self.stats.lock().unwrap().clone()
    }

    fn record_skip(&self) {
        self.stats.lock().unwrap().files_skipped += 1;
    }

    fn record_success(&self, tokens: u32, cost: f64) {
        let mut stats = self.stats.lock().unwrap();
        stats.files_processed += 1;
        stats.total_tokens += tokens as u64;
        stats.total_cost += cost;
    }

    fn record_failure(&self) {
        self.stats.lock().unwrap().files_failed += 1;
    }
}

fn build_glob_set(patterns: &[String]) -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        if let Ok(glob) = Glob::new(pattern) {
            builder.add(glob);
        } else {
            warn!("ignoring invalid ai_exclude_patterns glob: {pattern}");
        }
    }
    builder.build().unwrap_or_else(|_| GlobSetBuilder::new().build().expect("empty builder always succeeds"))
}

/// Truncate `content` to at most `max_chars` characters, appending a
/// literal marker when truncation actually happened (spec.md §4.7).
fn truncate_content(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        return content.to_string();
    }
    let truncated: String = content.chars().take(max_chars).collect();
    format!("{truncated}{TRUNCATION_MARKER}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str, language: &str, lines: usize) -> ParsedFile {
        ParsedFile {
            path: path.to_string(),
            language: language.to_string(),
            content: "x\n".repeat(lines),
            annotated_content: None,
            declarations: Vec::new(),
            imports: Vec::new(),
            ai_summary: None,
            ai_metadata: None,
        }
    }

    #[test]
    fn truncate_content_appends_marker_only_when_needed() {
        assert_eq!(truncate_content("short", 100), "short");
        let truncated = truncate_content(&"a".repeat(10), 4);
        assert_eq!(truncated, format!("aaaa{TRUNCATION_MARKER}"));
    }

    #[test]
    fn disabled_config_never_constructs_a_provider() {
        let processor = SummarizationProcessor::new(SummaryConfig::disabled());
        assert!(!processor.enabled());
    }

    #[test]
    fn provider_construction_error_degrades_gracefully() {
        // Llama.cpp requires `api_base` to be a GGUF path; leaving it unset
        // makes construction fail, which must disable rather than panic.
        let mut config = SummaryConfig::disabled();
        config.enable_ai_summary = true;
        config.provider = ProviderConfig::new(ProviderKind::Llamacpp);
        let processor = SummarizationProcessor::new(config);
        assert!(!processor.enabled());
    }

    #[tokio::test]
    async fn disabled_processor_passes_files_through_unchanged() {
        let processor = SummarizationProcessor::new(SummaryConfig::disabled());
        let files = vec![file("a.rs", "rust", 100), file("b.rs", "rust", 100)];
        let out = processor.process_batch(files.clone()).await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].path, "a.rs");
        assert_eq!(out[1].path, "b.rs");
        assert!(out[0].ai_summary.is_none());
    }

    #[tokio::test]
    async fn disabled_processor_preserves_order_across_many_files() {
        let processor = SummarizationProcessor::new(SummaryConfig::disabled());
        let files: Vec<_> = (0..20).map(|i| file(&format!("f{i}.rs"), "rust", 50)).collect();
        let out = processor.process_batch(files).await;
        for (i, f) in out.iter().enumerate() {
            assert_eq!(f.path, format!("f{i}.rs"));
        }
    }

    fn eligibility_processor(config_mutator: impl FnOnce(&mut SummaryConfig)) -> SummarizationProcessor {
        let mut config = SummaryConfig::disabled();
        config_mutator(&mut config);
        SummarizationProcessor::new(config)
    }

    #[test]
    fn already_summarized_file_is_ineligible() {
        let processor = eligibility_processor(|_| {});
        let mut f = file("a.rs", "rust", 100);
        f.ai_summary = Some("already done".to_string());
        assert!(!processor.is_eligible(&f));
    }

    #[test]
    fn short_file_is_ineligible() {
        let processor = eligibility_processor(|c| c.ai_min_file_lines = 20);
        let f = file("a.rs", "rust", 5);
        assert!(!processor.is_eligible(&f));
    }

    #[test]
    fn excluded_language_is_ineligible() {
        let processor = eligibility_processor(|c| c.ai_exclude_languages = vec!["json".to_string()]);
        let f = file("a.json", "json", 100);
        assert!(!processor.is_eligible(&f));
    }

    #[test]
    fn include_allowlist_filters_out_other_languages() {
        let processor = eligibility_processor(|c| c.ai_include_languages = vec!["rust".to_string()]);
        assert!(processor.is_eligible(&file("a.rs", "rust", 100)));
        assert!(!processor.is_eligible(&file("a.py", "python", 100)));
    }

    #[test]
    fn exclude_pattern_matches_path_glob() {
        let processor = eligibility_processor(|c| c.ai_exclude_patterns = vec!["**/vendor/**".to_string()]);
        assert!(!processor.is_eligible(&file("vendor/lib.rs", "rust", 100)));
        assert!(processor.is_eligible(&file("src/lib.rs", "rust", 100)));
    }

    #[test]
    fn declaration_length_falls_back_to_twenty_lines_without_end_line() {
        let d = Declaration {
            kind: "function".to_string(),
            name: "f".to_string(),
            start_line: 10,
            end_line: None,
            ai_summary: None,
        };
        assert_eq!(d.length(), 20);
    }

    #[tokio::test]
    async fn pre_cancelled_token_still_preserves_order_on_a_disabled_processor() {
        // Cancellation only has a provider to observe once summarization is
        // enabled; on a disabled processor, process_batch_cancellable is
        // still a pure passthrough.
        let processor = SummarizationProcessor::new(SummaryConfig::disabled());
        let token = CancellationToken::new();
        token.cancel();
        let files = vec![file("a.rs", "rust", 100), file("b.rs", "rust", 100)];
        let out = processor.process_batch_cancellable(files, Some(token)).await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].path, "a.rs");
    }
}
