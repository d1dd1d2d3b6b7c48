//! Stable, language-aware prompt templates (spec.md §4.8).
//!
//! Two templates are built here — whole-file and per-function — and handed
//! back as a `Vec<ChatMessage>` with a `system` message first. Provider
//! adapters decide whether to keep that split (OpenAI-compatible, Anthropic)
//! or concatenate it into a single string (Google, Ollama, llama.cpp).

use crate::providers::{ChatMessage, SummarizeContext};

/// System prompt shared by every `summarize_code` call.
pub const CODE_SUMMARY_SYSTEM_PROMPT: &str = "You are an expert software architect with deep \
knowledge of software design patterns, system architecture, and programming best practices \
across many languages. You write summaries that are clear, technically accurate, and useful \
to another engineer seeing this code for the first time.";

/// System prompt shared by every `summarize_function` call.
pub const FUNCTION_SUMMARY_SYSTEM_PROMPT: &str = "You are an expert software architect with deep \
knowledge of software design patterns, system architecture, and programming best practices \
across many languages. You write single-function summaries that are concise and precise.";

/// Build the CO-STAR-structured whole-file summary prompt (spec.md §4.8).
///
/// Returns `[system, user]`. `max_length` caps the requested response length
/// in the `### Format` section; `None` falls back to "2-3 paragraphs".
pub fn build_code_summary_prompt(
    content: &str,
    language: &str,
    context: Option<&SummarizeContext>,
) -> Vec<ChatMessage> {
    let file_path = context
        .and_then(|c| c.file_path.as_deref())
        .unwrap_or("(unknown path)");
    let structure_summary = context
        .map(|c| {
            format!(
                "{} function(s), {} class(es)/type(s)",
                c.num_functions.unwrap_or(0),
                c.num_classes.unwrap_or(0)
            )
        })
        .unwrap_or_else(|| "structure unknown".to_string());
    let imports = context
        .map(|c| c.imports.iter().take(5).cloned().collect::<Vec<_>>())
        .unwrap_or_default();
    let imports_line = if imports.is_empty() {
        "(none observed)".to_string()
    } else {
        imports.join(", ")
    };

    let user = format!(
        "# Role\n\
You are summarizing one source file for inclusion in a generated codebase \
overview document.\n\n\
# Context\n\
- File: {file_path}\n\
- Language: {language}\n\
- Structure: {structure_summary}\n\
- Top imports: {imports_line}\n\n\
# Objective\n\
Produce a summary an engineer unfamiliar with this file could use to decide \
whether it's relevant to the change they're making.\n\n\
# Task\n\
Address, in order:\n\
1. The file's overall purpose.\n\
2. Its major components (types, functions, classes).\n\
3. Any notable design patterns or architectural choices.\n\
4. Its key dependencies and what it relies on them for.\n\
5. Anything a reader should be warned about (subtlety, risk, TODO).\n\n\
# Style\n\
Precise, technical, no filler. Prefer concrete nouns over vague adjectives.\n\n\
# Format\n\
2-3 paragraphs of prose. No headers, no bullet list, no code in the response.\n\n\
# Code\n\
```{language}\n{content}\n```\n\n\
### Summary"
    );

    vec![
        ChatMessage::system(CODE_SUMMARY_SYSTEM_PROMPT),
        ChatMessage::user(user),
    ]
}

/// Complexity hint derived purely from line count (spec.md §4.8).
fn complexity_hint(line_count: usize) -> &'static str {
    if line_count < 10 {
        "simple"
    } else if line_count < 30 {
        "moderate"
    } else {
        "complex"
    }
}

/// Build the per-function summary prompt. Stricter 1-2 sentence contract.
pub fn build_function_summary_prompt(
    function_code: &str,
    function_name: &str,
    language: &str,
    context: Option<&SummarizeContext>,
) -> Vec<ChatMessage> {
    let line_count = function_code.lines().count();
    let complexity = complexity_hint(line_count);
    let file_path = context
        .and_then(|c| c.file_path.as_deref())
        .unwrap_or("(unknown path)");

    let user = format!(
        "# Role\n\
You are summarizing a single function for inclusion in a generated codebase \
overview document.\n\n\
# Context\n\
- File: {file_path}\n\
- Language: {language}\n\
- Function: {function_name}\n\
- Length: {line_count} lines ({complexity})\n\n\
# Objective\n\
Describe what `{function_name}` does and why it exists, in as few words as \
precision allows.\n\n\
# Task\n\
State the function's purpose and its most important side effect or return \
contract, if any.\n\n\
# Style\n\
Plain, direct, present tense.\n\n\
# Format\n\
Exactly 1-2 sentences. No headers, no bullet points.\n\n\
# Code\n\
```{language}\n{function_code}\n```\n\n\
### Summary"
    );

    vec![
        ChatMessage::system(FUNCTION_SUMMARY_SYSTEM_PROMPT),
        ChatMessage::user(user),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_prompt_includes_language_fence_and_sentinel() {
        let msgs = build_code_summary_prompt("fn main() {}", "rust", None);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].role, "system");
        assert!(msgs[1].content.contains("```rust"));
        assert!(msgs[1].content.contains("### Summary"));
    }

    #[test]
    fn code_prompt_uses_context_when_present() {
        let ctx = SummarizeContext {
            file_path: Some("src/lib.rs".to_string()),
            imports: vec!["std::fmt".to_string(), "serde".to_string()],
            num_functions: Some(3),
            num_classes: Some(1),
        };
        let msgs = build_code_summary_prompt("fn f() {}", "rust", Some(&ctx));
        assert!(msgs[1].content.contains("src/lib.rs"));
        assert!(msgs[1].content.contains("std::fmt, serde"));
        assert!(msgs[1].content.contains("3 function(s), 1 class(es)"));
    }

    #[test]
    fn complexity_hint_thresholds() {
        assert_eq!(complexity_hint(5), "simple");
        assert_eq!(complexity_hint(9), "simple");
        assert_eq!(complexity_hint(10), "moderate");
        assert_eq!(complexity_hint(29), "moderate");
        assert_eq!(complexity_hint(30), "complex");
    }

    #[test]
    fn function_prompt_enforces_short_contract() {
        let msgs = build_function_summary_prompt("fn f() { 1 }", "f", "rust", None);
        assert!(msgs[1].content.contains("Exactly 1-2 sentences"));
        assert!(msgs[1].content.contains("Function: f"));
    }
}
