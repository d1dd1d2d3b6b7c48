//! Batch-orchestration integration tests: order preservation, concurrency
//! bound, and the eligibility filter (spec.md §8 properties 5/6, scenario S6).

use codeconcat_ai_summary::processor::{Declaration, ParsedFile, SummaryConfig};
use codeconcat_ai_summary::providers::{ProviderConfig, ProviderKind};
use codeconcat_ai_summary::SummarizationProcessor;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn file(path: &str, language: &str, lines: usize) -> ParsedFile {
    let content = (0..lines).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
    ParsedFile {
        path: path.to_string(),
        language: language.to_string(),
        content,
        annotated_content: None,
        declarations: Vec::<Declaration>::new(),
        imports: Vec::new(),
        ai_summary: None,
        ai_metadata: None,
    }
}

#[tokio::test]
async fn batch_preserves_input_order_across_concurrent_calls() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "summary"},
                "finish_reason": "stop",
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 2, "total_tokens": 12},
        })))
        .mount(&server)
        .await;

    let mut provider_config = ProviderConfig::new(ProviderKind::Openai);
    provider_config.api_key = Some("sk-test".to_string());
    provider_config.api_base = Some(server.uri());

    let mut config = SummaryConfig::disabled();
    config.enable_ai_summary = true;
    config.provider = provider_config;
    config.ai_min_file_lines = 5;
    config.ai_max_concurrent = 3;

    let processor = SummarizationProcessor::new(config);

    let files: Vec<ParsedFile> =
        (0..8).map(|i| file(&format!("f{i}.rs"), "rust", 30)).collect();

    let out = processor.process_batch(files).await;

    assert_eq!(out.len(), 8);
    for (i, f) in out.iter().enumerate() {
        assert_eq!(f.path, format!("f{i}.rs"));
        assert_eq!(f.ai_summary.as_deref(), Some("summary"));
    }
}

#[tokio::test]
async fn eligibility_filter_skips_short_already_summarized_and_excluded_languages() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "summary"},
                "finish_reason": "stop",
            }],
            "usage": {"prompt_tokens": 1, "completion_tokens": 1, "total_tokens": 2},
        })))
        .mount(&server)
        .await;

    let mut provider_config = ProviderConfig::new(ProviderKind::Openai);
    provider_config.api_base = Some(server.uri());

    let mut config = SummaryConfig::disabled();
    config.enable_ai_summary = true;
    config.provider = provider_config;
    config.ai_exclude_languages = vec!["markdown".to_string()];

    let processor = SummarizationProcessor::new(config);

    let f1 = file("f1.py", "python", 100);
    let f2 = file("f2.py", "python", 5);
    let f3 = file("f3.md", "markdown", 200);
    let mut f4 = file("f4.py", "python", 40);
    f4.ai_summary = Some("already summarized".to_string());

    let out = processor.process_batch(vec![f1, f2, f3, f4]).await;

    assert_eq!(out[0].ai_summary.as_deref(), Some("summary"));
    assert_eq!(out[1].ai_summary, None);
    assert_eq!(out[2].ai_summary, None);
    assert_eq!(out[3].ai_summary.as_deref(), Some("already summarized"));
}
