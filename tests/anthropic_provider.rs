//! End-to-end test against a mocked Anthropic endpoint, exercising the
//! retry-on-500 path (spec.md §8 scenario S2).

use std::time::Duration;

use codeconcat_ai_summary::providers::anthropic::AnthropicProvider;
use codeconcat_ai_summary::providers::{ProviderConfig, ProviderKind, Summarizer};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn retries_twice_then_succeeds() {
    let server = MockServer::start().await;

    // First two attempts: 500. Third: success. wiremock serves mounted
    // mocks in priority order, so two single-use 500 mocks stack ahead of
    // the always-on success mock.
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": [{"type": "text", "text": "OK"}],
            "usage": {"input_tokens": 10, "output_tokens": 2},
        })))
        .mount(&server)
        .await;

    let mut config = ProviderConfig::new(ProviderKind::Anthropic);
    config.api_key = Some("sk-ant-test".to_string());
    config.api_base = Some(server.uri());
    config.max_retries = 3;
    config.retry_delay = Duration::from_millis(10);

    let provider = AnthropicProvider::new(config).unwrap();
    let result = provider
        .summarize_code(None, "puts 'hi'", "ruby", None, None, None)
        .await;

    assert_eq!(result.summary, "OK");
    assert_eq!(result.metadata.input_tokens, 10);
    assert_eq!(result.metadata.output_tokens, 2);
    assert!(result.error.is_none());
}

#[tokio::test]
async fn exhausting_retries_surfaces_a_result_level_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let mut config = ProviderConfig::new(ProviderKind::Anthropic);
    config.api_base = Some(server.uri());
    config.max_retries = 2;
    config.retry_delay = Duration::from_millis(1);

    let provider = AnthropicProvider::new(config).unwrap();
    let result = provider
        .summarize_code(None, "puts 'hi'", "ruby", None, None, None)
        .await;

    assert!(result.summary.is_empty());
    assert!(result.error.is_some());
}
