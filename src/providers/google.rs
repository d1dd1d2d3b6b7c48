//! Google Gemini adapter (spec.md §4.1).
//!
//! Gemini concatenates the whole conversation into one prompt string (no
//! native system/user split) and is rate-limited per spec: at most 5
//! in-flight requests and a 500ms minimum gap between requests actually
//! leaving the wire, enforced with an owned semaphore and a last-sent
//! timestamp rather than relying on the backend's own 429 handling.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use tokio::sync::{Mutex, Semaphore};

use crate::providers::{
    ChatMessage, Choice, CompletionRequest, CompletionResponse, Provider, ProviderConfig,
    ProviderKind, Summarizer, Usage,
};

const DEFAULT_BASE: &str = "https://generativelanguage.googleapis.com";
const MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(500);
const MAX_IN_FLIGHT: usize = 5;

/// Adapter for the Gemini `generateContent` API.
pub struct GoogleProvider {
    config: ProviderConfig,
    client: reqwest::Client,
    base_url: String,
    in_flight: Arc<Semaphore>,
    last_sent: Arc<Mutex<Option<Instant>>>,
}

impl GoogleProvider {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let base_url = config
            .api_base
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE.to_string());
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            config,
            client,
            base_url,
            in_flight: Arc::new(Semaphore::new(MAX_IN_FLIGHT)),
            last_sent: Arc::new(Mutex::new(None)),
        })
    }

    /// Gemini has no role-split; fold the conversation into one prompt by
    /// joining each message's content with a blank line, verbatim.
    fn build_prompt(request: &CompletionRequest) -> String {
        request
            .messages
            .iter()
            .map(|msg| msg.content.clone())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    async fn pace(&self) {
        let mut last_sent = self.last_sent.lock().await;
        if let Some(last) = *last_sent {
            let elapsed = last.elapsed();
            if elapsed < MIN_REQUEST_INTERVAL {
                tokio::time::sleep(MIN_REQUEST_INTERVAL - elapsed).await;
            }
        }
        *last_sent = Some(Instant::now());
    }

    fn parse_response(json: serde_json::Value) -> Result<CompletionResponse> {
        let text = json["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .unwrap_or("")
            .to_string();
        let finish_reason = json["candidates"][0]["finishReason"].as_str().map(str::to_string);

        let usage = json.get("usageMetadata").map(|u| Usage {
            prompt_tokens: u.get("promptTokenCount").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
            completion_tokens: u.get("candidatesTokenCount").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
            total_tokens: u.get("totalTokenCount").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
        });

        Ok(CompletionResponse {
            id: String::new(),
            model: String::new(),
            choices: vec![Choice {
                index: 0,
                message: ChatMessage {
                    role: "assistant".to_string(),
                    content: text,
                },
                finish_reason,
            }],
            usage,
            cost_override: None,
        })
    }
}

impl Provider for GoogleProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        let _permit = self
            .in_flight
            .acquire()
            .await
            .expect("semaphore is never closed");
        self.pace().await;

        let prompt = Self::build_prompt(request);
        let body = serde_json::json!({
            "contents": [{"parts": [{"text": prompt}]}],
            "generationConfig": {
                "temperature": request.temperature,
                "maxOutputTokens": request.max_tokens,
            },
        });

        let api_key = self.config.api_key.as_deref().unwrap_or_default();
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, request.model, api_key
        );

        let response = self.client.post(&url).json(&body).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            bail!("Google API error: HTTP {status} - {text}");
        }

        let json: serde_json::Value = response.json().await?;
        let mut result = Self::parse_response(json)?;
        result.model = request.model.clone();
        Ok(result)
    }

    async fn complete_stream(
        &self,
        _request: &CompletionRequest,
    ) -> Result<crate::providers::BoxStream<Result<crate::providers::StreamEvent>>> {
        bail!("Google provider: streaming is not implemented")
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        Ok(vec!["gemini-2.0-flash".to_string(), "gemini-2.0-pro".to_string()])
    }
}

impl Summarizer for GoogleProvider {
    fn provider_kind(&self) -> ProviderKind {
        ProviderKind::Google
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn resolved_model(&self) -> String {
        if self.config.model.is_empty() {
            "gemini-2.0-flash".to_string()
        } else {
            self.config.model.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_folds_roles_into_one_string() {
        let request = CompletionRequest {
            model: "gemini-2.0-flash".to_string(),
            messages: vec![
                ChatMessage::system("be terse"),
                ChatMessage::user("summarize this"),
            ],
            max_tokens: Some(100),
            temperature: Some(0.3),
            stream: false,
        };
        let prompt = GoogleProvider::build_prompt(&request);
        assert_eq!(prompt, "be terse\n\nsummarize this");
    }

    #[test]
    fn resolved_model_defaults_to_flash() {
        let cfg = ProviderConfig::new(ProviderKind::Google);
        let p = GoogleProvider::new(cfg).unwrap();
        assert_eq!(p.resolved_model(), "gemini-2.0-flash");
    }

    #[test]
    fn parse_response_reads_candidate_text_and_usage() {
        let json = serde_json::json!({
            "candidates": [{
                "content": {"parts": [{"text": "a summary"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 50, "candidatesTokenCount": 10, "totalTokenCount": 60}
        });
        let resp = GoogleProvider::parse_response(json).unwrap();
        assert_eq!(resp.choices[0].message.content, "a summary");
        assert_eq!(resp.usage.unwrap().total_tokens, 60);
    }

    #[tokio::test]
    async fn pacing_enforces_minimum_interval() {
        let cfg = ProviderConfig::new(ProviderKind::Google);
        let p = GoogleProvider::new(cfg).unwrap();
        let start = Instant::now();
        p.pace().await;
        p.pace().await;
        assert!(start.elapsed() >= MIN_REQUEST_INTERVAL);
    }
}
