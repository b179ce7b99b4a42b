use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::http_client::build_http_client;

const CHAT_TIMEOUT: Duration = Duration::from_secs(120);

/// Seam between the simulation engine and the chat provider. The engine only
/// needs completions; tests substitute a scripted model.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, messages: &[Message]) -> Result<String, ProviderError>;
}

/// OpenAI-compatible chat completion client (OpenAI, vLLM, LM Studio, etc.).
#[derive(Clone)]
pub struct LlmClient {
    api_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: String,
}

impl LlmClient {
    pub fn new(api_url: String, api_key: String, model: String, temperature: f32) -> Self {
        Self {
            api_url,
            api_key,
            model,
            temperature,
            client: build_http_client(CHAT_TIMEOUT),
        }
    }

    /// One chat completion constrained to a JSON object response.
    async fn generate(&self, messages: &[Message]) -> Result<String, ProviderError> {
        let url = format!("{}/chat/completions", self.api_url);

        let request = ChatCompletionRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            max_tokens: Some(500),
            response_format: Some(ResponseFormat {
                format_type: "json_object",
            }),
        };

        let mut req = self.client.post(&url).json(&request);

        // Not needed for local models
        if !self.api_key.is_empty() {
            req = req.header("Authorization", format!("Bearer {}", self.api_key));
        }

        let response = req.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read body".to_string());
            return Err(ProviderError::from_status(status, body));
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(format!("chat completion decode: {}", e)))?;

        completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ProviderError::Malformed("empty choices in completion".to_string()))
    }
}

#[async_trait]
impl ChatModel for LlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, ProviderError> {
        self.generate(messages).await
    }
}

/// Best-effort extraction of the JSON object embedded in a model response:
/// tries the raw text, then a ```json fence, then the outermost brace pair.
/// Models under `response_format` mostly return clean JSON, but local models
/// still wrap it in prose often enough to keep this.
pub fn extract_json_payload(response: &str) -> &str {
    let trimmed = response.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return trimmed;
    }

    if let Some(start) = response.find("```json") {
        let after_start = &response[start + 7..];
        if let Some(end) = after_start.find("```") {
            return after_start[..end].trim();
        }
    }

    if let Some(start) = response.find('{') {
        if let Some(end) = response.rfind('}') {
            if end > start {
                return &response[start..=end];
            }
        }
    }

    trimmed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_bare_json() {
        let raw = r#"{"decision": "YES", "reasoning": "day one"}"#;
        assert_eq!(extract_json_payload(raw), raw);
    }

    #[test]
    fn extracts_from_markdown_fence() {
        let raw = "Sure, here you go:\n```json\n{\"decision\": \"NO\"}\n```\nanything else?";
        assert_eq!(extract_json_payload(raw), "{\"decision\": \"NO\"}");
    }

    #[test]
    fn extracts_outermost_braces_from_prose() {
        let raw = "I think {\"decision\": \"YES\", \"reasoning\": \"fun\"} sums it up";
        assert_eq!(
            extract_json_payload(raw),
            "{\"decision\": \"YES\", \"reasoning\": \"fun\"}"
        );
    }

    #[test]
    fn passes_through_when_no_json_found() {
        assert_eq!(extract_json_payload("  no json here  "), "no json here");
    }
}
