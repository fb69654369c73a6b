//! LLM Client: the single point of entry for all judge calls.
//!
//! ARCHITECTURAL RULE: No other module may call the provider API directly.
//! All LLM interactions MUST go through this module.
//!
//! Speaks the OpenAI Responses API. One HTTP attempt per call; retry and
//! backoff live in the batch orchestrator.

use std::fmt;
use std::time::Duration;

use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_API_URL: &str = "https://api.openai.com/v1/responses";
pub const DEFAULT_MODEL: &str = "gpt-4.1-mini";

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Unreadable provider response: {0}")]
    Envelope(serde_json::Error),

    #[error("JSON parse error: {0}")]
    Parse(serde_json::Error),

    #[error("LLM returned empty content")]
    EmptyContent,

    #[error("API key is empty")]
    InvalidCredential,
}

impl LlmError {
    /// Rate limits, provider 5xx, timeouts and connection failures.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Http(e) => e.is_timeout() || e.is_connect(),
            LlmError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Provider API key. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Treats a blank key as no key at all, like the evaluation form does.
    pub fn from_optional(key: Option<String>) -> Option<Self> {
        key.map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .map(Self)
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

#[derive(Debug, Serialize)]
struct ResponsesRequest<'a> {
    model: &'a str,
    instructions: &'a str,
    input: &'a str,
    text: TextOptions,
}

#[derive(Debug, Serialize)]
struct TextOptions {
    format: TextFormat,
}

#[derive(Debug, Serialize)]
struct TextFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct LlmResponse {
    #[serde(default)]
    pub output: Vec<OutputItem>,
    #[serde(default)]
    pub output_text: Option<String>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
pub struct OutputItem {
    #[serde(rename = "type")]
    pub item_type: String,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl LlmResponse {
    /// Text of the first `output_text` block of the first message, falling
    /// back to the aggregated `output_text` field.
    pub fn text(&self) -> Option<&str> {
        self.output
            .iter()
            .filter(|item| item.item_type == "message")
            .flat_map(|item| item.content.iter())
            .find(|block| block.block_type == "output_text")
            .and_then(|block| block.text.as_deref())
            .filter(|text| !text.trim().is_empty())
            .or_else(|| {
                self.output_text
                    .as_deref()
                    .filter(|text| !text.trim().is_empty())
            })
    }
}

#[derive(Debug, Deserialize)]
struct ProviderError {
    error: ProviderErrorBody,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorBody {
    message: String,
}

/// The single LLM client used by the judge.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    api_url: String,
    model: String,
}

impl LlmClient {
    pub fn new(
        api_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            api_url: api_url.into(),
            model: model.into(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Makes one call to the provider, returning the full response object.
    pub async fn call(
        &self,
        prompt: &str,
        system: &str,
        credential: &Credential,
    ) -> Result<LlmResponse, LlmError> {
        if credential.is_blank() {
            return Err(LlmError::InvalidCredential);
        }

        let request_body = ResponsesRequest {
            model: &self.model,
            instructions: system,
            input: prompt,
            text: TextOptions {
                format: TextFormat {
                    format_type: "json_object",
                },
            },
        };

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(credential.expose())
            .json(&request_body)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<ProviderError>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            if status.as_u16() == 429 || status.is_server_error() {
                warn!("LLM API returned {}: {}", status, message);
            }
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let llm_response: LlmResponse =
            serde_json::from_str(&body).map_err(LlmError::Envelope)?;

        if let Some(usage) = &llm_response.usage {
            debug!(
                "LLM call succeeded: model={}, input_tokens={}, output_tokens={}",
                self.model, usage.input_tokens, usage.output_tokens
            );
        }

        Ok(llm_response)
    }

    /// Calls the LLM and deserializes the text response as JSON.
    /// The prompt must instruct the model to return valid JSON.
    pub async fn call_json<T: DeserializeOwned>(
        &self,
        prompt: &str,
        system: &str,
        credential: &Credential,
    ) -> Result<T, LlmError> {
        let response = self.call(prompt, system, credential).await?;

        let text = response.text().ok_or(LlmError::EmptyContent)?;

        // Strip markdown code fences if the model wraps JSON in them
        let text = strip_json_fences(text);

        serde_json::from_str(text).map_err(LlmError::Parse)
    }
}

/// Strips ```json ... ``` or ``` ... ``` code fences from LLM output.
pub(crate) fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    if let Some(stripped) = text.strip_prefix("```json") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else if let Some(stripped) = text.strip_prefix("```") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(server: &MockServer) -> LlmClient {
        LlmClient::new(
            format!("{}/v1/responses", server.uri()),
            "test-model",
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn envelope(text: &str) -> serde_json::Value {
        json!({
            "output": [{
                "type": "message",
                "content": [{"type": "output_text", "text": text}]
            }],
            "usage": {"input_tokens": 12, "output_tokens": 34}
        })
    }

    #[test]
    fn test_strip_json_fences_with_json_tag() {
        let input = "```json\n{\"key\": \"value\"}\n```";
        assert_eq!(strip_json_fences(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn test_strip_json_fences_without_tag() {
        let input = "```\n{\"key\": \"value\"}\n```";
        assert_eq!(strip_json_fences(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn test_strip_json_fences_no_fences() {
        let input = "{\"key\": \"value\"}";
        assert_eq!(strip_json_fences(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn test_response_text_prefers_message_block() {
        let response: LlmResponse = serde_json::from_value(json!({
            "output": [
                {"type": "reasoning", "content": []},
                {"type": "message", "content": [{"type": "output_text", "text": "{}"}]}
            ],
            "output_text": "fallback"
        }))
        .unwrap();
        assert_eq!(response.text(), Some("{}"));
    }

    #[test]
    fn test_response_text_falls_back_to_output_text() {
        let response: LlmResponse =
            serde_json::from_value(json!({"output_text": "{\"notes\": []}"})).unwrap();
        assert_eq!(response.text(), Some("{\"notes\": []}"));
    }

    #[test]
    fn test_blank_message_block_falls_back_to_output_text() {
        let response: LlmResponse = serde_json::from_value(json!({
            "output": [
                {"type": "message", "content": [{"type": "output_text", "text": "  \n"}]}
            ],
            "output_text": "{\"scores\": []}"
        }))
        .unwrap();
        assert_eq!(response.text(), Some("{\"scores\": []}"));
    }

    #[test]
    fn test_response_without_text_is_none() {
        let response: LlmResponse = serde_json::from_value(json!({"output": []})).unwrap();
        assert!(response.text().is_none());
    }

    #[test]
    fn test_credential_debug_is_redacted() {
        let credential = Credential::new("sk-secret");
        assert_eq!(format!("{credential:?}"), "Credential(***)");
    }

    #[test]
    fn test_blank_credential_is_absent() {
        assert!(Credential::from_optional(Some("   ".to_string())).is_none());
        assert!(Credential::from_optional(None).is_none());
        assert_eq!(
            Credential::from_optional(Some(" sk-1 ".to_string())).unwrap(),
            Credential::new("sk-1")
        );
    }

    #[test]
    fn test_transient_classification() {
        let rate_limited = LlmError::Api {
            status: 429,
            message: String::new(),
        };
        let unavailable = LlmError::Api {
            status: 503,
            message: String::new(),
        };
        let bad_request = LlmError::Api {
            status: 400,
            message: String::new(),
        };
        assert!(rate_limited.is_transient());
        assert!(unavailable.is_transient());
        assert!(!bad_request.is_transient());
        assert!(!LlmError::EmptyContent.is_transient());
    }

    #[tokio::test]
    async fn test_call_json_sends_model_and_bearer_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/responses"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "test-model",
                "text": {"format": {"type": "json_object"}}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(envelope(
                "```json\n{\"notes\": [\"ok\"]}\n```",
            )))
            .expect(1)
            .mount(&server)
            .await;

        let value: serde_json::Value = test_client(&server)
            .call_json("prompt", "system", &Credential::new("sk-test"))
            .await
            .unwrap();
        assert_eq!(value["notes"][0], "ok");
    }

    #[tokio::test]
    async fn test_rate_limit_surfaces_as_transient_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error": {"message": "Rate limit reached"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let err = test_client(&server)
            .call("prompt", "system", &Credential::new("sk-test"))
            .await
            .unwrap_err();
        match &err {
            LlmError::Api { status, message } => {
                assert_eq!(*status, 429);
                assert_eq!(message, "Rate limit reached");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_non_json_reply_is_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(envelope("not-json")))
            .mount(&server)
            .await;

        let err = test_client(&server)
            .call_json::<serde_json::Value>("prompt", "system", &Credential::new("sk-test"))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Parse(_)));
    }

    #[tokio::test]
    async fn test_blank_credential_never_reaches_network() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = test_client(&server)
            .call("prompt", "system", &Credential::new(" "))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::InvalidCredential));
    }
}
