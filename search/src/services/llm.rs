use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::errors::SearchError;

/// The chat-provider seam shared by the intent extractor and the planner.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn complete(&self, system_prompt: &str, user_prompt: &str)
        -> Result<String, SearchError>;
}

#[derive(Debug, Clone)]
pub struct ChatClientConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl Default for ChatClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            timeout: Duration::from_secs(8),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

/// OpenAI-compatible chat completions client.
pub struct HttpChatClient {
    http_client: reqwest::Client,
    config: ChatClientConfig,
}

impl HttpChatClient {
    pub fn new(config: ChatClientConfig) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Self { http_client, config }
    }
}

#[async_trait]
impl ChatClient for HttpChatClient {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, SearchError> {
        let url = format!("{}/v1/chat/completions", self.config.base_url);
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage { role: "system", content: system_prompt },
                ChatMessage { role: "user", content: user_prompt },
            ],
            temperature: 0.0,
        };

        debug!("chat completion via {} ({})", url, self.config.model);

        let mut builder = self.http_client.post(&url).json(&request);
        if let Some(api_key) = &self.config.api_key {
            builder = builder.bearer_auth(api_key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| SearchError::ChatUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SearchError::ChatUnavailable(format!(
                "chat provider returned {}",
                response.status()
            )));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| SearchError::ChatUnavailable(format!("bad chat response: {e}")))?;

        body.choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| SearchError::ChatUnavailable("empty chat response".to_string()))
    }
}

/// Parse state of an LLM JSON reply. The single repair attempt is part of
/// the state, never a control-flow device further up the stack.
#[derive(Debug)]
pub enum LlmJson {
    Parsed(Value),
    /// Parsed only after the trailing-comma repair.
    Repaired(Value),
    Invalid { error: String },
}

impl LlmJson {
    pub fn into_value(self) -> Result<Value, String> {
        match self {
            LlmJson::Parsed(value) | LlmJson::Repaired(value) => Ok(value),
            LlmJson::Invalid { error } => Err(error),
        }
    }
}

/// Parse a chat reply as JSON: strip any code fence, try as-is, then make
/// one repair pass removing trailing commas before closing braces/brackets.
pub fn parse_llm_json(raw: &str) -> LlmJson {
    let stripped = strip_code_fence(raw);
    match serde_json::from_str::<Value>(stripped) {
        Ok(value) => LlmJson::Parsed(value),
        Err(first_error) => {
            let repaired = remove_trailing_commas(stripped);
            match serde_json::from_str::<Value>(&repaired) {
                Ok(value) => LlmJson::Repaired(value),
                Err(_) => LlmJson::Invalid { error: first_error.to_string() },
            }
        }
    }
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") up to the first newline.
    let rest = match rest.find('\n') {
        Some(index) => &rest[index + 1..],
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Remove `,` when the next non-whitespace character closes an object or
/// array. String contents are left alone.
fn remove_trailing_commas(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut output = String::with_capacity(input.len());
    let mut in_string = false;
    let mut escaped = false;

    for (index, &c) in chars.iter().enumerate() {
        if in_string {
            output.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                output.push(c);
            }
            ',' => {
                let next = chars[index + 1..].iter().find(|c| !c.is_whitespace());
                if !matches!(next, Some('}') | Some(']')) {
                    output.push(c);
                }
            }
            _ => output.push(c),
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn clean_json_parses_directly() {
        let parsed = parse_llm_json(r#"{"a": 1}"#);
        assert!(matches!(parsed, LlmJson::Parsed(_)));
    }

    #[test]
    fn fenced_json_is_unwrapped() {
        let parsed = parse_llm_json("```json\n{\"a\": 1}\n```");
        assert_eq!(parsed.into_value().unwrap(), json!({"a": 1}));
    }

    #[test]
    fn trailing_commas_are_repaired_once() {
        let parsed = parse_llm_json(r#"{"a": [1, 2,], "b": {"c": 3,},}"#);
        match parsed {
            LlmJson::Repaired(value) => {
                assert_eq!(value, json!({"a": [1, 2], "b": {"c": 3}}));
            }
            other => panic!("expected repaired parse, got {other:?}"),
        }
    }

    #[test]
    fn commas_inside_strings_survive_repair() {
        let parsed = parse_llm_json(r#"{"a": "one, two,",}"#);
        assert_eq!(parsed.into_value().unwrap(), json!({"a": "one, two,"}));
    }

    #[test]
    fn unrepairable_input_is_invalid() {
        let parsed = parse_llm_json("definitely not json");
        assert!(matches!(parsed, LlmJson::Invalid { .. }));
    }

    #[tokio::test]
    async fn chat_client_extracts_message_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "{\"ok\":true}"}}]
            })))
            .mount(&server)
            .await;

        let client = HttpChatClient::new(ChatClientConfig {
            base_url: server.uri(),
            ..ChatClientConfig::default()
        });
        let content = client.complete("system", "user").await.unwrap();
        assert_eq!(content, "{\"ok\":true}");
    }

    #[tokio::test]
    async fn chat_client_maps_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = HttpChatClient::new(ChatClientConfig {
            base_url: server.uri(),
            ..ChatClientConfig::default()
        });
        let error = client.complete("system", "user").await.unwrap_err();
        assert!(matches!(error, SearchError::ChatUnavailable(_)));
    }
}
