//! Language model abstraction and the Groq chat-completions client.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::ModelConfig;
use crate::error::{Result, WeatherError};
use crate::message::{Message, Role, ToolCall};
use crate::tool::ToolDescription;

/// Result of one chat completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelCompletion {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

/// Minimal abstraction around a tool-calling chat completion provider.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDescription],
    ) -> Result<ModelCompletion>;
}

fn coalesce_error(status: reqwest::StatusCode, body: &str) -> WeatherError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return WeatherError::LanguageModel(format!("Groq rate limit exceeded: {body}"));
    }
    WeatherError::LanguageModel(format!("Groq request failed with {status}: {body}"))
}

/// Groq client speaking the OpenAI-compatible chat completions API.
#[derive(Clone)]
pub struct GroqClient {
    http: reqwest::Client,
    model: String,
    api_key: String,
    base_url: String,
    temperature: f32,
    max_tokens: Option<u32>,
    max_retries: u32,
}

impl GroqClient {
    pub fn from_config(cfg: &ModelConfig) -> Result<Self> {
        let api_key = cfg.api_key.clone().ok_or_else(|| {
            WeatherError::Config("GROQ_API_KEY must be set for the Groq LLM provider".into())
        })?;
        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .map_err(|err| WeatherError::LanguageModel(format!("http client error: {err}")))?,
            model: cfg.model.clone(),
            api_key,
            base_url: "https://api.groq.com/openai/v1".to_string(),
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
            max_retries: cfg.max_retries,
        })
    }

    fn build_body(&self, messages: &[Message], tools: &[ToolDescription]) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": to_chat_messages(messages),
            "temperature": self.temperature,
        });
        if let Some(max_tokens) = self.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if !tools.is_empty() {
            let chat_tools: Vec<Value> = tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters.clone().unwrap_or_else(|| json!({"type": "object"})),
                        }
                    })
                })
                .collect();
            body["tools"] = json!(chat_tools);
            body["tool_choice"] = json!("auto");
        }
        body
    }
}

#[async_trait]
impl LanguageModel for GroqClient {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDescription],
    ) -> Result<ModelCompletion> {
        let body = self.build_body(messages, tools);

        let mut last_error =
            WeatherError::LanguageModel("Groq request was never attempted".into());
        for attempt in 0..=self.max_retries {
            let response = self
                .http
                .post(format!("{}/chat/completions", self.base_url))
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body)
                .send()
                .await;

            match response {
                Err(err) => {
                    last_error = WeatherError::LanguageModel(format!("Groq request failed: {err}"));
                }
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let parsed: Value = resp.json().await.map_err(|err| {
                            WeatherError::LanguageModel(format!("Groq parse error: {err}"))
                        })?;
                        return Ok(parse_completion(&parsed));
                    }
                    let text = resp.text().await.unwrap_or_default();
                    let err = coalesce_error(status, &text);
                    // Client errors other than throttling are not transient.
                    if status != reqwest::StatusCode::TOO_MANY_REQUESTS
                        && !status.is_server_error()
                    {
                        return Err(err);
                    }
                    last_error = err;
                }
            }
            if attempt < self.max_retries {
                tracing::debug!(attempt = attempt + 1, "retrying Groq request");
            }
        }
        Err(last_error)
    }
}

fn to_chat_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|message| {
            let role = match message.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            };
            let mut built = json!({
                "role": role,
                "content": message.content,
            });
            if let Some(call) = &message.tool_call {
                built["tool_calls"] = json!([{
                    "id": call.id.clone().unwrap_or_else(|| format!("call_{}", call.name)),
                    "type": "function",
                    "function": {
                        "name": call.name,
                        "arguments": call.arguments.to_string(),
                    }
                }]);
            }
            if let Some(result) = &message.tool_result {
                built["content"] = Value::String(result.output.to_string());
                if let Some(id) = &result.tool_call_id {
                    built["tool_call_id"] = json!(id);
                }
            }
            built
        })
        .collect()
}

fn parse_completion(response: &Value) -> ModelCompletion {
    let choice = &response["choices"][0]["message"];
    let content = choice["content"].as_str().map(String::from);

    let mut tool_calls = Vec::new();
    if let Some(calls) = choice["tool_calls"].as_array() {
        for call in calls {
            let name = call["function"]["name"].as_str().unwrap_or("").to_string();
            let args_str = call["function"]["arguments"].as_str().unwrap_or("{}");
            let arguments: Value = serde_json::from_str(args_str).unwrap_or_else(|_| json!({}));
            tool_calls.push(ToolCall {
                id: call["id"].as_str().map(String::from),
                name,
                arguments,
            });
        }
    }

    ModelCompletion {
        content,
        tool_calls,
    }
}

/// A deterministic model used for tests.
///
/// Scripted responses are either `{"action":"call_tool",...}` directives or
/// plain text returned verbatim as the assistant reply.
pub struct StubModel {
    responses: Mutex<VecDeque<String>>,
}

impl StubModel {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum StubDirective {
    Respond { content: String },
    CallTool { name: String, arguments: Value },
}

#[async_trait]
impl LanguageModel for StubModel {
    async fn complete(
        &self,
        _messages: &[Message],
        _tools: &[ToolDescription],
    ) -> Result<ModelCompletion> {
        let mut locked = self.responses.lock().expect("stub model poisoned");
        let raw = locked.pop_front().ok_or_else(|| {
            WeatherError::LanguageModel("StubModel ran out of scripted responses".into())
        })?;

        match serde_json::from_str::<StubDirective>(&raw) {
            Ok(StubDirective::Respond { content }) => Ok(ModelCompletion {
                content: Some(content),
                tool_calls: Vec::new(),
            }),
            Ok(StubDirective::CallTool { name, arguments }) => Ok(ModelCompletion {
                content: None,
                tool_calls: vec![ToolCall {
                    id: None,
                    name,
                    arguments,
                }],
            }),
            Err(_) => Ok(ModelCompletion {
                content: Some(raw),
                tool_calls: Vec::new(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_results_are_serialized_for_the_wire() {
        let messages = vec![
            Message::user("hi"),
            Message::tool(
                "find",
                Some("call_1".into()),
                json!({"temperature": 21}),
            ),
        ];
        let built = to_chat_messages(&messages);

        assert_eq!(built[0]["role"], "user");
        assert_eq!(built[1]["role"], "tool");
        assert_eq!(built[1]["tool_call_id"], "call_1");
        assert_eq!(built[1]["content"], "{\"temperature\":21}");
    }

    #[test]
    fn parses_tool_call_completion() {
        let response = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_9",
                        "type": "function",
                        "function": {"name": "find", "arguments": "{\"limit\":1}"}
                    }]
                }
            }]
        });

        let completion = parse_completion(&response);
        assert_eq!(completion.content, None);
        assert_eq!(completion.tool_calls.len(), 1);
        assert_eq!(completion.tool_calls[0].name, "find");
        assert_eq!(completion.tool_calls[0].arguments, json!({"limit": 1}));
    }

    #[tokio::test]
    async fn stub_model_replays_scripted_directives() {
        let model = StubModel::new(vec![
            r#"{"action":"call_tool","name":"find","arguments":{"limit":1}}"#.into(),
            r#"{"action":"respond","content":"done"}"#.into(),
        ]);

        let first = model.complete(&[], &[]).await.unwrap();
        assert_eq!(first.tool_calls[0].name, "find");

        let second = model.complete(&[], &[]).await.unwrap();
        assert_eq!(second.content.as_deref(), Some("done"));
    }
}
