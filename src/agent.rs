//! The tool-calling agent that alternates between the language model and
//! the MCP tool server.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{Mutex, RwLock};

use crate::error::{Result, WeatherError};
use crate::llm::LanguageModel;
use crate::mcp::{McpClient, McpToolProxy};
use crate::message::{Message, Role};
use crate::payload::RawAgentResult;
use crate::tool::ToolRegistry;

/// The handle the session manager owns: idempotent setup plus one-shot runs.
#[async_trait]
pub trait AgentHandle: Send + Sync {
    async fn initialize(&self) -> Result<()>;
    async fn run(&self, prompt: &str) -> Result<RawAgentResult>;
}

pub struct WeatherAgent<M: LanguageModel> {
    model: Arc<M>,
    client: Arc<Mutex<McpClient>>,
    tools: RwLock<ToolRegistry>,
    instructions: String,
    disallowed_tools: Vec<String>,
    max_steps: usize,
}

impl<M: LanguageModel> WeatherAgent<M> {
    pub fn new(model: Arc<M>, client: Arc<Mutex<McpClient>>) -> Self {
        Self {
            model,
            client,
            tools: RwLock::new(ToolRegistry::new()),
            instructions: "You are a helpful weather agent.".to_string(),
            disallowed_tools: Vec::new(),
            max_steps: 3,
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn with_disallowed_tools(mut self, disallowed: Vec<String>) -> Self {
        self.disallowed_tools = disallowed;
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    pub async fn tool_names(&self) -> Vec<String> {
        self.tools.read().await.names()
    }
}

#[async_trait]
impl<M: LanguageModel> AgentHandle for WeatherAgent<M> {
    /// Connects to the MCP server and registers its tools, minus any
    /// disallowed ones. Safe to call again after a failed attempt.
    async fn initialize(&self) -> Result<()> {
        let definitions = {
            let mut client = self.client.lock().await;
            client.initialize().await?;
            client.list_tools().await?
        };

        let mut registry = ToolRegistry::new();
        let mut skipped = 0usize;
        for definition in definitions {
            if self.disallowed_tools.contains(&definition.name) {
                skipped += 1;
                continue;
            }
            registry.register(McpToolProxy::new(Arc::clone(&self.client), definition));
        }
        tracing::info!(tools = registry.len(), skipped, "weather agent initialized");

        *self.tools.write().await = registry;
        Ok(())
    }

    async fn run(&self, prompt: &str) -> Result<RawAgentResult> {
        let descriptions = self.tools.read().await.describe();
        let mut messages = vec![
            Message::system(&self.instructions),
            Message::user(prompt),
        ];
        // Tool outputs kept as a fallback when the model never produces a
        // final reply within the step budget.
        let mut fragments: Vec<Value> = Vec::new();
        let mut empty_reply = false;

        for _ in 0..self.max_steps {
            let completion = self.model.complete(&messages, &descriptions).await?;

            if completion.tool_calls.is_empty() {
                match completion.content {
                    Some(content) if !content.trim().is_empty() => {
                        return Ok(RawAgentResult::Text(content));
                    }
                    _ => {
                        empty_reply = true;
                        break;
                    }
                }
            }

            let assistant_content = completion.content.unwrap_or_default();
            for call in completion.tool_calls {
                messages.push(Message {
                    role: Role::Assistant,
                    content: assistant_content.clone(),
                    tool_call: Some(call.clone()),
                    tool_result: None,
                });
                let output = {
                    let registry = self.tools.read().await;
                    registry.call(&call.name, call.arguments.clone()).await?
                };
                fragments.push(to_fragment(&output));
                messages.push(Message::tool(&call.name, call.id.clone(), output));
            }
        }

        if !fragments.is_empty() {
            return Ok(RawAgentResult::Parts(fragments));
        }
        if empty_reply {
            return Ok(RawAgentResult::Empty);
        }
        Err(WeatherError::Agent(
            "agent reached the step limit without producing a response".into(),
        ))
    }
}

fn to_fragment(output: &Value) -> Value {
    match output {
        Value::String(_) => output.clone(),
        other => json!({ "text": other.to_string() }),
    }
}
