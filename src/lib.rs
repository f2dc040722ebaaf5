//! Weathervane: an HTTP service that answers "what is the latest weather
//! reading" by driving a language-model agent over a MongoDB MCP tool
//! server.
//!
//! The crate provides:
//! - A language model abstraction (`LanguageModel`) with a Groq client.
//! - An MCP client (`McpClient`) over stdio or HTTP transports.
//! - A tool-calling agent (`WeatherAgent`) and its once-only session
//!   manager (`AgentSession`).
//! - The payload normalizer turning unpredictable agent output into the
//!   canonical weather payload.
//! - An axum HTTP layer exposing `/` and `/weather/latest`.

mod agent;
mod config;
mod error;
mod llm;
mod mcp;
mod message;
mod payload;
mod prompt;
mod server;
mod service;
mod session;
mod tool;

pub use agent::{AgentHandle, WeatherAgent};
pub use config::{AgentConfig, AppConfig, DatabaseConfig, McpConfig, ModelConfig, ServerConfig};
pub use error::{Result, WeatherError};
pub use llm::{GroqClient, LanguageModel, ModelCompletion, StubModel};
pub use mcp::{
    CallToolResult, ContentItem, McpClient, McpToolDefinition, McpTransport, ServerSpec,
};
pub use message::{Message, Role, ToolCall, ToolResult};
pub use payload::{normalize, RawAgentResult, WeatherPayload, SOURCE_TAG};
pub use prompt::build_tool_prompt;
pub use server::{router, serve};
pub use service::WeatherService;
pub use session::AgentSession;
pub use tool::{Tool, ToolDescription, ToolRegistry};
