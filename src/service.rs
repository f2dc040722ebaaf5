//! The facade composing prompt building, the agent session and the payload
//! normalizer into "fetch latest weather".

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::agent::{AgentHandle, WeatherAgent};
use crate::config::AppConfig;
use crate::error::Result;
use crate::llm::GroqClient;
use crate::mcp::McpClient;
use crate::payload::{normalize, WeatherPayload};
use crate::prompt::build_tool_prompt;
use crate::session::AgentSession;

pub struct WeatherService<A: AgentHandle> {
    settings: AppConfig,
    session: AgentSession<A>,
}

impl WeatherService<WeatherAgent<GroqClient>> {
    /// Wires the production stack: Groq model, MCP server connection, agent
    /// and session. Fails fast when the Groq API key is missing.
    pub fn from_config(settings: AppConfig) -> Result<Self> {
        let model = Arc::new(GroqClient::from_config(&settings.model)?);
        let transport = settings.mcp.server_spec(&settings.database).connect()?;
        let client = Arc::new(Mutex::new(McpClient::new(transport)));
        let agent = WeatherAgent::new(model, client)
            .with_instructions(settings.agent.instructions.clone())
            .with_disallowed_tools(settings.mcp.disallowed_tools.clone())
            .with_max_steps(settings.agent.max_steps);
        let session = AgentSession::new(agent, settings.agent.query_attempts);
        Ok(Self { settings, session })
    }
}

impl<A: AgentHandle> WeatherService<A> {
    /// Assembles the facade from parts; used by tests with stub agents.
    pub fn with_session(settings: AppConfig, session: AgentSession<A>) -> Self {
        Self { settings, session }
    }

    /// Initializes the agent ahead of incoming requests. The startup hook
    /// may swallow the error; callers on the request path must not.
    pub async fn warm_up(&self) -> Result<()> {
        if let Err(err) = self.session.ensure_initialized().await {
            tracing::error!(error = %err, "failed to warm up the weather agent");
            return Err(err);
        }
        Ok(())
    }

    /// Tool arguments: the configured override, or "most recent single
    /// document by the sort field, descending".
    pub fn tool_arguments(&self) -> Value {
        if let Some(arguments) = &self.settings.mcp.tool_arguments {
            if arguments.as_object().is_some_and(|map| !map.is_empty()) {
                return arguments.clone();
            }
        }
        json!({
            "database": self.settings.database.database,
            "collection": self.settings.database.collection,
            "filter": {},
            "sort": { (self.settings.database.sort_field.as_str()): -1 },
            "limit": 1,
        })
    }

    pub async fn fetch_latest_weather(&self) -> Result<WeatherPayload> {
        let arguments = self.tool_arguments();
        let prompt = build_tool_prompt(&self.settings.mcp.tool_name, &arguments)?;
        let raw = self.session.run_query(&prompt).await?;
        normalize(raw)
    }
}
