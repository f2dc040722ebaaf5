//! Application configuration: TOML file with environment overrides, or
//! environment-only (the deployment default).
//!
//! The snapshot is read once at service construction and never mutated.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, WeatherError};
use crate::mcp::ServerSpec;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    8000
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    #[serde(default = "default_mongodb_uri")]
    pub uri: String,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_sort_field")]
    pub sort_field: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            uri: default_mongodb_uri(),
            database: default_database(),
            collection: default_collection(),
            sort_field: default_sort_field(),
        }
    }
}

fn default_mongodb_uri() -> String {
    "mongodb://localhost:27017".into()
}

fn default_database() -> String {
    "weather".into()
}

fn default_collection() -> String {
    "measurements".into()
}

fn default_sort_field() -> String {
    "timestamp".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct McpConfig {
    /// Command used to spawn a local MCP server over stdio.
    #[serde(default = "default_mcp_command")]
    pub command: String,
    #[serde(default = "default_mcp_args")]
    pub args: Vec<String>,
    /// When set, connect to a remote MCP server instead of spawning one.
    #[serde(default)]
    pub http_url: Option<String>,
    #[serde(default)]
    pub http_headers: HashMap<String, String>,
    #[serde(default = "default_tool_name")]
    pub tool_name: String,
    /// Explicit tool-argument override; the facade builds defaults when unset.
    #[serde(default)]
    pub tool_arguments: Option<Value>,
    #[serde(default)]
    pub disallowed_tools: Vec<String>,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            command: default_mcp_command(),
            args: default_mcp_args(),
            http_url: None,
            http_headers: HashMap::new(),
            tool_name: default_tool_name(),
            tool_arguments: None,
            disallowed_tools: Vec::new(),
        }
    }
}

fn default_mcp_command() -> String {
    "npx".into()
}

fn default_mcp_args() -> Vec<String> {
    vec!["@mongodb-labs/mongomcp".into(), "serve".into()]
}

fn default_tool_name() -> String {
    "mongodb.collection.findOne".into()
}

impl McpConfig {
    /// Declarative description of the single registered MCP server.
    ///
    /// Stdio servers inherit the database coordinates through their
    /// environment, mirroring what the spawned Mongo MCP server expects.
    pub fn server_spec(&self, database: &DatabaseConfig) -> ServerSpec {
        if let Some(url) = &self.http_url {
            return ServerSpec::Http {
                url: url.clone(),
                headers: self.http_headers.clone(),
            };
        }
        let mut env = HashMap::new();
        env.insert("MONGODB_URI".to_string(), database.uri.clone());
        env.insert("MONGODB_DATABASE".to_string(), database.database.clone());
        env.insert(
            "MONGODB_COLLECTION".to_string(),
            database.collection.clone(),
        );
        env.insert(
            "MONGODB_SORT_FIELD".to_string(),
            database.sort_field.clone(),
        );
        ServerSpec::Stdio {
            command: self.command.clone(),
            args: self.args.clone(),
            env,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: Option<u32>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            max_retries: default_max_retries(),
            api_key: None,
        }
    }
}

fn default_model() -> String {
    "qwen/qwen3-32b".into()
}

fn default_temperature() -> f32 {
    0.6
}

fn default_max_tokens() -> Option<u32> {
    Some(1024)
}

fn default_max_retries() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    #[serde(default = "default_instructions")]
    pub instructions: String,
    /// Whole-query attempt budget; 0 or 1 degrades to no-retry.
    #[serde(default = "default_query_attempts")]
    pub query_attempts: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            instructions: default_instructions(),
            query_attempts: default_query_attempts(),
        }
    }
}

fn default_max_steps() -> usize {
    3
}

fn default_instructions() -> String {
    "Always call the MongoDB MCP tool to gather real data before responding. \
     Return only valid JSON with keys latest, history, count, summary, recommendation. \
     The latest/history entries must mirror the tool output documents."
        .into()
}

fn default_query_attempts() -> u32 {
    2
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub mcp: McpConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub agent: AgentConfig,
}

impl AppConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        toml::from_str(&raw)
            .map_err(|err| WeatherError::Config(format!("failed to parse configuration: {err}")))
    }

    pub fn from_env_or_file(path: impl AsRef<Path>) -> Result<Self> {
        let mut cfg = Self::from_file(path)?;
        cfg.apply_env()?;
        Ok(cfg)
    }

    /// Environment-only configuration, the deployment default.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        cfg.apply_env()?;
        Ok(cfg)
    }

    /// Load from the file named by `WEATHERVANE_CONFIG` when present,
    /// otherwise from the environment alone.
    pub fn load() -> Result<Self> {
        match env::var("WEATHERVANE_CONFIG") {
            Ok(path) => Self::from_env_or_file(path),
            Err(_) => Self::from_env(),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(host) = env::var("WEATHERVANE_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = env::var("WEATHERVANE_PORT") {
            if let Ok(parsed) = port.parse::<u16>() {
                self.server.port = parsed;
            }
        }

        if let Ok(uri) = env::var("MONGODB_URI") {
            self.database.uri = uri;
        }
        if let Ok(database) = env::var("MONGODB_DATABASE") {
            self.database.database = database;
        }
        if let Ok(collection) = env::var("MONGODB_COLLECTION") {
            self.database.collection = collection;
        }
        if let Ok(sort_field) = env::var("MONGODB_SORT_FIELD") {
            self.database.sort_field = sort_field;
        }

        if let Ok(command) = env::var("MCP_COMMAND") {
            self.mcp.command = command;
        }
        if let Ok(args) = env::var("MCP_ARGS") {
            self.mcp.args = args.split_whitespace().map(str::to_string).collect();
        }
        if let Ok(url) = env::var("MCP_HTTP_URL") {
            if !url.trim().is_empty() {
                self.mcp.http_url = Some(url);
            }
        }
        if let Ok(headers) = env::var("MCP_HTTP_HEADERS") {
            self.mcp.http_headers = parse_string_map("MCP_HTTP_HEADERS", &headers)?;
        }
        if let Ok(tool_name) = env::var("MCP_TOOL_NAME") {
            self.mcp.tool_name = tool_name;
        }
        if let Ok(arguments) = env::var("MCP_TOOL_ARGUMENTS") {
            self.mcp.tool_arguments = parse_json_object("MCP_TOOL_ARGUMENTS", &arguments)?;
        }
        if let Ok(disallowed) = env::var("MCP_DISALLOWED_TOOLS") {
            self.mcp.disallowed_tools = disallowed
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Ok(steps) = env::var("MCP_MAX_STEPS") {
            if let Ok(parsed) = steps.parse::<usize>() {
                self.agent.max_steps = parsed;
            }
        }

        if let Ok(model) = env::var("GROQ_MODEL") {
            self.model.model = model;
        }
        if let Ok(temperature) = env::var("GROQ_TEMPERATURE") {
            if let Ok(parsed) = temperature.parse::<f32>() {
                self.model.temperature = parsed;
            }
        }
        if let Ok(max_tokens) = env::var("GROQ_MAX_TOKENS") {
            // An empty value explicitly unsets the limit.
            let trimmed = max_tokens.trim();
            if trimmed.is_empty() {
                self.model.max_tokens = None;
            } else if let Ok(parsed) = trimmed.parse::<u32>() {
                self.model.max_tokens = Some(parsed);
            }
        }
        if let Ok(max_retries) = env::var("GROQ_MAX_RETRIES") {
            if let Ok(parsed) = max_retries.parse::<u32>() {
                self.model.max_retries = parsed;
            }
        }
        if let Ok(api_key) = env::var("GROQ_API_KEY") {
            self.model.api_key = Some(api_key);
        }

        if let Ok(instructions) = env::var("AGENT_INSTRUCTIONS") {
            self.agent.instructions = instructions;
        }
        if let Ok(attempts) = env::var("AGENT_QUERY_ATTEMPTS") {
            if let Ok(parsed) = attempts.parse::<u32>() {
                self.agent.query_attempts = parsed;
            }
        }

        Ok(())
    }
}

fn parse_json_object(name: &str, raw: &str) -> Result<Option<Value>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let value: Value = serde_json::from_str(trimmed)
        .map_err(|err| WeatherError::Config(format!("{name} must be valid JSON: {err}")))?;
    if !value.is_object() {
        return Err(WeatherError::Config(format!(
            "{name} must be a JSON object"
        )));
    }
    Ok(Some(value))
}

fn parse_string_map(name: &str, raw: &str) -> Result<HashMap<String, String>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(HashMap::new());
    }
    let value: Value = serde_json::from_str(trimmed)
        .map_err(|err| WeatherError::Config(format!("{name} must be valid JSON: {err}")))?;
    let map = value
        .as_object()
        .ok_or_else(|| WeatherError::Config(format!("{name} must be a JSON object")))?;
    Ok(map
        .iter()
        .map(|(key, val)| {
            let rendered = match val {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            (key.clone(), rendered)
        })
        .collect())
}
