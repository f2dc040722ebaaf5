//! MCP (Model Context Protocol) client support.
//!
//! The service registers exactly one MCP server, the MongoDB tool server,
//! described declaratively by a [`ServerSpec`]: either a command to spawn
//! over stdio or a remote HTTP endpoint. The client speaks JSON-RPC 2.0.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use crate::error::{Result, WeatherError};
use crate::tool::Tool;

/// JSON-RPC request. Notifications carry no `id`.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    fn call(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(0),
            method: method.into(),
            params,
        }
    }

    fn notification(method: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: None,
            method: method.into(),
            params: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// Tool definition advertised by the MCP server.
#[derive(Debug, Clone, Deserialize)]
pub struct McpToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListToolsResult {
    pub tools: Vec<McpToolDefinition>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ContentItem {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "resource")]
    Resource { resource: Value },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallToolResult {
    pub content: Vec<ContentItem>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ServerCapabilities {
    #[serde(default)]
    pub tools: Option<Value>,
    #[serde(default)]
    pub resources: Option<Value>,
    #[serde(default)]
    pub prompts: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: ServerCapabilities,
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// Declarative description of the registered MCP server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerSpec {
    Stdio {
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
    },
    Http {
        url: String,
        headers: HashMap<String, String>,
    },
}

impl ServerSpec {
    pub fn connect(&self) -> Result<Box<dyn McpTransport>> {
        match self {
            ServerSpec::Stdio { command, args, env } => {
                Ok(Box::new(StdioTransport::spawn(command, args, env.clone())?))
            }
            ServerSpec::Http { url, headers } => {
                Ok(Box::new(HttpTransport::new(url.clone(), headers.clone())?))
            }
        }
    }
}

/// Transport layer for MCP communication.
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Send a JSON-RPC request and wait for the matching response.
    async fn send(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse>;

    /// Send a JSON-RPC notification; no response is expected.
    async fn notify(&self, request: JsonRpcRequest) -> Result<()>;
}

pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    request_id: AtomicU64,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>, headers: HashMap<String, String>) -> Result<Self> {
        let mut header_map = reqwest::header::HeaderMap::new();
        for (key, value) in headers {
            let name = reqwest::header::HeaderName::try_from(key.as_str())
                .map_err(|err| WeatherError::Mcp(format!("invalid header name `{key}`: {err}")))?;
            let val = reqwest::header::HeaderValue::try_from(value.as_str())
                .map_err(|err| WeatherError::Mcp(format!("invalid header value for `{key}`: {err}")))?;
            header_map.insert(name, val);
        }

        let client = reqwest::Client::builder()
            .default_headers(header_map)
            .build()
            .map_err(|err| WeatherError::Mcp(format!("failed to build HTTP client: {err}")))?;

        Ok(Self {
            client,
            url: url.into(),
            request_id: AtomicU64::new(1),
        })
    }
}

#[async_trait]
impl McpTransport for HttpTransport {
    async fn send(&self, mut request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        request.id = Some(self.request_id.fetch_add(1, Ordering::SeqCst));

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|err| WeatherError::Mcp(format!("HTTP request failed: {err}")))?;

        response
            .json()
            .await
            .map_err(|err| WeatherError::Mcp(format!("failed to parse MCP response: {err}")))
    }

    async fn notify(&self, request: JsonRpcRequest) -> Result<()> {
        self.client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|err| WeatherError::Mcp(format!("HTTP notification failed: {err}")))?;
        Ok(())
    }
}

/// Transport over the stdin/stdout of a spawned MCP server process.
pub struct StdioTransport {
    #[allow(dead_code)]
    child: Arc<Mutex<Child>>,
    stdin: Arc<Mutex<ChildStdin>>,
    stdout: Arc<Mutex<BufReader<ChildStdout>>>,
    request_id: AtomicU64,
}

impl StdioTransport {
    pub fn spawn(command: &str, args: &[String], env: HashMap<String, String>) -> Result<Self> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit());
        for (key, value) in env {
            cmd.env(key, value);
        }

        let mut child = cmd
            .spawn()
            .map_err(|err| WeatherError::Mcp(format!("failed to spawn MCP server: {err}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| WeatherError::Mcp("MCP server stdin not available".into()))?;
        let stdout = child
            .stdout
            .take()
            .map(BufReader::new)
            .ok_or_else(|| WeatherError::Mcp("MCP server stdout not available".into()))?;

        Ok(Self {
            child: Arc::new(Mutex::new(child)),
            stdin: Arc::new(Mutex::new(stdin)),
            stdout: Arc::new(Mutex::new(stdout)),
            request_id: AtomicU64::new(1),
        })
    }

    async fn write_line(&self, request: &JsonRpcRequest) -> Result<()> {
        let line = serde_json::to_string(request)?;
        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|err| WeatherError::Mcp(format!("failed to write to MCP server: {err}")))?;
        stdin
            .write_all(b"\n")
            .await
            .map_err(|err| WeatherError::Mcp(format!("failed to write to MCP server: {err}")))?;
        stdin
            .flush()
            .await
            .map_err(|err| WeatherError::Mcp(format!("failed to flush MCP server stdin: {err}")))?;
        Ok(())
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn send(&self, mut request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        request.id = Some(self.request_id.fetch_add(1, Ordering::SeqCst));
        self.write_line(&request).await?;

        let mut stdout = self.stdout.lock().await;
        let mut line = String::new();
        let read = stdout
            .read_line(&mut line)
            .await
            .map_err(|err| WeatherError::Mcp(format!("failed to read from MCP server: {err}")))?;
        if read == 0 {
            return Err(WeatherError::Mcp("MCP server closed its stdout".into()));
        }

        serde_json::from_str(&line)
            .map_err(|err| WeatherError::Mcp(format!("failed to parse MCP response: {err}")))
    }

    async fn notify(&self, request: JsonRpcRequest) -> Result<()> {
        self.write_line(&request).await
    }
}

/// Client for a single MCP server connection.
///
/// `initialize` is idempotent; all other operations initialize on demand.
pub struct McpClient {
    transport: Box<dyn McpTransport>,
    initialized: bool,
    server_info: Option<ServerInfo>,
}

impl McpClient {
    pub fn new(transport: Box<dyn McpTransport>) -> Self {
        Self {
            transport,
            initialized: false,
            server_info: None,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    pub async fn initialize(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }

        let request = JsonRpcRequest::call(
            "initialize",
            Some(serde_json::json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": {
                    "name": "weathervane",
                    "version": env!("CARGO_PKG_VERSION"),
                }
            })),
        );
        let response = self.transport.send(request).await?;
        if let Some(error) = response.error {
            return Err(WeatherError::Mcp(format!(
                "initialize failed: {}",
                error.message
            )));
        }

        let result: InitializeResult = serde_json::from_value(response.result.unwrap_or_default())
            .map_err(|err| WeatherError::Mcp(format!("failed to parse initialize result: {err}")))?;
        tracing::debug!(
            server = %result.server_info.name,
            protocol = %result.protocol_version,
            "MCP server initialized"
        );
        self.server_info = Some(result.server_info);
        self.initialized = true;

        self.transport
            .notify(JsonRpcRequest::notification("notifications/initialized"))
            .await?;

        Ok(())
    }

    pub async fn list_tools(&mut self) -> Result<Vec<McpToolDefinition>> {
        self.initialize().await?;

        let response = self
            .transport
            .send(JsonRpcRequest::call("tools/list", None))
            .await?;
        if let Some(error) = response.error {
            return Err(WeatherError::Mcp(format!(
                "tools/list failed: {}",
                error.message
            )));
        }

        let result: ListToolsResult = serde_json::from_value(response.result.unwrap_or_default())
            .map_err(|err| WeatherError::Mcp(format!("failed to parse tools/list result: {err}")))?;
        Ok(result.tools)
    }

    pub async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<CallToolResult> {
        self.initialize().await?;

        let response = self
            .transport
            .send(JsonRpcRequest::call(
                "tools/call",
                Some(serde_json::json!({
                    "name": name,
                    "arguments": arguments,
                })),
            ))
            .await?;
        if let Some(error) = response.error {
            return Err(WeatherError::Mcp(format!(
                "tools/call `{name}` failed: {}",
                error.message
            )));
        }

        serde_json::from_value(response.result.unwrap_or_default())
            .map_err(|err| WeatherError::Mcp(format!("failed to parse tools/call result: {err}")))
    }
}

/// Exposes one MCP server tool through the agent's [`Tool`] interface.
pub struct McpToolProxy {
    name: String,
    description: String,
    parameters: Value,
    client: Arc<Mutex<McpClient>>,
}

impl McpToolProxy {
    pub fn new(client: Arc<Mutex<McpClient>>, definition: McpToolDefinition) -> Self {
        let description = definition
            .description
            .unwrap_or_else(|| format!("MCP tool: {}", definition.name));
        Self {
            name: definition.name,
            description,
            parameters: definition.input_schema,
            client,
        }
    }
}

#[async_trait]
impl Tool for McpToolProxy {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Option<Value> {
        if self.parameters.is_null() {
            None
        } else {
            Some(self.parameters.clone())
        }
    }

    async fn call(&self, input: Value) -> Result<Value> {
        let result = {
            let mut client = self.client.lock().await;
            client.call_tool(&self.name, input).await?
        };
        content_to_value(&self.name, result)
    }
}

/// Flattens MCP content into a single JSON value for the model.
///
/// Text fragments are joined with newlines; when the joined text is itself
/// JSON (the Mongo server returns documents that way) it is decoded so the
/// model sees structured output instead of an escaped string.
fn content_to_value(tool: &str, result: CallToolResult) -> Result<Value> {
    let mut fragments = Vec::new();
    for item in result.content {
        match item {
            ContentItem::Text { text } => fragments.push(text),
            ContentItem::Resource { resource } => fragments.push(resource.to_string()),
            ContentItem::Unknown => {}
        }
    }
    let joined = fragments.join("\n");

    if result.is_error {
        return Err(WeatherError::Mcp(format!(
            "tool `{tool}` reported an error: {joined}"
        )));
    }

    match serde_json::from_str::<Value>(&joined) {
        Ok(value) => Ok(value),
        Err(_) => Ok(Value::String(joined)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_serialize_without_null_fields() {
        let request = JsonRpcRequest::call("tools/list", None);
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"method\":\"tools/list\""));
        assert!(!json.contains("params"));

        let notification = JsonRpcRequest::notification("notifications/initialized");
        let json = serde_json::to_string(&notification).unwrap();
        assert!(!json.contains("\"id\""));
    }

    #[test]
    fn tool_definition_deserializes_input_schema() {
        let json = r#"{
            "name": "find",
            "description": "Query a collection",
            "inputSchema": {"type": "object", "properties": {"limit": {"type": "integer"}}}
        }"#;
        let tool: McpToolDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(tool.name, "find");
        assert_eq!(tool.description.as_deref(), Some("Query a collection"));
        assert!(tool.input_schema.is_object());
    }

    #[test]
    fn json_text_content_is_decoded_for_the_model() {
        let result = CallToolResult {
            content: vec![ContentItem::Text {
                text: "[{\"temperature\": 21}]".into(),
            }],
            is_error: false,
        };
        let value = content_to_value("find", result).unwrap();
        assert_eq!(value, serde_json::json!([{"temperature": 21}]));
    }

    #[test]
    fn error_content_becomes_an_mcp_error() {
        let result = CallToolResult {
            content: vec![ContentItem::Text {
                text: "collection not found".into(),
            }],
            is_error: true,
        };
        let err = content_to_value("find", result).unwrap_err();
        assert!(matches!(err, WeatherError::Mcp(message) if message.contains("collection not found")));
    }

    #[test]
    fn unknown_content_types_are_ignored() {
        let json = r#"{
            "content": [
                {"type": "text", "text": "ok"},
                {"type": "audio", "data": "beep"}
            ],
            "isError": false
        }"#;
        let result: CallToolResult = serde_json::from_str(json).unwrap();
        assert_eq!(result.content.len(), 2);
        let value = content_to_value("find", result).unwrap();
        assert_eq!(value, Value::String("ok".into()));
    }
}
