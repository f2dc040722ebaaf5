use thiserror::Error;

pub type Result<T> = std::result::Result<T, WeatherError>;

#[derive(Debug, Error)]
pub enum WeatherError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("MCP error: {0}")]
    Mcp(String),

    #[error("tool `{0}` not found")]
    ToolNotFound(String),

    #[error("language model error: {0}")]
    LanguageModel(String),

    #[error("agent error: {0}")]
    Agent(String),

    #[error("unsupported agent result: {0}")]
    UnsupportedResult(String),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
