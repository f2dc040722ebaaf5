use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use weathervane::{serve, AppConfig, Result, WeatherError, WeatherService};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = AppConfig::load()?;
    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port)
        .parse()
        .map_err(|err| WeatherError::Config(format!("invalid listen address: {err}")))?;

    let service = Arc::new(WeatherService::from_config(settings)?);
    serve(service, addr).await
}
