//! HTTP boundary: liveness, the latest-weather endpoint and startup warm-up.
//!
//! This is the only layer allowed to translate internal failures into
//! user-facing messages; detail goes to the logs, never the response body.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::agent::AgentHandle;
use crate::error::Result;
use crate::payload::WeatherPayload;
use crate::service::WeatherService;

pub fn router<A: AgentHandle + 'static>(service: Arc<WeatherService<A>>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/weather/latest", get(latest_weather::<A>))
        .with_state(service)
}

/// Binds the listener and serves until the process exits. Warm-up runs in
/// the background: a failure is logged and the first request retries
/// initialization instead.
pub async fn serve<A: AgentHandle + 'static>(
    service: Arc<WeatherService<A>>,
    addr: SocketAddr,
) -> Result<()> {
    let warm = Arc::clone(&service);
    tokio::spawn(async move {
        if warm.warm_up().await.is_err() {
            tracing::warn!("continuing without a warmed-up agent");
        }
    });

    let app = router(service);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "weather service listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn root() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn latest_weather<A: AgentHandle + 'static>(
    State(service): State<Arc<WeatherService<A>>>,
) -> Response {
    let payload = match service.fetch_latest_weather().await {
        Ok(payload) => payload,
        Err(err) => {
            tracing::error!(error = %err, "weather agent call failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"detail": "Failed to query the MCP agent"})),
            )
                .into_response();
        }
    };

    if !has_latest(&payload) {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"detail": "No weather data available"})),
        )
            .into_response();
    }

    Json(Value::Object(payload)).into_response()
}

/// "No data" when `latest` is absent or empty, distinct from a failure.
fn has_latest(payload: &WeatherPayload) -> bool {
    match payload.get("latest") {
        None | Some(Value::Null) => false,
        Some(Value::Object(map)) => !map.is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::String(text)) => !text.is_empty(),
        Some(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::config::AppConfig;
    use crate::error::WeatherError;
    use crate::payload::RawAgentResult;
    use crate::session::AgentSession;

    struct ScriptedAgent {
        results: Mutex<VecDeque<Result<RawAgentResult>>>,
    }

    #[async_trait]
    impl AgentHandle for ScriptedAgent {
        async fn initialize(&self) -> Result<()> {
            Ok(())
        }

        async fn run(&self, _prompt: &str) -> Result<RawAgentResult> {
            self.results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(WeatherError::Agent("no scripted result".into())))
        }
    }

    fn service_with(results: Vec<Result<RawAgentResult>>) -> Arc<WeatherService<ScriptedAgent>> {
        let agent = ScriptedAgent {
            results: Mutex::new(results.into()),
        };
        Arc::new(WeatherService::with_session(
            AppConfig::default(),
            AgentSession::new(agent, 2),
        ))
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn root_reports_liveness() {
        let response = root().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"status": "ok"}));
    }

    #[tokio::test]
    async fn latest_weather_returns_canonical_payload() {
        let service = service_with(vec![Ok(RawAgentResult::Text(
            r#"{"latest": {"temperature": 10, "humidity": 55}}"#.into(),
        ))]);

        let response = latest_weather(State(service)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["latest"], json!({"temperature": 10, "humidity": 55}));
    }

    #[tokio::test]
    async fn empty_payload_is_not_found() {
        let service = service_with(vec![Ok(RawAgentResult::Text("{}".into()))]);

        let response = latest_weather(State(service)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["detail"], "No weather data available");
    }

    #[tokio::test]
    async fn failures_become_a_generic_500() {
        let service = service_with(vec![
            Err(WeatherError::LanguageModel("boom with secrets".into())),
            Err(WeatherError::LanguageModel("boom with secrets".into())),
        ]);

        let response = latest_weather(State(service)).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["detail"], "Failed to query the MCP agent");
        assert!(!body.to_string().contains("secrets"));
    }

    #[test]
    fn empty_latest_values_count_as_no_data() {
        let mut payload = WeatherPayload::new();
        assert!(!has_latest(&payload));

        payload.insert("latest".into(), Value::Null);
        assert!(!has_latest(&payload));

        payload.insert("latest".into(), json!({}));
        assert!(!has_latest(&payload));

        payload.insert("latest".into(), json!({"temperature": 0}));
        assert!(has_latest(&payload));
    }
}
