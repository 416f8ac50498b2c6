use crate::agent::tool::{Tool, ToolKind};
use crate::config::WeatherConfig;
use crate::error::{AgentError, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

const TOOL_NAME: &str = "weather";

/// Current conditions for a coordinate pair from an Open-Meteo compatible API
pub struct WeatherTool {
    base_url: String,
    client: reqwest::Client,
}

impl WeatherTool {
    pub fn new(config: &WeatherConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("delegated-agent/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: config.base_url.clone(),
            client,
        }
    }

    fn coordinate(input: &Value, key: &str) -> Result<f64> {
        let invalid = |reason: String| AgentError::InvalidToolArguments {
            tool_name: TOOL_NAME.to_string(),
            reason,
        };

        match input.get(key) {
            Some(Value::Number(n)) => n
                .as_f64()
                .ok_or_else(|| invalid(format!("'{}' is not a finite number", key))),
            Some(Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| invalid(format!("'{}' is not numeric: {}", key, s))),
            Some(other) => Err(invalid(format!("'{}' must be a number, got {}", key, other))),
            None => Err(invalid(format!("missing '{}'", key))),
        }
    }
}

#[async_trait]
impl Tool for WeatherTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "Get weather information for a given lat and lon"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "lat": { "type": "number", "description": "latitude of the location" },
                "lon": { "type": "number", "description": "longitude of the location" }
            },
            "required": ["lat", "lon"]
        })
    }

    async fn call(&self, input: Value) -> Result<Value> {
        let lat = Self::coordinate(&input, "lat")?;
        let lon = Self::coordinate(&input, "lon")?;

        tracing::debug!(lat, lon, "fetching current weather");
        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("latitude", lat.to_string()),
                ("longitude", lon.to_string()),
                ("current_weather", "true".to_string()),
            ])
            .send()
            .await?
            .error_for_status()?;

        let mut body: Value = response.json().await?;
        match body.get_mut("current_weather").map(Value::take) {
            Some(current) if !current.is_null() => Ok(current),
            _ => Err(AgentError::ToolExecutionFailed {
                tool_name: TOOL_NAME.to_string(),
                error: "response has no current_weather".to_string(),
            }),
        }
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Web
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn tool_for(server: &MockServer) -> WeatherTool {
        WeatherTool::new(&WeatherConfig {
            base_url: format!("{}/v1/forecast", server.uri()),
            timeout_secs: 5,
        })
    }

    #[tokio::test]
    async fn test_returns_current_weather() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("latitude", "47.6"))
            .and(query_param("longitude", "-122.3"))
            .and(query_param("current_weather", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "latitude": 47.6,
                "current_weather": {"temperature": 11.2, "windspeed": 7.9, "weathercode": 3}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let out = tool_for(&server)
            .call(json!({"lat": 47.6, "lon": "-122.3"}))
            .await
            .unwrap();
        assert_eq!(out["temperature"], 11.2);
        assert_eq!(out["weathercode"], 3);
    }

    #[tokio::test]
    async fn test_missing_current_weather_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"error": false})))
            .mount(&server)
            .await;

        let err = tool_for(&server)
            .call(json!({"lat": 1, "lon": 2}))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ToolExecutionFailed { .. }));
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = tool_for(&server)
            .call(json!({"lat": 1, "lon": 2}))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ProviderError { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_bad_coordinates() {
        let server = MockServer::start().await;
        let tool = tool_for(&server);

        let err = tool.call(json!({"lat": 1})).await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidToolArguments { reason, .. } if reason.contains("lon")));

        let err = tool.call(json!({"lat": "north", "lon": 2})).await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidToolArguments { .. }));
    }
}
