//! HTTP transport to the Revit add-in.
//!
//! Every failure mode collapses into the `message` of a normally returned
//! `RemoteResponse`; nothing here returns an error to the caller.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::RevitConfig;

/// Body of a POST to the Revit server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RemoteRequest {
    /// A predefined operation, sent to `/execute`.
    Function {
        function: String,
        arguments: Map<String, Value>,
    },
    /// Generated C# method body, sent to `/execute_code`.
    Code { code: String },
}

impl RemoteRequest {
    pub fn function(name: &str, arguments: Map<String, Value>) -> Self {
        Self::Function {
            function: name.to_string(),
            arguments,
        }
    }

    pub fn code(code: impl Into<String>) -> Self {
        Self::Code { code: code.into() }
    }

    pub fn path(&self) -> &'static str {
        match self {
            Self::Function { .. } => "/execute",
            Self::Code { .. } => "/execute_code",
        }
    }
}

/// Normalized reply from the Revit server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteResponse {
    #[serde(rename = "Message", default, deserialize_with = "nullable_message")]
    pub message: String,

    #[serde(rename = "ElementIds", default, deserialize_with = "element_ids")]
    pub element_ids: Vec<String>,

    /// Any other top-level keys (`Levels`, `Elements`, `WallTypes`, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RemoteResponse {
    /// A bare message with no element ids.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    /// Interpret a 200 body: JSON when it parses, raw text otherwise.
    pub fn from_body(body: &str) -> Self {
        match serde_json::from_str::<RemoteResponse>(body) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!("Revit reply is not a JSON object ({}), using raw text", e);
                Self::message(body)
            }
        }
    }
}

/// The add-in sends `"Message": null` when it has nothing to say.
fn nullable_message<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Ids arrive as strings from the add-in, but integers are tolerated.
fn element_ids<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Vec<Value>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .filter_map(|v| match v {
            Value::String(s) => Some(s),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .collect())
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &RemoteRequest) -> RemoteResponse;
}

/// Transport backed by `reqwest`, one request in flight per call.
pub struct HttpTransport {
    client: Client,
    base_url: String,
    tool_timeout: Duration,
    code_timeout: Duration,
}

impl HttpTransport {
    pub fn new(config: &RevitConfig) -> Self {
        Self::with_timeouts(
            &config.base_url,
            config.tool_timeout(),
            config.code_timeout(),
        )
    }

    pub fn with_timeouts(base_url: &str, tool_timeout: Duration, code_timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            tool_timeout,
            code_timeout,
        }
    }

    fn timeout_for(&self, request: &RemoteRequest) -> Duration {
        match request {
            RemoteRequest::Function { .. } => self.tool_timeout,
            RemoteRequest::Code { .. } => self.code_timeout,
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &RemoteRequest) -> RemoteResponse {
        let url = format!("{}{}", self.base_url, request.path());
        if let RemoteRequest::Function { function, .. } = request {
            debug!("POST {} function={}", url, function);
        } else {
            debug!("POST {}", url);
        }

        let response = match self
            .client
            .post(&url)
            .timeout(self.timeout_for(request))
            .json(request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("Revit server unreachable at {}: {}", url, e);
                return RemoteResponse::message(format!(
                    "Error communicating with Revit server: {}",
                    e
                ));
            }
        };

        let status = response.status();
        if status != StatusCode::OK {
            warn!("Revit server returned {} for {}", status, url);
            return RemoteResponse::message(format!(
                "Error: Revit server returned status code {}",
                status.as_u16()
            ));
        }

        match response.text().await {
            Ok(body) => {
                debug!("Revit reply: {}", body);
                RemoteResponse::from_body(&body)
            }
            Err(e) => {
                warn!("Failed to read Revit reply from {}: {}", url, e);
                RemoteResponse::message(format!("Error communicating with Revit server: {}", e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, http::StatusCode as AxumStatus, routing::post};
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    /// Serve `router` on an ephemeral local port and return its base URL.
    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn transport(base_url: &str) -> HttpTransport {
        HttpTransport::with_timeouts(base_url, Duration::from_secs(10), Duration::from_secs(10))
    }

    #[test]
    fn function_request_serializes_function_and_arguments() {
        let mut args = Map::new();
        args.insert("height".into(), json!(10.0));
        let body = serde_json::to_value(RemoteRequest::function("create_wall", args)).unwrap();
        assert_eq!(
            body,
            json!({"function": "create_wall", "arguments": {"height": 10.0}})
        );
    }

    #[test]
    fn code_request_serializes_code_only() {
        let body = serde_json::to_value(RemoteRequest::code("return \"ok\";")).unwrap();
        assert_eq!(body, json!({"code": "return \"ok\";"}));
        assert_eq!(RemoteRequest::code("x").path(), "/execute_code");
    }

    #[test]
    fn from_body_keeps_extra_keys_and_numeric_ids() {
        let parsed = RemoteResponse::from_body(
            r#"{"Message":"Found 2 levels","ElementIds":[311, "312"],"Levels":["L1","L2"]}"#,
        );
        assert_eq!(parsed.message, "Found 2 levels");
        assert_eq!(parsed.element_ids, vec!["311", "312"]);
        assert_eq!(parsed.extra["Levels"], json!(["L1", "L2"]));
    }

    #[test]
    fn from_body_treats_null_message_as_empty() {
        let parsed = RemoteResponse::from_body(r#"{"Message": null, "ElementIds": ["1"]}"#);
        assert_eq!(parsed.message, "");
        assert_eq!(parsed.element_ids, vec!["1"]);
    }

    #[test]
    fn from_body_wraps_json_that_is_not_an_object() {
        let parsed = RemoteResponse::from_body("[1,2,3]");
        assert_eq!(parsed.message, "[1,2,3]");
        assert!(parsed.element_ids.is_empty());
    }

    #[tokio::test]
    async fn json_reply_is_returned_unmodified() {
        let seen = Arc::new(Mutex::new(None::<Value>));
        let captured = seen.clone();
        let router = Router::new().route(
            "/execute",
            post(move |Json(body): Json<Value>| {
                let captured = captured.clone();
                async move {
                    *captured.lock().unwrap() = Some(body);
                    Json(json!({"Message": "ok", "ElementIds": ["1", "2"]}))
                }
            }),
        );
        let base = serve(router).await;

        let request = RemoteRequest::function("get_wall_types", Map::new());
        let response = transport(&base).send(&request).await;

        assert_eq!(
            response,
            RemoteResponse {
                message: "ok".into(),
                element_ids: vec!["1".into(), "2".into()],
                extra: Map::new(),
            }
        );
        assert_eq!(
            seen.lock().unwrap().clone().unwrap(),
            json!({"function": "get_wall_types", "arguments": {}})
        );
    }

    #[tokio::test]
    async fn plain_text_reply_becomes_message() {
        let router = Router::new().route("/execute", post(|| async { "plain text" }));
        let base = serve(router).await;

        let response = transport(&base)
            .send(&RemoteRequest::function("get_level_names", Map::new()))
            .await;

        assert_eq!(response, RemoteResponse::message("plain text"));
    }

    #[tokio::test]
    async fn non_200_status_is_reported_in_message() {
        let router = Router::new().route(
            "/execute_code",
            post(|| async { (AxumStatus::SERVICE_UNAVAILABLE, "busy") }),
        );
        let base = serve(router).await;

        let response = transport(&base).send(&RemoteRequest::code("x")).await;

        assert!(response.message.contains("503"), "{}", response.message);
        assert!(response.element_ids.is_empty());
    }

    #[tokio::test]
    async fn connection_failure_is_reported_in_message() {
        // Bind then drop to get a port nothing listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let response = transport(&format!("http://{}", addr))
            .send(&RemoteRequest::function("get_wall_types", Map::new()))
            .await;

        assert!(
            response
                .message
                .starts_with("Error communicating with Revit server"),
            "{}",
            response.message
        );
    }
}
