//! Remote resource client.
//!
//! One logical HTTP request per call against the configured base address.
//! Failures come back already classified as [`ApiError`].

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use url::Url;

use super::error::ApiError;
use crate::config::ApiConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
  Get,
  Post,
  Put,
  Patch,
  Delete,
}

impl From<Method> for reqwest::Method {
  fn from(method: Method) -> Self {
    match method {
      Method::Get => reqwest::Method::GET,
      Method::Post => reqwest::Method::POST,
      Method::Put => reqwest::Method::PUT,
      Method::Patch => reqwest::Method::PATCH,
      Method::Delete => reqwest::Method::DELETE,
    }
  }
}

/// A successful response
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
  pub status: u16,
  pub data: Value,
}

/// The transport seam. Everything above it is written against this trait so
/// tests can script responses.
#[async_trait]
pub trait RemoteClient: Send + Sync {
  async fn request(
    &self,
    method: Method,
    path: &str,
    body: Option<Value>,
  ) -> Result<ApiResponse, ApiError>;

  /// Attach (or clear) the bearer token used on subsequent requests.
  fn set_token(&self, _token: Option<String>) {}

  async fn get(&self, path: &str) -> Result<ApiResponse, ApiError> {
    self.request(Method::Get, path, None).await
  }

  async fn post(&self, path: &str, body: Value) -> Result<ApiResponse, ApiError> {
    self.request(Method::Post, path, Some(body)).await
  }

  async fn put(&self, path: &str, body: Option<Value>) -> Result<ApiResponse, ApiError> {
    self.request(Method::Put, path, body).await
  }

  async fn patch(&self, path: &str, body: Value) -> Result<ApiResponse, ApiError> {
    self.request(Method::Patch, path, Some(body)).await
  }

  async fn delete(&self, path: &str) -> Result<ApiResponse, ApiError> {
    self.request(Method::Delete, path, None).await
  }
}

/// reqwest-backed client
#[derive(Clone)]
pub struct HttpClient {
  http: reqwest::Client,
  base_url: String,
  token: Arc<RwLock<Option<String>>>,
}

impl HttpClient {
  pub fn new(config: &ApiConfig) -> Result<Self> {
    // Validate once up front; requests are built by appending paths.
    Url::parse(&config.base_url)
      .map_err(|e| eyre!("Invalid API base URL {}: {}", config.base_url, e))?;

    let http = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .gzip(true)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      base_url: config.base_url.trim_end_matches('/').to_string(),
      token: Arc::new(RwLock::new(config.token.clone())),
    })
  }

  fn url(&self, path: &str) -> Result<Url, ApiError> {
    let full = if path.starts_with('/') {
      format!("{}{}", self.base_url, path)
    } else {
      format!("{}/{}", self.base_url, path)
    };
    Url::parse(&full).map_err(|e| ApiError::unknown(format!("invalid request URL {full}: {e}")))
  }

  fn token(&self) -> Option<String> {
    self.token.read().ok().and_then(|t| t.clone())
  }
}

#[async_trait]
impl RemoteClient for HttpClient {
  async fn request(
    &self,
    method: Method,
    path: &str,
    body: Option<Value>,
  ) -> Result<ApiResponse, ApiError> {
    let url = self.url(path)?;
    tracing::debug!(?method, %url, "request");

    let mut req = self.http.request(method.into(), url);
    if let Some(token) = self.token() {
      req = req.bearer_auth(token);
    }
    if let Some(body) = &body {
      req = req.json(body);
    }

    let resp = req.send().await.map_err(classify_transport)?;
    let status = resp.status().as_u16();
    let text = resp.text().await.map_err(classify_transport)?;
    let data = parse_body(&text);

    if (200..300).contains(&status) {
      Ok(ApiResponse { status, data })
    } else {
      let err = ApiError::from_status(status, &data);
      tracing::debug!(%status, error = %err, path, "request failed");
      Err(err)
    }
  }

  fn set_token(&self, token: Option<String>) {
    if let Ok(mut slot) = self.token.write() {
      *slot = token;
    }
  }
}

/// Bodies are JSON when the server behaves; keep anything else as a string so
/// its text can still be surfaced in an error message.
fn parse_body(text: &str) -> Value {
  if text.trim().is_empty() {
    return Value::Null;
  }
  serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

/// Map transport-level failures onto the taxonomy. Timeouts count as
/// unreachable.
fn classify_transport(err: reqwest::Error) -> ApiError {
  if err.is_timeout() || err.is_connect() || err.is_request() {
    return ApiError::NetworkUnreachable(err.to_string());
  }
  match err.status() {
    Some(status) => ApiError::from_status(status.as_u16(), &Value::Null),
    None => ApiError::unknown(err.to_string()),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn config(base_url: &str) -> ApiConfig {
    ApiConfig {
      base_url: base_url.to_string(),
      ..ApiConfig::default()
    }
  }

  #[test]
  fn test_url_joins_base_path() {
    let client = HttpClient::new(&config("https://api.example.com/api/")).unwrap();
    let url = client.url("/tasks?page=2&limit=10").unwrap();
    assert_eq!(url.as_str(), "https://api.example.com/api/tasks?page=2&limit=10");
  }

  #[test]
  fn test_invalid_base_url_rejected() {
    assert!(HttpClient::new(&config("not a url")).is_err());
  }

  #[test]
  fn test_parse_body_keeps_plain_text() {
    assert_eq!(parse_body(""), Value::Null);
    assert_eq!(parse_body("{\"a\":1}")["a"], 1);
    assert_eq!(parse_body("Bad Gateway"), Value::String("Bad Gateway".into()));
  }

  #[tokio::test]
  async fn test_connection_refused_is_network_unreachable() {
    // Port 9 (discard) is closed on test machines.
    let client = HttpClient::new(&ApiConfig {
      base_url: "http://127.0.0.1:9".to_string(),
      timeout_secs: 2,
      ..ApiConfig::default()
    })
    .unwrap();

    let err = client.get("/tasks").await.unwrap_err();
    assert!(err.is_network(), "got {err:?}");
  }

  #[test]
  fn test_token_can_be_replaced() {
    let client = HttpClient::new(&config("https://api.example.com")).unwrap();
    assert_eq!(client.token(), None);
    client.set_token(Some("abc".to_string()));
    assert_eq!(client.token().as_deref(), Some("abc"));
  }
}
