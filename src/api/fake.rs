//! Scripted in-memory [`RemoteClient`] for tests.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::client::{ApiResponse, Method, RemoteClient};
use super::error::ApiError;

type Handler = Box<dyn Fn(Option<&Value>) -> Result<Value, ApiError> + Send + Sync>;

/// Routes are matched on method and the full path including the query
/// string. Unrouted requests answer 404.
#[derive(Default)]
pub struct FakeRemote {
  routes: Mutex<HashMap<(Method, String), Handler>>,
  calls: Mutex<Vec<(Method, String)>>,
  offline: AtomicBool,
  token: Mutex<Option<String>>,
}

impl FakeRemote {
  pub fn new() -> Self {
    Self::default()
  }

  /// Answer `method path` through `handler`, which sees the request body.
  pub fn on<F>(&self, method: Method, path: &str, handler: F) -> &Self
  where
    F: Fn(Option<&Value>) -> Result<Value, ApiError> + Send + Sync + 'static,
  {
    self
      .routes
      .lock()
      .unwrap()
      .insert((method, path.to_string()), Box::new(handler));
    self
  }

  /// Always answer `method path` with `body`.
  pub fn ok(&self, method: Method, path: &str, body: Value) -> &Self {
    self.on(method, path, move |_| Ok(body.clone()))
  }

  /// Always fail `method path` with `err`.
  pub fn fail(&self, method: Method, path: &str, err: ApiError) -> &Self {
    self.on(method, path, move |_| Err(err.clone()))
  }

  /// Make every request fail as if the server could not be reached.
  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  pub fn calls(&self) -> Vec<(Method, String)> {
    self.calls.lock().unwrap().clone()
  }

  pub fn call_count(&self, method: Method, path: &str) -> usize {
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .filter(|(m, p)| *m == method && p == path)
      .count()
  }

  pub fn token(&self) -> Option<String> {
    self.token.lock().unwrap().clone()
  }
}

#[async_trait]
impl RemoteClient for FakeRemote {
  async fn request(
    &self,
    method: Method,
    path: &str,
    body: Option<Value>,
  ) -> Result<ApiResponse, ApiError> {
    self.calls.lock().unwrap().push((method, path.to_string()));
    // Let other tasks interleave the way real I/O would.
    tokio::task::yield_now().await;

    if self.offline.load(Ordering::SeqCst) {
      return Err(ApiError::NetworkUnreachable("connection refused".to_string()));
    }

    let routes = self.routes.lock().unwrap();
    match routes.get(&(method, path.to_string())) {
      Some(handler) => handler(body.as_ref()).map(|data| ApiResponse { status: 200, data }),
      None => Err(ApiError::NotFound(format!("no route for {path}"))),
    }
  }

  fn set_token(&self, token: Option<String>) {
    *self.token.lock().unwrap() = token;
  }
}
