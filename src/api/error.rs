//! Classified failures returned by the remote client.

use serde_json::Value;

/// Message used when an unauthorized response is surfaced as an expired session.
pub const SESSION_EXPIRED: &str = "your session has expired, please sign in again";

/// Message used when a read needs the signed-in user and there is none.
pub const SIGN_IN_REQUIRED: &str = "sign in to see your tasks and offers";

/// Error classification shared by every read and write path.
///
/// Only [`ApiError::NetworkUnreachable`] is ever eligible for substitution with
/// demo data. Everything else is an outcome the caller has to see.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
  /// No response reached us: connection refused, DNS failure, timeout.
  #[error("server unreachable: {0}")]
  NetworkUnreachable(String),

  /// 401
  #[error("unauthorized: {0}")]
  Unauthorized(String),

  /// 400, carrying the server-provided message verbatim.
  #[error("validation failed: {0}")]
  Validation(String),

  /// 404. Also the "try the next candidate" signal for multi-path lookups.
  #[error("not found: {0}")]
  NotFound(String),

  /// Anything else, including undecodable bodies.
  #[error("request failed{}: {message}", status_suffix(.status))]
  Unknown {
    status: Option<u16>,
    message: String,
  },
}

impl ApiError {
  /// Classify a non-success HTTP status with its (possibly empty) JSON body.
  pub fn from_status(status: u16, body: &Value) -> Self {
    let message = server_message(body).unwrap_or_else(|| format!("HTTP {status}"));
    match status {
      400 => ApiError::Validation(message),
      401 => ApiError::Unauthorized(message),
      404 => ApiError::NotFound(message),
      _ => ApiError::Unknown {
        status: Some(status),
        message,
      },
    }
  }

  /// Build an `Unknown` error with no status, e.g. for a malformed payload.
  pub fn unknown(message: impl Into<String>) -> Self {
    ApiError::Unknown {
      status: None,
      message: message.into(),
    }
  }

  pub fn is_network(&self) -> bool {
    matches!(self, ApiError::NetworkUnreachable(_))
  }

  pub fn is_not_found(&self) -> bool {
    matches!(self, ApiError::NotFound(_))
  }

  /// Backend absent or misbehaving, as opposed to a verdict about the request.
  pub fn is_unavailable(&self) -> bool {
    matches!(
      self,
      ApiError::NetworkUnreachable(_) | ApiError::NotFound(_) | ApiError::Unknown { .. }
    )
  }

  /// Rewrite a 401 into the friendlier expired-session error; others pass through.
  pub fn into_session_expired(self) -> Self {
    match self {
      ApiError::Unauthorized(_) => ApiError::Unauthorized(SESSION_EXPIRED.to_string()),
      other => other,
    }
  }
}

impl From<serde_json::Error> for ApiError {
  fn from(err: serde_json::Error) -> Self {
    ApiError::unknown(format!("malformed response: {err}"))
  }
}

fn status_suffix(status: &Option<u16>) -> String {
  status.map(|s| format!(" ({s})")).unwrap_or_default()
}

/// Pull a human-readable message out of an error body.
///
/// Servers use `message` or `error`; some wrap a list under `errors`.
fn server_message(body: &Value) -> Option<String> {
  if let Some(s) = body.as_str() {
    return (!s.trim().is_empty()).then(|| s.to_string());
  }
  for field in ["message", "error", "msg"] {
    if let Some(s) = body.get(field).and_then(Value::as_str) {
      return Some(s.to_string());
    }
  }
  body
    .get("errors")
    .and_then(Value::as_array)
    .and_then(|errs| errs.first())
    .and_then(|e| e.get("msg").or_else(|| e.get("message")))
    .and_then(Value::as_str)
    .map(String::from)
}
