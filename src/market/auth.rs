//! Sign-in flows. A successful sign-in installs the bearer token on the
//! client and starts from an empty cache.

use serde::Deserialize;
use serde_json::Value;

use super::paths;
use super::types::{Credentials, OtpVerification, Session, Signup, UserRef};
use super::Marketplace;
use crate::api::envelope::decode;
use crate::api::ApiError;
use crate::fallback::{candidates, Chain, DataSource, Strategy};

#[derive(Deserialize)]
struct AuthPayload {
  token: String,
  #[serde(default)]
  user: UserRef,
}

/// Accepts `{token, user}` at the top level or nested under `data`.
fn session_from(body: Value) -> Result<Session, ApiError> {
  let body = match body.get("data") {
    Some(inner) if inner.get("token").is_some() => inner.clone(),
    _ => body,
  };
  let payload: AuthPayload = decode(body)?;
  Ok(Session {
    token: payload.token,
    user: payload.user,
    demo: false,
  })
}

impl Marketplace {
  async fn authenticate(&self, path: &str, body: Value) -> Result<Session, ApiError> {
    if self.is_offline() {
      return Err(ApiError::NetworkUnreachable("offline mode".to_string()));
    }
    session_from(self.client().post(path, body).await?.data)
  }

  fn start_session(&self, session: &Session) {
    tracing::info!(user = %session.user.id, demo = session.demo, "signed in");
    self.set_session(Some(session.clone()));
    self.inner.cache.reset();
  }

  pub async fn login(&self, credentials: &Credentials) -> Result<Session, ApiError> {
    let body = serde_json::to_value(credentials)?;
    let resolved = Chain::new("login")
      .then(
        Strategy::new("server", DataSource::Remote, self.authenticate(paths::LOGIN, body))
          .fall_through_on(ApiError::is_network),
      )
      .then(
        Strategy::new("demo", DataSource::Synthetic, async {
          Ok(self.inner.synthetic.session(&credentials.email, None))
        })
        .only_after(ApiError::is_network),
      )
      .run()
      .await?;

    self.start_session(&resolved.value);
    Ok(resolved.value)
  }

  pub async fn signup(&self, signup: &Signup) -> Result<Session, ApiError> {
    let body = serde_json::to_value(signup)?;
    let resolved = Chain::new("signup")
      .then(
        Strategy::new("server", DataSource::Remote, self.authenticate(paths::SIGNUP, body))
          .fall_through_on(ApiError::is_network),
      )
      .then(
        Strategy::new("demo", DataSource::Synthetic, async {
          Ok(self.inner.synthetic.session(&signup.email, Some(&signup.name)))
        })
        .only_after(ApiError::is_network),
      )
      .run()
      .await?;

    self.start_session(&resolved.value);
    Ok(resolved.value)
  }

  /// Verify a one-time code. Each known path is tried until one exists;
  /// a rejected code stops the search.
  pub async fn verify_otp(&self, verification: &OtpVerification) -> Result<Session, ApiError> {
    let body = serde_json::to_value(verification)?;
    let resolved = Chain::new("verify-otp")
      .then_all(candidates(paths::VERIFY_OTP, |path| self.authenticate(path, body.clone())))
      .then(
        Strategy::new("demo", DataSource::Synthetic, async {
          Ok(self.inner.synthetic.session(&verification.email, None))
        })
        .only_after(ApiError::is_network),
      )
      .run()
      .await?;

    self.start_session(&resolved.value);
    Ok(resolved.value)
  }

  /// Forget the session and everything cached under it.
  pub fn logout(&self) {
    self.set_session(None);
    self.inner.cache.reset();
    tracing::info!("signed out");
  }
}
