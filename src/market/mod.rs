//! Marketplace service.
//!
//! Every logical read goes through the [`QueryCache`] and a fallback chain;
//! every successful write applies the invalidation table and spawns the
//! eager refetches it calls for. Views get watched `Query` and `Mutation`
//! handles for each of them.

mod auth;
mod handles;
mod mutations;
mod queries;
pub mod types;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Arc, RwLock};

use crate::api::{ApiError, RemoteClient};
use crate::cache::{CacheSource, Invalidation, QueryCache, QueryKey, QueryKind};
use crate::config::{Config, EmptyFallsThrough};
use crate::fallback::{Chain, DataSource, Resolved, Strategy};
use crate::synthetic::{self, SyntheticData};
use types::{Session, TaskFilters, UserRef};

pub use queries::categories_from;

/// Remote paths, relative to the configured base address.
mod paths {
  pub const TASKS: &str = "/tasks";
  pub const MY_TASKS: &str = "/tasks/my-tasks";
  pub const MY_OFFERS: &str = "/tasks/my-offers";
  pub const CATEGORIES: &str = "/tasks/categories";
  pub const LOGIN: &str = "/auth/login";
  pub const SIGNUP: &str = "/auth/register";
  /// Servers have exposed OTP verification under each of these.
  pub const VERIFY_OTP: &[&str] = &[
    "/auth/verify-otp",
    "/auth/verify",
    "/auth/otp/verify",
    "/users/verify-otp",
  ];

  pub fn task(id: &str) -> String {
    format!("{TASKS}/{id}")
  }

  pub fn task_sub(id: &str, sub: &str) -> String {
    format!("{TASKS}/{id}/{sub}")
  }
}

/// A read result with where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Loaded<T> {
  pub data: T,
  /// Strategy that produced the data
  pub source: DataSource,
  /// Whether it was fetched now, served fresh from cache, or served as
  /// last-known-good while the server was unreachable
  pub cache: CacheSource,
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> Loaded<T> {
  fn synthetic(data: T) -> Self {
    Self {
      data,
      source: DataSource::Synthetic,
      cache: CacheSource::Network,
      cached_at: None,
    }
  }

  pub fn is_demo(&self) -> bool {
    self.source == DataSource::Synthetic
  }
}

/// What the cache stores for a read: the value and the strategy source.
#[derive(Serialize, Deserialize)]
struct Sourced<T> {
  source: DataSource,
  data: T,
}

type Demo<T> = Box<dyn FnOnce() -> T + Send>;

struct Inner {
  client: Arc<dyn RemoteClient>,
  cache: QueryCache,
  synthetic: SyntheticData,
  session: RwLock<Option<Session>>,
  offline: bool,
  page_size: u32,
  empty_falls_through: EmptyFallsThrough,
}

/// Task marketplace client. Cheap to clone.
#[derive(Clone)]
pub struct Marketplace {
  inner: Arc<Inner>,
}

impl Marketplace {
  pub fn new(client: Arc<dyn RemoteClient>, cache: QueryCache, config: &Config) -> Self {
    Self {
      inner: Arc::new(Inner {
        client,
        cache,
        synthetic: SyntheticData::new(config.demo_seed),
        session: RwLock::new(None),
        offline: config.offline,
        page_size: config.api.page_size,
        empty_falls_through: config.fallback.empty_falls_through.clone(),
      }),
    }
  }

  pub fn cache(&self) -> &QueryCache {
    &self.inner.cache
  }

  pub fn is_offline(&self) -> bool {
    self.inner.offline
  }

  pub fn session(&self) -> Option<Session> {
    self.inner.session.read().ok().and_then(|s| s.clone())
  }

  fn set_session(&self, session: Option<Session>) {
    // Demo tokens mean nothing to a server.
    let token = session.as_ref().filter(|s| !s.demo).map(|s| s.token.clone());
    self.inner.client.set_token(token);
    if let Ok(mut current) = self.inner.session.write() {
      *current = session;
    }
  }

  fn current_user(&self) -> Option<UserRef> {
    self.session().map(|s| s.user)
  }

  /// The signed-in user, or the demo user for synthetic results.
  fn demo_user(&self) -> UserRef {
    self.current_user().unwrap_or_else(synthetic::demo_user)
  }

  fn client(&self) -> &dyn RemoteClient {
    &*self.inner.client
  }

  /// Serve `key` from cache or run `fetch` (a remote/derived chain) and
  /// cache what it resolves to.
  async fn cached<T, Fut>(&self, key: QueryKey, fetch: Fut) -> Result<Loaded<T>, ApiError>
  where
    T: Serialize + DeserializeOwned + Send + 'static,
    Fut: Future<Output = Result<Resolved<T>, ApiError>> + Send + 'static,
  {
    let result = self
      .inner
      .cache
      .query(&key, move || async move {
        let resolved = fetch.await?;
        Ok(Sourced {
          source: resolved.source,
          data: resolved.value,
        })
      })
      .await?;

    Ok(Loaded {
      data: result.data.data,
      source: result.data.source,
      cache: result.source,
      cached_at: result.cached_at,
    })
  }

  /// Cached read whose terminal fallback is demo data, used only when the
  /// server cannot be reached and nothing was cached before.
  async fn cached_or_demo<T, Fut>(
    &self,
    chain: &'static str,
    key: QueryKey,
    fetch: Fut,
    demo: Option<Demo<T>>,
  ) -> Result<Loaded<T>, ApiError>
  where
    T: Serialize + DeserializeOwned + Send + 'static,
    Fut: Future<Output = Result<Resolved<T>, ApiError>> + Send + 'static,
  {
    let mut outer = Chain::new(chain).then(
      Strategy::new("cache", DataSource::Remote, self.cached(key, fetch))
        .fall_through_on(ApiError::is_network),
    );
    if let Some(demo) = demo {
      outer = outer.then(
        Strategy::new("demo", DataSource::Synthetic, async move { Ok(Loaded::synthetic(demo())) })
          .only_after(ApiError::is_network),
      );
    }
    Ok(outer.run().await?.value)
  }

  /// Reflect a successful write in the cache and refetch the eager targets
  /// in the background.
  fn after_write(&self, invalidation: Invalidation) {
    let eager = self.inner.cache.apply(&invalidation);
    if self.inner.offline {
      return;
    }
    for key in eager {
      let this = self.clone();
      tokio::spawn(async move {
        if let Err(e) = this.refresh(&key).await {
          tracing::debug!(%key, error = %e, "eager refetch failed");
        }
      });
    }
  }

  /// Re-run the read behind `key` so the cache holds a current value.
  pub async fn refresh(&self, key: &QueryKey) -> Result<(), ApiError> {
    let task_id = key.task_id.clone();
    match (key.kind, task_id) {
      (QueryKind::List, _) => self.tasks(&key.decode_params::<TaskFilters>()).await.map(drop),
      (QueryKind::MyTasks, _) => self.my_tasks().await.map(drop),
      (QueryKind::MyOffers, _) => self.my_offers().await.map(drop),
      (QueryKind::Categories, _) => self.categories().await.map(drop),
      (QueryKind::Detail, Some(id)) => self.task(&id).await.map(drop),
      (QueryKind::Offers, Some(id)) => self.task_offers(&id).await.map(drop),
      (QueryKind::Questions, Some(id)) => self.task_questions(&id).await.map(drop),
      (QueryKind::CompletionStatus, Some(id)) => self.completion_status(&id).await.map(drop),
      (QueryKind::PaymentStatus, Some(id)) => self.payment_status(&id).await.map(drop),
      (kind, None) => {
        tracing::debug!(kind = kind.as_str(), "no task id to refetch");
        Ok(())
      }
    }
  }
}

#[cfg(test)]
pub(crate) mod test_support {
  use super::*;
  use crate::api::fake::FakeRemote;
  use crate::cache::MemoryStore;
  use serde_json::{json, Value};

  pub fn market(remote: &Arc<FakeRemote>) -> Marketplace {
    market_with(remote, Config::default())
  }

  pub fn market_with(remote: &Arc<FakeRemote>, config: Config) -> Marketplace {
    let cache = QueryCache::new(Arc::new(MemoryStore::new()), config.cache.freshness.clone());
    let client: Arc<dyn RemoteClient> = remote.clone();
    Marketplace::new(client, cache, &config)
  }

  pub fn signed_in(market: &Marketplace, user_id: &str) {
    market.set_session(Some(Session {
      token: "tok".to_string(),
      user: UserRef {
        id: user_id.to_string(),
        name: user_id.to_string(),
        avatar: None,
      },
      demo: false,
    }));
  }

  pub fn task_json(id: &str, creator: &str, categories: &[&str]) -> Value {
    json!({
      "_id": id,
      "title": format!("Task {id}"),
      "details": "details",
      "categories": categories,
      "budget": {"amount": 50.0, "currency": "USD"},
      "status": "open",
      "creator": {"_id": creator, "name": creator},
    })
  }

  pub fn list_json(tasks: Vec<Value>) -> Value {
    json!({
      "success": true,
      "count": tasks.len(),
      "total": tasks.len(),
      "pages": 1,
      "currentPage": 1,
      "data": tasks,
    })
  }

  /// Wait until `method path` has been requested `count` times.
  pub async fn wait_for_calls(remote: &FakeRemote, method: crate::api::Method, path: &str, count: usize) {
    let waited = tokio::time::timeout(std::time::Duration::from_secs(2), async {
      while remote.call_count(method, path) < count {
        tokio::task::yield_now().await;
      }
    })
    .await;
    assert!(
      waited.is_ok(),
      "{path} requested {} times, expected {count}",
      remote.call_count(method, path)
    );
  }
}
