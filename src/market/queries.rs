//! Logical reads and the fallback chains behind them.

use std::collections::HashMap;

use super::paths;
use super::types::{Category, CompletionStatus, PaymentStatus, Question, Task, TaskFilters};
use super::{Demo, Loaded, Marketplace};
use crate::api::envelope::decode;
use crate::api::error::SIGN_IN_REQUIRED;
use crate::api::{ApiError, CategoryEnvelope, ItemEnvelope, ListEnvelope};
use crate::cache::QueryKey;
use crate::fallback::{Chain, DataSource, Resolved, Strategy};
use crate::pagination::fetch_all_pages;
use crate::synthetic::default_categories;

/// Count category labels across `tasks`, most used first, ties by name.
pub fn categories_from(tasks: &[Task]) -> Vec<Category> {
  let mut counts: HashMap<&str, u64> = HashMap::new();
  for task in tasks {
    for name in &task.categories {
      *counts.entry(name.as_str()).or_default() += 1;
    }
  }
  let mut categories: Vec<Category> = counts
    .into_iter()
    .map(|(name, count)| Category {
      name: name.to_string(),
      count,
    })
    .collect();
  categories.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
  categories
}

fn remote<T>(value: T, strategy: &'static str) -> Resolved<T> {
  Resolved {
    value,
    source: DataSource::Remote,
    strategy,
  }
}

impl Marketplace {
  // ==========================================================================
  // Task collection
  // ==========================================================================

  /// Every task matching `filters`, across all pages.
  pub async fn tasks(&self, filters: &TaskFilters) -> Result<Loaded<ListEnvelope<Task>>, ApiError> {
    let synthetic = self.clone();
    let demo_filters = filters.clone();
    let demo = move || ListEnvelope::single_page(synthetic.inner.synthetic.tasks(&demo_filters));
    if self.is_offline() {
      return Ok(Loaded::synthetic(demo()));
    }

    let this = self.clone();
    let filters = filters.clone();
    let key = QueryKey::list(&filters);
    let fetch = async move {
      let params = filters.to_params();
      let aggregated = fetch_all_pages::<Task>(this.client(), paths::TASKS, &params, this.inner.page_size).await?;
      if !aggregated.is_complete() {
        tracing::warn!(skipped = ?aggregated.skipped, "task list is missing pages");
      }
      Ok::<_, ApiError>(remote(aggregated.into_envelope(), "collection"))
    };
    self.cached_or_demo("tasks", key, fetch, Some(Box::new(demo))).await
  }

  /// The whole unfiltered collection; base for derived strategies.
  async fn all_tasks(&self) -> Result<Vec<Task>, ApiError> {
    let aggregated = fetch_all_pages::<Task>(self.client(), paths::TASKS, &[], self.inner.page_size).await?;
    Ok(aggregated.items)
  }

  // ==========================================================================
  // Single task
  // ==========================================================================

  pub async fn task(&self, id: &str) -> Result<Loaded<ItemEnvelope<Task>>, ApiError> {
    let demo = self.demo_task(id);
    if self.is_offline() {
      return self.offline_item(id, demo);
    }

    let this = self.clone();
    let path = paths::task(id);
    let fetch = async move {
      let envelope: ItemEnvelope<Task> = decode(this.client().get(&path).await?.data)?;
      Ok::<_, ApiError>(remote(envelope, "detail"))
    };
    self.cached_or_demo("task", QueryKey::detail(id), fetch, demo).await
  }

  /// A task with its offers embedded.
  pub async fn task_offers(&self, id: &str) -> Result<Loaded<ItemEnvelope<Task>>, ApiError> {
    let demo = self.demo_task(id);
    if self.is_offline() {
      return self.offline_item(id, demo);
    }

    let this = self.clone();
    let path = paths::task_sub(id, "offers");
    let fetch = async move {
      let envelope: ItemEnvelope<Task> = decode(this.client().get(&path).await?.data)?;
      Ok::<_, ApiError>(remote(envelope, "offers"))
    };
    self.cached_or_demo("task-offers", QueryKey::offers(id), fetch, demo).await
  }

  /// Demo substitute for a single-task read, only for ids in the demo set.
  fn demo_task(&self, id: &str) -> Option<Demo<ItemEnvelope<Task>>> {
    let task = self.inner.synthetic.task(id)?;
    Some(Box::new(move || ItemEnvelope::new(task)))
  }

  fn offline_item(
    &self,
    id: &str,
    demo: Option<Demo<ItemEnvelope<Task>>>,
  ) -> Result<Loaded<ItemEnvelope<Task>>, ApiError> {
    demo
      .map(|demo| Loaded::synthetic(demo()))
      .ok_or_else(|| ApiError::NotFound(format!("task {id} is not in the demo data")))
  }

  pub async fn task_questions(&self, id: &str) -> Result<Loaded<ListEnvelope<Question>>, ApiError> {
    if self.is_offline() {
      return Ok(Loaded::synthetic(ListEnvelope::single_page(Vec::new())));
    }
    let this = self.clone();
    let path = paths::task_sub(id, "questions");
    let fetch = async move {
      let envelope: ListEnvelope<Question> = decode(this.client().get(&path).await?.data)?;
      Ok::<_, ApiError>(remote(envelope, "questions"))
    };
    self.cached(QueryKey::questions(id), fetch).await
  }

  pub async fn completion_status(&self, id: &str) -> Result<Loaded<ItemEnvelope<CompletionStatus>>, ApiError> {
    if self.is_offline() {
      return Ok(Loaded::synthetic(ItemEnvelope::new(CompletionStatus {
        task_id: id.to_string(),
        ..Default::default()
      })));
    }
    let this = self.clone();
    let path = paths::task_sub(id, "completion-status");
    let fetch = async move {
      let envelope: ItemEnvelope<CompletionStatus> = decode(this.client().get(&path).await?.data)?;
      Ok::<_, ApiError>(remote(envelope, "completion-status"))
    };
    self.cached(QueryKey::completion_status(id), fetch).await
  }

  pub async fn payment_status(&self, id: &str) -> Result<Loaded<ItemEnvelope<PaymentStatus>>, ApiError> {
    if self.is_offline() {
      return Ok(Loaded::synthetic(ItemEnvelope::new(PaymentStatus {
        task_id: id.to_string(),
        ..Default::default()
      })));
    }
    let this = self.clone();
    let path = paths::task_sub(id, "payment-status");
    let fetch = async move {
      let envelope: ItemEnvelope<PaymentStatus> = decode(this.client().get(&path).await?.data)?;
      Ok::<_, ApiError>(remote(envelope, "payment-status"))
    };
    self.cached(QueryKey::payment_status(id), fetch).await
  }

  // ==========================================================================
  // Mine
  // ==========================================================================

  /// Tasks posted by the signed-in user.
  ///
  /// Dedicated endpoint, then the full collection filtered by creator, then
  /// (server unreachable only) a demo task.
  pub async fn my_tasks(&self) -> Result<Loaded<ListEnvelope<Task>>, ApiError> {
    let synthetic = self.clone();
    let user = self.demo_user();
    let demo = move || ListEnvelope::single_page(synthetic.inner.synthetic.my_tasks(&user));
    if self.is_offline() {
      return Ok(Loaded::synthetic(demo()));
    }

    let this = self.clone();
    let fetch = async move {
      let me = this.current_user();
      let reject_empty = this.inner.empty_falls_through.my_tasks;

      Chain::new("my-tasks")
        .then(
          Strategy::new("dedicated", DataSource::Remote, async {
            let resp = this
              .client()
              .get(paths::MY_TASKS)
              .await
              .map_err(ApiError::into_session_expired)?;
            decode::<ListEnvelope<Task>>(resp.data)
          })
          .reject_empty(reject_empty, |env| env.data.is_empty())
          .fall_through_on(ApiError::is_unavailable),
        )
        .then(Strategy::new("created-by-me", DataSource::Derived, async {
          let me = me.ok_or_else(|| ApiError::Unauthorized(SIGN_IN_REQUIRED.to_string()))?;
          let mine: Vec<Task> = this
            .all_tasks()
            .await?
            .into_iter()
            .filter(|t| t.creator.id == me.id)
            .collect();
          Ok::<_, ApiError>(ListEnvelope::single_page(mine))
        }))
        .run()
        .await
    };
    self.cached_or_demo("my-tasks", QueryKey::my_tasks(), fetch, Some(Box::new(demo))).await
  }

  /// Tasks the signed-in user has bid on.
  pub async fn my_offers(&self) -> Result<Loaded<ListEnvelope<Task>>, ApiError> {
    let synthetic = self.clone();
    let user = self.demo_user();
    let demo = move || ListEnvelope::single_page(synthetic.inner.synthetic.my_offers(&user));
    if self.is_offline() {
      return Ok(Loaded::synthetic(demo()));
    }

    let this = self.clone();
    let fetch = async move {
      let me = this.current_user();
      let reject_empty = this.inner.empty_falls_through.my_offers;

      Chain::new("my-offers")
        .then(
          Strategy::new("dedicated", DataSource::Remote, async {
            decode::<ListEnvelope<Task>>(this.client().get(paths::MY_OFFERS).await?.data)
          })
          .reject_empty(reject_empty, |env| env.data.is_empty())
          .fall_through_on(ApiError::is_unavailable),
        )
        .then(Strategy::new("bid-on-by-me", DataSource::Derived, async {
          let me = me.ok_or_else(|| ApiError::Unauthorized(SIGN_IN_REQUIRED.to_string()))?;
          let mine: Vec<Task> = this
            .all_tasks()
            .await?
            .into_iter()
            .filter(|t| t.offers.iter().any(|o| o.user.id == me.id))
            .collect();
          Ok::<_, ApiError>(ListEnvelope::single_page(mine))
        }))
        .run()
        .await
    };
    self.cached_or_demo("my-offers", QueryKey::my_offers(), fetch, Some(Box::new(demo))).await
  }

  // ==========================================================================
  // Categories
  // ==========================================================================

  /// Categories with task counts.
  ///
  /// Dedicated endpoint, then labels counted over the whole task collection,
  /// then the default list with zero counts. Defaults are never cached.
  pub async fn categories(&self) -> Result<Loaded<CategoryEnvelope>, ApiError> {
    if self.is_offline() {
      return Ok(Loaded::synthetic(CategoryEnvelope::new(self.inner.synthetic.categories())));
    }

    let reject_empty = self.inner.empty_falls_through.categories;
    let this = self.clone();
    let fetch = async move {
      Chain::new("categories")
        .then(
          Strategy::new("dedicated", DataSource::Remote, async {
            decode::<CategoryEnvelope>(this.client().get(paths::CATEGORIES).await?.data)
          })
          .reject_empty(reject_empty, |env| env.data.is_empty())
          .fall_through_on(ApiError::is_unavailable),
        )
        .then(
          Strategy::new("from-tasks", DataSource::Derived, async {
            Ok::<_, ApiError>(CategoryEnvelope::new(categories_from(&this.all_tasks().await?)))
          })
          .reject_empty(true, |env| env.data.is_empty())
          .fall_through_on(ApiError::is_unavailable),
        )
        .run()
        .await
    };

    let resolved = Chain::new("categories")
      .then(
        Strategy::new("cache", DataSource::Remote, self.cached(QueryKey::categories(), fetch))
          .accept_if(move |loaded: &Loaded<CategoryEnvelope>| {
            !loaded.data.data.is_empty() || (!reject_empty && loaded.source == DataSource::Remote)
          })
          .fall_through_on(ApiError::is_unavailable),
      )
      .then(Strategy::new("defaults", DataSource::Defaults, async {
        Ok(Loaded {
          source: DataSource::Defaults,
          ..Loaded::synthetic(CategoryEnvelope::new(default_categories()))
        })
      }))
      .run()
      .await?;
    Ok(resolved.value)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::fake::FakeRemote;
  use crate::api::Method;
  use crate::cache::CacheSource;
  use crate::market::test_support::*;
  use crate::pagination::page_path;
  use pretty_assertions::assert_eq;
  use serde_json::json;
  use std::sync::Arc;

  fn all_tasks_path() -> String {
    page_path(paths::TASKS, &[], 1, 50)
  }

  #[tokio::test]
  async fn test_categories_dedicated_makes_no_further_calls() {
    let remote = Arc::new(FakeRemote::new());
    remote.ok(
      Method::Get,
      paths::CATEGORIES,
      json!({"success": true, "data": [{"name": "Moving", "count": 3}], "total": 1}),
    );
    let market = market(&remote);

    let loaded = market.categories().await.unwrap();
    assert_eq!(loaded.source, DataSource::Remote);
    assert_eq!(loaded.data.data[0].name, "Moving");
    assert_eq!(remote.calls().len(), 1);
  }

  #[tokio::test]
  async fn test_categories_derived_from_tasks() {
    let remote = Arc::new(FakeRemote::new());
    remote.ok(Method::Get, paths::CATEGORIES, json!({"success": true, "data": []}));
    remote.ok(
      Method::Get,
      &all_tasks_path(),
      list_json(vec![
        task_json("1", "u1", &["Moving", "Cleaning"]),
        task_json("2", "u2", &["Cleaning"]),
        task_json("3", "u2", &["Assembly"]),
      ]),
    );
    let market = market(&remote);

    let loaded = market.categories().await.unwrap();
    assert_eq!(loaded.source, DataSource::Derived);
    let names: Vec<(String, u64)> = loaded.data.data.into_iter().map(|c| (c.name, c.count)).collect();
    assert_eq!(
      names,
      vec![
        ("Cleaning".to_string(), 2),
        ("Assembly".to_string(), 1),
        ("Moving".to_string(), 1),
      ]
    );
  }

  #[tokio::test]
  async fn test_categories_default_when_unreachable() {
    let remote = Arc::new(FakeRemote::new());
    remote.set_offline(true);
    let market = market(&remote);

    let loaded = market.categories().await.unwrap();
    assert_eq!(loaded.source, DataSource::Defaults);
    assert_eq!(loaded.data.data, default_categories());
    assert!(market.cache().peek(&QueryKey::categories()).is_none_or(|e| e.payload.is_none()));
  }

  #[tokio::test]
  async fn test_my_tasks_empty_falls_through_to_derived() {
    let remote = Arc::new(FakeRemote::new());
    remote.ok(Method::Get, paths::MY_TASKS, json!({"success": true, "data": []}));
    remote.ok(
      Method::Get,
      &all_tasks_path(),
      list_json(vec![task_json("1", "me", &[]), task_json("2", "other", &[])]),
    );
    let market = market(&remote);
    signed_in(&market, "me");

    let loaded = market.my_tasks().await.unwrap();
    assert_eq!(loaded.source, DataSource::Derived);
    let ids: Vec<&str> = loaded.data.data.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, vec!["1"]);
  }

  #[tokio::test]
  async fn test_my_tasks_empty_is_real_when_configured() {
    let remote = Arc::new(FakeRemote::new());
    remote.ok(Method::Get, paths::MY_TASKS, json!({"success": true, "data": []}));
    let mut config = crate::config::Config::default();
    config.fallback.empty_falls_through.my_tasks = false;
    let market = market_with(&remote, config);
    signed_in(&market, "me");

    let loaded = market.my_tasks().await.unwrap();
    assert_eq!(loaded.source, DataSource::Remote);
    assert!(loaded.data.data.is_empty());
    assert_eq!(remote.calls().len(), 1);
  }

  #[tokio::test]
  async fn test_my_tasks_unauthorized_is_session_expired() {
    let remote = Arc::new(FakeRemote::new());
    remote.fail(Method::Get, paths::MY_TASKS, ApiError::Unauthorized("jwt expired".into()));
    let market = market(&remote);
    signed_in(&market, "me");

    let err = market.my_tasks().await.unwrap_err();
    assert_eq!(err, ApiError::Unauthorized(crate::api::error::SESSION_EXPIRED.to_string()));
  }

  #[tokio::test]
  async fn test_my_offers_without_session_asks_to_sign_in() {
    let remote = Arc::new(FakeRemote::new());
    remote.ok(Method::Get, &all_tasks_path(), list_json(vec![task_json("1", "u1", &[])]));
    let market = market(&remote);

    let err = market.my_offers().await.unwrap_err();
    assert_eq!(err, ApiError::Unauthorized(SIGN_IN_REQUIRED.to_string()));
  }

  #[tokio::test]
  async fn test_my_offers_demo_only_when_unreachable() {
    let remote = Arc::new(FakeRemote::new());
    remote.set_offline(true);
    let market = market(&remote);
    signed_in(&market, "me");

    let loaded = market.my_offers().await.unwrap();
    assert!(loaded.is_demo());
    assert_eq!(loaded.data.data.len(), 1);
    assert!(loaded.data.data[0].demo);
    assert_eq!(loaded.data.data[0].offers[0].user.id, "me");
  }

  #[tokio::test]
  async fn test_tasks_served_from_cache_then_last_known_good() {
    let remote = Arc::new(FakeRemote::new());
    remote.ok(Method::Get, &all_tasks_path(), list_json(vec![task_json("1", "u1", &[])]));
    let market = market(&remote);

    let first = market.tasks(&TaskFilters::default()).await.unwrap();
    assert_eq!(first.cache, CacheSource::Network);
    let second = market.tasks(&TaskFilters::default()).await.unwrap();
    assert_eq!(second.cache, CacheSource::CacheFresh);
    assert_eq!(remote.calls().len(), 1);

    market.cache().invalidate(&crate::cache::Target::kind(crate::cache::QueryKind::List));
    remote.set_offline(true);
    let third = market.tasks(&TaskFilters::default()).await.unwrap();
    assert_eq!(third.cache, CacheSource::Offline);
    assert_eq!(third.data.data[0].id, "1");
    assert!(!third.is_demo());
  }

  #[tokio::test]
  async fn test_detail_demo_only_for_demo_ids() {
    let remote = Arc::new(FakeRemote::new());
    remote.set_offline(true);
    let market = market(&remote);

    let demo = market.task("demo-task-1").await.unwrap();
    assert!(demo.is_demo());
    assert_eq!(demo.data.data.id, "demo-task-1");

    let err = market.task("abc123").await.unwrap_err();
    assert!(err.is_network());
  }

  #[tokio::test]
  async fn test_detail_not_found_is_not_substituted() {
    let remote = Arc::new(FakeRemote::new());
    let market = market(&remote);
    let err = market.task("demo-task-1").await.unwrap_err();
    assert!(err.is_not_found());
  }
}
