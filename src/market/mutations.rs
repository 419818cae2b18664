//! Writes. Each successful write is reflected in the cache through the
//! invalidation table before returning.

use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use super::paths;
use super::types::{NewOffer, NewTask, Offer, OfferPatch, Question, Task, TaskPatch, TaskStatus};
use super::Marketplace;
use crate::api::envelope::decode;
use crate::api::{ApiError, Method, MutationEnvelope};
use crate::cache::{Invalidation, MutationKind};
use crate::fallback::{Chain, DataSource, Strategy};

impl Marketplace {
  async fn send<T: DeserializeOwned>(
    &self,
    method: Method,
    path: &str,
    body: Option<Value>,
  ) -> Result<MutationEnvelope<T>, ApiError> {
    if self.is_offline() {
      return Err(ApiError::NetworkUnreachable("offline mode".to_string()));
    }
    decode(self.client().request(method, path, body).await?.data)
  }

  async fn write<T: DeserializeOwned>(
    &self,
    method: Method,
    path: &str,
    body: Option<Value>,
    invalidation: Invalidation,
  ) -> Result<MutationEnvelope<T>, ApiError> {
    let envelope = self.send(method, path, body).await?;
    tracing::debug!(path, mutation = ?invalidation.kind, "write succeeded");
    self.after_write(invalidation);
    Ok(envelope)
  }

  // ==========================================================================
  // Tasks
  // ==========================================================================

  /// Post a task. When the server cannot be reached the task is created
  /// locally as a demo record; any other failure is returned as is.
  pub async fn create_task(&self, new: &NewTask) -> Result<MutationEnvelope<Task>, ApiError> {
    let body = serde_json::to_value(new)?;
    let resolved = Chain::new("create-task")
      .then(
        Strategy::new("server", DataSource::Remote, self.send(Method::Post, paths::TASKS, Some(body)))
          .fall_through_on(ApiError::is_network),
      )
      .then(
        Strategy::new("demo", DataSource::Synthetic, async {
          let task = self.inner.synthetic.create_task(new, &self.demo_user());
          Ok(MutationEnvelope::demo(task))
        })
        .only_after(ApiError::is_network),
      )
      .run()
      .await?;

    self.after_write(Invalidation::new(MutationKind::CreateTask));
    Ok(resolved.value)
  }

  pub async fn update_task(&self, id: &str, patch: &TaskPatch) -> Result<MutationEnvelope<Task>, ApiError> {
    let body = serde_json::to_value(patch)?;
    self
      .write(
        Method::Put,
        &paths::task(id),
        Some(body),
        Invalidation::for_task(MutationKind::UpdateTask, id),
      )
      .await
  }

  pub async fn delete_task(&self, id: &str) -> Result<MutationEnvelope<Value>, ApiError> {
    self
      .write(
        Method::Delete,
        &paths::task(id),
        None,
        Invalidation::for_task(MutationKind::DeleteTask, id),
      )
      .await
  }

  pub async fn complete_task(&self, id: &str) -> Result<MutationEnvelope<Value>, ApiError> {
    self.task_transition(id, "complete", MutationKind::CompleteTask).await
  }

  pub async fn cancel_task(&self, id: &str) -> Result<MutationEnvelope<Value>, ApiError> {
    self.task_transition(id, "cancel", MutationKind::CancelTask).await
  }

  /// Taker's acceptance of an assigned task.
  pub async fn accept_task(&self, id: &str) -> Result<MutationEnvelope<Value>, ApiError> {
    self.task_transition(id, "accept", MutationKind::AcceptTask).await
  }

  async fn task_transition(
    &self,
    id: &str,
    action: &str,
    kind: MutationKind,
  ) -> Result<MutationEnvelope<Value>, ApiError> {
    self
      .write(Method::Put, &paths::task_sub(id, action), None, Invalidation::for_task(kind, id))
      .await
  }

  pub async fn update_task_status(&self, id: &str, status: TaskStatus) -> Result<MutationEnvelope<Value>, ApiError> {
    self
      .write(
        Method::Patch,
        &paths::task_sub(id, "status"),
        Some(json!({ "status": status })),
        Invalidation::for_task(MutationKind::UpdateStatus, id),
      )
      .await
  }

  pub async fn complete_payment(&self, id: &str) -> Result<MutationEnvelope<Value>, ApiError> {
    self
      .write(
        Method::Post,
        &paths::task_sub(id, "payment/complete"),
        Some(json!({})),
        Invalidation::for_task(MutationKind::CompletePayment, id),
      )
      .await
  }

  // ==========================================================================
  // Offers
  // ==========================================================================

  /// Bid on a task. In offline mode, bids on demo tasks are kept locally.
  pub async fn create_offer(&self, task_id: &str, offer: &NewOffer) -> Result<MutationEnvelope<Offer>, ApiError> {
    if self.is_offline() && self.inner.synthetic.contains(task_id) {
      let created = self.inner.synthetic.create_offer(task_id, offer, &self.demo_user());
      self.after_write(Invalidation::for_task(MutationKind::CreateOffer, task_id));
      return Ok(MutationEnvelope::demo(created));
    }

    let body = serde_json::to_value(offer)?;
    self
      .write(
        Method::Post,
        &paths::task_sub(task_id, "offers"),
        Some(body),
        Invalidation::for_task(MutationKind::CreateOffer, task_id),
      )
      .await
  }

  pub async fn accept_offer(&self, task_id: &str, offer_id: &str) -> Result<MutationEnvelope<Value>, ApiError> {
    self
      .write(
        Method::Put,
        &paths::task_sub(task_id, &format!("offers/{offer_id}/accept")),
        None,
        Invalidation::for_task(MutationKind::AcceptOffer, task_id),
      )
      .await
  }

  pub async fn update_offer(
    &self,
    task_id: &str,
    offer_id: &str,
    patch: &OfferPatch,
  ) -> Result<MutationEnvelope<Offer>, ApiError> {
    let body = serde_json::to_value(patch)?;
    self
      .write(
        Method::Put,
        &paths::task_sub(task_id, &format!("offers/{offer_id}")),
        Some(body),
        Invalidation::for_task(MutationKind::UpdateOffer, task_id),
      )
      .await
  }

  // ==========================================================================
  // Questions
  // ==========================================================================

  pub async fn post_question(&self, task_id: &str, text: &str) -> Result<MutationEnvelope<Question>, ApiError> {
    self
      .write(
        Method::Post,
        &paths::task_sub(task_id, "questions"),
        Some(json!({ "text": text })),
        Invalidation::for_task(MutationKind::PostQuestion, task_id),
      )
      .await
  }

  pub async fn answer_question(
    &self,
    task_id: &str,
    question_id: &str,
    answer: &str,
  ) -> Result<MutationEnvelope<Question>, ApiError> {
    self
      .write(
        Method::Post,
        &paths::task_sub(task_id, &format!("questions/{question_id}/answer")),
        Some(json!({ "answer": answer })),
        Invalidation::for_task(MutationKind::AnswerQuestion, task_id),
      )
      .await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::fake::FakeRemote;
  use crate::cache::{EntryStatus, QueryKey};
  use crate::market::test_support::*;
  use crate::market::types::{DateSpec, Location, Money, TaskFilters};
  use crate::pagination::page_path;
  use pretty_assertions::assert_eq;
  use std::sync::{Arc, Mutex};

  fn new_task() -> NewTask {
    NewTask {
      title: "Paint the fence".to_string(),
      details: "About 20 metres, paint supplied".to_string(),
      categories: vec!["Painting".to_string()],
      budget: Money {
        amount: 120.0,
        currency: "EUR".to_string(),
      },
      location: Location::default(),
      date: DateSpec::Flexible,
    }
  }

  /// A server that lists whatever was posted to it.
  fn task_server(remote: &FakeRemote) {
    let stored: Arc<Mutex<Vec<Value>>> = Arc::default();
    let posted = Arc::clone(&stored);
    remote.on(Method::Post, paths::TASKS, move |body| {
      let mut task = body.cloned().unwrap_or_default();
      let mut tasks = posted.lock().unwrap();
      task["_id"] = json!(format!("srv-{}", tasks.len() + 1));
      task["creator"] = json!({"_id": "me", "name": "Me"});
      tasks.push(task.clone());
      Ok(json!({"success": true, "data": task}))
    });
    remote.on(Method::Get, &page_path(paths::TASKS, &[], 1, 50), move |_| {
      Ok(list_json(stored.lock().unwrap().clone()))
    });
  }

  #[tokio::test]
  async fn test_create_task_then_list_round_trip() {
    let remote = Arc::new(FakeRemote::new());
    task_server(&remote);
    let market = market(&remote);

    assert!(market.tasks(&TaskFilters::default()).await.unwrap().data.data.is_empty());

    let created = market.create_task(&new_task()).await.unwrap();
    assert!(!created.demo);

    let listed = market.tasks(&TaskFilters::default()).await.unwrap().data.data;
    assert_eq!(listed.len(), 1);
    let task = &listed[0];
    assert_eq!(task.title, "Paint the fence");
    assert_eq!(task.details, "About 20 metres, paint supplied");
    assert_eq!(task.budget.amount, 120.0);
    assert_eq!(task.budget.currency, "EUR");
  }

  #[tokio::test]
  async fn test_create_task_demo_when_unreachable() {
    let remote = Arc::new(FakeRemote::new());
    remote.set_offline(true);
    let market = market(&remote);

    let created = market.create_task(&new_task()).await.unwrap();
    assert!(created.demo);
    assert!(created.data.demo);

    let listed = market.tasks(&TaskFilters::default()).await.unwrap();
    assert!(listed.is_demo());
    assert_eq!(listed.data.data[0].title, "Paint the fence");
  }

  #[tokio::test]
  async fn test_unauthorized_write_is_never_demo() {
    let remote = Arc::new(FakeRemote::new());
    remote.fail(Method::Post, paths::TASKS, ApiError::Unauthorized("no token".into()));
    let market = market(&remote);

    let err = market.create_task(&new_task()).await.unwrap_err();
    assert_eq!(err, ApiError::Unauthorized("no token".into()));
    assert_eq!(market.inner.synthetic.tasks(&TaskFilters::default()).len(), 12);
  }

  #[tokio::test]
  async fn test_validation_message_surfaces_verbatim() {
    let remote = Arc::new(FakeRemote::new());
    remote.fail(
      Method::Post,
      paths::TASKS,
      ApiError::from_status(400, &json!({"message": "Budget must be positive"})),
    );
    let market = market(&remote);

    let err = market.create_task(&new_task()).await.unwrap_err();
    assert_eq!(err.to_string(), "validation failed: Budget must be positive");
  }

  #[tokio::test]
  async fn test_accept_offer_refreshes_dependent_views() {
    let remote = Arc::new(FakeRemote::new());
    let task = task_json("t1", "me", &["Moving"]);
    remote.ok(Method::Get, &paths::task("t1"), json!({"success": true, "data": task.clone()}));
    remote.ok(Method::Get, &paths::task_sub("t1", "offers"), json!({"success": true, "data": task.clone()}));
    remote.ok(Method::Get, paths::MY_TASKS, list_json(vec![task.clone()]));
    remote.ok(Method::Get, paths::MY_OFFERS, list_json(vec![task_json("t9", "other", &[])]));
    remote.ok(Method::Put, "/tasks/t1/offers/o1/accept", json!({"success": true, "data": {}}));
    let market = market(&remote);
    signed_in(&market, "me");

    market.task("t1").await.unwrap();
    market.task_offers("t1").await.unwrap();
    market.my_tasks().await.unwrap();
    market.my_offers().await.unwrap();

    market.accept_offer("t1", "o1").await.unwrap();

    // Detail and offers are refetched right away.
    wait_for_calls(&remote, Method::Get, "/tasks/t1", 2).await;
    wait_for_calls(&remote, Method::Get, "/tasks/t1/offers", 2).await;

    // The lists are stale and refetch on the next read.
    for key in [QueryKey::my_tasks(), QueryKey::my_offers()] {
      assert_eq!(market.cache().peek(&key).unwrap().status, EntryStatus::Stale);
    }
    market.my_tasks().await.unwrap();
    market.my_offers().await.unwrap();
    assert_eq!(remote.call_count(Method::Get, paths::MY_TASKS), 2);
    assert_eq!(remote.call_count(Method::Get, paths::MY_OFFERS), 2);
  }

  #[tokio::test]
  async fn test_delete_drops_cached_detail() {
    let remote = Arc::new(FakeRemote::new());
    remote.ok(
      Method::Get,
      &paths::task("t1"),
      json!({"success": true, "data": task_json("t1", "me", &[])}),
    );
    remote.ok(Method::Delete, &paths::task("t1"), json!({"success": true, "data": null}));
    let market = market(&remote);

    market.task("t1").await.unwrap();
    assert!(market.cache().peek(&QueryKey::detail("t1")).is_some());

    market.delete_task("t1").await.unwrap();
    assert!(market.cache().peek(&QueryKey::detail("t1")).is_none());
  }

  #[tokio::test]
  async fn test_failed_write_leaves_cache_alone() {
    let remote = Arc::new(FakeRemote::new());
    remote.ok(
      Method::Get,
      &paths::task("t1"),
      json!({"success": true, "data": task_json("t1", "me", &[])}),
    );
    remote.fail(Method::Put, "/tasks/t1/complete", ApiError::unknown("boom"));
    let market = market(&remote);

    market.task("t1").await.unwrap();
    assert!(market.complete_task("t1").await.is_err());
    assert_eq!(
      market.cache().peek(&QueryKey::detail("t1")).unwrap().status,
      EntryStatus::Fresh
    );
  }
}
