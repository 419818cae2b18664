//! View handles bound to the service.
//!
//! Each read gets a [`Query`] that watches the cache key its service call
//! stores under, so a write that invalidates the key makes the view refetch
//! on its next `poll`. Each write gets a [`Mutation`].

use serde_json::Value;
use std::future::Future;

use super::types::{
  CompletionStatus, Credentials, NewOffer, NewTask, Offer, OfferPatch, OtpVerification, PaymentStatus, Question,
  Session, Signup, Task, TaskFilters, TaskPatch, TaskStatus,
};
use super::{Loaded, Marketplace};
use crate::api::{ApiError, CategoryEnvelope, ItemEnvelope, ListEnvelope, MutationEnvelope};
use crate::cache::QueryKey;
use crate::query::{Mutation, Query};

type TaskList = Loaded<ListEnvelope<Task>>;
type TaskItem = Loaded<ItemEnvelope<Task>>;

impl Marketplace {
  fn query<T, F, Fut>(&self, key: QueryKey, read: F) -> Query<T>
  where
    T: Clone + Send + 'static,
    F: Fn(Marketplace) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
  {
    let market = self.clone();
    Query::new(move || read(market.clone())).watching(self.cache(), key)
  }

  fn mutation<I, O, F, Fut>(&self, write: F) -> Mutation<I, O>
  where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(Marketplace, I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, ApiError>> + Send + 'static,
  {
    let market = self.clone();
    Mutation::new(move |input| write(market.clone(), input))
  }

  // ==========================================================================
  // Reads
  // ==========================================================================

  pub fn tasks_query(&self, filters: TaskFilters) -> Query<TaskList> {
    let key = QueryKey::list(&filters);
    self.query(key, move |m| {
      let filters = filters.clone();
      async move { m.tasks(&filters).await }
    })
  }

  pub fn task_query(&self, id: impl Into<String>) -> Query<TaskItem> {
    let id = id.into();
    self.query(QueryKey::detail(id.clone()), move |m| {
      let id = id.clone();
      async move { m.task(&id).await }
    })
  }

  pub fn task_offers_query(&self, id: impl Into<String>) -> Query<TaskItem> {
    let id = id.into();
    self.query(QueryKey::offers(id.clone()), move |m| {
      let id = id.clone();
      async move { m.task_offers(&id).await }
    })
  }

  pub fn task_questions_query(&self, id: impl Into<String>) -> Query<Loaded<ListEnvelope<Question>>> {
    let id = id.into();
    self.query(QueryKey::questions(id.clone()), move |m| {
      let id = id.clone();
      async move { m.task_questions(&id).await }
    })
  }

  pub fn completion_status_query(&self, id: impl Into<String>) -> Query<Loaded<ItemEnvelope<CompletionStatus>>> {
    let id = id.into();
    self.query(QueryKey::completion_status(id.clone()), move |m| {
      let id = id.clone();
      async move { m.completion_status(&id).await }
    })
  }

  pub fn payment_status_query(&self, id: impl Into<String>) -> Query<Loaded<ItemEnvelope<PaymentStatus>>> {
    let id = id.into();
    self.query(QueryKey::payment_status(id.clone()), move |m| {
      let id = id.clone();
      async move { m.payment_status(&id).await }
    })
  }

  pub fn my_tasks_query(&self) -> Query<TaskList> {
    self.query(QueryKey::my_tasks(), |m| async move { m.my_tasks().await })
  }

  pub fn my_offers_query(&self) -> Query<TaskList> {
    self.query(QueryKey::my_offers(), |m| async move { m.my_offers().await })
  }

  pub fn categories_query(&self) -> Query<Loaded<CategoryEnvelope>> {
    self.query(QueryKey::categories(), |m| async move { m.categories().await })
  }

  // ==========================================================================
  // Writes
  // ==========================================================================

  pub fn create_task_mutation(&self) -> Mutation<NewTask, MutationEnvelope<Task>> {
    self.mutation(|m, new: NewTask| async move { m.create_task(&new).await })
  }

  pub fn update_task_mutation(&self) -> Mutation<(String, TaskPatch), MutationEnvelope<Task>> {
    self.mutation(|m, (id, patch): (String, TaskPatch)| async move { m.update_task(&id, &patch).await })
  }

  pub fn delete_task_mutation(&self) -> Mutation<String, MutationEnvelope<Value>> {
    self.mutation(|m, id: String| async move { m.delete_task(&id).await })
  }

  pub fn complete_task_mutation(&self) -> Mutation<String, MutationEnvelope<Value>> {
    self.mutation(|m, id: String| async move { m.complete_task(&id).await })
  }

  pub fn cancel_task_mutation(&self) -> Mutation<String, MutationEnvelope<Value>> {
    self.mutation(|m, id: String| async move { m.cancel_task(&id).await })
  }

  pub fn accept_task_mutation(&self) -> Mutation<String, MutationEnvelope<Value>> {
    self.mutation(|m, id: String| async move { m.accept_task(&id).await })
  }

  pub fn update_task_status_mutation(&self) -> Mutation<(String, TaskStatus), MutationEnvelope<Value>> {
    self.mutation(|m, (id, status): (String, TaskStatus)| async move { m.update_task_status(&id, status).await })
  }

  pub fn complete_payment_mutation(&self) -> Mutation<String, MutationEnvelope<Value>> {
    self.mutation(|m, id: String| async move { m.complete_payment(&id).await })
  }

  /// Input is `(task_id, offer)`.
  pub fn create_offer_mutation(&self) -> Mutation<(String, NewOffer), MutationEnvelope<Offer>> {
    self.mutation(|m, (task_id, offer): (String, NewOffer)| async move { m.create_offer(&task_id, &offer).await })
  }

  /// Input is `(task_id, offer_id)`.
  pub fn accept_offer_mutation(&self) -> Mutation<(String, String), MutationEnvelope<Value>> {
    self.mutation(|m, (task_id, offer_id): (String, String)| async move {
      m.accept_offer(&task_id, &offer_id).await
    })
  }

  pub fn update_offer_mutation(&self) -> Mutation<(String, String, OfferPatch), MutationEnvelope<Offer>> {
    self.mutation(
      |m, (task_id, offer_id, patch): (String, String, OfferPatch)| async move {
        m.update_offer(&task_id, &offer_id, &patch).await
      },
    )
  }

  /// Input is `(task_id, text)`.
  pub fn post_question_mutation(&self) -> Mutation<(String, String), MutationEnvelope<Question>> {
    self.mutation(|m, (task_id, text): (String, String)| async move { m.post_question(&task_id, &text).await })
  }

  /// Input is `(task_id, question_id, answer)`.
  pub fn answer_question_mutation(&self) -> Mutation<(String, String, String), MutationEnvelope<Question>> {
    self.mutation(
      |m, (task_id, question_id, answer): (String, String, String)| async move {
        m.answer_question(&task_id, &question_id, &answer).await
      },
    )
  }

  pub fn login_mutation(&self) -> Mutation<Credentials, Session> {
    self.mutation(|m, credentials: Credentials| async move { m.login(&credentials).await })
  }

  pub fn signup_mutation(&self) -> Mutation<Signup, Session> {
    self.mutation(|m, signup: Signup| async move { m.signup(&signup).await })
  }

  pub fn verify_otp_mutation(&self) -> Mutation<OtpVerification, Session> {
    self.mutation(|m, verification: OtpVerification| async move { m.verify_otp(&verification).await })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::fake::FakeRemote;
  use crate::api::Method;
  use crate::fallback::DataSource;
  use crate::market::paths;
  use crate::market::test_support::*;
  use crate::market::types::{DateSpec, Location, Money};
  use pretty_assertions::assert_eq;
  use serde_json::json;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Arc;
  use std::time::Duration;

  #[tokio::test]
  async fn test_offers_view_refetches_after_accept_offer() {
    let remote = Arc::new(FakeRemote::new());
    let served = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&served);
    remote.on(Method::Get, &paths::task_sub("t1", "offers"), move |_| {
      let n = counter.fetch_add(1, Ordering::SeqCst);
      let mut task = task_json("t1", "me", &[]);
      task["title"] = json!(format!("version {n}"));
      Ok(json!({"success": true, "data": task}))
    });
    remote.ok(
      Method::Get,
      &paths::task("t1"),
      json!({"success": true, "data": task_json("t1", "me", &[])}),
    );
    remote.ok(Method::Put, "/tasks/t1/offers/o1/accept", json!({"success": true, "data": {}}));
    let market = market(&remote);

    let mut offers = market.task_offers_query("t1");
    offers.fetch();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(offers.poll());
    assert_eq!(offers.data().map(|l| l.data.data.title.as_str()), Some("version 0"));

    // Nothing changed yet.
    assert!(!offers.poll());

    let accept = market.accept_offer_mutation();
    accept.mutate_async(("t1".to_string(), "o1".to_string())).await.unwrap();

    assert!(offers.poll());
    assert!(offers.is_loading());
    tokio::time::sleep(Duration::from_millis(20)).await;
    offers.poll();

    assert!(offers.is_success());
    let loaded = offers.data().unwrap();
    assert_eq!(loaded.source, DataSource::Remote);
    assert_eq!(loaded.data.data.title, "version 1");
    assert_eq!(served.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_create_task_mutation_marks_list_view_for_refetch() {
    let remote = Arc::new(FakeRemote::new());
    remote.set_offline(true);
    let market = market(&remote);

    let mut list = market.tasks_query(TaskFilters::default());
    list.fetch();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(list.poll());
    let before = list.data().unwrap().data.data.len();

    let create = market.create_task_mutation();
    let created = create
      .mutate_async(NewTask {
        title: "Hang shelves".to_string(),
        details: "Three shelves, wall plugs supplied".to_string(),
        categories: vec!["Assembly".to_string()],
        budget: Money {
          amount: 60.0,
          currency: "EUR".to_string(),
        },
        location: Location::default(),
        date: DateSpec::Flexible,
      })
      .await
      .unwrap();
    assert!(!create.is_pending());
    assert!(created.data.demo);

    assert!(list.poll());
    tokio::time::sleep(Duration::from_millis(20)).await;
    list.poll();
    let after = list.data().unwrap();
    assert!(after.is_demo());
    assert_eq!(after.data.data.len(), before + 1);
    assert_eq!(after.data.data[0].title, "Hang shelves");
  }
}
