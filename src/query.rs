//! Async query and mutation handles for views.
//!
//! Inspired by TanStack Query, `Query<T>` encapsulates async data fetching,
//! loading states, and error handling. A query can watch a [`QueryCache`]
//! key: when a write invalidates that key, the query refetches on its next
//! `poll` without any user action.
//!
//! # Example
//!
//! ```ignore
//! // Same as Query::new(..).watching(market.cache(), QueryKey::my_tasks())
//! let mut query = market.my_tasks_query();
//!
//! query.fetch();
//!
//! // In event loop tick
//! if query.poll() {
//!     // State changed, trigger re-render
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};

use crate::api::ApiError;
use crate::cache::{CacheEvent, QueryCache, QueryKey};

/// The state of a query
#[derive(Debug, Clone)]
pub enum QueryState<T> {
  /// Query has not been started
  Idle,
  /// Query is currently fetching data
  Loading,
  /// Query completed successfully
  Success(T),
  /// Query failed with an error
  Error(ApiError),
}

impl<T> QueryState<T> {
  pub fn is_loading(&self) -> bool {
    matches!(self, QueryState::Loading)
  }

  pub fn is_success(&self) -> bool {
    matches!(self, QueryState::Success(_))
  }

  pub fn is_error(&self) -> bool {
    matches!(self, QueryState::Error(_))
  }

  pub fn data(&self) -> Option<&T> {
    match self {
      QueryState::Success(data) => Some(data),
      _ => None,
    }
  }

  pub fn error(&self) -> Option<&ApiError> {
    match self {
      QueryState::Error(e) => Some(e),
      _ => None,
    }
  }
}

type BoxFuture<T> = Pin<Box<dyn Future<Output = Result<T, ApiError>> + Send>>;

type FetcherFn<T> = Box<dyn Fn() -> BoxFuture<T> + Send + Sync>;

struct Watch {
  key: QueryKey,
  events: broadcast::Receiver<CacheEvent>,
}

/// Async query for data fetching with state management.
pub struct Query<T> {
  state: QueryState<T>,
  /// Last successful data, kept while a refetch is loading or failed
  last_data: Option<T>,
  fetcher: FetcherFn<T>,
  receiver: Option<mpsc::UnboundedReceiver<Result<T, ApiError>>>,
  fetched_at: Option<Instant>,
  stale_time: Duration,
  invalidated: bool,
  watch: Option<Watch>,
}

impl<T: Clone + Send + 'static> Query<T> {
  /// Create a new query with the given fetcher function.
  ///
  /// The fetcher is called each time `fetch()` or `refetch()` is invoked.
  pub fn new<F, Fut>(fetcher: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
  {
    Self {
      state: QueryState::Idle,
      last_data: None,
      fetcher: Box::new(move || Box::pin(fetcher())),
      receiver: None,
      fetched_at: None,
      stale_time: Duration::from_secs(60), // Default 1 minute
      invalidated: false,
      watch: None,
    }
  }

  /// Set the stale time for this query.
  ///
  /// After this duration, the data is considered stale and `is_stale()` returns true.
  pub fn with_stale_time(mut self, duration: Duration) -> Self {
    self.stale_time = duration;
    self
  }

  /// Follow cache notifications for `key`: invalidation, removal and resets
  /// trigger a refetch on the next `poll`, as does a value stored by
  /// someone else's fetch.
  pub fn watching(mut self, cache: &QueryCache, key: QueryKey) -> Self {
    self.watch = Some(Watch {
      key,
      events: cache.subscribe(),
    });
    self
  }

  pub fn state(&self) -> &QueryState<T> {
    &self.state
  }

  /// Current data, or the previous data while a refetch is in progress.
  pub fn data(&self) -> Option<&T> {
    self.state.data().or(self.last_data.as_ref())
  }

  pub fn is_loading(&self) -> bool {
    self.state.is_loading()
  }

  pub fn is_success(&self) -> bool {
    self.state.is_success()
  }

  pub fn is_error(&self) -> bool {
    self.state.is_error()
  }

  pub fn error(&self) -> Option<&ApiError> {
    self.state.error()
  }

  /// Check if the data is stale: older than stale_time, or invalidated.
  pub fn is_stale(&self) -> bool {
    match &self.state {
      QueryState::Success(_) => {
        self.invalidated
          || self
            .fetched_at
            .map(|t| t.elapsed() > self.stale_time)
            .unwrap_or(true)
      }
      _ => false,
    }
  }

  /// Start fetching data if not already loading.
  ///
  /// This is a no-op if the query is already loading.
  pub fn fetch(&mut self) {
    if self.state.is_loading() {
      return;
    }
    self.start_fetch();
  }

  /// Force a refetch, even if already loading or data exists.
  pub fn refetch(&mut self) {
    // Cancel any pending fetch by dropping the receiver
    self.receiver = None;
    self.start_fetch();
  }

  /// Poll for cache notifications and results from a pending fetch.
  ///
  /// Returns `true` if the state changed (data arrived or error occurred,
  /// or a refetch started). Call this in your event loop tick handler.
  pub fn poll(&mut self) -> bool {
    let mut changed = false;
    if self.drain_events() {
      self.invalidated = true;
      self.refetch();
      changed = true;
    }

    let receiver = match &mut self.receiver {
      Some(rx) => rx,
      None => return changed,
    };

    // Try to receive without blocking
    match receiver.try_recv() {
      Ok(Ok(data)) => {
        self.last_data = Some(data.clone());
        self.state = QueryState::Success(data);
        self.fetched_at = Some(Instant::now());
        self.invalidated = false;
        self.receiver = None;
        true
      }
      Ok(Err(error)) => {
        self.state = QueryState::Error(error);
        self.receiver = None;
        true
      }
      Err(mpsc::error::TryRecvError::Empty) => changed,
      Err(mpsc::error::TryRecvError::Disconnected) => {
        // Sender dropped without sending - treat as error
        self.state = QueryState::Error(ApiError::unknown("query was cancelled"));
        self.receiver = None;
        true
      }
    }
  }

  /// Whether any pending cache event concerns the watched key.
  fn drain_events(&mut self) -> bool {
    let loading = self.state.is_loading();
    let Some(watch) = &mut self.watch else {
      return false;
    };

    let mut relevant = false;
    loop {
      match watch.events.try_recv() {
        Ok(CacheEvent::Invalidated(key)) | Ok(CacheEvent::Removed(key)) => {
          relevant |= key == watch.key;
        }
        // Our own fetch stores while we are loading; only others' count.
        Ok(CacheEvent::Updated(key)) => relevant |= key == watch.key && !loading,
        Ok(CacheEvent::Reset) => relevant = true,
        Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
          tracing::debug!(key = %watch.key, skipped, "cache events lagged");
          relevant = true;
        }
        Err(broadcast::error::TryRecvError::Empty) | Err(broadcast::error::TryRecvError::Closed) => break,
      }
    }
    relevant
  }

  /// Internal: start the fetch operation
  fn start_fetch(&mut self) {
    let (tx, rx) = mpsc::unbounded_channel();
    self.receiver = Some(rx);
    self.state = QueryState::Loading;

    let future = (self.fetcher)();
    tokio::spawn(async move {
      let result = future.await;
      // Ignore send errors - receiver may have been dropped
      let _ = tx.send(result);
    });
  }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Query<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Query")
      .field("state", &self.state)
      .field("fetched_at", &self.fetched_at)
      .field("stale_time", &self.stale_time)
      .finish_non_exhaustive()
  }
}

// ============================================================================
// Mutation
// ============================================================================

type MutatorFn<I, O> = Box<dyn Fn(I) -> BoxFuture<O> + Send + Sync>;

/// Write handle. Cache invalidation happens inside the service call, so a
/// mutation only tracks whether a call is in progress.
pub struct Mutation<I, O> {
  mutator: MutatorFn<I, O>,
  pending: Arc<AtomicUsize>,
}

struct PendingGuard(Arc<AtomicUsize>);

impl Drop for PendingGuard {
  fn drop(&mut self) {
    self.0.fetch_sub(1, Ordering::SeqCst);
  }
}

impl<I, O> Mutation<I, O>
where
  I: Send + 'static,
  O: Send + 'static,
{
  pub fn new<F, Fut>(mutator: F) -> Self
  where
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, ApiError>> + Send + 'static,
  {
    Self {
      mutator: Box::new(move |input| Box::pin(mutator(input))),
      pending: Arc::new(AtomicUsize::new(0)),
    }
  }

  pub async fn mutate_async(&self, input: I) -> Result<O, ApiError> {
    self.pending.fetch_add(1, Ordering::SeqCst);
    let _guard = PendingGuard(Arc::clone(&self.pending));
    (self.mutator)(input).await
  }

  pub fn is_pending(&self) -> bool {
    self.pending.load(Ordering::SeqCst) > 0
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{MemoryStore, QueryKind, Target};
  use crate::config::FreshnessConfig;

  #[tokio::test]
  async fn test_query_success() {
    let mut query = Query::new(|| async { Ok(vec![1, 2, 3]) });

    assert!(matches!(query.state(), QueryState::Idle));

    query.fetch();
    assert!(query.is_loading());

    // Wait for the result
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(query.poll());
    assert!(query.is_success());
    assert_eq!(query.data(), Some(&vec![1, 2, 3]));
  }

  #[tokio::test]
  async fn test_query_error() {
    let mut query: Query<i32> = Query::new(|| async { Err(ApiError::Validation("Title is required".to_string())) });

    query.fetch();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(query.poll());
    assert!(query.is_error());
    assert_eq!(query.error().map(|e| e.to_string()).as_deref(), Some("validation failed: Title is required"));
  }

  #[tokio::test]
  async fn test_query_stale() {
    let mut query = Query::new(|| async { Ok(42) }).with_stale_time(Duration::ZERO);

    query.fetch();
    tokio::time::sleep(Duration::from_millis(10)).await;
    query.poll();

    // With zero stale time, should immediately be stale
    assert!(query.is_stale());
  }

  #[tokio::test]
  async fn test_fetch_while_loading_is_noop() {
    let mut query = Query::new(|| async {
      tokio::time::sleep(Duration::from_millis(100)).await;
      Ok(42)
    });

    query.fetch();
    assert!(query.is_loading());

    // Second fetch should be no-op
    query.fetch();
    assert!(query.is_loading());
  }

  #[tokio::test]
  async fn test_refetch_cancels_pending() {
    let counter = Arc::new(AtomicUsize::new(0));
    let counter_clone = counter.clone();

    let mut query = Query::new(move || {
      let counter = counter_clone.clone();
      async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(counter.fetch_add(1, Ordering::SeqCst))
      }
    });

    query.fetch();
    tokio::time::sleep(Duration::from_millis(10)).await;

    // Refetch should cancel the first and start a new one
    query.refetch();
    tokio::time::sleep(Duration::from_millis(100)).await;

    query.poll();
    // Only the second fetch should have completed and been received
    assert_eq!(query.data(), Some(&1));
  }

  #[tokio::test]
  async fn test_watched_query_refetches_on_invalidation() {
    let cache = QueryCache::new(Arc::new(MemoryStore::new()), FreshnessConfig::default());
    let counter = Arc::new(AtomicUsize::new(0));

    let fetch_cache = cache.clone();
    let fetch_counter = counter.clone();
    let mut query = Query::new(move || {
      let cache = fetch_cache.clone();
      let counter = fetch_counter.clone();
      async move {
        let result = cache
          .query(&QueryKey::my_tasks(), move || async move {
            Ok(counter.fetch_add(1, Ordering::SeqCst))
          })
          .await?;
        Ok(result.data)
      }
    })
    .watching(&cache, QueryKey::my_tasks());

    query.fetch();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(query.poll());
    assert_eq!(query.data(), Some(&0));

    // Nothing happened to the key: no change.
    assert!(!query.poll());

    cache.invalidate(&Target::kind(QueryKind::MyTasks));
    assert!(query.poll());
    assert!(query.is_loading());
    // Previous data stays visible while refetching.
    assert_eq!(query.data(), Some(&0));

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(query.poll());
    assert_eq!(query.data(), Some(&1));
    assert!(!query.is_stale());
  }

  #[tokio::test]
  async fn test_mutation_pending() {
    let mutation = Arc::new(Mutation::new(|n: u32| async move {
      tokio::time::sleep(Duration::from_millis(20)).await;
      Ok(n * 2)
    }));
    assert!(!mutation.is_pending());

    let running = Arc::clone(&mutation);
    let handle = tokio::spawn(async move { running.mutate_async(21).await });
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert!(mutation.is_pending());

    assert_eq!(handle.await.unwrap(), Ok(42));
    assert!(!mutation.is_pending());
  }
}
