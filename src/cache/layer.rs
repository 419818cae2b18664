//! Cache layer that orchestrates freshness, request coalescing and
//! invalidation on top of a [`CacheStore`].

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;

use super::invalidation::{Action, Invalidation, Target};
use super::key::QueryKey;
use super::storage::CacheStore;
use super::traits::{CacheEntry, CacheResult, EntryStatus};
use crate::api::ApiError;
use crate::config::FreshnessConfig;

type SharedFetch = Shared<BoxFuture<'static, Result<Value, ApiError>>>;

/// Change notifications for mounted views.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
  /// A fetch stored a new payload
  Updated(QueryKey),
  /// The entry is stale and should be refetched by anyone displaying it
  Invalidated(QueryKey),
  Removed(QueryKey),
  Reset,
}

struct InFlight {
  key: QueryKey,
  generation: u64,
  fetch: SharedFetch,
}

#[derive(Default)]
struct State {
  inflight: HashMap<String, InFlight>,
  /// Highest generation issued when each key was last invalidated. Fetches
  /// at or below it started before the invalidation.
  invalidated_at: HashMap<String, u64>,
  /// Highest generation issued when each key was last removed. Fetches at
  /// or below it must not bring the entry back.
  removed_at: HashMap<String, u64>,
  /// Highest generation issued at the last reset.
  reset_at: u64,
}

impl State {
  /// Forget the watermarks for `hash` once a fetch newer than both has
  /// been committed; older responses are then discarded by generation.
  fn settle(&mut self, hash: &str, generation: u64) {
    if self.invalidated_at.get(hash).is_some_and(|&w| generation > w) {
      self.invalidated_at.remove(hash);
    }
    if self.removed_at.get(hash).is_some_and(|&w| generation > w) {
      self.removed_at.remove(hash);
    }
  }
}

struct Inner {
  store: Arc<dyn CacheStore>,
  freshness: FreshnessConfig,
  generation: AtomicU64,
  /// Guards `State` and serializes every write to `store`.
  state: Mutex<State>,
  events: broadcast::Sender<CacheEvent>,
}

/// Query cache shared by every logical read.
///
/// Cheap to clone; clones share storage and in-flight requests.
#[derive(Clone)]
pub struct QueryCache {
  inner: Arc<Inner>,
}

impl QueryCache {
  /// Create a cache over `store`. Entries left in-flight by a previous
  /// process are demoted to stale and generations continue above the
  /// highest one stored.
  pub fn new(store: Arc<dyn CacheStore>, freshness: FreshnessConfig) -> Self {
    let mut max_generation = 0;
    match store.entries() {
      Ok(entries) => {
        for mut entry in entries {
          max_generation = max_generation.max(entry.generation);
          if entry.status == EntryStatus::InFlight {
            entry.status = EntryStatus::Stale;
            if let Err(e) = store.set(&entry) {
              tracing::warn!(key = %entry.key, error = %e, "failed to demote in-flight entry");
            }
          }
        }
      }
      Err(e) => tracing::warn!(error = %e, "failed to scan cache store"),
    }

    let (events, _) = broadcast::channel(64);
    Self {
      inner: Arc::new(Inner {
        store,
        freshness,
        generation: AtomicU64::new(max_generation),
        state: Mutex::new(State::default()),
        events,
      }),
    }
  }

  pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
    self.inner.events.subscribe()
  }

  /// Return the cached value for `key` when fresh; otherwise run `fetcher`
  /// (or join the fetch already running for `key`) and cache its result.
  ///
  /// The fetch runs on its own task: dropping this future does not cancel
  /// it, and the result still lands in the cache.
  ///
  /// If the fetch fails with [`ApiError::NetworkUnreachable`] and an older
  /// payload exists, that last-known-good payload is returned instead.
  pub async fn query<T, F, Fut>(&self, key: &QueryKey, fetcher: F) -> Result<CacheResult<T>, ApiError>
  where
    T: Serialize + DeserializeOwned + Send + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
  {
    let cached = self.inner.load(key);

    if let Some(entry) = &cached {
      if entry.is_fresh(Utc::now()) {
        if let (Some(payload), Some(at)) = (&entry.payload, entry.fetched_at) {
          match serde_json::from_value(payload.clone()) {
            Ok(data) => {
              tracing::debug!(%key, "cache hit");
              return Ok(CacheResult::from_cache(data, at));
            }
            Err(e) => tracing::warn!(%key, error = %e, "cached payload no longer decodes"),
          }
        }
      }
    }

    tracing::debug!(%key, "cache miss");
    let fetch = self.join_or_start(key, fetcher);

    match fetch.await {
      Ok(value) => Ok(CacheResult::from_network(serde_json::from_value(value)?)),
      Err(err) if err.is_network() => {
        let last_good = cached.and_then(|e| {
          let at = e.fetched_at?;
          let data = serde_json::from_value(e.payload?).ok()?;
          Some(CacheResult::offline(data, at))
        });
        match last_good {
          Some(result) => {
            tracing::warn!(%key, error = %err, "serving last-known-good data");
            Ok(result)
          }
          None => Err(err),
        }
      }
      Err(err) => Err(err),
    }
  }

  /// Current entry for `key`, as a copy.
  pub fn peek(&self, key: &QueryKey) -> Option<CacheEntry> {
    self.inner.load(key)
  }

  /// Number of fetches currently running.
  pub fn in_flight(&self) -> usize {
    self.inner.lock_state().inflight.len()
  }

  /// Mark every entry matching `target` stale and detach running fetches for
  /// them, so the next read starts a fresh request. Returns the keys hit.
  pub fn invalidate(&self, target: &Target) -> Vec<QueryKey> {
    let mut state = self.inner.lock_state();
    let watermark = self.inner.generation.load(Ordering::SeqCst);
    let mut hit = Vec::new();

    for mut entry in self.inner.entries() {
      if !target.matches(&entry.key) {
        continue;
      }
      state.invalidated_at.insert(entry.key.cache_hash(), watermark);
      if entry.status != EntryStatus::Error {
        entry.status = EntryStatus::Stale;
      }
      self.inner.save(&entry);
      hit.push(entry.key);
    }

    let detached: Vec<QueryKey> = state
      .inflight
      .values()
      .filter(|f| target.matches(&f.key))
      .map(|f| f.key.clone())
      .collect();
    for key in detached {
      let hash = key.cache_hash();
      state.invalidated_at.insert(hash.clone(), watermark);
      state.inflight.remove(&hash);
      if !hit.contains(&key) {
        hit.push(key);
      }
    }
    drop(state);

    for key in &hit {
      tracing::debug!(%key, "invalidated");
      self.inner.emit(CacheEvent::Invalidated(key.clone()));
    }
    hit
  }

  /// Drop every entry matching `target`.
  pub fn remove(&self, target: &Target) -> Vec<QueryKey> {
    let mut state = self.inner.lock_state();
    let watermark = self.inner.generation.load(Ordering::SeqCst);
    let mut removed = Vec::new();

    for entry in self.inner.entries() {
      if target.matches(&entry.key) {
        if let Err(e) = self.inner.store.remove(&entry.key) {
          tracing::warn!(key = %entry.key, error = %e, "failed to remove cache entry");
        }
        state.removed_at.insert(entry.key.cache_hash(), watermark);
        removed.push(entry.key);
      }
    }
    let hashes: Vec<String> = state
      .inflight
      .iter()
      .filter(|(_, f)| target.matches(&f.key))
      .map(|(h, _)| h.clone())
      .collect();
    for hash in hashes {
      state.removed_at.insert(hash.clone(), watermark);
      state.inflight.remove(&hash);
    }
    drop(state);

    for key in &removed {
      self.inner.emit(CacheEvent::Removed(key.clone()));
    }
    removed
  }

  /// Apply the invalidation table for a successful write. Returns the keys
  /// flagged for an eager refetch that were present in the cache.
  pub fn apply(&self, invalidation: &Invalidation) -> Vec<QueryKey> {
    tracing::debug!(mutation = ?invalidation.kind, task = ?invalidation.task_id, "applying invalidation");
    let mut eager = Vec::new();
    for (target, action) in invalidation.targets() {
      match action {
        Action::Invalidate => {
          self.invalidate(&target);
        }
        Action::Refetch => eager.extend(self.invalidate(&target)),
        Action::Remove => {
          self.remove(&target);
        }
      }
    }
    eager
  }

  /// Drop everything, including running fetches' claim on the cache.
  pub fn reset(&self) {
    let mut state = self.inner.lock_state();
    state.reset_at = self.inner.generation.load(Ordering::SeqCst);
    state.invalidated_at.clear();
    state.removed_at.clear();
    state.inflight.clear();
    if let Err(e) = self.inner.store.clear() {
      tracing::warn!(error = %e, "failed to clear cache store");
    }
    drop(state);
    self.inner.emit(CacheEvent::Reset);
  }

  fn join_or_start<T, F, Fut>(&self, key: &QueryKey, fetcher: F) -> SharedFetch
  where
    T: Serialize + Send + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
  {
    let hash = key.cache_hash();
    // Held across spawn + insert so the task cannot commit before it is
    // registered as in flight.
    let mut state = self.inner.lock_state();

    if let Some(running) = state.inflight.get(&hash) {
      tracing::debug!(%key, generation = running.generation, "joining in-flight fetch");
      return running.fetch.clone();
    }

    let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
    let fut = fetcher();
    let inner = Arc::clone(&self.inner);
    let task_key = key.clone();

    let handle = tokio::spawn(async move {
      let result = fut
        .await
        .and_then(|data| serde_json::to_value(data).map_err(ApiError::from));
      inner.commit(&task_key, generation, &result);
      result
    });

    let fetch = async move {
      handle
        .await
        .unwrap_or_else(|e| Err(ApiError::unknown(format!("fetch task failed: {e}"))))
    }
    .boxed()
    .shared();

    state.inflight.insert(
      hash,
      InFlight {
        key: key.clone(),
        generation,
        fetch: fetch.clone(),
      },
    );
    if let Some(mut entry) = self.inner.load(key) {
      entry.status = EntryStatus::InFlight;
      self.inner.save(&entry);
    }
    tracing::debug!(%key, generation, "started fetch");

    fetch
  }
}

impl Inner {
  fn lock_state(&self) -> MutexGuard<'_, State> {
    // State is only ever left consistent between statements; recover it.
    self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  fn load(&self, key: &QueryKey) -> Option<CacheEntry> {
    self.store.get(key).unwrap_or_else(|e| {
      tracing::warn!(%key, error = %e, "cache read failed");
      None
    })
  }

  fn entries(&self) -> Vec<CacheEntry> {
    self.store.entries().unwrap_or_else(|e| {
      tracing::warn!(error = %e, "cache scan failed");
      Vec::new()
    })
  }

  fn save(&self, entry: &CacheEntry) {
    if let Err(e) = self.store.set(entry) {
      tracing::warn!(key = %entry.key, error = %e, "cache write failed");
    }
  }

  fn emit(&self, event: CacheEvent) {
    // No subscribers is fine.
    let _ = self.events.send(event);
  }

  /// Store the outcome of fetch `generation` for `key`.
  ///
  /// A result older than what is stored is dropped, as is one from a fetch
  /// that started before the key was removed or the cache was reset. A
  /// result from a fetch that started before the key's last invalidation is
  /// kept but stale.
  fn commit(&self, key: &QueryKey, generation: u64, result: &Result<Value, ApiError>) {
    let hash = key.cache_hash();
    let mut state = self.lock_state();

    if state
      .inflight
      .get(&hash)
      .is_some_and(|f| f.generation == generation)
    {
      state.inflight.remove(&hash);
    }

    let predates_removal = generation <= state.reset_at
      || state
        .removed_at
        .get(&hash)
        .is_some_and(|&watermark| generation <= watermark);
    if predates_removal {
      tracing::debug!(%key, generation, "discarding response for removed entry");
      return;
    }

    let existing = self.load(key);
    if let Some(current) = &existing {
      if current.generation > generation {
        tracing::debug!(%key, generation, stored = current.generation, "discarding superseded response");
        return;
      }
    }

    let predates_invalidation = state
      .invalidated_at
      .get(&hash)
      .is_some_and(|&watermark| generation <= watermark);

    let entry = match result {
      Ok(value) => CacheEntry {
        key: key.clone(),
        payload: Some(value.clone()),
        fetched_at: Some(Utc::now()),
        freshness: self.freshness.window(key.kind),
        status: if predates_invalidation {
          EntryStatus::Stale
        } else {
          EntryStatus::Fresh
        },
        generation,
        last_error: None,
      },
      Err(err) => {
        tracing::debug!(%key, error = %err, "fetch failed");
        match existing {
          Some(previous) => CacheEntry {
            status: EntryStatus::Error,
            generation,
            last_error: Some(err.to_string()),
            ..previous
          },
          None => CacheEntry {
            key: key.clone(),
            payload: None,
            fetched_at: None,
            freshness: self.freshness.window(key.kind),
            status: EntryStatus::Error,
            generation,
            last_error: Some(err.to_string()),
          },
        }
      }
    };

    self.save(&entry);
    state.settle(&hash, generation);
    drop(state);

    if result.is_ok() {
      self.emit(CacheEvent::Updated(key.clone()));
    }
  }
}
