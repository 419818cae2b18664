//! Core types for the caching system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use super::key::QueryKey;

/// Lifecycle state of a cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryStatus {
  Fresh,
  Stale,
  InFlight,
  Error,
}

impl EntryStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      EntryStatus::Fresh => "fresh",
      EntryStatus::Stale => "stale",
      EntryStatus::InFlight => "in-flight",
      EntryStatus::Error => "error",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "fresh" => Some(EntryStatus::Fresh),
      "stale" => Some(EntryStatus::Stale),
      "in-flight" => Some(EntryStatus::InFlight),
      "error" => Some(EntryStatus::Error),
      _ => None,
    }
  }
}

/// One cached logical read.
///
/// `payload` is `None` only when the very first fetch failed. A later failure
/// keeps the last-known-good payload and just flips the status.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
  pub key: QueryKey,
  pub payload: Option<Value>,
  pub fetched_at: Option<DateTime<Utc>>,
  pub freshness: Duration,
  pub status: EntryStatus,
  /// Generation of the fetch that last wrote this entry
  pub generation: u64,
  pub last_error: Option<String>,
}

impl CacheEntry {
  /// Servable without a refetch: marked fresh and younger than its window.
  pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
    if self.status != EntryStatus::Fresh || self.payload.is_none() {
      return false;
    }
    match self.fetched_at {
      // A negative age (clock moved back) still counts as just fetched.
      Some(at) => (now - at).to_std().map_or(true, |age| age < self.freshness),
      None => false,
    }
  }
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from cached data.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::CacheFresh,
      cached_at: Some(cached_at),
    }
  }

  /// Last-known-good data served because the refresh could not reach the server.
  pub fn offline(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at: Some(cached_at),
    }
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from a fetch
  Network,
  /// Data from cache, still considered fresh
  CacheFresh,
  /// Offline mode - server unreachable, serving last-known-good data
  Offline,
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Duration as ChronoDuration;

  fn entry(status: EntryStatus, age_secs: i64) -> CacheEntry {
    CacheEntry {
      key: QueryKey::categories(),
      payload: Some(Value::Null),
      fetched_at: Some(Utc::now() - ChronoDuration::seconds(age_secs)),
      freshness: Duration::from_secs(60),
      status,
      generation: 1,
      last_error: None,
    }
  }

  #[test]
  fn test_freshness_window() {
    assert!(entry(EntryStatus::Fresh, 10).is_fresh(Utc::now()));
    assert!(!entry(EntryStatus::Fresh, 120).is_fresh(Utc::now()));
    assert!(!entry(EntryStatus::Stale, 10).is_fresh(Utc::now()));
    assert!(!entry(EntryStatus::Error, 10).is_fresh(Utc::now()));
  }

  #[test]
  fn test_missing_payload_is_never_fresh() {
    let mut e = entry(EntryStatus::Fresh, 0);
    e.payload = None;
    assert!(!e.is_fresh(Utc::now()));
  }

  #[test]
  fn test_status_strings() {
    for status in [
      EntryStatus::Fresh,
      EntryStatus::Stale,
      EntryStatus::InFlight,
      EntryStatus::Error,
    ] {
      assert_eq!(EntryStatus::parse(status.as_str()), Some(status));
    }
  }
}
