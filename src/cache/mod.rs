//! Query cache and invalidation graph.
//!
//! This module provides:
//! - Structured, order-insensitive query keys
//! - Freshness windows per query kind
//! - Coalescing of concurrent identical fetches
//! - A static table mapping writes to the cached reads they invalidate
//! - Last-known-good serving when the server cannot be reached

mod invalidation;
mod key;
mod layer;
mod storage;
mod traits;

pub use invalidation::{effects_for, Action, Effect, Invalidation, MutationKind, Scope, Target};
pub use key::{QueryKey, QueryKind, NAMESPACE};
pub use layer::{CacheEvent, QueryCache};
pub use storage::{CacheStore, MemoryStore, SqliteStore};
pub use traits::{CacheEntry, CacheResult, CacheSource, EntryStatus};
