//! Task marketplace client with resilient, cached task data synchronization.
//!
//! Reads are pulled in full across pages, resolved through ordered fallback
//! chains and cached with per-kind freshness. Writes invalidate the cached
//! views they affect.

pub mod api;
pub mod cache;
pub mod config;
pub mod fallback;
pub mod logging;
pub mod market;
pub mod pagination;
pub mod query;
pub mod synthetic;

pub use api::{ApiError, HttpClient, RemoteClient};
pub use cache::{QueryCache, QueryKey};
pub use config::Config;
pub use fallback::{DataSource, Resolved};
pub use market::{Loaded, Marketplace};
