//! Caching for catalog data.
//!
//! This module provides:
//! - A thread-safe TTL store with lazy expiry and oldest-first eviction
//! - A product cache with separate list and detail namespaces
//! - SQLite write-through so cached data carries over between runs
//! - Cache-first fetch helpers that fall through to the network on a miss

mod layer;
mod sqlite;
mod storage;
mod traits;

pub use layer::{ListKey, ProductCache};
pub use sqlite::SqliteCache;
pub use traits::CacheSource;
