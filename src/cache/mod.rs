//! Versioned post cache.
//!
//! The feed client only talks to the `PostCache` trait; `SqliteStorage` is the
//! bundled backend. A cache holds:
//! - posts keyed by uri, each tagged with the cache version they were written under
//! - a single `_info` record with the last refresh time and current version

mod storage;
mod traits;

pub use storage::SqliteStorage;
pub use traits::PostCache;
