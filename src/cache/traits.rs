//! Core trait and constants for the post cache.

use chrono::{DateTime, Utc};
use color_eyre::Result;

use crate::bsky::types::Post;

/// Version stamped on every cached post.
///
/// Bump this whenever the shape of `Post` or the feed filter rules change;
/// stores purge records of any other version on the next write.
pub const CACHE_VERSION: i64 = 3;

/// Trait for post cache backends.
///
/// Implementations own the persisted snapshot: a set of posts keyed by uri,
/// each tagged with a cache version, plus a single refresh watermark.
pub trait PostCache: Send + Sync {
  /// Posts of the current cache version, newest first, truncated to `limit`.
  fn get_cached_posts(&self, limit: Option<usize>) -> Result<Vec<Post>>;

  /// When the posts were last refreshed.
  ///
  /// Returns the Unix epoch if the cache has never been written, which callers
  /// treat as infinitely stale.
  fn posts_last_cached_at(&self) -> Result<DateTime<Utc>>;

  /// Record a refresh attempt and store `posts` under the current version.
  ///
  /// Always moves the watermark to now, even when `posts` is empty. Records of
  /// a different version are purged before anything is inserted.
  fn cache_posts(&self, posts: &[Post]) -> Result<()>;
}
