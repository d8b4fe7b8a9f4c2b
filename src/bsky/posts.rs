//! Posts client: pages the upstream author feed and merges it with the cache.

use chrono::{Duration, Utc};
use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::cache::PostCache;

use super::api_types::transform_feed;
use super::client::{is_session_expired, FeedQuery, FeedSource, Session, FILTER_POSTS_NO_REPLIES};
use super::types::{merge_newest_first, Post};

/// Upstream page size
pub const PAGE_SIZE: u32 = 50;

/// Login credentials for the upstream service
#[derive(Debug, Clone)]
pub struct Credentials {
  pub identifier: String,
  pub password: String,
}

/// Serves an account's media posts, refreshing a cache incrementally.
///
/// With a cache configured, upstream is only consulted once the cache is older
/// than `max_age`, and then only for posts newer than the newest cached one.
/// Without a cache every call pages through the whole feed.
pub struct PostsClient<S: FeedSource> {
  source: S,
  /// Account whose posts are served
  did: String,
  credentials: Credentials,
  /// Established on first use; renewed with the refresh token when rejected
  session: Mutex<Option<Session>>,
  cache: Option<Arc<dyn PostCache>>,
  max_age: Duration,
  /// Held while a refresh runs so concurrent callers share its result
  refresh_lock: Mutex<()>,
}

/// Run a cache call on the blocking pool so storage I/O does not stall the
/// async workers.
async fn run_blocking<T, F>(cache: &Arc<dyn PostCache>, f: F) -> Result<T>
where
  T: Send + 'static,
  F: FnOnce(&dyn PostCache) -> Result<T> + Send + 'static,
{
  let cache = Arc::clone(cache);
  tokio::task::spawn_blocking(move || f(cache.as_ref()))
    .await
    .map_err(|e| eyre!("Cache task failed: {}", e))?
}

impl<S: FeedSource> PostsClient<S> {
  pub fn new(source: S, did: impl Into<String>, credentials: Credentials) -> Self {
    Self {
      source,
      did: did.into(),
      credentials,
      session: Mutex::new(None),
      cache: None,
      max_age: Duration::minutes(10),
      refresh_lock: Mutex::new(()),
    }
  }

  /// Attach a cache backend.
  pub fn with_cache(mut self, cache: Arc<dyn PostCache>) -> Self {
    self.cache = Some(cache);
    self
  }

  /// Set how long cached posts are served before upstream is consulted again.
  pub fn with_max_age(mut self, max_age: Duration) -> Self {
    self.max_age = max_age;
    self
  }

  /// Log in on first use. A failed login is retried on the next call.
  async fn ensure_session(&self) -> Result<Session> {
    let mut session = self.session.lock().await;
    if let Some(current) = session.as_ref() {
      return Ok(current.clone());
    }

    let created = self
      .source
      .login(&self.credentials.identifier, &self.credentials.password)
      .await?;
    *session = Some(created.clone());
    Ok(created)
  }

  /// Replace `stale` after upstream rejected its access token.
  ///
  /// Returns the current session unchanged if another caller already renewed
  /// it. Logs in again only when the refresh token is rejected too.
  async fn renew_session(&self, stale: &Session) -> Result<Session> {
    let mut session = self.session.lock().await;
    if let Some(current) = session.as_ref() {
      if current.access_jwt != stale.access_jwt {
        return Ok(current.clone());
      }
    }

    let renewed = match self.source.refresh_session(stale).await {
      Ok(renewed) => renewed,
      Err(e) if is_session_expired(&e) => {
        tracing::warn!(error = %e, "Refresh token rejected, logging in again");
        self
          .source
          .login(&self.credentials.identifier, &self.credentials.password)
          .await?
      }
      Err(e) => return Err(e),
    };

    tracing::info!("Renewed upstream session");
    *session = Some(renewed.clone());
    Ok(renewed)
  }

  /// Read up to `limit` cached posts and whether they are still fresh.
  async fn read_cache(
    &self,
    cache: &Arc<dyn PostCache>,
    limit: usize,
  ) -> Result<(Vec<Post>, bool)> {
    let (cached, last_cached_at) = run_blocking(cache, move |c| {
      Ok((c.get_cached_posts(Some(limit))?, c.posts_last_cached_at()?))
    })
    .await?;
    let fresh = Utc::now() - last_cached_at < self.max_age;

    Ok((cached, fresh))
  }

  /// Get up to `limit` posts, newest first.
  pub async fn get_posts(&self, limit: usize) -> Result<Vec<Post>> {
    let session = self.ensure_session().await?;

    let Some(cache) = self.cache.as_ref() else {
      let fetched = self.fetch_new_posts(session, None).await?;
      return Ok(merge_newest_first(fetched, limit));
    };

    let (cached, fresh) = self.read_cache(cache, limit).await?;
    if fresh {
      tracing::debug!(count = cached.len(), "Serving fresh cache");
      return Ok(cached);
    }

    let _guard = self.refresh_lock.lock().await;

    // Another caller may have refreshed while we waited for the lock
    let (cached, fresh) = self.read_cache(cache, limit).await?;
    if fresh {
      tracing::debug!(count = cached.len(), "Serving cache refreshed by another request");
      return Ok(cached);
    }

    let newest_cached = cached.first().map(|p| p.date.as_str());
    let fetched = self.fetch_new_posts(session, newest_cached).await?;

    let to_store = fetched.clone();
    run_blocking(cache, move |c| c.cache_posts(&to_store)).await?;
    tracing::info!(new = fetched.len(), "Refreshed post cache");

    Ok(merge_newest_first(fetched.into_iter().chain(cached), limit))
  }

  /// Page through the author feed collecting qualifying posts newer than
  /// `newer_than` (all of them when `None`).
  ///
  /// Paging stops at the first page containing a post that is not newer, on the
  /// assumption that pages arrive newest first and everything past that point
  /// is already cached. An upstream that reorders or back-fills would make this
  /// under-fetch.
  ///
  /// A page rejected for an expired token is retried once with a renewed
  /// session.
  async fn fetch_new_posts(
    &self,
    mut session: Session,
    newer_than: Option<&str>,
  ) -> Result<Vec<Post>> {
    let mut out = Vec::new();
    let mut cursor: Option<String> = None;

    loop {
      let query = FeedQuery {
        actor: &self.did,
        filter: FILTER_POSTS_NO_REPLIES,
        limit: PAGE_SIZE,
        cursor: cursor.as_deref(),
      };
      let page = match self.source.get_author_feed(&session, &query).await {
        Err(e) if is_session_expired(&e) => {
          tracing::info!(error = %e, "Access token rejected, renewing session");
          session = self.renew_session(&session).await?;
          self.source.get_author_feed(&session, &query).await?
        }
        page => page?,
      };

      let raw_count = page.feed.len();
      let next = transform_feed(page.feed, &self.did);
      let transformed = next.len();

      let to_add: Vec<Post> = next
        .into_iter()
        .filter(|p| newer_than.map_or(true, |d| p.date.as_str() > d))
        .collect();
      let qualifying = to_add.len();
      out.extend(to_add);

      cursor = page.cursor.filter(|c| !c.is_empty());

      tracing::debug!(
        raw_count,
        transformed,
        qualifying,
        has_cursor = cursor.is_some(),
        "Fetched author feed page"
      );

      // Reached posts we already have
      if qualifying != transformed || cursor.is_none() {
        break;
      }
    }

    Ok(out)
  }
}
