//! SQLite implementation of the post cache.

use chrono::{DateTime, SecondsFormat, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::traits::{PostCache, CACHE_VERSION};
use crate::bsky::types::Post;

/// SQLite-based post cache.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
  version: i64,
}

impl SqliteStorage {
  /// Open (or create) the cache database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open the cache database at the default location.
  pub fn open_default() -> Result<Self> {
    Self::open(&Self::default_path()?)
  }

  /// Open a cache that lives only as long as this value.
  #[allow(dead_code)]
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;

    Self::with_connection(conn)
  }

  /// Override the cache version records are read and written under.
  #[allow(dead_code)]
  pub fn with_cache_version(mut self, version: i64) -> Self {
    self.version = version;
    self
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
      version: CACHE_VERSION,
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// Get the default database path.
  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("bsky-posts").join("cache.db"))
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    self
      .lock()?
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- One row per post (stores serialized JSON)
CREATE TABLE IF NOT EXISTS cache (
    uri TEXT PRIMARY KEY,
    version INTEGER NOT NULL,
    date TEXT NOT NULL,
    data BLOB NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_cache_version_date
    ON cache(version, date);

-- Refresh bookkeeping (single row)
CREATE TABLE IF NOT EXISTS _info (
    id TEXT PRIMARY KEY CHECK (id = '_info'),
    last_checked_at TEXT NOT NULL,
    cache_version INTEGER NOT NULL
);
"#;

impl PostCache for SqliteStorage {
  fn get_cached_posts(&self, limit: Option<usize>) -> Result<Vec<Post>> {
    let conn = self.lock()?;

    // SQLite treats a negative LIMIT as unbounded
    let limit = limit.map(|l| l as i64).unwrap_or(-1);

    let mut stmt = conn
      .prepare(
        "SELECT data FROM cache
         WHERE version = ?
         ORDER BY date DESC
         LIMIT ?",
      )
      .map_err(|e| eyre!("Failed to prepare cache query: {}", e))?;

    let rows = stmt
      .query_map(params![self.version, limit], |row| row.get::<_, Vec<u8>>(0))
      .map_err(|e| eyre!("Failed to query cached posts: {}", e))?;

    let mut posts = Vec::new();
    for row in rows {
      let data = row.map_err(|e| eyre!("Failed to read cached post: {}", e))?;
      let post: Post = serde_json::from_slice(&data)
        .map_err(|e| eyre!("Failed to deserialize cached post: {}", e))?;
      posts.push(post);
    }

    Ok(posts)
  }

  fn posts_last_cached_at(&self) -> Result<DateTime<Utc>> {
    let conn = self.lock()?;

    let last_checked_at: Option<String> = conn
      .query_row(
        "SELECT last_checked_at FROM _info WHERE id = '_info'",
        [],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read cache info: {}", e))?;

    match last_checked_at {
      Some(s) => parse_datetime(&s),
      None => Ok(DateTime::<Utc>::UNIX_EPOCH),
    }
  }

  fn cache_posts(&self, posts: &[Post]) -> Result<()> {
    let mut conn = self.lock()?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let previous_version: Option<i64> = tx
      .query_row(
        "SELECT cache_version FROM _info WHERE id = '_info'",
        [],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read cache info: {}", e))?;

    tx.execute(
      "INSERT INTO _info (id, last_checked_at, cache_version)
       VALUES ('_info', ?1, ?2)
       ON CONFLICT(id) DO UPDATE SET
         last_checked_at = excluded.last_checked_at,
         cache_version = excluded.cache_version",
      params![
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        self.version
      ],
    )
    .map_err(|e| eyre!("Failed to update cache info: {}", e))?;

    if previous_version != Some(self.version) {
      let purged = tx
        .execute("DELETE FROM cache WHERE version != ?", params![self.version])
        .map_err(|e| eyre!("Failed to purge stale cache entries: {}", e))?;
      tracing::info!(
        ?previous_version,
        version = self.version,
        purged,
        "Cache version changed, purged stale posts"
      );
    }

    for post in posts {
      let data =
        serde_json::to_vec(post).map_err(|e| eyre!("Failed to serialize post: {}", e))?;

      tx.execute(
        "INSERT OR REPLACE INTO cache (uri, version, date, data)
         VALUES (?, ?, ?, ?)",
        params![post.uri, self.version, post.date, data],
      )
      .map_err(|e| eyre!("Failed to store post {}: {}", post.uri, e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    tracing::debug!(stored = posts.len(), "Cached posts");

    Ok(())
  }
}

/// Parse a watermark stored as RFC 3339.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
