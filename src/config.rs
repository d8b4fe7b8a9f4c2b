use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub bsky: BskyConfig,
  /// Number of posts served by the endpoint
  #[serde(default = "default_max_posts")]
  pub max_posts: usize,
  /// Omit to disable caching; every request then pages the whole feed
  pub cache: Option<CacheConfig>,
  #[serde(default)]
  pub cache_control: CacheControlConfig,
  #[serde(default)]
  pub server: ServerConfig,
  /// Timeout for each upstream request, in seconds
  #[serde(default = "default_request_timeout_secs")]
  pub request_timeout_secs: u64,
  /// Write logs to this file instead of stderr
  pub log_file: Option<PathBuf>,
}

fn default_max_posts() -> usize {
  9
}

fn default_request_timeout_secs() -> u64 {
  30
}

#[derive(Debug, Clone, Deserialize)]
pub struct BskyConfig {
  /// Login identifier (handle or email)
  pub username: String,
  /// DID of the account whose posts are served
  pub did: String,
  #[serde(default = "default_service")]
  pub service: String,
}

fn default_service() -> String {
  "https://bsky.social".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  pub backend: CacheBackend,
  /// How long cached posts are served before upstream is checked again
  #[serde(default = "default_refresh_period_ms")]
  pub refresh_period_ms: u64,
}

fn default_refresh_period_ms() -> u64 {
  10 * 60 * 1000
}

impl CacheConfig {
  /// `refresh_period_ms` as a duration; rejects periods chrono cannot represent.
  pub fn max_age(&self) -> Result<chrono::Duration> {
    i64::try_from(self.refresh_period_ms)
      .ok()
      .and_then(chrono::Duration::try_milliseconds)
      .ok_or_else(|| {
        eyre!(
          "cache.refresh_period_ms is too large: {}",
          self.refresh_period_ms
        )
      })
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CacheBackend {
  /// SQLite file; defaults to $XDG_DATA_HOME/bsky-posts/cache.db
  Sqlite {
    #[serde(default)]
    path: Option<PathBuf>,
  },
}

/// Durations (seconds) for the Cache-Control response header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheControlConfig {
  pub max_age: u64,
  pub stale_while_revalidate: u64,
  pub stale_if_error: u64,
}

impl Default for CacheControlConfig {
  fn default() -> Self {
    Self {
      max_age: 600,
      stale_while_revalidate: 86400,
      stale_if_error: 86400,
    }
  }
}

impl CacheControlConfig {
  pub fn header_value(&self) -> String {
    format!(
      "public, max-age={}, stale-while-revalidate={}, stale-if-error={}",
      self.max_age, self.stale_while_revalidate, self.stale_if_error
    )
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  #[serde(default = "default_bind")]
  pub bind: SocketAddr,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      bind: default_bind(),
    }
  }
}

fn default_bind() -> SocketAddr {
  SocketAddr::from(([127, 0, 0, 1], 3000))
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./bsky-posts.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/bsky-posts/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/bsky-posts/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("bsky-posts.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("bsky-posts").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Get the Bluesky password from environment variables.
  ///
  /// Checks BSKY_POSTS_PASSWORD first, then BSKY_PASSWORD as fallback.
  pub fn get_password() -> Result<String> {
    std::env::var("BSKY_POSTS_PASSWORD")
      .or_else(|_| std::env::var("BSKY_PASSWORD"))
      .map_err(|_| {
        eyre!("Bluesky password not found. Set BSKY_POSTS_PASSWORD or BSKY_PASSWORD environment variable.")
      })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
  }

  #[test]
  fn test_minimal_config_uses_defaults() {
    let file = write_config(
      "bsky:\n  username: owner.bsky.social\n  did: did:plc:owner\n",
    );

    let config = Config::load(Some(file.path())).unwrap();

    assert_eq!(config.bsky.service, "https://bsky.social");
    assert_eq!(config.max_posts, 9);
    assert!(config.cache.is_none());
    assert_eq!(config.cache_control, CacheControlConfig::default());
    assert_eq!(config.server.bind, "127.0.0.1:3000".parse::<SocketAddr>().unwrap());
    assert_eq!(config.request_timeout_secs, 30);
  }

  #[test]
  fn test_full_config() {
    let file = write_config(
      r#"
bsky:
  username: owner.bsky.social
  did: did:plc:owner
  service: https://pds.example
max_posts: 20
cache:
  backend:
    type: sqlite
    path: /tmp/posts.db
  refresh_period_ms: 60000
cache_control:
  max_age: 60
server:
  bind: 0.0.0.0:8080
"#,
    );

    let config = Config::load(Some(file.path())).unwrap();

    assert_eq!(config.max_posts, 20);
    let cache = config.cache.unwrap();
    assert_eq!(
      cache.backend,
      CacheBackend::Sqlite {
        path: Some(PathBuf::from("/tmp/posts.db"))
      }
    );
    assert_eq!(cache.refresh_period_ms, 60000);
    // Unset fields keep their defaults
    assert_eq!(config.cache_control.max_age, 60);
    assert_eq!(config.cache_control.stale_if_error, 86400);
    assert_eq!(config.server.bind.port(), 8080);
  }

  #[test]
  fn test_cache_without_refresh_period_defaults_to_ten_minutes() {
    let file = write_config(
      "bsky:\n  username: u\n  did: d\ncache:\n  backend:\n    type: sqlite\n",
    );

    let cache = Config::load(Some(file.path())).unwrap().cache.unwrap();

    assert_eq!(cache.backend, CacheBackend::Sqlite { path: None });
    assert_eq!(cache.refresh_period_ms, 600_000);
  }

  #[test]
  fn test_refresh_period_becomes_max_age() {
    let cache = CacheConfig {
      backend: CacheBackend::Sqlite { path: None },
      refresh_period_ms: 90_000,
    };

    assert_eq!(cache.max_age().unwrap(), chrono::Duration::seconds(90));
  }

  #[test]
  fn test_oversized_refresh_period_is_rejected() {
    let file = write_config(
      "bsky:\n  username: u\n  did: d\ncache:\n  backend:\n    type: sqlite\n  refresh_period_ms: 18446744073709551615\n",
    );

    let cache = Config::load(Some(file.path())).unwrap().cache.unwrap();

    assert_eq!(cache.refresh_period_ms, u64::MAX);
    let err = cache.max_age().unwrap_err();
    assert!(err.to_string().contains("refresh_period_ms"));
  }

  #[test]
  fn test_unknown_backend_is_rejected() {
    let file = write_config(
      "bsky:\n  username: u\n  did: d\ncache:\n  backend:\n    type: mongodb\n",
    );

    assert!(Config::load(Some(file.path())).is_err());
  }

  #[test]
  fn test_missing_explicit_path_is_an_error() {
    assert!(Config::load(Some(Path::new("/nonexistent/bsky-posts.yaml"))).is_err());
  }

  #[test]
  fn test_cache_control_header() {
    assert_eq!(
      CacheControlConfig::default().header_value(),
      "public, max-age=600, stale-while-revalidate=86400, stale-if-error=86400"
    );
  }
}
