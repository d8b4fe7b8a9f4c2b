mod bsky;
mod cache;
mod config;
mod server;
mod telemetry;

use clap::Parser;
use color_eyre::Result;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bsky::client::BskyClient;
use bsky::posts::{Credentials, PostsClient};
use cache::{PostCache, SqliteStorage};
use config::{CacheBackend, CacheConfig, Config};

#[derive(Parser, Debug)]
#[command(name = "bsky-posts")]
#[command(about = "Serve a Bluesky account's media posts over HTTP")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/bsky-posts/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Address to listen on
  #[arg(short, long)]
  bind: Option<SocketAddr>,
}

fn open_cache(config: &CacheConfig) -> Result<Arc<dyn PostCache>> {
  let storage = match &config.backend {
    CacheBackend::Sqlite { path: Some(path) } => SqliteStorage::open(path)?,
    CacheBackend::Sqlite { path: None } => SqliteStorage::open_default()?,
  };

  Ok(Arc::new(storage))
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let mut config = Config::load(args.config.as_deref())?;

  // Override bind address if specified on command line
  if let Some(bind) = args.bind {
    config.server.bind = bind;
  }

  let _log_guard = telemetry::init_tracing(config.log_file.as_deref())?;

  let source = BskyClient::new(
    &config.bsky.service,
    Duration::from_secs(config.request_timeout_secs),
  )?;
  let credentials = Credentials {
    identifier: config.bsky.username.clone(),
    password: Config::get_password()?,
  };

  let mut posts = PostsClient::new(source, config.bsky.did.clone(), credentials);
  match &config.cache {
    Some(cache_config) => {
      posts = posts
        .with_cache(open_cache(cache_config)?)
        .with_max_age(cache_config.max_age()?);
    }
    None => tracing::warn!("No cache configured; every request will page the full feed"),
  }

  let state = server::AppState {
    posts: Arc::new(posts),
    max_posts: config.max_posts,
    cache_control: config.cache_control,
  };

  server::serve(config.server.bind, state).await
}
