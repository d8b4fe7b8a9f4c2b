//! HTTP surface: serves the posts as JSON with Cache-Control metadata.

use axum::extract::State;
use axum::http::{header::CACHE_CONTROL, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use color_eyre::{eyre::eyre, Report, Result};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::bsky::client::FeedSource;
use crate::bsky::posts::PostsClient;
use crate::config::CacheControlConfig;

pub struct AppState<S: FeedSource> {
  pub posts: Arc<PostsClient<S>>,
  /// Number of posts served per request
  pub max_posts: usize,
  pub cache_control: CacheControlConfig,
}

impl<S: FeedSource> Clone for AppState<S> {
  fn clone(&self) -> Self {
    Self {
      posts: Arc::clone(&self.posts),
      max_posts: self.max_posts,
      cache_control: self.cache_control,
    }
  }
}

pub fn router<S: FeedSource + 'static>(state: AppState<S>) -> Router {
  Router::new()
    .route("/health", get(health))
    .route("/api/posts/recent", get(recent_posts::<S>))
    .with_state(state)
}

/// Bind `addr` and serve until the process is stopped.
pub async fn serve<S: FeedSource + 'static>(addr: SocketAddr, state: AppState<S>) -> Result<()> {
  let listener = TcpListener::bind(addr)
    .await
    .map_err(|e| eyre!("Failed to bind {}: {}", addr, e))?;
  tracing::info!(%addr, "Listening");

  axum::serve(listener, router(state))
    .await
    .map_err(|e| eyre!("Server error: {}", e))
}

#[derive(Serialize)]
struct HealthResponse {
  status: &'static str,
}

async fn health() -> Json<HealthResponse> {
  Json(HealthResponse { status: "ok" })
}

async fn recent_posts<S: FeedSource + 'static>(
  State(state): State<AppState<S>>,
) -> Result<Response, ApiError> {
  let posts = state.posts.get_posts(state.max_posts).await?;

  let cache_control = HeaderValue::from_str(&state.cache_control.header_value())
    .map_err(|e| eyre!("Invalid Cache-Control value: {}", e))?;

  Ok(([(CACHE_CONTROL, cache_control)], Json(posts)).into_response())
}

/// Any failure while producing a response; rendered as a 500.
#[derive(Debug)]
pub struct ApiError(Report);

impl From<Report> for ApiError {
  fn from(err: Report) -> Self {
    ApiError(err)
  }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
  message: String,
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    tracing::error!(error = ?self.0, "Request failed");
    let body = ErrorResponse {
      message: self.0.to_string(),
    };
    (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::bsky::api_types::fixtures::{image_item, DID};
  use crate::bsky::api_types::ApiAuthorFeedResponse;
  use crate::bsky::client::{FeedQuery, Session};
  use crate::bsky::posts::Credentials;
  use axum::body::{to_bytes, Body};
  use axum::http::Request;
  use serde_json::Value;
  use tower::ServiceExt;

  /// Returns the same page on every call, or fails.
  struct StaticSource {
    feed: Vec<Value>,
    fail: bool,
  }

  impl FeedSource for StaticSource {
    async fn login(&self, _identifier: &str, _password: &str) -> Result<Session> {
      Ok(Session {
        access_jwt: "jwt".to_string(),
        refresh_jwt: "refresh".to_string(),
      })
    }

    async fn refresh_session(&self, session: &Session) -> Result<Session> {
      Ok(session.clone())
    }

    async fn get_author_feed(
      &self,
      _session: &Session,
      _query: &FeedQuery<'_>,
    ) -> Result<ApiAuthorFeedResponse> {
      if self.fail {
        return Err(eyre!("upstream unavailable"));
      }
      Ok(ApiAuthorFeedResponse {
        feed: self.feed.clone(),
        cursor: None,
      })
    }
  }

  fn app(source: StaticSource, cache_control: CacheControlConfig) -> Router {
    let posts = PostsClient::new(
      source,
      DID,
      Credentials {
        identifier: "owner".to_string(),
        password: "secret".to_string(),
      },
    );
    router(AppState {
      posts: Arc::new(posts),
      max_posts: 2,
      cache_control,
    })
  }

  async fn get(app: Router, uri: &str) -> (StatusCode, Option<String>, Value) {
    let request = Request::builder()
      .method("GET")
      .uri(uri)
      .body(Body::empty())
      .expect("request");
    let response = app.oneshot(request).await.expect("response");
    let status = response.status();
    let cache_control = response
      .headers()
      .get(CACHE_CONTROL)
      .map(|v| v.to_str().unwrap().to_string());
    let body = to_bytes(response.into_body(), usize::MAX)
      .await
      .expect("response body");
    let payload: Value = serde_json::from_slice(&body).expect("json body");
    (status, cache_control, payload)
  }

  #[tokio::test]
  async fn test_recent_posts_returns_limited_json_with_cache_control() {
    let source = StaticSource {
      feed: vec![
        image_item("at://1", "2024-01-01T00:00:00.000Z"),
        image_item("at://3", "2024-01-03T00:00:00.000Z"),
        image_item("at://2", "2024-01-02T00:00:00.000Z"),
      ],
      fail: false,
    };
    let cache_control = CacheControlConfig {
      max_age: 60,
      stale_while_revalidate: 120,
      stale_if_error: 180,
    };

    let (status, header, body) = get(app(source, cache_control), "/api/posts/recent").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
      header.as_deref(),
      Some("public, max-age=60, stale-while-revalidate=120, stale-if-error=180")
    );
    let posts = body.as_array().unwrap();
    assert_eq!(posts.len(), 2);
    assert_eq!(posts[0]["uri"], "at://3");
    assert_eq!(posts[1]["uri"], "at://2");
    assert_eq!(posts[0]["image_details"][0]["full_url"], "https://cdn/full.jpg");
  }

  #[tokio::test]
  async fn test_upstream_failure_is_a_server_error() {
    let source = StaticSource {
      feed: Vec::new(),
      fail: true,
    };

    let (status, header, body) =
      get(app(source, CacheControlConfig::default()), "/api/posts/recent").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(header.is_none());
    assert!(body["message"].as_str().unwrap().contains("upstream unavailable"));
  }

  #[tokio::test]
  async fn test_health() {
    let source = StaticSource {
      feed: Vec::new(),
      fail: false,
    };

    let (status, _, body) = get(app(source, CacheControlConfig::default()), "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
  }
}
