use crate::bsky::api_types::{
  ApiAuthorFeedResponse, ApiCreateSessionRequest, ApiSession, ApiXrpcError,
};
use color_eyre::{eyre::eyre, Report, Result};
use reqwest::StatusCode;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use url::Url;

/// Feed filter that leaves out replies on the upstream side
pub const FILTER_POSTS_NO_REPLIES: &str = "posts_no_replies";

/// An authenticated upstream session
#[derive(Debug, Clone)]
pub struct Session {
  pub access_jwt: String,
  /// Longer-lived token used to obtain a new access token
  pub refresh_jwt: String,
}

impl From<ApiSession> for Session {
  fn from(s: ApiSession) -> Self {
    Self {
      access_jwt: s.access_jwt,
      refresh_jwt: s.refresh_jwt,
    }
  }
}

/// Upstream rejected the session's token as expired or invalid.
///
/// Returned inside the `Report` so callers can tell it apart with
/// `downcast_ref` and renew the session.
#[derive(Debug)]
pub struct SessionExpired {
  pub message: String,
}

impl fmt::Display for SessionExpired {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Session expired: {}", self.message)
  }
}

impl std::error::Error for SessionExpired {}

/// Whether `err` was caused by an expired or rejected session token
pub fn is_session_expired(err: &Report) -> bool {
  err.downcast_ref::<SessionExpired>().is_some()
}

/// Parameters for one author feed page
#[derive(Debug, Clone)]
pub struct FeedQuery<'a> {
  pub actor: &'a str,
  pub filter: &'a str,
  pub limit: u32,
  pub cursor: Option<&'a str>,
}

/// Upstream operations the posts client depends on
pub trait FeedSource: Send + Sync {
  /// Exchange credentials for a session
  fn login(&self, identifier: &str, password: &str)
    -> impl Future<Output = Result<Session>> + Send;

  /// Exchange the session's refresh token for a new session
  fn refresh_session(&self, session: &Session) -> impl Future<Output = Result<Session>> + Send;

  /// Fetch a single page of an author's feed
  fn get_author_feed(
    &self,
    session: &Session,
    query: &FeedQuery<'_>,
  ) -> impl Future<Output = Result<ApiAuthorFeedResponse>> + Send;
}

/// Bluesky XRPC client
#[derive(Clone)]
pub struct BskyClient {
  http: reqwest::Client,
  service: Url,
}

impl BskyClient {
  pub fn new(service: &str, timeout: Duration) -> Result<Self> {
    let service =
      Url::parse(service).map_err(|e| eyre!("Invalid service URL {}: {}", service, e))?;

    let http = reqwest::Client::builder()
      .user_agent(concat!("bsky-posts/", env!("CARGO_PKG_VERSION")))
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { http, service })
  }

  fn xrpc_url(&self, method: &str) -> Result<Url> {
    self
      .service
      .join(&format!("/xrpc/{}", method))
      .map_err(|e| eyre!("Failed to build URL for {}: {}", method, e))
  }
}

fn token_rejected(status: StatusCode, body: &ApiXrpcError) -> bool {
  status == StatusCode::UNAUTHORIZED
    || matches!(body.error.as_str(), "ExpiredToken" | "InvalidToken")
}

/// Turn a non-2xx response into an error carrying the status and body.
///
/// A rejected token becomes a `SessionExpired` error.
async fn check_status(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
  let status = response.status();
  if status.is_success() {
    return Ok(response);
  }

  let body = response.text().await.unwrap_or_default();
  let xrpc: ApiXrpcError = serde_json::from_str(&body).unwrap_or_default();
  if token_rejected(status, &xrpc) {
    return Err(
      SessionExpired {
        message: format!("{} failed with {}: {}", what, status, body),
      }
      .into(),
    );
  }
  Err(eyre!("{} failed with {}: {}", what, status, body))
}

impl FeedSource for BskyClient {
  async fn login(&self, identifier: &str, password: &str) -> Result<Session> {
    let url = self.xrpc_url("com.atproto.server.createSession")?;

    let response = self
      .http
      .post(url)
      .json(&ApiCreateSessionRequest {
        identifier,
        password,
      })
      .send()
      .await
      .map_err(|e| eyre!("Failed to log in as {}: {}", identifier, e))?;

    let session: ApiSession = check_status(response, "Login")
      .await?
      .json()
      .await
      .map_err(|e| eyre!("Failed to parse session: {}", e))?;

    tracing::info!(handle = %session.handle, did = %session.did, "Logged in");

    Ok(session.into())
  }

  async fn refresh_session(&self, session: &Session) -> Result<Session> {
    let url = self.xrpc_url("com.atproto.server.refreshSession")?;

    let response = self
      .http
      .post(url)
      .bearer_auth(&session.refresh_jwt)
      .send()
      .await
      .map_err(|e| eyre!("Failed to refresh session: {}", e))?;

    let session: ApiSession = check_status(response, "Session refresh")
      .await?
      .json()
      .await
      .map_err(|e| eyre!("Failed to parse refreshed session: {}", e))?;

    tracing::info!(handle = %session.handle, "Refreshed session");

    Ok(session.into())
  }

  async fn get_author_feed(
    &self,
    session: &Session,
    query: &FeedQuery<'_>,
  ) -> Result<ApiAuthorFeedResponse> {
    let mut url = self.xrpc_url("app.bsky.feed.getAuthorFeed")?;
    {
      let mut pairs = url.query_pairs_mut();
      pairs
        .append_pair("actor", query.actor)
        .append_pair("filter", query.filter)
        .append_pair("limit", &query.limit.to_string());
      if let Some(cursor) = query.cursor {
        pairs.append_pair("cursor", cursor);
      }
    }

    let response = self
      .http
      .get(url)
      .bearer_auth(&session.access_jwt)
      .send()
      .await
      .map_err(|e| eyre!("Failed to get author feed: {}", e))?;

    check_status(response, "Author feed request")
      .await?
      .json()
      .await
      .map_err(|e| eyre!("Failed to parse author feed: {}", e))
  }
}
