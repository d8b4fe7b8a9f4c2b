//! Serde-deserializable types matching Bluesky XRPC responses.
//!
//! These types are separate from domain types to allow clean deserialization
//! while keeping `Post` focused on what the endpoint serves.

use serde::{Deserialize, Serialize};

use super::types::{ImageDetails, Post};

pub const REASON_REPOST: &str = "app.bsky.feed.defs#reasonRepost";
pub const EMBED_IMAGES_VIEW: &str = "app.bsky.embed.images#view";
pub const EMBED_VIDEO_VIEW: &str = "app.bsky.embed.video#view";

// ============================================================================
// com.atproto.server.createSession / refreshSession
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ApiCreateSessionRequest<'a> {
  pub identifier: &'a str,
  pub password: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct ApiSession {
  #[serde(rename = "accessJwt")]
  pub access_jwt: String,
  #[serde(rename = "refreshJwt")]
  pub refresh_jwt: String,
  pub did: String,
  #[serde(default)]
  pub handle: String,
}

/// Error body returned by XRPC endpoints on failure
#[derive(Debug, Default, Deserialize)]
pub struct ApiXrpcError {
  #[serde(default)]
  pub error: String,
  #[serde(default)]
  pub message: String,
}

// ============================================================================
// app.bsky.feed.getAuthorFeed
// ============================================================================

/// A page of the author feed. Items are kept as raw JSON so that one malformed
/// item does not fail the whole page.
#[derive(Debug, Deserialize)]
pub struct ApiAuthorFeedResponse {
  pub feed: Vec<serde_json::Value>,
  pub cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApiAuthor {
  pub did: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiReason {
  #[serde(rename = "$type")]
  pub kind: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiImage {
  pub thumb: String,
  pub fullsize: String,
  #[serde(default)]
  pub alt: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiEmbed {
  #[serde(rename = "$type", default)]
  pub kind: String,
  // Present on image embeds
  #[serde(default)]
  pub images: Vec<ApiImage>,
  // Present on video embeds
  pub thumbnail: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ApiRecord {
  #[serde(default)]
  pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiPostView {
  pub uri: String,
  pub author: ApiAuthor,
  #[serde(default)]
  pub record: ApiRecord,
  pub embed: Option<ApiEmbed>,
  #[serde(rename = "indexedAt")]
  pub indexed_at: String,
  #[serde(rename = "likeCount")]
  pub like_count: Option<u64>,
  #[serde(rename = "repostCount")]
  pub repost_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct ApiFeedViewPost {
  pub post: ApiPostView,
  // Only checked for presence
  pub reply: Option<serde_json::Value>,
  pub reason: Option<ApiReason>,
}

impl ApiFeedViewPost {
  /// Whether this item is a media post authored by `did` itself.
  ///
  /// Reposts of other accounts, replies and posts without an image or video
  /// embed are rejected.
  pub fn qualifies(&self, did: &str) -> bool {
    let is_repost = self
      .reason
      .as_ref()
      .is_some_and(|r| r.kind == REASON_REPOST);

    let has_media = self.post.embed.as_ref().is_some_and(|e| {
      e.kind.starts_with(EMBED_IMAGES_VIEW) || e.kind.starts_with(EMBED_VIDEO_VIEW)
    });

    self.post.author.did == did && !is_repost && self.reply.is_none() && has_media
  }

  pub fn into_post(self) -> Post {
    let post = self.post;
    let (image_details, video_thumb_url) = match post.embed {
      Some(embed) => (
        embed
          .images
          .into_iter()
          .map(|img| ImageDetails {
            full_url: img.fullsize,
            thumb_url: img.thumb,
            alt_text: img.alt,
          })
          .collect(),
        embed.thumbnail,
      ),
      None => (Vec::new(), None),
    };

    Post {
      uri: post.uri,
      date: post.indexed_at,
      text: post.record.text,
      likes: post.like_count.unwrap_or(0),
      reposts: post.repost_count.unwrap_or(0),
      image_details,
      video_thumb_url,
    }
  }
}

/// Turn a raw feed page into the posts that qualify for `did`, preserving order.
///
/// Items that do not deserialize are logged and skipped.
pub fn transform_feed(feed: Vec<serde_json::Value>, did: &str) -> Vec<Post> {
  feed
    .into_iter()
    .filter_map(|item| match serde_json::from_value::<ApiFeedViewPost>(item) {
      Ok(fvp) => Some(fvp),
      Err(e) => {
        tracing::warn!(error = %e, "Skipping malformed feed item");
        None
      }
    })
    .filter(|fvp| fvp.qualifies(did))
    .map(ApiFeedViewPost::into_post)
    .collect()
}

#[cfg(test)]
pub(crate) mod fixtures {
  use serde_json::{json, Value};

  pub const DID: &str = "did:plc:owner";

  /// An image post by `DID`.
  pub fn image_item(uri: &str, indexed_at: &str) -> Value {
    json!({
      "post": {
        "uri": uri,
        "cid": "bafy",
        "author": { "did": DID, "handle": "owner.bsky.social" },
        "record": { "$type": "app.bsky.feed.post", "text": format!("text of {}", uri) },
        "embed": {
          "$type": "app.bsky.embed.images#view",
          "images": [
            { "thumb": "https://cdn/thumb.jpg", "fullsize": "https://cdn/full.jpg", "alt": "a cat" }
          ]
        },
        "indexedAt": indexed_at,
        "likeCount": 3,
        "repostCount": 1
      }
    })
  }

  /// A video post by `DID`.
  pub fn video_item(uri: &str, indexed_at: &str) -> Value {
    json!({
      "post": {
        "uri": uri,
        "author": { "did": DID },
        "record": { "text": "a video" },
        "embed": {
          "$type": "app.bsky.embed.video#view",
          "cid": "bafyvid",
          "playlist": "https://video/playlist.m3u8",
          "thumbnail": "https://video/thumb.jpg"
        },
        "indexedAt": indexed_at
      }
    })
  }

  pub fn text_item(uri: &str, indexed_at: &str) -> Value {
    json!({
      "post": {
        "uri": uri,
        "author": { "did": DID },
        "record": { "text": "just words" },
        "indexedAt": indexed_at
      }
    })
  }

  pub fn reply_item(uri: &str, indexed_at: &str) -> Value {
    let mut item = image_item(uri, indexed_at);
    item["reply"] = json!({ "root": {}, "parent": {} });
    item
  }

  pub fn repost_item(uri: &str, indexed_at: &str) -> Value {
    let mut item = image_item(uri, indexed_at);
    item["post"]["author"]["did"] = json!("did:plc:someone-else");
    item["reason"] = json!({ "$type": "app.bsky.feed.defs#reasonRepost", "by": { "did": DID } });
    item
  }
}
