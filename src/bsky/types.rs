use serde::{Deserialize, Serialize};

/// One image attached to a post
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDetails {
  pub full_url: String,
  pub thumb_url: String,
  pub alt_text: String,
}

/// A normalized media post, as served over HTTP and stored in the cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
  /// at:// URI, unique per post
  pub uri: String,
  /// ISO 8601 indexing timestamp (fixed width, so string order is time order)
  pub date: String,
  pub text: String,
  pub likes: u64,
  pub reposts: u64,
  pub image_details: Vec<ImageDetails>,
  pub video_thumb_url: Option<String>,
}

/// Sort newest first by `date`, drop repeated `uri`s (first wins) and truncate.
pub fn merge_newest_first(posts: impl IntoIterator<Item = Post>, limit: usize) -> Vec<Post> {
  let mut seen = std::collections::HashSet::new();
  let mut merged: Vec<Post> = posts
    .into_iter()
    .filter(|p| seen.insert(p.uri.clone()))
    .collect();
  // Stable sort keeps fresh copies ahead of cached ones on equal dates
  merged.sort_by(|a, b| b.date.cmp(&a.date));
  merged.truncate(limit);
  merged
}

#[cfg(test)]
pub(crate) fn test_post(uri: &str, date: &str) -> Post {
  Post {
    uri: uri.to_string(),
    date: date.to_string(),
    text: format!("post {}", uri),
    likes: 0,
    reposts: 0,
    image_details: vec![ImageDetails {
      full_url: format!("https://cdn.example/{}/full", uri),
      thumb_url: format!("https://cdn.example/{}/thumb", uri),
      alt_text: String::new(),
    }],
    video_thumb_url: None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_merge_sorts_descending_and_truncates() {
    let posts = vec![
      test_post("a", "2024-01-02T00:00:00.000Z"),
      test_post("b", "2024-01-05T00:00:00.000Z"),
      test_post("c", "2024-01-03T00:00:00.000Z"),
    ];

    let merged = merge_newest_first(posts, 2);
    let uris: Vec<&str> = merged.iter().map(|p| p.uri.as_str()).collect();
    assert_eq!(uris, vec!["b", "c"]);
  }

  #[test]
  fn test_merge_drops_duplicate_uris() {
    let mut fresh = test_post("a", "2024-01-02T00:00:00.000Z");
    fresh.likes = 10;
    let stale = test_post("a", "2024-01-02T00:00:00.000Z");

    let merged = merge_newest_first(vec![fresh, stale], 10);
    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].likes, 10);
  }

  #[test]
  fn test_post_serializes_with_null_video_thumb() {
    let json = serde_json::to_value(test_post("a", "2024-01-02T00:00:00.000Z")).unwrap();
    assert!(json["video_thumb_url"].is_null());
    assert_eq!(json["image_details"][0]["alt_text"], "");
  }
}
