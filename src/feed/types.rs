//! Decoded post and image records.
//!
//! Listing entries arrive as loosely structured JSON; each one is decoded
//! into an explicit [`Post`] at this boundary so the rest of the system never
//! touches raw wire data. A malformed post is a recoverable error for that
//! post alone.

use serde::Deserialize;
use tracing::warn;

use super::{FeedError, Result};

/// An image offered by a post, as reported by the feed
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateImage {
    pub url: String,
    pub width: u32,
    pub height: u32,
}

impl CandidateImage {
    /// Width over height
    pub fn aspect_ratio(&self) -> f64 {
        f64::from(self.width) / f64::from(self.height)
    }
}

/// One decoded post
#[derive(Debug, Clone)]
pub struct Post {
    /// Feed-assigned identifier (Reddit fullname), used as the paging cursor
    pub id: String,
    pub title: String,
    /// Whether the post is flagged NSFW
    pub nsfw: bool,
    /// Preview images; legitimately empty for text posts
    pub images: Vec<CandidateImage>,
}

#[derive(Debug, Deserialize)]
struct RawPost {
    name: String,
    title: String,
    #[serde(default)]
    over_18: bool,
    preview: Option<RawPreview>,
}

#[derive(Debug, Deserialize)]
struct RawPreview {
    #[serde(default)]
    images: Vec<RawPreviewImage>,
}

#[derive(Debug, Deserialize)]
struct RawPreviewImage {
    source: RawImage,
}

#[derive(Debug, Deserialize)]
struct RawImage {
    url: String,
    width: i64,
    height: i64,
}

impl Post {
    /// Decode one listing entry into a validated post
    pub fn decode(value: &serde_json::Value) -> Result<Self> {
        let raw: RawPost = serde_json::from_value(value.clone())
            .map_err(|e| FeedError::Decode(e.to_string()))?;

        let images = raw
            .preview
            .map(|preview| preview.images)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|image| {
                let source = image.source;
                let width = u32::try_from(source.width).ok().filter(|w| *w > 0);
                let height = u32::try_from(source.height).ok().filter(|h| *h > 0);
                match (width, height) {
                    (Some(width), Some(height)) if !source.url.is_empty() => {
                        Some(CandidateImage {
                            url: source.url,
                            width,
                            height,
                        })
                    }
                    _ => {
                        warn!(
                            "Discarding malformed image record ({} x {}) in post '{}'",
                            source.width, source.height, raw.title
                        );
                        None
                    }
                }
            })
            .collect();

        Ok(Self {
            id: raw.name,
            title: raw.title,
            nsfw: raw.over_18,
            images,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_a_full_post() {
        let value = json!({
            "name": "t3_abc123",
            "title": "Misty valley at dawn",
            "over_18": false,
            "preview": {
                "images": [
                    { "source": { "url": "https://i.example/a.jpg", "width": 3840, "height": 2160 } }
                ]
            }
        });

        let post = Post::decode(&value).unwrap();
        assert_eq!(post.id, "t3_abc123");
        assert!(!post.nsfw);
        assert_eq!(post.images.len(), 1);
        assert_eq!(post.images[0].width, 3840);
        assert!((post.images[0].aspect_ratio() - 16.0 / 9.0).abs() < 1e-9);
    }

    #[test]
    fn missing_preview_yields_zero_images() {
        let value = json!({ "name": "t3_text", "title": "Just text" });
        let post = Post::decode(&value).unwrap();
        assert!(post.images.is_empty());
    }

    #[test]
    fn malformed_image_is_dropped_not_fatal() {
        let value = json!({
            "name": "t3_mixed",
            "title": "One good, one broken",
            "preview": {
                "images": [
                    { "source": { "url": "https://i.example/good.png", "width": 2560, "height": 1440 } },
                    { "source": { "url": "", "width": 0, "height": -4 } }
                ]
            }
        });

        let post = Post::decode(&value).unwrap();
        assert_eq!(post.images.len(), 1);
        assert_eq!(post.images[0].url, "https://i.example/good.png");
    }

    #[test]
    fn dimensions_past_u32_are_dropped_not_truncated() {
        let value = json!({
            "name": "t3_huge",
            "title": "Dimensions out of range",
            "preview": {
                "images": [
                    { "source": { "url": "https://i.example/a.jpg", "width": 4_294_967_296i64, "height": 1080 } }
                ]
            }
        });

        let post = Post::decode(&value).unwrap();
        assert!(post.images.is_empty());
    }

    #[test]
    fn missing_required_field_is_a_decode_error() {
        let value = json!({ "title": "No name field" });
        assert!(matches!(Post::decode(&value), Err(FeedError::Decode(_))));
    }
}
