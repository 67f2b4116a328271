//! The feed collaborator boundary.
//!
//! A [`Feed`] yields finite batches of decoded posts per source; an empty
//! batch means the source is caught up. Failures are isolated per call so one
//! broken source never takes down the others.

mod reddit;
mod types;

pub use reddit::RedditFeed;
pub use types::{CandidateImage, Post};

use async_trait::async_trait;

/// Feed result type
pub type Result<T> = std::result::Result<T, FeedError>;

/// Per-source recoverable feed errors
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("Network error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Malformed feed response: {0}")]
    Decode(String),

    #[error("Unknown source: {0}")]
    UnknownSource(String),
}

/// A polling source of image posts
#[async_trait]
pub trait Feed: Send {
    /// Fetch the next batch of posts for one source.
    ///
    /// Returns only posts newer than the previous call for the same source;
    /// an empty batch means there is nothing new.
    async fn poll(&mut self, source: &str) -> Result<Vec<Post>>;
}
