//! Reddit listing client.
//!
//! Polls `/new` listings for subreddits and multireddits, keeping a `before`
//! cursor per source so each call only returns posts that arrived since the
//! previous one. Works anonymously against the public JSON endpoints, or
//! authenticated via the OAuth client-credentials flow when credentials are
//! configured.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::{RedditAuth, SourceKind};

use super::{Feed, FeedError, Post, Result};

const PUBLIC_BASE_URL: &str = "https://www.reddit.com";
const OAUTH_BASE_URL: &str = "https://oauth.reddit.com";
const TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";

/// Posts requested per poll
const BATCH_LIMIT: &str = "100";

/// Refresh the token this long before it actually expires
const TOKEN_SLACK: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<ListingChild>,
}

#[derive(Debug, Deserialize)]
struct ListingChild {
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct TokenInfo {
    access_token: String,
    expires_in: f64,
}

struct BearerToken {
    access_token: String,
    expires_at: Instant,
}

/// Reddit-backed [`Feed`] implementation
pub struct RedditFeed {
    client: reqwest::Client,
    sources: HashMap<String, SourceKind>,
    cursors: HashMap<String, String>,
    auth: Option<RedditAuth>,
    token: Option<BearerToken>,
    base_url: String,
    token_url: String,
}

impl RedditFeed {
    /// Create a feed over the public or OAuth Reddit API, depending on
    /// whether credentials were configured
    pub fn new(
        client: reqwest::Client,
        sources: HashMap<String, SourceKind>,
        auth: Option<RedditAuth>,
    ) -> Self {
        let base_url = if auth.is_some() {
            OAUTH_BASE_URL
        } else {
            PUBLIC_BASE_URL
        };
        Self::with_base_urls(client, sources, auth, base_url, TOKEN_URL)
    }

    /// Create a feed against explicit endpoints
    pub fn with_base_urls(
        client: reqwest::Client,
        sources: HashMap<String, SourceKind>,
        auth: Option<RedditAuth>,
        base_url: impl Into<String>,
        token_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            sources,
            cursors: HashMap::new(),
            auth,
            token: None,
            base_url: base_url.into(),
            token_url: token_url.into(),
        }
    }

    fn listing_path(kind: &SourceKind) -> String {
        match kind {
            SourceKind::Subreddit(subreddit) => format!("/r/{subreddit}/new.json"),
            SourceKind::Multi { user, name } => format!("/user/{user}/m/{name}/new.json"),
        }
    }

    /// Returns a bearer token when credentials are configured, fetching or
    /// refreshing it as needed
    async fn bearer(&mut self) -> Result<Option<String>> {
        let Some(auth) = &self.auth else {
            return Ok(None);
        };

        if let Some(token) = &self.token
            && token.expires_at > Instant::now() + TOKEN_SLACK
        {
            return Ok(Some(token.access_token.clone()));
        }

        debug!("Requesting a new access token");
        let response = self
            .client
            .post(&self.token_url)
            .basic_auth(&auth.client_id, Some(&auth.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::Api {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let info: TokenInfo = response.json().await?;
        let access_token = info.access_token.clone();
        self.token = Some(BearerToken {
            access_token: info.access_token,
            expires_at: Instant::now() + Duration::from_secs_f64(info.expires_in.max(0.0)),
        });
        info!("Acquired a new access token");
        Ok(Some(access_token))
    }
}

#[async_trait]
impl Feed for RedditFeed {
    async fn poll(&mut self, source: &str) -> Result<Vec<Post>> {
        let kind = self
            .sources
            .get(source)
            .cloned()
            .ok_or_else(|| FeedError::UnknownSource(source.to_string()))?;

        let url = format!("{}{}", self.base_url, Self::listing_path(&kind));
        let mut request = self
            .client
            .get(&url)
            .query(&[("raw_json", "1"), ("limit", BATCH_LIMIT)]);
        if let Some(before) = self.cursors.get(source) {
            request = request.query(&[("before", before.as_str())]);
        }
        if let Some(token) = self.bearer().await? {
            request = request.bearer_auth(token);
        }

        debug!("Polling '{}' via {}", source, url);
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::Api {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let listing: Listing = response.json().await?;

        // Advance the cursor past the newest raw entry, decodable or not, so
        // a permanently broken post can't wedge the source.
        let newest = listing
            .data
            .children
            .first()
            .and_then(|child| child.data.get("name"))
            .and_then(|name| name.as_str())
            .map(str::to_string);

        let mut posts = Vec::new();
        for child in &listing.data.children {
            match Post::decode(&child.data) {
                Ok(post) => posts.push(post),
                Err(e) => warn!("Skipping malformed post from '{}': {}", source, e),
            }
        }

        if let Some(name) = newest {
            self.cursors.insert(source.to_string(), name);
        }

        // Listings arrive newest-first; hand posts over in arrival order.
        posts.reverse();
        Ok(posts)
    }
}
