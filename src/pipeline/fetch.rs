//! Streaming image fetcher.
//!
//! Downloads one URL to a temp file, feeding every chunk through a SHA-256
//! accumulator so the content fingerprint is ready the moment the transfer
//! completes. The body is never buffered whole in memory, and a transfer that
//! grows past the size cap is abandoned immediately.

use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::{PipelineError, Result};

/// Default per-download response size cap: 50 MiB
pub const DEFAULT_SIZE_CAP: u64 = 50 * 1024 * 1024;

/// Lifecycle of one download attempt. Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    NotStarted,
    InProgress,
    Done,
    Failed,
}

/// A completed transfer: the spooled bytes plus their identity
pub struct Fetched {
    /// Temp file holding the body; deleted when dropped
    pub temp: NamedTempFile,
    /// Lowercase hex SHA-256 of the body
    pub fingerprint: String,
    /// `Content-Type` header value, if the server sent one
    pub mime_type: Option<String>,
}

/// One single-use download attempt
pub struct Download {
    url: String,
    size_cap: u64,
    state: DownloadState,
    bytes_received: u64,
    bytes_total: Option<u64>,
    mime_type: Option<String>,
    fingerprint: Option<String>,
    temp: Option<NamedTempFile>,
}

impl Download {
    pub fn new(url: impl Into<String>, size_cap: u64) -> Self {
        Self {
            url: url.into(),
            size_cap,
            state: DownloadState::NotStarted,
            bytes_received: 0,
            bytes_total: None,
            mime_type: None,
            fingerprint: None,
            temp: None,
        }
    }

    pub const fn state(&self) -> DownloadState {
        self.state
    }

    pub const fn is_started(&self) -> bool {
        !matches!(self.state, DownloadState::NotStarted)
    }

    pub const fn is_done(&self) -> bool {
        matches!(self.state, DownloadState::Done)
    }

    /// Percent complete, 0-100, once the total size is known; 100 exactly
    /// when done. When the server never sent `Content-Length` this returns a
    /// negative sentinel proportional to the bytes received instead, so
    /// callers must not assume monotonic progress.
    pub fn progress(&self) -> f64 {
        if self.is_done() {
            return 100.0;
        }
        match self.bytes_total {
            Some(total) if total > 0 => self.bytes_received as f64 / total as f64 * 100.0,
            _ => -(self.bytes_received as f64),
        }
    }

    /// Content fingerprint; only readable once the download is done
    pub fn fingerprint(&self) -> Result<&str> {
        self.fingerprint.as_deref().ok_or(PipelineError::NotStarted)
    }

    /// `Content-Type` reported by the server, once headers have arrived
    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    /// Run the transfer. A `Download` is single-use; calling this on an
    /// already-started instance fails with [`PipelineError::AlreadyStarted`].
    pub async fn run(&mut self, client: &reqwest::Client) -> Result<()> {
        if self.is_started() {
            return Err(PipelineError::AlreadyStarted);
        }
        self.state = DownloadState::InProgress;

        match self.transfer(client).await {
            Ok(()) => {
                self.state = DownloadState::Done;
                Ok(())
            }
            Err(e) => {
                // Partial temp data (if any) was dropped inside transfer().
                self.state = DownloadState::Failed;
                Err(e)
            }
        }
    }

    async fn transfer(&mut self, client: &reqwest::Client) -> Result<()> {
        info!("Downloading {}", self.url);

        let response = client.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::HttpStatus {
                status: status.as_u16(),
                url: self.url.clone(),
            });
        }

        self.mime_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        self.bytes_total = response.content_length();
        debug!("Discovered Content-Type: {:?}", self.mime_type);

        // The temp file stays local until the transfer succeeds, so any
        // failure below drops (and deletes) the partial spool.
        let temp = NamedTempFile::new()?;
        let mut file = tokio::fs::File::from_std(temp.reopen()?);
        let mut hasher = Sha256::new();

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            self.bytes_received += chunk.len() as u64;
            if self.bytes_received > self.size_cap {
                return Err(PipelineError::SizeLimitExceeded {
                    limit: self.size_cap,
                    url: self.url.clone(),
                });
            }
            hasher.update(&chunk);
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        let fingerprint = hex::encode(hasher.finalize());
        info!("Download complete. Hash is {}", fingerprint);
        self.fingerprint = Some(fingerprint);
        self.temp = Some(temp);
        Ok(())
    }

    /// Consume a finished download, yielding the spooled file and fingerprint
    pub fn into_fetched(self) -> Result<Fetched> {
        match (self.temp, self.fingerprint) {
            (Some(temp), Some(fingerprint)) => Ok(Fetched {
                temp,
                fingerprint,
                mime_type: self.mime_type,
            }),
            _ => Err(PipelineError::NotStarted),
        }
    }
}

/// Fetch one URL end to end
pub async fn fetch(client: &reqwest::Client, url: &str, size_cap: u64) -> Result<Fetched> {
    let mut download = Download::new(url, size_cap);
    download.run(client).await?;
    download.into_fetched()
}
