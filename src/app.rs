//! The watcher itself: owns every collaborator and drives the poll loop.
//!
//! Constructed once at startup; there is no ambient global state. The run
//! loop launches one cycle immediately (skipping files that already exist in
//! the destinations), then keeps launching cycles on a jittered interval
//! until told to shut down.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use tokio::sync::{Mutex, Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::config::WatcherConfig;
use crate::feed::{Feed, RedditFeed};
use crate::pipeline::{CycleStats, JobContext, Ledger, SourceRouter, run_cycle};

/// User agent sent on every outbound request
pub const USER_AGENT: &str = concat!("wallwatch/", env!("CARGO_PKG_VERSION"));

/// Startup-fatal assembly errors
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error("Failed to open ledger: {0}")]
    Ledger(#[from] crate::pipeline::PipelineError),

    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Live counters shared between the pipeline and the management interface
pub struct WatcherStatus {
    started_at: DateTime<Utc>,
    cycles_completed: AtomicU64,
    posts_seen: AtomicU64,
    images_seen: AtomicU64,
    images_placed: AtomicU64,
    images_skipped: AtomicU64,
    jobs_failed: AtomicU64,
    downloads_in_flight: AtomicU64,
}

/// Point-in-time copy of the watcher counters
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub started_at: String,
    pub cycles_completed: u64,
    pub posts_seen: u64,
    pub images_seen: u64,
    pub images_placed: u64,
    pub images_skipped: u64,
    pub jobs_failed: u64,
    pub downloads_in_flight: u64,
}

impl WatcherStatus {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            cycles_completed: AtomicU64::new(0),
            posts_seen: AtomicU64::new(0),
            images_seen: AtomicU64::new(0),
            images_placed: AtomicU64::new(0),
            images_skipped: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            downloads_in_flight: AtomicU64::new(0),
        }
    }

    pub fn download_started(&self) {
        self.downloads_in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub fn download_finished(&self) {
        self.downloads_in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_cycle(&self, stats: &CycleStats) {
        self.cycles_completed.fetch_add(1, Ordering::Relaxed);
        self.posts_seen.fetch_add(stats.posts as u64, Ordering::Relaxed);
        self.images_seen.fetch_add(stats.images as u64, Ordering::Relaxed);
        self.images_placed.fetch_add(stats.placed as u64, Ordering::Relaxed);
        self.images_skipped.fetch_add(stats.skipped as u64, Ordering::Relaxed);
        self.jobs_failed.fetch_add(stats.failed as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            started_at: self.started_at.to_rfc3339(),
            cycles_completed: self.cycles_completed.load(Ordering::Relaxed),
            posts_seen: self.posts_seen.load(Ordering::Relaxed),
            images_seen: self.images_seen.load(Ordering::Relaxed),
            images_placed: self.images_placed.load(Ordering::Relaxed),
            images_skipped: self.images_skipped.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            downloads_in_flight: self.downloads_in_flight.load(Ordering::Relaxed),
        }
    }
}

impl Default for WatcherStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// The assembled watcher
pub struct Watcher {
    config: WatcherConfig,
    router: Arc<SourceRouter>,
    feed: Arc<Mutex<Box<dyn Feed>>>,
    ctx: JobContext,
    status: Arc<WatcherStatus>,
}

impl Watcher {
    /// Validate configuration and assemble every collaborator
    pub async fn new(config: WatcherConfig) -> Result<Self, StartupError> {
        config.validate()?;
        let profiles = config.resolve_profiles();
        let entries = config.source_entries();
        let router = Arc::new(SourceRouter::build(&entries, &profiles)?);

        let ledger = Ledger::open(&config.ledger_path).await?;
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        let sources: HashMap<_, _> = entries.into_iter().collect();
        let feed: Box<dyn Feed> =
            Box::new(RedditFeed::new(client.clone(), sources, config.auth.clone()));

        let status = Arc::new(WatcherStatus::new());
        let ctx = JobContext {
            client,
            ledger,
            governor: Arc::new(Semaphore::new(config.max_downloads)),
            size_cap: config.size_cap_bytes,
            status: Arc::clone(&status),
        };

        Ok(Self {
            config,
            router,
            feed: Arc::new(Mutex::new(feed)),
            ctx,
            status,
        })
    }

    pub fn status(&self) -> Arc<WatcherStatus> {
        Arc::clone(&self.status)
    }

    fn launch_cycle(&self, cycles: &mut JoinSet<()>, skip_existing: bool) {
        let feed = Arc::clone(&self.feed);
        let router = Arc::clone(&self.router);
        let ctx = self.ctx.clone();
        let status = Arc::clone(&self.status);
        cycles.spawn(async move {
            let stats = run_cycle(feed, router, ctx, skip_existing).await;
            status.record_cycle(&stats);
        });
    }

    /// Run until the shutdown signal fires, then drain in-flight work.
    ///
    /// Cycles overlap deliberately: the timer keeps firing while a previous
    /// cycle drains, and the governor alone caps concurrent downloads. On
    /// shutdown the governor is closed so queued downloads abort cleanly
    /// while in-flight ones are allowed to finish.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        let mut cycles = JoinSet::new();

        info!("Doing initial fetch...");
        self.launch_cycle(&mut cycles, true);
        info!(
            "Watching for new posts every {:?}",
            self.config.update_interval()
        );

        loop {
            let delay = jittered(self.config.update_interval());
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    // Reap cycles that have already finished.
                    while cycles.try_join_next().is_some() {}
                    self.launch_cycle(&mut cycles, false);
                }
                _ = shutdown.changed() => break,
            }
        }

        warn!("Shutting Down...");
        self.ctx.governor.close();
        while cycles.join_next().await.is_some() {}
    }
}

/// Spread poll cycles out by +-10% so restarts don't line up request bursts
fn jittered(base: Duration) -> Duration {
    base.mul_f64(rand::rng().random_range(0.9..1.1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProfileConfig, SourcesConfig};
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    #[test]
    fn jitter_stays_within_ten_percent() {
        let base = Duration::from_millis(10_000);
        for _ in 0..100 {
            let delay = jittered(base);
            assert!(delay >= Duration::from_millis(9_000));
            assert!(delay <= Duration::from_millis(11_000));
        }
    }

    #[test]
    fn status_counters_accumulate() {
        let status = WatcherStatus::new();
        status.download_started();
        status.record_cycle(&CycleStats {
            posts: 3,
            images: 5,
            jobs: 2,
            placed: 2,
            skipped: 1,
            failed: 1,
        });

        let snapshot = status.snapshot();
        assert_eq!(snapshot.cycles_completed, 1);
        assert_eq!(snapshot.posts_seen, 3);
        assert_eq!(snapshot.images_placed, 2);
        assert_eq!(snapshot.downloads_in_flight, 1);

        status.download_finished();
        assert_eq!(status.snapshot().downloads_in_flight, 0);
    }

    #[tokio::test]
    async fn startup_fails_fast_on_bad_routing() {
        let dir = tempfile::tempdir().unwrap();
        let config = WatcherConfig {
            update_interval_ms: 600_000,
            max_downloads: 2,
            aspect_ratio_tolerance: 0.02,
            size_cap_bytes: 1024,
            ledger_path: dir.path().join("ledger.sqlite"),
            management_addr: None,
            log_file: None,
            auth: None,
            sources: SourcesConfig {
                subreddits: vec!["wallpapers".to_string()],
                multis: BTreeMap::new(),
            },
            profiles: BTreeMap::from([(
                "desk".to_string(),
                ProfileConfig {
                    path: PathBuf::from("/tmp/desk"),
                    width: 1920,
                    height: 1080,
                    allow_nsfw: false,
                    aspect_tolerance: None,
                    sources: vec!["missing".to_string()],
                },
            )]),
        };

        let result = Watcher::new(config).await;
        assert!(matches!(result, Err(StartupError::Config(_))));
    }
}
