//! One polling cycle: pull, filter, fan out, drain.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::config::Profile;
use crate::feed::{Feed, Post};

use super::{DownloadJob, JobContext, JobOutcome, PipelineError, SourceRouter, is_suitable};

/// Tallies for one completed cycle
#[derive(Debug, Default, Clone, Copy)]
pub struct CycleStats {
    pub posts: usize,
    pub images: usize,
    pub jobs: usize,
    pub placed: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Run one cycle to completion: poll every source, group suitable images
/// into one job per distinct URL, then drain every launched job.
///
/// Per-source and per-job failures are logged and isolated; the cycle always
/// runs to the end. The feed lock is held only while polling, so the next
/// cycle may start polling while this one's downloads drain; the governor
/// alone bounds resource use.
pub async fn run_cycle(
    feed: Arc<Mutex<Box<dyn Feed>>>,
    router: Arc<SourceRouter>,
    ctx: JobContext,
    skip_existing: bool,
) -> CycleStats {
    let mut stats = CycleStats::default();
    let mut jobs: HashMap<String, DownloadJob> = HashMap::new();

    {
        let mut feed = feed.lock().await;
        for source in router.source_ids() {
            info!("Fetching posts for source '{}'", source);
            let posts = match feed.poll(source).await {
                Ok(posts) => posts,
                Err(e) => {
                    error!("Failed to process source '{}': {}", source, e);
                    continue;
                }
            };
            for post in posts {
                stats.posts += 1;
                collect_jobs(&post, source, &router, &mut jobs, &mut stats);
            }
        }
    }

    stats.jobs = jobs.len();
    let mut tasks: JoinSet<(String, super::Result<JobOutcome>)> = JoinSet::new();
    for (url, job) in jobs {
        let ctx = ctx.clone();
        tasks.spawn(async move {
            let result = job.run(&ctx, skip_existing).await;
            (url, result)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((url, Ok(outcome))) => {
                for path in &outcome.placed {
                    info!("Downloaded '{}' to '{}'", url, path.display());
                }
                stats.placed += outcome.placed.len();
                stats.skipped += outcome.skipped;
            }
            Ok((url, Err(PipelineError::ShuttingDown))) => {
                debug!("Abandoned download of '{}' during shutdown", url);
                stats.failed += 1;
            }
            Ok((url, Err(e))) => {
                stats.failed += 1;
                error!("Unable to download '{}': {}", url, e);
            }
            Err(e) => {
                stats.failed += 1;
                error!("Download task failed: {}", e);
            }
        }
    }

    info!(
        "Cycle complete: {} posts, {} images, {} jobs, {} placed, {} skipped, {} failed",
        stats.posts, stats.images, stats.jobs, stats.placed, stats.skipped, stats.failed
    );
    stats
}

/// Match one post's images against the source's profiles and merge them into
/// the cycle's job set, one job per distinct URL
fn collect_jobs(
    post: &Post,
    source: &str,
    router: &SourceRouter,
    jobs: &mut HashMap<String, DownloadJob>,
    stats: &mut CycleStats,
) {
    info!("Processing post from '{}': {}", source, post.title);
    if post.images.is_empty() {
        debug!("No images found.");
        return;
    }

    for image in &post.images {
        stats.images += 1;
        info!(
            "Found an image ({} x {}): {}",
            image.width, image.height, image.url
        );

        let eligible: Vec<Arc<Profile>> = router
            .profiles_for(source)
            .iter()
            .filter(|profile| is_suitable(image, profile, post.nsfw, profile.aspect_tolerance))
            .cloned()
            .collect();
        if eligible.is_empty() {
            continue;
        }
        debug!(
            "Image is suitable for {}",
            eligible
                .iter()
                .map(|profile| profile.name.as_str())
                .collect::<Vec<_>>()
                .join(",")
        );

        match jobs.entry(image.url.clone()) {
            Entry::Occupied(mut entry) => {
                for profile in eligible {
                    entry.get_mut().add_profile(profile);
                }
            }
            Entry::Vacant(slot) => {
                // Eligible is non-empty here, so construction can't fail.
                if let Ok(job) = DownloadJob::new(image.url.clone(), eligible) {
                    slot.insert(job);
                }
            }
        }
    }
}
