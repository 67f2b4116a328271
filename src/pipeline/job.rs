//! Download jobs: one governed fetch fanned out to every target profile.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::debug;

use crate::app::WatcherStatus;
use crate::config::Profile;

use super::{Ledger, PipelineError, Result, SafeFilename, fetch, place};

/// Everything a job needs, shared across all jobs in flight
#[derive(Clone)]
pub struct JobContext {
    pub client: reqwest::Client,
    pub ledger: Ledger,
    /// The download governor: the only hard concurrency limit in the system
    pub governor: Arc<Semaphore>,
    pub size_cap: u64,
    pub status: Arc<WatcherStatus>,
}

/// What one job accomplished
#[derive(Debug, Default)]
pub struct JobOutcome {
    /// Files written, one per profile at most
    pub placed: Vec<PathBuf>,
    /// Profiles skipped because the content was already delivered or present
    pub skipped: usize,
}

/// One distinct URL and every profile it must be delivered to
pub struct DownloadJob {
    url: String,
    profiles: Vec<Arc<Profile>>,
}

impl DownloadJob {
    /// A job must carry at least one target profile
    pub fn new(url: impl Into<String>, profiles: Vec<Arc<Profile>>) -> Result<Self> {
        if profiles.is_empty() {
            return Err(PipelineError::EmptyJob);
        }
        Ok(Self {
            url: url.into(),
            profiles,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn profiles(&self) -> &[Arc<Profile>] {
        &self.profiles
    }

    /// Merge another profile into this job's target set
    pub fn add_profile(&mut self, profile: Arc<Profile>) {
        if !self.profiles.iter().any(|p| p.name == profile.name) {
            self.profiles.push(profile);
        }
    }

    /// Wait for a governor permit, then fetch once and fan out to every
    /// target profile. The spooled temp file is deleted on every exit path.
    pub async fn run(self, ctx: &JobContext, skip_existing: bool) -> Result<JobOutcome> {
        let _permit = ctx
            .governor
            .acquire()
            .await
            .map_err(|_| PipelineError::ShuttingDown)?;

        ctx.status.download_started();
        let result = self.execute(ctx, skip_existing).await;
        ctx.status.download_finished();
        result
    }

    async fn execute(&self, ctx: &JobContext, skip_existing: bool) -> Result<JobOutcome> {
        // One fetch pays for every profile in the job.
        let fetched = fetch(&ctx.client, &self.url, ctx.size_cap).await?;
        let name = SafeFilename::from_url(&self.url, fetched.mime_type.as_deref());

        let mut outcome = JobOutcome::default();
        let mut tx = ctx.ledger.begin().await?;
        for profile in &self.profiles {
            if let Some(existing) = tx.lookup(&fetched.fingerprint, &profile.name).await? {
                debug!(
                    "Content {} already delivered to '{}' at '{}'. Skipping.",
                    fetched.fingerprint,
                    profile.name,
                    existing.display()
                );
                outcome.skipped += 1;
                continue;
            }

            match place(
                fetched.temp.path(),
                &profile.directory,
                &name.base,
                &name.extension,
                skip_existing,
                &fetched.fingerprint,
            )
            .await?
            {
                Some(path) => {
                    tx.record(&fetched.fingerprint, &profile.name, &path).await?;
                    outcome.placed.push(path);
                }
                None => outcome.skipped += 1,
            }
        }
        tx.commit().await?;

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn profile(name: &str) -> Arc<Profile> {
        Arc::new(Profile {
            name: name.to_string(),
            directory: PathBuf::from("/tmp").join(name),
            min_width: 1920,
            min_height: 1080,
            aspect_ratio: 16.0 / 9.0,
            aspect_tolerance: 0.02,
            allow_nsfw: false,
            sources: vec![],
        })
    }

    #[test]
    fn a_job_needs_profiles() {
        let result = DownloadJob::new("https://i.example/a.jpg", vec![]);
        assert!(matches!(result, Err(PipelineError::EmptyJob)));
    }

    #[test]
    fn merging_profiles_deduplicates_by_name() {
        let mut job =
            DownloadJob::new("https://i.example/a.jpg", vec![profile("desk")]).unwrap();
        job.add_profile(profile("desk"));
        job.add_profile(profile("phone"));

        assert_eq!(job.profiles().len(), 2);
    }
}
