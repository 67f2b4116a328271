//! The fan-out download-and-dedup pipeline.
//!
//! One [`DownloadJob`] per distinct image URL per cycle: the image is fetched
//! once under the download governor, fingerprinted while streaming to a temp
//! file, then placed into every target profile's directory that hasn't
//! already received identical content according to the durable ledger.

mod cycle;
mod fetch;
mod filter;
mod job;
mod ledger;
mod place;
mod router;

pub use cycle::{CycleStats, run_cycle};
pub use fetch::{DEFAULT_SIZE_CAP, Download, fetch};
pub use filter::is_suitable;
pub use job::{DownloadJob, JobContext, JobOutcome};
pub use ledger::Ledger;
pub use place::{SafeFilename, place};
pub use router::SourceRouter;

/// Pipeline result type
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Per-job recoverable pipeline errors.
///
/// Everything here is caught at the job boundary and logged; none of these
/// abort sibling jobs or the cycle.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Network error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP status {status} for '{url}'")]
    HttpStatus { status: u16, url: String },

    #[error("Maximum download size of {limit} bytes exceeded for '{url}'")]
    SizeLimitExceeded { limit: u64, url: String },

    #[error("Filesystem error: {0}")]
    Filesystem(#[from] std::io::Error),

    #[error("Ledger error: {0}")]
    Ledger(#[from] sqlx::Error),

    #[error("Download already started")]
    AlreadyStarted,

    #[error("Download has not completed; no result is available")]
    NotStarted,

    #[error("Job was created with no target profiles")]
    EmptyJob,

    #[error("Shutting down; no download slot is available")]
    ShuttingDown,
}
