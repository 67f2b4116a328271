//! Configuration loading and the resolved profile model.
//!
//! Configuration is layered from a TOML file plus `WALLWATCH_`-prefixed
//! environment overrides, deserialized into raw serde structs, then resolved
//! once at startup into read-only [`Profile`] values shared across the
//! pipeline.

use config::{Config, Environment, File};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Configuration result type
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Startup-fatal configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Source '{name}' referenced in profile '{profile}' doesn't exist")]
    UnknownSource { name: String, profile: String },

    #[error("Source '{0}' is never used by any profile")]
    OrphanSource(String),

    #[error("Source '{0}' is declared more than once")]
    DuplicateSource(String),

    #[error("No sources found in the configuration")]
    NoSources,

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level watcher configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WatcherConfig {
    /// Delay between poll cycles, in milliseconds
    #[serde(default = "default_update_interval_ms")]
    pub update_interval_ms: u64,
    /// Maximum number of simultaneously in-flight downloads
    #[serde(default = "default_max_downloads")]
    pub max_downloads: usize,
    /// Default relative aspect-ratio tolerance for profiles
    #[serde(default = "default_aspect_tolerance")]
    pub aspect_ratio_tolerance: f64,
    /// Per-download response size cap in bytes
    #[serde(default = "default_size_cap_bytes")]
    pub size_cap_bytes: u64,
    /// Location of the dedup ledger database
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,
    /// Bind address for the management interface; omit to disable
    pub management_addr: Option<SocketAddr>,
    /// Log file; log output goes to stdout when absent
    pub log_file: Option<PathBuf>,
    /// Optional Reddit OAuth credentials
    pub auth: Option<RedditAuth>,
    /// Content sources to poll
    #[serde(default)]
    pub sources: SourcesConfig,
    /// Destination profiles, keyed by profile name
    pub profiles: BTreeMap<String, ProfileConfig>,
}

/// Reddit application credentials for the OAuth client-credentials flow
#[derive(Debug, Clone, Deserialize)]
pub struct RedditAuth {
    pub client_id: String,
    pub client_secret: String,
}

/// Declared content sources
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourcesConfig {
    /// Subreddits, each polled under its own name
    #[serde(default)]
    pub subreddits: Vec<String>,
    /// Multireddits, keyed by source name
    #[serde(default)]
    pub multis: BTreeMap<String, MultiConfig>,
}

/// A multireddit reference
#[derive(Debug, Clone, Deserialize)]
pub struct MultiConfig {
    pub user: String,
    pub name: String,
}

/// Raw destination profile as written in the configuration file
#[derive(Debug, Clone, Deserialize)]
pub struct ProfileConfig {
    /// Directory downloaded images are placed into
    pub path: PathBuf,
    /// Minimum acceptable image width
    pub width: u32,
    /// Minimum acceptable image height
    pub height: u32,
    /// Whether NSFW-flagged content may be delivered to this profile
    #[serde(default)]
    pub allow_nsfw: bool,
    /// Overrides the global aspect-ratio tolerance when set
    pub aspect_tolerance: Option<f64>,
    /// Names of the sources this profile consumes
    pub sources: Vec<String>,
}

/// A resolved, read-only destination profile
#[derive(Debug)]
pub struct Profile {
    pub name: String,
    pub directory: PathBuf,
    pub min_width: u32,
    pub min_height: u32,
    /// Target aspect ratio, derived as `width / height`
    pub aspect_ratio: f64,
    pub aspect_tolerance: f64,
    pub allow_nsfw: bool,
    pub sources: Vec<String>,
}

/// What a source name points at
#[derive(Debug, Clone)]
pub enum SourceKind {
    Subreddit(String),
    Multi { user: String, name: String },
}

const fn default_update_interval_ms() -> u64 {
    600_000
}

const fn default_max_downloads() -> usize {
    4
}

const fn default_aspect_tolerance() -> f64 {
    0.02
}

const fn default_size_cap_bytes() -> u64 {
    50 * 1024 * 1024
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("wallwatch.sqlite")
}

impl WatcherConfig {
    /// Load configuration from a TOML file plus `WALLWATCH_` environment overrides
    pub fn load(path: &Path) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(File::from(path))
            .add_source(Environment::with_prefix("WALLWATCH").separator("__"))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the rest of the system assumes are sane
    pub fn validate(&self) -> Result<()> {
        if self.max_downloads == 0 {
            return Err(ConfigError::Invalid(
                "max_downloads must be at least 1".into(),
            ));
        }
        if self.aspect_ratio_tolerance <= 0.0 {
            return Err(ConfigError::Invalid(
                "aspect_ratio_tolerance must be positive".into(),
            ));
        }
        if self.size_cap_bytes == 0 {
            return Err(ConfigError::Invalid("size_cap_bytes must be positive".into()));
        }
        for (name, profile) in &self.profiles {
            if profile.width == 0 || profile.height == 0 {
                return Err(ConfigError::Invalid(format!(
                    "profile '{name}' has a zero dimension"
                )));
            }
            if let Some(tolerance) = profile.aspect_tolerance
                && tolerance <= 0.0
            {
                return Err(ConfigError::Invalid(format!(
                    "profile '{name}' has a non-positive aspect_tolerance"
                )));
            }
        }
        Ok(())
    }

    /// Delay between poll cycles
    pub const fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }

    /// Declared sources in a stable order, duplicates preserved for validation
    pub fn source_entries(&self) -> Vec<(String, SourceKind)> {
        let mut entries = Vec::new();
        for subreddit in &self.sources.subreddits {
            entries.push((subreddit.clone(), SourceKind::Subreddit(subreddit.clone())));
        }
        for (name, multi) in &self.sources.multis {
            entries.push((
                name.clone(),
                SourceKind::Multi {
                    user: multi.user.clone(),
                    name: multi.name.clone(),
                },
            ));
        }
        entries
    }

    /// Resolve raw profiles into shared read-only values
    pub fn resolve_profiles(&self) -> Vec<Arc<Profile>> {
        self.profiles
            .iter()
            .map(|(name, raw)| {
                Arc::new(Profile {
                    name: name.clone(),
                    directory: raw.path.clone(),
                    min_width: raw.width,
                    min_height: raw.height,
                    aspect_ratio: f64::from(raw.width) / f64::from(raw.height),
                    aspect_tolerance: raw
                        .aspect_tolerance
                        .unwrap_or(self.aspect_ratio_tolerance),
                    allow_nsfw: raw.allow_nsfw,
                    sources: raw.sources.clone(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;
    use std::io::Write;

    fn parse(toml: &str) -> WatcherConfig {
        Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    const MINIMAL: &str = r#"
        [sources]
        subreddits = ["EarthPorn"]

        [profiles.desk]
        path = "/tmp/wallpapers/desk"
        width = 1920
        height = 1080
        sources = ["EarthPorn"]
    "#;

    #[test]
    fn defaults_fill_in() {
        let config = parse(MINIMAL);
        config.validate().unwrap();

        assert_eq!(config.update_interval(), Duration::from_millis(600_000));
        assert_eq!(config.max_downloads, 4);
        assert_eq!(config.size_cap_bytes, 50 * 1024 * 1024);
        assert!(config.management_addr.is_none());
        assert!(config.auth.is_none());
    }

    #[test]
    fn profiles_resolve_ratio_and_tolerance() {
        let config = parse(
            r#"
            aspect_ratio_tolerance = 0.05

            [sources]
            subreddits = ["wallpapers"]

            [profiles.desk]
            path = "/tmp/desk"
            width = 1920
            height = 1080
            sources = ["wallpapers"]

            [profiles.phone]
            path = "/tmp/phone"
            width = 1080
            height = 1920
            aspect_tolerance = 0.01
            allow_nsfw = true
            sources = ["wallpapers"]
        "#,
        );

        let profiles = config.resolve_profiles();
        let desk = profiles.iter().find(|p| p.name == "desk").unwrap();
        let phone = profiles.iter().find(|p| p.name == "phone").unwrap();

        assert!((desk.aspect_ratio - 16.0 / 9.0).abs() < 1e-9);
        assert!((desk.aspect_tolerance - 0.05).abs() < 1e-9);
        assert!((phone.aspect_tolerance - 0.01).abs() < 1e-9);
        assert!(phone.allow_nsfw);
    }

    #[test]
    fn source_entries_cover_subreddits_and_multis() {
        let config = parse(
            r#"
            [sources]
            subreddits = ["EarthPorn"]

            [sources.multis.wide]
            user = "someone"
            name = "widescreen"

            [profiles.desk]
            path = "/tmp/desk"
            width = 1920
            height = 1080
            sources = ["EarthPorn", "wide"]
        "#,
        );

        let entries = config.source_entries();
        assert_eq!(entries.len(), 2);
        assert!(matches!(&entries[0].1, SourceKind::Subreddit(s) if s == "EarthPorn"));
        assert!(matches!(&entries[1].1, SourceKind::Multi { user, name } if user == "someone" && name == "widescreen"));
    }

    #[test]
    fn zero_dimension_is_rejected() {
        let config = parse(
            r#"
            [sources]
            subreddits = ["wallpapers"]

            [profiles.bad]
            path = "/tmp/bad"
            width = 0
            height = 1080
            sources = ["wallpapers"]
        "#,
        );

        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn load_reads_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallwatch.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();

        let config = WatcherConfig::load(&path).unwrap();
        assert_eq!(config.profiles.len(), 1);
    }
}
