//! Durable delivery ledger.
//!
//! Maps `(content fingerprint, profile name)` to the path already used to
//! satisfy that profile with that content. The ledger is the only state that
//! survives restarts; a record means "do not re-save this content for this
//! profile". All of one job's mutations run inside a single transaction so a
//! crash mid-job can't leave a placed file and its record out of step beyond
//! the crash window.

use std::path::{Path, PathBuf};

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};
use tracing::info;

use super::Result;

const SCHEMA: &str = "\
CREATE TABLE IF NOT EXISTS delivered (
    fingerprint  TEXT NOT NULL,
    profile      TEXT NOT NULL,
    stored_path  TEXT NOT NULL,
    delivered_at TEXT NOT NULL,
    PRIMARY KEY (fingerprint, profile)
)";

const LOOKUP_SQL: &str =
    "SELECT stored_path FROM delivered WHERE fingerprint = ?1 AND profile = ?2";

// ON CONFLICT DO NOTHING: a key can never gain a second row, and a repeated
// record for the same key is a no-op rather than corruption.
const RECORD_SQL: &str = "\
INSERT INTO delivered (fingerprint, profile, stored_path, delivered_at)
VALUES (?1, ?2, ?3, ?4)
ON CONFLICT (fingerprint, profile) DO NOTHING";

/// The durable `(fingerprint, profile) -> stored path` mapping
#[derive(Clone)]
pub struct Ledger {
    pool: SqlitePool,
}

impl Ledger {
    /// Open (or create) the ledger database at `path`
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5));

        // Single connection: job transactions interleave reads and writes, and
        // two of those on separate connections would race to upgrade their
        // locks and one would die with SQLITE_BUSY. With one connection they
        // queue on pool acquire instead.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        sqlx::query(SCHEMA).execute(&pool).await?;

        info!("Ledger ready at '{}'", path.display());
        Ok(Self { pool })
    }

    /// Where was this content stored for this profile, if ever?
    pub async fn lookup(&self, fingerprint: &str, profile: &str) -> Result<Option<PathBuf>> {
        let stored: Option<String> = sqlx::query_scalar(LOOKUP_SQL)
            .bind(fingerprint)
            .bind(profile)
            .fetch_optional(&self.pool)
            .await?;
        Ok(stored.map(PathBuf::from))
    }

    /// Record a delivery. Idempotent per key.
    pub async fn record(&self, fingerprint: &str, profile: &str, stored_path: &Path) -> Result<()> {
        sqlx::query(RECORD_SQL)
            .bind(fingerprint)
            .bind(profile)
            .bind(stored_path.to_string_lossy().into_owned())
            .bind(chrono::Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Begin a transaction scoped to one job's placement decisions.
    ///
    /// Dropping the transaction without committing rolls every record back.
    pub async fn begin(&self) -> Result<LedgerTx<'_>> {
        Ok(LedgerTx {
            tx: self.pool.begin().await?,
        })
    }
}

/// One job's ledger transaction
pub struct LedgerTx<'a> {
    tx: Transaction<'a, Sqlite>,
}

impl LedgerTx<'_> {
    pub async fn lookup(&mut self, fingerprint: &str, profile: &str) -> Result<Option<PathBuf>> {
        let stored: Option<String> = sqlx::query_scalar(LOOKUP_SQL)
            .bind(fingerprint)
            .bind(profile)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(stored.map(PathBuf::from))
    }

    pub async fn record(
        &mut self,
        fingerprint: &str,
        profile: &str,
        stored_path: &Path,
    ) -> Result<()> {
        sqlx::query(RECORD_SQL)
            .bind(fingerprint)
            .bind(profile)
            .bind(stored_path.to_string_lossy().into_owned())
            .bind(chrono::Utc::now().to_rfc3339())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    /// Commit the job's mutations; this is the recovery unit
    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
