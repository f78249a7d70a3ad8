//! Verification and commit of a finished migration.
//!
//! Nothing becomes visible unless every record read from the source was
//! written to the destination.
//!
//! The embedded commit is two renames, not one atomic step:
//!
//! 1. `<source>` → `<source>.old`
//! 2. `<source>-migrated` → `<source>`
//!
//! A marker file `<source>.migrating` exists for the duration of the swap.
//! If the process dies between the renames the marker stays behind and the
//! next run refuses to start until the files are sorted out by hand.

use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::config::{MigrationConfig, Target};
use crate::error::{Error, Result};

/// Rows seen by each pipeline stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowCounts {
    /// Records read from the source.
    pub existing: u64,
    /// Records written to the destination.
    pub migrated: u64,
}

/// Fails unless every record read was written.
///
/// # Errors
///
/// Returns [`Error::Verification`] when the counts differ.
pub fn verify_counts(counts: RowCounts) -> Result<()> {
    if counts.existing != counts.migrated {
        error!(
            expected = counts.existing,
            actually = counts.migrated,
            "not all rounds migrated successfully"
        );
        return Err(Error::Verification {
            expected: counts.existing,
            actual: counts.migrated,
        });
    }
    Ok(())
}

/// Makes a verified migration authoritative.
pub trait Committer: Send + Sync {
    /// Destination backend.
    fn target(&self) -> Target;

    /// Applies the commit. Counts are already verified.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Commit`] if the destination cannot be swapped in.
    fn apply(&self, counts: RowCounts) -> Result<()>;
}

/// Verifies the counts, then applies the commit.
///
/// Nothing is touched when verification fails.
///
/// # Errors
///
/// Returns [`Error::Verification`] or the committer's error.
pub fn commit(counts: RowCounts, committer: &dyn Committer) -> Result<()> {
    verify_counts(counts)?;
    committer.apply(counts)
}

/// Create the committer for the configured target.
#[must_use]
pub fn create_committer(config: &MigrationConfig) -> Box<dyn Committer> {
    match config.target {
        Target::Embedded => Box::new(FileSwapCommitter::from_config(config)),
        Target::Relational => Box::new(RelationalCommitter::new(config.beacon.clone())),
    }
}

/// Swaps the migrated store in place of the original.
#[derive(Debug, Clone)]
pub struct FileSwapCommitter {
    source: PathBuf,
    staging: PathBuf,
    backup: PathBuf,
    marker: PathBuf,
}

impl FileSwapCommitter {
    /// Creates a committer with explicit paths.
    #[must_use]
    pub fn new(source: PathBuf, staging: PathBuf, backup: PathBuf, marker: PathBuf) -> Self {
        Self {
            source,
            staging,
            backup,
            marker,
        }
    }

    /// Creates a committer using the paths derived from the source.
    #[must_use]
    pub fn from_config(config: &MigrationConfig) -> Self {
        Self::new(
            config.source.clone(),
            config.staging_path(),
            config.backup_path(),
            config.marker_path(),
        )
    }

    /// Path of the swap marker.
    #[must_use]
    pub fn marker_path(&self) -> &Path {
        &self.marker
    }
}

impl Committer for FileSwapCommitter {
    fn target(&self) -> Target {
        Target::Embedded
    }

    fn apply(&self, counts: RowCounts) -> Result<()> {
        info!(rows = counts.migrated, "swapping migrated store into place");

        std::fs::write(
            &self.marker,
            format!(
                "source={}\nbackup={}\nstaging={}\n",
                self.source.display(),
                self.backup.display(),
                self.staging.display()
            ),
        )
        .map_err(|e| Error::Commit(format!("cannot write {}: {e}", self.marker.display())))?;

        if let Err(e) = std::fs::rename(&self.source, &self.backup) {
            let _ = std::fs::remove_file(&self.marker);
            return Err(Error::Commit(format!(
                "cannot move {} to {}: {e}",
                self.source.display(),
                self.backup.display()
            )));
        }

        std::fs::rename(&self.staging, &self.source).map_err(|e| {
            Error::Commit(format!(
                "cannot move {} to {}: {e}; the original store is at {}",
                self.staging.display(),
                self.source.display(),
                self.backup.display()
            ))
        })?;

        if let Err(e) = std::fs::remove_file(&self.marker) {
            warn!(
                marker = %self.marker.display(),
                error = %e,
                "store swapped but the marker could not be removed, delete it by hand"
            );
        }

        info!(
            source = %self.source.display(),
            backup = %self.backup.display(),
            "migrated store is now in place"
        );
        Ok(())
    }
}

/// Commit for PostgreSQL. Rows are already visible; only the counts matter.
#[derive(Debug, Clone)]
pub struct RelationalCommitter {
    beacon: String,
}

impl RelationalCommitter {
    /// Creates a committer for the named beacon.
    #[must_use]
    pub fn new(beacon: String) -> Self {
        Self { beacon }
    }
}

impl Committer for RelationalCommitter {
    fn target(&self) -> Target {
        Target::Relational
    }

    fn apply(&self, counts: RowCounts) -> Result<()> {
        info!(
            beacon = %self.beacon,
            rows = counts.migrated,
            "all rounds loaded into postgres"
        );
        Ok(())
    }
}

#[cfg(test)]
#[path = "commit_tests.rs"]
mod tests;
