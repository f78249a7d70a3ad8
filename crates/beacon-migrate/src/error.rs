//! Error types for `beacon-migrate`.
//!
//! Every failure of the migration engine maps to one variant of [`Error`].
//! [`Error::MigrationNotNeeded`] is the odd one out: it is an expected
//! outcome that callers treat as a successful no-op.

use thiserror::Error;

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while migrating a beacon store.
///
/// Error codes follow the pattern `MIGRATE-XXX`.
#[derive(Error, Debug)]
pub enum Error {
    /// The source or destination is already in its final shape (MIGRATE-001).
    #[error("[MIGRATE-001] Migration not needed")]
    MigrationNotNeeded,

    /// Invalid invocation or configuration (MIGRATE-002).
    #[error("[MIGRATE-002] Configuration error: {0}")]
    Config(String),

    /// Cannot open, read or scan the source store (MIGRATE-003).
    #[error("[MIGRATE-003] Source error: {0}")]
    SourceIo(String),

    /// Cannot open, create or write the destination (MIGRATE-004).
    #[error("[MIGRATE-004] Destination error: {0}")]
    DestinationIo(String),

    /// Relational schema migration or constraint toggling failed (MIGRATE-005).
    #[error("[MIGRATE-005] Schema error: {0}")]
    Schema(String),

    /// Read and written row counts differ (MIGRATE-006).
    #[error(
        "[MIGRATE-006] Not all rounds migrated successfully: expected {expected}, migrated {actual}. \
         Restore the missing rounds from the beacon network before migrating again"
    )]
    Verification {
        /// Rows read from the source.
        expected: u64,
        /// Rows written to the destination.
        actual: u64,
    },

    /// The file swap of the embedded backend failed (MIGRATE-007).
    #[error("[MIGRATE-007] Commit error: {0}")]
    Commit(String),

    /// A pipeline stage stopped because the migration was cancelled (MIGRATE-008).
    #[error("[MIGRATE-008] Migration cancelled")]
    Cancelled,

    /// IO error (MIGRATE-009).
    #[error("[MIGRATE-009] IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML configuration parsing error (MIGRATE-010).
    #[error("[MIGRATE-010] YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Returns the error code (e.g., "MIGRATE-001").
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::MigrationNotNeeded => "MIGRATE-001",
            Self::Config(_) => "MIGRATE-002",
            Self::SourceIo(_) => "MIGRATE-003",
            Self::DestinationIo(_) => "MIGRATE-004",
            Self::Schema(_) => "MIGRATE-005",
            Self::Verification { .. } => "MIGRATE-006",
            Self::Commit(_) => "MIGRATE-007",
            Self::Cancelled => "MIGRATE-008",
            Self::Io(_) => "MIGRATE-009",
            Self::Yaml(_) => "MIGRATE-010",
        }
    }

    /// Returns true for the "nothing to do" outcome.
    #[must_use]
    pub const fn is_not_needed(&self) -> bool {
        matches!(self, Self::MigrationNotNeeded)
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Self::DestinationIo(err.to_string())
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
