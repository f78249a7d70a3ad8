//! Pre-flight check deciding whether a migration has to run.

use std::path::Path;
use tracing::{debug, warn};

use crate::beacon::BeaconRecord;
use crate::config::{MigrationConfig, Target};
use crate::error::{Error, Result};
use crate::source::SourceReader;

/// Decides whether the configured migration is needed.
///
/// Returns `Ok(())` when it must run and [`Error::MigrationNotNeeded`] when
/// it has already happened. Any other error is a hard failure.
///
/// # Errors
///
/// See above; storage and connection failures surface as their own kinds.
pub async fn should_migrate(config: &MigrationConfig) -> Result<()> {
    match config.target {
        Target::Embedded => {
            should_migrate_embedded(&SourceReader::new(&config.source), &config.marker_path())
        }
        Target::Relational => should_migrate_relational(&config.pg_dsn, &config.beacon).await,
    }
}

/// The embedded migration is needed while the first record still decodes
/// under the legacy encoding.
///
/// # Errors
///
/// Returns [`Error::Commit`] if `marker` exists, [`Error::SourceIo`] if the
/// source cannot be read and [`Error::MigrationNotNeeded`] otherwise.
pub fn should_migrate_embedded(source: &SourceReader, marker: &Path) -> Result<()> {
    if marker.exists() {
        return Err(Error::Commit(format!(
            "{} exists: a previous store swap was interrupted, check the store and its .old \
             and -migrated siblings, then remove the marker",
            marker.display()
        )));
    }

    match source.first_value()? {
        Some(value) if BeaconRecord::decode_legacy(&value).is_ok() => {
            debug!(source = %source.path().display(), "source store uses the legacy encoding");
            Ok(())
        }
        Some(_) => Err(Error::MigrationNotNeeded),
        None => {
            debug!(source = %source.path().display(), "source store is empty");
            Err(Error::MigrationNotNeeded)
        }
    }
}

#[cfg(feature = "postgres")]
async fn should_migrate_relational(dsn: &str, beacon: &str) -> Result<()> {
    let store = crate::postgres::PgStore::connect(dsn, beacon).await?;
    let rows = store.len().await;
    store.close().await;

    let rows = rows?;
    if rows != 0 {
        warn!(beacon, rows, "postgres already holds beacon rounds, skipping migration");
        return Err(Error::MigrationNotNeeded);
    }
    Ok(())
}

#[cfg(not(feature = "postgres"))]
async fn should_migrate_relational(_dsn: &str, _beacon: &str) -> Result<()> {
    Err(Error::Config(
        "relational target requires the `postgres` feature".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{write_empty_store, write_legacy_store, write_raw_store};
    use tempfile::tempdir;

    #[test]
    fn test_legacy_source_needs_migration() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("beacons.db");
        write_legacy_store(&path, 3);

        let result = should_migrate_embedded(&SourceReader::new(&path), &dir.path().join("m"));

        assert!(result.is_ok());
    }

    #[test]
    fn test_raw_source_is_not_migrated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("beacons.db");
        write_raw_store(&path, 3);

        let result = should_migrate_embedded(&SourceReader::new(&path), &dir.path().join("m"));

        assert!(matches!(result, Err(Error::MigrationNotNeeded)));
    }

    #[test]
    fn test_empty_source_is_not_migrated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("beacons.db");
        write_empty_store(&path);

        let result = should_migrate_embedded(&SourceReader::new(&path), &dir.path().join("m"));

        assert!(matches!(result, Err(Error::MigrationNotNeeded)));
    }

    #[test]
    fn test_leftover_marker_blocks_migration() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("beacons.db");
        let marker = dir.path().join("beacons.db.migrating");
        write_legacy_store(&path, 3);
        std::fs::write(&marker, b"").unwrap();

        let result = should_migrate_embedded(&SourceReader::new(&path), &marker);

        assert!(matches!(result, Err(Error::Commit(_))));
    }

    #[tokio::test]
    async fn test_unreadable_source_is_hard_error() {
        let dir = tempdir().unwrap();
        let config = MigrationConfig::new(dir.path().join("absent.db"), "default", Target::Embedded);

        let result = should_migrate(&config).await;

        assert!(matches!(result, Err(Error::SourceIo(_))));
    }
}
