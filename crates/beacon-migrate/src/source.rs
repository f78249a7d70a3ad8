//! Sequential reader over a beacon store.
//!
//! The store is a `redb` file with a single `beacons` table keyed by
//! 8-byte big-endian rounds. It is opened read-only: a read-write open
//! rewrites header and allocator state even when nothing is inserted.

use redb::{
    ReadOnlyDatabase, ReadOnlyTable, ReadableDatabase, ReadableTable, ReadableTableMetadata,
    TableDefinition,
};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::beacon::BeaconRecord;
use crate::error::{Error, Result};

/// Table holding the beacon chain, in both the source and the migrated store.
pub const BEACONS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("beacons");

/// Read-side handle on a source store.
#[derive(Debug, Clone)]
pub struct SourceReader {
    path: PathBuf,
}

impl SourceReader {
    /// Creates a reader for the store at `path`. Nothing is opened yet.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the source store.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Value of the lowest round, if the store holds any record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SourceIo`] if the store cannot be opened or read.
    pub fn first_value(&self) -> Result<Option<Vec<u8>>> {
        let db = self.open()?;
        let table = open_beacons(&db)?;
        let first = table.first().map_err(source_err)?;
        Ok(first.map(|(_, value)| value.value().to_vec()))
    }

    /// Number of records in the store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SourceIo`] if the store cannot be opened or read.
    pub fn count(&self) -> Result<u64> {
        let db = self.open()?;
        let table = open_beacons(&db)?;
        table.len().map_err(source_err)
    }

    /// Scans the whole store in ascending round order.
    ///
    /// Every record is decoded, counted, then handed to `on_record`. The
    /// token is checked before each record. Returns the number of records
    /// read. The store is closed when this returns, whatever the outcome.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] when the token fires, [`Error::SourceIo`]
    /// on storage failures, or whatever `on_record` returns.
    pub fn read_all<F>(&self, cancel: &CancellationToken, mut on_record: F) -> Result<u64>
    where
        F: FnMut(BeaconRecord) -> Result<()>,
    {
        let db = self.open()?;
        let table = open_beacons(&db)?;
        let mut rows = 0u64;

        for entry in table.iter().map_err(source_err)? {
            if cancel.is_cancelled() {
                debug!(rows, "source scan cancelled");
                return Err(Error::Cancelled);
            }

            let (key, value) = entry.map_err(source_err)?;
            let record = BeaconRecord::decode(key.value(), value.value())?;

            rows += 1;
            on_record(record)?;
        }

        Ok(rows)
    }

    fn open(&self) -> Result<ReadOnlyDatabase> {
        ReadOnlyDatabase::open(&self.path).map_err(|e| {
            Error::SourceIo(format!("cannot open {}: {e}", self.path.display()))
        })
    }
}

fn open_beacons(
    db: &impl ReadableDatabase,
) -> Result<ReadOnlyTable<&'static [u8], &'static [u8]>> {
    let txn = db.begin_read().map_err(source_err)?;
    txn.open_table(BEACONS).map_err(source_err)
}

fn source_err(err: impl std::fmt::Display) -> Error {
    Error::SourceIo(err.to_string())
}

#[cfg(test)]
#[path = "source_tests.rs"]
mod tests;
