//! Embedded (redb) writer.
//!
//! Builds a new store next to the source with the raw encoding: the value
//! of each round is its signature alone. Everything is written in one
//! write transaction, committed only if the whole stream was consumed.

use async_trait::async_trait;
use redb::Builder;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::beacon::BeaconRecord;
use crate::config::Target;
use crate::error::{Error, Result};
use crate::source::BEACONS;
use crate::writer::BeaconWriter;

/// Approximate in-memory footprint of one migrated record.
const RECORD_FOOTPRINT: usize = 256;

const MIN_CACHE_SIZE: usize = 64 * 1024 * 1024;
const MAX_CACHE_SIZE: usize = 1024 * 1024 * 1024;

/// Writer building the migrated store at a staging path.
#[derive(Debug, Clone)]
pub struct EmbeddedWriter {
    staging: PathBuf,
    cache_size: usize,
}

impl EmbeddedWriter {
    /// Creates a writer for `staging`, tuned for `buffer_size` in-flight records.
    #[must_use]
    pub fn new(staging: impl Into<PathBuf>, buffer_size: usize) -> Self {
        Self {
            staging: staging.into(),
            cache_size: cache_size_for(buffer_size),
        }
    }

    /// Path the new store is written to.
    #[must_use]
    pub fn staging_path(&self) -> &Path {
        &self.staging
    }

    /// Page cache size the store is opened with.
    #[must_use]
    pub fn cache_size(&self) -> usize {
        self.cache_size
    }
}

/// Cache large enough to keep a full buffer of pages dirty before commit.
fn cache_size_for(buffer_size: usize) -> usize {
    buffer_size
        .saturating_mul(RECORD_FOOTPRINT)
        .clamp(MIN_CACHE_SIZE, MAX_CACHE_SIZE)
}

#[async_trait]
impl BeaconWriter for EmbeddedWriter {
    fn target(&self) -> Target {
        Target::Embedded
    }

    async fn write_all(
        &mut self,
        records: mpsc::Receiver<BeaconRecord>,
        cancel: CancellationToken,
    ) -> Result<u64> {
        let staging = self.staging.clone();
        let cache_size = self.cache_size;

        tokio::task::spawn_blocking(move || write_store(&staging, cache_size, records, &cancel))
            .await
            .map_err(|e| Error::DestinationIo(format!("embedded writer task failed: {e}")))?
    }
}

fn write_store(
    path: &Path,
    cache_size: usize,
    mut records: mpsc::Receiver<BeaconRecord>,
    cancel: &CancellationToken,
) -> Result<u64> {
    let started = Instant::now();

    if path.exists() {
        warn!(path = %path.display(), "removing leftover staging store");
        std::fs::remove_file(path)
            .map_err(|e| Error::DestinationIo(format!("cannot remove {}: {e}", path.display())))?;
    }

    let db = Builder::new()
        .set_cache_size(cache_size)
        .create(path)
        .map_err(|e| Error::DestinationIo(format!("cannot create {}: {e}", path.display())))?;

    let txn = db.begin_write().map_err(destination_err)?;
    let mut rows = 0u64;
    {
        let mut table = txn.open_table(BEACONS).map_err(destination_err)?;
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let Some(record) = records.blocking_recv() else {
                break;
            };
            table
                .insert(record.key().as_slice(), record.signature.as_slice())
                .map_err(destination_err)?;
            rows += 1;
        }
    }

    // The reader cancels before closing the channel when it fails.
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    txn.commit().map_err(destination_err)?;

    info!(
        rows,
        finished_in = ?started.elapsed(),
        "finished saving data in embedded store"
    );
    Ok(rows)
}

fn destination_err(err: impl std::fmt::Display) -> Error {
    Error::DestinationIo(err.to_string())
}

#[cfg(test)]
#[path = "embedded_tests.rs"]
mod tests;
