//! Relational (PostgreSQL) writer.
//!
//! Loads records in batches of at most [`RELATIONAL_BATCH_LIMIT`] rows with
//! the beacon foreign key dropped, then restores the key whatever the
//! outcome of the load.

use async_trait::async_trait;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::beacon::BeaconRecord;
use crate::buffer::{relational_batch_size, RELATIONAL_BATCH_LIMIT};
use crate::config::Target;
use crate::error::{Error, Result};
use crate::postgres::PgStore;
use crate::writer::BeaconWriter;

/// Writer loading records into PostgreSQL.
#[derive(Debug, Clone)]
pub struct RelationalWriter {
    dsn: String,
    beacon: String,
    batch_size: usize,
}

impl RelationalWriter {
    /// Creates a writer; the batch size is the buffer size capped for PostgreSQL.
    #[must_use]
    pub fn new(dsn: String, beacon: String, buffer_size: usize) -> Self {
        Self {
            dsn,
            beacon,
            batch_size: relational_batch_size(buffer_size),
        }
    }

    /// Rows flushed per insert statement.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

#[async_trait]
impl BeaconWriter for RelationalWriter {
    fn target(&self) -> Target {
        Target::Relational
    }

    async fn write_all(
        &mut self,
        mut records: mpsc::Receiver<BeaconRecord>,
        cancel: CancellationToken,
    ) -> Result<u64> {
        let started = Instant::now();
        let store = PgStore::connect(&self.dsn, &self.beacon).await?;

        info!("dropping the foreign key from the beacon table");
        if let Err(e) = store.drop_fk().await {
            store.close().await;
            return Err(e);
        }

        let loaded = load(&store, &mut records, &cancel, self.batch_size).await;

        info!("adding the foreign key back to the beacon table");
        let restored = store.add_fk().await;
        store.close().await;

        let rows = match (loaded, restored) {
            (Ok(rows), Ok(())) => rows,
            (Ok(_), Err(restore)) => return Err(restore),
            (Err(load), Ok(())) => return Err(load),
            (Err(load), Err(restore)) => {
                error!(error = %restore, "failed to restore the foreign key after a failed load");
                return Err(load);
            }
        };

        info!(
            rows,
            finished_in = ?started.elapsed(),
            "finished saving data in postgres"
        );
        Ok(rows)
    }
}

async fn load(
    store: &PgStore,
    records: &mut mpsc::Receiver<BeaconRecord>,
    cancel: &CancellationToken,
    batch_size: usize,
) -> Result<u64> {
    let mut batch = Vec::with_capacity(batch_size.min(RELATIONAL_BATCH_LIMIT));
    let mut rows = 0u64;

    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::Cancelled),
            next = records.recv() => next,
        };
        let Some(record) = next else {
            break;
        };

        batch.push(record);
        if batch.len() == batch_size {
            rows += flush(store, &mut batch, rows).await?;
        }
    }

    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    if !batch.is_empty() {
        rows += flush(store, &mut batch, rows).await?;
    }

    Ok(rows)
}

async fn flush(store: &PgStore, batch: &mut Vec<BeaconRecord>, rows: u64) -> Result<u64> {
    debug!(rows, batch = batch.len(), "writing buffer contents to postgres");
    if let Err(e) = store.batch_put(batch).await {
        error!(error = %e, "while writing buffer contents to postgres");
        return Err(e);
    }
    let written = batch.len() as u64;
    batch.clear();
    Ok(written)
}
