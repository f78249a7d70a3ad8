//! Migration pipeline orchestration.
//!
//! ```text
//! Idle → Checking → Sizing → Migrating → Verifying → Committing → Done
//!            └──────────┴──────────┴───────────┴───────────┴─────→ Failed
//! ```
//!
//! During `Migrating` the reader and the writer run concurrently, linked by
//! one bounded channel whose capacity is the sized buffer. The first stage
//! to fail cancels the shared token so the other one stops within one
//! record.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::audit::audit_store;
use crate::buffer::compute_buffer_size;
use crate::commit::{commit, create_committer, verify_counts, RowCounts};
use crate::config::{MigrationConfig, Target};
use crate::error::{Error, Result};
use crate::guard::should_migrate;
use crate::source::SourceReader;
use crate::writer::{create_writer, BeaconWriter};

/// Lifecycle of a migration job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationState {
    /// Created, not started.
    Idle,
    /// Running the idempotency check.
    Checking,
    /// Choosing the channel capacity.
    Sizing,
    /// Reader and writer are running.
    Migrating,
    /// Comparing read and written counts.
    Verifying,
    /// Making the destination authoritative.
    Committing,
    /// Finished successfully.
    Done,
    /// Finished with an error, including "not needed".
    Failed,
}

/// Migration statistics.
#[derive(Debug, Default, Clone)]
pub struct MigrationStats {
    /// Records read from the source.
    pub existing_rows: u64,
    /// Records written to the destination.
    pub migrated_rows: u64,
    /// Channel capacity used.
    pub buffer_size: usize,
    /// Duration in seconds.
    pub duration_secs: f64,
}

impl MigrationStats {
    /// Calculate throughput (records per second).
    #[must_use]
    pub fn throughput(&self) -> f64 {
        if self.duration_secs > 0.0 {
            self.migrated_rows as f64 / self.duration_secs
        } else {
            0.0
        }
    }
}

enum StageOutput {
    Read(u64),
    Written(u64),
}

/// Migration pipeline.
pub struct Pipeline {
    config: MigrationConfig,
    state: MigrationState,
    cancel: CancellationToken,
}

impl Pipeline {
    /// Create a new migration pipeline.
    #[must_use]
    pub fn new(config: MigrationConfig) -> Self {
        Self::with_cancellation(config, &CancellationToken::new())
    }

    /// Create a pipeline that also stops when `parent` is cancelled.
    #[must_use]
    pub fn with_cancellation(config: MigrationConfig, parent: &CancellationToken) -> Self {
        Self {
            config,
            state: MigrationState::Idle,
            cancel: parent.child_token(),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> MigrationState {
        self.state
    }

    /// Run the migration pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MigrationNotNeeded`] when there is nothing to do,
    /// or the first error observed by any stage.
    pub async fn run(&mut self) -> Result<MigrationStats> {
        let started = Instant::now();
        let result = self.execute(started).await;

        match &result {
            Ok(stats) => {
                self.transition(MigrationState::Done);
                info!(
                    beacon = %self.config.beacon,
                    existing_rows = stats.existing_rows,
                    migrated_rows = stats.migrated_rows,
                    finished_in = ?started.elapsed(),
                    "finished processing beacons"
                );
            }
            Err(e) if e.is_not_needed() => {
                self.transition(MigrationState::Failed);
                info!(beacon = %self.config.beacon, "storage format migration is not needed");
            }
            Err(e) => {
                self.transition(MigrationState::Failed);
                error!(beacon = %self.config.beacon, error = %e, "migration failed");
            }
        }

        result
    }

    async fn execute(&mut self, started: Instant) -> Result<MigrationStats> {
        self.transition(MigrationState::Checking);
        should_migrate(&self.config).await?;

        self.transition(MigrationState::Sizing);
        let source = SourceReader::new(&self.config.source);
        let buffer_size = compute_buffer_size(self.config.buffer_size, &source)?;

        self.transition(MigrationState::Migrating);
        let writer = create_writer(&self.config, buffer_size)?;
        let committer = create_committer(&self.config);
        let counts = self.migrate(source, writer, buffer_size).await?;

        self.transition(MigrationState::Verifying);
        verify_counts(counts)?;

        self.transition(MigrationState::Committing);
        commit(counts, committer.as_ref())?;

        if self.config.audit && self.config.target == Target::Embedded {
            self.audit_migrated_store().await;
        }

        Ok(MigrationStats {
            existing_rows: counts.existing,
            migrated_rows: counts.migrated,
            buffer_size,
            duration_secs: started.elapsed().as_secs_f64(),
        })
    }

    async fn migrate(
        &self,
        source: SourceReader,
        mut writer: Box<dyn BeaconWriter>,
        buffer_size: usize,
    ) -> Result<RowCounts> {
        let (tx, rx) = mpsc::channel(buffer_size);
        let progress = create_progress_bar(self.config.show_progress);
        let mut stages = JoinSet::new();

        info!(
            beacon = %self.config.beacon,
            target = %writer.target(),
            buffer_size,
            "starting migration"
        );

        let cancel = self.cancel.clone();
        let reader_progress = progress.clone();
        let beacon = self.config.beacon.clone();
        stages.spawn_blocking(move || {
            let started = Instant::now();
            let result = source.read_all(&cancel, |record| {
                tx.blocking_send(record).map_err(|_| Error::Cancelled)?;
                reader_progress.inc(1);
                Ok(())
            });
            if result.is_err() {
                cancel.cancel();
            }
            // closing the channel only after cancelling keeps a failed scan
            // from looking like a complete one
            drop(tx);

            if let Ok(rows) = &result {
                info!(
                    beacon = %beacon,
                    rows,
                    finished_in = ?started.elapsed(),
                    "finished reading existing beacon database"
                );
            }
            result.map(StageOutput::Read)
        });

        let cancel = self.cancel.clone();
        stages.spawn(async move {
            let result = writer.write_all(rx, cancel.clone()).await;
            if result.is_err() {
                cancel.cancel();
            }
            result.map(StageOutput::Written)
        });

        let mut counts = RowCounts::default();
        let mut first_error: Option<Error> = None;

        while let Some(joined) = stages.join_next().await {
            let outcome = joined.unwrap_or_else(|e| Err(Error::Io(std::io::Error::other(e))));
            match outcome {
                Ok(StageOutput::Read(rows)) => counts.existing = rows,
                Ok(StageOutput::Written(rows)) => counts.migrated = rows,
                Err(e) => {
                    debug!(error = %e, "pipeline stage failed");
                    self.cancel.cancel();
                    first_error = match first_error {
                        None => Some(e),
                        // a sibling's cancellation is a symptom, keep the cause
                        Some(Error::Cancelled) if !matches!(e, Error::Cancelled) => Some(e),
                        kept => kept,
                    };
                }
            }
        }

        progress.finish_and_clear();

        match first_error {
            Some(e) => Err(e),
            None => Ok(counts),
        }
    }

    /// Audits the committed store off the executor. Findings are only logged.
    async fn audit_migrated_store(&self) {
        let path = self.config.source.clone();
        let cancel = self.cancel.clone();
        let audited = tokio::task::spawn_blocking(move || audit_store(&path, &cancel))
            .await
            .unwrap_or_else(|e| Err(Error::Io(std::io::Error::other(e))));

        match audited {
            Ok(report) => report.log_findings(),
            Err(e) => error!(error = %e, "post-migration audit failed"),
        }
    }

    fn transition(&mut self, next: MigrationState) {
        debug!(from = ?self.state, to = ?next, "migration state");
        self.state = next;
    }
}

fn create_progress_bar(visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {pos} rounds ({per_sec})")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb
}
