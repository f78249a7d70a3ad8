//! Destination writers.

pub mod embedded;
#[cfg(feature = "postgres")]
pub mod relational;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::beacon::BeaconRecord;
use crate::config::{MigrationConfig, Target};
use crate::error::Result;

pub use embedded::EmbeddedWriter;
#[cfg(feature = "postgres")]
pub use relational::RelationalWriter;

/// Trait for migration destinations.
///
/// A writer owns its destination for the whole migration. It drains the
/// channel until the reader closes it and reports how many records it
/// wrote.
#[async_trait]
pub trait BeaconWriter: Send {
    /// Destination backend.
    fn target(&self) -> Target;

    /// Consumes every record of the stream.
    ///
    /// Records arrive in ascending round order and are written in that
    /// order. The token is observed once per record; a stream that closes
    /// while the token is cancelled ends in [`crate::Error::Cancelled`].
    async fn write_all(
        &mut self,
        records: mpsc::Receiver<BeaconRecord>,
        cancel: CancellationToken,
    ) -> Result<u64>;
}

/// Create the writer for the configured target.
///
/// # Errors
///
/// Returns [`crate::Error::Config`] for the relational target when the
/// crate is built without the `postgres` feature.
pub fn create_writer(config: &MigrationConfig, buffer_size: usize) -> Result<Box<dyn BeaconWriter>> {
    match config.target {
        Target::Embedded => Ok(Box::new(EmbeddedWriter::new(
            config.staging_path(),
            buffer_size,
        ))),
        #[cfg(feature = "postgres")]
        Target::Relational => Ok(Box::new(RelationalWriter::new(
            config.pg_dsn.clone(),
            config.beacon.clone(),
            buffer_size,
        ))),
        #[cfg(not(feature = "postgres"))]
        Target::Relational => Err(crate::Error::Config(
            "relational target requires the `postgres` feature".to_string(),
        )),
    }
}
