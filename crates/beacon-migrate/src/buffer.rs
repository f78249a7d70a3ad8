//! Channel capacity selection.

use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::config::DEFAULT_BUFFER_SIZE;
use crate::error::{Error, Result};
use crate::source::SourceReader;

/// Requested sizes up to this are accepted with a slowness warning.
pub const SMALL_BUFFER_THRESHOLD: usize = 10_000;

/// Requested sizes above this are accepted with a memory warning.
pub const LARGE_BUFFER_THRESHOLD: usize = 10_000_000;

/// Largest batch the relational writer flushes in one statement.
///
/// PostgreSQL accepts at most 65535 bind parameters per statement and
/// every row binds two.
pub const RELATIONAL_BATCH_LIMIT: usize = 30_000;

/// Largest capacity a bounded tokio channel accepts.
pub const MAX_BUFFER_SIZE: usize = Semaphore::MAX_PERMITS;

/// Resolves the requested buffer size into a channel capacity.
///
/// - negative: [`DEFAULT_BUFFER_SIZE`]
/// - zero: the number of records in the source
/// - positive: taken as is, with a warning outside the usual range
///
/// The result is never zero and never above [`MAX_BUFFER_SIZE`].
///
/// # Errors
///
/// Returns [`Error::SourceIo`] if the source has to be counted and cannot be,
/// and [`Error::Config`] if the size exceeds [`MAX_BUFFER_SIZE`].
pub fn compute_buffer_size(requested: i64, source: &SourceReader) -> Result<usize> {
    let size = match requested {
        n if n < 0 => {
            info!(
                buffer_size = DEFAULT_BUFFER_SIZE,
                "buffer size not specified, using default"
            );
            DEFAULT_BUFFER_SIZE
        }
        0 => automatic_buffer_size(source)?,
        n => {
            let size = usize::try_from(n)
                .map_err(|_| Error::Config(format!("buffer size {n} does not fit in memory")))?;
            if size <= SMALL_BUFFER_THRESHOLD {
                warn!(
                    buffer_size = size,
                    "buffer size seems a bit too small, the migration might be slow"
                );
            } else if size > LARGE_BUFFER_THRESHOLD {
                warn!(
                    buffer_size = size,
                    "buffer size seems a bit too large, make sure the system can allocate enough memory"
                );
            }
            size
        }
    };

    if size > MAX_BUFFER_SIZE {
        return Err(Error::Config(format!(
            "buffer size {size} exceeds the channel limit of {MAX_BUFFER_SIZE}"
        )));
    }

    Ok(size.max(1))
}

fn automatic_buffer_size(source: &SourceReader) -> Result<usize> {
    warn!("buffer size set to 0, inferring it from the source; make sure there is enough memory");

    let count = source.count()?;
    let size = usize::try_from(count)
        .map_err(|_| Error::Config(format!("source holds {count} records, too many to buffer")))?;

    info!(buffer_size = size, "buffer size inferred from existing store");
    Ok(size)
}

/// Batch size used by the relational writer for a given channel capacity.
#[must_use]
pub fn relational_batch_size(buffer_size: usize) -> usize {
    if buffer_size > RELATIONAL_BATCH_LIMIT {
        warn!(
            buffer_size = RELATIONAL_BATCH_LIMIT,
            "buffer size reduced for the relational backend"
        );
        RELATIONAL_BATCH_LIMIT
    } else {
        buffer_size.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{write_empty_store, write_raw_store};
    use tempfile::tempdir;

    #[test]
    fn test_negative_uses_default() {
        let source = SourceReader::new("/nonexistent");
        assert_eq!(compute_buffer_size(-1, &source).unwrap(), 10_000);
    }

    #[test]
    fn test_explicit_sizes_are_kept() {
        let source = SourceReader::new("/nonexistent");
        assert_eq!(compute_buffer_size(500, &source).unwrap(), 500);
        assert_eq!(compute_buffer_size(20_000_000, &source).unwrap(), 20_000_000);
    }

    #[test]
    fn test_small_threshold_is_inclusive() {
        let source = SourceReader::new("/nonexistent");
        assert_eq!(
            compute_buffer_size(SMALL_BUFFER_THRESHOLD as i64, &source).unwrap(),
            SMALL_BUFFER_THRESHOLD
        );
    }

    #[test]
    fn test_oversized_buffer_is_rejected() {
        let source = SourceReader::new("/nonexistent");
        let result = compute_buffer_size(i64::MAX, &source);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_largest_channel_capacity_is_accepted() {
        let source = SourceReader::new("/nonexistent");
        let largest = MAX_BUFFER_SIZE as i64;
        assert_eq!(compute_buffer_size(largest, &source).unwrap(), MAX_BUFFER_SIZE);
    }

    #[test]
    fn test_zero_counts_source_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("beacons.db");
        write_raw_store(&path, 7);

        let size = compute_buffer_size(0, &SourceReader::new(&path)).unwrap();

        assert_eq!(size, 7);
    }

    #[test]
    fn test_zero_on_empty_source_is_one() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("beacons.db");
        write_empty_store(&path);

        assert_eq!(compute_buffer_size(0, &SourceReader::new(&path)).unwrap(), 1);
    }

    #[test]
    fn test_zero_on_missing_source_fails() {
        let result = compute_buffer_size(0, &SourceReader::new("/nonexistent/beacons.db"));
        assert!(matches!(result, Err(Error::SourceIo(_))));
    }

    #[test]
    fn test_relational_batch_is_capped() {
        assert_eq!(relational_batch_size(50_000), 30_000);
        assert_eq!(relational_batch_size(30_000), 30_000);
        assert_eq!(relational_batch_size(12), 12);
    }
}
