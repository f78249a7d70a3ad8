//! Consistency audit of a beacon store.
//!
//! Reports rounds that do not follow their predecessor and signatures that
//! appear more than once. The audit never fails a migration; it only
//! reports.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::Result;
use crate::source::SourceReader;

/// A round that is not `previous + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundGap {
    /// Round stored before the gap.
    pub previous: u64,
    /// Round stored after the gap.
    pub current: u64,
}

/// A signature already seen at an earlier round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuplicateSignature {
    /// Round the signature was first seen at.
    pub first_round: u64,
    /// Round repeating it.
    pub round: u64,
}

/// Findings of [`audit_store`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditReport {
    /// Records scanned.
    pub records: u64,
    /// Lowest round.
    pub first_round: Option<u64>,
    /// Highest round.
    pub last_round: Option<u64>,
    /// Non-contiguous rounds.
    pub gaps: Vec<RoundGap>,
    /// Repeated signatures.
    pub duplicate_signatures: Vec<DuplicateSignature>,
}

impl AuditReport {
    /// True when the chain is contiguous and every signature is unique.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.gaps.is_empty() && self.duplicate_signatures.is_empty()
    }

    /// Logs every finding as a warning, then a summary line.
    pub fn log_findings(&self) {
        for gap in &self.gaps {
            warn!(
                previous = gap.previous,
                current = gap.current,
                "round does not follow the previous one"
            );
        }
        for dup in &self.duplicate_signatures {
            warn!(
                first_round = dup.first_round,
                round = dup.round,
                "duplicate round signature"
            );
        }
        info!(
            records = self.records,
            last_round = ?self.last_round,
            gaps = self.gaps.len(),
            duplicates = self.duplicate_signatures.len(),
            "audit finished"
        );
    }
}

/// Scans the store at `path` and collects its inconsistencies.
///
/// # Errors
///
/// Returns [`crate::Error::SourceIo`] if the store cannot be read and
/// [`crate::Error::Cancelled`] if the token fires.
pub fn audit_store(path: &Path, cancel: &CancellationToken) -> Result<AuditReport> {
    let started = Instant::now();
    let mut report = AuditReport::default();
    let mut signatures: HashMap<Vec<u8>, u64> = HashMap::new();

    let records = SourceReader::new(path).read_all(cancel, |record| {
        let round = record.round;
        if let Some(previous) = report.last_round {
            if previous.checked_add(1) != Some(round) {
                report.gaps.push(RoundGap {
                    previous,
                    current: round,
                });
            }
        } else {
            report.first_round = Some(round);
        }

        match signatures.entry(record.signature) {
            Entry::Occupied(seen) => report.duplicate_signatures.push(DuplicateSignature {
                first_round: *seen.get(),
                round,
            }),
            Entry::Vacant(slot) => {
                slot.insert(round);
            }
        }

        report.last_round = Some(round);
        Ok(())
    })?;
    report.records = records;

    info!(
        path = %path.display(),
        records = report.records,
        finished_in = ?started.elapsed(),
        "finished auditing store"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beacon::round_key;
    use crate::test_support::{write_pairs, write_raw_store};
    use tempfile::tempdir;

    #[test]
    fn test_contiguous_store_is_clean() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("beacons.db");
        write_raw_store(&path, 20);

        let report = audit_store(&path, &CancellationToken::new()).unwrap();

        assert!(report.is_clean());
        assert_eq!(report.records, 20);
        assert_eq!(report.first_round, Some(1));
        assert_eq!(report.last_round, Some(20));
    }

    #[test]
    fn test_reports_gaps_and_duplicates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("beacons.db");
        write_pairs(
            &path,
            &[
                (round_key(1).to_vec(), b"a".to_vec()),
                (round_key(2).to_vec(), b"b".to_vec()),
                (round_key(5).to_vec(), b"c".to_vec()),
                (round_key(6).to_vec(), b"a".to_vec()),
            ],
        );

        let report = audit_store(&path, &CancellationToken::new()).unwrap();

        assert!(!report.is_clean());
        assert_eq!(
            report.gaps,
            vec![RoundGap {
                previous: 2,
                current: 5
            }]
        );
        assert_eq!(
            report.duplicate_signatures,
            vec![DuplicateSignature {
                first_round: 1,
                round: 6
            }]
        );
    }
}
