//! Streaming order check over a finished table.
//!
//! Within a bucket every record's digest shares the bucket's prefix, and
//! bucket ordinals increase along the file, so the P-byte prefixes of all
//! non-zero records must be non-decreasing. Any regression means a record
//! sits in the wrong bucket.

use std::fmt;
use std::fs::File;
use std::os::unix::fs::FileExt;
use std::time::Instant;

use log::debug;

use crate::error::VaultError;
use crate::hasher::{is_empty_record, NonceHasher};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub sorted: u64,
    pub not_sorted: u64,
    pub zero_nonces: u64,
    pub total_records: u64,
}

impl VerifyReport {
    /// Fraction of record slots holding a real nonce.
    pub fn efficiency(&self) -> f64 {
        if self.total_records == 0 {
            return 0.0;
        }
        (self.sorted + self.not_sorted) as f64 / self.total_records as f64
    }

    pub fn is_sorted(&self) -> bool {
        self.not_sorted == 0
    }
}

impl fmt::Display for VerifyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sorted={} not_sorted={} zero_nonces={} total_records={}",
            self.sorted, self.not_sorted, self.zero_nonces, self.total_records
        )
    }
}

/// Re-hash every non-zero record of `file` and check the P-byte digest
/// prefixes never decrease. Reads `batch_records` records per chunk.
pub fn verify_file<H: NonceHasher>(
    file: &File,
    hasher: &H,
    prefix_size: usize,
    nonce_size: usize,
    batch_records: usize,
) -> Result<VerifyReport, VaultError> {
    let file_len = file.metadata()?.len();
    let mut buf = vec![0u8; batch_records.max(1) * nonce_size];
    let mut report = VerifyReport::default();
    let mut prev = [0u8; 8];
    let mut digest = [0u8; 8];

    let start = Instant::now();
    let mut offset = 0u64;
    while offset < file_len {
        let take = buf.len().min((file_len - offset) as usize);
        file.read_exact_at(&mut buf[..take], offset)?;
        offset += take as u64;

        for rec in buf[..take].chunks_exact(nonce_size) {
            report.total_records += 1;
            if is_empty_record(rec) {
                report.zero_nonces += 1;
                continue;
            }
            hasher.digest(rec, &mut digest[..prefix_size]);
            if digest[..prefix_size] >= prev[..prefix_size] {
                report.sorted += 1;
            } else {
                report.not_sorted += 1;
            }
            prev[..prefix_size].copy_from_slice(&digest[..prefix_size]);
        }

        let elapsed = start.elapsed().as_secs_f64();
        debug!(
            "[{elapsed:.2}] Verify {:.2}%: {:.2} MB/s",
            offset as f64 * 100.0 / file_len as f64,
            offset as f64 / elapsed / (1 << 20) as f64
        );
    }
    Ok(report)
}
