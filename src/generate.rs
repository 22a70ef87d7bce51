//! Per-round parallel hash generation and the round writer.
//!
//! A round covers a contiguous nonce range sized to the memory budget. The
//! range is cut into contiguous batches; workers hash each nonce, derive
//! the bucket ordinal from the digest prefix, and insert into the shared
//! [`BucketTable`]. Scheduling of batches is a tuning knob with identical
//! semantics across variants.

use std::fs::File;
use std::os::unix::fs::FileExt;

use clap::ValueEnum;
use log::debug;
use rayon::prelude::*;

use crate::error::VaultError;
use crate::geometry::Geometry;
use crate::hasher::{big_endian_value, encode_nonce, NonceHasher};
use crate::table::BucketTable;

/// Batch scheduling variant. `tbb` is accepted for compatibility and
/// schedules like `for`.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Approach {
    /// Parallel iterator over batches, work-stealing distribution.
    #[default]
    For,
    /// One spawned task per batch.
    Task,
    /// Alias of `for`.
    Tbb,
}

impl Approach {
    pub fn as_str(&self) -> &'static str {
        match self {
            Approach::For => "for",
            Approach::Task => "task",
            Approach::Tbb => "tbb",
        }
    }
}

pub struct Generator<'a, H: NonceHasher> {
    geo: Geometry,
    hasher: &'a H,
    table: &'a BucketTable,
    batch_size: u64,
    approach: Approach,
    /// Debug switch: when false, hash without inserting.
    insert: bool,
}

impl<'a, H: NonceHasher> Generator<'a, H> {
    pub fn new(
        hasher: &'a H,
        table: &'a BucketTable,
        batch_size: u64,
        approach: Approach,
        insert: bool,
    ) -> Self {
        Generator {
            geo: *table.geometry(),
            hasher,
            table,
            batch_size: batch_size.max(1),
            approach,
            insert,
        }
    }

    /// Hash and insert the nonce range `[round * H, (round + 1) * H)`.
    ///
    /// Call from inside the compute pool. Overflowing inserts are dropped
    /// by the table; nonce 0 is skipped (it is the empty sentinel).
    pub fn run_round(&self, round: u64) {
        let start = round * self.geo.per_round_records();
        let end = start + self.geo.per_round_records();
        let batches = (end - start).div_ceil(self.batch_size);
        debug!(
            "round {round}: hashing nonces [{start}, {end}) in {batches} batches of {}",
            self.batch_size
        );

        match self.approach {
            Approach::For | Approach::Tbb => {
                (0..batches)
                    .into_par_iter()
                    .for_each(|b| self.run_batch(start, end, b));
            }
            Approach::Task => {
                rayon::scope(|scope| {
                    for b in 0..batches {
                        scope.spawn(move |_| self.run_batch(start, end, b));
                    }
                });
            }
        }
    }

    fn run_batch(&self, start: u64, end: u64, batch: u64) {
        let lo = start + batch * self.batch_size;
        let hi = (lo + self.batch_size).min(end);
        let record = self.geo.nonce_size;
        let prefix = self.geo.prefix_size;

        let mut nonce = [0u8; 8];
        let mut digest = [0u8; 8];
        for j in lo..hi {
            if j == 0 {
                continue;
            }
            encode_nonce(j, &mut nonce[..record]);
            self.hasher.digest(&nonce[..record], &mut digest[..prefix]);
            if self.insert {
                let bucket = big_endian_value(&digest, prefix);
                self.table.insert(bucket, &nonce[..record]);
            }
        }
    }
}

/// Append the whole table to the temp file as round `round`'s slab.
///
/// Buckets land sequentially, each exactly `C * R` bytes including trailing
/// empty sentinels. A short write surfaces as a fatal I/O error.
pub fn write_round(file: &File, table: &mut BucketTable, round: u64) -> Result<(), VaultError> {
    let offset = table.geometry().table_bytes() * round;
    file.write_all_at(table.as_bytes(), offset)?;
    Ok(())
}
