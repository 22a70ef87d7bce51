//! Prefix lookups against a finished table.
//!
//! A query reads exactly one bucket: the first `P` prefix bytes address the
//! bucket, one positional read pulls its slab, and the candidates are
//! re-hashed in parallel until one matches the full requested prefix.
//! Workers share a found flag and bail out early once any of them wins.

use std::fs::File;
use std::os::unix::fs::FileExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use log::debug;
use rand::Rng;
use rayon::prelude::*;

use crate::error::VaultError;
use crate::hasher::{big_endian_value, decode_nonce, is_empty_record, NonceHasher, MAX_DIGEST_LEN};
use crate::sidecar::Sidecar;

pub struct LookupEngine<'a, H: NonceHasher> {
    file: &'a File,
    sidecar: &'a Sidecar,
    hasher: &'a H,
}

impl<'a, H: NonceHasher> LookupEngine<'a, H> {
    pub fn new(file: &'a File, sidecar: &'a Sidecar, hasher: &'a H) -> Self {
        LookupEngine {
            file,
            sidecar,
            hasher,
        }
    }

    /// Find a nonce whose digest starts with `prefix`.
    ///
    /// The prefix must span at least the table's bucket-addressing bytes;
    /// shorter queries are rejected rather than silently searching the
    /// wrong bucket. Among multiple matching records the winner is
    /// whichever worker hits first; a given table answers a given prefix
    /// with a stable hit-or-miss outcome.
    pub fn lookup(&self, prefix: &[u8]) -> Result<Option<u64>, VaultError> {
        let p = self.sidecar.prefix_size;
        if prefix.len() < p {
            return Err(VaultError::PrefixTooShort {
                len: prefix.len(),
                min: p,
            });
        }
        if prefix.len() > MAX_DIGEST_LEN {
            return Err(VaultError::Config(format!(
                "search prefix of {} bytes exceeds the {MAX_DIGEST_LEN}-byte digest",
                prefix.len()
            )));
        }

        let bucket = big_endian_value(prefix, p);
        if bucket >= self.sidecar.num_buckets {
            return Err(VaultError::Config(format!(
                "bucket {bucket} out of range (0..{})",
                self.sidecar.num_buckets
            )));
        }

        let bucket_bytes = self.sidecar.bucket_bytes() as usize;
        let mut slab = vec![0u8; bucket_bytes];
        self.file
            .read_exact_at(&mut slab, bucket * self.sidecar.bucket_bytes())?;

        let record = self.sidecar.nonce_size;
        let found = AtomicBool::new(false);
        let hit = slab.par_chunks_exact(record).find_map_any(|rec| {
            if found.load(Ordering::Relaxed) || is_empty_record(rec) {
                return None;
            }
            let mut digest = [0u8; MAX_DIGEST_LEN];
            self.hasher.digest(rec, &mut digest[..prefix.len()]);
            if &digest[..prefix.len()] == prefix {
                found.store(true, Ordering::Relaxed);
                Some(decode_nonce(rec))
            } else {
                None
            }
        });

        debug!(
            "lookup {}: bucket {bucket}, {}",
            hex::encode(prefix),
            match hit {
                Some(nonce) => format!("hit nonce {nonce}"),
                None => "miss".into(),
            }
        );
        Ok(hit)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct BatchStats {
    pub lookups: u64,
    pub hits: u64,
    pub misses: u64,
    pub elapsed: Duration,
}

impl BatchStats {
    pub fn avg_ms(&self) -> f64 {
        if self.lookups == 0 {
            return 0.0;
        }
        self.elapsed.as_secs_f64() * 1e3 / self.lookups as f64
    }
}

/// Drive `count` lookups with uniform random prefixes of `prefix_len`
/// bytes, accumulating hit/miss counts and wall time.
pub fn batch_lookup<H: NonceHasher>(
    engine: &LookupEngine<'_, H>,
    count: u64,
    prefix_len: usize,
) -> Result<BatchStats, VaultError> {
    let mut rng = rand::rng();
    let mut prefix = vec![0u8; prefix_len];
    let mut stats = BatchStats::default();
    let start = Instant::now();
    for _ in 0..count {
        rng.fill(prefix.as_mut_slice());
        match engine.lookup(&prefix)? {
            Some(_) => stats.hits += 1,
            None => stats.misses += 1,
        }
        stats.lookups += 1;
    }
    stats.elapsed = start.elapsed();
    Ok(stats)
}
