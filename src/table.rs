//! In-RAM bucket table filled by the parallel generator.
//!
//! One flat `B * C * R`-byte buffer holds every bucket's records
//! back-to-back; one atomic counter per bucket hands out slots. Overflowing
//! inserts are dropped, never reported: among the records hashing to a
//! bucket within a round, the first `C` to arrive win.

use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::geometry::Geometry;

/// Record buffer shared across insert workers.
///
/// Workers write disjoint slots only (each slot index is handed out by a
/// single `fetch_add`), so shared mutation never races.
struct SharedSlots(UnsafeCell<Box<[u8]>>);

// SAFETY: slot ownership is arbitrated by the per-bucket atomic counters;
// two threads never receive the same slot, and readers only run after the
// parallel phase has joined.
unsafe impl Sync for SharedSlots {}

pub struct BucketTable {
    geo: Geometry,
    counts: Box<[AtomicU64]>,
    slots: SharedSlots,
}

impl BucketTable {
    /// Allocate a zeroed table. Done once; rounds reuse it via [`clear`].
    ///
    /// [`clear`]: BucketTable::clear
    pub fn new(geo: Geometry) -> Self {
        let counts = (0..geo.num_buckets)
            .map(|_| AtomicU64::new(0))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let slots = vec![0u8; geo.table_bytes() as usize].into_boxed_slice();
        BucketTable {
            geo,
            counts,
            slots: SharedSlots(UnsafeCell::new(slots)),
        }
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geo
    }

    /// Reset fill counters and zero every record, restoring the empty
    /// sentinel for slots the next round leaves unfilled.
    pub fn clear(&mut self) {
        for count in self.counts.iter() {
            count.store(0, Ordering::Relaxed);
        }
        self.slots.0.get_mut().fill(0);
    }

    /// Claim the next slot of `bucket` and store `nonce` there.
    ///
    /// Returns `false` when the bucket is already full; the record is then
    /// dropped silently. Callable concurrently from any number of workers.
    #[inline]
    pub fn insert(&self, bucket: u64, nonce: &[u8]) -> bool {
        debug_assert!(bucket < self.geo.num_buckets);
        debug_assert_eq!(nonce.len(), self.geo.nonce_size);

        let slot = self.counts[bucket as usize].fetch_add(1, Ordering::Relaxed);
        if slot >= self.geo.bucket_capacity {
            return false;
        }

        let record = self.geo.nonce_size;
        let offset = (bucket * self.geo.bucket_capacity + slot) as usize * record;
        // SAFETY: `slot` came from this bucket's fetch_add, so (bucket, slot)
        // is claimed by exactly one thread and the target range is disjoint
        // from every other in-flight write.
        unsafe {
            let base = (*self.slots.0.get()).as_mut_ptr();
            ptr::copy_nonoverlapping(nonce.as_ptr(), base.add(offset), record);
        }
        true
    }

    /// Raw table bytes, bucket-major, one round's on-disk slab.
    ///
    /// Takes `&mut self` so no insert workers can still be running.
    pub fn as_bytes(&mut self) -> &[u8] {
        self.slots.0.get_mut()
    }

    /// Records actually stored this round (overflow excluded).
    pub fn filled(&self) -> u64 {
        self.counts
            .iter()
            .map(|c| c.load(Ordering::Relaxed).min(self.geo.bucket_capacity))
            .sum()
    }

    /// Inserts dropped because their bucket was full.
    pub fn overflowed(&self) -> u64 {
        self.counts
            .iter()
            .map(|c| {
                c.load(Ordering::Relaxed)
                    .saturating_sub(self.geo.bucket_capacity)
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_geometry() -> Geometry {
        // 4 buckets of 2 records, 4-byte records, one round.
        Geometry {
            k: 5,
            num_buckets: 4,
            bucket_capacity: 2,
            rounds: 1,
            prefix_size: 1,
            nonce_size: 4,
        }
    }

    #[test]
    fn insert_places_records_in_claim_order() {
        let mut table = BucketTable::new(tiny_geometry());
        assert!(table.insert(1, &[0xaa, 1, 0, 0]));
        assert!(table.insert(1, &[0xbb, 2, 0, 0]));

        let bytes = table.as_bytes();
        assert_eq!(&bytes[8..12], &[0xaa, 1, 0, 0]);
        assert_eq!(&bytes[12..16], &[0xbb, 2, 0, 0]);
        // Untouched buckets stay all-zero.
        assert!(bytes[..8].iter().all(|&b| b == 0));
    }

    #[test]
    fn overflow_drops_silently() {
        let table = BucketTable::new(tiny_geometry());
        assert!(table.insert(0, &[1, 0, 0, 0]));
        assert!(table.insert(0, &[2, 0, 0, 0]));
        assert!(!table.insert(0, &[3, 0, 0, 0]));
        assert_eq!(table.filled(), 2);
        assert_eq!(table.overflowed(), 1);
    }

    #[test]
    fn clear_restores_zero_sentinels() {
        let mut table = BucketTable::new(tiny_geometry());
        table.insert(3, &[9, 9, 9, 9]);
        table.clear();
        assert_eq!(table.filled(), 0);
        assert!(table.as_bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn concurrent_inserts_each_win_a_distinct_slot() {
        use std::sync::Arc;

        let geo = Geometry {
            num_buckets: 1,
            bucket_capacity: 64,
            ..tiny_geometry()
        };
        let table = Arc::new(BucketTable::new(geo));

        let handles: Vec<_> = (1u64..=8)
            .map(|t| {
                let table = Arc::clone(&table);
                std::thread::spawn(move || {
                    for i in 0..8 {
                        let value = (t * 100 + i) as u32;
                        table.insert(0, &value.to_le_bytes());
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let mut table = Arc::try_unwrap(table).ok().unwrap();
        assert_eq!(table.filled(), 64);
        let mut seen: Vec<u32> = table
            .as_bytes()
            .chunks_exact(4)
            .map(|r| u32::from_le_bytes(r.try_into().unwrap()))
            .collect();
        seen.sort_unstable();
        seen.dedup();
        // All 64 writes landed, none overwrote another.
        assert_eq!(seen.len(), 64);
    }
}
