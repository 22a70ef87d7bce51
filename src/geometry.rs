//! Table geometry planning and offset arithmetic.
//!
//! The planner is a pure function from (K, memory budget, prefix size,
//! record size) to a finalised [`Geometry`]. All later offset math goes
//! through this value, so the temp (round-major) and final (bucket-major)
//! layouts cannot drift apart.

use crate::error::VaultError;

/// Smallest accepted operator memory budget, enforced at the CLI boundary.
pub const MIN_MEMORY_BYTES: u64 = 64 * 1024 * 1024;

/// Accepted range for the table exponent K, enforced at the CLI boundary.
pub const MIN_EXPONENT: u32 = 24;
pub const MAX_EXPONENT: u32 = 40;

/// Finalised build geometry.
///
/// Invariants after [`Geometry::plan`]:
/// - `num_buckets = 2^(8 * prefix_size)`
/// - `bucket_capacity * num_buckets` records fill one round exactly
/// - `total_records() = bucket_capacity * num_buckets * rounds`, the
///   planner-adjusted total (never larger than `2^k`)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Geometry {
    pub k: u32,
    pub num_buckets: u64,
    /// Records per bucket per round (C).
    pub bucket_capacity: u64,
    pub rounds: u64,
    /// Leading digest bytes used for bucket addressing (P).
    pub prefix_size: usize,
    /// Stored record width in bytes (R).
    pub nonce_size: usize,
}

impl Geometry {
    /// Plan a geometry for `2^k` nonces under `mem_bytes` of RAM.
    ///
    /// The budget is clamped to the file size, rounds is the ceiling
    /// division, and the per-round record count is shrunk until it is an
    /// exact multiple of the bucket count. The adjusted total may therefore
    /// be slightly below `2^k`; all divisions are exact afterwards.
    pub fn plan(
        k: u32,
        mem_bytes: u64,
        prefix_size: usize,
        nonce_size: usize,
    ) -> Result<Self, VaultError> {
        if k >= 64 {
            return Err(VaultError::Config(format!("exponent {k} out of range")));
        }
        if prefix_size == 0 || prefix_size > 7 {
            return Err(VaultError::Config(format!(
                "prefix size {prefix_size} out of range (1..=7)"
            )));
        }
        if nonce_size == 0 || nonce_size > 8 {
            return Err(VaultError::Config(format!(
                "nonce size {nonce_size} out of range (1..=8)"
            )));
        }
        if mem_bytes == 0 {
            return Err(VaultError::Config("memory budget is zero".into()));
        }

        let record = nonce_size as u64;
        let total = 1u64 << k;
        let file_bytes = total * record;

        let mem = mem_bytes.min(file_bytes);
        let rounds = file_bytes.div_ceil(mem);
        let per_round_records = (file_bytes / rounds) / record;

        let num_buckets = 1u64 << (8 * prefix_size as u32);
        let bucket_capacity = per_round_records / num_buckets;
        if bucket_capacity == 0 {
            return Err(VaultError::Config(format!(
                "memory budget {mem_bytes} B holds fewer than one record per \
                 bucket ({num_buckets} buckets of {record} B records)"
            )));
        }

        Ok(Geometry {
            k,
            num_buckets,
            bucket_capacity,
            rounds,
            prefix_size,
            nonce_size,
        })
    }

    /// Records hashed per round (C * B).
    pub fn per_round_records(&self) -> u64 {
        self.bucket_capacity * self.num_buckets
    }

    /// Planner-adjusted total record count.
    pub fn total_records(&self) -> u64 {
        self.per_round_records() * self.rounds
    }

    /// Bytes of one per-round bucket (C * R).
    pub fn bucket_bytes(&self) -> u64 {
        self.bucket_capacity * self.nonce_size as u64
    }

    /// Bytes of the in-RAM table, also one round's slab on disk.
    pub fn table_bytes(&self) -> u64 {
        self.bucket_bytes() * self.num_buckets
    }

    /// Bytes of a final-file bucket (C * rounds * R).
    pub fn final_bucket_bytes(&self) -> u64 {
        self.bucket_bytes() * self.rounds
    }

    /// Total bytes of both the temp and the final file.
    pub fn file_bytes(&self) -> u64 {
        self.table_bytes() * self.rounds
    }

    /// Byte offset of `bucket`'s slab within round `round` of the temp file.
    pub fn temp_offset(&self, round: u64, bucket: u64) -> u64 {
        (round * self.num_buckets + bucket) * self.bucket_bytes()
    }

    /// Byte offset of `bucket` in the bucket-major final file.
    pub fn final_offset(&self, bucket: u64) -> u64 {
        bucket * self.final_bucket_bytes()
    }

    /// Buckets transposed per shuffle group.
    ///
    /// Half the budget goes to the read buffer and half to the transposed
    /// copy. The group count must tile the bucket range exactly; since the
    /// bucket count is a power of two, a non-divisor group size is widened
    /// to `num_buckets / prev_power_of_two(num_buckets / g)`.
    pub fn shuffle_group(&self, mem_bytes: u64) -> u64 {
        let group_bytes = self.final_bucket_bytes();
        let mut g = (mem_bytes / group_bytes / 2).clamp(1, self.num_buckets);
        if self.num_buckets % g != 0 {
            let ratio = self.num_buckets / g;
            if ratio <= 1 {
                g = self.num_buckets;
            } else {
                g = self.num_buckets / prev_power_of_two(ratio);
            }
        }
        g
    }
}

/// Largest power of two strictly below `n` (for powers of two), otherwise
/// the largest power of two below-or-equal.
fn prev_power_of_two(n: u64) -> u64 {
    (n - 1).next_power_of_two() / 2
}
