//! # Hashvault
//!
//! A disk-resident table of (nonce → hash) records for constant-seek
//! digest-prefix lookups.
//!
//! Given an exponent `K`, the builder hashes `2^K` nonces and partitions
//! them by the leading bytes of their digest into equal-size buckets of a
//! flat file. A query for a digest prefix then reads exactly one bucket
//! and re-hashes its candidates, so every lookup costs a single contiguous
//! read regardless of table size.
//!
//! ## Building
//!
//! Hashing runs in rounds sized to the operator's memory budget: each
//! round fills an in-RAM bucket table in parallel and appends it to a temp
//! file. A final out-of-core transpose groups every bucket's per-round
//! slabs together, producing the bucket-major final file plus a plain-text
//! sidecar describing its geometry.
//!
//! Buckets have fixed capacity; records hashing into a full bucket are
//! dropped silently and surface only as reduced storage efficiency. The
//! all-zero record is the empty sentinel, so nonce 0 is never stored.
//!
//! ## Example
//!
//! ```no_run
//! use hashvault::{build, BuildOptions, Approach, Blake3Hasher, Geometry};
//! use hashvault::{NONCE_SIZE, PREFIX_SIZE};
//!
//! # fn main() -> Result<(), hashvault::VaultError> {
//! let geo = Geometry::plan(26, 1 << 30, PREFIX_SIZE, NONCE_SIZE)?;
//! let opts = BuildOptions {
//!     approach: Approach::For,
//!     batch_size: 1024,
//!     memory_write: true,
//!     temp_path: Some("vault.tmp".into()),
//!     final_path: Some("vault.dat".into()),
//! };
//! let pool = rayon::ThreadPoolBuilder::new().build().unwrap();
//! let report = build(geo, &Blake3Hasher, &opts, &pool, None)?;
//! println!("stored {} records", report.filled);
//! # Ok(())
//! # }
//! ```

pub mod build;
pub mod error;
pub mod generate;
pub mod geometry;
pub mod hasher;
pub mod lookup;
pub mod shuffle;
pub mod sidecar;
pub mod table;
pub mod verify;

pub use build::{build, build_and_verify, open_table, BuildOptions, BuildReport};
pub use error::VaultError;
pub use generate::{Approach, Generator};
pub use geometry::Geometry;
pub use hasher::{Blake3Hasher, NonceHasher, MAX_DIGEST_LEN, NONCE_SIZE, PREFIX_SIZE};
pub use lookup::{batch_lookup, BatchStats, LookupEngine};
pub use sidecar::Sidecar;
pub use table::BucketTable;
pub use verify::{verify_file, VerifyReport};
