//! Out-of-core transpose of the round-major temp file into the
//! bucket-major final file, plus the durability tail.
//!
//! The temp file holds `rounds` slabs of all `B` buckets; the final file
//! wants each bucket's `rounds` partial slabs adjacent. Buckets are
//! processed in groups sized so that the read buffer and its transposed
//! copy together stay within the memory budget. Per-round reads of a group
//! are issued in parallel with positional I/O; final-file writes are serial
//! and strictly offset-increasing.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::time::Instant;

use log::{debug, info};
use rayon::prelude::*;

use crate::error::VaultError;
use crate::geometry::Geometry;

pub struct Shuffler<'a> {
    geo: Geometry,
    io_pool: Option<&'a rayon::ThreadPool>,
}

impl<'a> Shuffler<'a> {
    pub fn new(geo: Geometry, io_pool: Option<&'a rayon::ThreadPool>) -> Self {
        Shuffler { geo, io_pool }
    }

    /// Transpose `temp` into `out`.
    ///
    /// On return every bucket's slabs sit at `geo.final_offset(bucket)` in
    /// round order. The caller still owns syncing and temp removal.
    pub fn run(&self, temp: &File, out: &File) -> Result<(), VaultError> {
        let geo = &self.geo;
        let group = geo.shuffle_group(geo.table_bytes());
        let rounds = geo.rounds;
        let bucket_bytes = geo.bucket_bytes() as usize;
        let group_round_bytes = group as usize * bucket_bytes;
        let group_bytes = group_round_bytes * rounds as usize;
        debug!(
            "shuffle: {group} buckets per group, {} groups, {group_bytes} B buffers",
            geo.num_buckets / group
        );

        let mut buf = vec![0u8; group_bytes];
        let mut shuffled = vec![0u8; group_bytes];
        let start = Instant::now();

        let mut first = 0u64;
        while first < geo.num_buckets {
            self.read_group(temp, first, &mut buf)?;
            transpose(geo, group, &buf, &mut shuffled);
            out.write_all_at(&shuffled, geo.final_offset(first))?;

            first += group;
            let elapsed = start.elapsed().as_secs_f64();
            let done = first as f64 / geo.num_buckets as f64;
            let rate = (first * geo.final_bucket_bytes()) as f64 / elapsed / (1 << 20) as f64;
            info!(
                "[{elapsed:.2}] Shuffle {:.2}%: {rate:.2} MB/s",
                done * 100.0
            );
        }
        Ok(())
    }

    /// Read one group's per-round slabs into `buf`, round r landing at
    /// `buf[r * G * C * R ..]`. Rounds are fetched in parallel on the I/O
    /// pool; positional reads keep the shared descriptor seek-free.
    fn read_group(&self, temp: &File, first: u64, buf: &mut [u8]) -> Result<(), VaultError> {
        let geo = &self.geo;
        let group_round_bytes = buf.len() / geo.rounds as usize;

        let mut read_all = || -> io::Result<()> {
            buf.par_chunks_mut(group_round_bytes)
                .enumerate()
                .try_for_each(|(round, chunk)| {
                    let offset = geo.temp_offset(round as u64, first);
                    temp.read_exact_at(chunk, offset)
                })
        };
        match self.io_pool {
            Some(pool) => pool.install(read_all)?,
            None => read_all()?,
        }
        Ok(())
    }
}

/// In-RAM transpose of one group: `buf[(r * G + s) * C] → out[(s * rounds + r) * C]`.
fn transpose(geo: &Geometry, group: u64, buf: &[u8], out: &mut [u8]) {
    let bucket_bytes = geo.bucket_bytes() as usize;
    let final_bucket_bytes = geo.final_bucket_bytes() as usize;
    out.par_chunks_mut(final_bucket_bytes)
        .enumerate()
        .for_each(|(s, dst)| {
            for r in 0..geo.rounds as usize {
                let src = (r * group as usize + s) * bucket_bytes;
                dst[r * bucket_bytes..][..bucket_bytes]
                    .copy_from_slice(&buf[src..][..bucket_bytes]);
            }
        });
}

/// Single-round fast path: the transpose is the identity, so the temp file
/// becomes the final file by rename, or by deep copy when the paths live on
/// different filesystems.
pub fn promote(temp: &Path, dest: &Path) -> Result<(), VaultError> {
    match fs::rename(temp, dest) {
        Ok(()) => sync_durable(&File::open(dest)?),
        Err(e) if e.raw_os_error() == Some(libc::EXDEV) => {
            debug!("rename of {} crossed filesystems, deep-copying", temp.display());
            deep_promote(temp, dest)
        }
        Err(e) => Err(e.into()),
    }
}

/// Cross-filesystem fallback. The source is removed only once the copy is
/// fsynced; any earlier failure leaves it in place.
fn deep_promote(temp: &Path, dest: &Path) -> Result<(), VaultError> {
    deep_copy(temp, dest)?;
    sync_durable(&File::open(dest)?)?;
    fs::remove_file(temp)?;
    Ok(())
}

fn deep_copy(src: &Path, dest: &Path) -> Result<(), VaultError> {
    let mut reader = BufReader::with_capacity(8 << 20, File::open(src)?);
    let mut writer = BufWriter::with_capacity(8 << 20, File::create(dest)?);
    io::copy(&mut reader, &mut writer)?;
    io::Write::flush(&mut writer)?;
    Ok(())
}

/// Durability tail: fsync the file, then sync its filesystem where the
/// platform offers it. Callers remove the temp file only after this
/// returns.
pub fn sync_durable(file: &File) -> Result<(), VaultError> {
    file.sync_all()?;
    syncfs(file);
    Ok(())
}

#[cfg(target_os = "linux")]
fn syncfs(file: &File) {
    use std::os::unix::io::AsRawFd;
    // Best-effort: a failure here never outranks the completed fsync.
    if unsafe { libc::syncfs(file.as_raw_fd()) } != 0 {
        debug!("syncfs failed: {}", io::Error::last_os_error());
    }
}

#[cfg(not(target_os = "linux"))]
fn syncfs(_file: &File) {}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry(rounds: u64) -> Geometry {
        // 4 buckets, 2 records per round, 4-byte records.
        Geometry {
            k: 5,
            num_buckets: 4,
            bucket_capacity: 2,
            rounds,
            prefix_size: 1,
            nonce_size: 4,
        }
    }

    /// Temp file where record bytes encode (round, bucket, slot).
    fn write_temp(geo: &Geometry, path: &Path) -> File {
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .unwrap();
        for r in 0..geo.rounds {
            for b in 0..geo.num_buckets {
                for s in 0..geo.bucket_capacity {
                    let rec = [r as u8, b as u8, s as u8, 0xee];
                    let offset =
                        geo.temp_offset(r, b) + s * geo.nonce_size as u64;
                    file.write_all_at(&rec, offset).unwrap();
                }
            }
        }
        file
    }

    #[test]
    fn final_file_is_bucket_major_in_round_order() {
        let dir = tempfile::tempdir().unwrap();
        let geo = geometry(4);
        let temp = write_temp(&geo, &dir.path().join("temp.dat"));
        let out = File::options()
            .read(true)
            .write(true)
            .create(true)
            .open(dir.path().join("final.dat"))
            .unwrap();

        Shuffler::new(geo, None).run(&temp, &out).unwrap();

        assert_eq!(out.metadata().unwrap().len(), geo.file_bytes());
        let mut bucket = vec![0u8; geo.final_bucket_bytes() as usize];
        for b in 0..geo.num_buckets {
            out.read_exact_at(&mut bucket, geo.final_offset(b)).unwrap();
            for r in 0..geo.rounds {
                for s in 0..geo.bucket_capacity {
                    let at = ((r * geo.bucket_capacity + s) * geo.nonce_size as u64) as usize;
                    assert_eq!(
                        &bucket[at..at + 4],
                        &[r as u8, b as u8, s as u8, 0xee],
                        "bucket {b} round {r} slot {s}"
                    );
                }
            }
        }
    }

    #[test]
    fn multi_group_shuffle_matches_single_group() {
        let dir = tempfile::tempdir().unwrap();
        // table_bytes = 32, final bucket = 32 B: group = max(32/32/2, 1) = 1,
        // so the 4 buckets take 4 groups.
        let geo = geometry(4);
        assert_eq!(geo.shuffle_group(geo.table_bytes()), 1);

        let temp = write_temp(&geo, &dir.path().join("temp.dat"));
        let out = File::options()
            .read(true)
            .write(true)
            .create(true)
            .open(dir.path().join("final.dat"))
            .unwrap();
        Shuffler::new(geo, None).run(&temp, &out).unwrap();

        // Spot-check the last bucket landed whole.
        let mut rec = [0u8; 4];
        out.read_exact_at(&mut rec, geo.final_offset(3)).unwrap();
        assert_eq!(rec, [0, 3, 0, 0xee]);
    }

    #[test]
    fn promote_renames_and_removes_temp() {
        let dir = tempfile::tempdir().unwrap();
        let temp = dir.path().join("vault.tmp");
        let dest = dir.path().join("vault.dat");
        fs::write(&temp, b"records").unwrap();

        promote(&temp, &dest).unwrap();
        assert!(!temp.exists());
        assert_eq!(fs::read(&dest).unwrap(), b"records");
    }

    #[test]
    fn deep_promote_removes_source_only_after_durable_copy() {
        let dir = tempfile::tempdir().unwrap();
        let temp = dir.path().join("vault.tmp");
        let dest = dir.path().join("vault.dat");
        fs::write(&temp, b"records").unwrap();

        deep_promote(&temp, &dest).unwrap();
        assert!(!temp.exists());
        assert_eq!(fs::read(&dest).unwrap(), b"records");
    }

    #[test]
    fn deep_promote_failure_leaves_the_source_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let temp = dir.path().join("vault.tmp");
        fs::write(&temp, b"records").unwrap();

        // Unwritable destination: the copy fails before the source is
        // touched, so the only durable copy survives.
        let dest = dir.path().join("missing").join("vault.dat");
        assert!(deep_promote(&temp, &dest).is_err());
        assert!(temp.exists());
        assert_eq!(fs::read(&temp).unwrap(), b"records");
    }
}
