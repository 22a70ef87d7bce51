//! Build orchestration: the round loop, finalisation, and the sidecar.
//!
//! One `BucketTable` is allocated up front and reused: each round clears
//! it, hashes its nonce range on the compute pool, and appends the table
//! to the temp file. Multi-round builds then transpose the temp file into
//! the final file; single-round builds promote it by rename. The sidecar
//! is written once the final file is durable.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use log::{debug, info};

use crate::error::VaultError;
use crate::generate::{write_round, Approach, Generator};
use crate::geometry::Geometry;
use crate::hasher::NonceHasher;
use crate::shuffle::{promote, sync_durable, Shuffler};
use crate::sidecar::{sidecar_path, Sidecar};
use crate::table::BucketTable;
use crate::verify;

pub struct BuildOptions {
    pub approach: Approach,
    pub batch_size: u64,
    /// Debug switch (`-w false`): hash every nonce but skip table inserts.
    pub memory_write: bool,
    pub temp_path: Option<PathBuf>,
    pub final_path: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug)]
pub struct BuildReport {
    pub geometry: Geometry,
    pub elapsed: Duration,
    /// Records stored across all rounds (overflow excluded).
    pub filled: u64,
    /// Inserts dropped because their bucket was already full.
    pub overflowed: u64,
}

impl BuildReport {
    /// Hashing rate over the whole build, in hashes per second.
    pub fn hash_rate(&self) -> f64 {
        self.geometry.total_records() as f64 / self.elapsed.as_secs_f64()
    }
}

pub fn build<H: NonceHasher>(
    geo: Geometry,
    hasher: &H,
    opts: &BuildOptions,
    compute: &rayon::ThreadPool,
    io_pool: Option<&rayon::ThreadPool>,
) -> Result<BuildReport, VaultError> {
    if opts.final_path.is_some() && opts.temp_path.is_none() {
        return Err(VaultError::Config(
            "a final file needs a temp file to build from".into(),
        ));
    }

    let temp_file = match &opts.temp_path {
        Some(path) => Some(
            File::options()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)?,
        ),
        None => None,
    };

    let start = Instant::now();
    let mut table = BucketTable::new(geo);
    let mut filled = 0u64;
    let mut overflowed = 0u64;

    for round in 0..geo.rounds {
        table.clear();

        let hash_start = Instant::now();
        let generator = Generator::new(
            hasher,
            &table,
            opts.batch_size,
            opts.approach,
            opts.memory_write,
        );
        compute.install(|| generator.run_round(round));
        let hash_secs = hash_start.elapsed().as_secs_f64();

        filled += table.filled();
        overflowed += table.overflowed();
        info!(
            "[{:.2}] HashGen {:.2}%: {:.2} MH/s",
            start.elapsed().as_secs_f64(),
            (round + 1) as f64 * 100.0 / geo.rounds as f64,
            geo.per_round_records() as f64 / hash_secs / 1e6
        );

        if let Some(file) = &temp_file {
            let io_start = Instant::now();
            write_round(file, &mut table, round)?;
            info!(
                "[{:.2}] I/O round {round}: {:.2} MB/s",
                start.elapsed().as_secs_f64(),
                geo.table_bytes() as f64 / io_start.elapsed().as_secs_f64() / (1 << 20) as f64
            );
        }
    }

    // Generation is done; release the table before the shuffle buffers
    // take their share of the budget.
    drop(table);

    if let Some(final_path) = &opts.final_path {
        let temp_path = opts.temp_path.as_ref().expect("checked above");
        let temp_file = temp_file.expect("checked above");

        if geo.rounds == 1 {
            drop(temp_file);
            promote(temp_path, final_path)?;
            info!("promoted {} to {}", temp_path.display(), final_path.display());
        } else {
            let out = File::options()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(final_path)?;
            Shuffler::new(geo, io_pool).run(&temp_file, &out)?;
            sync_durable(&out)?;
            fs::remove_file(temp_path)?;
            debug!("removed temp file {}", temp_path.display());
        }

        let sidecar = Sidecar::for_table(&geo, opts.approach);
        sidecar.write(&sidecar_path(final_path))?;
    }

    Ok(BuildReport {
        geometry: geo,
        elapsed: start.elapsed(),
        filled,
        overflowed,
    })
}

/// Convenience wrapper: build, then re-open the final file and verify the
/// bucket ordering, returning both reports.
pub fn build_and_verify<H: NonceHasher>(
    geo: Geometry,
    hasher: &H,
    opts: &BuildOptions,
    compute: &rayon::ThreadPool,
    io_pool: Option<&rayon::ThreadPool>,
    verify_batch: usize,
) -> Result<(BuildReport, verify::VerifyReport), VaultError> {
    let report = build(geo, hasher, opts, compute, io_pool)?;
    let final_path = opts.final_path.as_ref().ok_or_else(|| {
        VaultError::Config("verification needs a final file".into())
    })?;
    let file = File::open(final_path)?;
    let checked = verify::verify_file(&file, hasher, geo.prefix_size, geo.nonce_size, verify_batch)?;
    Ok((report, checked))
}

/// Open a finished table for lookups: the data file plus its sidecar.
pub fn open_table(final_path: &Path) -> Result<(File, Sidecar), VaultError> {
    let sidecar = Sidecar::read(&sidecar_path(final_path))?;
    let file = File::open(final_path)?;
    let expected = sidecar.file_bytes();
    let actual = file.metadata()?.len();
    if actual != expected {
        return Err(VaultError::Sidecar(format!(
            "{}: file is {actual} bytes, sidecar geometry wants {expected}",
            final_path.display()
        )));
    }
    Ok((file, sidecar))
}
