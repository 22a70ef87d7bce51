use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::{ArgAction, Parser};
use log::LevelFilter;

use hashvault::{
    batch_lookup, build, open_table, verify_file, Approach, Blake3Hasher, BuildOptions, Geometry,
    LookupEngine, NonceHasher, VaultError, NONCE_SIZE, PREFIX_SIZE,
};
use hashvault::geometry::{MAX_EXPONENT, MIN_EXPONENT, MIN_MEMORY_BYTES};

/// Build and query a disk-resident nonce vault.
#[derive(Parser, Debug)]
#[command(name = "hashvault", version, about)]
struct Cli {
    /// Batch scheduling variant (identical semantics)
    #[arg(short = 'a', long, value_enum, default_value_t = Approach::For)]
    approach: Approach,

    /// Compute threads (default: all cores)
    #[arg(short = 't', long, value_parser = clap::value_parser!(u32).range(1..))]
    threads: Option<u32>,

    /// I/O threads for the shuffle read phase
    #[arg(short = 'i', long = "threads_io", value_parser = clap::value_parser!(u32).range(1..))]
    threads_io: Option<u32>,

    /// log2 of the total nonce count
    #[arg(short = 'K', long,
          value_parser = clap::value_parser!(u32).range(MIN_EXPONENT as i64..=MAX_EXPONENT as i64))]
    exponent: Option<u32>,

    /// Memory budget in MiB (at least 64)
    #[arg(short = 'm', long, default_value_t = 1024)]
    memory: u64,

    /// Temp (round-major) data file
    #[arg(short = 'f', long)]
    file: Option<PathBuf>,

    /// Final (bucket-major) data file
    #[arg(short = 'g', long = "file_final")]
    file_final: Option<PathBuf>,

    /// Nonces per generator batch
    #[arg(short = 'b', long = "batch-size", default_value_t = 1024,
          value_parser = clap::value_parser!(u64).range(1..))]
    batch_size: u64,

    /// Insert into the in-RAM table (disable to measure raw hashing)
    #[arg(short = 'w', long = "memory_write", action = ArgAction::Set,
          default_value_t = true, default_missing_value = "true", num_args = 0..=1)]
    memory_write: bool,

    /// Verify bucket ordering of the final file
    #[arg(short = 'v', long, action = ArgAction::Set,
          default_value_t = false, default_missing_value = "true", num_args = 0..=1)]
    verify: bool,

    /// Single lookup: hex-encoded digest prefix
    #[arg(short = 's', long)]
    search: Option<String>,

    /// Batch lookup prefix length in bytes
    #[arg(short = 'p', long = "prefix_search_size",
          value_parser = clap::value_parser!(u64).range(1..))]
    prefix_search_size: Option<u64>,

    /// Batch lookup query count
    #[arg(long, default_value_t = 100)]
    lookups: u64,

    /// Machine-parseable output
    #[arg(short = 'x', long, action = ArgAction::SetTrue)]
    benchmark: bool,

    /// Verbose traces
    #[arg(short = 'd', long, action = ArgAction::SetTrue)]
    debug: bool,

    /// Print the digests of the first N records of the final file
    #[arg(long, value_name = "N")]
    print: Option<u64>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut logger = env_logger::Builder::from_default_env();
    if cli.debug {
        logger.filter_level(LevelFilter::Debug);
    }
    logger.init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<(), VaultError> {
    let compute = pool(cli.threads)?;

    if let Some(hex_prefix) = &cli.search {
        return single_lookup(cli, hex_prefix, &compute);
    }
    if let Some(len) = cli.prefix_search_size {
        return batch(cli, len as usize, &compute);
    }
    if let Some(count) = cli.print {
        return print_digests(cli, count);
    }
    if cli.exponent.is_none() && cli.verify {
        return standalone_verify(cli);
    }
    run_build(cli, &compute)
}

fn pool(threads: Option<u32>) -> Result<rayon::ThreadPool, VaultError> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads.unwrap_or(0) as usize)
        .build()
        .map_err(|e| VaultError::Config(e.to_string()))
}

fn final_path(cli: &Cli) -> Result<&Path, VaultError> {
    cli.file_final
        .as_deref()
        .ok_or_else(|| VaultError::Config("this mode needs a final file (-g)".into()))
}

fn run_build(cli: &Cli, compute: &rayon::ThreadPool) -> Result<(), VaultError> {
    let k = cli
        .exponent
        .ok_or_else(|| VaultError::Config("building needs an exponent (-K)".into()))?;
    if cli.memory << 20 < MIN_MEMORY_BYTES {
        return Err(VaultError::Config(format!(
            "memory budget must be at least {} MiB, got {}",
            MIN_MEMORY_BYTES >> 20,
            cli.memory
        )));
    }
    if cli.file.is_none() {
        log::warn!("no temp file (-f): hashing only, nothing will be written");
    }

    let geo = Geometry::plan(k, cli.memory << 20, PREFIX_SIZE, NONCE_SIZE)?;
    if !cli.benchmark {
        print_geometry(cli, &geo);
    }

    let io_pool = match cli.threads_io {
        Some(n) => Some(pool(Some(n))?),
        None => None,
    };
    let opts = BuildOptions {
        approach: cli.approach,
        batch_size: cli.batch_size,
        memory_write: cli.memory_write,
        temp_path: cli.file.clone(),
        final_path: cli.file_final.clone(),
    };

    let report = build(geo, &Blake3Hasher, &opts, compute, io_pool.as_ref())?;

    let secs = report.elapsed.as_secs_f64();
    let mhs = report.hash_rate() / 1e6;
    if cli.benchmark {
        println!(
            "build,{k},{},{},{},{secs:.6},{mhs:.2}",
            geo.rounds, report.filled, report.overflowed
        );
    } else {
        println!(
            "Total Throughput: {mhs:.2} MH/s  {:.2} MB/s",
            mhs * NONCE_SIZE as f64
        );
        println!("Total Time: {secs:.6} seconds");
        println!(
            "Stored {} of {} records ({} dropped on full buckets)",
            report.filled,
            geo.total_records(),
            report.overflowed
        );
    }

    if cli.verify {
        let path = final_path(cli)?;
        let file = File::open(path)?;
        let checked = verify_file(
            &file,
            &Blake3Hasher,
            geo.prefix_size,
            geo.nonce_size,
            1_000_000,
        )?;
        println!("{checked}");
        println!("efficiency={:.2}%", checked.efficiency() * 100.0);
    }
    Ok(())
}

fn print_geometry(cli: &Cli, geo: &Geometry) {
    let threads = cli
        .threads
        .map(|t| t as usize)
        .unwrap_or_else(num_cpus::get);
    println!("Selected Approach           : {}", cli.approach.as_str());
    println!("Number of Threads           : {threads}");
    println!("Exponent K                  : {}", geo.k);
    println!("File Size (bytes)           : {}", geo.file_bytes());
    println!("Memory Size (bytes)         : {}", geo.table_bytes());
    println!("Rounds                      : {}", geo.rounds);
    println!("Number of Buckets           : {}", geo.num_buckets);
    println!("Records per Bucket per Round: {}", geo.bucket_capacity);
    println!("Batch Size                  : {}", cli.batch_size);
    if let Some(path) = &cli.file {
        println!("Temporary File              : {}", path.display());
    }
    if let Some(path) = &cli.file_final {
        println!("Output File Final           : {}", path.display());
    }
}

fn single_lookup(cli: &Cli, hex_prefix: &str, compute: &rayon::ThreadPool) -> Result<(), VaultError> {
    let prefix = hex::decode(hex_prefix)
        .map_err(|e| VaultError::Config(format!("bad hex prefix {hex_prefix:?}: {e}")))?;
    if prefix.is_empty() {
        return Err(VaultError::Config("empty search prefix".into()));
    }

    let path = final_path(cli)?;
    let (file, sidecar) = open_table(path)?;
    let hasher = Blake3Hasher;
    let engine = LookupEngine::new(&file, &sidecar, &hasher);

    let start = Instant::now();
    let hit = compute.install(|| engine.lookup(&prefix))?;
    let secs = start.elapsed().as_secs_f64();

    match hit {
        Some(nonce) => println!("Hash found: nonce {nonce} (prefix {hex_prefix})"),
        None => println!("Hash not found in the computed bucket."),
    }
    println!("Lookup time: {secs:.6} seconds");
    Ok(())
}

fn batch(cli: &Cli, prefix_len: usize, compute: &rayon::ThreadPool) -> Result<(), VaultError> {
    let path = final_path(cli)?;
    let (file, sidecar) = open_table(path)?;
    let hasher = Blake3Hasher;
    let engine = LookupEngine::new(&file, &sidecar, &hasher);

    let stats = compute.install(|| batch_lookup(&engine, cli.lookups, prefix_len))?;
    let secs = stats.elapsed.as_secs_f64();
    if cli.benchmark {
        println!(
            "lookup,{},{prefix_len},{},{},{},{secs:.6},{:.6}",
            sidecar.k,
            stats.lookups,
            stats.hits,
            stats.misses,
            stats.avg_ms()
        );
    } else {
        println!(
            "Lookups: {} ({} hits, {} misses) in {secs:.3} s, {:.3} ms avg",
            stats.lookups,
            stats.hits,
            stats.misses,
            stats.avg_ms()
        );
    }
    Ok(())
}

fn standalone_verify(cli: &Cli) -> Result<(), VaultError> {
    let path = final_path(cli)?;
    let (file, sidecar) = open_table(path)?;
    let checked = verify_file(
        &file,
        &Blake3Hasher,
        sidecar.prefix_size,
        sidecar.nonce_size,
        1_000_000,
    )?;
    println!("{checked}");
    println!("efficiency={:.2}%", checked.efficiency() * 100.0);
    Ok(())
}

fn print_digests(cli: &Cli, count: u64) -> Result<(), VaultError> {
    use std::os::unix::fs::FileExt;

    let path = final_path(cli)?;
    let (file, sidecar) = open_table(path)?;
    let hasher = Blake3Hasher;

    let mut record = vec![0u8; sidecar.nonce_size];
    let mut digest = [0u8; 32];
    let total = sidecar.num_buckets * sidecar.bucket_size;
    for i in 0..count.min(total) {
        file.read_exact_at(&mut record, i * sidecar.nonce_size as u64)?;
        hasher.digest(&record, &mut digest);
        println!("{}", hex::encode(digest));
    }
    Ok(())
}
