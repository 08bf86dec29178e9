//! slotdev command-line driver
//!
//! Exercises a slot store on a real device or image file.
//!
//! # Examples
//!
//! ```bash
//! # Show the effective configuration
//! slotdev --config slotdev.toml info
//!
//! # Write/read/verify 1M payloads, 4096 writes per key, on 8 threads
//! SLOTDEV_DEVICE_PATH=/dev/sdb slotdev stress --iterations 1048576 --threads 8
//!
//! # Same against a scratch image without O_DIRECT
//! SLOTDEV_DEVICE_PATH=/tmp/slotdev.img SLOTDEV_DIRECT=false SLOTDEV_CREATE=true \
//!     slotdev stress --iterations 10000 --metrics
//! ```

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use rayon::prelude::*;
use serde::Serialize;
use slotdev::error::Error;
use slotdev::{metrics, SlotStore, SlotStoreConfig};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{error, info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// slotdev - key-addressed slot store for raw block devices
#[derive(Parser, Debug)]
#[command(name = "slotdev")]
#[command(version = slotdev::VERSION)]
#[command(about = "Key-addressed fixed-block slot store for raw block devices", long_about = None)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file
    #[arg(long, global = true, env = "SLOTDEV_CONFIG")]
    config: Option<PathBuf>,

    /// Log directory path
    #[arg(long, global = true, default_value = "logs", env = "SLOTDEV_LOG_DIR")]
    log_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info", env = "RUST_LOG")]
    log_level: String,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write, read back and verify generated payloads
    Stress(StressArgs),

    /// Show the effective configuration and slot capacity
    Info,
}

/// Stress run arguments
#[derive(Args, Debug)]
struct StressArgs {
    /// Number of write/read/verify iterations
    #[arg(short, long, default_value = "65536")]
    iterations: u64,

    /// Consecutive iterations that share one key
    #[arg(short, long, default_value = "4096")]
    writes_per_key: u64,

    /// Payload size in bytes (at most block_size)
    #[arg(short, long, default_value = "4096")]
    payload_size: usize,

    /// Worker threads (0 = one per core)
    #[arg(short, long, default_value = "0")]
    threads: usize,

    /// Print Prometheus metrics after the run
    #[arg(long)]
    metrics: bool,
}

/// Outcome of a stress run
#[derive(Debug, Default, Serialize)]
struct StressReport {
    iterations: u64,
    keys: u64,
    writes: u64,
    reads: u64,
    mismatches: u64,
    failures: u64,
    elapsed_ms: u128,
    ops_per_sec: f64,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let _guard = setup_logging(&cli)?;

    let config = SlotStoreConfig::load(cli.config.as_deref())
        .context("Failed to load slotdev configuration")?;

    match cli.command {
        Commands::Stress(args) => stress_command(&config, args),
        Commands::Info => info_command(&config),
    }
}

/// Setup logging with rolling files and console output
fn setup_logging(cli: &Cli) -> anyhow::Result<tracing_appender::non_blocking::WorkerGuard> {
    std::fs::create_dir_all(&cli.log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &cli.log_dir, "slotdev.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let log_level = cli
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(!cli.no_color),
        )
        .with(fmt::layer().with_writer(file_writer).with_ansi(false))
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .init();

    Ok(guard)
}

/// Info command - print configuration and derived capacity
fn info_command(config: &SlotStoreConfig) -> anyhow::Result<()> {
    println!("slotdev {}", slotdev::VERSION);
    println!("───────────────────────────────");
    print!("{}", config.to_toml()?);
    println!("───────────────────────────────");
    println!("capacity = {} slots", config.capacity());
    Ok(())
}

/// Stress command - write, read back and compare, key by key
fn stress_command(config: &SlotStoreConfig, args: StressArgs) -> anyhow::Result<()> {
    let block_size = usize::try_from(config.block_size)?;
    if args.payload_size == 0 || args.payload_size > block_size {
        bail!(
            "payload size {} must be between 1 and block_size {}",
            args.payload_size,
            block_size
        );
    }
    if args.writes_per_key == 0 {
        bail!("writes-per-key must be at least 1");
    }

    metrics::init_metrics();

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(args.threads)
        .build()
        .context("Failed to build worker pool")?;

    let store = SlotStore::from_config(config)
        .with_context(|| format!("Failed to open {}", config.device_path.display()))?;
    info!(
        device = %config.device_path.display(),
        capacity = store.capacity(),
        block_size,
        "Stress run starting"
    );

    let keys = args.iterations.div_ceil(args.writes_per_key);
    let writes = AtomicU64::new(0);
    let reads = AtomicU64::new(0);
    let mismatches = AtomicU64::new(0);
    let failures = AtomicU64::new(0);
    let span = (block_size - args.payload_size + 1) as u64;

    let start = Instant::now();
    pool.install(|| {
        (0..keys).into_par_iter().for_each(|key| {
            let first = key * args.writes_per_key;
            let last = (first + args.writes_per_key).min(args.iterations);
            let mut out = vec![0u8; args.payload_size];

            for i in first..last {
                let payload = generate_payload(i, args.payload_size);
                let offset = i % span;

                if let Err(e) = store.write(key, &payload, offset) {
                    failures.fetch_add(1, Ordering::Relaxed);
                    if matches!(e, Error::Exhausted { .. }) {
                        warn!(key, "Store exhausted, skipping key");
                        return;
                    }
                    error!(key, iteration = i, error = %e, "Write failed");
                    continue;
                }
                writes.fetch_add(1, Ordering::Relaxed);

                match store.read(key, &mut out, offset) {
                    Ok(_) => {
                        reads.fetch_add(1, Ordering::Relaxed);
                        if out != payload {
                            mismatches.fetch_add(1, Ordering::Relaxed);
                            error!(key, iteration = i, offset, "Read back differs from write");
                        }
                    }
                    Err(e) => {
                        failures.fetch_add(1, Ordering::Relaxed);
                        error!(key, iteration = i, error = %e, "Read failed");
                    }
                }
            }
        });
    });
    let elapsed = start.elapsed();

    store.flush()?;
    store.close()?;

    let writes = writes.into_inner();
    let reads = reads.into_inner();
    let report = StressReport {
        iterations: args.iterations,
        keys,
        writes,
        reads,
        mismatches: mismatches.into_inner(),
        failures: failures.into_inner(),
        elapsed_ms: elapsed.as_millis(),
        ops_per_sec: (writes + reads) as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    if args.metrics {
        print!("{}", metrics::export_metrics());
    }

    if report.mismatches > 0 || report.failures > 0 {
        bail!(
            "{} mismatches and {} failures in {} iterations",
            report.mismatches,
            report.failures,
            report.iterations
        );
    }
    Ok(())
}

/// Deterministic printable payload for iteration `i`
fn generate_payload(i: u64, len: usize) -> Vec<u8> {
    const ALPHANUM: &[u8] =
        b"0123456789!@#$%^&*ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

    let mut state = i.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1;
    (0..len)
        .map(|_| {
            // xorshift64
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            ALPHANUM[(state % ALPHANUM.len() as u64) as usize]
        })
        .collect()
}
