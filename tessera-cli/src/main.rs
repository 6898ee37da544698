//! CLI for the tessera write path.
//!
//! Provides commands for validating configuration files and for simulating
//! ingest, drain cycles and eviction sweeps against a manual clock.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand, ValueEnum};
use tessera::{
    BitStream, BlockLifecycleManager, Clock, Compressor, Datapoint, DrainError, ManualClock,
    OptionsConfig, RawCompressor, SeriesId,
};
use tracing_subscriber::EnvFilter;

/// Start of the simulated timeline: 2023-11-14 22:00:00 UTC, aligned to 2h.
const SIMULATION_EPOCH: u64 = 1_699_999_200_000_000_000;

/// tessera — In-memory time-series write path CLI.
#[derive(Parser)]
#[command(name = "tessera", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Load a configuration file, validate it and print the effective options.
    Validate {
        /// Path to the JSON configuration file.
        config: PathBuf,

        /// Output format.
        #[arg(long, default_value = "text")]
        format: OutputFormat,
    },

    /// Drive ingest, drains and eviction through a simulated clock.
    Simulate {
        /// Optional JSON configuration file; defaults are used otherwise.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Number of series to write.
        #[arg(long, default_value = "4")]
        series: u32,

        /// Number of points to write per series.
        #[arg(long, default_value = "1000")]
        points: u64,

        /// Simulated time between consecutive points, in milliseconds.
        #[arg(long, default_value = "1000")]
        step_ms: u64,

        /// Make every Nth compression attempt fail (0 = never).
        #[arg(long, default_value = "0")]
        fail_every: u64,
    },
}

/// Output format for `validate`.
#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Human-readable listing.
    Text,
    /// JSON in the configuration file format.
    Json,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Validate { config, format } => cmd_validate(&config, &format),
        Commands::Simulate {
            config,
            series,
            points,
            step_ms,
            fail_every,
        } => cmd_simulate(config.as_deref(), series, points, step_ms, fail_every),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Implements `tessera validate <config>`.
fn cmd_validate(path: &Path, format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let options = OptionsConfig::load(path)?.into_builder().build()?;
    let effective = OptionsConfig::from(&options);

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&effective)?),
        OutputFormat::Text => {
            println!("Config: {}", path.display());
            println!();
            println!("  Block size:          {:?}", effective.block_size);
            println!("  Buffer past:         {:?}", effective.buffer_past);
            println!("  Buffer future:       {:?}", effective.buffer_future);
            println!("  Drain interval:      {:?}", effective.buffer_drain_interval);
            println!("  Retention period:    {:?}", effective.retention_period);
            println!("  Max flush retries:   {}", effective.max_flush_retries);
            println!("  Bucket alloc size:   {}", effective.buffer_bucket_alloc_size);
            println!("  Block alloc size:    {}", effective.database_block_alloc_size);
            println!();
            println!("OK");
        }
    }

    Ok(())
}

/// Raw compressor that fails every `every`-th attempt across all drains.
#[derive(Clone)]
struct FaultInjector {
    attempts: Arc<AtomicU64>,
    every: u64,
}

impl Compressor for FaultInjector {
    fn compress(
        &mut self,
        block_start: u64,
        points: &[Datapoint],
        stream: &mut BitStream,
    ) -> Result<(), DrainError> {
        let attempt = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
        if self.every > 0 && attempt % self.every == 0 {
            return Err(DrainError::Compressor {
                block_start,
                reason: format!("injected failure on attempt {attempt}"),
            });
        }
        RawCompressor.compress(block_start, points, stream)
    }
}

/// Implements `tessera simulate`.
fn cmd_simulate(
    config: Option<&Path>,
    series_count: u32,
    points: u64,
    step_ms: u64,
    fail_every: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    if series_count == 0 || step_ms == 0 {
        return Err("--series and --step-ms must be greater than zero".into());
    }

    let config = match config {
        Some(path) => OptionsConfig::load(path)?,
        None => OptionsConfig::default(),
    };

    let clock = ManualClock::new(SIMULATION_EPOCH);
    let injector = FaultInjector {
        attempts: Arc::new(AtomicU64::new(0)),
        every: fail_every,
    };
    let options = config
        .into_builder()
        .clock(clock.clone())
        .compressor_factory(move || Box::new(injector.clone()) as Box<dyn Compressor>)
        .build()?;

    let drain_interval = options.buffer_drain_interval();
    let step = Duration::from_millis(step_ms);
    let manager = BlockLifecycleManager::new(options);
    let series: Vec<SeriesId> = (0..series_count)
        .map(|i| SeriesId::new(format!("metric_{i}")))
        .collect();

    println!("tessera write-path simulation");
    println!("  Series: {series_count}");
    println!("  Points per series: {points}");
    println!("  Step: {step:?}");
    println!("  Drain interval: {drain_interval:?}");
    if fail_every > 0 {
        println!("  Failing every {fail_every} compression attempt(s)");
    }
    println!();

    tracing::info!("simulating {series_count} series x {points} point(s), fail_every={fail_every}");

    let mut totals = Totals::default();
    let mut since_drain = Duration::ZERO;
    let mut value = 0.0f64;
    let start = Instant::now();

    for _ in 0..points {
        let now = clock.now();
        for id in &series {
            manager.append(id, now, value)?;
            totals.appended += 1;
        }
        value += 0.25;

        clock.advance(step);
        since_drain += step;
        if since_drain >= drain_interval {
            since_drain = Duration::ZERO;
            totals.run_cycle(&manager, clock.now());
        }
    }
    totals.run_cycle(&manager, clock.now());

    let elapsed = start.elapsed();
    println!();
    println!("Results:");
    println!("  Points appended: {}", totals.appended);
    println!("  Points sealed: {}", totals.points_sealed);
    println!("  Blocks sealed: {}", totals.blocks_sealed);
    println!("  Drain failures: {}", totals.failures);
    println!("  Blocks evicted: {}", totals.blocks_evicted);
    println!("  Series in memory: {}", manager.series_count());
    println!("  Elapsed: {elapsed:.3?}");

    Ok(())
}

/// Running totals of a simulation.
#[derive(Default)]
struct Totals {
    cycles: u64,
    appended: u64,
    points_sealed: usize,
    blocks_sealed: usize,
    failures: usize,
    blocks_evicted: usize,
}

impl Totals {
    /// Runs a drain cycle and an eviction sweep and prints a summary line.
    fn run_cycle(&mut self, manager: &BlockLifecycleManager, now: u64) {
        self.cycles += 1;
        let drained = manager.run_drain_cycle();
        let evicted = manager.run_eviction_sweep();

        self.points_sealed += drained.points_drained;
        self.blocks_sealed += drained.blocks_drained;
        self.failures += drained.failures.len();
        self.blocks_evicted += evicted.blocks_evicted;

        let offset = Duration::from_nanos(now.saturating_sub(SIMULATION_EPOCH));
        println!(
            "cycle {:>4} at +{:>8.0?}: sealed {} block(s) / {} point(s), {} failure(s), evicted {} block(s)",
            self.cycles,
            offset,
            drained.blocks_drained,
            drained.points_drained,
            drained.failures.len(),
            evicted.blocks_evicted,
        );
    }
}
