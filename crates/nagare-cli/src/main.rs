//! nagare (流れ): drive a synthetic fan-out run from the command line.
//!
//! Usage:
//!   nagare run [options]     Fan out over 0..items and report the outcome
//!   nagare config            Show the config path and effective values
//!   nagare --help            Show help
//!   nagare --version         Show version

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use nagare_core::{AsyncEnumerable, FanOut, FanOutHooks, NagareConfig, from_iter};
use nagare_types::{FanOutOutcome, FlowError};

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:?}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<ExitCode> {
    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some("--help" | "-h") | None => {
            print_help();
            Ok(ExitCode::SUCCESS)
        }
        Some("--version" | "-V") => {
            println!("nagare {}", env!("CARGO_PKG_VERSION"));
            Ok(ExitCode::SUCCESS)
        }
        Some("run") => run_fanout(&args[2..]),
        Some("config") => show_config(&args[2..]),
        Some(other) => {
            eprintln!("Unknown command: {other}");
            eprintln!("Run 'nagare --help' for usage.");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn print_help() {
    let help = r#"nagare: pull-based async iteration with bounded fan-out

USAGE:
    nagare run [options]    Fan out over 0..items and report the outcome
    nagare config           Show config path and effective values

RUN OPTIONS:
    --items=<n>          Items to enumerate (default: 1000)
    --workers=<n>        Worker bound, 0 = unbounded (default: from config)
    --delay-ms=<n>       Per-item sleep inside each worker (default: 0)
    --fail-every=<n>     Fail every nth item, 0 = never (default: 0)
    --partitions=<n>     Split the range across n iterators (default: 1)
    --config=<path>      Load config from <path> instead of the default

OPTIONS:
    -h, --help           Show this help
    -V, --version        Show version

ENVIRONMENT:
    RUST_LOG             Log filter, e.g. RUST_LOG=nagare_core=debug

Ctrl-C cancels a run in progress."#;
    println!("{help}");
}

/// Parsed `run` options; `None` means "take it from config".
#[derive(Debug, PartialEq, Eq)]
struct RunOptions {
    items: u64,
    workers: Option<usize>,
    delay_ms: u64,
    fail_every: u64,
    partitions: usize,
    config: Option<PathBuf>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            items: 1000,
            workers: None,
            delay_ms: 0,
            fail_every: 0,
            partitions: 1,
            config: None,
        }
    }
}

fn parse_number<T: std::str::FromStr>(flag: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| anyhow::anyhow!("{flag} expects a number, got {value:?}"))
}

fn parse_run_args(args: &[String]) -> Result<RunOptions> {
    let mut opts = RunOptions::default();

    for arg in args {
        if let Some(v) = arg.strip_prefix("--items=") {
            opts.items = parse_number("--items", v)?;
        } else if let Some(v) = arg.strip_prefix("--workers=") {
            opts.workers = Some(parse_number("--workers", v)?);
        } else if let Some(v) = arg.strip_prefix("--delay-ms=") {
            opts.delay_ms = parse_number("--delay-ms", v)?;
        } else if let Some(v) = arg.strip_prefix("--fail-every=") {
            opts.fail_every = parse_number("--fail-every", v)?;
        } else if let Some(v) = arg.strip_prefix("--partitions=") {
            opts.partitions = parse_number("--partitions", v)?;
        } else if let Some(path) = arg.strip_prefix("--config=") {
            opts.config = Some(PathBuf::from(path));
        } else {
            bail!("Unknown run option: {arg}");
        }
    }

    if opts.partitions == 0 {
        bail!("--partitions must be at least 1");
    }
    Ok(opts)
}

fn load_config(path: Option<&PathBuf>) -> Result<NagareConfig> {
    match path {
        Some(path) => NagareConfig::load_from(path),
        None => NagareConfig::load(),
    }
}

fn show_config(args: &[String]) -> Result<ExitCode> {
    let opts = parse_run_args(args)?;
    let path = match &opts.config {
        Some(path) => path.clone(),
        None => NagareConfig::config_path()?,
    };
    let config = load_config(opts.config.as_ref())?;

    println!("config: {}", path.display());
    println!("max_workers = {}", config.max_workers);
    println!("batch_limit = {}", config.batch_limit);
    Ok(ExitCode::SUCCESS)
}

fn run_fanout(args: &[String]) -> Result<ExitCode> {
    let opts = parse_run_args(args)?;
    let config = load_config(opts.config.as_ref()).context("Failed to load config")?;
    let workers = opts.workers.unwrap_or(config.max_workers);

    let rt = tokio::runtime::Runtime::new().context("Failed to start tokio runtime")?;
    let outcome = rt.block_on(drive(&opts, workers))?;

    println!(
        "items: {}  spawned: {}  faults: {}",
        outcome.items,
        outcome.spawned,
        outcome.faults.len()
    );
    for fault in &outcome.faults {
        eprintln!("  fault: {fault}");
    }

    Ok(if outcome.is_ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Split `0..items` into `parts` contiguous ranges.
fn split_range(items: u64, parts: usize) -> Vec<std::ops::Range<u64>> {
    let parts = parts.max(1) as u64;
    let chunk = items.div_ceil(parts).max(1);
    (0..parts)
        .map(|i| (i * chunk).min(items)..((i + 1) * chunk).min(items))
        .collect()
}

async fn drive(opts: &RunOptions, workers: usize) -> Result<FanOutOutcome> {
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, cancelling run");
                cancel.cancel();
            }
        });
    }

    let hooks = FanOutHooks::new()
        .on_start(|| tracing::info!("fan-out started"))
        .on_item(|result| {
            if let Err(err) = result {
                tracing::debug!(error = %err, "worker failed");
            }
        });
    let fanout = FanOut::new(workers)
        .with_cancellation(cancel)
        .with_hooks(hooks);

    let delay = Duration::from_millis(opts.delay_ms);
    let fail_every = opts.fail_every;
    let work = move |n: u64| async move {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if fail_every > 0 && (n + 1) % fail_every == 0 {
            return Err(FlowError::callback(format!("item {n} failed")));
        }
        Ok(())
    };

    let outcome = if opts.partitions > 1 {
        let partitions = split_range(opts.items, opts.partitions)
            .into_iter()
            .map(|range| from_iter(range).iter())
            .collect::<Result<Vec<_>, _>>()?;
        fanout.run_partitions_detailed(partitions, work).await
    } else {
        fanout.run_detailed(&from_iter(0..opts.items), work).await
    };
    Ok(outcome)
}
