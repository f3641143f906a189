//! # EVO RT Probe
//!
//! Starts a real-time worker at the given period, waits for ENTER, Ctrl-C
//! or `--cycles N`, stops it and prints the run report.

use clap::{CommandFactory, Parser, ValueEnum};
use evo_rt_common::config::{ConfigError, ConfigLoader, LogLevel};
use evo_rt_common::kernel::RtKernel;
use evo_rt_probe::kernel::SimKernel;
use evo_rt_probe::timer::period_ns_from_secs;
use evo_rt_probe::{Controller, HarnessConfig};
use std::error::Error;
use std::io::BufRead;
use std::path::PathBuf;
use std::process;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// How often the main thread checks the cycle target.
const PROGRESS_POLL: Duration = Duration::from_millis(10);

/// EVO RT Probe — real-time worker lifecycle and jitter check
#[derive(Parser, Debug)]
#[command(name = "evo_rt_probe")]
#[command(author = "RTS007")]
#[command(version)]
#[command(about = "Promote a worker to hard real-time, measure its period, tear it down")]
#[command(allow_negative_numbers = true)]
struct Args {
    /// Loop period in seconds (e.g. 0.001 for 1 ms).
    #[arg(value_name = "PERIOD_SECS")]
    period: f64,

    /// Probe configuration TOML.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Use the simulation kernel instead of the Linux scheduler.
    #[arg(long)]
    simulate: bool,

    /// Stop after N loop iterations instead of waiting for ENTER.
    #[arg(long, value_name = "N")]
    cycles: Option<u64>,

    /// Report format printed after stop.
    #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
    report: ReportFormat,

    /// Enable verbose logging (DEBUG level, prints every period).
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ReportFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy)]
enum StopReason {
    Enter,
    Eof,
    Signal,
    Cycles,
}

fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            process::exit(if e.use_stderr() { 1 } else { 0 });
        }
    };

    if let Err(e) = period_ns_from_secs(args.period) {
        eprintln!("{e}");
        eprintln!("{}", Args::command().render_usage());
        process::exit(1);
    }

    let config = load_config(&args);
    let level = config
        .as_ref()
        .map_or(LogLevel::Info, |c| c.shared.log_level);
    setup_tracing(&args, level);

    info!("EVO RT Probe v{} starting...", env!("CARGO_PKG_VERSION"));

    let result = config
        .map_err(|e| Box::new(e) as Box<dyn Error>)
        .and_then(|config| run(&args, config));
    if let Err(e) = result {
        error!("FATAL: {e}");
        process::exit(1);
    }

    info!("EVO RT Probe shutdown complete");
}

fn load_config(args: &Args) -> Result<HarnessConfig, ConfigError> {
    let config = match &args.config {
        Some(path) => HarnessConfig::load(path)?,
        None => HarnessConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

/// Pick the kernel backend and run the probe.
#[cfg(all(target_os = "linux", feature = "rt"))]
fn run(args: &Args, config: HarnessConfig) -> Result<(), Box<dyn Error>> {
    if args.simulate {
        probe(SimKernel::new(), config, args)
    } else {
        probe(evo_rt_probe::PosixKernel::new(), config, args)
    }
}

#[cfg(not(all(target_os = "linux", feature = "rt")))]
fn run(args: &Args, config: HarnessConfig) -> Result<(), Box<dyn Error>> {
    if !args.simulate {
        warn!("Built without the `rt` feature, using the simulation kernel");
    }
    probe(SimKernel::new(), config, args)
}

fn probe<K: RtKernel>(
    kernel: K,
    config: HarnessConfig,
    args: &Args,
) -> Result<(), Box<dyn Error>> {
    info!(
        kernel = kernel.name(),
        service = %config.shared.service_name,
        "Using {} kernel",
        kernel.name()
    );

    let mut controller = Controller::new(kernel, config)?;
    controller.start(args.period)?;

    let (tx, rx) = mpsc::channel();
    let signal_tx = tx.clone();
    ctrlc::set_handler(move || {
        let _ = signal_tx.send(StopReason::Signal);
    })?;

    if args.cycles.is_none() {
        info!("Press ENTER to stop");
        thread::spawn(move || {
            let mut line = String::new();
            let reason = match std::io::stdin().lock().read_line(&mut line) {
                Ok(n) if n > 0 => StopReason::Enter,
                _ => StopReason::Eof,
            };
            let _ = tx.send(reason);
        });
    }

    let reason = wait_for_stop(&controller, &rx, args.cycles);
    info!(?reason, cycles = controller.cycle_count(), "Stop requested");

    let report = controller.stop()?;
    report.log();
    match args.report {
        ReportFormat::Text => print!("{report}"),
        ReportFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }
    if report.within_budget() == Some(false) {
        warn!("Maximum jitter exceeded the configured budget");
    }
    Ok(())
}

fn wait_for_stop<K: RtKernel>(
    controller: &Controller<K>,
    rx: &mpsc::Receiver<StopReason>,
    target: Option<u64>,
) -> StopReason {
    loop {
        if target.is_some_and(|n| controller.cycle_count() >= n) {
            return StopReason::Cycles;
        }
        match rx.recv_timeout(PROGRESS_POLL) {
            Ok(reason) => return reason,
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                if target.is_none() {
                    return StopReason::Signal;
                }
                thread::sleep(PROGRESS_POLL);
            }
        }
    }
}

/// Setup tracing subscriber based on CLI arguments and the configured level.
///
/// Logs go to stderr; stdout carries only the run report.
fn setup_tracing(args: &Args, level: LogLevel) {
    let directive = if args.verbose {
        LogLevel::Debug.as_directive()
    } else {
        level.as_directive()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .compact()
            .init();
    }
}
