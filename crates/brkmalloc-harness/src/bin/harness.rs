//! CLI entry point for the brkmalloc harness.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use brkmalloc_harness::replay::{ReplayReport, replay};
use brkmalloc_harness::storm::{self, StormConfig};
use brkmalloc_harness::{HarnessError, LogEmitter, Trace};
use clap::{Parser, Subcommand};

/// Replay allocator traces and fragmentation storms against the core heap.
#[derive(Debug, Parser)]
#[command(name = "harness")]
#[command(about = "brkmalloc trace replay and storm harness")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Replay a JSON operation trace, validating the heap after every step.
    Replay {
        /// Trace file (JSON).
        #[arg(long)]
        trace: PathBuf,
        /// Write the JSON report here instead of stdout.
        #[arg(long)]
        report: Option<PathBuf>,
        /// Append allocator lifecycle records as JSONL.
        #[arg(long)]
        log: Option<PathBuf>,
    },
    /// Generate and replay a deterministic churn workload.
    Storm {
        #[arg(long, default_value_t = 0x5EED)]
        seed: u64,
        /// Number of generated operations.
        #[arg(long, default_value_t = 10_000)]
        ops: usize,
        /// Heap capacity in bytes.
        #[arg(long, default_value_t = 16 << 20)]
        capacity: usize,
        /// Distinct live slots.
        #[arg(long, default_value_t = 64)]
        slots: usize,
        /// Minimum bytes requested from the region per growth.
        #[arg(long)]
        growth: Option<usize>,
        /// Write the generated trace here so it can be replayed later.
        #[arg(long)]
        save_trace: Option<PathBuf>,
        #[arg(long)]
        report: Option<PathBuf>,
        #[arg(long)]
        log: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli.command) {
        Ok(report) if report.passed => ExitCode::SUCCESS,
        Ok(report) => {
            for failure in &report.failures {
                eprintln!(
                    "step {} ({}): {:?}: {}",
                    failure.step, failure.symbol, failure.kind, failure.message
                );
            }
            eprintln!("FAIL: {} failure(s) in {}", report.failures.len(), report.name);
            ExitCode::FAILURE
        }
        Err(err) => {
            eprintln!("harness: {err}");
            ExitCode::from(2)
        }
    }
}

fn run(command: Command) -> Result<ReplayReport, HarnessError> {
    match command {
        Command::Replay { trace, report, log } => {
            eprintln!("Replaying {}", trace.display());
            let (parsed, sha) = Trace::load(&trace)?;
            let mut emitter = open_log(log.as_deref(), &parsed.name)?;
            let result = replay(&parsed, &sha, emitter.as_mut())?;
            write_report(&result, report.as_deref())?;
            Ok(result)
        }
        Command::Storm {
            seed,
            ops,
            capacity,
            slots,
            growth,
            save_trace,
            report,
            log,
        } => {
            let config = StormConfig {
                seed,
                ops,
                capacity,
                slots,
                growth_increment: growth,
                ..StormConfig::default()
            };
            let generated = storm::generate(&config)?;
            eprintln!("Storm {} with {} ops", generated.name, generated.ops.len());
            if let Some(path) = save_trace.as_deref() {
                let json = serde_json::to_vec_pretty(&generated)?;
                write_file(path, &json)?;
            }
            let sha = generated.digest()?;
            let mut emitter = open_log(log.as_deref(), &generated.name)?;
            let result = replay(&generated, &sha, emitter.as_mut())?;
            write_report(&result, report.as_deref())?;
            Ok(result)
        }
    }
}

fn open_log(path: Option<&Path>, run_id: &str) -> Result<Option<LogEmitter>, HarnessError> {
    path.map(|path| {
        LogEmitter::to_file(path, run_id).map_err(|source| HarnessError::Write {
            path: path.to_path_buf(),
            source,
        })
    })
    .transpose()
}

fn write_report(report: &ReplayReport, path: Option<&Path>) -> Result<(), HarnessError> {
    let json = serde_json::to_string_pretty(report)?;
    match path {
        Some(path) => {
            write_file(path, json.as_bytes())?;
            eprintln!("Report written to {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<(), HarnessError> {
    std::fs::write(path, bytes).map_err(|source| HarnessError::Write {
        path: path.to_path_buf(),
        source,
    })
}
