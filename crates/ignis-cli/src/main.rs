//! # Ignis CLI
//!
//! Command-line tools for ignition delay post-processing.

mod logging;

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use ignis_core::{Quantity, Unit};
use ignis_delay::{extract_ignition_delay, resolve_target, IgnitionCriterion, IgnitionDelayResult};
use ignis_sim::TrajectoryTable;
use ignis_wall::{VelocityProfile, VolumeHistory};
use logging::{init_logging, LogFormat, LogLevel};
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Parser)]
#[command(name = "ignis")]
#[command(author = "Yatrogenesis")]
#[command(version = "0.1.0")]
#[command(about = "Shock tube and RCM ignition delay tools", long_about = None)]
struct Cli {
    /// Diagnostic verbosity (RUST_LOG takes precedence)
    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Warn)]
    log_level: LogLevel,

    /// Diagnostic output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Compact)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract the ignition delay from a stored trajectory
    Analyze {
        /// Trajectory file (.jsonl)
        trajectory: PathBuf,
        /// "pressure", "temperature" or a species name
        #[arg(short, long, default_value = "pressure")]
        target: String,
        /// "max", "d/dt max" or "1/2 max"
        #[arg(short, long, default_value = "d/dt max")]
        criterion: String,
        /// End of compression (s), for rapid compression machine cases
        #[arg(long)]
        compression_time: Option<f64>,
    },

    /// Show the wall velocity derived from a volume history
    Profile {
        /// JSON file with `time` (s) and `volume` arrays
        history: PathBuf,
        /// Evaluate the velocity at these times (s)
        #[arg(long)]
        at: Vec<f64>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level, cli.log_format);

    match cli.command {
        Commands::Analyze {
            trajectory,
            target,
            criterion,
            compression_time,
        } => analyze(&trajectory, &target, &criterion, compression_time),

        Commands::Profile { history, at } => profile(&history, &at),
    }
}

fn analyze(path: &Path, target: &str, criterion: &str, compression_time: Option<f64>) -> anyhow::Result<()> {
    let criterion: IgnitionCriterion = criterion.parse()?;
    let table = TrajectoryTable::open(path).with_context(|| format!("reading {}", path.display()))?;
    debug!(rows = table.len(), species = table.header.n_species, "trajectory loaded");

    println!("{} {}", "Case:".green().bold(), table.header.case_id);

    let resolution = resolve_target(target, criterion, table.species());
    for diagnostic in &resolution.diagnostics {
        println!("{} {}", "warning:".yellow().bold(), diagnostic);
    }
    println!(
        "  Target: {} ({})",
        resolution.target.to_string().cyan(),
        resolution.criterion
    );
    println!("  Rows:   {}", table.len());

    let signal = table.target_column(resolution.target)?;
    let result = extract_ignition_delay(
        &table.time.to_vec(),
        &signal.to_vec(),
        resolution.criterion,
        compression_time,
    )?;
    print_delays(&result);
    Ok(())
}

fn print_delays(result: &IgnitionDelayResult) {
    if result.overall == 0.0 {
        println!("{}", "No ignition detected".yellow());
        return;
    }
    println!("{} {:.6}", "Ignition delay:".green().bold(), milliseconds(result.overall));
    if let Some(first) = result.first_stage {
        println!("{} {:.6}", "First stage:   ".green().bold(), milliseconds(first));
    }
}

fn milliseconds(seconds: f64) -> Quantity {
    let q = Quantity::seconds(seconds);
    q.to(Unit::Millisecond).unwrap_or(q)
}

fn profile(path: &Path, at: &[f64]) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let history: VolumeHistory =
        serde_json::from_str(&content).with_context(|| format!("parsing volume history {}", path.display()))?;
    let profile = VelocityProfile::from_volume_history(&history)?;
    let normalized = history.normalized();

    let (start, end) = profile.time_range();
    println!("{} {}", "Volume history:".green().bold(), path.display());
    println!("  Samples:  {}", history.len());
    println!("  Range:    {:.4} - {:.4} ms", start * 1e3, end * 1e3);
    println!("  Max step: {:.6e} s", history.min_time_step());
    println!();
    println!("  {:>12}  {:>10}  {:>14}", "t [ms]", "V/V0", "dV/dt [1/s]");
    for ((t, v), u) in profile.times().iter().zip(normalized.volume()).zip(profile.velocities()) {
        println!("  {:>12.4}  {:>10.6}  {:>14.6e}", t * 1e3, v, u);
    }

    if !at.is_empty() {
        println!();
        for &t in at {
            println!("  v({} ms) = {:.6e}", format!("{:.4}", t * 1e3).cyan(), profile.evaluate(t));
        }
    }
    Ok(())
}
