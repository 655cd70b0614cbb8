//! locksim - replay a transaction script under strict two-phase locking
//!
//! Usage:
//!   locksim schedule.txt
//!   locksim schedule.txt --victim highest-id --format json

use anyhow::Context;
use clap::Parser;
use locksim_core::config::{LogFormat, SimulatorConfig};
use locksim_core::logging::init_tracing;
use locksim_core::transaction::VictimPolicy;
use locksim_core::{load_script, Scheduler};
use std::path::PathBuf;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "locksim")]
#[command(about = "Strict two-phase locking scheduler simulator", long_about = None)]
#[command(version)]
struct Cli {
    /// Script file, one `id:COMMAND:variable` per line
    script: PathBuf,

    /// Deadlock victim policy: lowest-id, highest-id, oldest-request
    #[arg(long)]
    victim: Option<String>,

    /// Output format: text, json
    #[arg(long, default_value = "text")]
    format: String,

    /// Log level: trace, debug, info, warn, error
    #[arg(long)]
    log_level: Option<String>,

    /// Log layout: full, compact, pretty
    #[arg(long)]
    log_format: Option<String>,

    /// Exit successfully even if locks or waits remain at the end
    #[arg(long)]
    allow_dirty: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if !matches!(cli.format.as_str(), "text" | "json") {
        anyhow::bail!("unknown output format: {}", cli.format);
    }

    let mut config = SimulatorConfig::from_env()?;
    if let Some(victim) = &cli.victim {
        config.scheduler.victim_policy = victim.parse::<VictimPolicy>()?;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if let Some(format) = &cli.log_format {
        config.logging.format = format.parse::<LogFormat>()?;
    }
    config.validate()?;

    init_tracing(&config.logging)?;

    let operations = load_script(&cli.script)
        .with_context(|| format!("failed to load script {}", cli.script.display()))?;
    tracing::info!(
        script = %cli.script.display(),
        operations = operations.len(),
        victim_policy = config.scheduler.victim_policy.as_str(),
        "executing script"
    );

    let report = Scheduler::with_config(operations, config.scheduler).run_to_completion();

    if cli.format == "json" {
        println!("{}", report.to_json()?);
    } else {
        println!("{}", report);
    }

    if !cli.allow_dirty {
        report.ensure_clean()?;
    }

    Ok(())
}
