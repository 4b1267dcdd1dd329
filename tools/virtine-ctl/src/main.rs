mod config;
mod layout;
mod session;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "virtine-ctl",
    version,
    about = "Inspect the virtine coprocessor register map and run simulated cleaning sessions."
)]
struct Cli {
    /// JSON device configuration file; flags override its values.
    ///
    /// Environment variable: `VIRTINE_CONFIG`.
    #[arg(long, global = true, env = "VIRTINE_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Virtines cleaned per completion notification.
    ///
    /// Environment variable: `VIRTINE_BATCH_FACTOR`.
    #[arg(long, global = true, env = "VIRTINE_BATCH_FACTOR", value_name = "N")]
    batch_factor: Option<u64>,

    /// Size of the simulated virtine memory in bytes.
    #[arg(long, global = true, value_name = "BYTES")]
    memory_size: Option<u64>,

    /// Log filter (tracing-subscriber EnvFilter syntax); falls back to `RUST_LOG`, then `info`.
    ///
    /// Environment variable: `VIRTINE_LOG_LEVEL`.
    #[arg(long, global = true, env = "VIRTINE_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Print the register window layout.
    Layout {
        #[arg(long, action = clap::ArgAction::SetTrue)]
        json: bool,
    },
    /// Attach a simulated device and read its identity registers.
    Probe {
        #[arg(long, action = clap::ArgAction::SetTrue)]
        json: bool,
    },
    /// Give virtines to a simulated device, wait for them to be cleaned, and verify their memory.
    Run {
        /// Number of virtines to clean.
        #[arg(long, default_value_t = 100)]
        virtines: u64,

        /// Snapshot size in bytes.
        #[arg(long, value_name = "BYTES", default_value_t = 4096)]
        snapshot_size: u64,

        /// Per-round wait limit in milliseconds.
        #[arg(long, value_name = "MS", default_value_t = 10_000)]
        timeout_ms: u64,

        #[arg(long, action = clap::ArgAction::SetTrue)]
        json: bool,
    },
}

fn init_tracing(log_level: Option<&str>) {
    let filter = match log_level {
        Some(level) => EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info")),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    if let Cmd::Layout { json } = cli.command {
        return layout::print(json);
    }

    let overrides = config::Overrides {
        batch_factor: cli.batch_factor,
        memory_size: cli.memory_size,
    };
    let config = config::load(cli.config.as_deref(), &overrides).context("invalid configuration")?;
    tracing::debug!(?config, "configuration loaded");

    match cli.command {
        Cmd::Layout { .. } => Ok(()),
        Cmd::Probe { json } => {
            let summary = session::probe(&config)?;
            if json {
                return print_json(&summary);
            }
            println!("max virtines:  {}", summary.max_virtines);
            println!("batch factor:  {}", summary.batch_factor);
            println!("rq tail:       {}", summary.rq_tail);
            println!("cq tail:       {}", summary.cq_tail);
            Ok(())
        }
        Cmd::Run {
            virtines,
            snapshot_size,
            timeout_ms,
            json,
        } => {
            let opts = session::RunOptions {
                virtines,
                snapshot_size,
                timeout: Duration::from_millis(timeout_ms),
            };
            let summary = session::run(&config, &opts)?;
            if json {
                print_json(&summary)?;
            } else {
                println!(
                    "cleaned {} virtine(s) in {} round(s); {} notification(s) at batch factor {}",
                    summary.reclaimed, summary.rounds, summary.notifications, summary.batch_factor
                );
                println!(
                    "memory {}",
                    if summary.verified { "verified" } else { "MISMATCH" }
                );
            }
            if !summary.verified {
                anyhow::bail!("cleaned virtines do not match the snapshot");
            }
            Ok(())
        }
    }
}
