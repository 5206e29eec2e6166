//! CLI entry point for the rebalancer.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::{Parser, Subcommand};
use log::warn;

use rebal_rebalancer::config::Config;
use rebal_rebalancer::error::Error;
use rebal_rebalancer::workflow::{self, RunOptions};

#[derive(Parser)]
#[command(name = "rebalancer")]
#[command(about = "Rebalance an Interactive Brokers account to bucket targets")]
#[command(version)]
struct Cli {
    /// Path to config.toml
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Diff targets against live holdings and write the order list
    Plan {
        /// Path to targets.json
        targets: PathBuf,
        /// Path to identities.json
        identities: PathBuf,
        /// Where to write the order list (default: <logs>/orders.json)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Submit a previously written order list
    Execute {
        /// Path to orders.json
        orders: PathBuf,
        #[command(flatten)]
        flags: RunFlags,
    },

    /// Verify an execution report against broker state
    Status {
        /// Path to execution-<run>.json
        report: PathBuf,
    },

    /// Plan, execute and verify in one session
    Run {
        targets: PathBuf,
        identities: PathBuf,
        #[command(flatten)]
        flags: RunFlags,
    },

    /// Show current IBKR positions
    Positions,

    /// Check IBKR connection
    Check,
}

#[derive(clap::Args)]
struct RunFlags {
    /// Show plan without executing
    #[arg(long)]
    dry_run: bool,

    /// Skip confirmation prompt (for automation/cron)
    #[arg(long)]
    force: bool,

    /// Submit at most this many orders
    #[arg(long)]
    max_orders: Option<usize>,
}

impl From<RunFlags> for RunOptions {
    fn from(flags: RunFlags) -> Self {
        RunOptions {
            dry_run: flags.dry_run,
            force: flags.force,
            max_orders: flags.max_orders,
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading config: {e}");
            process::exit(1);
        }
    };

    // First Ctrl-C stops after the order in flight; a second one exits.
    let abort = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&abort);
    if let Err(e) = ctrlc::set_handler(move || {
        if flag.swap(true, Ordering::SeqCst) {
            process::exit(130);
        }
        eprintln!("\nStopping after the current order (Ctrl-C again to exit now)");
    }) {
        warn!("Could not install Ctrl-C handler: {e}");
    }

    let result = match cli.command {
        Command::Plan {
            targets,
            identities,
            output,
        } => workflow::plan(&config, &targets, &identities, output),
        Command::Execute { orders, flags } => {
            workflow::execute(&config, &orders, &flags.into(), &abort)
        }
        Command::Status { report } => workflow::status(&config, &report),
        Command::Run {
            targets,
            identities,
            flags,
        } => workflow::run(&config, &targets, &identities, &flags.into(), &abort),
        Command::Positions => workflow::show_positions(&config),
        Command::Check => workflow::check_connection(&config),
    };

    if let Err(e) = result {
        match &e {
            Error::Connection(_) => {
                eprintln!("Error: {e}");
                process::exit(2);
            }
            e if e.is_orders_file() => {
                eprintln!("Error: {e}");
                process::exit(3);
            }
            Error::Aborted(msg) => {
                eprintln!("Aborted: {msg}");
                process::exit(0);
            }
            _ => {
                eprintln!("Error: {e}");
                process::exit(1);
            }
        }
    }
}
