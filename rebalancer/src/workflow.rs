//! Command workflows: plan → confirm → execute → status check.
//!
//! Each `*_with` function takes an already-open gateway so it can be driven
//! by tests; the plain variants open the IBKR session from the config.

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use log::{info, warn};
use rebal::{BrokerPosition, LivePosition, VerificationReport};
use serde::Serialize;

use crate::audit::{self, AuditLog};
use crate::broker::{self, BrokerGateway};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::execution::{self, ExecuteOptions, ExecutionReport};
use crate::input::{self, IdentityDocument, TargetDocument};
use crate::orders_file::OrderList;
use crate::registry::RunRegistry;
use crate::status_check::{self, StatusOptions};

/// Options shared by `execute` and `run`.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub dry_run: bool,
    pub force: bool,
    /// Overrides `execution.max_orders_per_run`.
    pub max_orders: Option<usize>,
}

/// Build an order list from targets, identities and live holdings.
pub fn build_plan(
    targets: &TargetDocument,
    identities: &IdentityDocument,
    live: &[LivePosition],
    account: Option<String>,
) -> Result<OrderList> {
    let buckets = input::to_buckets(targets, identities);
    let agg = rebal::aggregate(&buckets);
    for u in &agg.unresolved {
        warn!(
            "Skipping {} ({} shares) in bucket '{}': no resolved identity",
            u.ticker, u.target_quantity, u.bucket
        );
    }
    info!(
        "Aggregated {} holdings into {} securities ({} shares)",
        agg.aggregated_holdings,
        agg.targets.len(),
        agg.total_quantity()
    );

    let orders = rebal::generate(&agg.targets, live, &agg.identities)?;
    Ok(OrderList::new(orders, account, agg.unresolved))
}

/// Fetch live holdings through `gateway` and build the plan.
pub fn plan_with(
    gateway: &dyn BrokerGateway,
    config: &Config,
    targets: &TargetDocument,
    identities: &IdentityDocument,
    audit: &mut AuditLog,
) -> Result<OrderList> {
    let positions = gateway.positions(Duration::from_secs(config.connection.timeout_secs))?;
    let live: Vec<LivePosition> = positions.iter().map(BrokerPosition::to_live).collect();
    let list = build_plan(targets, identities, &live, gateway.account())?;
    audit::log_plan(audit, &list)?;
    Ok(list)
}

/// Submit a plan after confirmation.
///
/// Returns `None` when nothing was sent: empty plan, dry run, or the prompt
/// was declined.
pub fn execute_with(
    gateway: &dyn BrokerGateway,
    config: &Config,
    list: &OrderList,
    opts: &RunOptions,
    registry: &mut RunRegistry,
    abort: &AtomicBool,
    audit: &mut AuditLog,
) -> Result<Option<ExecutionReport>> {
    let account = gateway.account();
    if let (Some(planned), Some(live)) = (&list.metadata.account, &account) {
        if planned != live {
            return Err(Error::OrdersInvalid(format!(
                "plan was generated for account {planned} but the gateway is logged into {live}"
            )));
        }
    }

    if list.orders.is_empty() {
        println!("\nNo rebalancing needed: holdings match targets.");
        audit.log_simple("no_rebalance_needed")?;
        return Ok(None);
    }

    display_plan(list);

    if opts.dry_run {
        println!("\n[DRY RUN] No orders submitted.");
        return Ok(None);
    }

    if !opts.force {
        let confirmed = dialoguer::Confirm::new()
            .with_prompt("Execute?")
            .default(false)
            .interact()
            .map_err(|e| Error::Prompt(e.to_string()))?;

        if !confirmed {
            println!("Aborted.");
            audit.log("user_confirmed", serde_json::json!({"approved": false}))?;
            return Ok(None);
        }
        audit.log("user_confirmed", serde_json::json!({"approved": true}))?;
    }

    let run_id = registry.begin();
    audit::log_run_started(audit, &run_id, "execute", account.as_deref())?;

    let mut exec_opts = ExecuteOptions::from_config(config);
    exec_opts.account = account;
    if opts.max_orders.is_some() {
        exec_opts.max_orders = opts.max_orders;
    }

    let report = execution::execute(gateway, &run_id, &list.orders, &exec_opts, abort, Some(audit));
    print!("\n{report}");
    registry.record_execution(&run_id, report.clone())?;
    Ok(Some(report))
}

/// Observe the broker until the report's orders settle and log the result.
pub fn status_with(
    gateway: &dyn BrokerGateway,
    config: &Config,
    execution: &ExecutionReport,
    audit: &mut AuditLog,
) -> Result<VerificationReport> {
    let opts = StatusOptions::from_config(config);
    info!(
        "Checking status of run {} for up to {:?}...",
        execution.run_id, opts.window
    );
    let report = status_check::check_status(gateway, &execution.submissions, &opts)?;
    audit::log_verification(audit, &execution.run_id, &report)?;
    Ok(report)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| Error::Report(format!("failed to encode {}: {e}", path.display())))?;
    std::fs::write(path, json)?;
    Ok(())
}

fn execution_path(config: &Config, run_id: &str) -> PathBuf {
    config.output_dir().join(format!("execution-{run_id}.json"))
}

fn verification_path(config: &Config, run_id: &str) -> PathBuf {
    config.output_dir().join(format!("verification-{run_id}.json"))
}

fn finish_verification(
    config: &Config,
    run_id: &str,
    report: &VerificationReport,
) -> Result<PathBuf> {
    print!("\n{report}");
    let path = verification_path(config, run_id);
    write_json(&path, report)?;
    println!("Verification report written to {}", path.display());
    Ok(path)
}

// === Commands ===

/// `plan`: write the order list without sending anything.
pub fn plan(
    config: &Config,
    targets: &Path,
    identities: &Path,
    output: Option<PathBuf>,
) -> Result<()> {
    let targets = TargetDocument::load(targets)?;
    let identities = IdentityDocument::load(identities)?;
    let conn = broker::connect_ibkr(config)?;
    let mut audit = AuditLog::open(&config.audit_path())?;

    let list = plan_with(&conn, config, &targets, &identities, &mut audit)?;
    display_plan(&list);

    let path = output.unwrap_or_else(|| config.output_dir().join("orders.json"));
    list.save(&path)?;
    println!("\nOrder list written to {}", path.display());
    Ok(())
}

/// `execute`: submit a previously written order list.
///
/// `abort` is the operator's stop flag, normally set from a Ctrl-C handler.
pub fn execute(
    config: &Config,
    orders: &Path,
    opts: &RunOptions,
    abort: &AtomicBool,
) -> Result<()> {
    let list = OrderList::load(orders)?;
    let conn = broker::connect_ibkr(config)?;
    let mut audit = AuditLog::open(&config.audit_path())?;
    let mut registry = RunRegistry::new(config.registry.max_runs);

    let Some(report) =
        execute_with(&conn, config, &list, opts, &mut registry, abort, &mut audit)?
    else {
        return Ok(());
    };
    registry.complete(&report.run_id)?;

    let path = execution_path(config, &report.run_id);
    report.save(&path)?;
    println!("Execution report written to {}", path.display());
    report.check_completed()
}

/// `status`: verify an execution report against the broker.
pub fn status(config: &Config, report: &Path) -> Result<()> {
    let execution = ExecutionReport::load(report)?;
    let conn = broker::connect_ibkr(config)?;
    let mut audit = AuditLog::open(&config.audit_path())?;

    let verification = status_with(&conn, config, &execution, &mut audit)?;
    finish_verification(config, &execution.run_id, &verification)?;
    Ok(())
}

/// `run`: plan, execute and verify in one session.
pub fn run(
    config: &Config,
    targets: &Path,
    identities: &Path,
    opts: &RunOptions,
    abort: &AtomicBool,
) -> Result<()> {
    let targets = TargetDocument::load(targets)?;
    let identities = IdentityDocument::load(identities)?;
    let conn = broker::connect_ibkr(config)?;
    let mut audit = AuditLog::open(&config.audit_path())?;
    let mut registry = RunRegistry::new(config.registry.max_runs);

    let list = plan_with(&conn, config, &targets, &identities, &mut audit)?;
    list.save(&config.output_dir().join("orders.json"))?;

    let Some(report) =
        execute_with(&conn, config, &list, opts, &mut registry, abort, &mut audit)?
    else {
        return Ok(());
    };
    report.save(&execution_path(config, &report.run_id))?;

    let verification = status_with(&conn, config, &report, &mut audit)?;
    finish_verification(config, &report.run_id, &verification)?;
    registry.record_verification(&report.run_id, verification)?;
    registry.complete(&report.run_id)?;
    report.check_completed()
}

/// `positions`: print live holdings.
pub fn show_positions(config: &Config) -> Result<()> {
    let conn = broker::connect_ibkr(config)?;
    let positions = conn.positions(Duration::from_secs(config.connection.timeout_secs))?;
    if let Some(account) = conn.account() {
        println!("Account {account}\n");
    }
    display_positions(&positions);
    Ok(())
}

/// `check`: confirm the gateway is reachable and logged in.
pub fn check_connection(config: &Config) -> Result<()> {
    print!("Connecting to IB Gateway at {}... ", config.address());
    let conn = broker::connect_ibkr(config)?;
    println!("OK");
    match conn.account() {
        Some(account) => {
            conn.subscribe_account_updates(&account)?;
            println!("Account {account}");
        }
        None => println!("No managed account reported"),
    }
    Ok(())
}

// === Display ===

fn display_positions(positions: &[BrokerPosition]) {
    if positions.is_empty() {
        println!("No positions.");
        return;
    }
    println!("POSITIONS:");
    for p in positions {
        println!(
            "  {:8} {:>8} @ {:>10.2} avg  {}",
            p.symbol, p.quantity, p.avg_cost, p.identity.currency
        );
    }
}

fn display_plan(list: &OrderList) {
    println!("\nREBALANCE ORDERS:");
    println!(
        "  {:>3}  {:6} {:8} {:>8} {:>10} {:>10}",
        "#", "Action", "Symbol", "Qty", "Current", "Target"
    );
    for (i, order) in list.orders.iter().enumerate() {
        println!(
            "  {:>3}  {:6} {:8} {:>8} {:>10} {:>10}",
            i + 1,
            order.action.to_string(),
            order.symbol,
            order.quantity,
            order.current_quantity,
            order.target_quantity,
        );
    }
    println!("\n  {}", list.metadata.summary);
    if !list.metadata.unresolved.is_empty() {
        println!("  Skipped (unresolved identity):");
        for u in &list.metadata.unresolved {
            println!("    {:8} {:>8}  [{}]", u.ticker, u.target_quantity, u.bucket);
        }
    }
}
