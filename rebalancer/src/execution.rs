//! Order execution workflow: submit a plan order by order through the gateway.
//!
//! Submission is strictly sequential. Each order gets a short acknowledgment
//! wait; silence is recorded as pending, not as a failure. Orders already sent
//! are never recalled, whatever happens later in the run.

use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use rebal::{Order, OrderStatus, OrderSubmission, SubmissionOutcome};
use rebal_broker::{Ack, BrokerError, ContractSpec, OrderTicket};
use serde::{Deserialize, Serialize};

use crate::audit::{self, AuditLog};
use crate::broker::BrokerGateway;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::policy::{self, SessionPolicy};

/// Knobs for one execution run.
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Truncate the plan to its first `n` orders.
    pub max_orders: Option<usize>,
    pub delay_between_orders: Duration,
    pub session_policy: SessionPolicy,
    pub domestic_currency: String,
    pub ack_timeout: Duration,
    /// Account to route orders to; `None` lets the gateway pick.
    pub account: Option<String>,
}

impl ExecuteOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_orders: config.execution.max_orders_per_run,
            delay_between_orders: Duration::from_millis(config.execution.delay_between_orders_ms),
            session_policy: config.execution.session_policy,
            domestic_currency: config.execution.domestic_currency.clone(),
            ack_timeout: Duration::from_millis(config.execution.ack_timeout_ms),
            account: None,
        }
    }
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            max_orders: None,
            delay_between_orders: Duration::ZERO,
            session_policy: SessionPolicy::Regular,
            domestic_currency: "USD".into(),
            ack_timeout: Duration::from_millis(500),
            account: None,
        }
    }
}

/// Why a run stopped before reaching the end of its plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    /// The operator asked to stop (Ctrl-C).
    Requested,
    /// The gateway session went away mid-run.
    ConnectionLost,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Requested => write!(f, "abort requested"),
            AbortReason::ConnectionLost => write!(f, "connection lost"),
        }
    }
}

/// Outcome of one execution run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Orders considered after `max_orders` truncation.
    pub total: usize,
    /// Sent and acknowledged or still pending.
    pub executed: usize,
    pub pending: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Why the run stopped early, if it did.
    pub aborted: Option<AbortReason>,
    pub submissions: Vec<OrderSubmission>,
}

impl ExecutionReport {
    fn tally(
        run_id: &str,
        started_at: DateTime<Utc>,
        aborted: Option<AbortReason>,
        submissions: Vec<OrderSubmission>,
    ) -> Self {
        let mut report = ExecutionReport {
            run_id: run_id.to_string(),
            started_at,
            finished_at: Utc::now(),
            total: submissions.len(),
            executed: 0,
            pending: 0,
            failed: 0,
            skipped: 0,
            aborted,
            submissions: Vec::new(),
        };
        for sub in &submissions {
            match sub.outcome {
                SubmissionOutcome::Acknowledged => report.executed += 1,
                SubmissionOutcome::Pending => {
                    report.executed += 1;
                    report.pending += 1;
                }
                SubmissionOutcome::Failed { .. } => report.failed += 1,
                SubmissionOutcome::Skipped => report.skipped += 1,
            }
        }
        report.submissions = submissions;
        report
    }

    /// Map an early stop to the error the command should exit with.
    ///
    /// A requested abort is an operator decision; a lost connection is a
    /// broker failure.
    pub fn check_completed(&self) -> Result<()> {
        match self.aborted {
            None => Ok(()),
            Some(AbortReason::Requested) => Err(Error::Aborted(AbortReason::Requested.to_string())),
            Some(AbortReason::ConnectionLost) => Err(Error::Connection(BrokerError::Closed)),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Report(format!("failed to encode execution report: {e}")))?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| Error::InputRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_json::from_str(&contents).map_err(|e| Error::InputParse {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

impl fmt::Display for ExecutionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "EXECUTION {}:", self.run_id)?;
        for (i, sub) in self.submissions.iter().enumerate() {
            let order = &sub.order;
            let id = sub
                .order_id
                .map_or_else(|| "-".to_string(), |id| id.to_string());
            let outcome = match &sub.outcome {
                SubmissionOutcome::Acknowledged => match sub.status {
                    Some(status) => format!("OK ({status})"),
                    None => "OK".to_string(),
                },
                SubmissionOutcome::Pending => "PENDING".to_string(),
                SubmissionOutcome::Failed { error } => format!("FAILED: {error}"),
                SubmissionOutcome::Skipped => "SKIPPED".to_string(),
            };
            writeln!(
                f,
                "  {:>3}  {:4} {:>8} {:8} id={:>6}  {}",
                i + 1,
                order.action,
                order.quantity,
                order.symbol,
                id,
                outcome
            )?;
        }
        write!(
            f,
            "{} total, {} executed ({} pending), {} failed, {} skipped",
            self.total, self.executed, self.pending, self.failed, self.skipped
        )?;
        if let Some(reason) = self.aborted {
            write!(f, " [aborted: {reason}]")?;
        }
        writeln!(f)
    }
}

fn skipped(order: &Order) -> OrderSubmission {
    OrderSubmission {
        order: order.clone(),
        order_id: None,
        submitted_at: None,
        status: None,
        outcome: SubmissionOutcome::Skipped,
    }
}

/// Submit one order and wait briefly for its acknowledgment.
///
/// The second value is true when the failure means the session is gone.
fn submit(
    gateway: &dyn BrokerGateway,
    order: &Order,
    opts: &ExecuteOptions,
) -> (OrderSubmission, bool) {
    let contract = ContractSpec::from_identity(&order.identity);
    let ticket = OrderTicket {
        action: order.action,
        quantity: order.quantity,
        tif: policy::time_in_force(&order.identity, opts.session_policy, &opts.domestic_currency),
        account: opts.account.clone(),
    };
    let submitted_at = Some(Utc::now());

    let order_id = match gateway.place_order(contract, ticket) {
        Ok(id) => id,
        Err(e) => {
            let lost = e.is_connection();
            let sub = OrderSubmission {
                order: order.clone(),
                order_id: None,
                submitted_at,
                status: None,
                outcome: SubmissionOutcome::Failed {
                    error: e.to_string(),
                },
            };
            return (sub, lost);
        }
    };

    let (status, outcome) = match gateway.await_ack(order_id, opts.ack_timeout) {
        Ack::Status(
            status @ (OrderStatus::Inactive | OrderStatus::Cancelled | OrderStatus::ApiCancelled),
        ) => (
            Some(status),
            SubmissionOutcome::Failed {
                error: format!("order {status} by broker"),
            },
        ),
        Ack::Status(status) => (Some(status), SubmissionOutcome::Acknowledged),
        Ack::Error(msg) => (
            None,
            SubmissionOutcome::Failed {
                error: format!("{}: {}", msg.code, msg.message),
            },
        ),
        Ack::Pending => (None, SubmissionOutcome::Pending),
    };

    let sub = OrderSubmission {
        order: order.clone(),
        order_id: Some(order_id),
        submitted_at,
        status,
        outcome,
    };
    (sub, false)
}

/// Submit `orders` in list order and report what happened to each.
///
/// `abort` is checked before every submission; once set, the remaining
/// orders are recorded as skipped. A lost connection also skips the rest.
pub fn execute(
    gateway: &dyn BrokerGateway,
    run_id: &str,
    orders: &[Order],
    opts: &ExecuteOptions,
    abort: &AtomicBool,
    mut audit: Option<&mut AuditLog>,
) -> ExecutionReport {
    let started_at = Utc::now();
    let limit = opts.max_orders.map_or(orders.len(), |n| n.min(orders.len()));
    if limit < orders.len() {
        info!("Limiting run {run_id} to {limit} of {} orders", orders.len());
    }

    let mut submissions = Vec::with_capacity(limit);
    let mut aborted: Option<AbortReason> = None;

    for (i, order) in orders[..limit].iter().enumerate() {
        if aborted.is_none() && i > 0 && !opts.delay_between_orders.is_zero() {
            thread::sleep(opts.delay_between_orders);
        }
        if aborted.is_none() && abort.load(Ordering::SeqCst) {
            warn!("Run {run_id} aborted before order {}", i + 1);
            aborted = Some(AbortReason::Requested);
        }
        if aborted.is_some() {
            submissions.push(skipped(order));
            continue;
        }

        let (sub, lost) = submit(gateway, order, opts);
        match &sub.outcome {
            SubmissionOutcome::Failed { error: reason } => {
                error!(
                    "[{}/{limit}] {} {} {} failed: {reason}",
                    i + 1,
                    order.action,
                    order.quantity,
                    order.symbol
                );
                if let Some(log) = audit.as_deref_mut() {
                    if let Err(e) = audit::log_order_failed(log, run_id, &sub, reason) {
                        warn!("Audit write failed: {e}");
                    }
                }
            }
            outcome => {
                info!(
                    "[{}/{limit}] {} {} {} -> id {} ({:?})",
                    i + 1,
                    order.action,
                    order.quantity,
                    order.symbol,
                    sub.order_id.unwrap_or_default(),
                    outcome
                );
                if let Some(log) = audit.as_deref_mut() {
                    if let Err(e) = audit::log_order_submitted(log, run_id, &sub) {
                        warn!("Audit write failed: {e}");
                    }
                }
            }
        }
        submissions.push(sub);

        if lost {
            error!("Connection lost during run {run_id}; skipping remaining orders");
            aborted = Some(AbortReason::ConnectionLost);
        }
    }

    let report = ExecutionReport::tally(run_id, started_at, aborted, submissions);
    if let Some(log) = audit {
        if let Err(e) = audit::log_run_completed(log, &report) {
            warn!("Audit write failed: {e}");
        }
    }
    info!(
        "Run {run_id}: {} total, {} executed, {} failed, {} skipped",
        report.total, report.executed, report.failed, report.skipped
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use rebal::{Action, SecurityId, SecurityIdentity};

    fn order(symbol: &str, action: Action, quantity: u64) -> Order {
        let (current, target) = match action {
            Action::Sell => (quantity as i64, 0),
            Action::Buy => (0, quantity),
        };
        Order {
            symbol: SecurityId::new(symbol),
            action,
            quantity,
            current_quantity: current,
            target_quantity: target,
            identity: SecurityIdentity::stock(symbol, "NASDAQ", 1),
        }
    }

    fn sub(outcome: SubmissionOutcome) -> OrderSubmission {
        OrderSubmission {
            order: order("AAPL", Action::Buy, 1),
            order_id: Some(1),
            submitted_at: None,
            status: None,
            outcome,
        }
    }

    #[test]
    fn tally_counts_pending_as_executed() {
        let report = ExecutionReport::tally(
            "r1",
            Utc::now(),
            None,
            vec![
                sub(SubmissionOutcome::Acknowledged),
                sub(SubmissionOutcome::Pending),
                sub(SubmissionOutcome::Failed {
                    error: "201: rejected".into(),
                }),
                sub(SubmissionOutcome::Skipped),
            ],
        );
        assert_eq!(report.total, 4);
        assert_eq!(report.executed, 2);
        assert_eq!(report.pending, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.skipped, 1);
    }

    #[test]
    fn report_display_lists_outcomes() {
        let report = ExecutionReport::tally(
            "r2",
            Utc::now(),
            Some(AbortReason::Requested),
            vec![sub(SubmissionOutcome::Pending), sub(SubmissionOutcome::Skipped)],
        );
        let text = report.to_string();
        assert!(text.contains("PENDING"));
        assert!(text.contains("SKIPPED"));
        assert!(text.contains("aborted: abort requested"));
    }

    #[test]
    fn report_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("execution.json");
        let report = ExecutionReport::tally(
            "r3",
            Utc::now(),
            Some(AbortReason::ConnectionLost),
            vec![sub(SubmissionOutcome::Acknowledged)],
        );
        report.save(&path).unwrap();
        let json = std::fs::read_to_string(&path).unwrap();
        assert!(json.contains("\"connection_lost\""));
        assert_eq!(ExecutionReport::load(&path).unwrap(), report);
    }

    #[test]
    fn early_stop_maps_to_exit_error() {
        let done = ExecutionReport::tally("r4", Utc::now(), None, vec![]);
        assert!(done.check_completed().is_ok());

        let requested = Some(AbortReason::Requested);
        let stopped = ExecutionReport::tally("r5", Utc::now(), requested, vec![]);
        assert!(matches!(stopped.check_completed(), Err(Error::Aborted(_))));

        let lost = Some(AbortReason::ConnectionLost);
        let lost = ExecutionReport::tally("r6", Utc::now(), lost, vec![]);
        assert!(matches!(
            lost.check_completed(),
            Err(Error::Connection(BrokerError::Closed))
        ));
    }
}
