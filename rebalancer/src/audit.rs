//! JSONL audit trail logging.
//!
//! Each rebalancer run appends events to an audit.jsonl file,
//! one JSON object per line.

use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use rebal::{OrderSubmission, VerificationReport};
use serde::Serialize;

use crate::error::Result;
use crate::execution::ExecutionReport;
use crate::orders_file::OrderList;

/// An audit event written to the JSONL trail.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub event: &'static str,
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub data: serde_json::Value,
}

/// Append-only audit logger.
pub struct AuditLog {
    writer: BufWriter<std::fs::File>,
}

impl AuditLog {
    /// Open (or create) the audit log file for appending.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    /// Log an event with arbitrary JSON data.
    pub fn log(&mut self, event: &'static str, data: serde_json::Value) -> Result<()> {
        let entry = AuditEvent {
            event,
            ts: Utc::now(),
            data,
        };
        let json = serde_json::to_string(&entry)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        writeln!(self.writer, "{json}")?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn log_simple(&mut self, event: &'static str) -> Result<()> {
        self.log(event, serde_json::json!({}))
    }
}

pub fn log_run_started(
    audit: &mut AuditLog,
    run_id: &str,
    command: &str,
    account: Option<&str>,
) -> Result<()> {
    audit.log(
        "run_started",
        serde_json::json!({
            "run_id": run_id,
            "command": command,
            "account": account,
        }),
    )
}

/// Log a generated plan with its header counts.
pub fn log_plan(audit: &mut AuditLog, list: &OrderList) -> Result<()> {
    let orders: Vec<_> = list
        .orders
        .iter()
        .map(|o| {
            serde_json::json!({
                "symbol": o.symbol.as_str(),
                "action": o.action.to_string(),
                "quantity": o.quantity,
                "current": o.current_quantity,
                "target": o.target_quantity,
            })
        })
        .collect();
    let unresolved: Vec<_> = list.metadata.unresolved.iter().map(|u| &u.ticker).collect();

    audit.log(
        "plan_generated",
        serde_json::json!({
            "summary": list.metadata.summary,
            "orders": orders,
            "unresolved": unresolved,
        }),
    )
}

pub fn log_order_submitted(
    audit: &mut AuditLog,
    run_id: &str,
    sub: &OrderSubmission,
) -> Result<()> {
    audit.log(
        "order_submitted",
        serde_json::json!({
            "run_id": run_id,
            "symbol": sub.order.symbol.as_str(),
            "action": sub.order.action.to_string(),
            "quantity": sub.order.quantity,
            "order_id": sub.order_id,
            "status": sub.status.map(|s| s.as_str()),
            "outcome": sub.outcome,
        }),
    )
}

pub fn log_order_failed(
    audit: &mut AuditLog,
    run_id: &str,
    sub: &OrderSubmission,
    error: &str,
) -> Result<()> {
    audit.log(
        "order_failed",
        serde_json::json!({
            "run_id": run_id,
            "symbol": sub.order.symbol.as_str(),
            "action": sub.order.action.to_string(),
            "quantity": sub.order.quantity,
            "order_id": sub.order_id,
            "error": error,
        }),
    )
}

pub fn log_run_completed(audit: &mut AuditLog, report: &ExecutionReport) -> Result<()> {
    audit.log(
        "run_completed",
        serde_json::json!({
            "run_id": report.run_id,
            "total": report.total,
            "executed": report.executed,
            "pending": report.pending,
            "failed": report.failed,
            "skipped": report.skipped,
            "aborted": report.aborted,
        }),
    )
}

/// Log the verification counts and every order reported missing.
pub fn log_verification(
    audit: &mut AuditLog,
    run_id: &str,
    report: &VerificationReport,
) -> Result<()> {
    let missing: Vec<_> = report
        .missing_records()
        .map(|r| {
            serde_json::json!({
                "symbol": r.symbol.as_str(),
                "action": r.action.to_string(),
                "order_id": r.order_id,
                "diagnosis": r.diagnosis.as_ref().map(|d| d.to_string()),
            })
        })
        .collect();

    audit.log(
        "verification",
        serde_json::json!({
            "run_id": run_id,
            "total": report.total,
            "matched": report.matched,
            "filled": report.filled,
            "partially_filled": report.partially_filled,
            "rejected_or_cancelled": report.rejected_or_cancelled,
            "success_rate": report.success_rate,
            "missing": missing,
        }),
    )
}
