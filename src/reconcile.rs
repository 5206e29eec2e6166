//! Submitted-order verification against observed broker state.
//!
//! [`reconcile`] never drives order transitions; it reads whatever the broker
//! reported within the observation window and explains the gaps.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;

use crate::order::Order;
use crate::snapshot::{BrokerMessage, BrokerOrderState, BrokerSnapshot};
use crate::status::{Lifecycle, OrderStatus};
use crate::types::{Action, Quantity, SecurityId};

/// How the execution workflow left an order.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", rename_all = "snake_case"))]
pub enum SubmissionOutcome {
    /// The gateway acknowledged the order within the wait window.
    Acknowledged,
    /// Sent, but no callback arrived within the wait window.
    Pending,
    /// The broker errored on this order or the request could not be sent.
    Failed { error: String },
    /// Never sent (run aborted before reaching it).
    Skipped,
}

/// An order plus what happened when it was sent.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OrderSubmission {
    pub order: Order,
    pub order_id: Option<i32>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub status: Option<OrderStatus>,
    pub outcome: SubmissionOutcome,
}

impl OrderSubmission {
    /// Whether the order reached the gateway and can be looked up.
    pub fn was_sent(&self) -> bool {
        self.order_id.is_some() && self.outcome != SubmissionOutcome::Skipped
    }
}

/// Known reasons an order goes missing or dies at the broker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum FailureCause {
    AccountRestriction,
    UnresolvableContract,
    InsufficientLiquidity,
    CancelledOrExpired,
    Unknown,
}

struct KnownCause {
    cause: FailureCause,
    codes: &'static [i32],
    needles: &'static [&'static str],
}

// Checked in order; the first row matching a message wins.
const KNOWN_CAUSES: &[KnownCause] = &[
    KnownCause {
        cause: FailureCause::UnresolvableContract,
        codes: &[200],
        needles: &[
            "no security definition",
            "invalid destination exchange",
            "unknown contract",
            "ambiguous contract",
        ],
    },
    KnownCause {
        cause: FailureCause::AccountRestriction,
        codes: &[203],
        needles: &[
            "not allowed for this account",
            "not available or allowed",
            "trading permission",
            "account is restricted",
            "cannot be traded",
        ],
    },
    KnownCause {
        cause: FailureCause::InsufficientLiquidity,
        codes: &[404],
        needles: &[
            "liquidity",
            "not immediately available",
            "order size",
            "exceeds",
            "no market",
        ],
    },
    KnownCause {
        cause: FailureCause::CancelledOrExpired,
        codes: &[202, 10148],
        needles: &["cancel", "expired"],
    },
];

/// Actionable explanation for a missing or failed order.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Diagnosis {
    pub cause: FailureCause,
    pub detail: String,
}

impl fmt::Display for Diagnosis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.detail)
    }
}

/// Classify one broker message, if it matches a known cause.
pub fn classify_message(msg: &BrokerMessage) -> Option<FailureCause> {
    let text = msg.message.to_ascii_lowercase();
    KNOWN_CAUSES
        .iter()
        .find(|k| k.codes.contains(&msg.code) || k.needles.iter().any(|n| text.contains(n)))
        .map(|k| k.cause)
}

/// Explain why `order` is missing or dead, using errors the broker reported.
pub fn diagnose(order: &Order, order_id: Option<i32>, broker: &BrokerSnapshot) -> Diagnosis {
    let related: Vec<&BrokerMessage> = broker
        .errors
        .iter()
        .filter(|e| match (e.id, order_id) {
            (Some(id), Some(mine)) => id == mine,
            _ => e.message.contains(order.symbol.as_str()),
        })
        .collect();

    let venue = order
        .identity
        .primary_exchange
        .as_deref()
        .unwrap_or(&order.identity.exchange);

    for msg in &related {
        let Some(cause) = classify_message(msg) else {
            continue;
        };
        let detail = match cause {
            FailureCause::AccountRestriction => format!(
                "account not permitted to trade {} on {venue} ({}): {}",
                order.symbol, order.identity.currency, msg.message
            ),
            FailureCause::UnresolvableContract => format!(
                "contract for {} could not be resolved on {venue}: {}",
                order.symbol, msg.message
            ),
            FailureCause::InsufficientLiquidity => format!(
                "insufficient liquidity for {} {} {}: {}",
                order.action, order.quantity, order.symbol, msg.message
            ),
            FailureCause::CancelledOrExpired => {
                format!("order for {} was cancelled: {}", order.symbol, msg.message)
            }
            FailureCause::Unknown => msg.message.clone(),
        };
        return Diagnosis { cause, detail };
    }

    let detail = match related.first() {
        Some(msg) => format!(
            "broker error {} for {} {} {}: {}",
            msg.code, order.action, order.quantity, order.symbol, msg.message
        ),
        None => format!(
            "no broker state for {} {} {} ({} on {venue}) within the observation window \
             and no error reported",
            order.action, order.quantity, order.symbol, order.identity.currency
        ),
    };
    Diagnosis {
        cause: FailureCause::Unknown,
        detail,
    }
}

/// Which lookup produced the match.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum MatchKind {
    OrderId,
    SymbolAction,
    Position,
}

/// Verification of one submitted order.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VerificationRecord {
    pub symbol: SecurityId,
    pub action: Action,
    pub quantity: Quantity,
    pub order_id: Option<i32>,
    pub found: bool,
    pub matched_by: Option<MatchKind>,
    pub broker_order_ids: Vec<i32>,
    pub broker_status: Option<OrderStatus>,
    pub lifecycle: Option<Lifecycle>,
    pub broker_quantity: Option<Quantity>,
    pub filled: Option<Quantity>,
    /// Broker quantity minus submitted quantity, when they differ.
    pub quantity_mismatch: Option<i64>,
    pub diagnosis: Option<Diagnosis>,
}

/// Broker state that was matched but incomplete.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DataGap {
    pub order_id: i32,
    pub symbol: SecurityId,
    pub missing_fields: Vec<&'static str>,
}

/// One line of the positions snapshot.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PositionLine {
    pub symbol: SecurityId,
    pub quantity: i64,
    pub avg_cost: f64,
}

/// Outcome of one status-check run.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct VerificationReport {
    pub generated_at: DateTime<Utc>,
    /// Submissions that reached the gateway and were verified.
    pub total: usize,
    pub matched: usize,
    pub missing: usize,
    pub filled: usize,
    pub partially_filled: usize,
    pub rejected_or_cancelled: usize,
    pub quantity_mismatches: usize,
    pub success_rate: f64,
    /// Submissions never sent (failed before sending, or skipped).
    pub not_submitted: usize,
    pub records: Vec<VerificationRecord>,
    pub status_breakdown: BTreeMap<String, usize>,
    pub positions: Vec<PositionLine>,
    pub data_gaps: Vec<DataGap>,
}

impl VerificationReport {
    pub fn missing_records(&self) -> impl Iterator<Item = &VerificationRecord> {
        self.records.iter().filter(|r| !r.found)
    }

    /// Every verified order matched and reached a terminal state.
    pub fn is_settled(&self) -> bool {
        self.missing == 0
            && self.records.iter().all(|r| {
                r.matched_by == Some(MatchKind::Position)
                    || r.lifecycle.is_some_and(|l| l.is_terminal())
            })
    }
}

/// Compare submitted orders with what the broker reports.
///
/// Each sent order is matched by broker order id first, then by
/// (symbol, action) over all broker orders, then by a live position already
/// at the order's target. Only an order with no observed state at all is
/// reported missing.
pub fn reconcile(submitted: &[OrderSubmission], broker: &BrokerSnapshot) -> VerificationReport {
    let mut by_key: FxHashMap<(SecurityId, Action), Vec<&BrokerOrderState>> = FxHashMap::default();
    for state in broker.orders.values() {
        if let (Some(symbol), Some(action)) = (&state.symbol, state.action) {
            by_key.entry((symbol.clone(), action)).or_default().push(state);
        }
    }

    let mut records = Vec::new();
    let mut data_gaps = Vec::new();
    let mut not_submitted = 0;

    for sub in submitted {
        if !sub.was_sent() {
            not_submitted += 1;
            continue;
        }
        let order = &sub.order;

        let by_id = sub
            .order_id
            .and_then(|id| broker.orders.get(&id))
            .filter(|s| s.completeness() > 0);

        let candidates: Vec<&BrokerOrderState> = match by_id {
            Some(state) => vec![state],
            None => by_key
                .get(&(order.symbol.clone(), order.action))
                .cloned()
                .unwrap_or_default(),
        };

        let record = if !candidates.is_empty() {
            let kind = if by_id.is_some() {
                MatchKind::OrderId
            } else {
                MatchKind::SymbolAction
            };
            let merged = merge_candidates(&candidates);
            for state in &candidates {
                let missing_fields = state.missing_fields();
                if !missing_fields.is_empty() {
                    data_gaps.push(DataGap {
                        order_id: state.order_id,
                        symbol: order.symbol.clone(),
                        missing_fields,
                    });
                }
            }
            matched_record(sub, kind, &candidates, &merged, broker)
        } else if position_at_target(order, broker) {
            VerificationRecord {
                found: true,
                matched_by: Some(MatchKind::Position),
                ..blank_record(sub)
            }
        } else {
            VerificationRecord {
                diagnosis: Some(diagnose(order, sub.order_id, broker)),
                ..blank_record(sub)
            }
        };
        records.push(record);
    }

    summarize(records, data_gaps, not_submitted, broker)
}

fn blank_record(sub: &OrderSubmission) -> VerificationRecord {
    VerificationRecord {
        symbol: sub.order.symbol.clone(),
        action: sub.order.action,
        quantity: sub.order.quantity,
        order_id: sub.order_id,
        found: false,
        matched_by: None,
        broker_order_ids: Vec::new(),
        broker_status: None,
        lifecycle: None,
        broker_quantity: None,
        filled: None,
        quantity_mismatch: None,
        diagnosis: None,
    }
}

/// Collapse several broker orders for the same (symbol, action) into one view.
fn merge_candidates(candidates: &[&BrokerOrderState]) -> BrokerOrderState {
    if let [single] = candidates {
        return (*single).clone();
    }
    let mut ranked: Vec<&BrokerOrderState> = candidates.to_vec();
    ranked.sort_by_key(|s| (s.completeness(), s.order_id));
    let best = ranked.last().copied().cloned().unwrap_or_default();

    let total: Option<Quantity> = candidates
        .iter()
        .filter_map(|s| s.total_quantity)
        .reduce(|a, b| a + b);
    let filled: Option<Quantity> = candidates
        .iter()
        .filter_map(|s| s.filled)
        .reduce(|a, b| a + b);

    BrokerOrderState {
        total_quantity: total,
        filled,
        ..best
    }
}

fn matched_record(
    sub: &OrderSubmission,
    kind: MatchKind,
    candidates: &[&BrokerOrderState],
    merged: &BrokerOrderState,
    broker: &BrokerSnapshot,
) -> VerificationRecord {
    let order = &sub.order;
    let quantity_mismatch = merged
        .total_quantity
        .map(|q| q as i64 - order.quantity as i64)
        .filter(|d| *d != 0);
    let lifecycle = merged.lifecycle();

    let diagnosis = match lifecycle {
        Some(Lifecycle::Rejected) | Some(Lifecycle::Cancelled) => {
            Some(diagnose(order, Some(merged.order_id), broker))
        }
        _ => None,
    };

    let mut broker_order_ids: Vec<i32> = candidates.iter().map(|s| s.order_id).collect();
    broker_order_ids.sort_unstable();

    VerificationRecord {
        found: true,
        matched_by: Some(kind),
        broker_order_ids,
        broker_status: merged.status,
        lifecycle,
        broker_quantity: merged.total_quantity,
        filled: merged.filled,
        quantity_mismatch,
        diagnosis,
        ..blank_record(sub)
    }
}

fn position_at_target(order: &Order, broker: &BrokerSnapshot) -> bool {
    if !broker.positions_complete {
        return false;
    }
    let held = broker.position(&order.symbol).unwrap_or(0);
    held == order.target_quantity as i64 && held != order.current_quantity
}

fn summarize(
    records: Vec<VerificationRecord>,
    data_gaps: Vec<DataGap>,
    not_submitted: usize,
    broker: &BrokerSnapshot,
) -> VerificationReport {
    let mut status_breakdown: BTreeMap<String, usize> = BTreeMap::new();
    let mut matched = 0;
    let mut filled = 0;
    let mut partially_filled = 0;
    let mut rejected_or_cancelled = 0;
    let mut quantity_mismatches = 0;

    for r in &records {
        let key = match (r.found, r.broker_status, r.matched_by) {
            (false, _, _) => "Missing".to_string(),
            (true, _, Some(MatchKind::Position)) => "PositionAtTarget".to_string(),
            (true, Some(status), _) => status.as_str().to_string(),
            (true, None, _) => "NoStatus".to_string(),
        };
        *status_breakdown.entry(key).or_insert(0) += 1;

        if r.found {
            matched += 1;
        }
        match r.lifecycle {
            Some(Lifecycle::Filled) => filled += 1,
            Some(Lifecycle::PartiallyFilled) => partially_filled += 1,
            Some(Lifecycle::Rejected) | Some(Lifecycle::Cancelled) => rejected_or_cancelled += 1,
            _ => {}
        }
        if r.matched_by == Some(MatchKind::Position) {
            filled += 1;
        }
        if r.quantity_mismatch.is_some() {
            quantity_mismatches += 1;
        }
    }

    let total = records.len();
    let success_rate = if total > 0 {
        matched as f64 / total as f64
    } else {
        0.0
    };

    let mut positions: Vec<PositionLine> = broker
        .positions
        .iter()
        .map(|p| PositionLine {
            symbol: p.symbol.clone(),
            quantity: p.quantity,
            avg_cost: p.avg_cost,
        })
        .collect();
    positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));

    VerificationReport {
        generated_at: Utc::now(),
        total,
        matched,
        missing: total - matched,
        filled,
        partially_filled,
        rejected_or_cancelled,
        quantity_mismatches,
        success_rate,
        not_submitted,
        records,
        status_breakdown,
        positions,
        data_gaps,
    }
}

impl fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "VERIFICATION:")?;
        writeln!(
            f,
            "  {:8} {:6} {:>8} {:>8} {:>8}  {}",
            "Symbol", "Action", "Qty", "Filled", "OrderId", "Status"
        )?;
        for r in &self.records {
            let status = match (&r.broker_status, r.found) {
                (Some(s), _) => s.as_str().to_string(),
                (None, true) => "matched".to_string(),
                (None, false) => "MISSING".to_string(),
            };
            writeln!(
                f,
                "  {:8} {:6} {:>8} {:>8} {:>8}  {}",
                r.symbol,
                r.action,
                r.quantity,
                r.filled.map(|q| q.to_string()).unwrap_or_else(|| "-".into()),
                r.order_id.map(|id| id.to_string()).unwrap_or_else(|| "-".into()),
                status,
            )?;
            if let Some(d) = &r.diagnosis {
                writeln!(f, "           -> {d}")?;
            }
        }
        writeln!(
            f,
            "\n  Matched {}/{} ({:.1}%), {} filled, {} partial, {} missing",
            self.matched,
            self.total,
            self.success_rate * 100.0,
            self.filled,
            self.partially_filled,
            self.missing,
        )?;
        if !self.data_gaps.is_empty() {
            writeln!(f, "  {} broker records incomplete", self.data_gaps.len())?;
        }
        Ok(())
    }
}
