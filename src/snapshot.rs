//! Copied views of broker-side state.
//!
//! The broker reports different subsets of fields for the same order across
//! callback types (status updates, open-order dumps, executions). Every view
//! here is built by merging observations so that the most complete state per
//! order id survives, regardless of arrival order.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::identity::SecurityIdentity;
use crate::order::LivePosition;
use crate::status::{Lifecycle, OrderStatus};
use crate::types::{Action, Quantity, SecurityId};

/// Protocol error or notice attached to a request/order id.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BrokerMessage {
    /// Order or request id; `None` for connection-level notices.
    pub id: Option<i32>,
    pub code: i32,
    pub message: String,
}

/// What the broker has told us about one order id.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BrokerOrderState {
    pub order_id: i32,
    pub symbol: Option<SecurityId>,
    pub action: Option<Action>,
    pub total_quantity: Option<Quantity>,
    pub filled: Option<Quantity>,
    pub remaining: Option<Quantity>,
    pub avg_fill_price: Option<f64>,
    pub status: Option<OrderStatus>,
    pub last_error: Option<BrokerMessage>,
}

impl BrokerOrderState {
    pub fn new(order_id: i32) -> Self {
        Self {
            order_id,
            ..Default::default()
        }
    }

    /// Fold a later observation of the same order into this one.
    ///
    /// Known fields are never erased, the filled count never decreases and a
    /// terminal status is never replaced by a non-terminal one.
    pub fn merge(&mut self, other: &BrokerOrderState) {
        if self.symbol.is_none() {
            self.symbol = other.symbol.clone();
        }
        if self.action.is_none() {
            self.action = other.action;
        }
        if other.total_quantity.is_some() {
            self.total_quantity = other.total_quantity;
        }

        let advances = match (self.filled, other.filled) {
            (_, None) => false,
            (None, Some(_)) => true,
            (Some(mine), Some(theirs)) => theirs >= mine,
        };
        if advances {
            self.filled = other.filled;
            if other.remaining.is_some() {
                self.remaining = other.remaining;
            }
            if other.avg_fill_price.is_some() {
                self.avg_fill_price = other.avg_fill_price;
            }
        } else {
            if self.remaining.is_none() {
                self.remaining = other.remaining;
            }
            if self.avg_fill_price.is_none() {
                self.avg_fill_price = other.avg_fill_price;
            }
        }

        match (self.status, other.status) {
            (_, None) => {}
            (Some(mine), Some(_)) if mine.is_terminal() => {}
            (_, Some(theirs)) => self.status = Some(theirs),
        }

        if other.last_error.is_some() {
            self.last_error = other.last_error.clone();
        }
    }

    /// Number of populated fields, used to rank competing observations.
    pub fn completeness(&self) -> usize {
        [
            self.symbol.is_some(),
            self.action.is_some(),
            self.total_quantity.is_some(),
            self.filled.is_some(),
            self.remaining.is_some(),
            self.avg_fill_price.is_some(),
            self.status.is_some(),
        ]
        .iter()
        .filter(|&&known| known)
        .count()
    }

    /// Fields the reconciler needs but the broker never sent.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.symbol.is_none() {
            missing.push("symbol");
        }
        if self.action.is_none() {
            missing.push("action");
        }
        if self.total_quantity.is_none() {
            missing.push("total_quantity");
        }
        if self.status.is_none() {
            missing.push("status");
        }
        missing
    }

    pub fn lifecycle(&self) -> Option<Lifecycle> {
        self.status
            .map(|s| Lifecycle::from_status(s, self.filled.unwrap_or(0)))
    }
}

/// A position as reported by the broker.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BrokerPosition {
    pub account: String,
    pub symbol: SecurityId,
    pub quantity: i64,
    pub avg_cost: f64,
    pub identity: SecurityIdentity,
}

impl BrokerPosition {
    pub fn to_live(&self) -> LivePosition {
        LivePosition {
            symbol: self.symbol.clone(),
            quantity: self.quantity,
            identity: self.identity.clone(),
        }
    }
}

/// Point-in-time copy of everything a connection has observed.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BrokerSnapshot {
    pub account: Option<String>,
    pub orders: BTreeMap<i32, BrokerOrderState>,
    pub positions: Vec<BrokerPosition>,
    /// True once the broker signalled the end of a position dump.
    pub positions_complete: bool,
    pub errors: Vec<BrokerMessage>,
    pub captured_at: DateTime<Utc>,
}

impl BrokerSnapshot {
    /// Merge a newer snapshot into this one.
    ///
    /// Orders merge per id; positions are replaced only by a completed dump.
    pub fn absorb(&mut self, newer: &BrokerSnapshot) {
        if newer.account.is_some() {
            self.account = newer.account.clone();
        }
        for (id, state) in &newer.orders {
            self.orders
                .entry(*id)
                .or_insert_with(|| BrokerOrderState::new(*id))
                .merge(state);
        }
        if newer.positions_complete || !self.positions_complete {
            self.positions = newer.positions.clone();
            self.positions_complete = newer.positions_complete;
        }
        for err in &newer.errors {
            if !self.errors.contains(err) {
                self.errors.push(err.clone());
            }
        }
        self.captured_at = self.captured_at.max(newer.captured_at);
    }

    pub fn live_positions(&self) -> Vec<LivePosition> {
        self.positions.iter().map(BrokerPosition::to_live).collect()
    }

    pub fn position(&self, symbol: &SecurityId) -> Option<i64> {
        let mut found = None;
        for p in self.positions.iter().filter(|p| &p.symbol == symbol) {
            *found.get_or_insert(0) += p.quantity;
        }
        found
    }

    /// Errors tied to an order id.
    pub fn errors_for(&self, order_id: i32) -> impl Iterator<Item = &BrokerMessage> {
        self.errors.iter().filter(move |e| e.id == Some(order_id))
    }
}
