//! Order-list document: metadata header plus the ordered order list.
//!
//! Written by `plan`, read back by `execute`. Loading re-checks the
//! generator's invariants and the header counts.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use rebal::{Action, Order, OrderSummary, UnresolvedHolding};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Header of an order-list document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderListMetadata {
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(flatten)]
    pub summary: OrderSummary,
    /// Holdings left out for lack of a resolved identity.
    #[serde(default)]
    pub unresolved: Vec<UnresolvedHolding>,
}

/// A persisted rebalance plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderList {
    pub metadata: OrderListMetadata,
    pub orders: Vec<Order>,
}

impl OrderList {
    pub fn new(
        orders: Vec<Order>,
        account: Option<String>,
        unresolved: Vec<UnresolvedHolding>,
    ) -> Self {
        Self {
            metadata: OrderListMetadata {
                generated_at: Utc::now(),
                account,
                summary: OrderSummary::of(&orders),
                unresolved,
            },
            orders,
        }
    }

    /// Write as pretty JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Report(format!("failed to encode order list: {e}")))?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Load and validate an order list.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::OrdersMissing {
                    path: path.to_path_buf(),
                });
            }
            Err(e) => {
                return Err(Error::OrdersRead {
                    path: path.to_path_buf(),
                    source: e,
                });
            }
        };
        let list: OrderList =
            serde_json::from_str(&contents).map_err(|e| Error::OrdersMalformed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        list.validate()?;
        Ok(list)
    }

    /// Check the generator's invariants and that the header matches the list.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        let mut saw_buy = false;
        for (i, order) in self.orders.iter().enumerate() {
            if !order.is_consistent() {
                return Err(Error::OrdersInvalid(format!(
                    "order #{} ({} {} {}) disagrees with current {} / target {}",
                    i + 1,
                    order.action,
                    order.quantity,
                    order.symbol,
                    order.current_quantity,
                    order.target_quantity
                )));
            }
            if order.identity.symbol != order.symbol {
                return Err(Error::OrdersInvalid(format!(
                    "order #{} for {} carries identity of {}",
                    i + 1,
                    order.symbol,
                    order.identity.symbol
                )));
            }
            if !seen.insert(&order.symbol) {
                return Err(Error::OrdersInvalid(format!(
                    "{} appears in more than one order",
                    order.symbol
                )));
            }
            match order.action {
                Action::Buy => saw_buy = true,
                Action::Sell if saw_buy => {
                    return Err(Error::OrdersInvalid(format!(
                        "SELL {} listed after a BUY",
                        order.symbol
                    )));
                }
                Action::Sell => {}
            }
        }

        let actual = OrderSummary::of(&self.orders);
        if actual != self.metadata.summary {
            return Err(Error::OrdersInvalid(format!(
                "header says '{}' but list has '{actual}'",
                self.metadata.summary
            )));
        }
        Ok(())
    }
}
