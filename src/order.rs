//! Target-vs-live diff into an ordered buy/sell list.

use std::collections::BTreeMap;

use crate::error::GenerateError;
use crate::identity::SecurityIdentity;
use crate::types::{Action, Quantity, SecurityId};

/// A holding reported live by the broker at run start.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LivePosition {
    pub symbol: SecurityId,
    /// Positive = long, negative = short.
    pub quantity: i64,
    /// Contract data reported with the position.
    pub identity: SecurityIdentity,
}

/// One order of a rebalance plan.
///
/// `quantity == |target_quantity - current_quantity|` and is never zero.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Order {
    pub symbol: SecurityId,
    pub action: Action,
    pub quantity: Quantity,
    pub current_quantity: i64,
    pub target_quantity: Quantity,
    pub identity: SecurityIdentity,
}

impl Order {
    /// Whether the stored quantities agree with each other.
    pub fn is_consistent(&self) -> bool {
        let delta = self.target_quantity as i128 - self.current_quantity as i128;
        self.quantity > 0
            && delta.unsigned_abs() == self.quantity as u128
            && Action::for_delta(delta.signum() as i64) == Some(self.action)
    }
}

/// Diff `targets` against `live` and emit one order per non-zero delta.
///
/// Securities that only appear live are closed out using the contract the
/// broker reported for them. SELLs come first, then BUYs, each by descending
/// quantity; equal quantities are ordered by symbol.
pub fn generate(
    targets: &BTreeMap<SecurityId, Quantity>,
    live: &[LivePosition],
    identities: &BTreeMap<SecurityId, SecurityIdentity>,
) -> Result<Vec<Order>, GenerateError> {
    let live_map = merge_live(live)?;

    let mut symbols: Vec<&SecurityId> = targets.keys().chain(live_map.keys()).collect();
    symbols.sort();
    symbols.dedup();

    let mut orders = Vec::new();
    for symbol in symbols {
        let target = targets.get(symbol).copied().unwrap_or(0);
        let (current, live_identity) = match live_map.get(symbol) {
            Some((qty, identity)) => (*qty, Some(*identity)),
            None => (0, None),
        };

        let delta = target as i128 - current as i128;
        let Some(action) = Action::for_delta(delta.signum() as i64) else {
            continue;
        };

        let identity = identities
            .get(symbol)
            .or(live_identity)
            .cloned()
            .ok_or_else(|| GenerateError::MissingIdentity(symbol.clone()))?;

        orders.push(Order {
            symbol: symbol.clone(),
            action,
            quantity: delta.unsigned_abs() as Quantity,
            current_quantity: current,
            target_quantity: target,
            identity,
        });
    }

    sort_orders(&mut orders);
    Ok(orders)
}

/// SELLs before BUYs, larger quantities first, then symbol.
pub fn sort_orders(orders: &mut [Order]) {
    orders.sort_by(|a, b| {
        let side = |o: &Order| match o.action {
            Action::Sell => 0,
            Action::Buy => 1,
        };
        side(a)
            .cmp(&side(b))
            .then(b.quantity.cmp(&a.quantity))
            .then_with(|| a.symbol.cmp(&b.symbol))
    });
}

/// Sum duplicate live rows for a symbol, rejecting ones that disagree on the contract.
fn merge_live(
    live: &[LivePosition],
) -> Result<BTreeMap<SecurityId, (i64, &SecurityIdentity)>, GenerateError> {
    let mut map: BTreeMap<SecurityId, (i64, &SecurityIdentity)> = BTreeMap::new();
    for pos in live {
        match map.get_mut(&pos.symbol) {
            Some((qty, identity)) => {
                if let (Some(first), Some(second)) = (identity.con_id, pos.identity.con_id) {
                    if first != second {
                        return Err(GenerateError::ConflictingContract {
                            symbol: pos.symbol.clone(),
                            first,
                            second,
                        });
                    }
                }
                *qty = qty.saturating_add(pos.quantity);
            }
            None => {
                map.insert(pos.symbol.clone(), (pos.quantity, &pos.identity));
            }
        }
    }
    Ok(map)
}

/// Header counts for an order list.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OrderSummary {
    pub total_orders: usize,
    pub buy_orders: usize,
    pub sell_orders: usize,
    pub total_buy_quantity: Quantity,
    pub total_sell_quantity: Quantity,
}

impl OrderSummary {
    pub fn of(orders: &[Order]) -> Self {
        let mut summary = OrderSummary {
            total_orders: orders.len(),
            ..Default::default()
        };
        for order in orders {
            match order.action {
                Action::Buy => {
                    summary.buy_orders += 1;
                    summary.total_buy_quantity += order.quantity;
                }
                Action::Sell => {
                    summary.sell_orders += 1;
                    summary.total_sell_quantity += order.quantity;
                }
            }
        }
        summary
    }
}

impl std::fmt::Display for OrderSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} orders: {} SELL ({} shares), {} BUY ({} shares)",
            self.total_orders,
            self.sell_orders,
            self.total_sell_quantity,
            self.buy_orders,
            self.total_buy_quantity,
        )
    }
}
