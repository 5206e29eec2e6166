//! Conversions between gateway-neutral order types and the ibapi ones.

use ibapi::contracts::Contract;
use ibapi::orders::order_builder::market_order;
use ibapi::orders::{Action as IbAction, Order as IbOrder};
use rebal::{Action, OrderStatus, Quantity};

use crate::types::{ContractSpec, OrderTicket};

/// Build the ibapi contract for a resolved instrument.
///
/// The contract id is carried when known so the gateway does not have to
/// resolve the symbol again.
pub fn contract(spec: &ContractSpec) -> Contract {
    let mut contract = Contract::stock(spec.symbol.as_str()).build();
    contract.exchange = spec.exchange.as_str().into();
    contract.currency = spec.currency.as_str().into();
    if let Some(primary) = &spec.primary_exchange {
        contract.primary_exchange = primary.as_str().into();
    }
    if let Some(con_id) = spec.con_id {
        contract.contract_id = con_id;
    }
    contract
}

pub fn action(action: Action) -> IbAction {
    match action {
        Action::Buy => IbAction::Buy,
        Action::Sell => IbAction::Sell,
    }
}

pub fn from_ib_action(action: &IbAction) -> Action {
    match action {
        IbAction::Buy => Action::Buy,
        _ => Action::Sell,
    }
}

/// Market order for `ticket`, with its time-in-force and account.
pub fn market(ticket: &OrderTicket) -> IbOrder {
    let mut order = market_order(action(ticket.action), ticket.quantity as f64);
    order.tif = ticket.tif.as_str().into();
    if let Some(account) = &ticket.account {
        order.account = account.clone();
    }
    order
}

pub fn status(raw: &str) -> OrderStatus {
    OrderStatus::parse(raw)
}

/// Share counts arrive as floats; fractional remainders are truncated.
pub fn shares(raw: f64) -> Quantity {
    if raw.is_finite() && raw > 0.0 {
        raw as Quantity
    } else {
        0
    }
}
