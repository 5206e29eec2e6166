//! Typed requests and callback events exchanged with the gateway.

use std::fmt;

use rebal::{
    Action, BrokerMessage, BrokerPosition, OrderStatus, Quantity, SecurityId, SecurityIdentity,
};

/// Contract fields the gateway needs to route an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractSpec {
    pub symbol: String,
    pub security_type: String,
    pub exchange: String,
    pub primary_exchange: Option<String>,
    pub currency: String,
    /// Preferred over symbol lookup when known.
    pub con_id: Option<i32>,
}

impl ContractSpec {
    pub fn from_identity(identity: &SecurityIdentity) -> Self {
        Self {
            symbol: identity.symbol.as_str().to_string(),
            security_type: "STK".into(),
            exchange: identity.exchange.clone(),
            primary_exchange: identity.primary_exchange.clone(),
            currency: identity.currency.clone(),
            con_id: identity.con_id,
        }
    }
}

impl fmt::Display for ContractSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}@{}", self.symbol, self.currency, self.exchange)?;
        if let Some(primary) = &self.primary_exchange {
            write!(f, "/{primary}")?;
        }
        if let Some(id) = self.con_id {
            write!(f, " #{id}")?;
        }
        Ok(())
    }
}

/// Time-in-force for market orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeInForce {
    /// Expires at the end of the regular session.
    Day,
    /// Market-on-open: executes in the next opening auction.
    Opg,
    /// Rests until filled or cancelled, surviving closed sessions.
    Gtc,
}

impl TimeInForce {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeInForce::Day => "DAY",
            TimeInForce::Opg => "OPG",
            TimeInForce::Gtc => "GTC",
        }
    }
}

impl fmt::Display for TimeInForce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Market order to submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderTicket {
    pub action: Action,
    pub quantity: Quantity,
    pub tif: TimeInForce,
    pub account: Option<String>,
}

/// Requests issued to the gateway. Responses arrive later as [`Event`]s.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    PlaceOrder {
        order_id: i32,
        contract: ContractSpec,
        ticket: OrderTicket,
    },
    CancelOrder {
        order_id: i32,
    },
    RequestPositions,
    RequestOpenOrders,
    RequestExecutions,
    SubscribeAccountUpdates {
        account: String,
    },
    /// Cancel the position, open-order and account-update feeds.
    CancelSubscriptions,
    Close,
}

/// Asynchronous callbacks demultiplexed by the receive loop.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    NextValidId(i32),
    ManagedAccounts(Vec<String>),
    OrderStatus {
        order_id: i32,
        status: OrderStatus,
        filled: Quantity,
        remaining: Quantity,
        avg_fill_price: f64,
    },
    OpenOrder {
        order_id: i32,
        symbol: SecurityId,
        action: Action,
        total_quantity: Quantity,
        status: Option<OrderStatus>,
    },
    OpenOrderEnd,
    Position(BrokerPosition),
    PositionEnd,
    Execution {
        order_id: i32,
        exec_id: String,
        symbol: SecurityId,
        action: Option<Action>,
        shares: Quantity,
        price: f64,
    },
    ExecutionEnd,
    AccountValue {
        key: String,
        value: String,
        currency: String,
    },
    Error(BrokerMessage),
    Closed,
}

/// Notice codes that carry no information about a specific order's fate.
///
/// 399 is the "order will be placed when the market opens" warning; the
/// 2100 range are market-data farm status notices.
pub fn is_informational(code: i32) -> bool {
    code == 399 || (2100..=2199).contains(&code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contract_from_identity() {
        let identity = SecurityIdentity::stock("AAPL", "NASDAQ", 265598);
        let spec = ContractSpec::from_identity(&identity);
        assert_eq!(spec.symbol, "AAPL");
        assert_eq!(spec.security_type, "STK");
        assert_eq!(spec.con_id, Some(265598));
        assert_eq!(spec.to_string(), "AAPL USD@SMART/NASDAQ #265598");
    }

    #[test]
    fn informational_codes() {
        assert!(is_informational(2104));
        assert!(is_informational(399));
        assert!(!is_informational(201));
        assert!(!is_informational(200));
    }

    #[test]
    fn tif_strings() {
        assert_eq!(TimeInForce::Gtc.as_str(), "GTC");
        assert_eq!(TimeInForce::Opg.to_string(), "OPG");
    }
}
