//! Resolved broker identity of a security.

use std::cmp::Ordering;

use crate::types::SecurityId;

/// Where an identity record came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum IdentitySource {
    /// Produced by the upstream identification step.
    Upstream,
    /// Taken from contract data the broker reported alongside a position.
    Broker,
}

/// Everything needed to route an order for one instrument.
///
/// `ticker` is the display ticker from the screening source; `symbol` is the
/// canonical broker symbol used as the aggregation and order key.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SecurityIdentity {
    pub ticker: String,
    pub symbol: SecurityId,
    pub exchange: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub primary_exchange: Option<String>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub con_id: Option<i32>,
    pub currency: String,
    #[cfg_attr(feature = "serde", serde(default = "upstream"))]
    pub source: IdentitySource,
}

#[cfg(feature = "serde")]
fn upstream() -> IdentitySource {
    IdentitySource::Upstream
}

impl SecurityIdentity {
    /// Identity for a US stock routed through SMART, mostly for tests and demos.
    pub fn stock(symbol: &str, primary_exchange: &str, con_id: i32) -> Self {
        Self {
            ticker: symbol.to_string(),
            symbol: SecurityId::new(symbol),
            exchange: "SMART".into(),
            primary_exchange: Some(primary_exchange.to_string()),
            con_id: Some(con_id),
            currency: "USD".into(),
            source: IdentitySource::Upstream,
        }
    }

    pub fn is_currency(&self, currency: &str) -> bool {
        self.currency.eq_ignore_ascii_case(currency)
    }

    /// Total preference order used when several records describe one symbol.
    ///
    /// Records with a contract id beat those without, then records with a
    /// primary exchange; remaining ties go to the lexicographically smaller
    /// ticker. `Greater` means `self` is preferred.
    pub fn preference(&self, other: &Self) -> Ordering {
        self.con_id
            .is_some()
            .cmp(&other.con_id.is_some())
            .then(self.primary_exchange.is_some().cmp(&other.primary_exchange.is_some()))
            .then_with(|| other.ticker.cmp(&self.ticker))
            .then_with(|| other.exchange.cmp(&self.exchange))
            .then_with(|| other.con_id.cmp(&self.con_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_contract_id() {
        let with_id = SecurityIdentity::stock("AAPL", "NASDAQ", 265598);
        let mut without = with_id.clone();
        without.con_id = None;
        assert_eq!(with_id.preference(&without), Ordering::Greater);
        assert_eq!(without.preference(&with_id), Ordering::Less);
    }

    #[test]
    fn ties_break_on_ticker() {
        let a = SecurityIdentity::stock("BRK B", "NYSE", 72063691);
        let mut b = a.clone();
        b.ticker = "BRK.B".into();
        assert_eq!(a.preference(&b), Ordering::Greater);
        assert_eq!(b.preference(&a), Ordering::Less);
    }

    #[test]
    fn currency_check_ignores_case() {
        let id = SecurityIdentity::stock("AAPL", "NASDAQ", 265598);
        assert!(id.is_currency("usd"));
        assert!(!id.is_currency("EUR"));
    }
}
