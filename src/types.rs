//! Core types: SecurityId, Action, Quantity

use std::fmt;

/// Canonical broker symbol identifying one instrument.
///
/// Screening sources may list the same instrument under different display
/// tickers; everything downstream of identity resolution keys on this value.
/// Construction trims surrounding whitespace and upper-cases.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct SecurityId(String);

impl SecurityId {
    pub fn new(symbol: &str) -> Self {
        SecurityId(symbol.trim().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for SecurityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl From<&str> for SecurityId {
    fn from(s: &str) -> Self {
        SecurityId::new(s)
    }
}

/// Number of shares. Orders always carry a positive quantity.
pub type Quantity = u64;

/// Order direction. The sign of a delta never leaks into an order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "UPPERCASE"))]
pub enum Action {
    Buy,
    Sell,
}

impl Action {
    /// Direction needed to move a holding by `delta` shares.
    pub fn for_delta(delta: i64) -> Option<Action> {
        match delta {
            0 => None,
            d if d < 0 => Some(Action::Sell),
            _ => Some(Action::Buy),
        }
    }

    /// Parse broker spellings: `BUY`/`BOT`, `SELL`/`SLD`/`SSHORT`.
    pub fn parse(s: &str) -> Option<Action> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" | "BOT" => Some(Action::Buy),
            "SELL" | "SLD" | "SSHORT" => Some(Action::Sell),
            _ => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::Buy => "BUY",
            Action::Sell => "SELL",
        };
        f.pad(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn security_id_is_canonical() {
        assert_eq!(SecurityId::new(" aapl "), SecurityId::new("AAPL"));
        assert_eq!(SecurityId::new("brk b").as_str(), "BRK B");
        assert!(SecurityId::new("  ").is_empty());
    }

    #[test]
    fn security_id_display_pads() {
        assert_eq!(format!("{:6}|", SecurityId::new("MSFT")), "MSFT  |");
    }

    #[test]
    fn action_for_delta() {
        assert_eq!(Action::for_delta(0), None);
        assert_eq!(Action::for_delta(-3), Some(Action::Sell));
        assert_eq!(Action::for_delta(20), Some(Action::Buy));
    }

    #[test]
    fn action_parse_broker_spellings() {
        assert_eq!(Action::parse("BOT"), Some(Action::Buy));
        assert_eq!(Action::parse("sld"), Some(Action::Sell));
        assert_eq!(Action::parse("SELL"), Some(Action::Sell));
        assert_eq!(Action::parse("HOLD"), None);
    }

    #[test]
    fn action_display() {
        assert_eq!(format!("{}", Action::Buy), "BUY");
        assert_eq!(format!("{}", Action::Sell), "SELL");
    }
}
