//! Order semantics per instrument currency and session policy.

use std::fmt;

use rebal::SecurityIdentity;
use rebal_broker::TimeInForce;
use serde::{Deserialize, Serialize};

/// When domestic orders should execute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPolicy {
    /// Market order valid for the current regular session.
    #[default]
    Regular,
    /// Market-on-open in the next opening auction.
    NextOpen,
}

impl fmt::Display for SessionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionPolicy::Regular => "regular",
            SessionPolicy::NextOpen => "next_open",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Market {
    Domestic,
    Foreign,
}

struct Rule {
    market: Market,
    /// `None` matches any policy.
    policy: Option<SessionPolicy>,
    tif: TimeInForce,
}

// First matching row wins.
const RULES: &[Rule] = &[
    Rule {
        market: Market::Foreign,
        policy: None,
        tif: TimeInForce::Gtc,
    },
    Rule {
        market: Market::Domestic,
        policy: Some(SessionPolicy::NextOpen),
        tif: TimeInForce::Opg,
    },
    Rule {
        market: Market::Domestic,
        policy: Some(SessionPolicy::Regular),
        tif: TimeInForce::Day,
    },
];

/// Time-in-force for a market order on `identity`.
pub fn time_in_force(
    identity: &SecurityIdentity,
    policy: SessionPolicy,
    domestic_currency: &str,
) -> TimeInForce {
    let market = if identity.is_currency(domestic_currency) {
        Market::Domestic
    } else {
        Market::Foreign
    };
    RULES
        .iter()
        .find(|r| r.market == market && r.policy.is_none_or(|p| p == policy))
        .map_or(TimeInForce::Day, |r| r.tif)
}
