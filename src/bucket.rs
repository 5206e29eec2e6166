//! Screening buckets and target quantity aggregation.
//!
//! A security can sit in several buckets, each with its own local target.
//! [`aggregate`] sums those targets per canonical broker symbol so that a
//! security is counted once, whatever ticker each screen used for it.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::identity::SecurityIdentity;
use crate::types::{Quantity, SecurityId};

/// A named screen with bucket-local targets.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Bucket {
    pub name: String,
    pub holdings: Vec<Holding>,
}

/// One bucket-local target.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Holding {
    pub ticker: String,
    pub target_quantity: Quantity,
    /// `None` when identity resolution did not find a broker contract.
    pub identity: Option<SecurityIdentity>,
}

/// A holding that was counted but not aggregated.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UnresolvedHolding {
    pub bucket: String,
    pub ticker: String,
    pub target_quantity: Quantity,
}

/// Result of collapsing buckets into per-security targets.
#[derive(Clone, Debug, Default)]
pub struct Aggregation {
    /// Absolute target per canonical symbol.
    pub targets: BTreeMap<SecurityId, Quantity>,
    /// Identity chosen for each aggregated symbol.
    pub identities: BTreeMap<SecurityId, SecurityIdentity>,
    /// Holdings skipped for lack of a resolved identity, sorted.
    pub unresolved: Vec<UnresolvedHolding>,
    /// Resolved holdings folded into `targets`.
    pub aggregated_holdings: usize,
}

impl Aggregation {
    pub fn total_quantity(&self) -> Quantity {
        self.targets.values().sum()
    }

    pub fn unresolved_count(&self) -> usize {
        self.unresolved.len()
    }
}

/// Sum bucket-local targets per canonical broker symbol.
///
/// Holdings without an identity are listed in [`Aggregation::unresolved`].
/// The result does not depend on bucket or holding order.
pub fn aggregate(buckets: &[Bucket]) -> Aggregation {
    let mut agg = Aggregation::default();

    for bucket in buckets {
        for holding in &bucket.holdings {
            let Some(identity) = &holding.identity else {
                agg.unresolved.push(UnresolvedHolding {
                    bucket: bucket.name.clone(),
                    ticker: holding.ticker.clone(),
                    target_quantity: holding.target_quantity,
                });
                continue;
            };

            let key = identity.symbol.clone();
            let total = agg.targets.entry(key.clone()).or_insert(0);
            *total = total.saturating_add(holding.target_quantity);
            agg.aggregated_holdings += 1;

            match agg.identities.get(&key) {
                Some(current) if current.preference(identity) != Ordering::Less => {}
                _ => {
                    agg.identities.insert(key, identity.clone());
                }
            }
        }
    }

    agg.unresolved.sort_by(|a, b| {
        (a.bucket.as_str(), a.ticker.as_str(), a.target_quantity).cmp(&(
            b.bucket.as_str(),
            b.ticker.as_str(),
            b.target_quantity,
        ))
    });

    if !agg.unresolved.is_empty() {
        log::warn!(
            "{} holdings skipped: no resolved broker identity",
            agg.unresolved.len()
        );
    }

    agg
}

#[cfg(test)]
mod tests {
    use super::*;

    fn holding(ticker: &str, qty: Quantity, identity: Option<SecurityIdentity>) -> Holding {
        Holding {
            ticker: ticker.into(),
            target_quantity: qty,
            identity,
        }
    }

    fn aapl() -> SecurityIdentity {
        SecurityIdentity::stock("AAPL", "NASDAQ", 265598)
    }

    #[test]
    fn same_security_in_two_buckets_sums() {
        let buckets = vec![
            Bucket {
                name: "momentum".into(),
                holdings: vec![holding("AAPL", 50, Some(aapl()))],
            },
            Bucket {
                name: "quality".into(),
                holdings: vec![holding("AAPL", 30, Some(aapl()))],
            },
        ];

        let agg = aggregate(&buckets);
        assert_eq!(agg.targets[&SecurityId::new("AAPL")], 80);
        assert_eq!(agg.aggregated_holdings, 2);
        assert!(agg.unresolved.is_empty());
    }

    #[test]
    fn different_tickers_same_symbol_collapse() {
        let mut alias = aapl();
        alias.ticker = "AAPL.O".into();
        let buckets = vec![
            Bucket {
                name: "a".into(),
                holdings: vec![holding("AAPL", 10, Some(aapl()))],
            },
            Bucket {
                name: "b".into(),
                holdings: vec![holding("AAPL.O", 5, Some(alias))],
            },
        ];

        let agg = aggregate(&buckets);
        assert_eq!(agg.targets.len(), 1);
        assert_eq!(agg.total_quantity(), 15);
        assert_eq!(agg.identities[&SecurityId::new("AAPL")].ticker, "AAPL");
    }

    #[test]
    fn unresolved_counted_not_aggregated() {
        let buckets = vec![Bucket {
            name: "value".into(),
            holdings: vec![holding("AAPL", 10, Some(aapl())), holding("XYZQ", 40, None)],
        }];

        let agg = aggregate(&buckets);
        assert_eq!(agg.total_quantity(), 10);
        assert_eq!(agg.unresolved_count(), 1);
        assert_eq!(agg.unresolved[0].ticker, "XYZQ");
        assert_eq!(agg.unresolved[0].target_quantity, 40);
        assert!(!agg.targets.contains_key(&SecurityId::new("XYZQ")));
    }

    #[test]
    fn zero_target_still_registers_symbol() {
        let buckets = vec![Bucket {
            name: "exit".into(),
            holdings: vec![holding("AAPL", 0, Some(aapl()))],
        }];

        let agg = aggregate(&buckets);
        assert_eq!(agg.targets.get(&SecurityId::new("AAPL")), Some(&0));
    }

    #[test]
    fn identity_choice_is_order_independent() {
        let mut bare = aapl();
        bare.con_id = None;
        let a = Bucket {
            name: "a".into(),
            holdings: vec![holding("AAPL", 1, Some(bare))],
        };
        let b = Bucket {
            name: "b".into(),
            holdings: vec![holding("AAPL", 1, Some(aapl()))],
        };

        let forward = aggregate(&[a.clone(), b.clone()]);
        let backward = aggregate(&[b, a]);
        let key = SecurityId::new("AAPL");
        assert_eq!(forward.identities[&key], backward.identities[&key]);
        assert_eq!(forward.identities[&key].con_id, Some(265598));
    }

    #[test]
    fn empty_input() {
        let agg = aggregate(&[]);
        assert!(agg.targets.is_empty());
        assert_eq!(agg.total_quantity(), 0);
    }
}
