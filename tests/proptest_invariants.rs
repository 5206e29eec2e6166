//! Property-based tests for aggregation, order generation and reconciliation.
//!
//! These tests use proptest to verify that key invariants hold
//! across randomly generated portfolios.

use std::collections::BTreeMap;

use proptest::prelude::*;
use rebal::{
    Action, Bucket, BrokerOrderState, BrokerSnapshot, Holding, LivePosition, Order, OrderStatus,
    OrderSubmission, Quantity, SecurityId, SecurityIdentity, SubmissionOutcome, aggregate, generate,
    reconcile,
};

const SYMBOLS: [&str; 8] = ["AAPL", "AMZN", "GOOG", "META", "MSFT", "NVDA", "TSLA", "V"];

fn identity(idx: usize) -> SecurityIdentity {
    SecurityIdentity::stock(SYMBOLS[idx], "NASDAQ", 1000 + idx as i32)
}

/// Up to four buckets, each a ticker → (target, resolved) map.
fn buckets_strategy() -> impl Strategy<Value = Vec<BTreeMap<usize, (Quantity, bool)>>> {
    prop::collection::vec(
        prop::collection::btree_map(
            0..SYMBOLS.len(),
            (0u64..5_000, prop::bool::weighted(0.85)),
            0..6,
        ),
        1..4,
    )
}

fn to_buckets(raw: &[BTreeMap<usize, (Quantity, bool)>]) -> Vec<Bucket> {
    raw.iter()
        .enumerate()
        .map(|(b, holdings)| Bucket {
            name: format!("bucket{b}"),
            holdings: holdings
                .iter()
                .map(|(&idx, &(qty, resolved))| Holding {
                    ticker: SYMBOLS[idx].to_string(),
                    target_quantity: qty,
                    identity: resolved.then(|| identity(idx)),
                })
                .collect(),
        })
        .collect()
}

fn targets_strategy() -> impl Strategy<Value = BTreeMap<usize, Quantity>> {
    prop::collection::btree_map(0..SYMBOLS.len(), 0u64..2_000, 0..8)
}

fn live_strategy() -> impl Strategy<Value = BTreeMap<usize, i64>> {
    prop::collection::btree_map(0..SYMBOLS.len(), -500i64..2_000, 0..8)
}

struct Portfolio {
    targets: BTreeMap<SecurityId, Quantity>,
    identities: BTreeMap<SecurityId, SecurityIdentity>,
    live: Vec<LivePosition>,
}

fn portfolio(targets: &BTreeMap<usize, Quantity>, live: &BTreeMap<usize, i64>) -> Portfolio {
    Portfolio {
        targets: targets
            .iter()
            .map(|(&idx, &qty)| (SecurityId::new(SYMBOLS[idx]), qty))
            .collect(),
        identities: targets
            .keys()
            .map(|&idx| (SecurityId::new(SYMBOLS[idx]), identity(idx)))
            .collect(),
        live: live
            .iter()
            .map(|(&idx, &qty)| LivePosition {
                symbol: SecurityId::new(SYMBOLS[idx]),
                quantity: qty,
                identity: identity(idx),
            })
            .collect(),
    }
}

fn sent(orders: &[Order]) -> Vec<OrderSubmission> {
    orders
        .iter()
        .enumerate()
        .map(|(i, order)| OrderSubmission {
            order: order.clone(),
            order_id: Some(i as i32 + 1),
            submitted_at: None,
            status: None,
            outcome: SubmissionOutcome::Pending,
        })
        .collect()
}

fn broker_state(sub: &OrderSubmission) -> BrokerOrderState {
    let mut state = BrokerOrderState::new(sub.order_id.unwrap_or_default());
    state.symbol = Some(sub.order.symbol.clone());
    state.action = Some(sub.order.action);
    state.total_quantity = Some(sub.order.quantity);
    state.filled = Some(0);
    state.remaining = Some(sub.order.quantity);
    state.status = Some(OrderStatus::Submitted);
    state
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    // ========================================================================
    // AGGREGATION
    // ========================================================================

    /// Aggregated total equals the sum of resolved bucket quantities.
    #[test]
    fn aggregate_conserves_resolved_quantity(raw in buckets_strategy()) {
        let buckets = to_buckets(&raw);
        let agg = aggregate(&buckets);

        let resolved: Quantity = buckets
            .iter()
            .flat_map(|b| &b.holdings)
            .filter(|h| h.identity.is_some())
            .map(|h| h.target_quantity)
            .sum();
        let skipped = buckets
            .iter()
            .flat_map(|b| &b.holdings)
            .filter(|h| h.identity.is_none())
            .count();

        prop_assert_eq!(agg.total_quantity(), resolved);
        prop_assert_eq!(agg.unresolved_count(), skipped);
    }

    /// Bucket order does not change the aggregate.
    #[test]
    fn aggregate_ignores_bucket_order(raw in buckets_strategy()) {
        let buckets = to_buckets(&raw);
        let mut reversed = buckets.clone();
        reversed.reverse();

        let a = aggregate(&buckets);
        let b = aggregate(&reversed);
        prop_assert_eq!(a.targets, b.targets);
        prop_assert_eq!(a.identities, b.identities);
        prop_assert_eq!(a.unresolved, b.unresolved);
    }

    // ========================================================================
    // ORDER GENERATION
    // ========================================================================

    /// One correctly signed and sized order per mismatched security, none otherwise.
    #[test]
    fn generate_covers_every_delta(targets in targets_strategy(), live in live_strategy()) {
        let p = portfolio(&targets, &live);
        let orders = generate(&p.targets, &p.live, &p.identities).unwrap();

        for idx in 0..SYMBOLS.len() {
            let symbol = SecurityId::new(SYMBOLS[idx]);
            let target = targets.get(&idx).copied().unwrap_or(0) as i64;
            let current = live.get(&idx).copied().unwrap_or(0);
            let matching: Vec<&Order> = orders.iter().filter(|o| o.symbol == symbol).collect();

            if target == current {
                prop_assert!(matching.is_empty(), "{} at target but got {:?}", symbol, matching);
                continue;
            }
            prop_assert_eq!(matching.len(), 1);
            let order = matching[0];
            let expected = if target > current { Action::Buy } else { Action::Sell };
            prop_assert_eq!(order.action, expected);
            prop_assert_eq!(order.quantity, (target - current).unsigned_abs());
            prop_assert!(order.is_consistent());
        }
    }

    /// Every SELL precedes every BUY.
    #[test]
    fn sells_precede_buys(targets in targets_strategy(), live in live_strategy()) {
        let p = portfolio(&targets, &live);
        let orders = generate(&p.targets, &p.live, &p.identities).unwrap();

        let first_buy = orders.iter().position(|o| o.action == Action::Buy).unwrap_or(orders.len());
        prop_assert!(orders[first_buy..].iter().all(|o| o.action == Action::Buy));
    }

    /// Same inputs, same list, whatever order the live positions arrive in.
    #[test]
    fn generate_is_idempotent(targets in targets_strategy(), live in live_strategy()) {
        let p = portfolio(&targets, &live);
        let first = generate(&p.targets, &p.live, &p.identities).unwrap();
        let second = generate(&p.targets, &p.live, &p.identities).unwrap();
        prop_assert_eq!(&first, &second);

        let mut shuffled = p.live.clone();
        shuffled.reverse();
        let third = generate(&p.targets, &shuffled, &p.identities).unwrap();
        prop_assert_eq!(&first, &third);
    }

    // ========================================================================
    // RECONCILIATION
    // ========================================================================

    /// Revealing more broker orders never lowers the match count.
    #[test]
    fn matches_grow_with_broker_state(targets in targets_strategy(), live in live_strategy()) {
        let p = portfolio(&targets, &live);
        let orders = generate(&p.targets, &p.live, &p.identities).unwrap();
        let submissions = sent(&orders);

        let mut snapshot = BrokerSnapshot {
            positions_complete: true,
            ..BrokerSnapshot::default()
        };
        let mut previous = reconcile(&submissions, &snapshot).matched;

        for sub in &submissions {
            let state = broker_state(sub);
            snapshot.orders.insert(state.order_id, state);
            let matched = reconcile(&submissions, &snapshot).matched;
            prop_assert!(matched >= previous, "matched dropped from {} to {}", previous, matched);
            previous = matched;
        }
        prop_assert_eq!(previous, submissions.len());
    }
}
