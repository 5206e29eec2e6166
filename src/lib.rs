//! # rebal
//!
//! Deterministic core of a broker rebalancing pipeline: aggregate screening
//! buckets into per-security targets, diff them against live holdings, and
//! verify submitted orders against what the broker reports.
//!
//! Nothing here touches the network. The broker connection lives in
//! `rebal-broker`; the execution workflow and CLI live in `rebal-rebalancer`.
//!
//! ## Quick Start
//!
//! ```
//! use std::collections::BTreeMap;
//! use rebal::{aggregate, generate, Action, Bucket, Holding, SecurityIdentity};
//!
//! let aapl = SecurityIdentity::stock("AAPL", "NASDAQ", 265598);
//! let buckets = vec![
//!     Bucket {
//!         name: "momentum".into(),
//!         holdings: vec![Holding {
//!             ticker: "AAPL".into(),
//!             target_quantity: 50,
//!             identity: Some(aapl.clone()),
//!         }],
//!     },
//!     Bucket {
//!         name: "quality".into(),
//!         holdings: vec![Holding {
//!             ticker: "AAPL".into(),
//!             target_quantity: 30,
//!             identity: Some(aapl),
//!         }],
//!     },
//! ];
//!
//! let agg = aggregate(&buckets);
//! assert_eq!(agg.total_quantity(), 80);
//!
//! let orders = generate(&agg.targets, &[], &agg.identities).unwrap();
//! assert_eq!(orders.len(), 1);
//! assert_eq!(orders[0].action, Action::Buy);
//! assert_eq!(orders[0].quantity, 80);
//! ```
//!
//! ## Ordering
//!
//! | Position in list | Orders |
//! |------------------|--------|
//! | first | SELLs, largest quantity first |
//! | then  | BUYs, largest quantity first |
//!
//! Equal quantities fall back to symbol order, so identical inputs always
//! produce identical lists.

pub mod bucket;
pub mod error;
pub mod identity;
pub mod order;
pub mod reconcile;
pub mod snapshot;
pub mod status;
pub mod types;

pub use bucket::{Aggregation, Bucket, Holding, UnresolvedHolding, aggregate};
pub use error::GenerateError;
pub use identity::{IdentitySource, SecurityIdentity};
pub use order::{LivePosition, Order, OrderSummary, generate, sort_orders};
pub use reconcile::{
    DataGap, Diagnosis, FailureCause, MatchKind, OrderSubmission, PositionLine,
    SubmissionOutcome, VerificationRecord, VerificationReport, diagnose, reconcile,
};
pub use snapshot::{BrokerMessage, BrokerOrderState, BrokerPosition, BrokerSnapshot};
pub use status::{Lifecycle, OrderStatus};
pub use types::{Action, Quantity, SecurityId};
