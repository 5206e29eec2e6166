//! rebal-rebalancer: rebalancing execution against Interactive Brokers.
//!
//! Reads per-bucket target quantities and resolved identities, diffs them
//! against live holdings into an ordered plan, submits the plan through the
//! gateway, and verifies what the broker reports afterwards. Every step is
//! written to a JSONL audit trail.

pub mod audit;
pub mod broker;
pub mod config;
pub mod error;
pub mod execution;
pub mod input;
pub mod orders_file;
pub mod policy;
pub mod registry;
pub mod status_check;
pub mod workflow;
