//! Errors raised by the deterministic core.

use crate::types::SecurityId;

/// Order generation failed for the whole plan.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum GenerateError {
    /// A security needs an order but neither the upstream identity table nor
    /// the broker-reported positions describe its contract.
    #[error("no broker identity for {0}")]
    MissingIdentity(SecurityId),

    /// Two live positions claim the same symbol with different contract ids.
    #[error("conflicting broker contracts for {symbol}: {first} vs {second}")]
    ConflictingContract {
        symbol: SecurityId,
        first: i32,
        second: i32,
    },
}
