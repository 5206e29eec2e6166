//! Broker error types.

use std::time::Duration;

/// Errors that can occur talking to the broker gateway.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    #[error("gateway unreachable at {address}: {reason}")]
    Unreachable { address: String, reason: String },

    #[error("handshake with {address} did not complete within {timeout:?}")]
    Handshake { address: String, timeout: Duration },

    #[error("gateway reached but no valid order id was assigned within {0:?}")]
    NoOrderId(Duration),

    #[error("gateway reached but no account identity arrived within {0:?}")]
    NoAccount(Duration),

    #[error("connection closed")]
    Closed,

    #[error("not connected")]
    NotConnected,

    #[error("timed out after {0:?} waiting for {1}")]
    Timeout(Duration, &'static str),

    #[error("order error: {0}")]
    Order(String),

    #[error("request failed: {0}")]
    Request(String),
}

impl BrokerError {
    /// Whether the error means the connection itself is unusable.
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            BrokerError::Unreachable { .. }
                | BrokerError::Handshake { .. }
                | BrokerError::NoOrderId(_)
                | BrokerError::NoAccount(_)
                | BrokerError::Closed
                | BrokerError::NotConnected
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_and_no_account_are_distinguishable() {
        let unreachable = BrokerError::Unreachable {
            address: "127.0.0.1:4002".into(),
            reason: "connection refused".into(),
        };
        let no_account = BrokerError::NoAccount(Duration::from_secs(5));

        assert!(unreachable.to_string().contains("unreachable"));
        assert!(no_account.to_string().contains("no account identity"));
        assert!(unreachable.is_connection());
        assert!(no_account.is_connection());
        assert!(!BrokerError::Order("x".into()).is_connection());
    }
}
