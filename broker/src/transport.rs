//! Transport seam between the connection manager and a concrete gateway.

use std::sync::Arc;
use std::time::Duration;

use crate::error::BrokerError;
use crate::types::{Event, Request};

/// One open, bidirectional gateway session.
///
/// `send` never waits for a response; everything the gateway says comes back
/// through `recv_timeout`, in arrival order.
pub trait Transport: Send + Sync {
    fn send(&self, request: Request) -> Result<(), BrokerError>;

    /// Next inbound event, `Ok(None)` if none arrived within `timeout`,
    /// `Err(BrokerError::Closed)` once the session has ended.
    fn recv_timeout(&self, timeout: Duration) -> Result<Option<Event>, BrokerError>;
}

/// Where to connect and how long the handshake may take.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    pub client_id: i32,
    pub timeout: Duration,
}

impl ConnectOptions {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Opens transports. Fails with `Unreachable`/`Handshake` when the gateway
/// cannot be reached.
pub trait Connector {
    fn open(&self, options: &ConnectOptions) -> Result<Arc<dyn Transport>, BrokerError>;
}
