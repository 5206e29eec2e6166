//! Broker gateway connection manager for rebal.
//!
//! A [`Connection`] owns one gateway session: a [`Transport`] to talk over and
//! a receive loop that turns asynchronous callbacks into shared state.
//! Implementations:
//!
//! - **IBKR** (feature `ibkr`): Interactive Brokers via the TWS/Gateway API
//! - **Mock** ([`mock::MockGateway`]): scripted gateway for tests

pub mod connection;
pub mod error;
pub mod mock;
pub mod transport;
pub mod types;

#[cfg(feature = "ibkr")]
pub mod ibkr;

pub use connection::{Ack, Connection, GatewayState};
pub use error::BrokerError;
pub use transport::{ConnectOptions, Connector, Transport};
pub use types::{ContractSpec, Event, OrderTicket, Request, TimeInForce, is_informational};
