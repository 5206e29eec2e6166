//! Broker abstraction used by rebalancer execution.

use std::time::Duration;

use rebal::{BrokerPosition, BrokerSnapshot};
use rebal_broker::ibkr::IbkrConnector;
use rebal_broker::{Ack, BrokerError, Connection, Connector, ContractSpec, OrderTicket};

use crate::config::Config;
use crate::error::Result;

pub type BrokerResult<T> = std::result::Result<T, BrokerError>;

/// Minimal broker API needed by the rebalancer runtime.
pub trait BrokerGateway {
    fn account(&self) -> Option<String>;
    fn positions(&self, timeout: Duration) -> BrokerResult<Vec<BrokerPosition>>;
    fn place_order(&self, contract: ContractSpec, ticket: OrderTicket) -> BrokerResult<i32>;
    fn await_ack(&self, order_id: i32, timeout: Duration) -> Ack;
    /// Re-request orders, executions and positions and return what arrived.
    fn refresh(&self, timeout: Duration) -> BrokerResult<BrokerSnapshot>;
    fn subscribe_account_updates(&self, account: &str) -> BrokerResult<()>;
}

impl BrokerGateway for Connection {
    fn account(&self) -> Option<String> {
        Connection::account(self)
    }

    fn positions(&self, timeout: Duration) -> BrokerResult<Vec<BrokerPosition>> {
        Connection::positions(self, timeout)
    }

    fn place_order(&self, contract: ContractSpec, ticket: OrderTicket) -> BrokerResult<i32> {
        Connection::place_order(self, contract, ticket)
    }

    fn await_ack(&self, order_id: i32, timeout: Duration) -> Ack {
        Connection::await_ack(self, order_id, timeout)
    }

    fn refresh(&self, timeout: Duration) -> BrokerResult<BrokerSnapshot> {
        Connection::refresh(self, timeout)
    }

    fn subscribe_account_updates(&self, account: &str) -> BrokerResult<()> {
        Connection::subscribe_account_updates(self, account)
    }
}

/// Open a gateway session with `connector` using the configured endpoint.
pub fn connect_with(connector: &dyn Connector, config: &Config) -> Result<Connection> {
    Ok(Connection::connect(connector, &config.connect_options())?)
}

pub fn connect_ibkr(config: &Config) -> Result<Connection> {
    connect_with(&IbkrConnector, config)
}
