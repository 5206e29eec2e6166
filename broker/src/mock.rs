//! Mock gateway for testing: a [`Connector`] and [`Transport`] that answers
//! requests with scripted callbacks.
//!
//! Use this in integration tests to drive [`Connection`](crate::Connection)
//! without a running gateway.
//!
//! ```
//! use rebal_broker::mock::{FillMode, MockGateway};
//!
//! let gateway = MockGateway::builder()
//!     .fill_mode(FillMode::ImmediateFull)
//!     .fill_mode_for("NVDA", FillMode::Silent)
//!     .with_position("MSFT", 100, 410.0)
//!     .with_account("DU123456")
//!     .build();
//! assert_eq!(gateway.placed_orders().len(), 0);
//! ```

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use rebal::{
    Action, BrokerMessage, BrokerPosition, IdentitySource, OrderStatus, Quantity, SecurityId,
    SecurityIdentity,
};
use rustc_hash::FxHashMap;

use crate::error::BrokerError;
use crate::transport::{ConnectOptions, Connector, Transport};
use crate::types::{ContractSpec, Event, OrderTicket, Request};

/// How the mock gateway answers a placed order.
#[derive(Clone, Debug, PartialEq)]
pub enum FillMode {
    /// Acknowledged and fully filled at once.
    ImmediateFull,
    /// Acknowledged and partially filled (the given fraction, e.g., 0.5 = 50%).
    ImmediatePartial(f64),
    /// Rejected with a protocol error carrying the order id.
    Reject { code: i32, message: String },
    /// Accepted but no callback is sent until an open-order request.
    Silent,
    /// The send itself fails.
    TransportError,
}

impl FillMode {
    pub fn reject(code: i32, message: &str) -> Self {
        FillMode::Reject {
            code,
            message: message.to_string(),
        }
    }
}

/// A mock-side order book entry.
#[derive(Clone, Debug)]
pub struct MockOrder {
    pub order_id: i32,
    pub symbol: SecurityId,
    pub action: Action,
    pub quantity: Quantity,
    pub filled: Quantity,
    pub status: OrderStatus,
}

/// Builder for [`MockGateway`].
pub struct MockGatewayBuilder {
    fill_mode: FillMode,
    per_symbol: FxHashMap<SecurityId, FillMode>,
    positions: Vec<BrokerPosition>,
    account: Option<String>,
    next_valid_id: Option<i32>,
    unreachable: bool,
    orders: Vec<MockOrder>,
    errors: Vec<BrokerMessage>,
    fill_price: f64,
}

impl MockGatewayBuilder {
    pub fn fill_mode(mut self, mode: FillMode) -> Self {
        self.fill_mode = mode;
        self
    }

    /// Override the fill mode for one symbol.
    pub fn fill_mode_for(mut self, symbol: &str, mode: FillMode) -> Self {
        self.per_symbol.insert(SecurityId::new(symbol), mode);
        self
    }

    pub fn with_position(mut self, symbol: &str, quantity: i64, avg_cost: f64) -> Self {
        let mut identity = SecurityIdentity::stock(symbol, "NASDAQ", 0);
        identity.con_id = None;
        identity.source = IdentitySource::Broker;
        self.positions.push(BrokerPosition {
            account: String::new(),
            symbol: SecurityId::new(symbol),
            quantity,
            avg_cost,
            identity,
        });
        self
    }

    pub fn with_account(mut self, account: &str) -> Self {
        self.account = Some(account.to_string());
        self
    }

    /// The gateway never reports a managed account.
    pub fn without_account(mut self) -> Self {
        self.account = None;
        self
    }

    pub fn next_valid_id(mut self, id: i32) -> Self {
        self.next_valid_id = Some(id);
        self
    }

    /// The gateway never assigns an order id.
    pub fn withhold_order_id(mut self) -> Self {
        self.next_valid_id = None;
        self
    }

    /// Every connection attempt is refused.
    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    /// An order the gateway already knows about, e.g. from an earlier session.
    pub fn with_order(
        mut self,
        order_id: i32,
        symbol: &str,
        action: Action,
        quantity: Quantity,
        filled: Quantity,
        status: OrderStatus,
    ) -> Self {
        self.orders.push(MockOrder {
            order_id,
            symbol: SecurityId::new(symbol),
            action,
            quantity,
            filled,
            status,
        });
        self
    }

    /// An error the gateway reports when orders are requested.
    pub fn with_error(mut self, id: Option<i32>, code: i32, message: &str) -> Self {
        self.errors.push(BrokerMessage {
            id,
            code,
            message: message.to_string(),
        });
        self
    }

    pub fn fill_price(mut self, price: f64) -> Self {
        self.fill_price = price;
        self
    }

    pub fn build(self) -> MockGateway {
        let account = self.account.clone().unwrap_or_default();
        let positions = self
            .positions
            .into_iter()
            .map(|mut p| {
                p.account = account.clone();
                p
            })
            .collect();
        let orders = self.orders.into_iter().map(|o| (o.order_id, o)).collect();
        MockGateway {
            inner: Arc::new(Inner {
                config: Config {
                    fill_mode: self.fill_mode,
                    per_symbol: self.per_symbol,
                    account: self.account,
                    next_valid_id: self.next_valid_id,
                    unreachable: self.unreachable,
                    errors: self.errors,
                    fill_price: self.fill_price,
                },
                state: Mutex::new(MockState {
                    outbox: VecDeque::new(),
                    requests: Vec::new(),
                    orders,
                    positions,
                    open: false,
                    connections: 0,
                }),
                ready: Condvar::new(),
            }),
        }
    }
}

struct Config {
    fill_mode: FillMode,
    per_symbol: FxHashMap<SecurityId, FillMode>,
    account: Option<String>,
    next_valid_id: Option<i32>,
    unreachable: bool,
    errors: Vec<BrokerMessage>,
    fill_price: f64,
}

struct MockState {
    outbox: VecDeque<Event>,
    requests: Vec<Request>,
    orders: BTreeMap<i32, MockOrder>,
    positions: Vec<BrokerPosition>,
    open: bool,
    connections: usize,
}

struct Inner {
    config: Config,
    state: Mutex<MockState>,
    ready: Condvar,
}

/// A scripted gateway that records every request it receives.
///
/// Clones share the same state, so a test can keep one handle for
/// assertions while a [`Connection`](crate::Connection) owns the transport.
#[derive(Clone)]
pub struct MockGateway {
    inner: Arc<Inner>,
}

impl MockGateway {
    pub fn builder() -> MockGatewayBuilder {
        MockGatewayBuilder {
            fill_mode: FillMode::ImmediateFull,
            per_symbol: FxHashMap::default(),
            positions: Vec::new(),
            account: Some("DU000001".into()),
            next_valid_id: Some(1),
            unreachable: false,
            orders: Vec::new(),
            errors: Vec::new(),
            fill_price: 100.0,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// All requests received so far, in order.
    pub fn requests(&self) -> Vec<Request> {
        self.lock().requests.clone()
    }

    /// Place-order requests received so far.
    pub fn placed_orders(&self) -> Vec<(i32, ContractSpec, OrderTicket)> {
        self.lock()
            .requests
            .iter()
            .filter_map(|r| match r {
                Request::PlaceOrder {
                    order_id,
                    contract,
                    ticket,
                } => Some((*order_id, contract.clone(), ticket.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn orders(&self) -> Vec<MockOrder> {
        self.lock().orders.values().cloned().collect()
    }

    /// Current mock-side positions, including fills from placed orders.
    pub fn positions(&self) -> Vec<BrokerPosition> {
        self.lock().positions.clone()
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    /// Number of successful connects.
    pub fn connections(&self) -> usize {
        self.lock().connections
    }

    /// Deliver an arbitrary callback, as if the gateway sent it unprompted.
    pub fn inject(&self, event: Event) {
        self.lock().outbox.push_back(event);
        self.inner.ready.notify_all();
    }

    fn mode_for(&self, symbol: &SecurityId) -> FillMode {
        self.inner
            .config
            .per_symbol
            .get(symbol)
            .unwrap_or(&self.inner.config.fill_mode)
            .clone()
    }

    fn place(
        &self,
        state: &mut MockState,
        order_id: i32,
        contract: &ContractSpec,
        ticket: &OrderTicket,
    ) -> Result<(), BrokerError> {
        let symbol = SecurityId::new(&contract.symbol);
        let mode = self.mode_for(&symbol);
        let price = self.inner.config.fill_price;
        let quantity = ticket.quantity;

        let (filled, status) = match &mode {
            FillMode::TransportError => {
                return Err(BrokerError::Request("mock: send failed".into()));
            }
            FillMode::Reject { code, message } => {
                state.outbox.push_back(Event::Error(BrokerMessage {
                    id: Some(order_id),
                    code: *code,
                    message: message.clone(),
                }));
                state
                    .outbox
                    .push_back(status_event(order_id, OrderStatus::Cancelled, 0, quantity, 0.0));
                (0, OrderStatus::Cancelled)
            }
            FillMode::Silent => (0, OrderStatus::PreSubmitted),
            FillMode::ImmediateFull => {
                let outbox = &mut state.outbox;
                outbox.push_back(status_event(order_id, OrderStatus::Submitted, 0, quantity, 0.0));
                let action = ticket.action;
                outbox.push_back(execution_event(order_id, &symbol, action, quantity, price));
                outbox.push_back(status_event(order_id, OrderStatus::Filled, quantity, 0, price));
                (quantity, OrderStatus::Filled)
            }
            FillMode::ImmediatePartial(fraction) => {
                let filled = ((quantity as f64) * fraction.clamp(0.0, 1.0)).floor() as Quantity;
                let (outbox, action) = (&mut state.outbox, ticket.action);
                if filled > 0 {
                    outbox.push_back(execution_event(order_id, &symbol, action, filled, price));
                }
                let remaining = quantity - filled;
                outbox.push_back(status_event(
                    order_id,
                    OrderStatus::Submitted,
                    filled,
                    remaining,
                    price,
                ));
                (filled, OrderStatus::Submitted)
            }
        };

        if filled > 0 {
            let account = self.inner.config.account.clone().unwrap_or_default();
            apply_fill(state, &account, &symbol, ticket.action, filled, price, contract);
        }
        state.orders.insert(
            order_id,
            MockOrder {
                order_id,
                symbol,
                action: ticket.action,
                quantity,
                filled,
                status,
            },
        );
        Ok(())
    }
}

fn status_event(
    order_id: i32,
    status: OrderStatus,
    filled: Quantity,
    remaining: Quantity,
    avg_fill_price: f64,
) -> Event {
    Event::OrderStatus {
        order_id,
        status,
        filled,
        remaining,
        avg_fill_price,
    }
}

fn execution_event(
    order_id: i32,
    symbol: &SecurityId,
    action: Action,
    shares: Quantity,
    price: f64,
) -> Event {
    Event::Execution {
        order_id,
        exec_id: format!("mock.{order_id:08}.01"),
        symbol: symbol.clone(),
        action: Some(action),
        shares,
        price,
    }
}

fn apply_fill(
    state: &mut MockState,
    account: &str,
    symbol: &SecurityId,
    action: Action,
    shares: Quantity,
    price: f64,
    contract: &ContractSpec,
) {
    let signed = match action {
        Action::Buy => shares as i64,
        Action::Sell => -(shares as i64),
    };
    match state.positions.iter_mut().find(|p| &p.symbol == symbol) {
        Some(p) => p.quantity += signed,
        None => state.positions.push(BrokerPosition {
            account: account.to_string(),
            symbol: symbol.clone(),
            quantity: signed,
            avg_cost: price,
            identity: SecurityIdentity {
                ticker: contract.symbol.clone(),
                symbol: symbol.clone(),
                exchange: contract.exchange.clone(),
                primary_exchange: contract.primary_exchange.clone(),
                con_id: contract.con_id,
                currency: contract.currency.clone(),
                source: IdentitySource::Broker,
            },
        }),
    }
}

impl Connector for MockGateway {
    fn open(&self, options: &ConnectOptions) -> Result<Arc<dyn Transport>, BrokerError> {
        if self.inner.config.unreachable {
            return Err(BrokerError::Unreachable {
                address: options.address(),
                reason: "connection refused".into(),
            });
        }

        let mut state = self.lock();
        state.open = true;
        state.connections += 1;
        state.outbox.clear();
        if let Some(id) = self.inner.config.next_valid_id {
            state.outbox.push_back(Event::NextValidId(id));
        }
        if let Some(account) = &self.inner.config.account {
            state
                .outbox
                .push_back(Event::ManagedAccounts(vec![account.clone()]));
        }
        drop(state);
        self.inner.ready.notify_all();

        Ok(Arc::new(self.clone()))
    }
}

impl Transport for MockGateway {
    fn send(&self, request: Request) -> Result<(), BrokerError> {
        let mut guard = self.lock();
        let state = &mut *guard;
        if !state.open {
            return Err(BrokerError::Closed);
        }
        state.requests.push(request.clone());

        match &request {
            Request::PlaceOrder {
                order_id,
                contract,
                ticket,
            } => self.place(state, *order_id, contract, ticket)?,
            Request::CancelOrder { order_id } => {
                if let Some(order) = state.orders.get_mut(order_id) {
                    if !order.status.is_terminal() {
                        order.status = OrderStatus::Cancelled;
                        let event = status_event(
                            order.order_id,
                            OrderStatus::Cancelled,
                            order.filled,
                            order.quantity - order.filled,
                            0.0,
                        );
                        state.outbox.push_back(event);
                    }
                }
            }
            Request::RequestPositions => {
                let positions: Vec<Event> =
                    state.positions.iter().cloned().map(Event::Position).collect();
                state.outbox.extend(positions);
                state.outbox.push_back(Event::PositionEnd);
            }
            Request::RequestOpenOrders => {
                let mut events = Vec::new();
                for order in state.orders.values() {
                    events.push(Event::OpenOrder {
                        order_id: order.order_id,
                        symbol: order.symbol.clone(),
                        action: order.action,
                        total_quantity: order.quantity,
                        status: Some(order.status),
                    });
                    events.push(status_event(
                        order.order_id,
                        order.status,
                        order.filled,
                        order.quantity.saturating_sub(order.filled),
                        if order.filled > 0 { self.inner.config.fill_price } else { 0.0 },
                    ));
                }
                events.extend(self.inner.config.errors.iter().cloned().map(Event::Error));
                state.outbox.extend(events);
                state.outbox.push_back(Event::OpenOrderEnd);
            }
            Request::RequestExecutions => {
                let price = self.inner.config.fill_price;
                let executions: Vec<Event> = state
                    .orders
                    .values()
                    .filter(|o| o.filled > 0)
                    .map(|o| execution_event(o.order_id, &o.symbol, o.action, o.filled, price))
                    .collect();
                state.outbox.extend(executions);
                state.outbox.push_back(Event::ExecutionEnd);
            }
            Request::SubscribeAccountUpdates { .. } => {
                state.outbox.push_back(Event::AccountValue {
                    key: "NetLiquidation".into(),
                    value: "100000.00".into(),
                    currency: "USD".into(),
                });
            }
            Request::CancelSubscriptions => {}
            Request::Close => {
                state.open = false;
            }
        }

        drop(guard);
        self.inner.ready.notify_all();
        Ok(())
    }

    fn recv_timeout(&self, timeout: Duration) -> Result<Option<Event>, BrokerError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if let Some(event) = state.outbox.pop_front() {
                return Ok(Some(event));
            }
            if !state.open {
                return Err(BrokerError::Closed);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            state = match self.inner.ready.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TimeInForce;

    fn options() -> ConnectOptions {
        ConnectOptions {
            host: "127.0.0.1".into(),
            port: 4002,
            client_id: 1,
            timeout: Duration::from_secs(1),
        }
    }

    fn place(gateway: &MockGateway, order_id: i32, symbol: &str, action: Action, qty: Quantity) {
        let contract = ContractSpec::from_identity(&SecurityIdentity::stock(symbol, "NASDAQ", 1));
        gateway
            .send(Request::PlaceOrder {
                order_id,
                contract,
                ticket: OrderTicket {
                    action,
                    quantity: qty,
                    tif: TimeInForce::Day,
                    account: None,
                },
            })
            .unwrap();
    }

    fn drain(gateway: &MockGateway) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(Some(event)) = gateway.recv_timeout(Duration::from_millis(1)) {
            events.push(event);
        }
        events
    }

    #[test]
    fn handshake_events_on_open() {
        let gateway = MockGateway::builder().next_valid_id(42).with_account("DU9").build();
        gateway.open(&options()).unwrap();
        let events = drain(&gateway);
        assert_eq!(
            events,
            vec![
                Event::NextValidId(42),
                Event::ManagedAccounts(vec!["DU9".into()]),
            ]
        );
    }

    #[test]
    fn unreachable_refuses() {
        let gateway = MockGateway::builder().unreachable().build();
        let err = gateway.open(&options()).err().unwrap();
        assert!(matches!(err, BrokerError::Unreachable { .. }));
    }

    #[test]
    fn full_fill_updates_positions() {
        let gateway = MockGateway::builder().with_position("AAPL", 10, 150.0).build();
        gateway.open(&options()).unwrap();
        drain(&gateway);

        place(&gateway, 1, "AAPL", Action::Buy, 20);
        let events = drain(&gateway);
        assert!(events.iter().any(|e| matches!(
            e,
            Event::OrderStatus { status: OrderStatus::Filled, filled: 20, .. }
        )));
        assert_eq!(gateway.positions()[0].quantity, 30);
        assert_eq!(gateway.placed_orders().len(), 1);
    }

    #[test]
    fn reject_sends_error_with_order_id() {
        let gateway = MockGateway::builder()
            .fill_mode(FillMode::reject(201, "Order rejected - reason: no trading permission"))
            .build();
        gateway.open(&options()).unwrap();
        drain(&gateway);

        place(&gateway, 7, "XYZ", Action::Buy, 5);
        let events = drain(&gateway);
        assert!(matches!(&events[0], Event::Error(msg) if msg.id == Some(7) && msg.code == 201));
        assert!(gateway.positions().is_empty());
    }

    #[test]
    fn silent_orders_show_up_in_open_orders() {
        let gateway = MockGateway::builder().fill_mode(FillMode::Silent).build();
        gateway.open(&options()).unwrap();
        drain(&gateway);

        place(&gateway, 3, "NVDA", Action::Sell, 50);
        assert!(drain(&gateway).is_empty());

        gateway.send(Request::RequestOpenOrders).unwrap();
        let events = drain(&gateway);
        assert!(events.iter().any(|e| matches!(
            e,
            Event::OpenOrder { order_id: 3, status: Some(OrderStatus::PreSubmitted), .. }
        )));
        assert_eq!(events.last(), Some(&Event::OpenOrderEnd));
    }

    #[test]
    fn transport_error_fails_send() {
        let gateway = MockGateway::builder()
            .fill_mode_for("BAD", FillMode::TransportError)
            .build();
        gateway.open(&options()).unwrap();
        let contract = ContractSpec::from_identity(&SecurityIdentity::stock("BAD", "NYSE", 2));
        let result = gateway.send(Request::PlaceOrder {
            order_id: 1,
            contract,
            ticket: OrderTicket {
                action: Action::Buy,
                quantity: 1,
                tif: TimeInForce::Day,
                account: None,
            },
        });
        assert!(result.is_err());
    }

    #[test]
    fn close_ends_the_stream() {
        let gateway = MockGateway::builder().build();
        gateway.open(&options()).unwrap();
        drain(&gateway);
        gateway.send(Request::Close).unwrap();
        assert_eq!(gateway.recv_timeout(Duration::from_millis(5)), Err(BrokerError::Closed));
        assert!(gateway.send(Request::RequestPositions).is_err());
    }
}
