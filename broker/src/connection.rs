//! Connection manager: one gateway session, one receive loop.
//!
//! The gateway answers requests with asynchronous callbacks and does not
//! pair them with the request that caused them. A dedicated thread reads
//! every inbound [`Event`], folds it into [`GatewayState`] under a mutex and
//! wakes waiters through a condition variable. Callers issue a request, then
//! wait on the state with an explicit deadline; nothing here waits unbounded.

use std::collections::{BTreeMap, HashSet};
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{debug, info, warn};
use rebal::{
    Action, BrokerMessage, BrokerOrderState, BrokerPosition, BrokerSnapshot, OrderStatus,
    Quantity, SecurityId,
};
use rustc_hash::FxHashMap;

use crate::error::BrokerError;
use crate::transport::{ConnectOptions, Connector, Transport};
use crate::types::{ContractSpec, Event, OrderTicket, Request, is_informational};

/// How long the receive loop blocks on the transport before re-checking
/// whether it should stop.
const RECV_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Default)]
struct ExecTally {
    seen: HashSet<String>,
    shares: Quantity,
}

/// Everything the receive loop has learned from the gateway.
#[derive(Debug, Default)]
pub struct GatewayState {
    pub next_valid_id: Option<i32>,
    pub accounts: Vec<String>,
    pub orders: BTreeMap<i32, BrokerOrderState>,
    pub positions: Vec<BrokerPosition>,
    pub positions_complete: bool,
    pub open_orders_complete: bool,
    pub executions_complete: bool,
    pub errors: Vec<BrokerMessage>,
    pub account_values: BTreeMap<String, (String, String)>,
    pub closed: bool,
    collecting_positions: bool,
    pending_positions: Vec<BrokerPosition>,
    executions: FxHashMap<i32, ExecTally>,
}

impl GatewayState {
    /// Fold one callback into the state.
    pub fn apply(&mut self, event: Event) {
        match event {
            Event::NextValidId(id) => {
                self.next_valid_id = Some(self.next_valid_id.map_or(id, |cur| cur.max(id)));
            }
            Event::ManagedAccounts(accounts) => {
                self.accounts = accounts
                    .into_iter()
                    .map(|a| a.trim().to_string())
                    .filter(|a| !a.is_empty())
                    .collect();
            }
            Event::OrderStatus {
                order_id,
                status,
                filled,
                remaining,
                avg_fill_price,
            } => {
                self.observe(BrokerOrderState {
                    filled: Some(filled),
                    remaining: Some(remaining),
                    avg_fill_price: (avg_fill_price > 0.0).then_some(avg_fill_price),
                    status: Some(status),
                    ..BrokerOrderState::new(order_id)
                });
            }
            Event::OpenOrder {
                order_id,
                symbol,
                action,
                total_quantity,
                status,
            } => {
                self.observe(BrokerOrderState {
                    symbol: Some(symbol),
                    action: Some(action),
                    total_quantity: Some(total_quantity),
                    status,
                    ..BrokerOrderState::new(order_id)
                });
            }
            Event::OpenOrderEnd => self.open_orders_complete = true,
            Event::Position(position) => {
                if self.collecting_positions {
                    self.pending_positions.push(position);
                } else {
                    upsert_position(&mut self.positions, position);
                }
            }
            Event::PositionEnd => {
                if self.collecting_positions {
                    self.positions = mem::take(&mut self.pending_positions);
                    self.collecting_positions = false;
                }
                self.positions_complete = true;
            }
            Event::Execution {
                order_id,
                exec_id,
                symbol,
                action,
                shares,
                ..
            } => {
                let tally = self.executions.entry(order_id).or_default();
                if tally.seen.insert(exec_id) {
                    tally.shares += shares;
                }
                let filled = tally.shares;
                self.observe(BrokerOrderState {
                    symbol: Some(symbol),
                    action,
                    filled: Some(filled),
                    ..BrokerOrderState::new(order_id)
                });
            }
            Event::ExecutionEnd => self.executions_complete = true,
            Event::AccountValue {
                key,
                value,
                currency,
            } => {
                self.account_values.insert(key, (value, currency));
            }
            Event::Error(msg) => self.record_error(msg),
            Event::Closed => self.closed = true,
        }
    }

    fn observe(&mut self, observation: BrokerOrderState) {
        self.orders
            .entry(observation.order_id)
            .or_insert_with(|| BrokerOrderState::new(observation.order_id))
            .merge(&observation);
    }

    fn record_error(&mut self, msg: BrokerMessage) {
        if is_informational(msg.code) {
            debug!("Gateway notice {}: {}", msg.code, msg.message);
            return;
        }
        match msg.id {
            Some(id) => warn!("Gateway error {} (id={id}): {}", msg.code, msg.message),
            None => warn!("Gateway error {}: {}", msg.code, msg.message),
        }
        if let Some(order) = msg.id.and_then(|id| self.orders.get_mut(&id)) {
            order.last_error = Some(msg.clone());
        }
        if !self.errors.contains(&msg) {
            self.errors.push(msg);
        }
    }

    fn begin_positions(&mut self) {
        self.collecting_positions = true;
        self.pending_positions.clear();
    }

    /// Latest error reported against an order id.
    pub fn error_for(&self, order_id: i32) -> Option<&BrokerMessage> {
        self.errors.iter().rev().find(|e| e.id == Some(order_id))
    }

    pub fn snapshot(&self) -> BrokerSnapshot {
        BrokerSnapshot {
            account: self.accounts.first().cloned(),
            orders: self.orders.clone(),
            positions: self.positions.clone(),
            // mid-dump `positions` still holds the previous set
            positions_complete: self.positions_complete && !self.collecting_positions,
            errors: self.errors.clone(),
            captured_at: Utc::now(),
        }
    }
}

fn upsert_position(positions: &mut Vec<BrokerPosition>, position: BrokerPosition) {
    match positions
        .iter_mut()
        .find(|p| p.account == position.account && p.symbol == position.symbol)
    {
        Some(existing) => *existing = position,
        None => positions.push(position),
    }
}

/// What arrived while waiting for an order acknowledgment.
#[derive(Debug, Clone, PartialEq)]
pub enum Ack {
    Status(OrderStatus),
    Error(BrokerMessage),
    /// No callback within the wait window.
    Pending,
}

struct Shared {
    state: Mutex<GatewayState>,
    changed: Condvar,
    running: AtomicBool,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, GatewayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A live gateway session.
///
/// Dropping the connection disconnects it.
pub struct Connection {
    transport: Arc<dyn Transport>,
    shared: Arc<Shared>,
    reader: Option<JoinHandle<()>>,
    next_id: Mutex<Option<i32>>,
    address: String,
}

impl Connection {
    /// Open a transport through `connector` and complete the handshake.
    ///
    /// Fails if the gateway is unreachable, or if it is reached but no order
    /// id or no account identity arrives within `options.timeout`.
    pub fn connect(
        connector: &dyn Connector,
        options: &ConnectOptions,
    ) -> Result<Self, BrokerError> {
        info!(
            "Connecting to gateway at {} (client_id={})...",
            options.address(),
            options.client_id
        );
        let transport = connector.open(options)?;
        Self::open(transport, options.address(), options.timeout)
    }

    /// Start the receive loop on an already-open transport and wait for the
    /// handshake facts (next valid order id, managed account).
    pub fn open(
        transport: Arc<dyn Transport>,
        address: String,
        timeout: Duration,
    ) -> Result<Self, BrokerError> {
        let shared = Arc::new(Shared {
            state: Mutex::new(GatewayState::default()),
            changed: Condvar::new(),
            running: AtomicBool::new(true),
        });

        let reader = {
            let transport = Arc::clone(&transport);
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("gateway-recv".into())
                .spawn(move || receive_loop(transport, shared))
                .map_err(|e| BrokerError::Request(format!("failed to start receive loop: {e}")))?
        };

        let conn = Connection {
            transport,
            shared,
            reader: Some(reader),
            next_id: Mutex::new(None),
            address,
        };

        let deadline = Instant::now() + timeout;

        let Some(first_id) = conn.wait_until(deadline, |s| s.next_valid_id) else {
            if conn.is_closed() {
                return Err(BrokerError::Handshake {
                    address: conn.address.clone(),
                    timeout,
                });
            }
            return Err(BrokerError::NoOrderId(timeout));
        };
        *conn.next_id.lock().unwrap_or_else(PoisonError::into_inner) = Some(first_id);

        let Some(account) = conn.wait_until(deadline, |s| s.accounts.first().cloned()) else {
            return Err(BrokerError::NoAccount(timeout));
        };

        info!(
            "Connected to {} (account={account}, next order id={first_id})",
            conn.address
        );
        Ok(conn)
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// First managed account reported by the gateway.
    pub fn account(&self) -> Option<String> {
        self.shared.lock().accounts.first().cloned()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Wait until `f` yields a value or `deadline` passes.
    ///
    /// Returns early with `None` if the connection closes.
    pub fn wait_until<T>(
        &self,
        deadline: Instant,
        mut f: impl FnMut(&GatewayState) -> Option<T>,
    ) -> Option<T> {
        let mut state = self.shared.lock();
        loop {
            if let Some(value) = f(&state) {
                return Some(value);
            }
            if state.closed {
                return None;
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            state = match self.shared.changed.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    pub fn wait_for<T>(
        &self,
        timeout: Duration,
        f: impl FnMut(&GatewayState) -> Option<T>,
    ) -> Option<T> {
        self.wait_until(Instant::now() + timeout, f)
    }

    /// Allocate the next order id. Strictly increasing for the session.
    pub fn next_order_id(&self) -> i32 {
        let floor = self.shared.lock().next_valid_id;
        let mut next = self.next_id.lock().unwrap_or_else(PoisonError::into_inner);
        let id = match (*next, floor) {
            (Some(local), Some(gateway)) => local.max(gateway),
            (Some(local), None) => local,
            (None, Some(gateway)) => gateway,
            (None, None) => 1,
        };
        *next = Some(id + 1);
        id
    }

    /// Send an order and return its id. Does not wait for a callback.
    pub fn place_order(
        &self,
        contract: ContractSpec,
        ticket: OrderTicket,
    ) -> Result<i32, BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }
        let order_id = self.next_order_id();
        debug!(
            "Placing order {order_id}: {} {} {contract} ({})",
            ticket.action, ticket.quantity, ticket.tif
        );
        self.transport.send(Request::PlaceOrder {
            order_id,
            contract,
            ticket,
        })?;
        Ok(order_id)
    }

    /// Wait up to `timeout` for a status or error callback for `order_id`.
    pub fn await_ack(&self, order_id: i32, timeout: Duration) -> Ack {
        self.wait_for(timeout, |s| {
            if let Some(err) = s.error_for(order_id) {
                return Some(Ack::Error(err.clone()));
            }
            s.orders
                .get(&order_id)
                .and_then(|o| o.status)
                .map(Ack::Status)
        })
        .unwrap_or(Ack::Pending)
    }

    pub fn cancel_order(&self, order_id: i32) -> Result<(), BrokerError> {
        self.transport.send(Request::CancelOrder { order_id })
    }

    pub fn request_positions(&self) -> Result<(), BrokerError> {
        self.shared.lock().begin_positions();
        self.transport.send(Request::RequestPositions)
    }

    pub fn request_open_orders(&self) -> Result<(), BrokerError> {
        self.shared.lock().open_orders_complete = false;
        self.transport.send(Request::RequestOpenOrders)
    }

    pub fn request_executions(&self) -> Result<(), BrokerError> {
        self.shared.lock().executions_complete = false;
        self.transport.send(Request::RequestExecutions)
    }

    pub fn subscribe_account_updates(&self, account: &str) -> Result<(), BrokerError> {
        self.transport.send(Request::SubscribeAccountUpdates {
            account: account.to_string(),
        })
    }

    /// Request a full position dump and wait for its end marker.
    pub fn positions(&self, timeout: Duration) -> Result<Vec<BrokerPosition>, BrokerError> {
        self.request_positions()?;
        self.wait_for(timeout, |s| {
            (s.positions_complete && !s.collecting_positions).then(|| s.positions.clone())
        })
        .ok_or_else(|| self.wait_error(timeout, "position end"))
    }

    /// Request orders, executions and positions, then wait for all three
    /// end markers (or the timeout) and return what arrived.
    pub fn refresh(&self, timeout: Duration) -> Result<BrokerSnapshot, BrokerError> {
        self.request_open_orders()?;
        self.request_executions()?;
        self.request_positions()?;
        let complete = self.wait_for(timeout, |s| {
            (s.open_orders_complete && s.executions_complete && !s.collecting_positions)
                .then_some(())
        });
        if complete.is_none() {
            if self.is_closed() {
                return Err(BrokerError::Closed);
            }
            debug!("Refresh incomplete after {timeout:?}; using partial state");
        }
        Ok(self.snapshot())
    }

    /// Copy of everything observed so far.
    pub fn snapshot(&self) -> BrokerSnapshot {
        self.shared.lock().snapshot()
    }

    /// Summed live quantity per symbol, for quick display.
    pub fn position_map(&self) -> BTreeMap<SecurityId, i64> {
        let state = self.shared.lock();
        let mut map = BTreeMap::new();
        for p in &state.positions {
            *map.entry(p.symbol.clone()).or_insert(0) += p.quantity;
        }
        map
    }

    /// Orders seen for a symbol and direction.
    pub fn orders_for(&self, symbol: &SecurityId, action: Action) -> Vec<BrokerOrderState> {
        self.shared
            .lock()
            .orders
            .values()
            .filter(|o| o.symbol.as_ref() == Some(symbol) && o.action == Some(action))
            .cloned()
            .collect()
    }

    fn wait_error(&self, timeout: Duration, what: &'static str) -> BrokerError {
        if self.is_closed() {
            BrokerError::Closed
        } else {
            BrokerError::Timeout(timeout, what)
        }
    }

    /// Cancel feeds, close the transport and stop the receive loop.
    ///
    /// Feeds are always cancelled first so that a reconnect with the same
    /// client id does not inherit server-side subscriptions. Idempotent.
    pub fn disconnect(&mut self) {
        let Some(reader) = self.reader.take() else {
            return;
        };

        if let Err(e) = self.transport.send(Request::CancelSubscriptions) {
            debug!("Cancelling subscriptions failed: {e}");
        }
        if let Err(e) = self.transport.send(Request::Close) {
            debug!("Close request failed: {e}");
        }

        self.shared.running.store(false, Ordering::Release);
        self.shared.changed.notify_all();
        if reader.join().is_err() {
            warn!("Receive loop for {} panicked", self.address);
        }
        info!("Disconnected from {}", self.address);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn receive_loop(transport: Arc<dyn Transport>, shared: Arc<Shared>) {
    while shared.running.load(Ordering::Acquire) {
        match transport.recv_timeout(RECV_POLL) {
            Ok(Some(event)) => {
                shared.lock().apply(event);
                shared.changed.notify_all();
            }
            Ok(None) => {}
            Err(e) => {
                debug!("Receive loop ending: {e}");
                break;
            }
        }
    }
    shared.lock().closed = true;
    shared.changed.notify_all();
}

#[cfg(test)]
mod tests {
    use super::*;
    use rebal::SecurityIdentity;

    fn position(symbol: &str, qty: i64) -> BrokerPosition {
        BrokerPosition {
            account: "DU1".into(),
            symbol: SecurityId::new(symbol),
            quantity: qty,
            avg_cost: 100.0,
            identity: SecurityIdentity::stock(symbol, "NASDAQ", 1),
        }
    }

    #[test]
    fn next_valid_id_only_moves_up() {
        let mut state = GatewayState::default();
        state.apply(Event::NextValidId(10));
        state.apply(Event::NextValidId(4));
        assert_eq!(state.next_valid_id, Some(10));
    }

    #[test]
    fn status_and_open_order_merge_per_id() {
        let mut state = GatewayState::default();
        state.apply(Event::OrderStatus {
            order_id: 5,
            status: OrderStatus::Submitted,
            filled: 0,
            remaining: 20,
            avg_fill_price: 0.0,
        });
        state.apply(Event::OpenOrder {
            order_id: 5,
            symbol: SecurityId::new("AAPL"),
            action: Action::Buy,
            total_quantity: 20,
            status: None,
        });
        let order = &state.orders[&5];
        assert_eq!(order.status, Some(OrderStatus::Submitted));
        assert_eq!(order.symbol, Some(SecurityId::new("AAPL")));
        assert_eq!(order.avg_fill_price, None);
    }

    #[test]
    fn position_dump_replaces_on_end() {
        let mut state = GatewayState::default();
        state.apply(Event::Position(position("OLD", 1)));
        assert_eq!(state.positions.len(), 1);

        state.begin_positions();
        state.apply(Event::Position(position("AAPL", 80)));
        assert_eq!(state.positions[0].symbol.as_str(), "OLD");
        state.apply(Event::PositionEnd);
        assert!(state.positions_complete);
        assert_eq!(state.positions.len(), 1);
        assert_eq!(state.positions[0].symbol.as_str(), "AAPL");

        // live update after the dump
        state.apply(Event::Position(position("AAPL", 100)));
        assert_eq!(state.positions[0].quantity, 100);
    }

    #[test]
    fn snapshot_incomplete_while_dump_in_flight() {
        let mut state = GatewayState::default();
        state.apply(Event::Position(position("AAPL", 80)));
        state.apply(Event::PositionEnd);
        assert!(state.snapshot().positions_complete);

        state.begin_positions();
        state.apply(Event::Position(position("AAPL", 20)));
        let snap = state.snapshot();
        assert!(!snap.positions_complete);
        assert_eq!(snap.positions[0].quantity, 80);

        state.apply(Event::PositionEnd);
        let snap = state.snapshot();
        assert!(snap.positions_complete);
        assert_eq!(snap.positions[0].quantity, 20);
    }

    #[test]
    fn duplicate_executions_counted_once() {
        let mut state = GatewayState::default();
        let exec = |id: &str, shares| Event::Execution {
            order_id: 9,
            exec_id: id.into(),
            symbol: SecurityId::new("MSFT"),
            action: Some(Action::Sell),
            shares,
            price: 410.0,
        };
        state.apply(exec("e1", 10));
        state.apply(exec("e2", 15));
        state.apply(exec("e1", 10));
        assert_eq!(state.orders[&9].filled, Some(25));
    }

    #[test]
    fn informational_errors_not_recorded() {
        let mut state = GatewayState::default();
        state.apply(Event::Error(BrokerMessage {
            id: None,
            code: 2104,
            message: "Market data farm connection is OK".into(),
        }));
        assert!(state.errors.is_empty());

        let rejected = BrokerMessage {
            id: Some(3),
            code: 201,
            message: "Order rejected".into(),
        };
        state.apply(Event::Error(rejected.clone()));
        state.apply(Event::Error(rejected.clone()));
        assert_eq!(state.errors.len(), 1);
        assert_eq!(state.error_for(3), Some(&rejected));
    }

    #[test]
    fn snapshot_copies_state() {
        let mut state = GatewayState::default();
        state.apply(Event::ManagedAccounts(vec![" DU123 ".into(), String::new()]));
        state.apply(Event::Position(position("AAPL", 5)));
        let snap = state.snapshot();
        assert_eq!(snap.account.as_deref(), Some("DU123"));
        assert_eq!(snap.positions.len(), 1);
    }
}
