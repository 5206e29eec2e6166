//! Actor loop owning the ibapi blocking client.

use std::sync::mpsc::{Receiver, Sender, SyncSender, TryRecvError};
use std::thread;
use std::time::Duration;

use ibapi::accounts::types::AccountGroup;
use ibapi::accounts::{AccountSummaryResult, PositionUpdate};
use ibapi::client::blocking::Client;
use ibapi::orders::{CancelOrder, ExecutionFilter, Executions, Orders, PlaceOrder};
use log::{debug, info, warn};
use rebal::{Action, BrokerMessage, BrokerPosition, IdentitySource, SecurityId, SecurityIdentity};

use super::orders;
use crate::error::BrokerError;
use crate::types::{Event, Request};

/// Sleep between mailbox polls when nothing arrived.
const IDLE: Duration = Duration::from_millis(10);

const ACCOUNT_TAGS: &[&str] = &["NetLiquidation", "TotalCashValue", "BuyingPower"];

/// A live order subscription, polled without blocking. Returns `false` once
/// the event receiver is gone.
type Feed<'a> = Box<dyn FnMut(&Sender<Event>) -> bool + 'a>;

/// Connect, report readiness, then serve requests until `Close` or until the
/// transport is dropped.
pub(crate) fn run(
    address: &str,
    client_id: i32,
    requests: Receiver<Request>,
    events: Sender<Event>,
    ready: SyncSender<Result<(), BrokerError>>,
) {
    info!("Connecting to IB Gateway at {address}...");
    let client = match Client::connect(address, client_id) {
        Ok(client) => client,
        Err(e) => {
            let _ = ready.send(Err(BrokerError::Unreachable {
                address: address.to_string(),
                reason: e.to_string(),
            }));
            return;
        }
    };
    if ready.send(Ok(())).is_err() {
        debug!("Connect result abandoned; closing {address}");
        return;
    }
    info!("Connected (client_id={client_id})");

    handshake(&client, &events);

    let mut feeds: Vec<Feed<'_>> = Vec::new();
    loop {
        let mut busy = false;
        loop {
            match requests.try_recv() {
                Ok(Request::Close) => {
                    info!("Closing IB Gateway session {address}");
                    return;
                }
                Ok(request) => {
                    busy = true;
                    handle(&client, request, &events, &mut feeds);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return,
            }
        }

        feeds.retain_mut(|feed| feed(&events));

        if !busy {
            thread::sleep(IDLE);
        }
    }
}

fn emit(events: &Sender<Event>, event: Event) {
    if events.send(event).is_err() {
        debug!("Event receiver gone; dropping event");
    }
}

fn handshake(client: &Client, events: &Sender<Event>) {
    match client.next_valid_order_id() {
        Ok(id) => emit(events, Event::NextValidId(id)),
        Err(e) => warn!("No valid order id from gateway: {e}"),
    }
    match client.managed_accounts() {
        Ok(accounts) => emit(events, Event::ManagedAccounts(accounts)),
        Err(e) => warn!("No managed accounts from gateway: {e}"),
    }
}

fn handle<'a>(
    client: &'a Client,
    request: Request,
    events: &Sender<Event>,
    feeds: &mut Vec<Feed<'a>>,
) {
    match request {
        Request::PlaceOrder {
            order_id,
            contract,
            ticket,
        } => {
            let ib_contract = orders::contract(&contract);
            let ib_order = orders::market(&ticket);
            info!(
                "Submitting: {} {} {contract} {} (id={order_id})",
                ticket.action, ticket.quantity, ticket.tif
            );
            match client.place_order(order_id, &ib_contract, &ib_order) {
                Ok(subscription) => feeds.push(Box::new(move |tx: &Sender<Event>| {
                    while let Some(response) = subscription.try_next() {
                        if let Some(event) = place_order_event(order_id, response) {
                            if tx.send(event).is_err() {
                                return false;
                            }
                        }
                    }
                    true
                })),
                Err(e) => emit(
                    events,
                    Event::Error(BrokerMessage {
                        id: Some(order_id),
                        code: -1,
                        message: format!("failed to place order {order_id}: {e}"),
                    }),
                ),
            }
        }
        Request::CancelOrder { order_id } => {
            info!("Cancelling order {order_id}");
            match client.cancel_order(order_id, "") {
                Ok(subscription) => feeds.push(Box::new(move |tx: &Sender<Event>| {
                    while let Some(response) = subscription.try_next() {
                        let event = match response {
                            CancelOrder::OrderStatus(s) => Event::OrderStatus {
                                order_id,
                                status: orders::status(&s.status),
                                filled: orders::shares(s.filled),
                                remaining: orders::shares(s.remaining),
                                avg_fill_price: s.average_fill_price,
                            },
                            CancelOrder::Notice(notice) => Event::Error(BrokerMessage {
                                id: Some(order_id),
                                code: notice.code,
                                message: notice.message.clone(),
                            }),
                        };
                        if tx.send(event).is_err() {
                            return false;
                        }
                    }
                    true
                })),
                Err(e) => warn!("Failed to cancel order {order_id}: {e}"),
            }
        }
        Request::RequestPositions => {
            match client.positions() {
                Ok(subscription) => {
                    for update in subscription {
                        match update {
                            PositionUpdate::Position(pos) => {
                                let symbol = pos.contract.symbol.to_string();
                                let exchange = pos.contract.exchange.to_string();
                                let primary = Some(pos.contract.primary_exchange.to_string())
                                    .filter(|p| !p.is_empty());
                                let con_id = pos.contract.contract_id;
                                debug!(
                                    "Position: {symbol} qty={} avg_cost={:.2}",
                                    pos.position, pos.average_cost
                                );
                                emit(
                                    events,
                                    Event::Position(BrokerPosition {
                                        account: pos.account.clone(),
                                        symbol: SecurityId::new(&symbol),
                                        quantity: pos.position.round() as i64,
                                        avg_cost: pos.average_cost,
                                        identity: SecurityIdentity {
                                            ticker: symbol.clone(),
                                            symbol: SecurityId::new(&symbol),
                                            exchange: if exchange.is_empty() {
                                                "SMART".into()
                                            } else {
                                                exchange
                                            },
                                            primary_exchange: primary,
                                            con_id: (con_id > 0).then_some(con_id),
                                            currency: pos.contract.currency.to_string(),
                                            source: IdentitySource::Broker,
                                        },
                                    }),
                                );
                            }
                            PositionUpdate::PositionEnd => break,
                        }
                    }
                }
                Err(e) => warn!("Failed to request positions: {e}"),
            }
            emit(events, Event::PositionEnd);
        }
        Request::RequestOpenOrders => {
            match client.all_open_orders() {
                Ok(subscription) => {
                    for item in subscription {
                        match item {
                            Orders::OrderData(data) => emit(
                                events,
                                Event::OpenOrder {
                                    order_id: data.order_id,
                                    symbol: SecurityId::new(&data.contract.symbol.to_string()),
                                    action: orders::from_ib_action(&data.order.action),
                                    total_quantity: orders::shares(data.order.total_quantity),
                                    status: Some(orders::status(&data.order_state.status)),
                                },
                            ),
                            Orders::OrderStatus(s) => emit(
                                events,
                                Event::OrderStatus {
                                    order_id: s.order_id,
                                    status: orders::status(&s.status),
                                    filled: orders::shares(s.filled),
                                    remaining: orders::shares(s.remaining),
                                    avg_fill_price: s.average_fill_price,
                                },
                            ),
                            Orders::Notice(notice) => emit(
                                events,
                                Event::Error(BrokerMessage {
                                    id: None,
                                    code: notice.code,
                                    message: notice.message.clone(),
                                }),
                            ),
                        }
                    }
                }
                Err(e) => warn!("Failed to request open orders: {e}"),
            }
            emit(events, Event::OpenOrderEnd);
        }
        Request::RequestExecutions => {
            match client.executions(ExecutionFilter::default()) {
                Ok(subscription) => {
                    for item in subscription {
                        if let Executions::ExecutionData(data) = item {
                            emit(
                                events,
                                Event::Execution {
                                    order_id: data.execution.order_id,
                                    exec_id: data.execution.execution_id.clone(),
                                    symbol: SecurityId::new(&data.contract.symbol.to_string()),
                                    action: Action::parse(&data.execution.side),
                                    shares: orders::shares(data.execution.shares),
                                    price: data.execution.price,
                                },
                            );
                        }
                    }
                }
                Err(e) => warn!("Failed to request executions: {e}"),
            }
            emit(events, Event::ExecutionEnd);
        }
        Request::SubscribeAccountUpdates { account } => {
            debug!("Account summary for {account}");
            let group = AccountGroup("All".to_string());
            match client.account_summary(&group, ACCOUNT_TAGS) {
                Ok(subscription) => {
                    for result in subscription {
                        match result {
                            AccountSummaryResult::Summary(s) => emit(
                                events,
                                Event::AccountValue {
                                    key: s.tag.clone(),
                                    value: s.value.clone(),
                                    currency: s.currency.clone(),
                                },
                            ),
                            AccountSummaryResult::End => break,
                        }
                    }
                }
                Err(e) => warn!("Failed to request account summary: {e}"),
            }
        }
        Request::CancelSubscriptions => {
            debug!("Dropping {} order feeds", feeds.len());
            feeds.clear();
        }
        Request::Close => {}
    }
}

fn place_order_event(order_id: i32, response: PlaceOrder) -> Option<Event> {
    match response {
        PlaceOrder::OrderStatus(status) => {
            debug!(
                "Order {order_id} status: {} filled={} remaining={}",
                status.status, status.filled, status.remaining
            );
            Some(Event::OrderStatus {
                order_id,
                status: orders::status(&status.status),
                filled: orders::shares(status.filled),
                remaining: orders::shares(status.remaining),
                avg_fill_price: status.average_fill_price,
            })
        }
        PlaceOrder::ExecutionData(exec) => {
            debug!(
                "Execution: {} shares @ ${:.2}",
                exec.execution.shares, exec.execution.price
            );
            Some(Event::Execution {
                order_id,
                exec_id: exec.execution.execution_id.clone(),
                symbol: SecurityId::new(&exec.contract.symbol.to_string()),
                action: Action::parse(&exec.execution.side),
                shares: orders::shares(exec.execution.shares),
                price: exec.execution.price,
            })
        }
        PlaceOrder::Message(notice) => Some(Event::Error(BrokerMessage {
            id: Some(order_id),
            code: notice.code,
            message: notice.message.clone(),
        })),
        _ => None,
    }
}
