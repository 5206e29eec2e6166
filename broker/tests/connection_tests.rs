//! Connection manager behaviour against the mock gateway.

use std::time::Duration;

use rebal::{Action, OrderStatus, SecurityIdentity};
use rebal_broker::mock::{FillMode, MockGateway};
use rebal_broker::{
    Ack, BrokerError, ConnectOptions, Connection, ContractSpec, OrderTicket, Request, TimeInForce,
};

fn options() -> ConnectOptions {
    ConnectOptions {
        host: "127.0.0.1".into(),
        port: 4002,
        client_id: 7,
        timeout: Duration::from_millis(300),
    }
}

fn ticket(action: Action, quantity: u64) -> OrderTicket {
    OrderTicket {
        action,
        quantity,
        tif: TimeInForce::Day,
        account: None,
    }
}

fn contract(symbol: &str) -> ContractSpec {
    ContractSpec::from_identity(&SecurityIdentity::stock(symbol, "NASDAQ", 1000))
}

#[test]
fn connect_reports_account_and_ids() {
    let gateway = MockGateway::builder().next_valid_id(100).with_account("DU42").build();
    let conn = Connection::connect(&gateway, &options()).unwrap();

    assert_eq!(conn.account().as_deref(), Some("DU42"));
    assert_eq!(conn.next_order_id(), 100);
    assert_eq!(conn.next_order_id(), 101);
}

#[test]
fn unreachable_gateway_fails_fast() {
    let gateway = MockGateway::builder().unreachable().build();
    let err = Connection::connect(&gateway, &options()).err().unwrap();
    assert!(matches!(err, BrokerError::Unreachable { .. }));
}

#[test]
fn missing_order_id_is_distinct_error() {
    let gateway = MockGateway::builder().withhold_order_id().build();
    let err = Connection::connect(&gateway, &options()).err().unwrap();
    assert!(matches!(err, BrokerError::NoOrderId(_)));
}

#[test]
fn missing_account_is_distinct_error() {
    let gateway = MockGateway::builder().without_account().build();
    let err = Connection::connect(&gateway, &options()).err().unwrap();
    assert!(matches!(err, BrokerError::NoAccount(_)));
    // the failed session still shuts its transport
    assert!(!gateway.is_open());
}

#[test]
fn order_ids_strictly_increase_across_placements() {
    let gateway = MockGateway::builder().next_valid_id(5).build();
    let conn = Connection::connect(&gateway, &options()).unwrap();

    let a = conn.place_order(contract("AAPL"), ticket(Action::Buy, 1)).unwrap();
    let b = conn.place_order(contract("MSFT"), ticket(Action::Sell, 2)).unwrap();
    let c = conn.next_order_id();
    assert!(a < b && b < c);
}

#[test]
fn filled_order_acknowledged() {
    let gateway = MockGateway::builder().build();
    let conn = Connection::connect(&gateway, &options()).unwrap();

    let id = conn.place_order(contract("AAPL"), ticket(Action::Buy, 20)).unwrap();
    match conn.await_ack(id, Duration::from_millis(500)) {
        Ack::Status(status) => assert!(matches!(
            status,
            OrderStatus::Submitted | OrderStatus::Filled
        )),
        other => panic!("expected status ack, got {other:?}"),
    }

    let filled = conn.wait_for(Duration::from_millis(500), |s| {
        s.orders.get(&id).and_then(|o| (o.filled == Some(20)).then_some(()))
    });
    assert!(filled.is_some());
}

#[test]
fn rejection_surfaces_as_error_ack() {
    let gateway = MockGateway::builder()
        .fill_mode(FillMode::reject(201, "Order rejected - reason: trading permission"))
        .build();
    let conn = Connection::connect(&gateway, &options()).unwrap();

    let id = conn.place_order(contract("XYZ"), ticket(Action::Buy, 5)).unwrap();
    match conn.await_ack(id, Duration::from_millis(500)) {
        Ack::Error(msg) => assert_eq!(msg.code, 201),
        other => panic!("expected error ack, got {other:?}"),
    }
    assert_eq!(conn.snapshot().errors.len(), 1);
}

#[test]
fn silent_order_is_pending() {
    let gateway = MockGateway::builder().fill_mode(FillMode::Silent).build();
    let conn = Connection::connect(&gateway, &options()).unwrap();

    let id = conn.place_order(contract("NVDA"), ticket(Action::Sell, 50)).unwrap();
    assert_eq!(conn.await_ack(id, Duration::from_millis(100)), Ack::Pending);
}

#[test]
fn positions_wait_for_end_marker() {
    let gateway = MockGateway::builder()
        .with_position("AAPL", 100, 150.0)
        .with_position("MSFT", -5, 400.0)
        .build();
    let conn = Connection::connect(&gateway, &options()).unwrap();

    let positions = conn.positions(Duration::from_millis(500)).unwrap();
    assert_eq!(positions.len(), 2);
    let map = conn.position_map();
    assert_eq!(map[&rebal::SecurityId::new("MSFT")], -5);
    assert!(conn.snapshot().positions_complete);
}

#[test]
fn refresh_collects_open_orders_and_executions() {
    let gateway = MockGateway::builder()
        .with_order(77, "AAPL", Action::Buy, 20, 20, OrderStatus::Filled)
        .build();
    let conn = Connection::connect(&gateway, &options()).unwrap();

    let snapshot = conn.refresh(Duration::from_millis(500)).unwrap();
    let order = &snapshot.orders[&77];
    assert_eq!(order.status, Some(OrderStatus::Filled));
    assert_eq!(order.filled, Some(20));
    assert_eq!(order.action, Some(Action::Buy));
}

#[test]
fn disconnect_cancels_subscriptions_first() {
    let gateway = MockGateway::builder().build();
    let mut conn = Connection::connect(&gateway, &options()).unwrap();
    conn.subscribe_account_updates("DU000001").unwrap();
    conn.disconnect();

    let requests = gateway.requests();
    let cancel = requests
        .iter()
        .position(|r| *r == Request::CancelSubscriptions)
        .unwrap();
    let close = requests.iter().position(|r| *r == Request::Close).unwrap();
    assert!(cancel < close);
    assert!(!gateway.is_open());

    // idempotent
    conn.disconnect();
    assert!(conn.place_order(contract("AAPL"), ticket(Action::Buy, 1)).is_err());
}

#[test]
fn drop_disconnects() {
    let gateway = MockGateway::builder().build();
    {
        let _conn = Connection::connect(&gateway, &options()).unwrap();
        assert!(gateway.is_open());
    }
    assert!(!gateway.is_open());
    assert!(gateway.requests().contains(&Request::CancelSubscriptions));
}

#[test]
fn reconnect_after_disconnect() {
    let gateway = MockGateway::builder().build();
    let mut first = Connection::connect(&gateway, &options()).unwrap();
    first.disconnect();
    let second = Connection::connect(&gateway, &options()).unwrap();
    assert_eq!(gateway.connections(), 2);
    assert!(second.account().is_some());
}
