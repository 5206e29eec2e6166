//! Interactive Brokers (IBKR) transport, wrapping the TWS/Gateway blocking API.
//!
//! The blocking client answers each request on its own subscription. An actor
//! thread owns the client, executes [`Request`]s from a mailbox and flattens
//! every subscription into one ordered [`Event`] stream, which is what
//! [`Connection`](crate::Connection) consumes.

pub mod client;
pub mod orders;

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use log::debug;

use crate::error::BrokerError;
use crate::transport::{ConnectOptions, Connector, Transport};
use crate::types::{Event, Request};

/// Opens IBKR sessions.
#[derive(Debug, Default, Clone, Copy)]
pub struct IbkrConnector;

impl Connector for IbkrConnector {
    fn open(&self, options: &ConnectOptions) -> Result<Arc<dyn Transport>, BrokerError> {
        let (request_tx, request_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);

        let address = options.address();
        let client_id = options.client_id;
        thread::Builder::new()
            .name("ibkr-actor".into())
            .spawn(move || client::run(&address, client_id, request_rx, event_tx, ready_tx))
            .map_err(|e| BrokerError::Request(format!("failed to start IBKR actor: {e}")))?;

        match ready_rx.recv_timeout(options.timeout) {
            Ok(Ok(())) => Ok(Arc::new(IbkrTransport {
                requests: request_tx,
                events: Mutex::new(event_rx),
            })),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                debug!("IBKR connect did not report back within {:?}", options.timeout);
                Err(BrokerError::Handshake {
                    address: options.address(),
                    timeout: options.timeout,
                })
            }
        }
    }
}

/// Channel pair to the actor thread.
pub struct IbkrTransport {
    requests: Sender<Request>,
    events: Mutex<Receiver<Event>>,
}

impl Transport for IbkrTransport {
    fn send(&self, request: Request) -> Result<(), BrokerError> {
        self.requests.send(request).map_err(|_| BrokerError::Closed)
    }

    fn recv_timeout(&self, timeout: Duration) -> Result<Option<Event>, BrokerError> {
        let events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        match events.recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(BrokerError::Closed),
        }
    }
}
