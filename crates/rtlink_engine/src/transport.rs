//! Push transport abstraction.

use crate::config::TransportOptions;
use crate::error::{ClientError, ClientResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Lifecycle and application events fired by a push transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// First connection established.
    Connect,
    /// Connection attempt failed.
    ConnectError(String),
    /// Connection closed, on request or not.
    Disconnect(String),
    /// The transport is retrying on its own.
    Reconnecting,
    /// The transport reconnected on its own.
    Reconnect,
    /// Server broadcast; the payload is a JSON encoded event record.
    Broadcast(String),
    /// Server assigned connection id.
    Uuid(String),
    /// Analytics payload.
    Analytics(Value),
}

/// Receiving end of a transport's events.
pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// An open push transport.
///
/// This trait abstracts the socket library, allowing for different
/// implementations (socket.io adapters, raw WebSocket, mock for testing).
#[async_trait]
pub trait PushTransport: Send + Sync + 'static {
    /// Emits an event and waits for the server acknowledgement arguments.
    async fn emit(&self, event: &str, payload: Value) -> ClientResult<Vec<Value>>;

    /// Closes the connection and stops any internal reconnection.
    ///
    /// A transport that was connected reports the close through
    /// [`TransportEvent::Disconnect`].
    fn disconnect(&self);

    /// Checks if the transport is connected.
    fn is_connected(&self) -> bool;

    /// Kind of the underlying channel (`websocket`, `polling`, ...).
    fn name(&self) -> Option<String> {
        None
    }
}

/// Opens push transports.
pub trait PushConnector: Send + Sync + 'static {
    /// Transport type produced by this connector.
    type Transport: PushTransport;

    /// Opens a transport to `endpoint`; events are delivered on the returned
    /// receiver, starting with `Connect` or `ConnectError`.
    fn open(
        &self,
        endpoint: &str,
        options: &TransportOptions,
    ) -> ClientResult<(Self::Transport, TransportEvents)>;
}

#[derive(Default)]
struct MockState {
    events: Option<mpsc::UnboundedSender<TransportEvent>>,
    connected: bool,
    manual: bool,
    open_error: Option<String>,
    opened: Vec<String>,
    queued_acks: HashMap<String, VecDeque<ClientResult<Vec<Value>>>>,
    acks: HashMap<String, ClientResult<Vec<Value>>>,
    emitted: Vec<(String, Value)>,
}

/// A scriptable connector for testing.
///
/// Clones share state, so a test keeps one clone to drive the "server side"
/// while the client owns another.
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

impl MockConnector {
    /// Creates a connector whose transports connect as soon as they open.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a connector whose transports wait for [`MockConnector::connect`].
    pub fn manual() -> Self {
        let connector = Self::default();
        connector.state.lock().manual = true;
        connector
    }

    /// Makes every following `open` fail.
    pub fn fail_open(&self, message: impl Into<String>) {
        self.state.lock().open_error = Some(message.into());
    }

    /// Sets the acknowledgement returned for every emit of `event`.
    pub fn set_ack(&self, event: &str, args: Vec<Value>) {
        self.state.lock().acks.insert(event.to_string(), Ok(args));
    }

    /// Makes every emit of `event` fail.
    pub fn set_emit_error(&self, event: &str, message: impl Into<String>) {
        self.state
            .lock()
            .acks
            .insert(event.to_string(), Err(ClientError::transport(message)));
    }

    /// Queues a one-shot acknowledgement, used before the default one.
    pub fn push_ack(&self, event: &str, ack: ClientResult<Vec<Value>>) {
        self.state
            .lock()
            .queued_acks
            .entry(event.to_string())
            .or_default()
            .push_back(ack);
    }

    /// Simulates the transport connecting.
    pub fn connect(&self) {
        self.set_connected(true, TransportEvent::Connect);
    }

    /// Simulates the connection dropping without a client request.
    pub fn drop_connection(&self, reason: &str) {
        self.set_connected(false, TransportEvent::Disconnect(reason.to_string()));
    }

    /// Simulates a failed connection attempt.
    pub fn refuse(&self, reason: &str) {
        self.set_connected(false, TransportEvent::ConnectError(reason.to_string()));
    }

    /// Simulates the transport retrying on its own.
    pub fn reconnecting(&self) {
        self.send(TransportEvent::Reconnecting);
    }

    /// Simulates a successful transport-level reconnection.
    pub fn reconnect(&self) {
        self.set_connected(true, TransportEvent::Reconnect);
    }

    /// Sends an arbitrary event to the client.
    pub fn send(&self, event: TransportEvent) {
        if let Some(tx) = &self.state.lock().events {
            let _ = tx.send(event);
        }
    }

    /// Broadcasts a JSON encoded event record.
    pub fn broadcast(&self, payload: &Value) {
        self.send(TransportEvent::Broadcast(payload.to_string()));
    }

    /// Endpoints opened so far.
    pub fn opened(&self) -> Vec<String> {
        self.state.lock().opened.clone()
    }

    /// Every emitted `(event, payload)` pair.
    pub fn emitted(&self) -> Vec<(String, Value)> {
        self.state.lock().emitted.clone()
    }

    /// Number of emits of `event`.
    pub fn emitted_count(&self, event: &str) -> usize {
        self.state
            .lock()
            .emitted
            .iter()
            .filter(|(name, _)| name == event)
            .count()
    }

    /// Checks if the simulated transport is connected.
    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    fn set_connected(&self, connected: bool, event: TransportEvent) {
        let mut state = self.state.lock();
        state.connected = connected;
        if let Some(tx) = &state.events {
            let _ = tx.send(event);
        }
    }
}

impl PushConnector for MockConnector {
    type Transport = MockTransport;

    fn open(
        &self,
        endpoint: &str,
        _options: &TransportOptions,
    ) -> ClientResult<(MockTransport, TransportEvents)> {
        let mut state = self.state.lock();
        if let Some(message) = &state.open_error {
            return Err(ClientError::transport(message.clone()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        state.opened.push(endpoint.to_string());
        state.connected = false;
        if !state.manual {
            state.connected = true;
            let _ = tx.send(TransportEvent::Connect);
        }
        state.events = Some(tx);

        Ok((
            MockTransport {
                state: Arc::clone(&self.state),
            },
            rx,
        ))
    }
}

/// Transport handed out by [`MockConnector`].
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

#[async_trait]
impl PushTransport for MockTransport {
    async fn emit(&self, event: &str, payload: Value) -> ClientResult<Vec<Value>> {
        let mut state = self.state.lock();
        state.emitted.push((event.to_string(), payload));
        if !state.connected {
            return Err(ClientError::NotConnected);
        }
        if let Some(ack) = state
            .queued_acks
            .get_mut(event)
            .and_then(VecDeque::pop_front)
        {
            return ack;
        }
        state
            .acks
            .get(event)
            .cloned()
            .unwrap_or_else(|| Err(ClientError::transport(format!("no ack for `{event}`"))))
    }

    fn disconnect(&self) {
        let mut state = self.state.lock();
        if state.connected {
            state.connected = false;
            if let Some(tx) = &state.events {
                let _ = tx.send(TransportEvent::Disconnect("io client disconnect".into()));
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    fn name(&self) -> Option<String> {
        self.is_connected().then(|| "websocket".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use serde_json::json;

    fn options() -> TransportOptions {
        ClientConfig::default().transport_options()
    }

    #[tokio::test]
    async fn mock_transport_connection() {
        let connector = MockConnector::new();
        let (transport, mut events) = connector.open("wss://push", &options()).unwrap();

        assert!(transport.is_connected());
        assert_eq!(events.recv().await, Some(TransportEvent::Connect));
        assert_eq!(transport.name().as_deref(), Some("websocket"));

        transport.disconnect();
        assert!(!transport.is_connected());
        assert!(matches!(events.recv().await, Some(TransportEvent::Disconnect(_))));
        assert_eq!(connector.opened(), vec!["wss://push".to_string()]);
    }

    #[tokio::test]
    async fn mock_transport_acks() {
        let connector = MockConnector::new();
        let (transport, _events) = connector.open("wss://push", &options()).unwrap();

        connector.set_ack("join", vec![Value::Null, json!(["r1"])]);
        connector.push_ack("join", Err(ClientError::transport("refused")));

        assert!(transport.emit("join", json!({})).await.is_err());
        assert_eq!(
            transport.emit("join", json!({})).await.unwrap(),
            vec![Value::Null, json!(["r1"])]
        );
        assert!(transport.emit("other", json!({})).await.is_err());
        assert_eq!(connector.emitted_count("join"), 2);
    }

    #[tokio::test]
    async fn mock_transport_not_connected_error() {
        let connector = MockConnector::manual();
        let (transport, _events) = connector.open("wss://push", &options()).unwrap();
        assert!(!transport.is_connected());

        let result = transport.emit("join", json!({})).await;
        assert!(matches!(result, Err(ClientError::NotConnected)));
    }

    #[test]
    fn mock_open_failure() {
        let connector = MockConnector::new();
        connector.fail_open("no route");
        assert!(matches!(
            connector.open("wss://push", &options()),
            Err(ClientError::TransportUnavailable(_))
        ));
    }
}
