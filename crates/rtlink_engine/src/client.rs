//! The realtime client: push session, rejoin and shared event admission.
//!
//! ## Architecture
//!
//! Events reach the client through two paths:
//! 1. The push transport broadcasts them as they happen
//! 2. The polling loop fetches them over HTTP, sparsely while push is up
//!    and at full cadence while it is down
//!
//! Both paths feed the same [`EventLedger`], so an event delivered twice, or
//! an entity update older than one already seen, never reaches the
//! application.
//!
//! ## Key Invariants
//!
//! - Side effects of a state change run only when the state tuple changed
//! - No lock is held across an await. The only lock held while listeners
//!   run is the reentrant dispatch lock, which keeps `state` notifications
//!   in transition order
//! - Completions started before a `disconnect()` are discarded

use crate::config::{ClientConfig, ClientOptions};
use crate::error::{ClientError, ClientResult};
use crate::events::{EventBus, ListenerId, Notification};
use crate::http::{ApiClient, ApiEndpoint, HttpClient};
use crate::ledger::EventLedger;
use crate::polling::PullSummary;
use crate::promises::{Operation, OperationName, PromiseRegistry};
use crate::state::{
    ConnectionStateMachine, ConnectionStates, DerivedState, PollState, PushState, SubState,
    Transition,
};
use crate::timer::TimerSlot;
use crate::transport::{PushConnector, PushTransport, TransportEvent, TransportEvents};
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use rtlink_protocol::{now_millis, AnalyticsAck, EventRecord, JoinAck, JoinParams, PongAck, Via};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Per-session data, reset by `disconnect()`.
pub(crate) struct Session<T> {
    pub(crate) ledger: EventLedger,
    pub(crate) rooms: BTreeSet<String>,
    pub(crate) analytics: BTreeSet<String>,
    pub(crate) watermark: Option<i64>,
    pub(crate) offline_context: Option<JoinParams>,
    pub(crate) uuid: Option<String>,
    pub(crate) transport: Option<Arc<T>>,
    pub(crate) pull: Option<Operation<PullSummary>>,
}

impl<T> Session<T> {
    fn new() -> Self {
        Self {
            ledger: EventLedger::new(),
            rooms: BTreeSet::new(),
            analytics: BTreeSet::new(),
            watermark: None,
            offline_context: None,
            uuid: None,
            transport: None,
            pull: None,
        }
    }

    fn room_list(&self) -> Vec<String> {
        self.rooms.iter().cloned().collect()
    }

    /// Seeds the watermark if no server time was recorded yet.
    fn seed_watermark(&mut self, server_time: Option<i64>) {
        if self.watermark.is_none() {
            self.watermark = server_time;
        }
    }
}

pub(crate) struct Inner<P: PushConnector, H: HttpClient> {
    pub(crate) config: RwLock<ClientConfig>,
    connector: P,
    pub(crate) api: ApiClient<H>,
    pub(crate) bus: Arc<EventBus>,
    machine: Mutex<ConnectionStateMachine>,
    dispatch: ReentrantMutex<()>,
    registry: Mutex<PromiseRegistry>,
    pub(crate) session: Mutex<Session<P::Transport>>,
    epoch: AtomicU64,
    pump: TimerSlot,
    rejoin: TimerSlot,
    pub(crate) poll: TimerSlot,
    inactivity: TimerSlot,
}

impl<P: PushConnector, H: HttpClient> Inner<P, H> {
    pub(crate) fn states(&self) -> ConnectionStates {
        self.machine.lock().states()
    }

    pub(crate) fn state(&self) -> DerivedState {
        self.machine.lock().state()
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub(crate) fn endpoint(&self) -> ApiEndpoint {
        ApiEndpoint::from_config(&self.config.read())
    }

    fn transport(&self) -> Option<Arc<P::Transport>> {
        self.session.lock().transport.clone()
    }

    fn has_token(&self) -> bool {
        self.config.read().api_token.is_some()
    }

    // ---- state ----------------------------------------------------------

    pub(crate) fn set_state(self: &Arc<Self>, value: SubState) {
        let transition = self.transition(|machine| machine.set(value));
        self.react(transition);
    }

    pub(crate) fn set_states(self: &Arc<Self>, states: ConnectionStates) {
        let transition = self.transition(|machine| machine.apply(states));
        self.react(transition);
    }

    /// Applies `change` and publishes the derived state under the dispatch
    /// lock, so concurrent changes are observed in the order they happened.
    fn transition(
        &self,
        change: impl FnOnce(&mut ConnectionStateMachine) -> Option<Transition>,
    ) -> Option<Transition> {
        let _dispatch = self.dispatch.lock();
        let transition = change(&mut *self.machine.lock())?;
        debug!(states = %transition.current, "connection states changed");
        if let Some((current, previous)) = transition.derived_change {
            self.bus.trigger(&Notification::State { current, previous });
        }
        Some(transition)
    }

    fn react(self: &Arc<Self>, transition: Option<Transition>) {
        let Some(transition) = transition else {
            return;
        };
        if transition.polling_changed() {
            self.start_polling();
        }
        if transition.push_changed() {
            self.start_push_rejoin(Duration::ZERO);
        }
    }

    // ---- connect / disconnect ------------------------------------------

    /// Starts connecting. Returns the operation to wait for and whether this
    /// call started the attempt; joiners and already connected clients get
    /// `false` and leave the options untouched.
    fn begin_connect(
        self: &Arc<Self>,
        options: Option<ClientOptions>,
    ) -> ClientResult<(Operation, bool)> {
        let states = self.states();
        match states.push {
            PushState::Connected => return Ok((Operation::resolved(()), false)),
            PushState::Connecting => {
                let operation = self.registry.lock().get(OperationName::PushConnecting);
                return Ok((operation, false));
            }
            PushState::Disconnecting => return Err(ClientError::Cancelled),
            PushState::Offline => {}
        }
        if states.polling == PollState::Connecting {
            let operation = self.registry.lock().get(OperationName::PollingConnecting);
            return Ok((operation, false));
        }
        if let Some(options) = options {
            self.apply_options(options)?;
        }

        let config = self.config.read().clone();
        let operation = match config.server.as_deref() {
            Some(server) => {
                self.set_state(SubState::Push(PushState::Connecting));
                match self.connector.open(server, &config.transport_options()) {
                    Ok((transport, events)) => {
                        info!(server, "opening push transport");
                        let operation = self.registry.lock().begin(OperationName::PushConnecting);
                        self.session.lock().transport = Some(Arc::new(transport));
                        self.spawn_pump(events);
                        Some(operation)
                    }
                    Err(err) => {
                        warn!(server, error = %err, "push transport unavailable, falling back to polling");
                        None
                    }
                }
            }
            None => {
                warn!("no push server configured, falling back to polling");
                None
            }
        };

        let operation = match operation {
            Some(operation) => operation,
            None if config.api_token.is_none() => {
                warn!("no token configured, cannot join rooms over http");
                self.set_state(SubState::Push(PushState::Offline));
                return Err(ClientError::Offline);
            }
            None => {
                let operation = self.registry.lock().begin(OperationName::PollingConnecting);
                self.set_state(SubState::Push(PushState::Offline));
                self.set_state(SubState::Polling(PollState::Connecting));
                operation
            }
        };

        if config.api_token.is_some() {
            self.replay_offline_context(true);
        }
        Ok((operation, true))
    }

    pub(crate) async fn connect(
        self: &Arc<Self>,
        options: Option<ClientOptions>,
    ) -> ClientResult<()> {
        let (operation, initiated) = self.begin_connect(options.clone())?;
        operation.wait().await?;
        if !initiated {
            return Ok(());
        }

        let states = self.states();
        info!(%states, "connected");
        self.bus.trigger(&Notification::Connected { states, options });
        self.restart_inactivity();
        Ok(())
    }

    /// Starts closing the session. Returns the operation to wait for and
    /// whether this call owns the final cleanup.
    fn begin_disconnect(self: &Arc<Self>) -> (Operation, bool) {
        let states = self.states();
        if states.is_offline() {
            return (Operation::resolved(()), false);
        }
        if states.push == PushState::Disconnecting {
            return (self.registry.lock().get(OperationName::PushDisconnecting), false);
        }

        self.rejoin.cancel();
        self.stop_polling();
        let transport = {
            let mut session = self.session.lock();
            session.offline_context = None;
            session.transport.clone()
        };

        match transport {
            Some(transport) if transport.is_connected() => {
                let operation = self.registry.lock().begin(OperationName::PushDisconnecting);
                self.set_state(SubState::Push(PushState::Disconnecting));
                transport.disconnect();
                (operation, true)
            }
            other => {
                if let Some(transport) = other {
                    transport.disconnect();
                }
                (Operation::resolved(()), true)
            }
        }
    }

    pub(crate) async fn disconnect(
        self: &Arc<Self>,
        options: Option<ClientOptions>,
    ) -> ClientResult<()> {
        let (operation, owner) = self.begin_disconnect();
        let result = operation.wait().await;
        if owner {
            self.finish_disconnect(options);
        }
        result
    }

    fn finish_disconnect(self: &Arc<Self>, options: Option<ClientOptions>) {
        self.pump.cancel();
        self.rejoin.cancel();
        self.poll.cancel();
        self.inactivity.cancel();

        let transport = {
            let mut session = self.session.lock();
            self.epoch.fetch_add(1, Ordering::SeqCst);
            std::mem::replace(&mut *session, Session::new()).transport
        };
        drop(transport);
        self.registry.lock().clear();
        self.set_states(ConnectionStates::offline());

        let states = self.states();
        info!("disconnected");
        self.bus.trigger(&Notification::Disconnected { states, options });
    }

    /// Stops every task and closes the transport without notifying.
    fn shutdown(&self) {
        self.pump.cancel();
        self.rejoin.cancel();
        self.poll.cancel();
        self.inactivity.cancel();
        let transport = self.session.lock().transport.take();
        if let Some(transport) = transport {
            transport.disconnect();
        }
    }

    // ---- transport lifecycle -------------------------------------------

    fn spawn_pump(self: &Arc<Self>, mut events: TransportEvents) {
        let weak = Arc::downgrade(self);
        let epoch = self.epoch();
        self.pump.spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if inner.epoch() != epoch {
                    break;
                }
                inner.on_transport_event(epoch, event);
            }
        });
    }

    fn on_transport_event(self: &Arc<Self>, epoch: u64, event: TransportEvent) {
        match event {
            TransportEvent::Connect | TransportEvent::Reconnect => {
                let name = self.transport().and_then(|t| t.name());
                info!(transport = name.as_deref().unwrap_or("unknown"), "push transport connected");
                self.bus.trigger(&Notification::PushUp);
                self.set_states(ConnectionStates::new(PushState::Connected, PollState::Medium));
                self.registry.lock().resolve(OperationName::PushConnecting);
            }
            TransportEvent::ConnectError(reason) => {
                warn!(%reason, "push transport failed to connect");
                self.on_disconnect(&reason);
                self.registry.lock().resolve(OperationName::PushConnecting);
            }
            TransportEvent::Disconnect(reason) => self.on_disconnect(&reason),
            TransportEvent::Reconnecting => {
                debug!("push transport reconnecting");
                self.registry.lock().begin(OperationName::PushConnecting);
                self.set_state(SubState::Push(PushState::Connecting));
            }
            TransportEvent::Broadcast(payload) => match EventRecord::from_json(&payload) {
                Ok(record) => {
                    self.admit(epoch, record.with_via(Via::Socket));
                }
                Err(err) => warn!(error = %err, "dropping undecodable broadcast"),
            },
            TransportEvent::Uuid(uuid) => {
                info!(%uuid, "connection id assigned");
                self.session.lock().uuid = Some(uuid);
            }
            TransportEvent::Analytics(data) => self.bus.trigger(&Notification::Analytics(data)),
        }
    }

    fn on_disconnect(self: &Arc<Self>, reason: &str) {
        info!(%reason, "push transport disconnected");
        self.bus.trigger(&Notification::PushDown);
        let solicited = self.registry.lock().resolve(OperationName::PushDisconnecting);
        if !solicited {
            self.set_states(ConnectionStates::new(PushState::Offline, PollState::Full));
        }
    }

    // ---- admission -----------------------------------------------------

    /// Admits an event delivered during session `epoch`.
    pub(crate) fn admit(self: &Arc<Self>, epoch: u64, record: EventRecord) -> bool {
        let admitted = {
            let mut session = self.session.lock();
            self.epoch() == epoch && session.ledger.admit(&record)
        };
        if !admitted {
            debug!(hash = %record.hash, "dropping duplicate or stale event");
            return false;
        }
        self.restart_inactivity();
        self.bus.trigger(&Notification::Event(record));
        true
    }

    fn restart_inactivity(self: &Arc<Self>) {
        let Some(timeout) = self.config.read().inactivity_timeout else {
            return;
        };
        let weak: Weak<Self> = Arc::downgrade(self);
        self.inactivity.schedule(timeout, async move {
            if let Some(inner) = weak.upgrade() {
                debug!(?timeout, "no event received");
                inner.bus.trigger(&Notification::Inactivity { timeout });
            }
        });
    }

    // ---- rooms ---------------------------------------------------------

    fn buffer(&self, params: JoinParams) {
        let mut session = self.session.lock();
        session
            .offline_context
            .get_or_insert_with(JoinParams::new)
            .merge(params);
    }

    /// Replays the buffered join in the background. With `always`, joins
    /// with empty parameters when nothing is buffered.
    fn replay_offline_context(self: &Arc<Self>, always: bool) {
        let buffered = self.session.lock().offline_context.take();
        let params = match buffered {
            Some(params) => params,
            None if always => JoinParams::new(),
            None => return,
        };
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            match inner.join(params).await {
                Ok(rooms) => debug!(rooms = rooms.len(), "replayed join"),
                Err(err) => debug!(error = %err, "replayed join did not complete"),
            }
        });
    }

    pub(crate) async fn join(self: &Arc<Self>, params: JoinParams) -> ClientResult<Vec<String>> {
        if !self.has_token() {
            self.buffer(params);
            return Err(ClientError::Offline);
        }
        loop {
            match self.state() {
                DerivedState::PushConnected => {
                    return match self.join_from_push(params.clone()).await {
                        Ok(rooms) => Ok(rooms),
                        Err(err) => {
                            warn!(error = %err, "push join failed, joining over http");
                            let result = self.join_from_api(params).await;
                            self.start_push_rejoin(Duration::ZERO);
                            result
                        }
                    };
                }
                DerivedState::PushConnecting => {
                    let operation = self.registry.lock().get(OperationName::PushConnecting);
                    operation.wait().await?;
                }
                DerivedState::PollingConnecting | DerivedState::PollingFull => {
                    return self.join_from_api(params).await;
                }
                DerivedState::Offline => {
                    self.buffer(params);
                    return Err(ClientError::Offline);
                }
            }
        }
    }

    pub(crate) async fn join_from_push(
        self: &Arc<Self>,
        params: JoinParams,
    ) -> ClientResult<Vec<String>> {
        let transport = self.transport().ok_or(ClientError::NotConnected)?;
        let token = self.config.read().api_token.clone();
        let epoch = self.epoch();

        let ack = transport
            .emit("join", params.to_join_payload(token.as_deref()))
            .await
            .and_then(|args| Ok(JoinAck::from_args(&args)?));
        if self.epoch() != epoch {
            return Err(ClientError::Cancelled);
        }
        let ack = match ack {
            Ok(ack) => ack,
            Err(err) => {
                self.set_state(SubState::Polling(PollState::Full));
                return Err(ClientError::transport(format!("join failed: {err}")));
            }
        };
        if let Some(error) = ack.error {
            self.set_state(SubState::Polling(PollState::Full));
            return Err(ClientError::transport(format!("join refused: {error}")));
        }

        self.set_state(SubState::Polling(PollState::Medium));
        let rooms = {
            let mut session = self.session.lock();
            session.seed_watermark(ack.server_time);
            session.rooms.extend(ack.rooms);
            session.room_list()
        };
        info!(rooms = rooms.len(), "joined rooms over push");
        self.bus.trigger(&Notification::Rooms {
            rooms: rooms.clone(),
        });
        Ok(rooms)
    }

    pub(crate) async fn join_from_api(
        self: &Arc<Self>,
        params: JoinParams,
    ) -> ClientResult<Vec<String>> {
        let epoch = self.epoch();
        let fetched = self.api.fetch_rooms(&self.endpoint(), &params).await;
        if self.epoch() != epoch {
            return Err(ClientError::Cancelled);
        }
        let (response, server_time) = match fetched {
            Ok(fetched) => fetched,
            Err(err) => {
                // a pending fallback connect fails with the request
                let pending = self
                    .registry
                    .lock()
                    .reject(OperationName::PollingConnecting, err.clone());
                if pending {
                    warn!(error = %err, "joining over http failed, polling fallback abandoned");
                    self.stop_polling();
                }
                return Err(err);
            }
        };

        let rooms = {
            let mut session = self.session.lock();
            session.seed_watermark(server_time);
            session.rooms.extend(response.rooms);
            session.room_list()
        };
        self.set_state(SubState::Polling(PollState::Full));
        self.registry.lock().resolve(OperationName::PollingConnecting);
        info!(rooms = rooms.len(), "joined rooms over http");
        self.bus.trigger(&Notification::Rooms {
            rooms: rooms.clone(),
        });
        Ok(rooms)
    }

    pub(crate) async fn add_analytics(
        self: &Arc<Self>,
        namespaces: Vec<String>,
    ) -> ClientResult<Vec<String>> {
        if self.state() != DerivedState::PushConnected {
            let mut session = self.session.lock();
            session.analytics.extend(namespaces);
            return Ok(session.analytics.iter().cloned().collect());
        }

        let transport = self.transport().ok_or(ClientError::NotConnected)?;
        let epoch = self.epoch();
        let args = transport
            .emit("analytics:subscribe", json!(namespaces))
            .await?;
        let ack = AnalyticsAck::from_args(&args)?;
        if self.epoch() != epoch {
            return Err(ClientError::Cancelled);
        }
        if let Some(error) = ack.error {
            return Err(ClientError::transport(format!(
                "analytics subscription refused: {error}"
            )));
        }

        info!(namespaces = ack.namespaces.len(), "joined analytics namespaces");
        let mut session = self.session.lock();
        session.analytics = ack.namespaces.into_iter().collect();
        Ok(session.analytics.iter().cloned().collect())
    }

    // ---- rejoin --------------------------------------------------------

    pub(crate) fn start_push_rejoin(self: &Arc<Self>, delay: Duration) {
        if self.states().push != PushState::Connected {
            self.rejoin.cancel();
            return;
        }
        let backoff = self.config.read().rejoin_backoff();
        let epoch = self.epoch();
        let weak = Arc::downgrade(self);

        self.rejoin.spawn(async move {
            let mut delay = backoff.clamp(delay);
            let mut failures = 0u32;
            loop {
                tokio::time::sleep(delay).await;
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                if inner.epoch() != epoch || inner.states().push != PushState::Connected {
                    return;
                }
                match inner.rejoin_once().await {
                    Ok(()) => return,
                    Err(err) => {
                        failures += 1;
                        if !backoff.allows(failures) {
                            warn!(failures, error = %err, "giving up push rejoin");
                            return;
                        }
                        delay = backoff.next_delay(delay);
                        debug!(failures, ?delay, error = %err, "push rejoin failed, retrying");
                    }
                }
            }
        });
    }

    async fn rejoin_once(self: &Arc<Self>) -> ClientResult<()> {
        let (rooms, analytics) = {
            let session = self.session.lock();
            (
                session.room_list(),
                session.analytics.iter().cloned().collect::<Vec<_>>(),
            )
        };
        if !rooms.is_empty() {
            self.join_from_push(JoinParams::with_rooms(rooms)).await?;
        }
        if let Err(err) = self.add_analytics(analytics).await {
            debug!(error = %err, "analytics resubscription failed");
        }
        Ok(())
    }

    // ---- misc ----------------------------------------------------------

    pub(crate) async fn ping(self: &Arc<Self>) -> ClientResult<Value> {
        let transport = self.transport().ok_or(ClientError::NotConnected)?;
        let args = transport
            .emit("_ping", json!({ "timestamp": now_millis() }))
            .await?;
        let ack = PongAck::from_args(&args)?;
        if !ack.is_pong() {
            return Err(ClientError::Protocol(format!(
                "unexpected ping reply `{}`",
                ack.name
            )));
        }
        self.bus.trigger(&Notification::Pong(ack.data.clone()));
        Ok(ack.data)
    }

    fn apply_options(&self, options: ClientOptions) -> ClientResult<()> {
        let mut config = self.config.read().clone();
        config.apply(options);
        config.validate()?;
        *self.config.write() = config;
        Ok(())
    }

    fn set_options(self: &Arc<Self>, options: ClientOptions) -> ClientResult<()> {
        self.apply_options(options)?;
        let buffered = self.session.lock().offline_context.is_some();
        if buffered && self.has_token() {
            self.replay_offline_context(false);
        }
        Ok(())
    }
}

/// Keeps an application event stream reliable across a push transport and
/// an HTTP polling fallback.
///
/// `P` opens the push transport and `H` performs HTTP requests; both are
/// supplied by the embedding application ([`crate::MockConnector`] and
/// [`crate::MockHttpClient`] serve for tests). The client must be used from
/// within a Tokio runtime.
pub struct RealtimeClient<P: PushConnector, H: HttpClient> {
    inner: Arc<Inner<P, H>>,
}

impl<P: PushConnector, H: HttpClient> RealtimeClient<P, H> {
    /// Creates a client. Fails if the configuration is invalid.
    pub fn new(config: ClientConfig, connector: P, http: H) -> ClientResult<Self> {
        config.validate()?;
        let bus = Arc::new(EventBus::new());
        Ok(Self {
            inner: Arc::new(Inner {
                config: RwLock::new(config),
                connector,
                api: ApiClient::new(http, Arc::clone(&bus)),
                bus,
                machine: Mutex::new(ConnectionStateMachine::new()),
                dispatch: ReentrantMutex::new(()),
                registry: Mutex::new(PromiseRegistry::new()),
                session: Mutex::new(Session::new()),
                epoch: AtomicU64::new(0),
                pump: TimerSlot::new(),
                rejoin: TimerSlot::new(),
                poll: TimerSlot::new(),
                inactivity: TimerSlot::new(),
            }),
        })
    }

    /// Connects the push transport, or falls back to polling when it cannot
    /// be opened.
    ///
    /// `options` are applied over the configuration before the attempt
    /// starts and echoed in the `connected` notification. Concurrent calls
    /// share the same attempt; only the call that started it applies its
    /// options and emits `connected`. Returns [`ClientError::Cancelled`] if
    /// `disconnect()` runs meanwhile. In the polling fallback, a missing
    /// token fails with [`ClientError::Offline`] and a failed room fetch
    /// with its [`ClientError::RequestFailed`].
    pub async fn connect(&self, options: Option<ClientOptions>) -> ClientResult<()> {
        self.inner.connect(options).await
    }

    /// Closes the transport, stops every timer and forgets the session.
    ///
    /// `options` are echoed in the `disconnected` notification.
    pub async fn disconnect(&self, options: Option<ClientOptions>) -> ClientResult<()> {
        self.inner.disconnect(options).await
    }

    /// Round-trips a ping over the push transport and returns the reply.
    pub async fn ping(&self) -> ClientResult<Value> {
        self.inner.ping().await
    }

    /// Joins rooms over whichever path is currently up.
    ///
    /// Without a token, or while offline, the parameters are buffered,
    /// replayed later, and [`ClientError::Offline`] is returned. Returns all
    /// joined rooms on success.
    pub async fn join(&self, params: JoinParams) -> ClientResult<Vec<String>> {
        self.inner.join(params).await
    }

    /// Joins rooms through the push transport.
    pub async fn join_from_push(&self, params: JoinParams) -> ClientResult<Vec<String>> {
        self.inner.join_from_push(params).await
    }

    /// Joins rooms through the HTTP API.
    pub async fn join_from_api(&self, params: JoinParams) -> ClientResult<Vec<String>> {
        self.inner.join_from_api(params).await
    }

    /// Leaving rooms is not supported.
    pub async fn leave(&self, _params: JoinParams) -> ClientResult<Vec<String>> {
        Err(ClientError::NotImplemented("leave"))
    }

    /// Subscribes to analytics namespaces.
    ///
    /// While push is not connected the namespaces are only recorded, and
    /// subscribed by the next rejoin.
    pub async fn add_analytics<I, S>(&self, namespaces: I) -> ClientResult<Vec<String>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let namespaces = namespaces.into_iter().map(Into::into).collect();
        self.inner.add_analytics(namespaces).await
    }

    /// Unsubscribing from analytics is not supported.
    pub async fn remove_analytics<I, S>(&self, _namespaces: I) -> ClientResult<Vec<String>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Err(ClientError::NotImplemented("remove_analytics"))
    }

    /// Fetches events over HTTP now. Concurrent calls share one request.
    pub async fn pull(&self) -> ClientResult<PullSummary> {
        self.inner.pull().await
    }

    /// Runs an event through deduplication and notifies it if admitted.
    pub fn handle_event(&self, record: EventRecord) -> bool {
        self.inner.admit(self.inner.epoch(), record)
    }

    /// Applies option overrides.
    ///
    /// When a token becomes available and a join was buffered, the join is
    /// replayed in the background.
    pub fn set_options(&self, options: ClientOptions) -> ClientResult<()> {
        self.inner.set_options(options)
    }

    /// Schedules a rejoin of all known rooms after `delay`. Does nothing
    /// unless push is connected.
    pub fn start_push_rejoin(&self, delay: Duration) {
        self.inner.start_push_rejoin(delay);
    }

    /// Cancels a scheduled rejoin.
    pub fn stop_push_rejoin(&self) {
        self.inner.rejoin.cancel();
    }

    /// Restarts the polling loop at the cadence of the current state.
    pub fn start_polling(&self) {
        self.inner.start_polling();
    }

    /// Stops the polling loop.
    pub fn stop_polling(&self) {
        self.inner.stop_polling();
    }

    /// Registers a listener.
    pub fn on<F>(&self, name: &str, handler: F) -> ListenerId
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.inner.bus.on(name, handler)
    }

    /// Registers a listener removed after its first call.
    pub fn once<F>(&self, name: &str, handler: F) -> ListenerId
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.inner.bus.once(name, handler)
    }

    /// Removes a listener.
    pub fn off(&self, name: &str, id: ListenerId) -> bool {
        self.inner.bus.off(name, id)
    }

    /// Dispatches a notification to the listeners of its name.
    pub fn trigger(&self, notification: &Notification) {
        self.inner.bus.trigger(notification);
    }

    /// Gets the derived state.
    pub fn state(&self) -> DerivedState {
        self.inner.state()
    }

    /// Gets both state axes.
    pub fn states(&self) -> ConnectionStates {
        self.inner.states()
    }

    /// Gets the joined rooms.
    pub fn rooms(&self) -> Vec<String> {
        self.inner.session.lock().room_list()
    }

    /// Gets the subscribed analytics namespaces.
    pub fn analytics(&self) -> Vec<String> {
        self.inner.session.lock().analytics.iter().cloned().collect()
    }

    /// Gets the connection id assigned by the push server.
    pub fn uuid(&self) -> Option<String> {
        self.inner.session.lock().uuid.clone()
    }

    /// Gets the pull watermark, in epoch milliseconds.
    pub fn watermark(&self) -> Option<i64> {
        self.inner.session.lock().watermark
    }

    /// Gets the buffered join parameters.
    pub fn offline_context(&self) -> Option<JoinParams> {
        self.inner.session.lock().offline_context.clone()
    }

    /// Gets the push transport, if one is open.
    pub fn push_transport(&self) -> Option<Arc<P::Transport>> {
        self.inner.transport()
    }

    /// Gets a copy of the current configuration.
    pub fn config(&self) -> ClientConfig {
        self.inner.config.read().clone()
    }

    /// Number of events admitted in this session.
    pub fn seen_events(&self) -> usize {
        self.inner.session.lock().ledger.len()
    }

    /// Returns true if an event with `hash` was admitted in this session.
    pub fn has_seen(&self, hash: &str) -> bool {
        self.inner.session.lock().ledger.contains(hash)
    }

    /// Latest admitted time of an entity (`"{class_name}:{id}"`).
    pub fn entity_version(&self, key: &str) -> Option<i64> {
        self.inner.session.lock().ledger.entity_version(key)
    }

    /// Number of pending named operations.
    pub fn pending_operations(&self) -> usize {
        self.inner.registry.lock().len()
    }

    /// Returns true while a push rejoin is scheduled or running.
    pub fn is_rejoin_scheduled(&self) -> bool {
        self.inner.rejoin.is_armed()
    }

    /// Returns true while the polling loop runs.
    pub fn is_polling(&self) -> bool {
        self.inner.poll.is_armed()
    }
}

impl<P: PushConnector, H: HttpClient> Drop for RealtimeClient<P, H> {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}

impl<P: PushConnector, H: HttpClient> std::fmt::Debug for RealtimeClient<P, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeClient")
            .field("states", &self.states())
            .field("rooms", &self.rooms())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{HttpResponse, MockHttpClient};
    use crate::transport::MockConnector;

    fn client(config: ClientConfig) -> (RealtimeClient<MockConnector, MockHttpClient>, MockConnector) {
        let connector = MockConnector::new();
        let http = MockHttpClient::new();
        http.respond("pull", Ok(HttpResponse::json(200, &json!({"data": []}))));
        let client = RealtimeClient::new(config, connector.clone(), http).unwrap();
        (client, connector)
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = ClientConfig::new().with_pull_intervals(Duration::ZERO, Duration::from_secs(1));
        let result = RealtimeClient::new(config, MockConnector::new(), MockHttpClient::new());
        assert!(matches!(result, Err(ClientError::Config(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn join_without_token_is_buffered() {
        let (client, connector) = client(ClientConfig::new().with_server("wss://push"));

        let err = client
            .join(JoinParams::with_rooms(["a"]))
            .await
            .unwrap_err();
        assert_eq!(err, ClientError::Offline);
        client
            .join(JoinParams::new().insert("meeting", json!("m1")))
            .await
            .unwrap_err();

        let buffered = client.offline_context().unwrap();
        assert_eq!(buffered.rooms(), vec!["a"]);
        assert_eq!(buffered.as_map()["meeting"], json!("m1"));
        assert!(connector.emitted().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unsupported_operations() {
        let (client, _connector) = client(ClientConfig::new());
        assert_eq!(
            client.leave(JoinParams::new()).await,
            Err(ClientError::NotImplemented("leave"))
        );
        assert_eq!(
            client.remove_analytics(["ns"]).await,
            Err(ClientError::NotImplemented("remove_analytics"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn analytics_are_recorded_while_offline() {
        let (client, connector) = client(ClientConfig::new());
        let namespaces = client.add_analytics(["b", "a"]).await.unwrap();
        assert_eq!(namespaces, vec!["a", "b"]);
        let namespaces = client.add_analytics(["a", "c"]).await.unwrap();
        assert_eq!(namespaces, vec!["a", "b", "c"]);
        assert_eq!(connector.emitted_count("analytics:subscribe"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn ping_requires_a_transport() {
        let (client, _connector) = client(ClientConfig::new());
        assert_eq!(client.ping().await, Err(ClientError::NotConnected));
    }

    #[tokio::test(start_paused = true)]
    async fn handle_event_deduplicates() {
        let (client, _connector) = client(ClientConfig::new());
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        client.on("event", move |n| {
            if let Notification::Event(record) = n {
                sink.lock().push(record.hash.clone());
            }
        });

        let record = EventRecord::new("h1").with_time(10).with_entity("Quote", "7");
        assert!(client.handle_event(record.clone()));
        assert!(!client.handle_event(record));
        assert!(!client.handle_event(
            EventRecord::new("h2").with_time(9).with_entity("Quote", "7")
        ));

        assert_eq!(*events.lock(), vec!["h1".to_string()]);
        assert_eq!(client.entity_version("Quote:7"), Some(10));
        assert!(client.has_seen("h1"));
        assert!(!client.has_seen("h2"));
    }

    #[tokio::test(start_paused = true)]
    async fn set_options_validates() {
        let (client, _connector) = client(ClientConfig::new());
        let invalid = ClientOptions {
            pull_interval: Some(0),
            ..Default::default()
        };
        assert!(matches!(client.set_options(invalid), Err(ClientError::Config(_))));
        assert_eq!(client.config().pull_interval, Duration::from_secs(10));

        client.set_options(ClientOptions::token("t")).unwrap();
        assert_eq!(client.config().api_token.as_deref(), Some("t"));
    }
}
