// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Connection Manager
//!
//! [`ConnectionManager`] owns the broker session. A background task connects,
//! waits for the session to drop, waits the configured interval and connects
//! again, until [`ConnectionManager::close`] is called. Connection state is
//! reported through a broadcast channel of [`ConnectionEvent`]s; `connect`
//! itself never waits for the broker.
//!
//! Channels are represented by [`ChannelHandle`]s. Each handle keeps an
//! append-only list of setup actions. Whenever a session is established the
//! handle opens a fresh broker channel and replays every action, in the order
//! they were registered, against it. Actions must therefore be idempotent.
//! [`ConnectionEvent::Connected`] is emitted once the replay of every
//! channel has completed.

use crate::{
    broker::{BrokerChannel, MessageProperties, Session, Transport},
    channel::LapinTransport,
    config::ConnectionOptions,
    errors::AmqpError,
};
use futures_util::future::{join_all, BoxFuture, FutureExt};
use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};
use tokio::{
    sync::{broadcast, watch, Mutex},
    task::JoinHandle,
};
use tracing::{debug, error, warn};

const EVENTS_CAPACITY: usize = 64;

/// Future returned by a setup action.
pub type SetupFuture = BoxFuture<'static, Result<(), AmqpError>>;

/// An idempotent operation replayed against every new broker channel.
pub type SetupAction = Arc<dyn Fn(Arc<dyn BrokerChannel>) -> SetupFuture + Send + Sync>;

/// Connection state notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected { url: String },
    Disconnected { reason: String },
    ConnectFailed { url: String, reason: String },
}

struct SlotState {
    channel: Option<Arc<dyn BrokerChannel>>,
    setups: Vec<SetupAction>,
}

/// A logical channel that survives reconnects.
struct ChannelSlot {
    id: usize,
    closed: Arc<AtomicBool>,
    state: Mutex<SlotState>,
}

impl ChannelSlot {
    /// Opens a broker channel on `session` and replays every setup action.
    ///
    /// Actions are started in registration order and awaited jointly; one
    /// failing action does not prevent the others from running.
    async fn open(&self, session: Arc<dyn Session>) {
        let mut state = self.state.lock().await;

        let channel = match session.create_channel().await {
            Ok(channel) => channel,
            Err(err) => {
                error!(error = err.to_string(), channel = self.id, "failure to open channel");
                state.channel = None;
                return;
            }
        };
        state.channel = Some(channel.clone());

        debug!(channel = self.id, setups = state.setups.len(), "replaying channel setup");
        let results = join_all(state.setups.iter().map(|setup| setup(channel.clone()))).await;

        for (idx, result) in results.into_iter().enumerate() {
            if let Err(err) = result {
                error!(error = err.to_string(), channel = self.id, setup = idx, "channel setup failed");
            }
        }
    }

    async fn reset(&self) {
        self.state.lock().await.channel = None;
    }
}

struct Link {
    session: Option<Arc<dyn Session>>,
    slots: Vec<Arc<ChannelSlot>>,
}

struct Shared {
    link: Mutex<Link>,
    events: broadcast::Sender<ConnectionEvent>,
    connected: AtomicBool,
    closed: Arc<AtomicBool>,
    next_slot: AtomicUsize,
}

impl Shared {
    fn emit(&self, event: ConnectionEvent) {
        match &event {
            ConnectionEvent::Connected { url } => debug!(url = %url, "amqp connected"),
            ConnectionEvent::Disconnected { reason } => debug!(reason = %reason, "amqp disconnected"),
            ConnectionEvent::ConnectFailed { url, reason } => {
                warn!(url = %url, reason = %reason, "amqp connection attempt failed")
            }
        }

        // no subscriber is not an error
        let _ = self.events.send(event);
    }

    async fn attach(&self, url: String, session: Arc<dyn Session>) {
        let slots = {
            let mut link = self.link.lock().await;
            link.session = Some(session.clone());
            link.slots.clone()
        };
        self.connected.store(true, Ordering::SeqCst);

        join_all(slots.iter().map(|slot| slot.open(session.clone()))).await;
        self.emit(ConnectionEvent::Connected { url });
    }

    async fn detach(&self) {
        let slots = {
            let mut link = self.link.lock().await;
            link.session = None;
            link.slots.clone()
        };
        self.connected.store(false, Ordering::SeqCst);

        for slot in slots {
            slot.reset().await;
        }
    }
}

/// Owns a reconnecting session to a broker, or to the first reachable one of
/// a prioritized list of brokers.
pub struct ConnectionManager {
    shared: Arc<Shared>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    /// Starts connecting with `transport` and returns immediately.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Parameters
    /// * `options` - Validated options, see [`ConnectionOptions::build`]
    /// * `transport` - Protocol engine used to open sessions
    ///
    /// # Returns
    /// The manager. Connection success and failures are reported through
    /// [`ConnectionManager::subscribe`], never returned.
    pub fn connect<T>(options: ConnectionOptions, transport: T) -> ConnectionManager
    where
        T: Transport + 'static,
    {
        let (events, _) = broadcast::channel(EVENTS_CAPACITY);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let shared = Arc::new(Shared {
            link: Mutex::new(Link {
                session: None,
                slots: vec![],
            }),
            events,
            connected: AtomicBool::new(false),
            closed: Arc::new(AtomicBool::new(false)),
            next_slot: AtomicUsize::new(0),
        });

        let task = tokio::spawn(run(shared.clone(), Arc::new(transport), options, shutdown_rx));

        ConnectionManager {
            shared,
            shutdown,
            task: Mutex::new(Some(task)),
        }
    }

    /// Starts connecting with the `lapin` transport.
    pub fn connect_lapin(options: ConnectionOptions) -> ConnectionManager {
        Self::connect(options, LapinTransport)
    }

    /// Subscribes to connection notifications emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.events.subscribe()
    }

    /// Whether a session is currently established.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Creates a logical channel. If a session is up, the broker channel is
    /// opened right away; otherwise on the next connect.
    ///
    /// # Returns
    /// A handle onto the channel, or `Closed` once [`ConnectionManager::close`]
    /// was called.
    pub async fn create_channel(&self) -> Result<ChannelHandle, AmqpError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(AmqpError::Closed);
        }

        let slot = Arc::new(ChannelSlot {
            id: self.shared.next_slot.fetch_add(1, Ordering::SeqCst),
            closed: self.shared.closed.clone(),
            state: Mutex::new(SlotState {
                channel: None,
                setups: vec![],
            }),
        });

        let session = {
            let mut link = self.shared.link.lock().await;
            link.slots.push(slot.clone());
            link.session.clone()
        };

        if let Some(session) = session {
            slot.open(session).await;
        }

        Ok(ChannelHandle { slot })
    }

    /// Stops reconnecting and gracefully closes the session.
    ///
    /// Resolves once the session is closed. Calling it again is a no-op.
    pub async fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        let _ = self.shutdown.send(true);

        let task = self.task.lock().await.take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                error!(error = err.to_string(), "connection task ended abnormally");
            }
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

/// Tries every URL in order, returning the first session established.
async fn connect_any(
    shared: &Shared,
    transport: &Arc<dyn Transport>,
    urls: &[String],
    options: &ConnectionOptions,
) -> Option<(String, Arc<dyn Session>)> {
    for url in urls {
        match transport.connect(url, options).await {
            Ok(session) => return Some((url.clone(), session)),
            Err(err) => shared.emit(ConnectionEvent::ConnectFailed {
                url: url.clone(),
                reason: err.to_string(),
            }),
        }
    }

    None
}

async fn run(
    shared: Arc<Shared>,
    transport: Arc<dyn Transport>,
    options: ConnectionOptions,
    mut shutdown: watch::Receiver<bool>,
) {
    let urls = options.url.to_vec();
    let interval = options.reconnect_interval();

    loop {
        if *shutdown.borrow() {
            break;
        }

        let attempt = tokio::select! {
            attempt = connect_any(&shared, &transport, &urls, &options) => attempt,
            _ = shutdown.changed() => break,
        };

        if let Some((url, session)) = attempt {
            if *shutdown.borrow() {
                if let Err(err) = session.close().await {
                    error!(error = err.to_string(), "failure to close the session");
                }
                break;
            }

            shared.attach(url, session.clone()).await;

            tokio::select! {
                reason = session.closed() => {
                    shared.detach().await;
                    shared.emit(ConnectionEvent::Disconnected { reason });
                }
                _ = shutdown.changed() => {
                    shared.detach().await;
                    if let Err(err) = session.close().await {
                        error!(error = err.to_string(), "failure to close the session");
                    }
                    shared.emit(ConnectionEvent::Disconnected {
                        reason: "closed by the client".to_owned(),
                    });
                    break;
                }
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => break,
        }
    }

    debug!("connection manager stopped");
}

/// Non-owning handle onto a manager-owned channel.
///
/// Cloning is cheap; every clone refers to the same channel and setup list.
#[derive(Clone)]
pub struct ChannelHandle {
    slot: Arc<ChannelSlot>,
}

impl std::fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelHandle").field("id", &self.slot.id).finish()
    }
}

impl ChannelHandle {
    /// Identifier of the channel within its manager, in creation order.
    pub fn id(&self) -> usize {
        self.slot.id
    }

    /// Registers a setup action.
    ///
    /// The action runs right away when the channel is open, and its result is
    /// returned. It is replayed after every reconnect either way. Actions are
    /// never deduplicated.
    pub async fn add_setup<F, Fut>(&self, setup: F) -> Result<(), AmqpError>
    where
        F: Fn(Arc<dyn BrokerChannel>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), AmqpError>> + Send + 'static,
    {
        let action: SetupAction = Arc::new(move |channel: Arc<dyn BrokerChannel>| setup(channel).boxed());

        let mut state = self.slot.state.lock().await;
        state.setups.push(action.clone());

        match state.channel.clone() {
            Some(channel) => action(channel).await,
            None => Ok(()),
        }
    }

    /// Number of setup actions replayed on each reconnect.
    pub async fn setup_count(&self) -> usize {
        self.slot.state.lock().await.setups.len()
    }

    /// Whether a broker channel currently backs this handle.
    pub async fn is_connected(&self) -> bool {
        self.slot.state.lock().await.channel.is_some()
    }

    /// The broker channel currently backing this handle.
    pub async fn current(&self) -> Result<Arc<dyn BrokerChannel>, AmqpError> {
        if self.slot.closed.load(Ordering::SeqCst) {
            return Err(AmqpError::Closed);
        }

        self.slot
            .state
            .lock()
            .await
            .channel
            .clone()
            .ok_or(AmqpError::NotConnected)
    }

    /// Publishes on the current broker channel.
    ///
    /// # Parameters
    /// * `exchange` - Target exchange
    /// * `routing_key` - Routing key of the message
    /// * `body` - Encoded message
    /// * `properties` - Message metadata
    ///
    /// # Returns
    /// Ok(()) once the broker confirmed the message, `NotConnected` while no
    /// session is up, `Closed` after the manager was closed
    pub async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: Vec<u8>,
        properties: MessageProperties,
    ) -> Result<(), AmqpError> {
        self.current()
            .await?
            .publish(exchange, routing_key, body, properties)
            .await
    }

    /// Acknowledges a delivery of the current broker channel.
    pub async fn ack(&self, delivery_tag: u64) -> Result<(), AmqpError> {
        self.current().await?.ack(delivery_tag).await
    }

    /// Rejects a delivery of the current broker channel.
    pub async fn nack(&self, delivery_tag: u64, multiple: bool, requeue: bool) -> Result<(), AmqpError> {
        self.current().await?.nack(delivery_tag, multiple, requeue).await
    }
}
