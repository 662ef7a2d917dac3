// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Pool of redundant broker connections.
//!
//! Brokers keep the priority order they were configured in. Each broker
//! fails and recovers on its own; operations that span brokers log and skip
//! the ones that fail.
//!
//! # Locking
//!
//! Broker records live behind a single `std::sync::Mutex`. It is only held
//! for synchronous bookkeeping; transport calls work on a snapshot of the
//! usable channels taken beforehand. Connection status callbacks are
//! invoked after the lock is released.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use bytes::Bytes;
use fleet_packets::{LogField, Packet, PacketKind, Serializer};
use strum::Display;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{Level, debug, error, info, warn};

use crate::address::{BrokerAddress, parse_addresses};
use crate::close::CloseTracker;
use crate::config::ConnectOptions;
use crate::error::PoolError;
use crate::identity::identity;
use crate::transport::{
    BrokerChannel, BrokerConnector, Delivery, ExchangeSpec, LinkState, QueueSpec,
};

/// Reconnect attempts between progress log lines
const RECONNECT_LOG_INTERVAL: u32 = 30;

/// Reconnect attempt from which progress is logged as an error
const RECONNECT_ERROR_THRESHOLD: u32 = 300;

// ============================================================================
// Public types
// ============================================================================

/// Status of one broker connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum BrokerStatus {
    /// Never connected, or the initial connect failed
    Uninitialized,
    Connected,
    /// The transport reported the link down; it may recover on its own
    Disconnected,
    /// Closed by the pool. Terminal.
    Closed,
}

/// Pool-wide connectivity, reported to the status observer on edges only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionStatus {
    /// Usable broker count went from zero to non-zero
    Connected,
    /// Usable broker count dropped to zero
    Disconnected,
}

/// Diagnostic snapshot of one broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerInfo {
    pub identity: String,
    pub alias: String,
    pub address: BrokerAddress,
    pub status: BrokerStatus,
}

/// Options for [`BrokerPool::publish`]
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    /// Ask the broker to persist the message
    pub persistent: bool,
    /// Publish to every usable broker rather than the first that accepts
    pub fanout: bool,
    /// Restrict publishing to these broker identities; empty means all
    pub brokers: Vec<String>,
    /// Payload bytes are already encoded
    pub no_serialize: bool,
    /// Optional packet fields to include in the SEND line; `None` shows all
    pub log_filter: Option<Vec<LogField>>,
    /// Extra text appended to the SEND line
    pub log_data: Option<String>,
    pub no_log: bool,
}

/// Options for [`BrokerPool::subscribe`] and [`BrokerPool::receive`]
#[derive(Clone, Default)]
pub struct SubscribeOptions {
    /// Acknowledge each delivery before it is handed to the callback
    pub ack: bool,
    /// Hand raw bytes to the callback instead of decoded packets
    pub no_unserialize: bool,
    /// Overrides the pool serializer for this subscription
    pub serializer: Option<Arc<dyn Serializer>>,
    /// Label used when rejecting a packet, e.g. `"request"`
    pub category: Option<String>,
    /// Per-kind optional fields in the RECV line; kinds not listed show all
    pub log_filter: HashMap<PacketKind, Vec<LogField>>,
    pub log_data: Option<String>,
    pub no_log: bool,
    /// Packet kinds to accept; empty accepts every kind
    pub accept: Vec<PacketKind>,
}

/// Payload handed to [`BrokerPool::publish`]
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Packet(Packet),
    /// Already encoded bytes, published as is
    Bytes(Bytes),
}

impl From<Packet> for Outbound {
    fn from(packet: Packet) -> Self {
        Outbound::Packet(packet)
    }
}

impl From<Bytes> for Outbound {
    fn from(bytes: Bytes) -> Self {
        Outbound::Bytes(bytes)
    }
}

/// What a subscription callback receives
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Packet { broker: String, packet: Packet },
    Raw { broker: String, body: Bytes },
}

type StatusObserver = Arc<dyn Fn(ConnectionStatus) + Send + Sync>;
type DeliveryCallback = Arc<dyn Fn(Inbound) + Send + Sync>;

// ============================================================================
// Internal state
// ============================================================================

struct Broker {
    address: BrokerAddress,
    identity: String,
    alias: String,
    status: BrokerStatus,
    channel: Option<Arc<dyn BrokerChannel>>,
    /// Bumped every time a channel is installed so stale watchers and
    /// consumers can be told apart from current ones
    generation: u64,
    watcher: Option<JoinHandle<()>>,
    /// Consumer tasks with the queue each one drains
    consumers: Vec<(String, JoinHandle<()>)>,
}

impl Broker {
    fn new(address: BrokerAddress) -> Self {
        Broker {
            identity: identity(&address.host, address.port),
            alias: address.alias(),
            address,
            status: BrokerStatus::Uninitialized,
            channel: None,
            generation: 0,
            watcher: None,
            consumers: Vec::new(),
        }
    }

    fn abort_tasks(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
        for (_, consumer) in self.consumers.drain(..) {
            consumer.abort();
        }
    }
}

/// A usable channel captured outside the broker lock
struct Target {
    idx: usize,
    generation: u64,
    identity: String,
    alias: String,
    channel: Arc<dyn BrokerChannel>,
}

/// A subscription remembered so it can be re-applied after a reconnect
#[derive(Clone)]
struct Subscription {
    queue: QueueSpec,
    exchange: ExchangeSpec,
    options: Arc<SubscribeOptions>,
    callback: DeliveryCallback,
}

struct PoolInner {
    serializer: Option<Arc<dyn Serializer>>,
    connector: Arc<dyn BrokerConnector>,
    options: ConnectOptions,
    brokers: Mutex<Vec<Broker>>,
    subscriptions: Mutex<Vec<Subscription>>,
    observer: Mutex<Option<StatusObserver>>,
}

fn usable_count(brokers: &[Broker]) -> usize {
    brokers
        .iter()
        .filter(|b| b.status == BrokerStatus::Connected)
        .count()
}

fn link_status(state: LinkState) -> BrokerStatus {
    match state {
        LinkState::Up => BrokerStatus::Connected,
        LinkState::Down => BrokerStatus::Disconnected,
    }
}

/// Set the status of broker `idx` if `generation` is still its current
/// channel. Returns the pool-wide edge crossed, if any.
fn apply_status(
    brokers: &mut [Broker],
    idx: usize,
    generation: u64,
    status: BrokerStatus,
) -> Option<ConnectionStatus> {
    let before = usable_count(brokers);
    let broker = brokers.get_mut(idx)?;
    if broker.generation != generation
        || broker.status == BrokerStatus::Closed
        || broker.status == status
    {
        return None;
    }
    broker.status = status;
    let identity = broker.identity.clone();
    let alias = broker.alias.clone();
    let after = usable_count(brokers);

    if before != after {
        info!(
            broker = %identity,
            alias = %alias,
            "broker {}, alias {}, is now {} for a total of {} usable brokers",
            identity,
            alias,
            status,
            after
        );
    }

    match (before, after) {
        (0, n) if n > 0 => Some(ConnectionStatus::Connected),
        (n, 0) if n > 0 => Some(ConnectionStatus::Disconnected),
        _ => None,
    }
}

impl PoolInner {
    fn brokers(&self) -> MutexGuard<'_, Vec<Broker>> {
        self.brokers.lock().unwrap_or_else(|poisoned| {
            tracing::error!("Broker list mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn subscriptions(&self) -> MutexGuard<'_, Vec<Subscription>> {
        self.subscriptions.lock().unwrap_or_else(|poisoned| {
            tracing::error!("Subscription list mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn observer(&self) -> MutexGuard<'_, Option<StatusObserver>> {
        self.observer.lock().unwrap_or_else(|poisoned| {
            tracing::error!("Status observer mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Connected brokers in priority order
    fn usable(&self) -> Vec<Target> {
        self.brokers()
            .iter()
            .enumerate()
            .filter(|(_, b)| b.status == BrokerStatus::Connected)
            .filter_map(|(idx, b)| {
                b.channel.as_ref().map(|channel| Target {
                    idx,
                    generation: b.generation,
                    identity: b.identity.clone(),
                    alias: b.alias.clone(),
                    channel: channel.clone(),
                })
            })
            .collect()
    }

    fn alias_of(&self, identity: &str) -> Option<String> {
        self.brokers()
            .iter()
            .find(|b| b.identity == identity)
            .map(|b| b.alias.clone())
    }

    /// Record a status change reported for channel `generation` of broker
    /// `idx` and notify the observer if the pool crossed the zero edge.
    fn update_status(&self, idx: usize, generation: u64, status: BrokerStatus) {
        let edge = apply_status(&mut self.brokers(), idx, generation, status);
        self.notify(edge);
    }

    /// Invoke the status observer, outside the broker lock
    fn notify(&self, edge: Option<ConnectionStatus>) {
        let Some(edge) = edge else {
            return;
        };
        let observer = self.observer().clone();
        if let Some(observer) = observer {
            observer(edge);
        }
    }

    /// Decode an inbound message and check it against the accepted kinds.
    fn receive(
        &self,
        broker: &str,
        body: &[u8],
        options: &SubscribeOptions,
    ) -> Result<Option<Packet>, PoolError> {
        let serializer = options
            .serializer
            .as_ref()
            .or(self.serializer.as_ref())
            .ok_or(PoolError::NotSerializable("no serializer configured"))?;
        let packet = serializer.load(body)?;
        let alias = self.alias_of(broker).unwrap_or_else(|| broker.to_string());

        if !options.accept.is_empty() && !options.accept.contains(&packet.kind()) {
            let category = options
                .category
                .as_deref()
                .map(|c| format!("{} ", c))
                .unwrap_or_default();
            warn!(
                broker = %broker,
                token = %packet.token(),
                "RECV {} - Invalid {}packet type: {}",
                alias,
                category,
                packet.kind()
            );
            return Ok(None);
        }

        if !options.no_log {
            // Full detail when debugging
            let filter = if tracing::enabled!(Level::DEBUG) {
                None
            } else {
                options.log_filter.get(&packet.kind()).map(Vec::as_slice)
            };
            info!(
                broker = %broker,
                token = %packet.token(),
                "RECV {} {}{}",
                alias,
                packet.to_log_string(filter),
                log_suffix(options.log_data.as_deref())
            );
        }

        Ok(Some(packet))
    }
}

fn log_suffix(log_data: Option<&str>) -> String {
    log_data.map(|d| format!(" {}", d)).unwrap_or_default()
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        let brokers = self
            .brokers
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for broker in brokers.iter_mut() {
            broker.abort_tasks();
        }
    }
}

/// Deliver messages from one broker queue to a subscription callback.
async fn consume_loop(
    pool: Weak<PoolInner>,
    identity: String,
    alias: String,
    channel: Arc<dyn BrokerChannel>,
    mut deliveries: mpsc::UnboundedReceiver<Delivery>,
    subscription: Subscription,
) {
    let options = &subscription.options;
    while let Some(delivery) = deliveries.recv().await {
        // Ack first: a crash while processing loses the message rather than
        // having it redelivered
        if options.ack {
            if let Err(e) = channel.ack(delivery.tag).await {
                error!(broker = %identity, alias = %alias, error = %e, "Failed to ack delivery");
            }
        }

        let Some(inner) = pool.upgrade() else {
            break;
        };
        let decode =
            !options.no_unserialize && (options.serializer.is_some() || inner.serializer.is_some());
        if !decode {
            (subscription.callback)(Inbound::Raw {
                broker: identity.clone(),
                body: delivery.body,
            });
            continue;
        }

        match inner.receive(&identity, &delivery.body, options) {
            Ok(Some(packet)) => (subscription.callback)(Inbound::Packet {
                broker: identity.clone(),
                packet,
            }),
            Ok(None) => {}
            Err(e) => {
                error!(
                    broker = %identity,
                    alias = %alias,
                    error = %e,
                    "RECV {} - Failed to receive message from queue {}",
                    alias,
                    subscription.queue.name
                );
            }
        }
    }
    debug!(broker = %identity, queue = %subscription.queue.name, "Consumer stopped");
}

// ============================================================================
// BrokerPool
// ============================================================================

/// Highly available publish/subscribe over a set of brokers.
///
/// Cloning yields another handle to the same pool.
#[derive(Clone)]
pub struct BrokerPool {
    inner: Arc<PoolInner>,
}

impl BrokerPool {
    /// Create a pool for the brokers named in `options` and connect to each
    /// of them in priority order.
    ///
    /// A broker that cannot be reached is left uninitialized and does not
    /// fail construction; use [`BrokerPool::reconnect`] to retry it.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Config`] if the host/port lists are malformed.
    pub async fn connect(
        serializer: Option<Arc<dyn Serializer>>,
        connector: Arc<dyn BrokerConnector>,
        options: ConnectOptions,
    ) -> Result<Self, PoolError> {
        let addresses = parse_addresses(options.host.as_deref(), options.port.as_deref())?;
        let count = addresses.len();
        let pool = BrokerPool {
            inner: Arc::new(PoolInner {
                serializer,
                connector,
                options,
                brokers: Mutex::new(addresses.into_iter().map(Broker::new).collect()),
                subscriptions: Mutex::new(Vec::new()),
                observer: Mutex::new(None),
            }),
        };

        for idx in 0..count {
            let (address, identity, alias) = {
                let brokers = pool.inner.brokers();
                let b = &brokers[idx];
                (b.address.clone(), b.identity.clone(), b.alias.clone())
            };
            info!(broker = %identity, alias = %alias, "Connecting to broker {}", address);
            match pool
                .inner
                .connector
                .connect(&address, &pool.inner.options)
                .await
            {
                Ok(channel) => {
                    pool.install(idx, channel).await;
                }
                Err(e) => {
                    error!(
                        broker = %identity,
                        alias = %alias,
                        error = %e,
                        "Failed to connect to broker {}",
                        address
                    );
                }
            }
        }

        Ok(pool)
    }

    /// Make `channel` the live channel of broker `idx` and start watching
    /// its link. Returns false if the broker was closed meanwhile.
    async fn install(&self, idx: usize, channel: Arc<dyn BrokerChannel>) -> bool {
        let mut link = channel.link();

        let installed = {
            let mut brokers = self.inner.brokers();
            if brokers[idx].status == BrokerStatus::Closed {
                None
            } else {
                let broker = &mut brokers[idx];
                broker.abort_tasks();
                broker.generation += 1;
                let generation = broker.generation;
                let previous = broker.channel.replace(channel.clone());
                let target = Target {
                    idx,
                    generation,
                    identity: broker.identity.clone(),
                    alias: broker.alias.clone(),
                    channel: channel.clone(),
                };

                // The link state is applied under the same lock as the new
                // generation; the watcher only sees later changes
                let state = *link.borrow_and_update();
                let edge = apply_status(&mut brokers, idx, generation, link_status(state));

                let weak = Arc::downgrade(&self.inner);
                brokers[idx].watcher = Some(tokio::spawn(async move {
                    while link.changed().await.is_ok() {
                        let state = *link.borrow_and_update();
                        let Some(inner) = weak.upgrade() else {
                            break;
                        };
                        inner.update_status(idx, generation, link_status(state));
                    }
                }));

                Some((edge, previous, target))
            }
        };

        let Some((edge, previous, target)) = installed else {
            if let Err(e) = channel.close().await {
                debug!(error = %e, "Failed to close channel of closed broker");
            }
            return false;
        };
        self.inner.notify(edge);

        if let Some(previous) = previous {
            if let Err(e) = previous.close().await {
                debug!(broker = %target.identity, error = %e, "Failed to close replaced channel");
            }
        }

        let subscriptions = self.inner.subscriptions().clone();
        for subscription in subscriptions {
            self.consume(&target, subscription).await;
        }
        true
    }

    /// Start one subscription on one broker
    async fn consume(&self, target: &Target, subscription: Subscription) -> bool {
        let deliveries = match target
            .channel
            .consume(
                &subscription.queue,
                &subscription.exchange,
                subscription.options.ack,
            )
            .await
        {
            Ok(deliveries) => deliveries,
            Err(e) => {
                error!(
                    broker = %target.identity,
                    alias = %target.alias,
                    error = %e,
                    "Failed to subscribe queue {} to exchange {}",
                    subscription.queue.name,
                    subscription.exchange.name
                );
                return false;
            }
        };

        let queue = subscription.queue.name.clone();
        let task = tokio::spawn(consume_loop(
            Arc::downgrade(&self.inner),
            target.identity.clone(),
            target.alias.clone(),
            target.channel.clone(),
            deliveries,
            subscription,
        ));

        let mut brokers = self.inner.brokers();
        match brokers.get_mut(target.idx) {
            Some(broker) if broker.generation == target.generation => {
                broker.consumers.push((queue, task));
                true
            }
            _ => {
                task.abort();
                false
            }
        }
    }

    // ========================================================================
    // Messaging
    // ========================================================================

    /// Subscribe `queue`, bound to `exchange`, on every usable broker.
    ///
    /// The subscription is also re-applied to brokers re-established later
    /// through [`BrokerPool::reconnect`]. Returns the identities of the
    /// brokers where the subscription succeeded.
    pub async fn subscribe<F>(
        &self,
        queue: &QueueSpec,
        exchange: &ExchangeSpec,
        options: SubscribeOptions,
        callback: F,
    ) -> Vec<String>
    where
        F: Fn(Inbound) + Send + Sync + 'static,
    {
        let subscription = Subscription {
            queue: queue.clone(),
            exchange: exchange.clone(),
            options: Arc::new(options),
            callback: Arc::new(callback),
        };
        self.inner.subscriptions().push(subscription.clone());

        let mut subscribed = Vec::new();
        for target in self.inner.usable() {
            if self.consume(&target, subscription.clone()).await {
                info!(
                    broker = %target.identity,
                    alias = %target.alias,
                    "Subscribed queue {} to exchange {}",
                    queue.name,
                    exchange.name
                );
                subscribed.push(target.identity);
            }
        }
        subscribed
    }

    /// Decode a message received from `broker`.
    ///
    /// Returns `Ok(None)` if the packet kind is not accepted by `options`.
    pub fn receive(
        &self,
        broker: &str,
        body: &[u8],
        options: &SubscribeOptions,
    ) -> Result<Option<Packet>, PoolError> {
        self.inner.receive(broker, body, options)
    }

    /// Publish to the usable brokers.
    ///
    /// Without `fanout` the message goes to the first broker that accepts
    /// it; with `fanout` to all of them. Returns the identities of the
    /// brokers that accepted the message.
    ///
    /// # Errors
    ///
    /// [`PoolError::NoUsableBroker`] if no broker accepted the message, or
    /// a serialization error if the payload could not be encoded.
    pub async fn publish(
        &self,
        exchange: &ExchangeSpec,
        payload: impl Into<Outbound>,
        options: &PublishOptions,
    ) -> Result<Vec<String>, PoolError> {
        let payload = payload.into();
        let (body, packet) = match &payload {
            Outbound::Bytes(bytes) => (bytes.clone(), None),
            Outbound::Packet(_) if options.no_serialize => {
                return Err(PoolError::NotSerializable(
                    "no_serialize requires an encoded payload",
                ));
            }
            Outbound::Packet(packet) => {
                let serializer = self
                    .inner
                    .serializer
                    .as_ref()
                    .ok_or(PoolError::NotSerializable("no serializer configured"))?;
                (serializer.dump(packet)?, Some(packet))
            }
        };

        let candidates = self
            .inner
            .usable()
            .into_iter()
            .filter(|t| options.brokers.is_empty() || options.brokers.contains(&t.identity));

        let mut published = Vec::new();
        for target in candidates {
            match target
                .channel
                .publish(exchange, body.clone(), options.persistent)
                .await
            {
                Ok(()) => {
                    if !options.no_log {
                        log_send(&target, exchange, packet, body.len(), options);
                    }
                    published.push(target.identity);
                    if !options.fanout {
                        break;
                    }
                }
                Err(e) => {
                    error!(
                        broker = %target.identity,
                        alias = %target.alias,
                        error = %e,
                        "SEND {} - Failed to publish to exchange {}",
                        target.alias,
                        exchange.name
                    );
                }
            }
        }

        if published.is_empty() {
            let allowed = !options.brokers.is_empty();
            let count = if allowed {
                options.brokers.len()
            } else {
                self.inner.brokers().len()
            };
            return Err(PoolError::NoUsableBroker { allowed, count });
        }
        Ok(published)
    }

    /// Delete `queue` on every usable broker.
    ///
    /// Subscriptions on `queue` are dropped as well, so a later reconnect
    /// does not declare it again.
    pub async fn delete(&self, queue: &str) -> Vec<String> {
        self.inner
            .subscriptions()
            .retain(|s| s.queue.name != queue);
        for broker in self.inner.brokers().iter_mut() {
            broker.consumers.retain(|(name, task)| {
                if name == queue {
                    task.abort();
                }
                name != queue
            });
        }

        let mut deleted = Vec::new();
        for target in self.inner.usable() {
            match target.channel.delete_queue(queue).await {
                Ok(()) => {
                    info!(broker = %target.identity, alias = %target.alias, "Deleted queue {}", queue);
                    deleted.push(target.identity);
                }
                Err(e) => {
                    error!(
                        broker = %target.identity,
                        alias = %target.alias,
                        error = %e,
                        "Failed to delete queue {}",
                        queue
                    );
                }
            }
        }
        deleted
    }

    /// Set the unacknowledged delivery limit on every usable broker.
    pub async fn prefetch(&self, count: u16) -> bool {
        for target in self.inner.usable() {
            if let Err(e) = target.channel.prefetch(count).await {
                error!(
                    broker = %target.identity,
                    alias = %target.alias,
                    error = %e,
                    "Failed to set prefetch to {}",
                    count
                );
            }
        }
        true
    }

    // ========================================================================
    // Status
    // ========================================================================

    /// Register the pool connectivity observer, replacing any previous one.
    pub fn on_connection_status<F>(&self, observer: F)
    where
        F: Fn(ConnectionStatus) + Send + Sync + 'static,
    {
        *self.inner.observer() = Some(Arc::new(observer));
    }

    /// Identities of the usable brokers, in priority order
    pub fn connected(&self) -> Vec<String> {
        self.inner
            .brokers()
            .iter()
            .filter(|b| b.status == BrokerStatus::Connected)
            .map(|b| b.identity.clone())
            .collect()
    }

    /// Identities of every configured broker, in priority order
    pub fn identities(&self) -> Vec<String> {
        self.inner
            .brokers()
            .iter()
            .map(|b| b.identity.clone())
            .collect()
    }

    pub fn status(&self, identity: &str) -> Option<BrokerStatus> {
        self.inner
            .brokers()
            .iter()
            .find(|b| b.identity == identity)
            .map(|b| b.status)
    }

    pub fn brokers(&self) -> Vec<BrokerInfo> {
        self.inner
            .brokers()
            .iter()
            .map(|b| BrokerInfo {
                identity: b.identity.clone(),
                alias: b.alias.clone(),
                address: b.address.clone(),
                status: b.status,
            })
            .collect()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Re-establish the connection to one broker.
    ///
    /// Dials with the configured [`crate::ReconnectPolicy`] between attempts
    /// until it succeeds or `reconnect_attempts` is exhausted. Existing
    /// subscriptions are re-applied to the new channel.
    pub async fn reconnect(&self, identity: &str) -> Result<(), PoolError> {
        let (idx, address, alias) = {
            let brokers = self.inner.brokers();
            let idx = brokers
                .iter()
                .position(|b| b.identity == identity)
                .ok_or_else(|| PoolError::UnknownBroker(identity.to_string()))?;
            if brokers[idx].status == BrokerStatus::Closed {
                return Err(PoolError::BrokerClosed(identity.to_string()));
            }
            (idx, brokers[idx].address.clone(), brokers[idx].alias.clone())
        };

        let options = &self.inner.options;
        let max_attempts = options.reconnect_attempts.max(1);
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            if attempt % RECONNECT_LOG_INTERVAL == 0 {
                if attempt >= RECONNECT_ERROR_THRESHOLD {
                    error!(broker = %identity, alias = %alias, attempt, "Reconnecting to broker {}", address);
                } else {
                    warn!(broker = %identity, alias = %alias, attempt, "Reconnecting to broker {}", address);
                }
            }

            match self.inner.connector.connect(&address, options).await {
                Ok(channel) => {
                    if !self.install(idx, channel).await {
                        return Err(PoolError::BrokerClosed(identity.to_string()));
                    }
                    info!(broker = %identity, alias = %alias, attempt, "Reconnected to broker {}", address);
                    return Ok(());
                }
                Err(e) if attempt >= max_attempts => {
                    return Err(PoolError::Transport {
                        broker: identity.to_string(),
                        source: e,
                    });
                }
                Err(e) => {
                    debug!(broker = %identity, attempt, error = %e, "Reconnect attempt failed");
                    tokio::time::sleep(options.reconnect.delay(attempt - 1)).await;
                }
            }
        }
    }

    /// Close every broker connection.
    ///
    /// `on_complete` runs exactly once, after every broker has been
    /// accounted for. Brokers that were never connected or are already
    /// closed count as closed immediately; close failures are logged and
    /// still count. The connectivity observer is not notified.
    pub fn close<F>(&self, on_complete: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let channels: Vec<(String, String, Option<Arc<dyn BrokerChannel>>)> = {
            let mut brokers = self.inner.brokers();
            brokers
                .iter_mut()
                .map(|b| {
                    b.abort_tasks();
                    let channel = match b.status {
                        BrokerStatus::Connected | BrokerStatus::Disconnected => b.channel.take(),
                        BrokerStatus::Uninitialized | BrokerStatus::Closed => None,
                    };
                    b.status = BrokerStatus::Closed;
                    (b.identity.clone(), b.alias.clone(), channel)
                })
                .collect()
        };
        self.inner.subscriptions().clear();

        let tracker = Arc::new(CloseTracker::new(channels.len(), on_complete));
        for (identity, alias, channel) in channels {
            let Some(channel) = channel else {
                tracker.close_one();
                continue;
            };
            info!(broker = %identity, alias = %alias, "Closing connection to broker");
            let tracker = tracker.clone();
            tokio::spawn(async move {
                if let Err(e) = channel.close().await {
                    error!(broker = %identity, alias = %alias, error = %e, "Failed to close broker connection");
                }
                tracker.close_one();
            });
        }
    }

    /// Close every broker connection and wait for completion.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        self.close(move || {
            let _ = tx.send(());
        });
        let _ = rx.await;
    }
}

fn log_send(
    target: &Target,
    exchange: &ExchangeSpec,
    packet: Option<&Packet>,
    len: usize,
    options: &PublishOptions,
) {
    let suffix = log_suffix(options.log_data.as_deref());
    match packet {
        Some(packet) => {
            let filter = if tracing::enabled!(Level::DEBUG) {
                None
            } else {
                options.log_filter.as_deref()
            };
            let re = if packet.is_retry() { "RE" } else { "" };
            info!(
                broker = %target.identity,
                token = %packet.token(),
                exchange = %exchange.name,
                "{}SEND {} {}{}",
                re,
                target.alias,
                packet.to_log_string(filter),
                suffix
            );
        }
        None => {
            info!(
                broker = %target.identity,
                exchange = %exchange.name,
                "SEND {} <{} bytes>{}",
                target.alias,
                len,
                suffix
            );
        }
    }
}
