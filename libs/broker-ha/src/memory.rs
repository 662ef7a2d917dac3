// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! In-process broker transport.
//!
//! [`MemoryBroker`] stands in for a real broker: published bytes are routed
//! to every queue bound to the target exchange, and each queue hands its
//! messages round-robin to its consumers. Faults can be injected at will:
//! the link can be taken down and brought back, connects can be refused
//! outright or for the wrong credentials, and publishes or closes can be
//! made to fail.
//!
//! [`MemoryConnector`] resolves `host:port` to a registered broker.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, watch};

use crate::address::BrokerAddress;
use crate::config::ConnectOptions;
use crate::error::TransportError;
use crate::transport::{
    BrokerChannel, BrokerConnector, Delivery, ExchangeSpec, LinkState, QueueSpec,
};

/// A message recorded by [`MemoryBroker::published`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub exchange: String,
    pub body: Bytes,
    pub persistent: bool,
}

#[derive(Default)]
struct QueueState {
    /// Consumers as (channel id, sender)
    consumers: Vec<(u64, mpsc::UnboundedSender<Delivery>)>,
    next: usize,
    backlog: VecDeque<Bytes>,
}

#[derive(Default)]
struct BrokerState {
    /// exchange name -> bound queue names
    bindings: HashMap<String, Vec<String>>,
    queues: HashMap<String, QueueState>,
    published: Vec<Published>,
    acked: Vec<u64>,
    deleted: Vec<String>,
    prefetch: Option<u16>,
    connects: usize,
    closes: usize,
    next_tag: u64,
    refuse_connects: bool,
    fail_publish: bool,
    fail_close: bool,
    /// (user, pass) a connect must present, if any
    credentials: Option<(String, String)>,
}

impl BrokerState {
    fn enqueue(&mut self, queue: &str, body: Bytes) {
        self.next_tag += 1;
        let tag = self.next_tag;
        let state = self.queues.entry(queue.to_string()).or_default();

        // Drop consumers whose receiver is gone before picking one
        state.consumers.retain(|(_, tx)| !tx.is_closed());
        if state.consumers.is_empty() {
            state.backlog.push_back(body);
            return;
        }

        let idx = state.next % state.consumers.len();
        state.next = state.next.wrapping_add(1);
        let delivery = Delivery { tag, body };
        if let Err(mpsc::error::SendError(delivery)) = state.consumers[idx].1.send(delivery) {
            state.backlog.push_back(delivery.body);
        }
    }
}

/// A single in-process broker. Cloning yields another handle to the same
/// broker.
#[derive(Clone)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    link: Arc<watch::Sender<LinkState>>,
    next_channel: Arc<AtomicU64>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        let (link, _) = watch::channel(LinkState::Up);
        Self {
            state: Arc::new(Mutex::new(BrokerState::default())),
            link: Arc::new(link),
            next_channel: Arc::new(AtomicU64::new(0)),
        }
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            tracing::error!("Memory broker mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    // ========================================================================
    // Fault injection
    // ========================================================================

    /// Drop the link. Open channels report [`LinkState::Down`] and new
    /// connects are refused until [`MemoryBroker::set_up`].
    pub fn set_down(&self) {
        self.link.send_replace(LinkState::Down);
    }

    pub fn set_up(&self) {
        self.link.send_replace(LinkState::Up);
    }

    pub fn refuse_connects(&self, refuse: bool) {
        self.state().refuse_connects = refuse;
    }

    pub fn fail_publish(&self, fail: bool) {
        self.state().fail_publish = fail;
    }

    pub fn fail_close(&self, fail: bool) {
        self.state().fail_close = fail;
    }

    /// Refuse connects that do not present this user and password.
    pub fn require_credentials(&self, user: &str, pass: &str) {
        self.state().credentials = Some((user.to_string(), pass.to_string()));
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Every message accepted so far, in publish order
    pub fn published(&self) -> Vec<Published> {
        self.state().published.clone()
    }

    pub fn acked(&self) -> Vec<u64> {
        self.state().acked.clone()
    }

    pub fn deleted_queues(&self) -> Vec<String> {
        self.state().deleted.clone()
    }

    pub fn prefetch_value(&self) -> Option<u16> {
        self.state().prefetch
    }

    /// Number of successful connects
    pub fn connect_count(&self) -> usize {
        self.state().connects
    }

    /// Number of channel close calls, failed or not
    pub fn close_count(&self) -> usize {
        self.state().closes
    }

    pub fn is_up(&self) -> bool {
        *self.link.borrow() == LinkState::Up
    }

    /// Put `body` straight onto `queue`, as if routed there by an exchange.
    pub fn deliver(&self, queue: &str, body: impl Into<Bytes>) {
        self.state().enqueue(queue, body.into());
    }

    fn open_channel(
        &self,
        options: &ConnectOptions,
    ) -> Result<Arc<dyn BrokerChannel>, TransportError> {
        let mut state = self.state();
        if state.refuse_connects || !self.is_up() {
            return Err(TransportError::ConnectionRefused(
                "memory broker unavailable".to_string(),
            ));
        }
        if let Some((user, pass)) = &state.credentials {
            if options.user.as_ref() != Some(user) || options.pass.as_ref() != Some(pass) {
                return Err(TransportError::AccessRefused(
                    options.user.clone().unwrap_or_default(),
                ));
            }
        }
        state.connects += 1;
        drop(state);

        Ok(Arc::new(MemoryChannel {
            id: self.next_channel.fetch_add(1, Ordering::Relaxed),
            broker: self.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

/// Channel handed out by [`MemoryBroker`]
struct MemoryChannel {
    id: u64,
    broker: MemoryBroker,
    closed: AtomicBool,
}

impl MemoryChannel {
    fn check_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::ChannelClosed);
        }
        if !self.broker.is_up() {
            return Err(TransportError::LinkDown);
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerChannel for MemoryChannel {
    async fn consume(
        &self,
        queue: &QueueSpec,
        exchange: &ExchangeSpec,
        _ack: bool,
    ) -> Result<mpsc::UnboundedReceiver<Delivery>, TransportError> {
        self.check_open()?;
        let (tx, rx) = mpsc::unbounded_channel();

        let mut state = self.broker.state();
        let bound = state.bindings.entry(exchange.name.clone()).or_default();
        if !bound.contains(&queue.name) {
            bound.push(queue.name.clone());
        }

        let backlog: Vec<Bytes> = {
            let q = state.queues.entry(queue.name.clone()).or_default();
            q.consumers.push((self.id, tx));
            q.backlog.drain(..).collect()
        };
        for body in backlog {
            state.enqueue(&queue.name, body);
        }

        Ok(rx)
    }

    async fn ack(&self, tag: u64) -> Result<(), TransportError> {
        self.check_open()?;
        self.broker.state().acked.push(tag);
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &ExchangeSpec,
        body: Bytes,
        persistent: bool,
    ) -> Result<(), TransportError> {
        self.check_open()?;
        let mut state = self.broker.state();
        if state.fail_publish {
            return Err(TransportError::Other("publish rejected".to_string()));
        }

        state.published.push(Published {
            exchange: exchange.name.clone(),
            body: body.clone(),
            persistent,
        });
        let queues = state
            .bindings
            .get(&exchange.name)
            .cloned()
            .unwrap_or_default();
        for queue in queues {
            state.enqueue(&queue, body.clone());
        }
        Ok(())
    }

    async fn delete_queue(&self, name: &str) -> Result<(), TransportError> {
        self.check_open()?;
        let mut state = self.broker.state();
        state.queues.remove(name);
        for queues in state.bindings.values_mut() {
            queues.retain(|q| q != name);
        }
        state.deleted.push(name.to_string());
        Ok(())
    }

    async fn prefetch(&self, count: u16) -> Result<(), TransportError> {
        self.check_open()?;
        self.broker.state().prefetch = Some(count);
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut state = self.broker.state();
        state.closes += 1;
        if state.fail_close {
            return Err(TransportError::Other("close failed".to_string()));
        }
        self.closed.store(true, Ordering::SeqCst);
        for queue in state.queues.values_mut() {
            queue.consumers.retain(|(id, _)| *id != self.id);
        }
        Ok(())
    }

    fn link(&self) -> watch::Receiver<LinkState> {
        self.broker.link.subscribe()
    }
}

/// Resolves broker addresses to registered [`MemoryBroker`]s.
#[derive(Default)]
pub struct MemoryConnector {
    brokers: Mutex<HashMap<String, MemoryBroker>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new broker at `host`:`port` and return a handle to it.
    pub fn add(&self, host: &str, port: u16) -> MemoryBroker {
        let broker = MemoryBroker::new();
        self.brokers
            .lock()
            .unwrap_or_else(|poisoned| {
                tracing::error!("Memory connector mutex was poisoned, recovering");
                poisoned.into_inner()
            })
            .insert(format!("{}:{}", host, port), broker.clone());
        broker
    }
}

#[async_trait]
impl BrokerConnector for MemoryConnector {
    async fn connect(
        &self,
        address: &BrokerAddress,
        options: &ConnectOptions,
    ) -> Result<Arc<dyn BrokerChannel>, TransportError> {
        let broker = self
            .brokers
            .lock()
            .unwrap_or_else(|poisoned| {
                tracing::error!("Memory connector mutex was poisoned, recovering");
                poisoned.into_inner()
            })
            .get(&address.to_string())
            .cloned();

        match broker {
            Some(broker) => broker.open_channel(options),
            None => Err(TransportError::ConnectionRefused(address.to_string())),
        }
    }
}
