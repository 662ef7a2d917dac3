// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Request dispatch and result correlation.
//!
//! # Dispatch
//!
//! [`RequestDispatcher::request`] and [`RequestDispatcher::push`] only build
//! the packet and queue it. A single task drains the queue in order; for a
//! request it records the pending entry *before* publishing, so entries
//! appear in call order and exist before any result for them can arrive.
//!
//! # Retry
//!
//! With both `retry_timeout` and `retry_interval` configured, a request
//! that sees no result within `retry_interval` is republished under the
//! same token. Once `retry_timeout` has elapsed since the request was
//! created the handler receives a timeout result and the brokers it was
//! last sent through are checked with a ping.
//!
//! # Health check
//!
//! A connectivity ping is a `/mapper/ping` request sent only through the
//! suspect brokers. If it goes unanswered for `ping_timeout` the agent is
//! asked to reconnect each of them. Only one ping is outstanding at a time.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use broker_ha::{
    BrokerPool, ExchangeSpec, Inbound, PoolError, PublishOptions, QueueSpec, SubscribeOptions,
};
use chrono::{DateTime, Utc};
use fleet_packets::{
    LogField, OperationResult, Packet, PacketKind, Push, Request, ResultPacket, Token,
};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::agent::Agent;
use crate::config::DispatcherConfig;
use crate::error::DispatchError;
use crate::pending::{PendingRequest, PendingTable, ResultHandler};
use crate::ping::{PING_TYPE, PingState};

/// Options for [`RequestDispatcher::request`] and [`RequestDispatcher::push`]
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Ask the broker to persist the message
    pub persistent: bool,
    /// Route to this responder only
    pub target: Option<String>,
    /// Creation time of an earlier attempt being resent by the caller.
    /// Retry timeouts are measured from this time.
    pub created_at: Option<DateTime<Utc>>,
}

/// Work queued for the dispatch task
enum Outgoing {
    Request {
        request: Request,
        handler: ResultHandler,
        started: Instant,
        allow: Vec<String>,
        retry: bool,
    },
    Push(Push),
}

struct DispatcherInner {
    agent: Arc<dyn Agent>,
    identity: String,
    pool: BrokerPool,
    config: DispatcherConfig,
    pending: Mutex<PendingTable>,
    ping: Mutex<PingState>,
    outbox: Mutex<Option<mpsc::UnboundedSender<Outgoing>>>,
    drain: Mutex<Option<JoinHandle<()>>>,
}

/// Runtime clock instant corresponding to wall clock time `created_at`
fn started_at(created_at: DateTime<Utc>) -> Instant {
    let now = Instant::now();
    (Utc::now() - created_at)
        .to_std()
        .ok()
        .and_then(|age| now.checked_sub(age))
        .unwrap_or(now)
}

impl DispatcherInner {
    fn pending(&self) -> MutexGuard<'_, PendingTable> {
        self.pending.lock().unwrap_or_else(|poisoned| {
            tracing::error!("Pending request mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn ping(&self) -> MutexGuard<'_, PingState> {
        self.ping.lock().unwrap_or_else(|poisoned| {
            tracing::error!("Ping state mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn outbox(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<Outgoing>>> {
        self.outbox.lock().unwrap_or_else(|poisoned| {
            tracing::error!("Outbox mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn enqueue(&self, outgoing: Outgoing) -> Result<(), DispatchError> {
        self.outbox()
            .as_ref()
            .ok_or(DispatchError::NotInitialized)?
            .send(outgoing)
            .map_err(|_| DispatchError::NotInitialized)
    }

    async fn publish(
        &self,
        packet: Packet,
        persistent: bool,
        allow: &[String],
    ) -> Result<Vec<String>, PoolError> {
        let exchange = ExchangeSpec::direct(self.config.request_exchange.clone())
            .durable()
            .no_declare();
        let options = PublishOptions {
            persistent,
            brokers: allow.to_vec(),
            log_filter: Some(vec![LogField::Target, LogField::Tries, LogField::Persistent]),
            ..Default::default()
        };
        self.pool.publish(&exchange, packet, &options).await
    }

    async fn dispatch(self: &Arc<Self>, outgoing: Outgoing) {
        match outgoing {
            Outgoing::Request {
                request,
                handler,
                started,
                allow,
                retry,
            } => self.dispatch_request(request, handler, started, allow, retry).await,
            Outgoing::Push(push) => {
                let token = push.token.clone();
                let persistent = push.persistent;
                if let Err(e) = self.publish(Packet::from(push), persistent, &[]).await {
                    error!(token = %token, error = %e, "Failed to send push");
                }
            }
        }
    }

    async fn dispatch_request(
        self: &Arc<Self>,
        request: Request,
        handler: ResultHandler,
        started: Instant,
        allow: Vec<String>,
        retry: bool,
    ) {
        let token = request.token.clone();
        let persistent = request.persistent;
        let packet = Packet::from(request.clone());
        self.pending()
            .insert(PendingRequest::new(request, handler, started, allow.clone()));

        let result = self.publish(packet, persistent, &allow).await;

        let mut pending = self.pending();
        match result {
            Ok(brokers) => {
                // A result may already have resolved the entry
                let Some(entry) = pending.get_mut(&token) else {
                    return;
                };
                entry.attempts = 1;
                entry.brokers = brokers;
                if retry && self.config.retry_enabled() {
                    entry.timer = Some(self.spawn_retry_timer(token));
                }
            }
            Err(e) => {
                // Nothing can answer, and a handler with no usable broker
                // is never invoked
                error!(token = %token, error = %e, "Failed to send request");
                pending.remove(&token);
            }
        }
    }

    fn spawn_retry_timer(self: &Arc<Self>, token: Token) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let interval = self.config.retry_interval;
        tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            if let Some(inner) = weak.upgrade() {
                inner.retry(token).await;
            }
        })
    }

    async fn retry(self: &Arc<Self>, token: Token) {
        let (mut request, allow, elapsed) = {
            let pending = self.pending();
            let Some(entry) = pending.get(&token) else {
                return;
            };
            (
                entry.request.clone(),
                entry.allow.clone(),
                entry.started.elapsed(),
            )
        };

        if elapsed >= self.config.retry_timeout {
            let Some(entry) = self.pending().remove(&token) else {
                return;
            };
            // The timer handle is this task, so it is dropped, not aborted
            let PendingRequest {
                handler,
                attempts,
                brokers,
                ..
            } = entry;
            let message = format!(
                "Timeout after {:.1} seconds and {} attempts",
                elapsed.as_secs_f64(),
                attempts
            );
            warn!(token = %token, "{}", message);
            handler(OperationResult::timeout(message));
            self.check_connection(brokers).await;
            return;
        }

        request.tries.push(token.clone());
        let persistent = request.persistent;
        let result = self
            .publish(Packet::from(request.clone()), persistent, &allow)
            .await;

        let mut pending = self.pending();
        let Some(entry) = pending.get_mut(&token) else {
            return;
        };
        match result {
            Ok(brokers) => {
                entry.attempts += 1;
                entry.brokers = brokers;
                entry.request = request;
            }
            Err(e) => {
                // Not counted as an attempt; keep waiting for the timeout
                warn!(token = %token, error = %e, "Failed to resend request");
            }
        }
        entry.timer = Some(self.spawn_retry_timer(token));
    }

    fn handle_result(&self, result: ResultPacket) {
        let entry = self.pending().remove(&result.token);
        match entry {
            Some(entry) => {
                debug!(token = %result.token, from = %result.from, "Received result");
                (entry.into_handler())(OperationResult::from_results(&result.results));
            }
            None => {
                debug!(token = %result.token, from = %result.from, "Dropping result for unknown request");
            }
        }
    }

    async fn check_connection(self: &Arc<Self>, brokers: Vec<String>) {
        let request = Request::new(PING_TYPE, Value::Null, self.identity.clone());
        let token = request.token.clone();

        let generation = {
            let mut ping = self.ping();
            let Some(generation) = ping.begin() else {
                debug!("Connectivity ping already in flight");
                return;
            };
            let weak = Arc::downgrade(self);
            let timeout = self.config.ping_timeout;
            let timer_token = token.clone();
            let timer_brokers = brokers.clone();
            ping.arm(
                generation,
                tokio::spawn(async move {
                    tokio::time::sleep(timeout).await;
                    if let Some(inner) = weak.upgrade() {
                        inner
                            .ping_expired(generation, timer_token, timer_brokers)
                            .await;
                    }
                }),
            );
            generation
        };

        let weak = Arc::downgrade(self);
        let handler: ResultHandler = Box::new(move |_| {
            if let Some(inner) = weak.upgrade() {
                inner.ping().answered(generation);
            }
        });
        let packet = Packet::from(request.clone());
        self.pending().insert(PendingRequest::new(
            request,
            handler,
            Instant::now(),
            brokers.clone(),
        ));

        info!(token = %token, ?brokers, "Checking broker connectivity");
        match self.publish(packet, false, &brokers).await {
            Ok(sent) => {
                if let Some(entry) = self.pending().get_mut(&token) {
                    entry.attempts = 1;
                    entry.brokers = sent;
                }
            }
            Err(e) => {
                // Left to the ping timeout, which reconnects
                warn!(token = %token, error = %e, "Failed to send connectivity ping");
            }
        }
    }

    async fn ping_expired(&self, generation: u64, token: Token, brokers: Vec<String>) {
        if !self.ping().expired(generation) {
            return;
        }
        self.pending().remove(&token);
        warn!(
            token = %token,
            ?brokers,
            "Connectivity ping timed out after {} seconds, reconnecting",
            self.config.ping_timeout.as_secs_f64()
        );

        for broker in brokers {
            if let Err(e) = self.agent.reconnect(&broker).await {
                error!(
                    broker = %broker,
                    error = %e,
                    "Failed to reconnect to broker {}: {:#}",
                    broker,
                    e
                );
            }
        }
    }
}

/// Sends requests and pushes on behalf of one agent and correlates results.
///
/// Cloning yields another handle to the same dispatcher.
#[derive(Clone)]
pub struct RequestDispatcher {
    inner: Arc<DispatcherInner>,
}

impl RequestDispatcher {
    /// Create a dispatcher bound to `agent`'s identity, pool and options.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(agent: Arc<dyn Agent>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Outgoing>();
        let inner = Arc::new(DispatcherInner {
            identity: agent.identity(),
            pool: agent.broker_pool(),
            config: agent.options(),
            agent,
            pending: Mutex::new(PendingTable::default()),
            ping: Mutex::new(PingState::default()),
            outbox: Mutex::new(Some(tx)),
            drain: Mutex::new(None),
        });

        let weak: Weak<DispatcherInner> = Arc::downgrade(&inner);
        let drain = tokio::spawn(async move {
            while let Some(outgoing) = rx.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.dispatch(outgoing).await;
            }
        });
        *inner.drain.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(drain);

        RequestDispatcher { inner }
    }

    fn check_initialized(&self) -> Result<(), DispatchError> {
        if self.inner.identity.is_empty() {
            return Err(DispatchError::NotInitialized);
        }
        Ok(())
    }

    /// Send a request and invoke `handler` once with its outcome.
    ///
    /// The handler receives the first result that arrives, or a timeout
    /// result if retries are configured and exhausted. It is never invoked
    /// if no broker accepted the request; apply an external timeout if that
    /// matters.
    pub fn request<F>(
        &self,
        message_type: &str,
        payload: Value,
        options: RequestOptions,
        handler: F,
    ) -> Result<Token, DispatchError>
    where
        F: FnOnce(OperationResult) + Send + 'static,
    {
        self.check_initialized()?;

        let mut request = Request::new(message_type, payload, self.inner.identity.clone());
        request.target = options.target;
        request.persistent = options.persistent;
        let started = match options.created_at {
            Some(created_at) => {
                request.created_at = created_at;
                started_at(created_at)
            }
            None => Instant::now(),
        };
        let token = request.token.clone();

        self.inner.enqueue(Outgoing::Request {
            request,
            handler: Box::new(handler),
            started,
            allow: Vec::new(),
            retry: true,
        })?;
        Ok(token)
    }

    /// Send a request and receive its outcome through a channel.
    ///
    /// The receiver fails if the request is abandoned without a result.
    pub fn request_async(
        &self,
        message_type: &str,
        payload: Value,
        options: RequestOptions,
    ) -> Result<oneshot::Receiver<OperationResult>, DispatchError> {
        let (tx, rx) = oneshot::channel();
        self.request(message_type, payload, options, move |result| {
            let _ = tx.send(result);
        })?;
        Ok(rx)
    }

    /// Send a message that expects no result.
    pub fn push(
        &self,
        message_type: &str,
        payload: Value,
        options: RequestOptions,
    ) -> Result<Token, DispatchError> {
        self.check_initialized()?;

        let mut push = Push::new(message_type, payload, self.inner.identity.clone());
        push.target = options.target;
        push.persistent = options.persistent;
        if let Some(created_at) = options.created_at {
            push.created_at = created_at;
        }
        let token = push.token.clone();

        self.inner.enqueue(Outgoing::Push(push))?;
        Ok(token)
    }

    /// Subscribe `queue` to `exchange` and feed every result that arrives
    /// to [`RequestDispatcher::handle_result`].
    pub async fn listen(&self, queue: &QueueSpec, exchange: &ExchangeSpec) -> Vec<String> {
        let weak = Arc::downgrade(&self.inner);
        let options = SubscribeOptions {
            ack: true,
            accept: vec![PacketKind::Result],
            category: Some("result".to_string()),
            ..Default::default()
        };
        self.inner
            .pool
            .subscribe(queue, exchange, options, move |inbound| {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                if let Inbound::Packet {
                    packet: Packet::Result(result),
                    ..
                } = inbound
                {
                    inner.handle_result(result);
                }
            })
            .await
    }

    /// Resolve the pending request matching `result`. Results for unknown
    /// tokens are dropped.
    pub fn handle_result(&self, result: ResultPacket) {
        self.inner.handle_result(result);
    }

    /// Ping the coordinator through `brokers` and reconnect them if the
    /// ping goes unanswered. Does nothing while another ping is in flight.
    pub async fn check_connection(&self, brokers: &[String]) {
        self.inner.check_connection(brokers.to_vec()).await;
    }

    /// Forget a pending request without invoking its handler.
    pub fn cancel(&self, token: &str) -> bool {
        let entry = self.inner.pending().remove(token);
        match entry {
            Some(entry) => {
                drop(entry.into_handler());
                debug!(token = %token, "Cancelled request");
                true
            }
            None => false,
        }
    }

    /// Tokens of pending requests, oldest first
    pub fn pending_tokens(&self) -> Vec<Token> {
        self.inner.pending().tokens()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending().len()
    }

    pub fn ping_in_flight(&self) -> bool {
        self.inner.ping().in_flight()
    }

    /// Stop dispatching. Queued messages are discarded and pending handlers
    /// are dropped without being invoked.
    pub fn terminate(&self) {
        self.inner.outbox().take();
        let drain = self
            .inner
            .drain
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(drain) = drain {
            drain.abort();
        }

        let entries = self.inner.pending().drain();
        let count = entries.len();
        for entry in entries {
            drop(entry.into_handler());
        }
        self.inner.ping().cancel();
        info!(pending = count, "Request dispatcher terminated");
    }
}
