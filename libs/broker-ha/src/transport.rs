// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Transport boundary between the pool and a concrete broker client.
//!
//! The pool only ever talks to brokers through [`BrokerConnector`] and
//! [`BrokerChannel`]. A channel reports its liveness through a
//! [`watch`] receiver; the pool maps those signals to broker status.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use strum::Display;
use tokio::sync::{mpsc, watch};

use crate::address::BrokerAddress;
use crate::config::ConnectOptions;
use crate::error::TransportError;

/// Liveness of the link to one broker as seen by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum LinkState {
    Up,
    Down,
}

/// Exchange routing behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ExchangeKind {
    Direct,
    Fanout,
    Topic,
}

/// Exchange declaration parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExchangeSpec {
    pub kind: ExchangeKind,
    pub name: String,
    #[serde(default)]
    pub durable: bool,
    /// Publish to the exchange without declaring it first
    #[serde(default)]
    pub no_declare: bool,
}

impl ExchangeSpec {
    pub fn direct(name: impl Into<String>) -> Self {
        ExchangeSpec {
            kind: ExchangeKind::Direct,
            name: name.into(),
            durable: false,
            no_declare: false,
        }
    }

    pub fn fanout(name: impl Into<String>) -> Self {
        ExchangeSpec {
            kind: ExchangeKind::Fanout,
            ..ExchangeSpec::direct(name)
        }
    }

    pub fn topic(name: impl Into<String>) -> Self {
        ExchangeSpec {
            kind: ExchangeKind::Topic,
            ..ExchangeSpec::direct(name)
        }
    }

    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    pub fn no_declare(mut self) -> Self {
        self.no_declare = true;
        self
    }
}

/// Queue declaration parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueSpec {
    pub name: String,
    #[serde(default)]
    pub durable: bool,
    #[serde(default)]
    pub exclusive: bool,
    #[serde(default)]
    pub auto_delete: bool,
}

impl QueueSpec {
    pub fn new(name: impl Into<String>) -> Self {
        QueueSpec {
            name: name.into(),
            durable: false,
            exclusive: false,
            auto_delete: false,
        }
    }

    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    pub fn auto_delete(mut self) -> Self {
        self.auto_delete = true;
        self
    }
}

/// One message taken off a queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Tag to pass to [`BrokerChannel::ack`]
    pub tag: u64,
    pub body: Bytes,
}

/// Establishes channels to brokers.
///
/// `options` carries the login (`user`, `pass`) and the broker settings
/// `vhost` and `insist`. A network transport passes all of them through to
/// the broker; [`crate::memory::MemoryConnector`] only checks the login.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn connect(
        &self,
        address: &BrokerAddress,
        options: &ConnectOptions,
    ) -> Result<Arc<dyn BrokerChannel>, TransportError>;
}

/// An open channel to a single broker.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Declare `queue`, bind it to `exchange` and start consuming.
    ///
    /// When `ack` is false the broker considers deliveries acknowledged as
    /// soon as they are handed out.
    async fn consume(
        &self,
        queue: &QueueSpec,
        exchange: &ExchangeSpec,
        ack: bool,
    ) -> Result<mpsc::UnboundedReceiver<Delivery>, TransportError>;

    async fn ack(&self, tag: u64) -> Result<(), TransportError>;

    async fn publish(
        &self,
        exchange: &ExchangeSpec,
        body: Bytes,
        persistent: bool,
    ) -> Result<(), TransportError>;

    async fn delete_queue(&self, name: &str) -> Result<(), TransportError>;

    /// Limit the number of unacknowledged deliveries in flight
    async fn prefetch(&self, count: u16) -> Result<(), TransportError>;

    async fn close(&self) -> Result<(), TransportError>;

    /// Liveness signal. The current value is the state right now; every
    /// change is published as the link drops and recovers.
    fn link(&self) -> watch::Receiver<LinkState>;
}
