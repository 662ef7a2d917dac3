// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Highly available messaging over a set of redundant brokers.
//!
//! A [`BrokerPool`] holds one connection per configured broker, in a fixed
//! priority order. Each connection fails and recovers independently:
//! publishing tries the usable brokers in order (or all of them for
//! fanout), subscriptions are registered on every usable broker, and a
//! single observer is told when the pool as a whole gains or loses its last
//! usable broker.
//!
//! The pool is transport agnostic. Concrete broker clients plug in through
//! [`BrokerConnector`] and [`BrokerChannel`]; [`memory`] provides an
//! in-process implementation.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use broker_ha::{BrokerPool, ConnectOptions, ExchangeSpec, PublishOptions};
//! use fleet_packets::JsonSerializer;
//!
//! let pool = BrokerPool::connect(
//!     Some(Arc::new(JsonSerializer)),
//!     connector,
//!     ConnectOptions::from_env()?,
//! )
//! .await?;
//!
//! let ids = pool
//!     .publish(&ExchangeSpec::direct("request"), packet, &PublishOptions::default())
//!     .await?;
//! ```
//!
//! # Modules
//!
//! - [`address`] - Broker host/port list parsing
//! - [`identity`] - Broker identity encoding
//! - [`backoff`] - Reconnect delay policy
//! - [`transport`] - Connector and channel traits
//! - [`memory`] - In-process transport

pub mod address;
pub mod backoff;
mod close;
pub mod config;
pub mod error;
pub mod identity;
pub mod memory;
mod pool;
pub mod transport;

pub use address::{BrokerAddress, parse_addresses};
pub use backoff::ReconnectPolicy;
pub use config::ConnectOptions;
pub use error::{ConfigError, PoolError, TransportError};
pub use pool::{
    BrokerInfo, BrokerPool, BrokerStatus, ConnectionStatus, Inbound, Outbound, PublishOptions,
    SubscribeOptions,
};
pub use transport::{
    BrokerChannel, BrokerConnector, Delivery, ExchangeKind, ExchangeSpec, LinkState, QueueSpec,
};
