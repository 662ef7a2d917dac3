// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Error types for broker-ha

use fleet_packets::SerializerError;
use thiserror::Error;

/// Malformed broker configuration. Fatal, surfaced at construction.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Host and port lists have different lengths and neither is a singleton
    #[error("Unmatched broker host/port lists -- hosts: {hosts:?} ports: {ports:?}")]
    UnmatchedLists { hosts: String, ports: String },

    #[error("Invalid broker port: {0:?}")]
    InvalidPort(String),

    #[error("Invalid broker identity: {0:?}")]
    InvalidIdentity(String),
}

/// Failure of a single operation against a single broker.
///
/// The pool logs these and moves on to the next broker; they only reach the
/// caller from operations that target one broker, such as reconnect.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection refused by {0}")]
    ConnectionRefused(String),

    #[error("Access refused for user '{0}'")]
    AccessRefused(String),

    #[error("Broker channel is closed")]
    ChannelClosed,

    #[error("Broker link is down")]
    LinkDown,

    #[error("{0}")]
    Other(String),
}

/// Errors returned by [`crate::BrokerPool`] operations.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Publish found no connection that accepted the message
    #[error("None of {}{count} broker connections are usable", allowed_prefix(.allowed))]
    NoUsableBroker { allowed: bool, count: usize },

    #[error(transparent)]
    Serialization(#[from] SerializerError),

    #[error("Cannot publish packet: {0}")]
    NotSerializable(&'static str),

    #[error("Unknown broker {0}")]
    UnknownBroker(String),

    #[error("Broker {0} is closed")]
    BrokerClosed(String),

    #[error("Broker {broker} failed: {source}")]
    Transport {
        broker: String,
        #[source]
        source: TransportError,
    },
}

fn allowed_prefix(allowed: &bool) -> &'static str {
    if *allowed { "the allowed " } else { "" }
}
