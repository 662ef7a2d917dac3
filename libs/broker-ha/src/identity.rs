// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Broker identities
//!
//! A broker identity has the form `fleet-broker-<port>-<host>` where every
//! `-` in the host is replaced by `~`, so the identity can be split on `-`
//! without ambiguity. [`host`] and [`port`] recover the original values.

use crate::address::parse_addresses;
use crate::error::ConfigError;

/// Namespace tag leading every broker identity
pub const IDENTITY_NAMESPACE: &str = "fleet";

const BROKER_TAG: &str = "broker";

/// Construct the identity of the broker at `host`:`port`.
pub fn identity(host: &str, port: u16) -> String {
    format!(
        "{}-{}-{}-{}",
        IDENTITY_NAMESPACE,
        BROKER_TAG,
        port,
        host.replace('-', "~")
    )
}

fn split_identity(identity: &str) -> Result<(u16, &str), ConfigError> {
    let invalid = || ConfigError::InvalidIdentity(identity.to_string());

    let rest = identity
        .strip_prefix(IDENTITY_NAMESPACE)
        .and_then(|r| r.strip_prefix('-'))
        .and_then(|r| r.strip_prefix(BROKER_TAG))
        .and_then(|r| r.strip_prefix('-'))
        .ok_or_else(invalid)?;

    let (port, host) = rest.split_once('-').ok_or_else(invalid)?;
    let port = port.parse().map_err(|_| invalid())?;
    if host.is_empty() {
        return Err(invalid());
    }
    Ok((port, host))
}

/// Extract the host name from a broker identity
pub fn host(identity: &str) -> Result<String, ConfigError> {
    split_identity(identity).map(|(_, host)| host.replace('~', "-"))
}

/// Extract the port number from a broker identity
pub fn port(identity: &str) -> Result<u16, ConfigError> {
    split_identity(identity).map(|(port, _)| port)
}

/// Identities of every broker named by a host/port configuration, in
/// priority order.
pub fn identities(host: Option<&str>, port: Option<&str>) -> Result<Vec<String>, ConfigError> {
    Ok(parse_addresses(host, port)?
        .iter()
        .map(|a| identity(&a.host, a.port))
        .collect())
}
