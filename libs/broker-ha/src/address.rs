// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Broker address lists
//!
//! Brokers are configured as a comma-separated host list and a
//! comma-separated port list. Either list may be a singleton, in which case
//! it is reapplied to every entry of the other list. Each host entry may
//! carry a `:id` suffix naming the short alias id of that broker, e.g.
//! `"host_a:0, host_c:2"`; the id defaults to the list index.

use std::fmt;

use crate::error::ConfigError;

/// Host used when no host list is configured
pub const DEFAULT_HOST: &str = "localhost";

/// Port used when no port list is configured
pub const DEFAULT_PORT: u16 = 5672;

/// Network location of one broker plus its short alias id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
    /// Short id used to build the broker alias (`b<id>`) for logs
    pub id: String,
}

impl BrokerAddress {
    pub fn new(host: impl Into<String>, port: u16, id: impl Into<String>) -> Self {
        BrokerAddress {
            host: host.into(),
            port,
            id: id.into(),
        }
    }

    /// Display label used in log lines
    pub fn alias(&self) -> String {
        format!("b{}", self.id)
    }
}

impl fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

fn split_list(list: Option<&str>) -> Option<Vec<&str>> {
    let list = list.map(str::trim).filter(|s| !s.is_empty())?;
    Some(list.split(',').map(str::trim).collect())
}

/// Split a host entry into its name and optional alias id
fn split_host(entry: &str) -> (&str, Option<&str>) {
    match entry.split_once(':') {
        Some((host, id)) if !id.trim().is_empty() => (host.trim(), Some(id.trim())),
        Some((host, _)) => (host.trim(), None),
        None => (entry, None),
    }
}

fn parse_port(port: &str) -> Result<u16, ConfigError> {
    port.parse()
        .map_err(|_| ConfigError::InvalidPort(port.to_string()))
}

/// Parse host and port configuration into a priority ordered address list.
///
/// # Errors
///
/// Returns [`ConfigError::UnmatchedLists`] if both lists have more than one
/// entry and their lengths differ, or [`ConfigError::InvalidPort`] for a
/// port that is not a valid TCP port number.
pub fn parse_addresses(
    host: Option<&str>,
    port: Option<&str>,
) -> Result<Vec<BrokerAddress>, ConfigError> {
    let default_port = DEFAULT_PORT.to_string();
    let hosts = split_list(host).unwrap_or_else(|| vec![DEFAULT_HOST]);
    let ports = split_list(port).unwrap_or_else(|| vec![default_port.as_str()]);

    if hosts.len() != ports.len() && hosts.len() != 1 && ports.len() != 1 {
        return Err(ConfigError::UnmatchedLists {
            hosts: host.unwrap_or_default().to_string(),
            ports: port.unwrap_or_default().to_string(),
        });
    }

    let count = hosts.len().max(ports.len());
    (0..count)
        .map(|i| {
            let (name, id) = split_host(hosts.get(i).copied().unwrap_or(hosts[0]));
            let port = parse_port(ports.get(i).copied().unwrap_or(ports[0]))?;
            // A single host broadcast over several ports has no per-entry
            // suffix to honour, so ids stay positional.
            let id = match id {
                Some(id) if hosts.len() == count => id.to_string(),
                _ => i.to_string(),
            };
            Ok(BrokerAddress::new(name, port, id))
        })
        .collect()
}
