// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Broker connection configuration

use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::backoff::ReconnectPolicy;

/// Default number of reconnect attempts before giving up on a broker
const DEFAULT_RECONNECT_ATTEMPTS: u32 = 1000;

/// Connection settings shared by every broker in a pool.
///
/// `host` and `port` are comma-separated lists, see
/// [`crate::address::parse_addresses`].
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ConnectOptions {
    pub host: Option<String>,
    pub port: Option<String>,
    pub user: Option<String>,
    /// Never read from a config file, only from the environment
    #[serde(skip)]
    pub pass: Option<String>,
    pub vhost: Option<String>,
    pub insist: bool,
    pub reconnect: ReconnectPolicy,
    pub reconnect_attempts: u32,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
            user: None,
            pass: None,
            vhost: None,
            insist: false,
            reconnect: ReconnectPolicy::default(),
            reconnect_attempts: DEFAULT_RECONNECT_ATTEMPTS,
        }
    }
}

impl fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("pass", &self.pass.as_ref().map(|_| "********"))
            .field("vhost", &self.vhost)
            .field("insist", &self.insist)
            .field("reconnect", &self.reconnect)
            .field("reconnect_attempts", &self.reconnect_attempts)
            .finish()
    }
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl ConnectOptions {
    pub fn new(host: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
            port: Some(port.into()),
            ..Self::default()
        }
    }

    /// Load configuration from environment variables
    ///
    /// `BROKER_RECONNECT_INTERVAL_SECS` selects a fixed reconnect delay;
    /// without it the default exponential policy is used.
    pub fn from_env() -> Result<Self> {
        let insist = std::env::var("BROKER_INSIST")
            .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
            .unwrap_or(false);

        let reconnect = match env_opt("BROKER_RECONNECT_INTERVAL_SECS") {
            Some(secs) => {
                let secs: f64 = secs
                    .parse()
                    .context("Invalid BROKER_RECONNECT_INTERVAL_SECS")?;
                let delay = std::time::Duration::try_from_secs_f64(secs)
                    .context("Invalid BROKER_RECONNECT_INTERVAL_SECS")?;
                ReconnectPolicy::fixed(delay)
            }
            None => ReconnectPolicy::default(),
        };

        let reconnect_attempts = std::env::var("BROKER_RECONNECT_ATTEMPTS")
            .unwrap_or_else(|_| DEFAULT_RECONNECT_ATTEMPTS.to_string())
            .parse()
            .context("Invalid BROKER_RECONNECT_ATTEMPTS")?;

        Ok(Self {
            host: env_opt("BROKER_HOST"),
            port: env_opt("BROKER_PORT"),
            user: env_opt("BROKER_USER"),
            pass: env_opt("BROKER_PASS"),
            vhost: env_opt("BROKER_VHOST"),
            insist,
            reconnect,
            reconnect_attempts,
        })
    }

    /// Load configuration from a JSON file
    ///
    /// The password is never taken from the file; set it afterwards or use
    /// [`ConnectOptions::from_env`].
    pub async fn from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }
}
