// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Dispatcher configuration

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Default time to wait for a ping response before reconnecting
const DEFAULT_PING_TIMEOUT_SECS: f64 = 30.0;

/// Default exchange requests are published to
const DEFAULT_REQUEST_EXCHANGE: &str = "request";

/// Retry and health check settings for a [`crate::RequestDispatcher`].
///
/// A zero `retry_timeout` or `retry_interval` disables retries.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Give up on a request this long after it was created
    #[serde(rename = "retry_timeout_secs", deserialize_with = "secs")]
    pub retry_timeout: Duration,
    /// Resend a request that has seen no result for this long
    #[serde(rename = "retry_interval_secs", deserialize_with = "secs")]
    pub retry_interval: Duration,
    /// Time allowed for a connectivity ping to be answered
    #[serde(rename = "ping_timeout_secs", deserialize_with = "secs")]
    pub ping_timeout: Duration,
    pub request_exchange: String,
}

fn secs<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let secs = f64::deserialize(deserializer)?;
    Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            retry_timeout: Duration::ZERO,
            retry_interval: Duration::ZERO,
            ping_timeout: Duration::from_secs_f64(DEFAULT_PING_TIMEOUT_SECS),
            request_exchange: DEFAULT_REQUEST_EXCHANGE.to_string(),
        }
    }
}

fn env_secs(name: &str, default: Duration) -> Result<Duration> {
    match std::env::var(name) {
        Ok(value) => {
            let secs: f64 = value
                .trim()
                .parse()
                .with_context(|| format!("Invalid {}", name))?;
            Duration::try_from_secs_f64(secs).with_context(|| format!("Invalid {}", name))
        }
        Err(_) => Ok(default),
    }
}

impl DispatcherConfig {
    /// Config with retries enabled
    pub fn with_retry(retry_timeout: Duration, retry_interval: Duration) -> Self {
        Self {
            retry_timeout,
            retry_interval,
            ..Self::default()
        }
    }

    pub fn retry_enabled(&self) -> bool {
        !self.retry_timeout.is_zero() && !self.retry_interval.is_zero()
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            retry_timeout: env_secs("RETRY_TIMEOUT_SECS", defaults.retry_timeout)?,
            retry_interval: env_secs("RETRY_INTERVAL_SECS", defaults.retry_interval)?,
            ping_timeout: env_secs("PING_TIMEOUT_SECS", defaults.ping_timeout)?,
            request_exchange: std::env::var("REQUEST_EXCHANGE")
                .unwrap_or(defaults.request_exchange),
        })
    }

    /// Load configuration from a JSON file
    pub async fn from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }
}
