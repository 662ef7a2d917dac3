// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Reconnect backoff policy

use std::time::Duration;

use serde::Deserialize;

/// How long to wait between attempts to re-establish a broker connection.
///
/// The policy is a pure function of the attempt number and knows nothing
/// about the transport it is used with.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReconnectPolicy {
    /// Always wait the same amount of time
    Fixed {
        #[serde(rename = "delay_secs", deserialize_with = "secs")]
        delay: Duration,
    },
    /// Start at `initial` and multiply by `multiplier` per attempt, capped at `max`
    Exponential {
        #[serde(rename = "initial_secs", deserialize_with = "secs")]
        initial: Duration,
        #[serde(rename = "max_secs", deserialize_with = "secs")]
        max: Duration,
        multiplier: f64,
    },
}

fn secs<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let secs = f64::deserialize(deserializer)?;
    Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy::Exponential {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

impl ReconnectPolicy {
    pub fn fixed(delay: Duration) -> Self {
        ReconnectPolicy::Fixed { delay }
    }

    /// Delay to wait after failed attempt number `attempt` (starting at 0).
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            ReconnectPolicy::Fixed { delay } => delay,
            ReconnectPolicy::Exponential {
                initial,
                max,
                multiplier,
            } => {
                let factor = multiplier.max(1.0).powi(attempt.min(i32::MAX as u32) as i32);
                let secs = initial.as_secs_f64() * factor;
                if !secs.is_finite() || secs >= max.as_secs_f64() {
                    max
                } else {
                    Duration::from_secs_f64(secs)
                }
            }
        }
    }
}
