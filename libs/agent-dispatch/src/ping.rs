// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Single-flight connectivity ping bookkeeping

use tokio::task::JoinHandle;

/// Request type of the connectivity ping
pub const PING_TYPE: &str = "/mapper/ping";

/// At most one ping is outstanding at a time. Each ping gets a new
/// generation so a late answer or timeout of an earlier ping is ignored.
#[derive(Default)]
pub(crate) struct PingState {
    in_flight: bool,
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

impl PingState {
    /// Start a new ping, returning its generation, or `None` if one is
    /// already outstanding.
    pub(crate) fn begin(&mut self) -> Option<u64> {
        if self.in_flight {
            return None;
        }
        self.in_flight = true;
        self.generation += 1;
        Some(self.generation)
    }

    pub(crate) fn arm(&mut self, generation: u64, timer: JoinHandle<()>) {
        if generation == self.generation && self.in_flight {
            self.timer = Some(timer);
        } else {
            timer.abort();
        }
    }

    /// Record the answer to ping `generation`. Returns whether it was the
    /// outstanding ping.
    pub(crate) fn answered(&mut self, generation: u64) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        self.in_flight = false;
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        true
    }

    /// Record the timeout of ping `generation`. Returns whether it was the
    /// outstanding ping. The timer is the caller and is not aborted.
    pub(crate) fn expired(&mut self, generation: u64) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        self.in_flight = false;
        self.timer = None;
        true
    }

    pub(crate) fn in_flight(&self) -> bool {
        self.in_flight
    }

    /// Abandon any outstanding ping
    pub(crate) fn cancel(&mut self) {
        self.in_flight = false;
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.in_flight && self.generation == generation
    }
}
