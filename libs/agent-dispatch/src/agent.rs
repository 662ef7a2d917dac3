// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

use async_trait::async_trait;
use broker_ha::BrokerPool;

use crate::config::DispatcherConfig;

/// The agent a dispatcher sends on behalf of.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Identity stamped as `from` on every outbound packet
    fn identity(&self) -> String;

    fn broker_pool(&self) -> BrokerPool;

    fn options(&self) -> DispatcherConfig;

    /// Re-establish the connection to broker `broker`, asked for when a
    /// connectivity ping through it goes unanswered.
    async fn reconnect(&self, broker: &str) -> anyhow::Result<()>;
}
