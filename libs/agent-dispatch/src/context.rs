// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Owning runtime context of an agent

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use broker_ha::{BrokerConnector, BrokerPool, ConnectOptions};
use fleet_packets::JsonSerializer;

use crate::agent::Agent;
use crate::config::DispatcherConfig;

/// Holds what an agent needs to talk to the coordinator: its identity, its
/// broker pool and its dispatcher settings.
#[derive(Clone)]
pub struct AgentContext {
    identity: String,
    pool: BrokerPool,
    config: DispatcherConfig,
}

impl AgentContext {
    pub fn new(identity: impl Into<String>, pool: BrokerPool, config: DispatcherConfig) -> Self {
        Self {
            identity: identity.into(),
            pool,
            config,
        }
    }

    /// Build a context with a freshly connected pool using the JSON codec.
    pub async fn connect(
        identity: impl Into<String>,
        connector: Arc<dyn BrokerConnector>,
        options: ConnectOptions,
        config: DispatcherConfig,
    ) -> Result<Self> {
        let pool = BrokerPool::connect(Some(Arc::new(JsonSerializer)), connector, options)
            .await
            .context("Failed to create broker pool")?;
        Ok(Self::new(identity, pool, config))
    }
}

#[async_trait]
impl Agent for AgentContext {
    fn identity(&self) -> String {
        self.identity.clone()
    }

    fn broker_pool(&self) -> BrokerPool {
        self.pool.clone()
    }

    fn options(&self) -> DispatcherConfig {
        self.config.clone()
    }

    async fn reconnect(&self, broker: &str) -> Result<()> {
        Ok(self.pool.reconnect(broker).await?)
    }
}
