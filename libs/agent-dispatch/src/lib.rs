// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Request/response correlation for fleet agents.
//!
//! A [`RequestDispatcher`] sends requests to the coordinator through an
//! agent's [`broker_ha::BrokerPool`], keeps each one pending until a result
//! with the same token arrives, resends on silence and, when a request
//! times out, pings the brokers it went through and has the agent
//! reconnect them if the ping is not answered either.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use agent_dispatch::{AgentContext, DispatcherConfig, RequestDispatcher, RequestOptions};
//!
//! let context = AgentContext::connect(
//!     "agent-1",
//!     connector,
//!     ConnectOptions::from_env()?,
//!     DispatcherConfig::from_env()?,
//! )
//! .await?;
//! let dispatcher = RequestDispatcher::new(Arc::new(context));
//! dispatcher
//!     .listen(&QueueSpec::new("agent-1"), &ExchangeSpec::direct("agent-1"))
//!     .await;
//!
//! let result = dispatcher
//!     .request_async("/booter/declare", payload, RequestOptions::default())?
//!     .await?;
//! ```

pub mod agent;
pub mod config;
pub mod context;
mod dispatcher;
pub mod error;
mod pending;
mod ping;

pub use agent::Agent;
pub use config::DispatcherConfig;
pub use context::AgentContext;
pub use dispatcher::{RequestDispatcher, RequestOptions};
pub use error::DispatchError;
pub use ping::PING_TYPE;
