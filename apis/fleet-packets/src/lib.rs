// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Wire packets exchanged between fleet agents and the coordinator.
//!
//! An agent sends [`Request`]s (which expect a correlated [`ResultPacket`])
//! and [`Push`]es (fire-and-forget) through the broker pool. The
//! coordinator answers requests with a [`ResultPacket`] carrying the same
//! token.
//!
//! # Modules
//!
//! - [`result`] - Operation outcome carried inside result packets
//! - [`serializer`] - Packet encoding contract and the default JSON codec

pub mod result;
pub mod serializer;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};

pub use result::{OperationResult, ResultStatus};
pub use serializer::{JsonSerializer, Serializer, SerializerError};

// ============================================================================
// Type Aliases
// ============================================================================

/// Correlation token attached to a request and echoed in its result
pub type Token = String;

/// Identity of an agent or of the coordinator
pub type AgentId = String;

/// Generate a fresh, unique correlation token.
pub fn generate_token() -> Token {
    uuid::Uuid::new_v4().simple().to_string()
}

// ============================================================================
// Packets
// ============================================================================

/// Discriminant of a [`Packet`], used to filter inbound traffic.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PacketKind {
    Request,
    Push,
    Result,
}

/// Optional packet fields to include when a packet is rendered for logs.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LogField {
    Target,
    Tries,
    Persistent,
    CreatedAt,
    Payload,
}

/// A request for work that expects a correlated result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Correlation token, reused by resends of the same request
    pub token: Token,
    /// Operation path, e.g. `/booter/declare`
    #[serde(rename = "type")]
    pub message_type: String,
    pub payload: Value,
    /// Identity of the sending agent
    pub from: AgentId,
    /// Specific responder to route to, if any
    #[serde(default)]
    pub target: Option<AgentId>,
    /// Whether the broker should persist the message
    #[serde(default)]
    pub persistent: bool,
    /// When the request was first created; resends keep the original value
    pub created_at: DateTime<Utc>,
    /// Tokens of earlier attempts of this request, oldest first
    #[serde(default)]
    pub tries: Vec<Token>,
}

impl Request {
    pub fn new(message_type: impl Into<String>, payload: Value, from: impl Into<String>) -> Self {
        Request {
            token: generate_token(),
            message_type: message_type.into(),
            payload,
            from: from.into(),
            target: None,
            persistent: false,
            created_at: Utc::now(),
            tries: Vec::new(),
        }
    }
}

/// A fire-and-forget message. Its token only serves log correlation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Push {
    pub token: Token,
    #[serde(rename = "type")]
    pub message_type: String,
    pub payload: Value,
    pub from: AgentId,
    #[serde(default)]
    pub target: Option<AgentId>,
    #[serde(default)]
    pub persistent: bool,
    pub created_at: DateTime<Utc>,
}

impl Push {
    pub fn new(message_type: impl Into<String>, payload: Value, from: impl Into<String>) -> Self {
        Push {
            token: generate_token(),
            message_type: message_type.into(),
            payload,
            from: from.into(),
            target: None,
            persistent: false,
            created_at: Utc::now(),
        }
    }
}

/// The answer to a [`Request`].
///
/// `results` normally maps responder identity to an [`OperationResult`];
/// see [`OperationResult::from_results`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultPacket {
    pub token: Token,
    pub from: AgentId,
    pub results: Value,
}

impl ResultPacket {
    pub fn new(token: impl Into<String>, from: impl Into<String>, results: Value) -> Self {
        ResultPacket {
            token: token.into(),
            from: from.into(),
            results,
        }
    }
}

/// Any packet that travels over the broker pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Packet {
    Request(Request),
    Push(Push),
    Result(ResultPacket),
}

impl Packet {
    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::Request(_) => PacketKind::Request,
            Packet::Push(_) => PacketKind::Push,
            Packet::Result(_) => PacketKind::Result,
        }
    }

    pub fn token(&self) -> &str {
        match self {
            Packet::Request(r) => &r.token,
            Packet::Push(p) => &p.token,
            Packet::Result(r) => &r.token,
        }
    }

    /// Whether this packet is a resend of an earlier attempt
    pub fn is_retry(&self) -> bool {
        matches!(self, Packet::Request(r) if !r.tries.is_empty())
    }

    /// Render the packet for a log line.
    ///
    /// The kind, type, token and sender are always shown. `filter` selects
    /// which optional fields are added; `None` shows all of them.
    pub fn to_log_string(&self, filter: Option<&[LogField]>) -> String {
        let wants = |field: LogField| filter.is_none_or(|f| f.contains(&field));

        match self {
            Packet::Request(r) => {
                let mut s = format!("[request {}] <{}> from {}", r.message_type, r.token, r.from);
                push_target(&mut s, r.target.as_deref(), wants(LogField::Target));
                if wants(LogField::Tries) && !r.tries.is_empty() {
                    s.push_str(&format!(", tries {}", r.tries.join(", ")));
                }
                if wants(LogField::Persistent) && r.persistent {
                    s.push_str(", persistent");
                }
                if wants(LogField::CreatedAt) {
                    s.push_str(&format!(", created_at {}", r.created_at.to_rfc3339()));
                }
                if wants(LogField::Payload) {
                    s.push_str(&format!(", payload {}", r.payload));
                }
                s
            }
            Packet::Push(p) => {
                let mut s = format!("[push {}] <{}> from {}", p.message_type, p.token, p.from);
                push_target(&mut s, p.target.as_deref(), wants(LogField::Target));
                if wants(LogField::Persistent) && p.persistent {
                    s.push_str(", persistent");
                }
                if wants(LogField::Payload) {
                    s.push_str(&format!(", payload {}", p.payload));
                }
                s
            }
            Packet::Result(r) => {
                let mut s = format!("[result] <{}> from {}", r.token, r.from);
                if wants(LogField::Payload) {
                    s.push_str(&format!(", results {}", r.results));
                }
                s
            }
        }
    }
}

fn push_target(s: &mut String, target: Option<&str>, wanted: bool) {
    if let (true, Some(t)) = (wanted, target) {
        s.push_str(&format!(", target {}", t));
    }
}

impl From<Request> for Packet {
    fn from(r: Request) -> Self {
        Packet::Request(r)
    }
}

impl From<Push> for Packet {
    fn from(p: Push) -> Self {
        Packet::Push(p)
    }
}

impl From<ResultPacket> for Packet {
    fn from(r: ResultPacket) -> Self {
        Packet::Result(r)
    }
}
