// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Packet encoding contract and the default JSON codec

use bytes::Bytes;
use thiserror::Error;

use crate::Packet;

/// Errors produced while encoding or decoding packets
#[derive(Debug, Error)]
pub enum SerializerError {
    #[error("Failed to encode packet: {0}")]
    Encode(String),

    #[error("Failed to decode packet: {0}")]
    Decode(String),
}

/// Turns packets into bytes for the wire and back.
pub trait Serializer: Send + Sync {
    fn dump(&self, packet: &Packet) -> Result<Bytes, SerializerError>;

    fn load(&self, bytes: &[u8]) -> Result<Packet, SerializerError>;
}

/// JSON serializer backed by `serde_json`
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn dump(&self, packet: &Packet) -> Result<Bytes, SerializerError> {
        serde_json::to_vec(packet)
            .map(Bytes::from)
            .map_err(|e| SerializerError::Encode(e.to_string()))
    }

    fn load(&self, bytes: &[u8]) -> Result<Packet, SerializerError> {
        serde_json::from_slice(bytes).map_err(|e| SerializerError::Decode(e.to_string()))
    }
}
