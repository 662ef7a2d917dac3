// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Operation outcome carried inside result packets

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};

/// Outcome category of an operation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Success,
    Error,
    /// No result arrived within the retry budget
    Timeout,
    /// The request could not be delivered to any responder
    NonDelivery,
    /// The responder asked the sender to retry later
    Retry,
    Cancel,
}

/// The outcome handed to a request's result handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    pub status: ResultStatus,
    #[serde(default)]
    pub content: Value,
}

impl OperationResult {
    pub fn success(content: Value) -> Self {
        OperationResult {
            status: ResultStatus::Success,
            content,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        OperationResult {
            status: ResultStatus::Error,
            content: Value::String(message.into()),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        OperationResult {
            status: ResultStatus::Timeout,
            content: Value::String(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Success
    }

    pub fn is_timeout(&self) -> bool {
        self.status == ResultStatus::Timeout
    }

    /// Extract the outcome from the `results` field of a result packet.
    ///
    /// Responders send either a bare operation result or a map of responder
    /// identity to operation result. In the map form the first entry that
    /// parses wins. Anything else is treated as successful content.
    pub fn from_results(results: &Value) -> OperationResult {
        if let Ok(result) = serde_json::from_value::<OperationResult>(results.clone()) {
            return result;
        }

        if let Value::Object(map) = results {
            if let Some(result) = map
                .values()
                .find_map(|v| serde_json::from_value::<OperationResult>(v.clone()).ok())
            {
                return result;
            }
        }

        OperationResult::success(results.clone())
    }

    /// Content as text, for results whose content is a message
    pub fn message(&self) -> Option<&str> {
        self.content.as_str()
    }
}
