// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

use thiserror::Error;

/// Errors returned synchronously by [`crate::RequestDispatcher`].
///
/// Delivery problems after a request was accepted are reported through its
/// result handler, or only logged.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The agent has no identity or the dispatcher was terminated
    #[error("Request dispatcher is not initialized")]
    NotInitialized,
}
