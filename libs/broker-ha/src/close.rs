// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Completion tracking for pool shutdown

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

type Completion = Box<dyn FnOnce() + Send>;

/// Counts down broker closes and fires a completion exactly once when the
/// last one is accounted for.
pub(crate) struct CloseTracker {
    remaining: AtomicUsize,
    on_complete: Mutex<Option<Completion>>,
}

impl CloseTracker {
    pub(crate) fn new(count: usize, on_complete: impl FnOnce() + Send + 'static) -> Self {
        let tracker = CloseTracker {
            remaining: AtomicUsize::new(count),
            on_complete: Mutex::new(Some(Box::new(on_complete))),
        };
        if count == 0 {
            tracker.fire();
        }
        tracker
    }

    /// Account for one closed broker, whether it closed cleanly or not.
    pub(crate) fn close_one(&self) {
        let previous = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if previous == Ok(1) {
            self.fire();
        }
    }

    fn fire(&self) {
        let on_complete = self
            .on_complete
            .lock()
            .unwrap_or_else(|poisoned| {
                tracing::error!("Close tracker mutex was poisoned, recovering");
                poisoned.into_inner()
            })
            .take();
        if let Some(f) = on_complete {
            f();
        }
    }
}
