// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Table of requests awaiting a result

use fleet_packets::{OperationResult, Request, Token};
use indexmap::IndexMap;
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub(crate) type ResultHandler = Box<dyn FnOnce(OperationResult) + Send>;

/// A request that has been dispatched and not yet resolved.
pub(crate) struct PendingRequest {
    /// The packet as last sent, republished on retry
    pub(crate) request: Request,
    pub(crate) handler: ResultHandler,
    /// When the request was created, on the runtime clock
    pub(crate) started: Instant,
    /// Sends accepted by at least one broker
    pub(crate) attempts: u32,
    pub(crate) timer: Option<JoinHandle<()>>,
    /// Brokers that accepted the last send
    pub(crate) brokers: Vec<String>,
    /// Brokers the request may be sent through; empty means any
    pub(crate) allow: Vec<String>,
}

impl PendingRequest {
    pub(crate) fn new(
        request: Request,
        handler: ResultHandler,
        started: Instant,
        allow: Vec<String>,
    ) -> Self {
        PendingRequest {
            request,
            handler,
            started,
            attempts: 0,
            timer: None,
            brokers: Vec::new(),
            allow,
        }
    }

    /// Stop the retry timer and hand back the handler without invoking it
    pub(crate) fn into_handler(mut self) -> ResultHandler {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.handler
    }
}

/// Pending requests in dispatch order, keyed by token.
///
/// Whoever removes an entry owns its handler; an entry can only be removed
/// once, so a handler runs at most once.
#[derive(Default)]
pub(crate) struct PendingTable {
    entries: IndexMap<Token, PendingRequest>,
}

impl PendingTable {
    pub(crate) fn insert(&mut self, entry: PendingRequest) {
        let token = entry.request.token.clone();
        if let Some(previous) = self.entries.insert(token, entry) {
            tracing::warn!(
                token = %previous.request.token,
                "Replacing pending request with duplicate token"
            );
            drop(previous.into_handler());
        }
    }

    pub(crate) fn get(&self, token: &str) -> Option<&PendingRequest> {
        self.entries.get(token)
    }

    pub(crate) fn get_mut(&mut self, token: &str) -> Option<&mut PendingRequest> {
        self.entries.get_mut(token)
    }

    pub(crate) fn remove(&mut self, token: &str) -> Option<PendingRequest> {
        self.entries.shift_remove(token)
    }

    pub(crate) fn tokens(&self) -> Vec<Token> {
        self.entries.keys().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Remove every entry, oldest first
    pub(crate) fn drain(&mut self) -> Vec<PendingRequest> {
        self.entries.drain(..).map(|(_, entry)| entry).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn entry(token: &str, calls: &Arc<AtomicUsize>) -> PendingRequest {
        let mut request = Request::new("/x", json!(null), "agent-1");
        request.token = token.to_string();
        let calls = calls.clone();
        PendingRequest::new(
            request,
            Box::new(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            }),
            Instant::now(),
            Vec::new(),
        )
    }

    #[tokio::test]
    async fn tokens_keep_insertion_order() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut table = PendingTable::default();
        for token in ["c", "a", "b"] {
            table.insert(entry(token, &calls));
        }
        assert_eq!(table.tokens(), vec!["c", "a", "b"]);

        table.remove("a");
        assert_eq!(table.tokens(), vec!["c", "b"]);
        assert_eq!(table.len(), 2);
    }

    #[tokio::test]
    async fn removal_happens_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut table = PendingTable::default();
        table.insert(entry("t", &calls));

        if let Some(entry) = table.remove("t") {
            (entry.into_handler())(OperationResult::success(json!(1)));
        }
        assert!(table.remove("t").is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn drain_empties_in_order() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut table = PendingTable::default();
        table.insert(entry("1", &calls));
        table.insert(entry("2", &calls));
        let drained: Vec<Token> = table
            .drain()
            .into_iter()
            .map(|e| e.request.token)
            .collect();
        assert_eq!(drained, vec!["1", "2"]);
        assert_eq!(table.len(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
