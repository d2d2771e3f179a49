// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Adapter lifecycle events.

use std::time::Duration;
use tokio::sync::broadcast;

/// Something the adapter did that observability may care about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TailnetEvent {
    /// A control-plane request returned a success status
    RequestCompleted {
        operation: &'static str,
        status: u16,
        elapsed: Duration,
    },
    /// A transient failure is being retried
    RequestRetrying {
        operation: &'static str,
        attempt: u32,
        retry_after: Duration,
        error: String,
    },
    /// A request failed for good
    RequestFailed {
        operation: &'static str,
        attempt: u32,
        error: String,
    },
}

impl TailnetEvent {
    #[must_use]
    pub fn operation(&self) -> &'static str {
        match self {
            Self::RequestCompleted { operation, .. }
            | Self::RequestRetrying { operation, .. }
            | Self::RequestFailed { operation, .. } => operation,
        }
    }
}

/// Broadcast sender for [`TailnetEvent`]s.
///
/// Emitting never blocks and never fails; events are dropped when nobody is
/// subscribed.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: broadcast::Sender<TailnetEvent>,
}

impl EventSink {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TailnetEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: TailnetEvent) {
        // Err only means there are no subscribers
        let _ = self.tx.send(event);
    }
}
