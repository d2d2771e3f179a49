// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Observability for tailnet adapter events.
//!
//! The adapter never logs request lifecycle itself. It emits [`TailnetEvent`]s,
//! and [`observe`] turns them into log lines and metrics.

use crate::metrics;
use crate::tailnet::TailnetEvent;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Log and record a single adapter event.
pub fn record(event: &TailnetEvent) {
    match event {
        TailnetEvent::RequestCompleted {
            operation,
            status,
            elapsed,
        } => {
            metrics::record_tailnet_request_success(operation, *elapsed);
            debug!(
                operation,
                status,
                elapsed_ms = elapsed.as_millis(),
                "Tailnet request completed"
            );
        }
        TailnetEvent::RequestRetrying {
            operation,
            attempt,
            retry_after,
            error,
        } => {
            metrics::record_tailnet_request_retry(operation);
            warn!(
                operation,
                attempt,
                retry_after_ms = retry_after.as_millis(),
                error = %error,
                "Tailnet request failed; retrying"
            );
        }
        TailnetEvent::RequestFailed {
            operation,
            attempt,
            error,
        } => {
            metrics::record_tailnet_request_failure(operation);
            warn!(operation, attempt, error = %error, "Tailnet request failed");
        }
    }
}

/// Consume adapter events until the sink is dropped or shutdown begins.
///
/// A lagging receiver logs how many events it missed and keeps going.
/// Returns the number of events handled.
pub async fn observe(
    mut events: broadcast::Receiver<TailnetEvent>,
    shutdown: CancellationToken,
) -> u64 {
    let mut handled = 0;

    loop {
        let received = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            received = events.recv() => received,
        };

        match received {
            Ok(event) => {
                record(&event);
                handled += 1;
            }
            Err(RecvError::Lagged(missed)) => {
                metrics::record_tailnet_events_dropped(missed);
                warn!(missed, "Tailnet event observer lagged; events dropped");
            }
            Err(RecvError::Closed) => break,
        }
    }

    info!(handled, "Tailnet event observer stopped");
    handled
}
