// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! DNS reconciliation.
//!
//! Every run recomputes the desired nameserver set from the inventory and
//! compares it with what the tailnet currently serves:
//!
//! 1. `desired` = every address of every `Healthy` node
//! 2. read the live set from the tailnet
//! 3. write `desired` only if it differs from the live set
//! 4. purge `Removed` nodes whose addresses are absent from the resulting live set
//!
//! Runs never overlap. Requests arriving while a run is in flight are folded
//! into one follow-up run that observes the latest inventory, and every caller
//! folded into a run receives that run's outcome.

use crate::discovery;
use crate::errors::{InventoryError, ReconcileError, TailnetError};
use crate::inventory::{Inventory, NodeStatus, ResolverNode};
use crate::metrics;
use crate::tailnet::TailnetAdapter;
use crate::ticker::Ticker;
use std::collections::BTreeSet;
use std::future::Future;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Result of a successful reconciliation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Nameservers the inventory asked for
    pub desired: BTreeSet<IpAddr>,
    /// Whether the live set had to be rewritten
    pub wrote: bool,
    /// Ids purged from the inventory
    pub purged: Vec<String>,
}

/// Fire-and-forget reconciliation trigger.
///
/// Triggers that arrive before the reconcile loop wakes up collapse into a
/// single run.
#[derive(Debug, Clone)]
pub struct TriggerHandle {
    notify: Arc<Notify>,
}

impl TriggerHandle {
    pub fn trigger(&self) {
        self.notify.notify_one();
    }
}

type LastOutcome = Option<Result<ReconcileOutcome, ReconcileError>>;

/// Converges the tailnet's nameservers on the healthy inventory.
pub struct Reconciler {
    inventory: Arc<Inventory>,
    adapter: Arc<dyn TailnetAdapter>,
    update_timeout: Duration,
    shutdown: CancellationToken,
    /// Held for the duration of a run; guards the outcome of the last run
    run_lock: Mutex<LastOutcome>,
    /// Number of reconcile requests made so far
    requested: AtomicU64,
    /// Highest request number covered by a finished run
    completed: AtomicU64,
    notify: Arc<Notify>,
}

impl Reconciler {
    #[must_use]
    pub fn new(
        inventory: Arc<Inventory>,
        adapter: Arc<dyn TailnetAdapter>,
        update_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            inventory,
            adapter,
            update_timeout,
            shutdown,
            run_lock: Mutex::new(None),
            requested: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Handle for requesting a run without waiting for it.
    #[must_use]
    pub fn trigger_handle(&self) -> TriggerHandle {
        TriggerHandle {
            notify: Arc::clone(&self.notify),
        }
    }

    /// Reconcile and wait for the outcome.
    ///
    /// If a run is already in flight, this waits for it and then either starts
    /// a follow-up run or, when another caller's follow-up run already
    /// observed this request, returns that run's outcome.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::ShuttingDown`] once shutdown has begun, and the
    /// adapter error or timeout of the run this request was folded into.
    pub async fn reconcile(&self) -> Result<ReconcileOutcome, ReconcileError> {
        if self.shutdown.is_cancelled() {
            return Err(ReconcileError::ShuttingDown);
        }

        let ticket = self.requested.fetch_add(1, Ordering::SeqCst) + 1;
        let mut last = self.run_lock.lock().await;

        if self.completed.load(Ordering::SeqCst) >= ticket {
            if let Some(outcome) = last.as_ref() {
                debug!(ticket, "Reconcile request covered by a completed run");
                return outcome.clone();
            }
        }

        if self.shutdown.is_cancelled() {
            return Err(ReconcileError::ShuttingDown);
        }

        // Everything requested up to here is visible to the snapshot below
        let covers = self.requested.load(Ordering::SeqCst);
        let outcome = self.run_once().await;
        self.completed.store(covers, Ordering::SeqCst);
        *last = Some(outcome.clone());
        outcome
    }

    /// Drive reconciliation until shutdown.
    ///
    /// Runs on every [`TriggerHandle::trigger`] and on every resync tick. A
    /// resync also refreshes discovery before reconciling.
    pub async fn run<T: Ticker>(&self, mut resync: T) {
        info!(update_timeout = ?self.update_timeout, "Reconciler started");

        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                () = self.notify.notified() => {
                    debug!("Reconciliation triggered");
                }
                () = resync.tick() => {
                    debug!("Periodic resync");
                    self.refresh_discovery().await;
                }
            }

            match self.reconcile().await {
                Ok(_) => {}
                Err(ReconcileError::ShuttingDown) => break,
                Err(e) => warn!(error = %e, "Reconciliation failed; will retry on next trigger"),
            }
        }

        info!("Reconciler stopped");
    }

    async fn refresh_discovery(&self) {
        if let Err(e) = discovery::refresh(self.adapter.as_ref(), &self.inventory).await {
            warn!(error = %e, "Discovery refresh failed; keeping current inventory");
        }
    }

    async fn run_once(&self) -> Result<ReconcileOutcome, ReconcileError> {
        let start = Instant::now();
        let result = self.converge().await;
        let duration = start.elapsed();

        match &result {
            Ok(outcome) => {
                metrics::record_reconciliation_success(duration);
                debug!(
                    desired = ?outcome.desired,
                    wrote = outcome.wrote,
                    purged = ?outcome.purged,
                    duration_ms = duration.as_millis(),
                    "Reconciliation complete"
                );
            }
            Err(_) => metrics::record_reconciliation_error(duration),
        }
        metrics::set_inventory_nodes(&self.inventory.status_counts());

        result
    }

    async fn converge(&self) -> Result<ReconcileOutcome, ReconcileError> {
        let snapshot = self.inventory.snapshot();
        let desired = desired_resolvers(&snapshot);

        let live = self
            .bounded("read", self.adapter.read_dns_resolvers())
            .await?;

        let wrote = live != desired;
        let live = if wrote {
            info!(
                added = ?desired.difference(&live).collect::<Vec<_>>(),
                removed = ?live.difference(&desired).collect::<Vec<_>>(),
                "Updating tailnet DNS resolvers"
            );
            let written = self
                .bounded("write", self.adapter.write_dns_resolvers(&desired))
                .await;
            metrics::record_dns_write(written.is_ok());
            written?;
            desired.clone()
        } else {
            live
        };

        let purged = self.purge_removed(&snapshot, &live);

        Ok(ReconcileOutcome {
            desired,
            wrote,
            purged,
        })
    }

    /// Purge `Removed` nodes from `snapshot` that no longer appear in `live`.
    fn purge_removed(&self, snapshot: &[ResolverNode], live: &BTreeSet<IpAddr>) -> Vec<String> {
        let mut purged = Vec::new();

        for node in snapshot.iter().filter(|node| node.is_removed()) {
            if node.addresses().iter().any(|addr| live.contains(addr)) {
                debug!(node_id = %node.id, "Removed node still served as a resolver; not purging");
                continue;
            }

            match self.inventory.purge(&node.id) {
                Ok(_) => {
                    metrics::record_node_purged();
                    info!(node_id = %node.id, hostname = %node.hostname, "Purged removed resolver node");
                    purged.push(node.id.clone());
                }
                // Re-added or already purged since the snapshot
                Err(InventoryError::NotRemoved { .. } | InventoryError::NotFound { .. }) => {}
                Err(e) => error!(node_id = %node.id, error = %e, "Failed to purge resolver node"),
            }
        }

        purged
    }

    async fn bounded<T>(
        &self,
        phase: &'static str,
        call: impl Future<Output = Result<T, TailnetError>>,
    ) -> Result<T, ReconcileError> {
        match tokio::time::timeout(self.update_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(ReconcileError::Adapter { phase, source }),
            Err(_) => Err(ReconcileError::Timeout {
                phase,
                timeout: self.update_timeout,
            }),
        }
    }
}

/// Every address of every `Healthy` node.
#[must_use]
pub fn desired_resolvers(nodes: &[ResolverNode]) -> BTreeSet<IpAddr> {
    nodes
        .iter()
        .filter(|node| node.status == NodeStatus::Healthy)
        .flat_map(ResolverNode::addresses)
        .collect()
}

#[cfg(test)]
#[path = "reconciler_tests.rs"]
mod reconciler_tests;
