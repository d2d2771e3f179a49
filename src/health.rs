// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Periodic resolver health checks.
//!
//! Each cycle probes every live node's tailnet connectivity with a per-probe
//! timeout and at most `workers` probes in flight, then folds the results into
//! the inventory. Cycles never overlap: periodic and RPC-triggered cycles share
//! one cycle lock.
//!
//! # Probe Outcomes
//!
//! | Adapter answer            | Effect                              |
//! |---------------------------|-------------------------------------|
//! | online                    | success recorded, addresses backfilled |
//! | offline                   | failure recorded                    |
//! | no answer within timeout  | failure recorded                    |
//! | device not found          | node marked `Removed`               |
//! | any other error           | whole cycle abandoned, nothing recorded |
//!
//! Any status transition or removal triggers reconciliation.

use crate::config::HealthCheckConfig;
use crate::errors::{HealthCheckError, InventoryError, TailnetError};
use crate::inventory::{HealthCheckResult, Inventory, StatusTransition};
use crate::metrics;
use crate::reconciler::TriggerHandle;
use crate::tailnet::{DeviceStatus, TailnetAdapter};
use crate::ticker::Ticker;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Summary of one completed health check cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Nodes probed
    pub probed: usize,
    /// Status changes produced by this cycle
    pub transitions: Vec<StatusTransition>,
    /// Nodes marked `Removed` because the device left the tailnet
    pub removed: Vec<String>,
}

impl CycleReport {
    /// Whether the cycle changed anything the reconciler cares about.
    #[must_use]
    pub fn changed(&self) -> bool {
        !self.transitions.is_empty() || !self.removed.is_empty()
    }
}

#[derive(Debug)]
enum ProbeResult {
    Online(DeviceStatus),
    Offline,
    TimedOut,
    NotFound,
}

impl ProbeResult {
    fn label(&self) -> &'static str {
        match self {
            Self::Online(_) => "success",
            Self::Offline => "offline",
            Self::TimedOut => "timeout",
            Self::NotFound => "not_found",
        }
    }
}

#[derive(Debug)]
struct Probe {
    node_id: String,
    observed_at: DateTime<Utc>,
    result: ProbeResult,
}

/// Probes resolver nodes and feeds the health state machine.
pub struct HealthChecker {
    inventory: Arc<Inventory>,
    adapter: Arc<dyn TailnetAdapter>,
    config: HealthCheckConfig,
    reconcile: TriggerHandle,
    shutdown: CancellationToken,
    cycle_lock: Mutex<()>,
}

impl HealthChecker {
    #[must_use]
    pub fn new(
        inventory: Arc<Inventory>,
        adapter: Arc<dyn TailnetAdapter>,
        config: HealthCheckConfig,
        reconcile: TriggerHandle,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            inventory,
            adapter,
            config,
            reconcile,
            shutdown,
            cycle_lock: Mutex::new(()),
        }
    }

    /// Run one health check cycle.
    ///
    /// Waits for a cycle already in progress to finish first.
    ///
    /// # Errors
    ///
    /// Returns [`HealthCheckError::Adapter`] if a connectivity call failed for
    /// a reason other than the device being gone; no result of the cycle is
    /// recorded in that case. Returns [`HealthCheckError::ShuttingDown`] once
    /// shutdown has begun.
    pub async fn run_cycle(&self) -> Result<CycleReport, HealthCheckError> {
        if self.shutdown.is_cancelled() {
            return Err(HealthCheckError::ShuttingDown);
        }
        let _cycle = self.cycle_lock.lock().await;
        if self.shutdown.is_cancelled() {
            return Err(HealthCheckError::ShuttingDown);
        }

        let start = Instant::now();
        let node_ids: Vec<String> = self
            .inventory
            .snapshot()
            .into_iter()
            .filter(|node| !node.is_removed())
            .map(|node| node.id)
            .collect();

        let probes: Result<Vec<Probe>, TailnetError> = stream::iter(node_ids)
            .map(|node_id| self.probe(node_id))
            .buffer_unordered(self.config.workers.max(1))
            .try_collect()
            .await;

        let probes = match probes {
            Ok(probes) => probes,
            Err(e) => {
                metrics::record_health_cycle_abandoned(start.elapsed());
                warn!(error = %e, "Health check cycle abandoned; nothing recorded");
                return Err(e.into());
            }
        };

        let report = self.apply(probes);
        metrics::record_health_cycle_completed(start.elapsed());

        if report.changed() {
            self.reconcile.trigger();
        }

        debug!(
            probed = report.probed,
            transitions = report.transitions.len(),
            removed = report.removed.len(),
            duration_ms = start.elapsed().as_millis(),
            "Health check cycle complete"
        );
        Ok(report)
    }

    /// Run cycles on every tick until shutdown.
    pub async fn run<T: Ticker>(&self, mut ticker: T) {
        info!(
            interval = ?self.config.interval,
            timeout = ?self.config.timeout,
            unhealthy_threshold = self.config.unhealthy_threshold,
            workers = self.config.workers,
            "Health checker started"
        );

        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                () = ticker.tick() => {}
            }

            match self.run_cycle().await {
                Ok(_) => {}
                Err(HealthCheckError::ShuttingDown) => break,
                // Already logged; the next tick retries
                Err(HealthCheckError::Adapter(_)) => {}
            }
        }

        info!("Health checker stopped");
    }

    async fn probe(&self, node_id: String) -> Result<Probe, TailnetError> {
        let status =
            tokio::time::timeout(self.config.timeout, self.adapter.device_status(&node_id)).await;

        let result = match status {
            Err(_) => ProbeResult::TimedOut,
            Ok(Ok(status)) if status.online => ProbeResult::Online(status),
            Ok(Ok(_)) => ProbeResult::Offline,
            Ok(Err(TailnetError::DeviceNotFound { .. })) => ProbeResult::NotFound,
            Ok(Err(e)) => return Err(e),
        };

        Ok(Probe {
            node_id,
            observed_at: Utc::now(),
            result,
        })
    }

    fn apply(&self, probes: Vec<Probe>) -> CycleReport {
        let mut report = CycleReport {
            probed: probes.len(),
            ..CycleReport::default()
        };
        let mut addresses_changed = false;

        for probe in probes {
            metrics::record_health_probe(probe.result.label());

            let success = match probe.result {
                ProbeResult::NotFound => {
                    if self.inventory.mark_removed(&probe.node_id) {
                        info!(node_id = %probe.node_id, "Resolver device left the tailnet; marked removed");
                        report.removed.push(probe.node_id);
                    }
                    continue;
                }
                ProbeResult::Online(status) => {
                    addresses_changed |= self.inventory.backfill_addresses(
                        &probe.node_id,
                        status.ipv4,
                        status.ipv6,
                    );
                    true
                }
                ProbeResult::Offline | ProbeResult::TimedOut => {
                    debug!(node_id = %probe.node_id, result = probe.result.label(), "Probe failed");
                    false
                }
            };

            let result = HealthCheckResult {
                node_id: probe.node_id,
                success,
                observed_at: probe.observed_at,
            };
            match self.inventory.record_check(&result) {
                Ok(Some(transition)) => {
                    metrics::record_status_transition(transition.from, transition.to);
                    info!(
                        node_id = %transition.node_id,
                        from = %transition.from,
                        to = %transition.to,
                        "Resolver node changed status"
                    );
                    report.transitions.push(transition);
                }
                Ok(None) => {}
                // Purged while the probe was in flight
                Err(InventoryError::NotFound { .. }) => {}
                Err(e) => error!(node_id = %result.node_id, error = %e, "Failed to record health check"),
            }
        }

        if addresses_changed && !report.changed() {
            // New addresses of an already healthy node still change the desired set
            self.reconcile.trigger();
        }

        report
    }
}

#[cfg(test)]
#[path = "health_tests.rs"]
mod health_tests;
