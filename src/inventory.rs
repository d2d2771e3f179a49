// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! In-memory inventory of resolver nodes.
//!
//! The [`Inventory`] is the only mutable shared state in the process. Every
//! component reaches it through its operations; no caller ever holds a reference
//! to the underlying map. All mutations for a node are linearized by a single
//! lock around the map, so concurrent calls for the same id can never leave two
//! records behind, and the last applied mutation wins.
//!
//! # Health State Machine
//!
//! ```text
//! Unknown   --success-->                  Healthy
//! Unknown   --failure, count == T-->      Unhealthy
//! Healthy   --failure, count <  T-->      Healthy
//! Healthy   --failure, count == T-->      Unhealthy
//! Unhealthy --success-->                  Healthy
//! any       --mark_removed-->             Removed
//! Removed   --purge-->                    (deleted)
//! ```
//!
//! `Removed` is absorbing: health results for a removed node are ignored and it
//! only leaves the inventory through [`Inventory::purge`], or is replaced by a
//! fresh record when the same id is upserted again.

use crate::errors::InventoryError;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tracing::{debug, error, warn};

/// Health status of a resolver node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NodeStatus {
    /// Not probed successfully yet
    Unknown,
    /// Reachable over the tailnet; published as a nameserver
    Healthy,
    /// Failed `UnhealthyThreshold` consecutive probes
    Unhealthy,
    /// Scheduled for purge once excluded from live DNS
    Removed,
}

impl NodeStatus {
    /// Lowercase label used in logs and metrics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
            Self::Removed => "removed",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "Unknown",
            Self::Healthy => "Healthy",
            Self::Unhealthy => "Unhealthy",
            Self::Removed => "Removed",
        };
        f.write_str(name)
    }
}

/// Where a node entered the inventory from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeSource {
    /// Found by listing tagged tailnet devices
    Discovered,
    /// Added through the `AddNode` RPC
    External,
}

/// One known resolver device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverNode {
    /// Stable tailnet device id (inventory key)
    pub id: String,
    /// Device hostname
    pub hostname: String,
    /// Tailnet IPv4 address
    pub ipv4: Option<Ipv4Addr>,
    /// Tailnet IPv6 address
    pub ipv6: Option<Ipv6Addr>,
    /// Current health status
    pub status: NodeStatus,
    /// Failed probes since the last success
    pub consecutive_failures: u32,
    /// Time of the most recent probe result
    pub last_checked_at: Option<DateTime<Utc>>,
    /// How the node entered the inventory
    pub source: NodeSource,
}

impl ResolverNode {
    /// A fresh node in the `Unknown` state with no addresses.
    #[must_use]
    pub fn new(id: impl Into<String>, hostname: impl Into<String>, source: NodeSource) -> Self {
        Self {
            id: id.into(),
            hostname: hostname.into(),
            ipv4: None,
            ipv6: None,
            status: NodeStatus::Unknown,
            consecutive_failures: 0,
            last_checked_at: None,
            source,
        }
    }

    #[must_use]
    pub fn with_ipv4(mut self, ipv4: Ipv4Addr) -> Self {
        self.ipv4 = Some(ipv4);
        self
    }

    #[must_use]
    pub fn with_ipv6(mut self, ipv6: Ipv6Addr) -> Self {
        self.ipv6 = Some(ipv6);
        self
    }

    /// Every address this node would contribute to the nameserver list.
    #[must_use]
    pub fn addresses(&self) -> Vec<IpAddr> {
        self.ipv4
            .map(IpAddr::V4)
            .into_iter()
            .chain(self.ipv6.map(IpAddr::V6))
            .collect()
    }

    #[must_use]
    pub fn is_removed(&self) -> bool {
        self.status == NodeStatus::Removed
    }

    /// Reset the health fields so the record starts over as `Unknown`.
    fn reset_health(&mut self) {
        self.status = NodeStatus::Unknown;
        self.consecutive_failures = 0;
        self.last_checked_at = None;
    }
}

/// Outcome of a single probe, folded into the node record by
/// [`Inventory::record_check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheckResult {
    pub node_id: String,
    pub success: bool,
    pub observed_at: DateTime<Utc>,
}

impl HealthCheckResult {
    /// A result observed now.
    #[must_use]
    pub fn new(node_id: impl Into<String>, success: bool) -> Self {
        Self {
            node_id: node_id.into(),
            success,
            observed_at: Utc::now(),
        }
    }
}

/// A status change produced by the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusTransition {
    pub node_id: String,
    pub from: NodeStatus,
    pub to: NodeStatus,
}

/// What [`Inventory::upsert`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// A new record was created
    Inserted,
    /// Addressing fields of a live record changed
    Updated,
    /// The record already matched; nothing changed
    Unchanged,
    /// A `Removed` record was replaced by a fresh `Unknown` one
    Restored,
}

/// Concurrency-safe store of resolver nodes keyed by id.
#[derive(Debug)]
pub struct Inventory {
    nodes: RwLock<HashMap<String, ResolverNode>>,
    unhealthy_threshold: u32,
}

impl Inventory {
    /// Create an empty inventory.
    ///
    /// A threshold of zero is treated as one.
    #[must_use]
    pub fn new(unhealthy_threshold: u32) -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            unhealthy_threshold: unhealthy_threshold.max(1),
        }
    }

    /// Consecutive failures that turn a node `Unhealthy`.
    #[must_use]
    pub fn unhealthy_threshold(&self) -> u32 {
        self.unhealthy_threshold
    }

    /// Insert a node, or update the addressing fields of an existing one.
    ///
    /// Health fields of a live record are never touched, so repeating an
    /// `AddNode` cannot regress a node's status. Addresses and hostname are
    /// only overwritten by supplied values; absent fields keep what is known.
    /// Upserting an id that is currently `Removed` replaces it with a fresh
    /// `Unknown` record.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::InvalidNode`] if the id is empty, and
    /// [`InventoryError::InvariantViolation`] if the stored record is corrupt.
    pub fn upsert(&self, node: ResolverNode) -> Result<UpsertOutcome, InventoryError> {
        if node.id.trim().is_empty() {
            return Err(InventoryError::InvalidNode {
                id: node.id,
                reason: "id must not be empty".to_string(),
            });
        }

        let mut nodes = self.nodes.write();

        let Some(existing) = nodes.get_mut(&node.id) else {
            let mut fresh = node;
            fresh.reset_health();
            debug!(node_id = %fresh.id, hostname = %fresh.hostname, source = ?fresh.source, "Inserted resolver node");
            nodes.insert(fresh.id.clone(), fresh);
            return Ok(UpsertOutcome::Inserted);
        };

        check_record(&node.id, existing)?;

        if existing.is_removed() {
            let mut fresh = node;
            fresh.reset_health();
            debug!(node_id = %fresh.id, "Restored previously removed resolver node");
            *existing = fresh;
            return Ok(UpsertOutcome::Restored);
        }

        let mut changed = false;
        if !node.hostname.is_empty() && node.hostname != existing.hostname {
            existing.hostname = node.hostname;
            changed = true;
        }
        if node.ipv4.is_some() && node.ipv4 != existing.ipv4 {
            existing.ipv4 = node.ipv4;
            changed = true;
        }
        if node.ipv6.is_some() && node.ipv6 != existing.ipv6 {
            existing.ipv6 = node.ipv6;
            changed = true;
        }

        if changed {
            debug!(node_id = %existing.id, ipv4 = ?existing.ipv4, ipv6 = ?existing.ipv6, "Updated resolver node addressing");
            Ok(UpsertOutcome::Updated)
        } else {
            Ok(UpsertOutcome::Unchanged)
        }
    }

    /// Move a node to `Removed`.
    ///
    /// Idempotent: unknown and already-removed ids are a successful no-op.
    /// Returns whether the record changed state.
    pub fn mark_removed(&self, id: &str) -> bool {
        self.mark_removed_if(id, |_| true)
    }

    /// Move a node to `Removed` only if `predicate` holds for its current
    /// record.
    ///
    /// The check and the removal happen under one write lock, so a record
    /// replaced since the caller's last snapshot is judged as it is now.
    /// Returns whether the record changed state.
    pub fn mark_removed_if(&self, id: &str, predicate: impl FnOnce(&ResolverNode) -> bool) -> bool {
        let mut nodes = self.nodes.write();
        match nodes.get_mut(id) {
            Some(node) if !node.is_removed() && predicate(node) => {
                debug!(node_id = %id, previous = %node.status, "Marked resolver node removed");
                node.status = NodeStatus::Removed;
                true
            }
            _ => false,
        }
    }

    /// Fold a probe result into the node's status and failure count.
    ///
    /// Returns the status transition, if one occurred, so the caller can decide
    /// whether to trigger reconciliation. Results for a `Removed` node are
    /// ignored.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::NotFound`] if the node was purged in the
    /// meantime, and [`InventoryError::InvariantViolation`] if the stored record
    /// is corrupt.
    pub fn record_check(
        &self,
        result: &HealthCheckResult,
    ) -> Result<Option<StatusTransition>, InventoryError> {
        let mut nodes = self.nodes.write();
        let node = nodes
            .get_mut(&result.node_id)
            .ok_or_else(|| InventoryError::NotFound {
                id: result.node_id.clone(),
            })?;

        check_record(&result.node_id, node)?;

        if node.is_removed() {
            return Ok(None);
        }

        node.last_checked_at = Some(result.observed_at);
        let from = node.status;

        if result.success {
            node.consecutive_failures = 0;
            node.status = NodeStatus::Healthy;
        } else {
            node.consecutive_failures = node.consecutive_failures.saturating_add(1);
            if node.status != NodeStatus::Unhealthy
                && node.consecutive_failures >= self.unhealthy_threshold
            {
                node.status = NodeStatus::Unhealthy;
            }
        }

        if node.status == from {
            return Ok(None);
        }

        Ok(Some(StatusTransition {
            node_id: node.id.clone(),
            from,
            to: node.status,
        }))
    }

    /// Fill in addresses that are not yet known for a live node.
    ///
    /// Known addresses are never overwritten. Returns whether anything changed.
    pub fn backfill_addresses(
        &self,
        id: &str,
        ipv4: Option<Ipv4Addr>,
        ipv6: Option<Ipv6Addr>,
    ) -> bool {
        let mut nodes = self.nodes.write();
        let Some(node) = nodes.get_mut(id).filter(|node| !node.is_removed()) else {
            return false;
        };

        let mut changed = false;
        if node.ipv4.is_none() && ipv4.is_some() {
            node.ipv4 = ipv4;
            changed = true;
        }
        if node.ipv6.is_none() && ipv6.is_some() {
            node.ipv6 = ipv6;
            changed = true;
        }

        if changed {
            debug!(node_id = %id, ipv4 = ?node.ipv4, ipv6 = ?node.ipv6, "Backfilled resolver node addresses");
        }
        changed
    }

    /// Delete a `Removed` node.
    ///
    /// Called by the reconciler once the live DNS configuration no longer
    /// contains the node's addresses.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::NotFound`] if there is no record, and
    /// [`InventoryError::NotRemoved`] if the record is not `Removed` (for
    /// example because it was re-added after the reconciler's snapshot).
    pub fn purge(&self, id: &str) -> Result<ResolverNode, InventoryError> {
        let mut nodes = self.nodes.write();
        let status = nodes
            .get(id)
            .map(|node| node.status)
            .ok_or_else(|| InventoryError::NotFound { id: id.to_string() })?;

        if status != NodeStatus::Removed {
            warn!(node_id = %id, status = %status, "Refusing to purge resolver node that is not removed");
            return Err(InventoryError::NotRemoved {
                id: id.to_string(),
                status,
            });
        }

        nodes
            .remove(id)
            .ok_or_else(|| InventoryError::NotFound { id: id.to_string() })
    }

    /// Point-in-time copy of every record, ordered by id.
    ///
    /// The lock is released before the copy is returned.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ResolverNode> {
        let mut nodes: Vec<ResolverNode> = self.nodes.read().values().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<ResolverNode> {
        self.nodes.read().get(id).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    /// Number of records per status; statuses with no records are omitted.
    #[must_use]
    pub fn status_counts(&self) -> BTreeMap<NodeStatus, usize> {
        let mut counts = BTreeMap::new();
        for node in self.nodes.read().values() {
            *counts.entry(node.status).or_insert(0) += 1;
        }
        counts
    }
}

/// Reject operations on a record whose stored id disagrees with its key.
fn check_record(key: &str, node: &ResolverNode) -> Result<(), InventoryError> {
    if node.id == key {
        return Ok(());
    }

    error!(
        key = %key,
        record_id = %node.id,
        "Inventory corruption: record stored under a different id"
    );
    Err(InventoryError::InvariantViolation {
        id: key.to_string(),
        reason: format!("record is stored under key '{key}' but carries id '{}'", node.id),
    })
}

#[cfg(test)]
#[path = "inventory_tests.rs"]
mod inventory_tests;
