// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Resolver discovery from the tagged tailnet device list.
//!
//! [`seed`] fills the inventory once at startup; its failure is fatal.
//! [`refresh`] runs on every resync and keeps discovered nodes in line with the
//! device list. Nodes added through `AddNode` are never removed here.

use crate::errors::TailnetError;
use crate::inventory::{Inventory, NodeSource, NodeStatus, UpsertOutcome};
use crate::tailnet::TailnetAdapter;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// What a [`refresh`] changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    /// Devices seen for the first time
    pub added: Vec<String>,
    /// Known devices whose hostname or addresses changed
    pub updated: Vec<String>,
    /// Discovered nodes no longer tagged in the tailnet
    pub removed: Vec<String>,
}

impl DiscoveryReport {
    /// Whether the inventory changed.
    #[must_use]
    pub fn changed(&self) -> bool {
        !(self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty())
    }
}

/// Upsert every tagged device as a `Discovered` node.
///
/// # Errors
///
/// Returns the adapter error if the device list cannot be fetched.
pub async fn seed(adapter: &dyn TailnetAdapter, inventory: &Inventory) -> Result<usize, TailnetError> {
    let devices = adapter.list_tagged_devices().await?;

    let mut seeded = 0;
    for device in &devices {
        match inventory.upsert(device.to_node(NodeSource::Discovered)) {
            Ok(_) => seeded += 1,
            Err(e) => warn!(device_id = %device.id, error = %e, "Skipping tagged device"),
        }
    }

    info!(devices = devices.len(), seeded, "Seeded inventory from tailnet");
    Ok(seeded)
}

/// Reconcile discovered nodes with the current device list.
///
/// New devices are inserted and addressing of known ones is refreshed.
/// `Discovered` nodes missing from the list are marked `Removed`. A node that
/// is already `Removed` is not restored by discovery; only `AddNode` does that.
///
/// # Errors
///
/// Returns the adapter error if the device list cannot be fetched. Nothing is
/// changed in that case.
pub async fn refresh(
    adapter: &dyn TailnetAdapter,
    inventory: &Inventory,
) -> Result<DiscoveryReport, TailnetError> {
    let devices = adapter.list_tagged_devices().await?;
    let known: HashMap<String, (NodeStatus, NodeSource)> = inventory
        .snapshot()
        .into_iter()
        .map(|node| (node.id, (node.status, node.source)))
        .collect();

    let mut report = DiscoveryReport::default();
    let mut listed = HashSet::with_capacity(devices.len());

    for device in &devices {
        listed.insert(device.id.as_str());
        if matches!(known.get(&device.id), Some((NodeStatus::Removed, _))) {
            debug!(device_id = %device.id, "Tagged device is pending removal; not restoring");
            continue;
        }

        match inventory.upsert(device.to_node(NodeSource::Discovered)) {
            Ok(UpsertOutcome::Inserted | UpsertOutcome::Restored) => {
                report.added.push(device.id.clone());
            }
            Ok(UpsertOutcome::Updated) => report.updated.push(device.id.clone()),
            Ok(UpsertOutcome::Unchanged) => {}
            Err(e) => warn!(device_id = %device.id, error = %e, "Skipping tagged device"),
        }
    }

    report.removed = remove_vanished(inventory, &known, &listed);

    report.added.sort();
    report.updated.sort();
    report.removed.sort();

    if report.changed() {
        info!(
            added = ?report.added,
            updated = ?report.updated,
            removed = ?report.removed,
            "Discovery refresh changed inventory"
        );
    }
    Ok(report)
}

/// Mark `Discovered` nodes that are no longer listed as `Removed`.
///
/// `known` is a snapshot and may be stale; the source is checked again under
/// the store lock, so a node re-added over RPC in the meantime is kept.
fn remove_vanished(
    inventory: &Inventory,
    known: &HashMap<String, (NodeStatus, NodeSource)>,
    listed: &HashSet<&str>,
) -> Vec<String> {
    let mut removed = Vec::new();
    for (id, (status, source)) in known {
        if *source != NodeSource::Discovered
            || *status == NodeStatus::Removed
            || listed.contains(id.as_str())
        {
            continue;
        }
        if inventory.mark_removed_if(id, |node| node.source == NodeSource::Discovered) {
            removed.push(id.clone());
        }
    }
    removed
}

#[cfg(test)]
#[path = "discovery_tests.rs"]
mod discovery_tests;
