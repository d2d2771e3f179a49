// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! In-memory tailnet.
//!
//! [`MemoryTailnet`] keeps devices and nameservers in process memory and lets
//! callers inject failures and latency. It backs the health checker and
//! reconciler tests, and can stand in for the control plane during local
//! development.

use super::{DeviceInfo, DeviceStatus, TailnetAdapter};
use crate::errors::TailnetError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::IpAddr;
use std::time::Duration;

#[derive(Debug, Default)]
struct MemoryState {
    devices: BTreeMap<String, MemoryDevice>,
    resolvers: BTreeSet<IpAddr>,
    writes: Vec<BTreeSet<IpAddr>>,
    failing_writes: u32,
    failing_reads: u32,
    status_unavailable: bool,
    listing_unavailable: bool,
    status_delays: HashMap<String, Duration>,
    status_calls: u64,
    probes_in_flight: usize,
    peak_probes_in_flight: usize,
}

#[derive(Debug, Clone)]
struct MemoryDevice {
    info: DeviceInfo,
    online: bool,
}

/// [`TailnetAdapter`] over in-memory state.
#[derive(Debug, Default)]
pub struct MemoryTailnet {
    state: Mutex<MemoryState>,
}

impl MemoryTailnet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a device.
    pub fn add_device(&self, info: DeviceInfo, online: bool) {
        self.state
            .lock()
            .devices
            .insert(info.id.clone(), MemoryDevice { info, online });
    }

    /// Drop a device from the tailnet entirely.
    pub fn remove_device(&self, id: &str) {
        self.state.lock().devices.remove(id);
    }

    pub fn set_online(&self, id: &str, online: bool) {
        if let Some(device) = self.state.lock().devices.get_mut(id) {
            device.online = online;
        }
    }

    /// Replace the live nameservers without recording a write.
    pub fn set_resolvers(&self, resolvers: BTreeSet<IpAddr>) {
        self.state.lock().resolvers = resolvers;
    }

    #[must_use]
    pub fn resolvers(&self) -> BTreeSet<IpAddr> {
        self.state.lock().resolvers.clone()
    }

    /// Every successful write, oldest first.
    #[must_use]
    pub fn writes(&self) -> Vec<BTreeSet<IpAddr>> {
        self.state.lock().writes.clone()
    }

    #[must_use]
    pub fn write_count(&self) -> usize {
        self.state.lock().writes.len()
    }

    /// Fail the next `count` nameserver writes.
    pub fn fail_next_writes(&self, count: u32) {
        self.state.lock().failing_writes = count;
    }

    /// Fail the next `count` nameserver reads.
    pub fn fail_next_reads(&self, count: u32) {
        self.state.lock().failing_reads = count;
    }

    /// Make every `device_status` call fail at the adapter level.
    pub fn set_status_unavailable(&self, unavailable: bool) {
        self.state.lock().status_unavailable = unavailable;
    }

    /// Make `list_tagged_devices` fail.
    pub fn set_listing_unavailable(&self, unavailable: bool) {
        self.state.lock().listing_unavailable = unavailable;
    }

    /// Delay every `device_status` call for `id`.
    pub fn set_status_delay(&self, id: &str, delay: Duration) {
        self.state.lock().status_delays.insert(id.to_string(), delay);
    }

    #[must_use]
    pub fn status_calls(&self) -> u64 {
        self.state.lock().status_calls
    }

    /// Highest number of `device_status` calls observed in flight at once.
    #[must_use]
    pub fn peak_probes_in_flight(&self) -> usize {
        self.state.lock().peak_probes_in_flight
    }
}

/// Decrements the in-flight probe counter even if the probe is cancelled.
struct InFlight<'a>(&'a Mutex<MemoryState>);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.lock().probes_in_flight -= 1;
    }
}

#[async_trait]
impl TailnetAdapter for MemoryTailnet {
    async fn list_tagged_devices(&self) -> Result<Vec<DeviceInfo>, TailnetError> {
        let state = self.state.lock();
        if state.listing_unavailable {
            return Err(TailnetError::Unavailable {
                reason: "device listing unavailable".to_string(),
            });
        }
        Ok(state
            .devices
            .values()
            .map(|device| device.info.clone())
            .collect())
    }

    async fn device_status(&self, id: &str) -> Result<DeviceStatus, TailnetError> {
        let delay = {
            let mut state = self.state.lock();
            state.status_calls += 1;
            if state.status_unavailable {
                return Err(TailnetError::Unavailable {
                    reason: "connectivity status unavailable".to_string(),
                });
            }
            state.probes_in_flight += 1;
            state.peak_probes_in_flight = state.peak_probes_in_flight.max(state.probes_in_flight);
            state.status_delays.get(id).copied()
        };
        let _in_flight = InFlight(&self.state);

        // Let other probes start so concurrency is observable
        tokio::task::yield_now().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let state = self.state.lock();
        let device = state
            .devices
            .get(id)
            .ok_or_else(|| TailnetError::DeviceNotFound { id: id.to_string() })?;

        Ok(DeviceStatus {
            online: device.online,
            ipv4: device.info.ipv4,
            ipv6: device.info.ipv6,
        })
    }

    async fn read_dns_resolvers(&self) -> Result<BTreeSet<IpAddr>, TailnetError> {
        let mut state = self.state.lock();
        if state.failing_reads > 0 {
            state.failing_reads -= 1;
            return Err(TailnetError::Status {
                operation: "read_dns_resolvers".to_string(),
                status: 503,
                body: "injected read failure".to_string(),
            });
        }
        Ok(state.resolvers.clone())
    }

    async fn write_dns_resolvers(&self, resolvers: &BTreeSet<IpAddr>) -> Result<(), TailnetError> {
        let mut state = self.state.lock();
        if state.failing_writes > 0 {
            state.failing_writes -= 1;
            return Err(TailnetError::Status {
                operation: "write_dns_resolvers".to_string(),
                status: 503,
                body: "injected write failure".to_string(),
            });
        }
        state.resolvers = resolvers.clone();
        state.writes.push(resolvers.clone());
        Ok(())
    }
}
