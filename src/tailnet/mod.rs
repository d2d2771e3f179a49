// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Tailnet control-plane capability.
//!
//! The reconciliation engine never talks to the tailnet directly; it consumes the
//! [`TailnetAdapter`] trait, which supplies device listing, per-device
//! connectivity status, and nameserver read/write. Every call may fail with a
//! transient [`TailnetError`].
//!
//! ## Implementations
//!
//! - [`TailscaleApiClient`] - Tailscale HTTP control-plane API (production)
//! - [`MemoryTailnet`] - in-memory tailnet for tests and local development
//!
//! Adapters report request lifecycle through [`TailnetEvent`]s on an
//! [`EventSink`] rather than logging inline; the [`observer`](crate::observer)
//! turns those events into logs and metrics.

pub mod api;
pub mod events;
pub mod memory;
pub mod retry;

pub use api::TailscaleApiClient;
pub use events::{EventSink, TailnetEvent};
pub use memory::MemoryTailnet;

use crate::errors::TailnetError;
use crate::inventory::{NodeSource, ResolverNode};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// A tagged resolver device as listed by the control plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: String,
    pub hostname: String,
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
    pub tags: Vec<String>,
}

impl DeviceInfo {
    /// Inventory record for this device.
    #[must_use]
    pub fn to_node(&self, source: NodeSource) -> ResolverNode {
        ResolverNode {
            ipv4: self.ipv4,
            ipv6: self.ipv6,
            ..ResolverNode::new(self.id.clone(), self.hostname.clone(), source)
        }
    }
}

/// Connectivity of a single device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceStatus {
    /// Whether the device is currently connected to the tailnet
    pub online: bool,
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
}

/// Split a list of tailnet addresses into the first IPv4 and first IPv6 entry.
///
/// Entries that are not IP addresses (or carry a prefix length) are parsed up to
/// the `/`; anything else is skipped.
#[must_use]
pub fn split_addresses<S: AsRef<str>>(addresses: &[S]) -> (Option<Ipv4Addr>, Option<Ipv6Addr>) {
    let mut ipv4 = None;
    let mut ipv6 = None;

    for raw in addresses {
        let raw = raw.as_ref();
        let host = raw.split('/').next().unwrap_or(raw);
        match host.parse::<IpAddr>() {
            Ok(IpAddr::V4(addr)) if ipv4.is_none() => ipv4 = Some(addr),
            Ok(IpAddr::V6(addr)) if ipv6.is_none() => ipv6 = Some(addr),
            _ => {}
        }
    }

    (ipv4, ipv6)
}

/// Control-plane operations consumed by the reconciliation engine.
#[async_trait]
pub trait TailnetAdapter: Send + Sync {
    /// List every device carrying the resolver tag.
    async fn list_tagged_devices(&self) -> Result<Vec<DeviceInfo>, TailnetError>;

    /// Connectivity of one device.
    ///
    /// Returns [`TailnetError::DeviceNotFound`] once the device has left the
    /// tailnet.
    async fn device_status(&self, id: &str) -> Result<DeviceStatus, TailnetError>;

    /// The nameservers currently configured for the tailnet.
    async fn read_dns_resolvers(&self) -> Result<BTreeSet<IpAddr>, TailnetError>;

    /// Replace the tailnet's nameservers with `resolvers`.
    async fn write_dns_resolvers(&self, resolvers: &BTreeSet<IpAddr>) -> Result<(), TailnetError>;
}
