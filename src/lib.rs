// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! # Skopos - Tailnet DNS Resolver Monitor
//!
//! Skopos keeps a tailnet's DNS nameserver list in line with the actual
//! liveness of its resolver nodes. Resolvers may run in several independent
//! clusters; any of them can fail or disappear at any time. `dnsmon` detects
//! failures, removals, recoveries and additions, and converges the nameserver
//! configuration within a bounded number of check cycles.
//!
//! ## Overview
//!
//! - The [`inventory`] holds every known resolver node and its health
//! - The [`health`] checker probes tailnet connectivity of each node
//! - The [`reconciler`] publishes the addresses of healthy nodes as nameservers
//! - The [`rpc`] server lets external watchers add and remove nodes
//!
//! ## Modules
//!
//! - [`config`] - CLI/environment configuration and validation
//! - [`constants`] - Defaults and protocol constants
//! - [`discovery`] - Seeding and refreshing the inventory from tagged devices
//! - [`duration`] - Duration string parsing (`20s`, `1m30s`)
//! - [`errors`] - Error types
//! - [`health`] - Periodic, bounded-concurrency health checks
//! - [`inventory`] - Resolver node store and health state machine
//! - [`metrics`] - Prometheus metrics
//! - [`observer`] - Logs and metrics for tailnet adapter events
//! - [`reconciler`] - Coalesced DNS reconciliation
//! - [`rpc`] - RPC server and client
//! - [`tailnet`] - Tailnet control-plane adapter
//! - [`ticker`] - Tick sources for the periodic loops
//!
//! ## Example
//!
//! ```rust,no_run
//! use skopos::inventory::{HealthCheckResult, Inventory, NodeSource, NodeStatus, ResolverNode};
//! use std::net::Ipv4Addr;
//!
//! let inventory = Inventory::new(3);
//! inventory
//!     .upsert(
//!         ResolverNode::new("nResolverA", "resolver-a", NodeSource::External)
//!             .with_ipv4(Ipv4Addr::new(100, 64, 0, 1)),
//!     )
//!     .unwrap();
//!
//! inventory
//!     .record_check(&HealthCheckResult::new("nResolverA", true))
//!     .unwrap();
//! assert_eq!(inventory.get("nResolverA").unwrap().status, NodeStatus::Healthy);
//! ```

pub mod config;
pub mod constants;
pub mod discovery;
pub mod duration;
pub mod errors;
pub mod health;
pub mod inventory;
pub mod metrics;
pub mod observer;
pub mod reconciler;
pub mod rpc;
pub mod tailnet;
pub mod ticker;
