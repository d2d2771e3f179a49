// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for skopos.
//!
//! This module contains all numeric and string constants used throughout the codebase.
//! Constants are organized by category for easy maintenance.

// ============================================================================
// Health Check Defaults
// ============================================================================

/// Default interval between health check cycles (20 seconds)
pub const DEFAULT_HEALTH_CHECK_INTERVAL: &str = "20s";

/// Default per-probe timeout (5 seconds)
pub const DEFAULT_HEALTH_CHECK_TIMEOUT: &str = "5s";

/// Default number of consecutive failed probes before a node is unhealthy
pub const DEFAULT_UNHEALTHY_THRESHOLD: u32 = 1;

/// Default number of probes allowed in flight at once
pub const DEFAULT_HEALTH_CHECK_WORKERS: usize = 8;

// ============================================================================
// Reconciliation Defaults
// ============================================================================

/// Default timeout for a single DNS nameserver read or write (10 seconds)
pub const DEFAULT_DNS_UPDATE_TIMEOUT: &str = "10s";

/// Default interval of the periodic full resync (5 minutes)
pub const DEFAULT_RESYNC_INTERVAL: &str = "5m";

// ============================================================================
// Tailnet Constants
// ============================================================================

/// Base URL of the Tailscale control-plane API
pub const DEFAULT_TAILSCALE_API_URL: &str = "https://api.tailscale.com";

/// Tailnet name that refers to the API key's own tailnet
pub const DEFAULT_TAILNET: &str = "-";

/// ACL tag carried by resolver devices
pub const DEFAULT_RESOLVER_TAG: &str = "tag:resolver";

/// Per-request timeout for the Tailscale HTTP client
pub const TAILSCALE_HTTP_TIMEOUT_SECS: u64 = 30;

/// Capacity of the adapter event broadcast channel
pub const TAILNET_EVENT_CHANNEL_CAPACITY: usize = 256;

// ============================================================================
// RPC Constants
// ============================================================================

/// Default listen address for the RPC server
pub const DEFAULT_RPC_LISTEN_ADDR: &str = "0.0.0.0:8053";

/// Default RPC endpoint used by `skoposctl`
pub const DEFAULT_RPC_ENDPOINT: &str = "http://127.0.0.1:8053";

/// Service path prefix for every RPC method
pub const RPC_SERVICE_PATH: &str = "/skopos.v1.DnsmonService";

/// RPC method name: add or update a resolver node
pub const RPC_METHOD_ADD_NODE: &str = "AddNode";

/// RPC method name: remove a resolver node
pub const RPC_METHOD_REMOVE_NODE: &str = "RemoveNode";

/// RPC method name: run an out-of-cycle health pass
pub const RPC_METHOD_TRIGGER_HEALTH_CHECK: &str = "TriggerHealthCheck";

/// RPC method name: run a reconciliation pass
pub const RPC_METHOD_TRIGGER_SYNC: &str = "TriggerSync";

/// Timeout applied by the RPC client to each call
pub const RPC_CLIENT_TIMEOUT_SECS: u64 = 60;

// ============================================================================
// Process Constants
// ============================================================================

/// Exit code for any startup failure
pub const EXIT_CODE_STARTUP_FAILURE: u8 = 5;

/// Number of tokio worker threads for the daemon
pub const RUNTIME_WORKER_THREADS: usize = 4;
