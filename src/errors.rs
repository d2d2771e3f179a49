// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Error types for skopos.
//!
//! This module provides specialized error types for:
//! - Tailnet control-plane operations (device listing, status, nameservers)
//! - Inventory store mutations
//! - Health check cycles and reconciliation runs
//! - RPC handling on both the server and client side
//! - Startup configuration validation
//!
//! Transient conditions (adapter failures, timeouts) are recoverable by the next
//! natural trigger. Only [`ConfigError`] and seeding failures are startup-fatal.

use crate::inventory::NodeStatus;
use std::time::Duration;
use thiserror::Error;

/// Errors returned by a [`TailnetAdapter`](crate::tailnet::TailnetAdapter).
///
/// All adapter calls may fail at runtime; none is assumed infallible.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TailnetError {
    /// The request never produced an HTTP response (DNS, TLS, connection reset)
    #[error("Tailnet request '{operation}' failed: {reason}")]
    Request {
        /// Adapter operation (e.g. `device_status`)
        operation: String,
        /// Underlying transport error
        reason: String,
    },

    /// The control plane answered with a non-success status code
    #[error("Tailnet request '{operation}' returned HTTP {status}: {body}")]
    Status {
        /// Adapter operation
        operation: String,
        /// HTTP status code
        status: u16,
        /// Response body, possibly truncated
        body: String,
    },

    /// The device is not (or no longer) part of the tailnet
    #[error("Device '{id}' not found in tailnet")]
    DeviceNotFound {
        /// Tailnet device id
        id: String,
    },

    /// The response body could not be decoded
    #[error("Failed to decode response of '{operation}': {reason}")]
    Decode {
        /// Adapter operation
        operation: String,
        /// Decoder error
        reason: String,
    },

    /// The adapter cannot serve requests at all
    #[error("Tailnet adapter unavailable: {reason}")]
    Unavailable {
        /// Why the adapter is unavailable
        reason: String,
    },
}

impl TailnetError {
    /// Whether the error is worth retrying within the same call.
    ///
    /// Rate limiting, server errors and transport failures are transient;
    /// client errors and decode failures are not.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Request { .. } | Self::Unavailable { .. } => true,
            Self::Status { status, .. } => *status == 429 || (500..600).contains(status),
            Self::DeviceNotFound { .. } | Self::Decode { .. } => false,
        }
    }
}

/// Errors returned by [`Inventory`](crate::inventory::Inventory) operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InventoryError {
    /// No record exists for the id
    #[error("Resolver node '{id}' not found in inventory")]
    NotFound {
        /// Node id
        id: String,
    },

    /// `purge` was called for a record that is not in the `Removed` state
    #[error("Resolver node '{id}' cannot be purged while {status}")]
    NotRemoved {
        /// Node id
        id: String,
        /// Current status of the record
        status: NodeStatus,
    },

    /// The node supplied to `upsert` is malformed
    #[error("Invalid resolver node '{id}': {reason}")]
    InvalidNode {
        /// Node id (may be empty)
        id: String,
        /// What is wrong with the node
        reason: String,
    },

    /// The store detected a corrupted record; the operation was rejected
    #[error("Inventory invariant violated for '{id}': {reason}")]
    InvariantViolation {
        /// Node id
        id: String,
        /// Description of the violated invariant
        reason: String,
    },
}

/// Errors that abandon a whole health check cycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HealthCheckError {
    /// The connectivity-status call itself failed; nothing was recorded
    #[error("Health check cycle abandoned: {0}")]
    Adapter(#[from] TailnetError),

    /// Shutdown has begun; no new cycle is started
    #[error("Health check cycle not started: shutting down")]
    ShuttingDown,
}

/// Errors that fail a reconciliation run.
///
/// A failed run leaves the inventory untouched; the next trigger recomputes the
/// desired state from scratch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    /// Reading or writing the live nameserver set failed
    #[error("Failed to {phase} DNS resolvers: {source}")]
    Adapter {
        /// `read` or `write`
        phase: &'static str,
        /// Adapter failure
        source: TailnetError,
    },

    /// Reading or writing the live nameserver set did not finish in time
    #[error("Timed out after {timeout:?} trying to {phase} DNS resolvers")]
    Timeout {
        /// `read` or `write`
        phase: &'static str,
        /// Configured DNS update timeout
        timeout: Duration,
    },

    /// Shutdown has begun; no new run is started
    #[error("Reconciliation not started: shutting down")]
    ShuttingDown,
}

/// Errors surfaced to RPC callers by the server.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// The request was malformed; nothing was changed
    #[error("Invalid request: {reason}")]
    InvalidRequest {
        /// What is wrong with the request
        reason: String,
    },

    /// The inventory rejected the mutation
    #[error(transparent)]
    Inventory(#[from] InventoryError),

    /// The triggered health check cycle failed
    #[error(transparent)]
    HealthCheck(#[from] HealthCheckError),

    /// The triggered reconciliation failed; any preceding mutation stays applied
    #[error("Reconciliation failed: {0}")]
    Reconcile(#[from] ReconcileError),
}

impl RpcError {
    /// Whether the caller sent something the server could not accept.
    #[must_use]
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidRequest { .. } | Self::Inventory(InventoryError::InvalidNode { .. })
        )
    }
}

/// Errors returned by the RPC client.
#[derive(Error, Debug)]
pub enum RpcClientError {
    /// The endpoint could not be parsed or joined with a method path
    #[error("Invalid RPC endpoint '{endpoint}': {reason}")]
    InvalidEndpoint {
        /// Endpoint as configured
        endpoint: String,
        /// Parser error
        reason: String,
    },

    /// The call never produced a decodable response
    #[error("RPC call {method} failed: {source}")]
    Transport {
        /// RPC method name
        method: &'static str,
        /// Underlying HTTP error
        #[source]
        source: reqwest::Error,
    },

    /// The server answered with `ok: false`
    #[error("RPC call {method} rejected (HTTP {status}): {message}")]
    Rejected {
        /// RPC method name
        method: &'static str,
        /// HTTP status code
        status: u16,
        /// Error reported by the server
        message: String,
    },
}

/// Startup configuration errors. Always fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required value was not provided
    #[error("{name} is required")]
    MissingValue {
        /// Setting name (environment variable)
        name: &'static str,
    },

    /// A duration setting could not be parsed
    #[error("Invalid duration for {name}: '{value}': {reason}")]
    InvalidDuration {
        /// Setting name
        name: &'static str,
        /// Raw value
        value: String,
        /// Parser error
        reason: String,
    },

    /// A setting is outside its allowed range
    #[error("Invalid value for {name}: {reason}")]
    OutOfRange {
        /// Setting name
        name: &'static str,
        /// Allowed range
        reason: String,
    },

    /// The API URL could not be parsed
    #[error("Invalid Tailscale API URL '{value}': {reason}")]
    InvalidUrl {
        /// Raw value
        value: String,
        /// Parser error
        reason: String,
    },
}

#[cfg(test)]
#[path = "errors_tests.rs"]
mod errors_tests;
