// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! RPC surface of `dnsmon`.
//!
//! Methods are served as JSON over HTTP at
//! `POST /skopos.v1.DnsmonService/{Method}`:
//!
//! | Method               | Request                        | Effect                         |
//! |----------------------|--------------------------------|--------------------------------|
//! | `AddNode`            | `{id, hostname, ipv4?, ipv6?}` | upsert, then reconcile         |
//! | `RemoveNode`         | `{id}`                         | mark removed, then reconcile   |
//! | `TriggerHealthCheck` | `{}`                           | one out-of-cycle health pass   |
//! | `TriggerSync`        | `{}`                           | one reconciliation pass        |
//!
//! Every method answers [`RpcResponse`] once the triggered action has been
//! attempted. Delivery is at-least-once and may be reordered; every method is
//! idempotent.

pub mod client;
pub mod server;

pub use client::RpcClient;
pub use server::{router, serve, RpcState};

use crate::errors::RpcError;
use crate::inventory::{NodeSource, ResolverNode};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// Add (or update) an externally managed resolver node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddNodeRequest {
    pub id: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv6: Option<String>,
}

impl AddNodeRequest {
    /// Validate the request into an inventory record.
    ///
    /// Empty address strings are treated as absent.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::InvalidRequest`] for an empty id or an address that
    /// does not parse as its family.
    pub fn into_node(self) -> Result<ResolverNode, RpcError> {
        let id = require_id(&self.id)?;
        let ipv4 = parse_address::<Ipv4Addr>("ipv4", self.ipv4.as_deref())?;
        let ipv6 = parse_address::<Ipv6Addr>("ipv6", self.ipv6.as_deref())?;

        Ok(ResolverNode {
            ipv4,
            ipv6,
            ..ResolverNode::new(id, self.hostname.trim(), NodeSource::External)
        })
    }
}

/// Remove a resolver node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveNodeRequest {
    pub id: String,
}

impl RemoveNodeRequest {
    /// The validated node id.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::InvalidRequest`] if the id is empty.
    pub fn node_id(&self) -> Result<&str, RpcError> {
        require_id(&self.id)
    }
}

/// Run one health check cycle now.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerHealthCheckRequest {}

/// Run one reconciliation pass now.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerSyncRequest {}

/// Answer to every RPC method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RpcResponse {
    #[must_use]
    pub fn ok() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
        }
    }
}

fn require_id(id: &str) -> Result<&str, RpcError> {
    let id = id.trim();
    if id.is_empty() {
        return Err(RpcError::InvalidRequest {
            reason: "id must not be empty".to_string(),
        });
    }
    Ok(id)
}

fn parse_address<A: FromStr>(field: &str, raw: Option<&str>) -> Result<Option<A>, RpcError> {
    match raw.map(str::trim).filter(|raw| !raw.is_empty()) {
        None => Ok(None),
        Some(raw) => raw.parse().map(Some).map_err(|_| RpcError::InvalidRequest {
            reason: format!("{field} '{raw}' is not a valid address"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_add_node_request_into_node() {
        let request = AddNodeRequest {
            id: " nB ".to_string(),
            hostname: "resolver-b".to_string(),
            ipv4: Some("100.64.0.2".to_string()),
            ipv6: Some(String::new()),
        };

        let node = request.into_node().unwrap();

        assert_eq!(node.id, "nB");
        assert_eq!(node.ipv4, Some(Ipv4Addr::new(100, 64, 0, 2)));
        assert_eq!(node.ipv6, None);
        assert_eq!(node.source, NodeSource::External);
    }

    #[test]
    fn test_add_node_request_rejects_empty_id() {
        let request = AddNodeRequest {
            id: "  ".to_string(),
            ..AddNodeRequest::default()
        };

        assert!(matches!(
            request.into_node(),
            Err(RpcError::InvalidRequest { .. })
        ));
    }

    #[test]
    fn test_add_node_request_rejects_wrong_family() {
        let request = AddNodeRequest {
            id: "nB".to_string(),
            ipv4: Some("fd7a:115c:a1e0::2".to_string()),
            ..AddNodeRequest::default()
        };

        let err = request.into_node().unwrap_err();
        assert!(err.to_string().contains("ipv4"));
    }

    #[test]
    fn test_add_node_request_accepts_missing_optional_fields() {
        let request: AddNodeRequest = serde_json::from_value(json!({"id": "nB"})).unwrap();

        let node = request.into_node().unwrap();
        assert_eq!(node.hostname, "");
        assert!(node.addresses().is_empty());
    }

    #[test]
    fn test_rpc_response_omits_error_when_ok() {
        assert_eq!(serde_json::to_value(RpcResponse::ok()).unwrap(), json!({"ok": true}));
        assert_eq!(
            serde_json::to_value(RpcResponse::failed("boom")).unwrap(),
            json!({"ok": false, "error": "boom"})
        );
    }
}
