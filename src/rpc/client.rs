// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Client for the `dnsmon` RPC surface.
//!
//! Used by `skoposctl` and by external watchers that report resolver services
//! appearing and disappearing.

use super::{AddNodeRequest, RemoveNodeRequest, RpcResponse, TriggerHealthCheckRequest, TriggerSyncRequest};
use crate::constants::{
    RPC_CLIENT_TIMEOUT_SECS, RPC_METHOD_ADD_NODE, RPC_METHOD_REMOVE_NODE,
    RPC_METHOD_TRIGGER_HEALTH_CHECK, RPC_METHOD_TRIGGER_SYNC, RPC_SERVICE_PATH,
};
use crate::errors::RpcClientError;
use reqwest::Client as HttpClient;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Typed client for one `dnsmon` endpoint.
#[derive(Debug, Clone)]
pub struct RpcClient {
    http: HttpClient,
    endpoint: Url,
}

impl RpcClient {
    /// Create a client for `endpoint` (for example `http://dnsmon:8053`).
    ///
    /// # Errors
    ///
    /// Returns [`RpcClientError::InvalidEndpoint`] if the endpoint is not an
    /// `http` or `https` URL, or the HTTP client cannot be built.
    pub fn new(endpoint: &str) -> Result<Self, RpcClientError> {
        let invalid = |reason: String| RpcClientError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason,
        };

        let parsed = Url::parse(endpoint).map_err(|e| invalid(e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.cannot_be_a_base() {
            return Err(invalid("expected an http(s) URL".to_string()));
        }

        let http = HttpClient::builder()
            .timeout(Duration::from_secs(RPC_CLIENT_TIMEOUT_SECS))
            .build()
            .map_err(|e| invalid(e.to_string()))?;

        Ok(Self {
            http,
            endpoint: parsed,
        })
    }

    /// `AddNode`: add or update an externally managed resolver.
    ///
    /// # Errors
    ///
    /// Returns [`RpcClientError::Rejected`] if the server answered `ok: false`,
    /// and [`RpcClientError::Transport`] if no answer was received.
    pub async fn add_node(&self, request: &AddNodeRequest) -> Result<(), RpcClientError> {
        self.call(RPC_METHOD_ADD_NODE, request).await
    }

    /// `RemoveNode`: remove a resolver.
    ///
    /// # Errors
    ///
    /// See [`RpcClient::add_node`].
    pub async fn remove_node(&self, id: &str) -> Result<(), RpcClientError> {
        let request = RemoveNodeRequest { id: id.to_string() };
        self.call(RPC_METHOD_REMOVE_NODE, &request).await
    }

    /// `TriggerHealthCheck`: run one health check cycle now.
    ///
    /// # Errors
    ///
    /// See [`RpcClient::add_node`].
    pub async fn trigger_health_check(&self) -> Result<(), RpcClientError> {
        self.call(RPC_METHOD_TRIGGER_HEALTH_CHECK, &TriggerHealthCheckRequest {})
            .await
    }

    /// `TriggerSync`: run one reconciliation pass now.
    ///
    /// # Errors
    ///
    /// See [`RpcClient::add_node`].
    pub async fn trigger_sync(&self) -> Result<(), RpcClientError> {
        self.call(RPC_METHOD_TRIGGER_SYNC, &TriggerSyncRequest {})
            .await
    }

    fn method_url(&self, method: &str) -> Url {
        let mut url = self.endpoint.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .push(RPC_SERVICE_PATH.trim_start_matches('/'))
                .push(method);
        }
        url
    }

    async fn call<B: Serialize + ?Sized>(
        &self,
        method: &'static str,
        body: &B,
    ) -> Result<(), RpcClientError> {
        let url = self.method_url(method);
        debug!(method, url = %url, "Calling dnsmon");

        let transport = |source| RpcClientError::Transport { method, source };
        let response = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(transport)?;
        let status = response.status().as_u16();
        let answer: RpcResponse = response.json().await.map_err(transport)?;

        if answer.ok {
            Ok(())
        } else {
            Err(RpcClientError::Rejected {
                method,
                status,
                message: answer.error.unwrap_or_default(),
            })
        }
    }
}
