// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Tailscale control-plane API client.
//!
//! Implements [`TailnetAdapter`] over the Tailscale v2 HTTP API:
//!
//! | Operation | Request |
//! |-----------|---------|
//! | `list_tagged_devices` | `GET /api/v2/tailnet/{tailnet}/devices?fields=all` |
//! | `device_status` | `GET /api/v2/device/{id}?fields=all` |
//! | `read_dns_resolvers` | `GET /api/v2/tailnet/{tailnet}/dns/nameservers` |
//! | `write_dns_resolvers` | `POST /api/v2/tailnet/{tailnet}/dns/nameservers` |
//!
//! All requests authenticate with the API key as a bearer token and are retried
//! on transient failures (see [`retry`](super::retry)).

use super::events::{EventSink, TailnetEvent};
use super::retry::retry_adapter_call;
use super::{split_addresses, DeviceInfo, DeviceStatus, TailnetAdapter};
use crate::config::TailnetConfig;
use crate::constants::TAILSCALE_HTTP_TIMEOUT_SECS;
use crate::errors::TailnetError;
use async_trait::async_trait;
use reqwest::{Client as HttpClient, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tracing::warn;
use url::Url;

const OP_LIST_DEVICES: &str = "list_tagged_devices";
const OP_DEVICE_STATUS: &str = "device_status";
const OP_READ_RESOLVERS: &str = "read_dns_resolvers";
const OP_WRITE_RESOLVERS: &str = "write_dns_resolvers";

/// Longest response body kept in an error message
const MAX_ERROR_BODY_LEN: usize = 512;

#[derive(Debug, Deserialize)]
struct DeviceList {
    #[serde(default)]
    devices: Vec<ApiDevice>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiDevice {
    #[serde(default)]
    id: String,
    #[serde(default)]
    node_id: String,
    #[serde(default)]
    hostname: String,
    #[serde(default)]
    addresses: Vec<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    connected_to_control: bool,
}

impl ApiDevice {
    /// Preferred device id: the stable node id, falling back to the legacy id.
    fn device_id(&self) -> &str {
        if self.node_id.is_empty() {
            &self.id
        } else {
            &self.node_id
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Nameservers {
    #[serde(default)]
    dns: Vec<String>,
}

/// [`TailnetAdapter`] backed by the Tailscale HTTP API.
pub struct TailscaleApiClient {
    http: HttpClient,
    base_url: Url,
    api_key: String,
    tailnet: String,
    resolver_tag: String,
    events: EventSink,
}

impl std::fmt::Debug for TailscaleApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TailscaleApiClient")
            .field("base_url", &self.base_url.as_str())
            .field("tailnet", &self.tailnet)
            .field("resolver_tag", &self.resolver_tag)
            .finish_non_exhaustive()
    }
}

impl TailscaleApiClient {
    /// Build a client for the configured tailnet.
    ///
    /// # Errors
    ///
    /// Returns [`TailnetError::Unavailable`] if the HTTP client cannot be built
    /// or the API URL cannot carry a path.
    pub fn new(config: &TailnetConfig, events: EventSink) -> Result<Self, TailnetError> {
        if config.api_url.cannot_be_a_base() {
            return Err(TailnetError::Unavailable {
                reason: format!("API URL '{}' cannot carry a path", config.api_url),
            });
        }

        let http = HttpClient::builder()
            .timeout(Duration::from_secs(TAILSCALE_HTTP_TIMEOUT_SECS))
            .user_agent(concat!("skopos/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TailnetError::Unavailable {
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            base_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            tailnet: config.tailnet.clone(),
            resolver_tag: config.resolver_tag.clone(),
            events,
        })
    }

    /// `{base}/api/v2/{segments...}`, each segment percent-encoded.
    fn endpoint(&self, segments: &[&str], query: Option<&str>) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(["api", "v2"]).extend(segments);
        }
        url.set_query(query);
        url
    }

    /// Send one request with retries and decode the JSON response.
    async fn call<T, B>(
        &self,
        operation: &'static str,
        method: Method,
        url: Url,
        body: Option<&B>,
    ) -> Result<T, TailnetError>
    where
        T: DeserializeOwned,
        B: Serialize + Sync,
    {
        let text = retry_adapter_call(
            move || self.execute(operation, method.clone(), url.clone(), body),
            operation,
            &self.events,
        )
        .await?;

        serde_json::from_str(&text).map_err(|e| TailnetError::Decode {
            operation: operation.to_string(),
            reason: e.to_string(),
        })
    }

    /// Single HTTP exchange without retries.
    async fn execute<B: Serialize + Sync>(
        &self,
        operation: &'static str,
        method: Method,
        url: Url,
        body: Option<&B>,
    ) -> Result<String, TailnetError> {
        let started = Instant::now();

        let mut request = self.http.request(method, url).bearer_auth(&self.api_key);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| TailnetError::Request {
            operation: operation.to_string(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| TailnetError::Request {
            operation: operation.to_string(),
            reason: format!("failed to read response body: {e}"),
        })?;

        if !status.is_success() {
            return Err(TailnetError::Status {
                operation: operation.to_string(),
                status: status.as_u16(),
                body: truncate(&text),
            });
        }

        self.events.emit(TailnetEvent::RequestCompleted {
            operation,
            status: status.as_u16(),
            elapsed: started.elapsed(),
        });

        Ok(text)
    }
}

#[async_trait]
impl TailnetAdapter for TailscaleApiClient {
    async fn list_tagged_devices(&self) -> Result<Vec<DeviceInfo>, TailnetError> {
        let url = self.endpoint(&["tailnet", self.tailnet.as_str(), "devices"], Some("fields=all"));
        let list: DeviceList = self
            .call(OP_LIST_DEVICES, Method::GET, url, None::<&()>)
            .await?;

        Ok(list
            .devices
            .into_iter()
            .filter(|device| device.tags.iter().any(|tag| tag == &self.resolver_tag))
            .filter(|device| !device.device_id().is_empty())
            .map(|device| {
                let (ipv4, ipv6) = split_addresses(&device.addresses);
                DeviceInfo {
                    id: device.device_id().to_string(),
                    hostname: device.hostname,
                    ipv4,
                    ipv6,
                    tags: device.tags,
                }
            })
            .collect())
    }

    async fn device_status(&self, id: &str) -> Result<DeviceStatus, TailnetError> {
        let url = self.endpoint(&["device", id], Some("fields=all"));
        let device: ApiDevice = self
            .call(OP_DEVICE_STATUS, Method::GET, url, None::<&()>)
            .await
            .map_err(|e| match e {
                TailnetError::Status { status, .. } if status == StatusCode::NOT_FOUND.as_u16() => {
                    TailnetError::DeviceNotFound { id: id.to_string() }
                }
                other => other,
            })?;

        let (ipv4, ipv6) = split_addresses(&device.addresses);
        Ok(DeviceStatus {
            online: device.connected_to_control,
            ipv4,
            ipv6,
        })
    }

    async fn read_dns_resolvers(&self) -> Result<BTreeSet<IpAddr>, TailnetError> {
        let url = self.endpoint(&["tailnet", self.tailnet.as_str(), "dns", "nameservers"], None);
        let nameservers: Nameservers = self
            .call(OP_READ_RESOLVERS, Method::GET, url, None::<&()>)
            .await?;

        Ok(nameservers
            .dns
            .iter()
            .filter_map(|raw| match raw.parse::<IpAddr>() {
                Ok(addr) => Some(addr),
                Err(_) => {
                    warn!(nameserver = %raw, "Ignoring nameserver that is not an IP address");
                    None
                }
            })
            .collect())
    }

    async fn write_dns_resolvers(&self, resolvers: &BTreeSet<IpAddr>) -> Result<(), TailnetError> {
        let url = self.endpoint(&["tailnet", self.tailnet.as_str(), "dns", "nameservers"], None);
        let body = Nameservers {
            dns: resolvers.iter().map(ToString::to_string).collect(),
        };

        let _: Nameservers = self
            .call(OP_WRITE_RESOLVERS, Method::POST, url, Some(&body))
            .await?;
        Ok(())
    }
}

fn truncate(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LEN {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY_LEN;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

#[cfg(test)]
#[path = "api_tests.rs"]
mod api_tests;
