// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Startup configuration for `dnsmon`.
//!
//! Every setting can be given as a command-line flag or an environment variable.
//! Values are parsed and validated once at startup into an immutable [`Config`];
//! anything invalid or missing is a startup-fatal [`ConfigError`].
//!
//! | Flag | Environment | Default |
//! |------|-------------|---------|
//! | `--api-key` | `TS_API_KEY` | required |
//! | `--tailnet` | `TS_TAILNET` | `-` |
//! | `--api-url` | `TS_API_URL` | `https://api.tailscale.com` |
//! | `--resolver-tag` | `RESOLVER_TAG` | `tag:resolver` |
//! | `--listen` | `RPC_LISTEN_ADDR` | `0.0.0.0:8053` |
//! | `--health-check-interval` | `HEALTH_CHECK_INTERVAL` | `20s` |
//! | `--health-check-timeout` | `HEALTH_CHECK_TIMEOUT` | `5s` |
//! | `--unhealthy-threshold` | `UNHEALTHY_THRESHOLD` | `1` |
//! | `--health-check-workers` | `HEALTH_CHECK_WORKERS` | `8` |
//! | `--dns-update-timeout` | `DNS_UPDATE_TIMEOUT` | `10s` |
//! | `--resync-interval` | `RESYNC_INTERVAL` | `5m` |
//! | `--development` | `DEVEL` | `false` |

use crate::constants::{
    DEFAULT_DNS_UPDATE_TIMEOUT, DEFAULT_HEALTH_CHECK_INTERVAL, DEFAULT_HEALTH_CHECK_TIMEOUT,
    DEFAULT_HEALTH_CHECK_WORKERS, DEFAULT_RESOLVER_TAG, DEFAULT_RESYNC_INTERVAL,
    DEFAULT_RPC_LISTEN_ADDR, DEFAULT_TAILNET, DEFAULT_TAILSCALE_API_URL,
    DEFAULT_UNHEALTHY_THRESHOLD,
};
use crate::duration::parse_duration;
use crate::errors::ConfigError;
use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;
use url::Url;

/// Command-line and environment arguments of the `dnsmon` daemon.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "dnsmon",
    version,
    about = "Keeps tailnet DNS nameservers in sync with resolver health"
)]
pub struct DnsmonArgs {
    /// Tailscale API access token
    #[arg(long, env = "TS_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Tailnet name ("-" selects the API key's default tailnet)
    #[arg(long, env = "TS_TAILNET", default_value = DEFAULT_TAILNET)]
    pub tailnet: String,

    /// Base URL of the Tailscale control-plane API
    #[arg(long, env = "TS_API_URL", default_value = DEFAULT_TAILSCALE_API_URL)]
    pub api_url: String,

    /// ACL tag that marks resolver devices
    #[arg(long, env = "RESOLVER_TAG", default_value = DEFAULT_RESOLVER_TAG)]
    pub resolver_tag: String,

    /// Address the RPC server listens on
    #[arg(long = "listen", env = "RPC_LISTEN_ADDR", default_value = DEFAULT_RPC_LISTEN_ADDR)]
    pub listen_addr: SocketAddr,

    /// How often every resolver is probed
    #[arg(long, env = "HEALTH_CHECK_INTERVAL", default_value = DEFAULT_HEALTH_CHECK_INTERVAL)]
    pub health_check_interval: String,

    /// How long a single probe may take
    #[arg(long, env = "HEALTH_CHECK_TIMEOUT", default_value = DEFAULT_HEALTH_CHECK_TIMEOUT)]
    pub health_check_timeout: String,

    /// Consecutive failed probes before a resolver is unhealthy
    #[arg(long, env = "UNHEALTHY_THRESHOLD", default_value_t = i64::from(DEFAULT_UNHEALTHY_THRESHOLD), allow_negative_numbers = true)]
    pub unhealthy_threshold: i64,

    /// Probes allowed in flight at once
    #[arg(long, env = "HEALTH_CHECK_WORKERS", default_value_t = DEFAULT_HEALTH_CHECK_WORKERS as i64, allow_negative_numbers = true)]
    pub health_check_workers: i64,

    /// How long a nameserver read or write may take
    #[arg(long, env = "DNS_UPDATE_TIMEOUT", default_value = DEFAULT_DNS_UPDATE_TIMEOUT)]
    pub dns_update_timeout: String,

    /// Interval of the periodic discovery refresh and full resync
    #[arg(long, env = "RESYNC_INTERVAL", default_value = DEFAULT_RESYNC_INTERVAL)]
    pub resync_interval: String,

    /// Development mode (debug logging by default)
    #[arg(long, env = "DEVEL")]
    pub development: bool,
}

/// Validated, immutable configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub tailnet: TailnetConfig,
    pub health_check: HealthCheckConfig,
    pub dns: DnsConfig,
    pub rpc: RpcConfig,
    pub development: bool,
}

/// Tailscale control-plane access.
#[derive(Clone, PartialEq, Eq)]
pub struct TailnetConfig {
    pub api_url: Url,
    pub api_key: String,
    pub tailnet: String,
    pub resolver_tag: String,
}

impl std::fmt::Debug for TailnetConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TailnetConfig")
            .field("api_url", &self.api_url.as_str())
            .field("api_key", &"<redacted>")
            .field("tailnet", &self.tailnet)
            .field("resolver_tag", &self.resolver_tag)
            .finish()
    }
}

/// Health checker settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthCheckConfig {
    /// Time between cycle starts
    pub interval: Duration,
    /// Bound on a single probe
    pub timeout: Duration,
    /// Consecutive failures before a node turns `Unhealthy`
    pub unhealthy_threshold: u32,
    /// Probes in flight at once
    pub workers: usize,
}

/// Reconciler settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DnsConfig {
    /// Bound on each nameserver read or write
    pub update_timeout: Duration,
    /// Interval of the periodic full resync
    pub resync_interval: Duration,
}

/// RPC server settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpcConfig {
    pub listen_addr: SocketAddr,
}

impl Config {
    /// Parse and validate raw arguments.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn from_args(args: DnsmonArgs) -> Result<Self, ConfigError> {
        let api_key = args
            .api_key
            .filter(|key| !key.trim().is_empty())
            .ok_or(ConfigError::MissingValue { name: "TS_API_KEY" })?;

        let api_url = Url::parse(&args.api_url).map_err(|e| ConfigError::InvalidUrl {
            value: args.api_url.clone(),
            reason: e.to_string(),
        })?;
        if api_url.cannot_be_a_base() || !matches!(api_url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidUrl {
                value: args.api_url,
                reason: "must be an http(s) URL".to_string(),
            });
        }

        if args.tailnet.trim().is_empty() {
            return Err(ConfigError::MissingValue { name: "TS_TAILNET" });
        }
        if args.resolver_tag.trim().is_empty() {
            return Err(ConfigError::MissingValue {
                name: "RESOLVER_TAG",
            });
        }

        let unhealthy_threshold = u32::try_from(args.unhealthy_threshold)
            .ok()
            .filter(|threshold| *threshold >= 1)
            .ok_or_else(|| ConfigError::OutOfRange {
                name: "UNHEALTHY_THRESHOLD",
                reason: format!(
                    "must be an integer of at least 1, got {}",
                    args.unhealthy_threshold
                ),
            })?;

        let workers = usize::try_from(args.health_check_workers)
            .ok()
            .filter(|workers| *workers >= 1)
            .ok_or_else(|| ConfigError::OutOfRange {
                name: "HEALTH_CHECK_WORKERS",
                reason: format!("must be at least 1, got {}", args.health_check_workers),
            })?;

        let config = Self {
            tailnet: TailnetConfig {
                api_url,
                api_key,
                tailnet: args.tailnet,
                resolver_tag: args.resolver_tag,
            },
            health_check: HealthCheckConfig {
                interval: positive_duration("HEALTH_CHECK_INTERVAL", &args.health_check_interval)?,
                timeout: positive_duration("HEALTH_CHECK_TIMEOUT", &args.health_check_timeout)?,
                unhealthy_threshold,
                workers,
            },
            dns: DnsConfig {
                update_timeout: positive_duration("DNS_UPDATE_TIMEOUT", &args.dns_update_timeout)?,
                resync_interval: positive_duration("RESYNC_INTERVAL", &args.resync_interval)?,
            },
            rpc: RpcConfig {
                listen_addr: args.listen_addr,
            },
            development: args.development,
        };

        config.validate()?;
        Ok(config)
    }

    /// Cross-field checks.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::OutOfRange`] if a probe could outlive its cycle.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.health_check.timeout >= self.health_check.interval {
            return Err(ConfigError::OutOfRange {
                name: "HEALTH_CHECK_TIMEOUT",
                reason: format!(
                    "must be shorter than HEALTH_CHECK_INTERVAL ({:?} >= {:?})",
                    self.health_check.timeout, self.health_check.interval
                ),
            });
        }
        Ok(())
    }
}

fn positive_duration(name: &'static str, value: &str) -> Result<Duration, ConfigError> {
    let duration = parse_duration(value).map_err(|e| ConfigError::InvalidDuration {
        name,
        value: value.to_string(),
        reason: e.to_string(),
    })?;

    if duration.is_zero() {
        return Err(ConfigError::InvalidDuration {
            name,
            value: value.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }

    Ok(duration)
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;
