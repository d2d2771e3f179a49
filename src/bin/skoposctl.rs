// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Operator CLI for a running `dnsmon`.
//!
//! Usage:
//!   skoposctl add-node --id nResolverB --hostname resolver-b --ipv4 100.64.0.2
//!   skoposctl remove-node --id nResolverB
//!   skoposctl trigger-health-check
//!   skoposctl trigger-sync
//!
//! The endpoint defaults to `http://127.0.0.1:8053` and can be set with
//! `--endpoint` or `SKOPOS_ENDPOINT`.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use skopos::constants::DEFAULT_RPC_ENDPOINT;
use skopos::rpc::{AddNodeRequest, RpcClient};
use tracing::debug;

#[derive(Debug, Parser)]
#[command(name = "skoposctl", version, about = "Control a running dnsmon")]
struct Cli {
    /// dnsmon RPC endpoint
    #[arg(long, env = "SKOPOS_ENDPOINT", default_value = DEFAULT_RPC_ENDPOINT)]
    endpoint: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Add or update a resolver node, then reconcile
    AddNode {
        /// Tailnet device id
        #[arg(long)]
        id: String,
        #[arg(long, default_value = "")]
        hostname: String,
        #[arg(long)]
        ipv4: Option<String>,
        #[arg(long)]
        ipv6: Option<String>,
    },
    /// Remove a resolver node, then reconcile
    RemoveNode {
        /// Tailnet device id
        #[arg(long)]
        id: String,
    },
    /// Run one health check cycle now
    TriggerHealthCheck,
    /// Run one reconciliation pass now
    TriggerSync,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();
    debug!(endpoint = %cli.endpoint, command = ?cli.command, "Calling dnsmon");

    let client = RpcClient::new(&cli.endpoint)?;
    let method = match cli.command {
        Command::AddNode {
            id,
            hostname,
            ipv4,
            ipv6,
        } => {
            client
                .add_node(&AddNodeRequest {
                    id,
                    hostname,
                    ipv4,
                    ipv6,
                })
                .await
                .map(|()| "AddNode")
        }
        Command::RemoveNode { id } => client.remove_node(&id).await.map(|()| "RemoveNode"),
        Command::TriggerHealthCheck => client
            .trigger_health_check()
            .await
            .map(|()| "TriggerHealthCheck"),
        Command::TriggerSync => client.trigger_sync().await.map(|()| "TriggerSync"),
    }
    .context("dnsmon call failed")?;

    println!("{method}: ok");
    Ok(())
}
