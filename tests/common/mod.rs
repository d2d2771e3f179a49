// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

// Common test utilities for integration tests

#![allow(dead_code)]

use skopos::config::HealthCheckConfig;
use skopos::health::HealthChecker;
use skopos::inventory::Inventory;
use skopos::reconciler::Reconciler;
use skopos::rpc::{self, RpcClient, RpcState};
use skopos::tailnet::{DeviceInfo, MemoryTailnet, TailnetAdapter};
use skopos::ticker::{self, TickHandle};
use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A running dnsmon stack against an in-memory tailnet, driven by manual ticks.
pub struct Stack {
    pub inventory: Arc<Inventory>,
    pub tailnet: Arc<MemoryTailnet>,
    pub client: RpcClient,
    pub health_tick: TickHandle,
    pub resync_tick: TickHandle,
    pub shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Stack {
    /// Start the stack with the given tailnet and unhealthy threshold.
    pub async fn start(tailnet: Arc<MemoryTailnet>, unhealthy_threshold: u32) -> Self {
        Self::launch(tailnet, unhealthy_threshold, false).await
    }

    /// Start the stack the way dnsmon boots: one health cycle runs to
    /// completion before the RPC listener and the loops come up.
    pub async fn boot(tailnet: Arc<MemoryTailnet>, unhealthy_threshold: u32) -> Self {
        Self::launch(tailnet, unhealthy_threshold, true).await
    }

    async fn launch(
        tailnet: Arc<MemoryTailnet>,
        unhealthy_threshold: u32,
        initial_cycle: bool,
    ) -> Self {
        let adapter: Arc<dyn TailnetAdapter> = tailnet.clone();
        let inventory = Arc::new(Inventory::new(unhealthy_threshold));
        skopos::discovery::seed(adapter.as_ref(), &inventory)
            .await
            .expect("seeding should succeed");

        let shutdown = CancellationToken::new();
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&inventory),
            Arc::clone(&adapter),
            Duration::from_secs(2),
            shutdown.clone(),
        ));
        let health = Arc::new(HealthChecker::new(
            Arc::clone(&inventory),
            Arc::clone(&adapter),
            HealthCheckConfig {
                interval: Duration::from_secs(20),
                timeout: Duration::from_millis(500),
                unhealthy_threshold,
                workers: 4,
            },
            reconciler.trigger_handle(),
            shutdown.clone(),
        ));

        if initial_cycle {
            health.run_cycle().await.expect("initial health cycle");
        }

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = RpcState {
            inventory: Arc::clone(&inventory),
            health: Arc::clone(&health),
            reconciler: Arc::clone(&reconciler),
        };

        let (health_tick, health_ticker) = ticker::manual();
        let (resync_tick, resync_ticker) = ticker::manual();

        let tasks = vec![
            tokio::spawn({
                let shutdown = shutdown.clone();
                async move {
                    rpc::serve(listener, state, shutdown)
                        .await
                        .expect("RPC server failed");
                }
            }),
            tokio::spawn(async move { health.run(health_ticker).await }),
            tokio::spawn(async move { reconciler.run(resync_ticker).await }),
        ];

        Self {
            inventory,
            tailnet,
            client: RpcClient::new(&format!("http://{addr}")).unwrap(),
            health_tick,
            resync_tick,
            shutdown,
            tasks,
        }
    }

    /// Cancel every task and wait for them to stop.
    pub async fn stop(self) {
        self.shutdown.cancel();
        for task in self.tasks {
            tokio::time::timeout(Duration::from_secs(5), task)
                .await
                .expect("task should stop after shutdown")
                .expect("task should not panic");
        }
    }

    /// Wait until the live nameservers equal `expected`.
    pub async fn wait_for_resolvers(&self, expected: &BTreeSet<IpAddr>) {
        let tailnet = Arc::clone(&self.tailnet);
        wait_for(|| tailnet.resolvers() == *expected).await;
    }
}

/// A tagged resolver device with address `100.64.0.{last_octet}`.
pub fn device(id: &str, last_octet: u8) -> DeviceInfo {
    DeviceInfo {
        id: id.to_string(),
        hostname: format!("resolver-{id}"),
        ipv4: Some(Ipv4Addr::new(100, 64, 0, last_octet)),
        ipv6: None,
        tags: vec!["tag:resolver".to_string()],
    }
}

pub fn addr(last_octet: u8) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(100, 64, 0, last_octet))
}

pub fn resolvers(octets: &[u8]) -> BTreeSet<IpAddr> {
    octets.iter().copied().map(addr).collect()
}

/// Poll `condition` until it holds, failing after five seconds.
pub async fn wait_for(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
