// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `health.rs`

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::inventory::{NodeSource, NodeStatus, ResolverNode};
    use crate::reconciler::Reconciler;
    use crate::tailnet::{DeviceInfo, MemoryTailnet};
    use crate::ticker;
    use std::collections::BTreeSet;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    fn config(threshold: u32, workers: usize) -> HealthCheckConfig {
        HealthCheckConfig {
            interval: Duration::from_secs(20),
            timeout: Duration::from_millis(200),
            unhealthy_threshold: threshold,
            workers,
        }
    }

    fn device(id: &str, last_octet: u8) -> DeviceInfo {
        DeviceInfo {
            id: id.to_string(),
            hostname: format!("resolver-{id}"),
            ipv4: Some(Ipv4Addr::new(100, 64, 0, last_octet)),
            ipv6: None,
            tags: vec!["tag:resolver".to_string()],
        }
    }

    struct Harness {
        inventory: Arc<Inventory>,
        tailnet: Arc<MemoryTailnet>,
        reconciler: Arc<Reconciler>,
        checker: HealthChecker,
        shutdown: CancellationToken,
    }

    fn harness(config: HealthCheckConfig) -> Harness {
        let inventory = Arc::new(Inventory::new(config.unhealthy_threshold));
        let tailnet = Arc::new(MemoryTailnet::new());
        let shutdown = CancellationToken::new();
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&inventory),
            tailnet.clone(),
            Duration::from_secs(2),
            shutdown.clone(),
        ));
        let checker = HealthChecker::new(
            Arc::clone(&inventory),
            tailnet.clone(),
            config,
            reconciler.trigger_handle(),
            shutdown.clone(),
        );
        Harness {
            inventory,
            tailnet,
            reconciler,
            checker,
            shutdown,
        }
    }

    impl Harness {
        /// Register a tailnet device and add it to the inventory.
        fn add(&self, id: &str, last_octet: u8, online: bool) {
            let device = device(id, last_octet);
            self.inventory
                .upsert(device.to_node(NodeSource::Discovered))
                .unwrap();
            self.tailnet.add_device(device, online);
        }

        fn status(&self, id: &str) -> NodeStatus {
            self.inventory.get(id).unwrap().status
        }
    }

    fn addr(last_octet: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(100, 64, 0, last_octet))
    }

    async fn wait_for(condition: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    // ========================================================================
    // Probe outcomes
    // ========================================================================

    #[tokio::test]
    async fn test_online_node_becomes_healthy() {
        let h = harness(config(1, 4));
        h.add("a", 1, true);

        let report = h.checker.run_cycle().await.unwrap();

        assert_eq!(report.probed, 1);
        assert_eq!(report.transitions.len(), 1);
        assert_eq!(report.transitions[0].to, NodeStatus::Healthy);
        assert_eq!(h.status("a"), NodeStatus::Healthy);
        assert!(h.inventory.get("a").unwrap().last_checked_at.is_some());
    }

    #[tokio::test]
    async fn test_offline_node_becomes_unhealthy_at_threshold_one() {
        let h = harness(config(1, 4));
        h.add("a", 1, false);

        h.checker.run_cycle().await.unwrap();

        assert_eq!(h.status("a"), NodeStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_threshold_failures_turn_healthy_node_unhealthy() {
        // Scenario A
        let h = harness(config(3, 4));
        h.add("a", 1, true);
        h.add("b", 2, true);
        h.checker.run_cycle().await.unwrap();
        h.reconciler.reconcile().await.unwrap();
        assert_eq!(h.tailnet.resolvers(), BTreeSet::from([addr(1), addr(2)]));

        h.tailnet.set_online("a", false);
        for cycle in 1..=3 {
            let report = h.checker.run_cycle().await.unwrap();
            if cycle < 3 {
                assert!(report.transitions.is_empty(), "cycle {cycle} must not transition");
                assert_eq!(h.status("a"), NodeStatus::Healthy);
            } else {
                assert_eq!(report.transitions.len(), 1);
                assert_eq!(report.transitions[0].from, NodeStatus::Healthy);
                assert_eq!(report.transitions[0].to, NodeStatus::Unhealthy);
            }
        }
        assert_eq!(h.inventory.get("a").unwrap().consecutive_failures, 3);

        h.reconciler.reconcile().await.unwrap();
        assert_eq!(h.tailnet.resolvers(), BTreeSet::from([addr(2)]));
    }

    #[tokio::test]
    async fn test_added_node_without_addresses_is_backfilled() {
        // Scenario B
        let h = harness(config(1, 4));
        h.tailnet.add_device(device("b", 2), true);
        h.inventory
            .upsert(ResolverNode::new("b", "resolver-b", NodeSource::External))
            .unwrap();
        assert_eq!(h.status("b"), NodeStatus::Unknown);

        h.checker.run_cycle().await.unwrap();

        let node = h.inventory.get("b").unwrap();
        assert_eq!(node.status, NodeStatus::Healthy);
        assert_eq!(node.ipv4, Some(Ipv4Addr::new(100, 64, 0, 2)));

        h.reconciler.reconcile().await.unwrap();
        assert_eq!(h.tailnet.resolvers(), BTreeSet::from([addr(2)]));
    }

    #[tokio::test]
    async fn test_probe_timeout_counts_as_failure() {
        let h = harness(config(1, 4));
        h.add("slow", 1, true);
        h.tailnet.set_status_delay("slow", Duration::from_secs(5));

        let report = h.checker.run_cycle().await.unwrap();

        assert_eq!(report.transitions.len(), 1);
        assert_eq!(h.status("slow"), NodeStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_vanished_device_is_marked_removed() {
        let h = harness(config(1, 4));
        h.add("a", 1, true);
        h.tailnet.remove_device("a");

        let report = h.checker.run_cycle().await.unwrap();

        assert_eq!(report.removed, vec!["a".to_string()]);
        assert_eq!(h.status("a"), NodeStatus::Removed);
    }

    #[tokio::test]
    async fn test_adapter_failure_abandons_cycle() {
        let h = harness(config(1, 4));
        h.add("a", 1, true);
        h.add("b", 2, false);
        let before = h.inventory.snapshot();

        h.tailnet.set_status_unavailable(true);
        let result = h.checker.run_cycle().await;

        assert!(matches!(result, Err(HealthCheckError::Adapter(_))));
        assert_eq!(h.inventory.snapshot(), before);
    }

    #[tokio::test]
    async fn test_removed_nodes_are_not_probed() {
        let h = harness(config(1, 4));
        h.add("a", 1, true);
        h.add("b", 2, true);
        h.inventory.mark_removed("b");

        let report = h.checker.run_cycle().await.unwrap();

        assert_eq!(report.probed, 1);
        assert_eq!(h.tailnet.status_calls(), 1);
        assert_eq!(h.status("b"), NodeStatus::Removed);
    }

    // ========================================================================
    // Concurrency
    // ========================================================================

    #[tokio::test]
    async fn test_probe_concurrency_is_bounded_by_workers() {
        let h = harness(config(1, 3));
        for i in 0..12u8 {
            let id = format!("n{i}");
            h.add(&id, i + 1, true);
            h.tailnet.set_status_delay(&id, Duration::from_millis(20));
        }

        let report = h.checker.run_cycle().await.unwrap();

        assert_eq!(report.probed, 12);
        assert!(h.tailnet.peak_probes_in_flight() <= 3);
        assert!(h.tailnet.peak_probes_in_flight() >= 2);
    }

    #[tokio::test]
    async fn test_cycles_never_overlap() {
        let h = harness(config(1, 16));
        for i in 0..4u8 {
            let id = format!("n{i}");
            h.add(&id, i + 1, true);
            h.tailnet.set_status_delay(&id, Duration::from_millis(40));
        }

        let (first, second) = tokio::join!(h.checker.run_cycle(), h.checker.run_cycle());

        assert!(first.is_ok());
        assert!(second.is_ok());
        assert_eq!(h.tailnet.status_calls(), 8);
        assert!(h.tailnet.peak_probes_in_flight() <= 4);
    }

    // ========================================================================
    // Loop and shutdown
    // ========================================================================

    #[tokio::test]
    async fn test_transition_triggers_reconciliation() {
        let h = harness(config(1, 4));
        h.add("a", 1, true);
        let (_resync_tick, resync) = ticker::manual();
        let reconciler = Arc::clone(&h.reconciler);
        let loop_handle = tokio::spawn(async move { reconciler.run(resync).await });

        h.checker.run_cycle().await.unwrap();
        wait_for(|| h.tailnet.resolvers() == BTreeSet::from([addr(1)])).await;

        h.shutdown.cancel();
        loop_handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_run_loop_probes_on_each_tick() {
        let h = Arc::new(harness(config(1, 4)));
        h.add("a", 1, true);
        let (tick, ticker) = ticker::manual();
        let loop_handle = tokio::spawn({
            let h = Arc::clone(&h);
            async move { h.checker.run(ticker).await }
        });

        assert!(tick.tick());
        wait_for(|| h.tailnet.status_calls() == 1).await;
        assert!(tick.tick());
        wait_for(|| h.tailnet.status_calls() == 2).await;

        h.shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), loop_handle)
            .await
            .expect("health checker should stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_no_cycle_after_shutdown() {
        let h = harness(config(1, 4));
        h.add("a", 1, true);

        h.shutdown.cancel();

        assert_eq!(
            h.checker.run_cycle().await,
            Err(HealthCheckError::ShuttingDown)
        );
        assert_eq!(h.tailnet.status_calls(), 0);
    }
}
