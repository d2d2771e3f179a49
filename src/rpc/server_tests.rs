// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `server.rs`, served on a loopback listener.

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::config::HealthCheckConfig;
    use crate::errors::RpcClientError;
    use crate::inventory::{NodeStatus, ResolverNode, NodeSource};
    use crate::rpc::RpcClient;
    use crate::tailnet::{DeviceInfo, MemoryTailnet};
    use serde_json::json;
    use std::collections::BTreeSet;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::time::Duration;

    struct TestServer {
        addr: SocketAddr,
        inventory: Arc<Inventory>,
        tailnet: Arc<MemoryTailnet>,
        shutdown: CancellationToken,
        handle: tokio::task::JoinHandle<std::io::Result<()>>,
    }

    impl TestServer {
        async fn start() -> Self {
            let inventory = Arc::new(Inventory::new(1));
            let tailnet = Arc::new(MemoryTailnet::new());
            let shutdown = CancellationToken::new();
            let reconciler = Arc::new(Reconciler::new(
                Arc::clone(&inventory),
                tailnet.clone(),
                Duration::from_secs(2),
                shutdown.clone(),
            ));
            let health = Arc::new(HealthChecker::new(
                Arc::clone(&inventory),
                tailnet.clone(),
                HealthCheckConfig {
                    interval: Duration::from_secs(20),
                    timeout: Duration::from_secs(1),
                    unhealthy_threshold: 1,
                    workers: 4,
                },
                reconciler.trigger_handle(),
                shutdown.clone(),
            ));
            let state = RpcState {
                inventory: Arc::clone(&inventory),
                health,
                reconciler,
            };

            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let handle = tokio::spawn(serve(listener, state, shutdown.clone()));

            Self {
                addr,
                inventory,
                tailnet,
                shutdown,
                handle,
            }
        }

        fn client(&self) -> RpcClient {
            RpcClient::new(&format!("http://{}", self.addr)).unwrap()
        }

        fn url(&self, path: &str) -> String {
            format!("http://{}{path}", self.addr)
        }

        fn add_device(&self, id: &str, last_octet: u8) {
            self.tailnet.add_device(
                DeviceInfo {
                    id: id.to_string(),
                    hostname: format!("resolver-{id}"),
                    ipv4: Some(Ipv4Addr::new(100, 64, 0, last_octet)),
                    ipv6: None,
                    tags: vec!["tag:resolver".to_string()],
                },
                true,
            );
        }
    }

    fn add_request(id: &str, ipv4: &str) -> AddNodeRequest {
        AddNodeRequest {
            id: id.to_string(),
            hostname: format!("resolver-{id}"),
            ipv4: Some(ipv4.to_string()),
            ipv6: None,
        }
    }

    #[tokio::test]
    async fn test_add_node_inserts_unknown_node() {
        let server = TestServer::start().await;

        server
            .client()
            .add_node(&add_request("nB", "100.64.0.2"))
            .await
            .unwrap();

        let node = server.inventory.get("nB").unwrap();
        assert_eq!(node.status, NodeStatus::Unknown);
        assert_eq!(node.source, NodeSource::External);
        // Unknown nodes are not published
        assert!(server.tailnet.resolvers().is_empty());
    }

    #[tokio::test]
    async fn test_add_node_is_idempotent() {
        let server = TestServer::start().await;
        server.add_device("nB", 2);
        let client = server.client();

        client.add_node(&add_request("nB", "100.64.0.2")).await.unwrap();
        client.trigger_health_check().await.unwrap();
        client.add_node(&add_request("nB", "100.64.0.2")).await.unwrap();

        assert_eq!(server.inventory.len(), 1);
        assert_eq!(server.inventory.get("nB").unwrap().status, NodeStatus::Healthy);
    }

    #[tokio::test]
    async fn test_remove_node_twice_succeeds_and_purges() {
        let server = TestServer::start().await;
        server.add_device("nA", 1);
        let client = server.client();
        client.add_node(&add_request("nA", "100.64.0.1")).await.unwrap();
        client.trigger_health_check().await.unwrap();
        client.trigger_sync().await.unwrap();
        assert_eq!(
            server.tailnet.resolvers(),
            BTreeSet::from([IpAddr::V4(Ipv4Addr::new(100, 64, 0, 1))])
        );

        client.remove_node("nA").await.unwrap();
        client.remove_node("nA").await.unwrap();

        assert!(server.inventory.get("nA").is_none());
        assert!(server.tailnet.resolvers().is_empty());
    }

    #[tokio::test]
    async fn test_remove_unknown_node_succeeds() {
        let server = TestServer::start().await;

        server.client().remove_node("never-added").await.unwrap();

        assert!(server.inventory.is_empty());
    }

    #[tokio::test]
    async fn test_empty_id_is_rejected_with_bad_request() {
        let server = TestServer::start().await;

        let err = server
            .client()
            .add_node(&add_request("", "100.64.0.2"))
            .await
            .unwrap_err();

        assert!(matches!(err, RpcClientError::Rejected { status: 400, .. }));
        assert!(server.inventory.is_empty());
    }

    #[tokio::test]
    async fn test_bad_address_is_rejected_with_bad_request() {
        let server = TestServer::start().await;

        let err = server
            .client()
            .add_node(&add_request("nB", "300.1.1.1"))
            .await
            .unwrap_err();

        assert!(matches!(err, RpcClientError::Rejected { status: 400, .. }));
        assert!(server.inventory.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_json_is_rejected_with_bad_request() {
        let server = TestServer::start().await;

        let response = reqwest::Client::new()
            .post(server.url("/skopos.v1.DnsmonService/RemoveNode"))
            .header("content-type", "application/json")
            .body("{\"id\": ")
            .send()
            .await
            .unwrap();

        assert_eq!(response.status().as_u16(), 400);
        let body: RpcResponse = response.json().await.unwrap();
        assert!(!body.ok);
        assert!(body.error.is_some());
    }

    #[tokio::test]
    async fn test_reconcile_failure_keeps_mutation_applied() {
        let server = TestServer::start().await;
        server.tailnet.fail_next_reads(1);

        let err = server
            .client()
            .add_node(&add_request("nB", "100.64.0.2"))
            .await
            .unwrap_err();

        match err {
            RpcClientError::Rejected {
                status, message, ..
            } => {
                assert_eq!(status, 200);
                assert!(message.contains("read"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(server.inventory.get("nB").is_some());
    }

    #[tokio::test]
    async fn test_trigger_health_check_reports_adapter_failure() {
        let server = TestServer::start().await;
        server
            .inventory
            .upsert(ResolverNode::new("nA", "resolver-a", NodeSource::External))
            .unwrap();
        server.tailnet.set_status_unavailable(true);

        let err = server.client().trigger_health_check().await.unwrap_err();

        assert!(matches!(err, RpcClientError::Rejected { status: 200, .. }));
        assert_eq!(server.inventory.get("nA").unwrap().status, NodeStatus::Unknown);
    }

    #[tokio::test]
    async fn test_healthz_and_metrics() {
        let server = TestServer::start().await;
        server.client().trigger_sync().await.unwrap();
        let http = reqwest::Client::new();

        let healthz = http.get(server.url("/healthz")).send().await.unwrap();
        assert_eq!(healthz.status().as_u16(), 200);
        assert_eq!(healthz.text().await.unwrap(), "ok");

        let metrics = http.get(server.url("/metrics")).send().await.unwrap();
        assert_eq!(metrics.status().as_u16(), 200);
        assert!(metrics
            .text()
            .await
            .unwrap()
            .contains("skopos_rpc_requests_total"));
    }

    #[tokio::test]
    async fn test_unknown_method_is_not_found() {
        let server = TestServer::start().await;

        let response = reqwest::Client::new()
            .post(server.url("/skopos.v1.DnsmonService/DropTable"))
            .json(&json!({}))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status().as_u16(), 404);
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let server = TestServer::start().await;

        server.shutdown.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), server.handle)
            .await
            .expect("server should stop")
            .unwrap();
        assert!(result.is_ok());
    }
}
