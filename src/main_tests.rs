// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `main.rs` - startup failures and signal handling

#[cfg(test)]
mod tests {
    use super::super::*;
    use std::time::Duration as StdDuration;
    use tokio::time::timeout;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn args(extra: &[&str]) -> DnsmonArgs {
        let mut argv = vec!["dnsmon", "--listen", "127.0.0.1:0"];
        argv.extend_from_slice(extra);
        DnsmonArgs::try_parse_from(argv).expect("arguments should parse")
    }

    #[test]
    fn test_default_log_filter() {
        assert_eq!(default_log_filter(false), "info");
        assert_eq!(default_log_filter(true), "debug");
    }

    #[tokio::test]
    async fn test_start_fails_on_invalid_configuration() {
        let result = start(args(&["--api-key=", "--health-check-interval", "20s"])).await;

        let err = result.err().expect("startup should fail");
        assert!(format!("{err:#}").contains("Invalid configuration"));
    }

    #[tokio::test]
    async fn test_start_fails_when_seeding_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/tailnet/-/devices"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .mount(&server)
            .await;

        let result = start(args(&["--api-key", "tskey-api-test", "--api-url", &server.uri()])).await;

        let err = result.err().expect("startup should fail");
        assert!(format!("{err:#}").contains("Failed to seed inventory"));
    }

    /// Control plane with two online resolvers that are already the live
    /// nameservers, as left behind by a previous dnsmon process.
    async fn running_tailnet() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/tailnet/-/devices"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "devices": [
                    {"nodeId": "nA", "hostname": "resolver-a", "addresses": ["100.64.0.1"], "tags": ["tag:resolver"]},
                    {"nodeId": "nB", "hostname": "resolver-b", "addresses": ["100.64.0.2"], "tags": ["tag:resolver"]}
                ]
            })))
            .mount(&server)
            .await;
        for (id, address) in [("nA", "100.64.0.1"), ("nB", "100.64.0.2")] {
            Mock::given(method("GET"))
                .and(path(format!("/api/v2/device/{id}")))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_delay(StdDuration::from_millis(50))
                        .set_body_json(serde_json::json!({
                            "nodeId": id,
                            "addresses": [address],
                            "connectedToControl": true
                        })),
                )
                .mount(&server)
                .await;
        }
        Mock::given(method("GET"))
            .and(path("/api/v2/tailnet/-/dns/nameservers"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "dns": ["100.64.0.1", "100.64.0.2"]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v2/tailnet/-/dns/nameservers"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "dns": []
            })))
            .expect(0)
            .mount(&server)
            .await;
        server
    }

    async fn nameserver_reads(server: &MockServer) -> usize {
        server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.method.as_str() == "GET" && r.url.path().ends_with("/dns/nameservers"))
            .count()
    }

    /// A restart with healthy resolvers leaves the live nameservers untouched
    #[tokio::test]
    async fn test_start_keeps_live_nameservers() {
        let server = running_tailnet().await;

        let daemon = start(args(&["--api-key", "tskey-api-test", "--api-url", &server.uri()]))
            .await
            .expect("startup should succeed");

        timeout(StdDuration::from_secs(5), async {
            while nameserver_reads(&server).await == 0 {
                tokio::time::sleep(StdDuration::from_millis(10)).await;
            }
        })
        .await
        .expect("the first reconcile should read the live nameservers");

        daemon.shutdown.cancel();
        for (_, handle) in daemon.loops {
            handle.await.unwrap();
        }
        daemon.server.await.unwrap().unwrap();

        // Fails if dnsmon wrote the nameserver list at all
        server.verify().await;
    }

    /// SIGTERM/SIGINT handlers can be installed
    #[tokio::test]
    async fn test_shutdown_signal_install() {
        assert!(ShutdownSignal::install().is_ok());
    }

    /// No signal arrives on its own
    #[tokio::test]
    async fn test_shutdown_signal_waits() {
        let mut signals = ShutdownSignal::install().unwrap();

        let result = timeout(StdDuration::from_millis(100), signals.recv()).await;

        assert!(
            result.is_err(),
            "recv() should time out when no signal is sent"
        );
    }
}
