// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `config.rs`

#[cfg(test)]
mod tests {
    use super::super::*;

    fn args(extra: &[&str]) -> DnsmonArgs {
        let mut argv = vec!["dnsmon", "--api-key", "tskey-api-test"];
        argv.extend_from_slice(extra);
        DnsmonArgs::try_parse_from(argv).expect("arguments should parse")
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_args(args(&[])).unwrap();

        assert_eq!(config.health_check.interval, Duration::from_secs(20));
        assert_eq!(config.health_check.timeout, Duration::from_secs(5));
        assert_eq!(config.health_check.unhealthy_threshold, 1);
        assert_eq!(config.health_check.workers, 8);
        assert_eq!(config.dns.update_timeout, Duration::from_secs(10));
        assert_eq!(config.dns.resync_interval, Duration::from_secs(300));
        assert_eq!(config.tailnet.tailnet, "-");
        assert_eq!(config.tailnet.resolver_tag, "tag:resolver");
        assert_eq!(config.tailnet.api_url.as_str(), "https://api.tailscale.com/");
        assert_eq!(config.rpc.listen_addr, "0.0.0.0:8053".parse().unwrap());
        assert!(!config.development);
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_args(args(&[
            "--health-check-interval",
            "1m",
            "--health-check-timeout",
            "1500ms",
            "--unhealthy-threshold",
            "3",
            "--health-check-workers",
            "2",
            "--dns-update-timeout",
            "30s",
            "--tailnet",
            "example.com",
            "--listen",
            "100.64.0.10:9000",
            "--development",
        ]))
        .unwrap();

        assert_eq!(config.health_check.interval, Duration::from_secs(60));
        assert_eq!(config.health_check.timeout, Duration::from_millis(1500));
        assert_eq!(config.health_check.unhealthy_threshold, 3);
        assert_eq!(config.health_check.workers, 2);
        assert_eq!(config.dns.update_timeout, Duration::from_secs(30));
        assert_eq!(config.tailnet.tailnet, "example.com");
        assert_eq!(config.rpc.listen_addr.port(), 9000);
        assert!(config.development);
    }

    #[test]
    fn test_missing_api_key_is_fatal() {
        let parsed = DnsmonArgs::try_parse_from(["dnsmon", "--api-key", "   "]).unwrap();

        assert_eq!(
            Config::from_args(parsed).unwrap_err(),
            ConfigError::MissingValue { name: "TS_API_KEY" }
        );
    }

    #[test]
    fn test_threshold_below_one_is_fatal() {
        for value in ["0", "-2"] {
            let err = Config::from_args(args(&["--unhealthy-threshold", value])).unwrap_err();
            assert!(
                matches!(err, ConfigError::OutOfRange { name: "UNHEALTHY_THRESHOLD", .. }),
                "threshold {value} should be rejected, got {err:?}"
            );
        }
    }

    #[test]
    fn test_zero_workers_is_fatal() {
        let err = Config::from_args(args(&["--health-check-workers", "0"])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::OutOfRange {
                name: "HEALTH_CHECK_WORKERS",
                ..
            }
        ));
    }

    #[test]
    fn test_invalid_duration_is_fatal() {
        let err = Config::from_args(args(&["--health-check-interval", "soon"])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidDuration {
                name: "HEALTH_CHECK_INTERVAL",
                ..
            }
        ));
    }

    #[test]
    fn test_zero_duration_is_fatal() {
        let err = Config::from_args(args(&["--dns-update-timeout", "0s"])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidDuration {
                name: "DNS_UPDATE_TIMEOUT",
                ..
            }
        ));
    }

    #[test]
    fn test_timeout_must_be_shorter_than_interval() {
        let err = Config::from_args(args(&[
            "--health-check-interval",
            "5s",
            "--health-check-timeout",
            "5s",
        ]))
        .unwrap_err();

        assert!(matches!(
            err,
            ConfigError::OutOfRange {
                name: "HEALTH_CHECK_TIMEOUT",
                ..
            }
        ));
    }

    #[test]
    fn test_invalid_api_url_is_fatal() {
        let err = Config::from_args(args(&["--api-url", "not a url"])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl { .. }));

        let err = Config::from_args(args(&["--api-url", "ftp://api.example.com"])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl { .. }));
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let config = Config::from_args(args(&[])).unwrap();

        let rendered = format!("{config:?}");

        assert!(!rendered.contains("tskey-api-test"));
        assert!(rendered.contains("<redacted>"));
    }
}
