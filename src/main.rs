// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use anyhow::{Context, Result};
use clap::Parser;
use skopos::{
    config::{Config, DnsmonArgs},
    constants::{EXIT_CODE_STARTUP_FAILURE, RUNTIME_WORKER_THREADS, TAILNET_EVENT_CHANNEL_CAPACITY},
    discovery,
    health::HealthChecker,
    inventory::Inventory,
    observer,
    reconciler::Reconciler,
    rpc::{self, RpcState},
    tailnet::{EventSink, TailnetAdapter, TailscaleApiClient},
    ticker::IntervalTicker,
};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

fn main() -> ExitCode {
    let args = DnsmonArgs::parse();
    init_logging(args.development);

    // Build Tokio runtime with custom thread names
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(RUNTIME_WORKER_THREADS)
        .thread_name("skopos-dnsmon")
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to build Tokio runtime");
            return ExitCode::from(EXIT_CODE_STARTUP_FAILURE);
        }
    };

    runtime.block_on(async_main(args))
}

/// Default log filter when `RUST_LOG` is not set.
fn default_log_filter(development: bool) -> &'static str {
    if development {
        "debug"
    } else {
        "info"
    }
}

fn init_logging(development: bool) {
    // Format: timestamp file:line LEVEL message
    //
    // Respects RUST_LOG environment variable if set, otherwise defaults to INFO
    // level (DEBUG in development mode)
    //
    // Respects RUST_LOG_FORMAT environment variable for output format
    // Example: RUST_LOG_FORMAT=json dnsmon
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_log_filter(development)));

    let log_format = std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .with_ansi(true)
                .compact()
                .init();
        }
    }
}

async fn async_main(args: DnsmonArgs) -> ExitCode {
    let daemon = match start(args).await {
        Ok(daemon) => daemon,
        Err(e) => {
            error!("dnsmon failed to start: {e:#}");
            return ExitCode::from(EXIT_CODE_STARTUP_FAILURE);
        }
    };

    match daemon.run_until_shutdown().await {
        Ok(()) => {
            info!("dnsmon stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("dnsmon stopped unexpectedly: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Running background tasks of the daemon.
struct Daemon {
    shutdown: CancellationToken,
    signals: ShutdownSignal,
    server: JoinHandle<std::io::Result<()>>,
    loops: Vec<(&'static str, JoinHandle<()>)>,
    observer: JoinHandle<u64>,
}

/// Validate configuration, seed the inventory and start every task.
///
/// Any failure here is a startup failure.
async fn start(args: DnsmonArgs) -> Result<Daemon> {
    let config = Config::from_args(args).context("Invalid configuration")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        development = config.development,
        tailnet = %config.tailnet.tailnet,
        resolver_tag = %config.tailnet.resolver_tag,
        listen_addr = %config.rpc.listen_addr,
        "Starting skopos dnsmon"
    );
    debug!(?config, "Configuration loaded");

    let signals = ShutdownSignal::install().context("Failed to install signal handlers")?;
    let shutdown = CancellationToken::new();

    let events = EventSink::new(TAILNET_EVENT_CHANNEL_CAPACITY);
    let observer = tokio::spawn(observer::observe(events.subscribe(), shutdown.clone()));

    let adapter: Arc<dyn TailnetAdapter> = Arc::new(
        TailscaleApiClient::new(&config.tailnet, events)
            .context("Failed to create Tailscale API client")?,
    );

    let inventory = Arc::new(Inventory::new(config.health_check.unhealthy_threshold));
    discovery::seed(adapter.as_ref(), &inventory)
        .await
        .context("Failed to seed inventory from tailnet")?;

    let reconciler = Arc::new(Reconciler::new(
        Arc::clone(&inventory),
        Arc::clone(&adapter),
        config.dns.update_timeout,
        shutdown.clone(),
    ));
    let health = Arc::new(HealthChecker::new(
        Arc::clone(&inventory),
        Arc::clone(&adapter),
        config.health_check,
        reconciler.trigger_handle(),
        shutdown.clone(),
    ));

    // Seeded nodes start Unknown; probe them once before the first reconcile
    match health.run_cycle().await {
        Ok(report) => info!(
            probed = report.probed,
            transitions = report.transitions.len(),
            removed = report.removed.len(),
            "Initial health check completed"
        ),
        Err(e) => warn!(error = %e, "Initial health check failed; continuing"),
    }

    let listener = TcpListener::bind(config.rpc.listen_addr)
        .await
        .with_context(|| format!("Failed to bind RPC listener on {}", config.rpc.listen_addr))?;

    let server = tokio::spawn(rpc::serve(
        listener,
        RpcState {
            inventory,
            health: Arc::clone(&health),
            reconciler: Arc::clone(&reconciler),
        },
        shutdown.clone(),
    ));

    let health_loop = tokio::spawn({
        let ticker = IntervalTicker::delayed(config.health_check.interval);
        async move { health.run(ticker).await }
    });

    let reconcile_loop = tokio::spawn({
        let ticker = IntervalTicker::delayed(config.dns.resync_interval);
        async move { reconciler.run(ticker).await }
    });

    info!("dnsmon started");

    Ok(Daemon {
        shutdown,
        signals,
        server,
        loops: vec![("health checker", health_loop), ("reconciler", reconcile_loop)],
        observer,
    })
}

impl Daemon {
    /// Wait for SIGINT/SIGTERM (or an RPC server failure), then stop every task.
    async fn run_until_shutdown(self) -> Result<()> {
        let Self {
            shutdown,
            mut signals,
            mut server,
            loops,
            observer,
        } = self;

        let server_result = tokio::select! {
            signal = signals.recv() => {
                info!(signal, "Shutdown signal received");
                None
            }
            result = &mut server => Some(result),
        };

        shutdown.cancel();

        for (name, handle) in loops {
            if let Err(e) = handle.await {
                warn!(task = name, error = %e, "Task ended abnormally");
            }
        }
        if let Err(e) = observer.await {
            warn!(task = "observer", error = %e, "Task ended abnormally");
        }

        let (exited_early, server_result) = match server_result {
            Some(result) => (true, result),
            None => (false, server.await),
        };
        match server_result {
            Ok(Ok(())) if !exited_early => Ok(()),
            Ok(Ok(())) => anyhow::bail!("RPC server exited before shutdown was requested"),
            Ok(Err(e)) => Err(e).context("RPC server failed"),
            Err(e) => Err(e).context("RPC server task panicked"),
        }
    }
}

/// SIGINT and (on Unix) SIGTERM.
struct ShutdownSignal {
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl ShutdownSignal {
    fn install() -> std::io::Result<Self> {
        Ok(Self {
            #[cfg(unix)]
            terminate: tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?,
        })
    }

    /// Name of the signal that arrived.
    async fn recv(&mut self) -> &'static str {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for SIGINT");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            self.terminate.recv().await;
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            () = ctrl_c => "SIGINT",
            () = terminate => "SIGTERM",
        }
    }
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod main_tests;
