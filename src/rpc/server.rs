// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! axum server for the `dnsmon` RPC surface.
//!
//! # Status Codes
//!
//! - `200 {ok: true}` - the mutation and the triggered action succeeded
//! - `200 {ok: false, error}` - the mutation (if any) is applied, but the
//!   triggered health check or reconciliation failed
//! - `400 {ok: false, error}` - the request was malformed; nothing changed

use super::{AddNodeRequest, RemoveNodeRequest, RpcResponse, TriggerHealthCheckRequest, TriggerSyncRequest};
use crate::constants::{
    RPC_METHOD_ADD_NODE, RPC_METHOD_REMOVE_NODE, RPC_METHOD_TRIGGER_HEALTH_CHECK,
    RPC_METHOD_TRIGGER_SYNC, RPC_SERVICE_PATH,
};
use crate::errors::RpcError;
use crate::health::HealthChecker;
use crate::inventory::Inventory;
use crate::metrics;
use crate::reconciler::Reconciler;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Shared state of every RPC handler.
#[derive(Clone)]
pub struct RpcState {
    pub inventory: Arc<Inventory>,
    pub health: Arc<HealthChecker>,
    pub reconciler: Arc<Reconciler>,
}

type RpcReply = (StatusCode, Json<RpcResponse>);

/// Build the RPC router.
///
/// # Routes
///
/// - `POST /skopos.v1.DnsmonService/AddNode`
/// - `POST /skopos.v1.DnsmonService/RemoveNode`
/// - `POST /skopos.v1.DnsmonService/TriggerHealthCheck`
/// - `POST /skopos.v1.DnsmonService/TriggerSync`
/// - `GET /healthz` - liveness
/// - `GET /metrics` - Prometheus metrics
pub fn router(state: RpcState) -> Router {
    let rpc = Router::new()
        .route(&format!("/{RPC_METHOD_ADD_NODE}"), post(add_node))
        .route(&format!("/{RPC_METHOD_REMOVE_NODE}"), post(remove_node))
        .route(
            &format!("/{RPC_METHOD_TRIGGER_HEALTH_CHECK}"),
            post(trigger_health_check),
        )
        .route(&format!("/{RPC_METHOD_TRIGGER_SYNC}"), post(trigger_sync))
        .with_state(state);

    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler))
        .nest(RPC_SERVICE_PATH, rpc)
}

/// Serve the RPC router until `shutdown` is cancelled.
///
/// In-flight calls are drained before this returns.
///
/// # Errors
///
/// Returns an I/O error if the listener fails.
pub async fn serve(
    listener: TcpListener,
    state: RpcState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, "RPC server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("RPC server stopped");
    Ok(())
}

async fn add_node(
    State(state): State<RpcState>,
    payload: Result<Json<AddNodeRequest>, JsonRejection>,
) -> RpcReply {
    let result = async {
        let Json(request) = payload.map_err(invalid)?;
        let node = request.into_node()?;
        let (id, hostname) = (node.id.clone(), node.hostname.clone());

        let outcome = state.inventory.upsert(node)?;
        info!(node_id = %id, hostname = %hostname, outcome = ?outcome, "AddNode applied");

        state.reconciler.reconcile().await?;
        Ok::<(), RpcError>(())
    }
    .await;

    reply(RPC_METHOD_ADD_NODE, result)
}

async fn remove_node(
    State(state): State<RpcState>,
    payload: Result<Json<RemoveNodeRequest>, JsonRejection>,
) -> RpcReply {
    let result = async {
        let Json(request) = payload.map_err(invalid)?;
        let id = request.node_id()?;

        let changed = state.inventory.mark_removed(id);
        info!(node_id = %id, changed, "RemoveNode applied");

        state.reconciler.reconcile().await?;
        Ok::<(), RpcError>(())
    }
    .await;

    reply(RPC_METHOD_REMOVE_NODE, result)
}

async fn trigger_health_check(
    State(state): State<RpcState>,
    payload: Result<Json<TriggerHealthCheckRequest>, JsonRejection>,
) -> RpcReply {
    let result = async {
        payload.map_err(invalid)?;
        let report = state.health.run_cycle().await?;
        debug!(probed = report.probed, transitions = report.transitions.len(), "TriggerHealthCheck complete");
        Ok::<(), RpcError>(())
    }
    .await;

    reply(RPC_METHOD_TRIGGER_HEALTH_CHECK, result)
}

async fn trigger_sync(
    State(state): State<RpcState>,
    payload: Result<Json<TriggerSyncRequest>, JsonRejection>,
) -> RpcReply {
    let result = async {
        payload.map_err(invalid)?;
        let outcome = state.reconciler.reconcile().await?;
        debug!(wrote = outcome.wrote, purged = outcome.purged.len(), "TriggerSync complete");
        Ok::<(), RpcError>(())
    }
    .await;

    reply(RPC_METHOD_TRIGGER_SYNC, result)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn metrics_handler() -> Response {
    match metrics::gather_metrics() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

fn invalid(rejection: JsonRejection) -> RpcError {
    RpcError::InvalidRequest {
        reason: rejection.body_text(),
    }
}

fn reply(method: &'static str, result: Result<(), RpcError>) -> RpcReply {
    match result {
        Ok(()) => {
            metrics::record_rpc_request(method, "ok");
            (StatusCode::OK, Json(RpcResponse::ok()))
        }
        Err(e) if e.is_caller_error() => {
            metrics::record_rpc_request(method, "invalid");
            debug!(method, error = %e, "Rejected malformed RPC request");
            (StatusCode::BAD_REQUEST, Json(RpcResponse::failed(e.to_string())))
        }
        Err(e) => {
            metrics::record_rpc_request(method, "failed");
            warn!(method, error = %e, "RPC action failed");
            (StatusCode::OK, Json(RpcResponse::failed(e.to_string())))
        }
    }
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod server_tests;
