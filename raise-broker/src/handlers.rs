//! # Broker-Side Method Handlers
//!
//! Two very different handler sets get installed depending on which path a
//! connection came in on. Worker connections only ever call `Control_Hello`
//! to announce themselves; everything else they do is in response to a call
//! the broker forwards to them. Client connections call the `Client_*`
//! directory methods plus the `Common_*` methods, which the broker forwards
//! to whichever worker the call names.

use std::sync::Arc;

use raise_common::protocol::{
    methods, GetInfoRequest, GetInfoResponse, GetWorkersRequest, GetWorkersResponse, HelloRequest,
    HelloResponse, PingRequest, PingResponse, SendMessageRequest, SendMessageResponse,
};
use raise_common::{Endpoint, PeerInfo, RaiseError, Result};
use tracing::{info, warn};

use crate::registry::WorkerRegistry;

/// Installs the single handler a worker connection is allowed to call:
/// `Control_Hello`. If `verify_liveness` is set, the broker calls
/// `Common_Ping` back on the worker before registering it, so a worker that
/// can send a Hello but can't answer its own socket never makes it into the
/// directory.
pub fn install_worker_handlers(
    endpoint: &Arc<Endpoint>,
    registry: Arc<WorkerRegistry>,
    verify_liveness: bool,
) {
    let worker_endpoint = endpoint.clone();
    endpoint.register(
        methods::CONTROL_HELLO,
        move |peer: PeerInfo, req: HelloRequest| {
            let registry = registry.clone();
            let worker_endpoint = worker_endpoint.clone();
            async move {
                if verify_liveness {
                    worker_endpoint
                        .call::<PingRequest, PingResponse>(
                            methods::COMMON_PING,
                            PingRequest { name: None },
                        )
                        .await
                        .map_err(|e| {
                            warn!(worker = %req.name, %peer.addr, error = %e, "worker failed liveness probe, refusing Hello");
                            RaiseError::Other(format!("liveness probe failed: {e}"))
                        })?;
                }

                info!(worker = %req.name, %peer.addr, "Control_Hello accepted");
                registry.register(req.name.clone(), worker_endpoint.clone());
                Ok(HelloResponse {})
            }
        },
    );
}

/// Installs the client-facing directory and forwarding handlers.
pub fn install_client_handlers(endpoint: &Arc<Endpoint>, registry: Arc<WorkerRegistry>) {
    {
        let registry = registry.clone();
        endpoint.register(
            methods::CLIENT_GET_WORKERS,
            move |_peer: PeerInfo, _req: GetWorkersRequest| {
                let registry = registry.clone();
                async move {
                    Ok(GetWorkersResponse {
                        workers: registry.names(),
                    })
                }
            },
        );
    }

    {
        let registry = registry.clone();
        endpoint.register(
            methods::COMMON_PING,
            move |_peer: PeerInfo, req: PingRequest| {
                let registry = registry.clone();
                async move {
                    match &req.name {
                        None => Ok(PingResponse {
                            message: "pong".to_string(),
                        }),
                        Some(target) => {
                            let worker = find_worker(&registry, target)?;
                            forward::<PingRequest, PingResponse>(&worker, methods::COMMON_PING, target, req)
                                .await
                        }
                    }
                }
            },
        );
    }

    {
        let registry = registry.clone();
        endpoint.register(
            methods::COMMON_GET_INFO,
            move |_peer: PeerInfo, req: GetInfoRequest| {
                let registry = registry.clone();
                async move {
                    let worker = find_worker(&registry, &req.name)?;
                    let name = req.name.clone();
                    forward::<GetInfoRequest, GetInfoResponse>(
                        &worker,
                        methods::COMMON_GET_INFO,
                        &name,
                        req,
                    )
                    .await
                }
            },
        );
    }

    {
        let registry = registry.clone();
        endpoint.register(
            methods::COMMON_SEND_MESSAGE,
            move |_peer: PeerInfo, req: SendMessageRequest| {
                let registry = registry.clone();
                async move {
                    let target = req
                        .target
                        .clone()
                        .ok_or_else(|| RaiseError::Other("Common_SendMessage requires a target worker".into()))?;
                    let worker = find_worker(&registry, &target)?;

                    // The target field only makes sense on the client->broker
                    // hop; the worker already knows who it is.
                    let forwarded = SendMessageRequest {
                        target: None,
                        ..req
                    };
                    forward::<SendMessageRequest, SendMessageResponse>(
                        &worker,
                        methods::COMMON_SEND_MESSAGE,
                        &target,
                        forwarded,
                    )
                    .await
                }
            },
        );
    }
}

fn find_worker(registry: &WorkerRegistry, name: &str) -> Result<Arc<Endpoint>> {
    registry
        .find(name)
        .ok_or_else(|| RaiseError::WorkerNotFound(name.to_string()))
}

async fn forward<Req, Resp>(worker: &Arc<Endpoint>, method: &str, target: &str, req: Req) -> Result<Resp>
where
    Req: serde::Serialize,
    Resp: serde::de::DeserializeOwned,
{
    worker
        .call(method, req)
        .await
        .map_err(|e| RaiseError::RemoteCall {
            method: format!("{method}@{target}"),
            source: Box::new(e),
        })
}
