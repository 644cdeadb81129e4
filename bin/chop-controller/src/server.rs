//! Metrics and health endpoint

use crate::metrics::ControllerMetrics;
use anyhow::Result;
use chop_core::HostRegistry;
use http_body_util::Full;
use hyper::{
    body::Bytes,
    header::{HeaderValue, CONTENT_TYPE},
    server::conn::http1,
    service::service_fn,
    Method, Request, Response, StatusCode,
};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct ServerState {
    pub metrics: ControllerMetrics,
    pub registry: HostRegistry,
    /// Set once the controller passed its cache sync barrier
    pub ready: Arc<AtomicBool>,
}

/// Accept connections on `addr` until the task is dropped
pub async fn serve(addr: SocketAddr, state: ServerState) -> Result<()> {
    let listener = TcpListener::bind(&addr).await?;
    info!("Metrics server listening on {}", addr);

    loop {
        let (stream, peer_addr) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let state = state.clone();

        tokio::task::spawn(async move {
            let service = service_fn(move |req| handle_request(req, state.clone()));

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!("Error serving connection from {}: {}", peer_addr, e);
            }
        });
    }
}

async fn handle_request<B>(
    req: Request<B>,
    state: ServerState,
) -> Result<Response<Full<Bytes>>, Infallible> {
    if req.method() != Method::GET {
        return Ok(text(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed\n".into()));
    }

    let path = req.uri().path().to_string();
    drop(req);

    let response = match path.as_str() {
        "/metrics" => {
            let owners = state.registry.owner_count().await;
            state.metrics.controlled_installations.set(owners as i64);
            match state.metrics.gather() {
                Ok(body) => {
                    let mut response = text(StatusCode::OK, body);
                    response.headers_mut().insert(
                        CONTENT_TYPE,
                        HeaderValue::from_static("text/plain; version=0.0.4"),
                    );
                    response
                }
                Err(e) => {
                    warn!("Failed to gather metrics: {}", e);
                    text(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Failed to gather metrics\n".into(),
                    )
                }
            }
        }
        "/healthz" => text(StatusCode::OK, "OK\n".into()),
        "/readyz" if state.ready.load(Ordering::Acquire) => text(StatusCode::OK, "OK\n".into()),
        "/readyz" => text(StatusCode::SERVICE_UNAVAILABLE, "caches not synced\n".into()),
        _ => text(StatusCode::NOT_FOUND, "Not Found\n".into()),
    };

    Ok(response)
}

fn text(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
}
