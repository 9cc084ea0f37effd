//! Diagnostics server exposing per-pool continuum state as JSON.

use std::convert::Infallible;
use std::net::SocketAddr;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use sluice_core::PoolStats;
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::registry::SharedRegistry;

/// JSON shape of one pool in the diagnostics output.
#[derive(Debug, Serialize)]
pub struct PoolView {
    /// Pool name.
    pub name: String,
    /// Configured groups.
    pub groups: usize,
    /// Groups live at the last rebuild.
    pub live_groups: u32,
    /// Active continuum slots.
    pub continuum_size: usize,
    /// Continuum storage capacity in slots.
    pub capacity: usize,
    /// Next scheduled rebuild, microseconds since the epoch.
    pub next_rebuild_us: Option<u64>,
}

impl From<PoolStats> for PoolView {
    fn from(stats: PoolStats) -> Self {
        Self {
            name: stats.name,
            groups: stats.groups,
            live_groups: stats.live_groups,
            continuum_size: stats.continuum_size,
            capacity: stats.capacity,
            next_rebuild_us: stats.next_rebuild.map(|t| t.as_micros()),
        }
    }
}

/// Starts the diagnostics server on an already bound listener.
///
/// Runs indefinitely, accepting connections and answering stats requests.
pub async fn serve(listener: TcpListener, registry: SharedRegistry) -> std::io::Result<()> {
    info!(addr = %listener.local_addr()?, "stats server listening");

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let registry = registry.clone();

        tokio::task::spawn(async move {
            let service = service_fn(move |req| {
                let registry = registry.clone();
                async move { handle_request(req, &registry) }
            });
            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                debug!(error = %err, "stats connection error");
            }
        });
    }
}

/// Binds `addr` and serves diagnostics on it.
pub async fn start_server(addr: SocketAddr, registry: SharedRegistry) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve(listener, registry).await
}

/// Routes `GET /pools` and `GET /pools/<name>`.
fn handle_request<B>(
    req: Request<B>,
    registry: &SharedRegistry,
) -> Result<Response<Full<Bytes>>, Infallible> {
    if req.method() != Method::GET {
        return Ok(text(StatusCode::METHOD_NOT_ALLOWED, "method not allowed"));
    }

    let path = req.uri().path().trim_end_matches('/');
    let response = match path.strip_prefix("/pools") {
        Some("") => {
            let views: Vec<PoolView> = registry
                .handles()
                .into_iter()
                .map(|h| PoolView::from(h.pool.stats()))
                .collect();
            json(&views)
        }
        Some(rest) => match rest.strip_prefix('/').and_then(|name| registry.get(name)) {
            Some(handle) => json(&PoolView::from(handle.pool.stats())),
            None => text(StatusCode::NOT_FOUND, "no such pool"),
        },
        None => text(StatusCode::NOT_FOUND, "not found"),
    };
    Ok(response)
}

fn json<T: Serialize>(value: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(value) {
        Ok(body) => {
            let mut response = Response::new(Full::new(Bytes::from(body)));
            response.headers_mut().insert(
                hyper::header::CONTENT_TYPE,
                hyper::header::HeaderValue::from_static("application/json"),
            );
            response
        }
        Err(e) => text(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

fn text(status: StatusCode, body: &str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
    *response.status_mut() = status;
    response
}
