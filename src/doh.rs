//! DNS-over-HTTPS (RFC 8484).
//!
//! GET carries `?dns=<base64url>` and POST a raw `application/dns-message`
//! body; both feed the same pipeline as UDP and TCP. Connections are
//! served one by one so each handler knows its peer address; TLS is
//! optional and terminates here when configured.

use axum::Router;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::response::Response;
use axum::routing::get;
use http::{HeaderMap, StatusCode, header};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use bytes::Bytes;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info};

use crate::error::Result;
use crate::metrics::Metrics;
use crate::server::{Engine, Reply, Transport};
use crate::traits::Repository;

pub const DNS_MESSAGE: &str = "application/dns-message";

#[derive(Clone)]
struct DohContext {
    engine: Arc<Engine>,
    peer: SocketAddr,
}

#[derive(Debug, Deserialize)]
struct DohParams {
    dns: Option<String>,
}

fn dns_response(bytes: Vec<u8>) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, DNS_MESSAGE)
        .header(header::CACHE_CONTROL, "no-store")
        .body(Body::from(bytes))
        .expect("static response builds")
}

fn status_response(status: StatusCode, message: &str) -> Response {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, mime::TEXT_PLAIN.as_ref())
        .body(Body::from(message.to_string()))
        .expect("static response builds")
}

async fn answer(ctx: &DohContext, wire: &[u8]) -> Response {
    let deadline = ctx.engine.config.tcp_deadline();
    let reply = match tokio::time::timeout(
        deadline,
        ctx.engine.handle(wire, ctx.peer, Transport::Doh),
    )
    .await
    {
        Ok(reply) => reply,
        Err(_) => return status_response(StatusCode::GATEWAY_TIMEOUT, "deadline exceeded"),
    };

    match reply {
        Reply::Messages(mut messages) if !messages.is_empty() => dns_response(messages.remove(0)),
        Reply::RateLimited => status_response(StatusCode::TOO_MANY_REQUESTS, "rate limited"),
        _ => status_response(StatusCode::BAD_REQUEST, "malformed query"),
    }
}

async fn handle_get(State(ctx): State<DohContext>, Query(params): Query<DohParams>) -> Response {
    let Some(encoded) = params.dns else {
        return status_response(StatusCode::BAD_REQUEST, "missing dns parameter");
    };
    let Ok(wire) = URL_SAFE_NO_PAD.decode(encoded.as_bytes()) else {
        return status_response(StatusCode::BAD_REQUEST, "bad base64url");
    };
    answer(&ctx, &wire).await
}

async fn handle_post(
    State(ctx): State<DohContext>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if content_type != DNS_MESSAGE {
        return status_response(StatusCode::BAD_REQUEST, "unsupported media type");
    }
    answer(&ctx, &body).await
}

fn router(ctx: DohContext) -> Router {
    let path = ctx.engine.config.doh_path.clone();
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    Router::new()
        .route(&path, get(handle_get).post(handle_post))
        .layer(cors)
        .with_state(ctx)
}

/// Serve DoH until the shutdown signal fires. Other methods on the path
/// answer 405 through the method router.
pub async fn serve(
    engine: Arc<Engine>,
    addr: SocketAddr,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let acceptor = crate::tls::build_acceptor(engine.config.doh_tls.as_ref())?;
    let listener = TcpListener::bind(addr).await?;
    info!(
        %addr,
        path = %engine.config.doh_path,
        tls = acceptor.is_some(),
        "DoH listening"
    );

    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = shutdown.recv() => return Ok(()),
        };

        let ctx = DohContext {
            engine: Arc::clone(&engine),
            peer,
        };
        let service = TowerToHyperService::new(router(ctx));
        let acceptor = acceptor.clone();

        tokio::spawn(async move {
            let result = match acceptor {
                Some(acceptor) => match acceptor.accept(stream).await {
                    Ok(tls_stream) => {
                        hyper::server::conn::http1::Builder::new()
                            .serve_connection(TokioIo::new(tls_stream), service)
                            .await
                    }
                    Err(e) => {
                        debug!(%peer, error = %e, "TLS handshake failed");
                        return;
                    }
                },
                None => {
                    hyper::server::conn::http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await
                }
            };
            if let Err(e) = result {
                debug!(%peer, error = %e, "DoH connection ended");
            }
        });
    }
}

/// Metrics and health endpoints on the ops listener.
pub async fn serve_ops(
    metrics: Arc<Metrics>,
    repo: Arc<dyn Repository>,
    addr: SocketAddr,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    #[derive(Clone)]
    struct OpsContext {
        metrics: Arc<Metrics>,
        repo: Arc<dyn Repository>,
    }

    async fn metrics_handler(State(ctx): State<OpsContext>) -> Response {
        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/plain; version=0.0.4")
            .body(Body::from(ctx.metrics.gather()))
            .expect("static response builds")
    }

    async fn health_handler(State(ctx): State<OpsContext>) -> Response {
        let (status, body) = match ctx.repo.ping().await {
            Ok(()) => (StatusCode::OK, serde_json::json!({"status": "ok"})),
            Err(e) => (
                StatusCode::SERVICE_UNAVAILABLE,
                serde_json::json!({"status": "degraded", "error": e.to_string()}),
            ),
        };
        Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, mime::APPLICATION_JSON.as_ref())
            .body(Body::from(body.to_string()))
            .expect("static response builds")
    }

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(OpsContext { metrics, repo });

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "ops endpoint listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;
    Ok(())
}
