use std::convert::Infallible;
use std::fs::File;
use std::io::BufReader;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Incoming as IncomingBody;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{header::HeaderValue, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tokio::signal;
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio::task::JoinSet;
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

use crate::config::{Config, CorsConfig, TlsConfig};
use crate::context::AppContext;
use crate::error::AppError;
use crate::handlers;
use crate::metrics;
use sigmap_payload::MAX_PAYLOAD_SIZE;
use sigmap_storage::{new_store, Store};

type HttpResult = Result<Response<Full<Bytes>>, Infallible>;

/// Builds the configured storage engine and serves until interrupted.
pub async fn run(config: Config) -> Result<()> {
    let store = new_store(&config.storage)
        .await
        .context("failed to initialize the storage engine")?;
    run_with_store(config, store).await
}

/// Serves requests against an explicitly-owned store. Tests and embedders
/// construct their own store instance; nothing here is process-global.
pub async fn run_with_store(config: Config, store: Arc<dyn Store>) -> Result<()> {
    let config = Arc::new(config);
    let ctx = AppContext::new(store.clone(), config.clone());
    let throttle = Arc::new(Throttle::new(config.throttle_limit, config.throttle_backlog));

    let tls_acceptor = if config.tls.enabled {
        Some(build_tls_acceptor(&config.tls)?)
    } else {
        tracing::warn!("running in NON-TLS mode");
        None
    };

    let listener = TcpListener::bind(config.addr()).await?;
    tracing::info!(
        addr = %config.addr(),
        engine = ?config.storage.engine,
        "sigmap server listening"
    );

    // Connection tasks are tracked so shutdown can drain in-flight
    // requests; the request timeout is the drain budget.
    let mut connections: JoinSet<()> = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, _) = accepted?;
                let ctx = ctx.clone();
                let throttle = throttle.clone();
                let tls_acceptor = tls_acceptor.clone();

                connections.spawn(async move {
                    serve_connection(stream, tls_acceptor, ctx, throttle).await;
                });
                // Reap connections that have already finished.
                while connections.try_join_next().is_some() {}
            }
            _ = signal::ctrl_c() => {
                tracing::info!(
                    open_connections = connections.len(),
                    "shutdown signal received, draining connections"
                );
                let drain = async {
                    while connections.join_next().await.is_some() {}
                };
                if tokio::time::timeout(config.request_timeout, drain).await.is_err() {
                    tracing::warn!("drain budget elapsed, aborting remaining connections");
                }
                if let Err(e) = store.close().await {
                    tracing::warn!(error = %e, "store close failed during shutdown");
                }
                return Ok(());
            }
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    tls_acceptor: Option<TlsAcceptor>,
    ctx: AppContext,
    throttle: Arc<Throttle>,
) {
    let service = service_fn(move |req| route(ctx.clone(), throttle.clone(), req));

    let result = match tls_acceptor {
        Some(acceptor) => match acceptor.accept(stream).await {
            Ok(tls_stream) => {
                http1::Builder::new().serve_connection(TokioIo::new(tls_stream), service).await
            }
            Err(e) => {
                tracing::debug!(error = %e, "TLS handshake failed");
                return;
            }
        },
        None => http1::Builder::new().serve_connection(TokioIo::new(stream), service).await,
    };

    if let Err(e) = result {
        tracing::debug!(error = %e, "error serving connection");
    }
}

async fn route(ctx: AppContext, throttle: Arc<Throttle>, req: Request<IncomingBody>) -> HttpResult {
    let _permit = match throttle.acquire(ctx.config.request_timeout).await {
        Some(permit) => permit,
        None => {
            metrics::REQUESTS_THROTTLED_TOTAL.inc();
            return Ok(status_response(StatusCode::SERVICE_UNAVAILABLE));
        }
    };

    let cors = ctx.config.cors.clone();
    if req.method() == Method::OPTIONS {
        return Ok(preflight_response(&cors));
    }

    let mut response =
        match tokio::time::timeout(ctx.config.request_timeout, dispatch(&ctx, req)).await {
            Ok(response) => response,
            Err(_) => {
                tracing::warn!("request timed out");
                status_response(StatusCode::GATEWAY_TIMEOUT)
            }
        };

    apply_cors_headers(&mut response, &cors);
    Ok(response)
}

async fn dispatch(ctx: &AppContext, req: Request<IncomingBody>) -> Response<Full<Bytes>> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    // Side channels live off the base route.
    if method == Method::GET && path == "/health" {
        return handlers::health();
    }
    if method == Method::GET && path == "/metrics" {
        return handlers::metrics_text();
    }

    let Some(rest) = relative_path(&ctx.config.base_route, &path) else {
        return handlers::not_found();
    };

    match (method.as_str(), rest) {
        ("POST", "") | ("POST", "/") => {
            // The bounded reader enforces the payload size cap before a
            // single byte is decoded.
            let limited = Limited::new(req.into_body(), MAX_PAYLOAD_SIZE);
            match limited.collect().await {
                Ok(collected) => handlers::post_payload(ctx, collected.to_bytes()).await,
                Err(e) => {
                    AppError::bad_request(format!("failed to read request body: {}", e))
                        .to_response()
                }
            }
        }
        ("GET", rest) => match rest.strip_prefix('/') {
            Some(endpoint) if !endpoint.is_empty() && !endpoint.contains('/') => {
                handlers::get_payload(ctx, endpoint).await
            }
            _ => handlers::not_found(),
        },
        _ => handlers::not_found(),
    }
}

/// Strips the configured base route off a request path. Returns `None`
/// when the path lies outside the base route.
fn relative_path<'a>(base_route: &str, path: &'a str) -> Option<&'a str> {
    let base = base_route.trim_end_matches('/');
    if base.is_empty() {
        return Some(path);
    }
    match path.strip_prefix(base) {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => Some(rest),
        _ => None,
    }
}

// ============================================================================
// Concurrency throttle
// ============================================================================

/// Caps in-flight requests at `limit`, queueing at most `backlog`
/// waiters. Requests beyond the backlog, and waiters that outlive the
/// request timeout, are refused with 503.
struct Throttle {
    permits: Semaphore,
    waiting: AtomicUsize,
    backlog: usize,
}

impl Throttle {
    fn new(limit: usize, backlog: usize) -> Self {
        Self { permits: Semaphore::new(limit), waiting: AtomicUsize::new(0), backlog }
    }

    async fn acquire(&self, timeout: Duration) -> Option<SemaphorePermit<'_>> {
        if let Ok(permit) = self.permits.try_acquire() {
            return Some(permit);
        }
        if self.waiting.fetch_add(1, Ordering::SeqCst) >= self.backlog {
            self.waiting.fetch_sub(1, Ordering::SeqCst);
            return None;
        }
        let result = tokio::time::timeout(timeout, self.permits.acquire()).await;
        self.waiting.fetch_sub(1, Ordering::SeqCst);
        match result {
            Ok(Ok(permit)) => Some(permit),
            _ => None,
        }
    }
}

// ============================================================================
// CORS
// ============================================================================

fn header_value(parts: &[String]) -> HeaderValue {
    HeaderValue::from_str(&parts.join(", ")).unwrap_or(HeaderValue::from_static("*"))
}

fn apply_cors_headers(response: &mut Response<Full<Bytes>>, cors: &CorsConfig) {
    let headers = response.headers_mut();
    headers.insert("access-control-allow-origin", header_value(&cors.allowed_origins));
    headers.insert("access-control-allow-credentials", HeaderValue::from_static("true"));
}

fn preflight_response(cors: &CorsConfig) -> Response<Full<Bytes>> {
    let mut response = status_response(StatusCode::NO_CONTENT);
    let headers = response.headers_mut();
    headers.insert("access-control-allow-origin", header_value(&cors.allowed_origins));
    headers.insert(
        "access-control-allow-methods",
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert("access-control-allow-headers", header_value(&cors.allowed_headers));
    headers.insert("access-control-allow-credentials", HeaderValue::from_static("true"));
    headers.insert("access-control-max-age", HeaderValue::from_static("600"));
    response
}

fn status_response(status: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

// ============================================================================
// TLS
// ============================================================================

fn build_tls_acceptor(tls: &TlsConfig) -> Result<TlsAcceptor> {
    let certs = rustls_pemfile::certs(&mut BufReader::new(
        File::open(&tls.cert_file)
            .with_context(|| format!("failed to open cert file {}", tls.cert_file))?,
    ))
    .collect::<Result<Vec<_>, _>>()
    .context("failed to parse certificates")?;

    let key = rustls_pemfile::private_key(&mut BufReader::new(
        File::open(&tls.key_file)
            .with_context(|| format!("failed to open key file {}", tls.key_file))?,
    ))?
    .ok_or_else(|| anyhow::anyhow!("no private key found in {}", tls.key_file))?;

    let server_config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("invalid TLS certificate or key")?;
    Ok(TlsAcceptor::from(Arc::new(server_config)))
}
