use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde_json::json;

use crate::context::AppContext;
use crate::error::{AppError, AppResult};
use crate::metrics;
use sigmap_payload::{Payload, PayloadError, VerifyOptions, ENDPOINT_LENGTH};
use sigmap_storage::StorageError;

/// POST {base_route}
///
/// Accepts an encoded payload (already read through the bounded body
/// reader), verifies it in server mode, and stores the verbatim bytes
/// under the derived endpoint. The response carries the endpoint so a
/// publisher does not have to recompute it.
pub async fn post_payload(ctx: &AppContext, body: Bytes) -> Response<Full<Bytes>> {
    match store_payload(ctx, &body).await {
        Ok(endpoint) => {
            metrics::PAYLOADS_STORED_TOTAL.inc();
            json_response(StatusCode::OK, json!({ "endpoint": endpoint }))
        }
        Err(e) => e.to_response(),
    }
}

async fn store_payload(ctx: &AppContext, body: &Bytes) -> AppResult<String> {
    let payload = Payload::decode(body)?;
    payload.verify(&VerifyOptions::server())?;

    let endpoint = payload.endpoint();
    ctx.store.put(&endpoint, body.to_vec(), payload.ttl, payload.timestamp).await?;
    tracing::info!(endpoint = %endpoint, ttl = ?payload.ttl, "payload stored");
    Ok(endpoint)
}

/// GET {base_route}{endpoint}
///
/// Endpoints that are not 88 characters of URL-safe base64 are refused
/// before any store lookup. A stored entry that no longer decodes or
/// verifies against its endpoint is deleted best-effort before the 404
/// goes out, so tampered or corrupted slots heal themselves.
pub async fn get_payload(ctx: &AppContext, endpoint: &str) -> Response<Full<Bytes>> {
    if endpoint.len() != ENDPOINT_LENGTH {
        return AppError::bad_request(format!(
            "invalid endpoint length {} for {:?}",
            endpoint.len(),
            endpoint
        ))
        .to_response();
    }
    if URL_SAFE.decode(endpoint).is_err() {
        return AppError::bad_request(format!("endpoint {:?} is not url-safe base64", endpoint))
            .to_response();
    }

    let bytes = match ctx.store.get(endpoint).await {
        Ok(bytes) => bytes,
        Err(e) => return AppError::from(e).to_response(),
    };

    if let Err(e) = verify_stored(endpoint, &bytes) {
        tracing::warn!(
            endpoint = %endpoint,
            error = %e,
            "stored payload failed read verification, deleting"
        );
        metrics::SELF_HEAL_DELETES_TOTAL.inc();
        if let Err(delete_err) = ctx.store.delete(endpoint).await {
            tracing::warn!(endpoint = %endpoint, error = %delete_err, "self-heal delete failed");
        }
        return AppError::from(StorageError::NotFound).to_response();
    }

    metrics::PAYLOAD_FETCHES_TOTAL.inc();
    bytes_response(StatusCode::OK, bytes)
}

fn verify_stored(endpoint: &str, bytes: &[u8]) -> Result<(), PayloadError> {
    let payload = Payload::decode(bytes)?;
    payload.verify(&VerifyOptions::client().with_endpoint(endpoint))
}

/// GET /health
pub fn health() -> Response<Full<Bytes>> {
    json_response(StatusCode::OK, json!({ "status": "healthy" }))
}

/// GET /metrics
pub fn metrics_text() -> Response<Full<Bytes>> {
    match metrics::gather_metrics() {
        Ok(text) => {
            let mut response = Response::new(Full::new(Bytes::from(text)));
            if let Ok(content_type) = "text/plain; version=0.0.4".parse() {
                response.headers_mut().insert("content-type", content_type);
            }
            response
        }
        Err(e) => AppError::internal(format!("failed to gather metrics: {}", e)).to_response(),
    }
}

pub fn not_found() -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from("Not Found")));
    *response.status_mut() = StatusCode::NOT_FOUND;
    response
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response<Full<Bytes>> {
    let body_bytes = serde_json::to_vec(&body).unwrap_or_default();
    let mut response = Response::new(Full::new(Bytes::from(body_bytes)));
    *response.status_mut() = status;
    if let Ok(content_type) = "application/json".parse() {
        response.headers_mut().insert("content-type", content_type);
    }
    response
}

fn bytes_response(status: StatusCode, bytes: Vec<u8>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(bytes)));
    *response.status_mut() = status;
    if let Ok(content_type) = "application/octet-stream".parse() {
        response.headers_mut().insert("content-type", content_type);
    }
    response
}
