use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde_json::json;
use thiserror::Error;

use sigmap_payload::PayloadError;
use sigmap_storage::StorageError;

pub type AppResult<T> = Result<T, AppError>;

/// Application error type.
///
/// Internally every failure keeps its specific kind for logging; the
/// responses sent to clients collapse to the status code alone so the
/// service never leaks which check rejected a payload.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("payload error: {0}")]
    Payload(#[from] PayloadError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// Create a bad-request error
    pub fn bad_request(msg: impl Into<String>) -> Self {
        AppError::BadRequest(msg.into())
    }

    /// Create an internal server error
    pub fn internal(msg: impl Into<String>) -> Self {
        AppError::Internal(msg.into())
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // Anything wrong with the submitted payload is the client's
            // problem, including a stale (replayed) timestamp.
            AppError::Payload(_) => StatusCode::BAD_REQUEST,
            AppError::Storage(StorageError::StaleTimestamp) => StatusCode::BAD_REQUEST,
            AppError::Storage(StorageError::NotFound) => StatusCode::NOT_FOUND,
            AppError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Log this error with a level matching its class. The specific
    /// kind only ever appears here, never in a response body.
    pub fn log(&self) {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, status = %status.as_u16(), "server error");
        } else if status == StatusCode::NOT_FOUND {
            tracing::debug!(error = %self, "not found");
        } else {
            tracing::debug!(error = %self, status = %status.as_u16(), "client error");
        }
    }

    /// Convert this error into an HTTP response with a collapsed body.
    pub fn to_response(self) -> Response<Full<Bytes>> {
        self.log();

        let status = self.status_code();
        let reason = status.canonical_reason().unwrap_or("error");
        let body = json!({
            "error": reason,
            "status": status.as_u16(),
        });
        let body_bytes = serde_json::to_vec(&body)
            .unwrap_or_else(|_| b"{\"error\":\"internal server error\"}".to_vec());

        let mut response = Response::new(Full::new(Bytes::from(body_bytes)));
        *response.status_mut() = status;
        if let Ok(content_type) = "application/json".parse() {
            response.headers_mut().insert("content-type", content_type);
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_failures_collapse_to_bad_request() {
        for err in [
            PayloadError::DataTooLarge,
            PayloadError::OutsideSubmitWindow,
            PayloadError::SignatureInvalid,
            PayloadError::UnknownAlgorithm(7),
            PayloadError::Decode("truncated".to_string()),
        ] {
            assert_eq!(AppError::from(err).status_code(), StatusCode::BAD_REQUEST);
        }
    }

    #[test]
    fn storage_failures_map_per_kind() {
        assert_eq!(
            AppError::from(StorageError::StaleTimestamp).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::from(StorageError::NotFound).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::from(StorageError::Backend("down".to_string())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn responses_never_carry_the_internal_kind() {
        let response = AppError::from(PayloadError::OutsideSubmitWindow).to_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        // Body is built from the canonical reason only; the specific
        // validation kind stays in the logs.
        let body = format!("{:?}", response.body());
        assert!(!body.contains("submit window"));
    }
}
