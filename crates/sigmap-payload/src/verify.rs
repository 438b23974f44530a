//! Payload validation and verification.
//!
//! Validation applies the configured bounds and freshness checks;
//! verification additionally checks every signature bundle against the
//! signing transcript. The default configuration is client mode: the
//! submit window is not enforced, so a payload may be as old as its TTL
//! allows. Hosts that store payloads verify in server mode, which adds
//! the drift check between the publisher timestamp and the reference
//! time.

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::error::PayloadError;
use crate::sig;
use crate::{
    Payload, MAX_DATA_SIZE, MAX_PAYLOAD_SIZE, MAX_SIG_BUNDLE_COUNT, MAX_SUBMIT_WINDOW, MAX_TTL,
    MIN_TTL, V1,
};

/// Which checks run and against which reference point.
///
/// All bounds checks default to on; `check_submit_window` defaults to
/// off and is the difference between client and server mode.
#[derive(Debug, Clone)]
pub struct VerifyOptions {
    pub check_payload_size: bool,
    pub check_data_size: bool,
    pub check_version: bool,
    pub check_expiration: bool,
    pub check_ttl_bounds: bool,
    pub check_future: bool,
    pub check_submit_window: bool,
    /// When set, the recomputed endpoint must equal this string.
    pub endpoint: Option<String>,
    /// Time used by the freshness checks.
    pub reference_time: DateTime<Utc>,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            check_payload_size: true,
            check_data_size: true,
            check_version: true,
            check_expiration: true,
            check_ttl_bounds: true,
            check_future: true,
            check_submit_window: false,
            endpoint: None,
            reference_time: Utc::now(),
        }
    }
}

impl VerifyOptions {
    /// Client-mode verification: everything except the submit window.
    pub fn client() -> Self {
        Self::default()
    }

    /// Server-mode verification: client mode plus the submit-window
    /// drift check. Any host that stores payloads must use this.
    pub fn server() -> Self {
        Self { check_submit_window: true, ..Self::default() }
    }

    /// Binds verification to an expected endpoint (set on reads).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Overrides the reference time (defaults to now).
    pub fn with_reference_time(mut self, reference_time: DateTime<Utc>) -> Self {
        self.reference_time = reference_time;
        self
    }
}

/// Runs validation then signature verification, short-circuiting on the
/// first failed check.
pub(crate) fn verify(payload: &Payload, opts: &VerifyOptions) -> Result<(), PayloadError> {
    validate(payload, opts)?;

    if payload.sig_bundles.is_empty() {
        return Err(PayloadError::NoSignatures);
    }
    if payload.sig_bundles.len() > MAX_SIG_BUNDLE_COUNT {
        return Err(PayloadError::TooManySignatures);
    }

    let message = payload.signing_bytes();
    for bundle in &payload.sig_bundles {
        if bundle.pub_key.len() != bundle.alg.pub_key_len() {
            return Err(PayloadError::PubKeyLengthInvalid);
        }
        if !sig::verify(&message, bundle) {
            return Err(PayloadError::SignatureInvalid);
        }
    }
    Ok(())
}

fn validate(payload: &Payload, opts: &VerifyOptions) -> Result<(), PayloadError> {
    let window = ChronoDuration::from_std(MAX_SUBMIT_WINDOW).unwrap_or(ChronoDuration::MAX);
    let ttl = ChronoDuration::from_std(payload.ttl).unwrap_or(ChronoDuration::MAX);

    if let Some(endpoint) = &opts.endpoint {
        if *endpoint != payload.endpoint() {
            return Err(PayloadError::EndpointMismatch);
        }
    }
    if opts.check_payload_size && payload.encode()?.len() > MAX_PAYLOAD_SIZE {
        return Err(PayloadError::PayloadTooLarge);
    }
    if opts.check_data_size && payload.data.len() > MAX_DATA_SIZE {
        return Err(PayloadError::DataTooLarge);
    }
    if opts.check_version && payload.version != V1 {
        return Err(PayloadError::UnsupportedVersion(payload.version));
    }
    if opts.check_expiration
        && opts.reference_time.signed_duration_since(payload.timestamp) > ttl
    {
        return Err(PayloadError::Expired);
    }
    if opts.check_ttl_bounds && (payload.ttl < MIN_TTL || payload.ttl > MAX_TTL) {
        return Err(PayloadError::TtlOutOfBounds);
    }
    if opts.check_future && payload.timestamp > opts.reference_time + window {
        return Err(PayloadError::TimestampInFuture);
    }
    if opts.check_submit_window
        && opts.reference_time.signed_duration_since(payload.timestamp).abs() > window
    {
        return Err(PayloadError::OutsideSubmitWindow);
    }
    Ok(())
}
