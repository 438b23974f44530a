//! Signed payload model for the sigmap service.
//!
//! A payload is a short opaque message bound to a version, a
//! publisher-asserted timestamp, a time-to-live, and one to four
//! signature bundles. The storage endpoint for a payload is derived
//! solely from the concatenation of its signers' public keys, so anyone
//! holding the payload bytes can verify both authorship and address
//! without trusting the server that stored them.

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use blake2::{Blake2b512, Digest};
use chrono::{DateTime, Utc};
use std::time::Duration;

mod codec;
pub mod error;
pub mod sig;
mod verify;

pub use error::PayloadError;
pub use verify::VerifyOptions;

use sig::{SignatureBundle, Signer};

/// Reserved, invalid payload version.
pub const V0: u16 = 0;
/// The current payload version; the only one accepted.
pub const V1: u16 = 1;

/// Upper bound on the count of signature bundles in a single payload.
pub const MAX_SIG_BUNDLE_COUNT: usize = 4;
/// Strict upper bound on the encoded payload, enforced with a bounded
/// reader before decoding.
pub const MAX_PAYLOAD_SIZE: usize = 128 * 1024;
/// Upper bound on `data`.
pub const MAX_DATA_SIZE: usize = 512;
/// Allowed drift between a submission and the timestamp on the payload.
pub const MAX_SUBMIT_WINDOW: Duration = Duration::from_secs(5);
/// Minimum payload TTL.
pub const MIN_TTL: Duration = Duration::ZERO;
/// Maximum payload TTL (one week).
pub const MAX_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);
/// TTL used when a payload is generated without one.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Character count of an endpoint: URL-safe base64 of a BLAKE2b-512 hash.
pub const ENDPOINT_LENGTH: usize = 88;

/// The canonical signed record: what publishers sign and servers store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub version: u16,
    pub timestamp: DateTime<Utc>,
    pub ttl: Duration,
    pub sig_bundles: Vec<SignatureBundle>,
    pub data: Vec<u8>,
}

/// Fields a publisher may pin when generating a payload. The defaults
/// are the current version, the current time, and a 24h TTL; a zero TTL
/// is treated as unset and replaced with the default.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub version: u16,
    pub timestamp: DateTime<Utc>,
    pub ttl: Duration,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self { version: V1, timestamp: Utc::now(), ttl: DEFAULT_TTL }
    }
}

impl Payload {
    /// Builds and signs a payload. Requires at least one signer; the
    /// order of the signers is significant, since the endpoint is
    /// derived from their public keys in that order.
    pub fn generate(
        message: &[u8],
        signers: &[&dyn Signer],
        opts: GenerateOptions,
    ) -> Result<Self, PayloadError> {
        if signers.is_empty() {
            return Err(PayloadError::NoSignatures);
        }
        let ttl = if opts.ttl == Duration::ZERO { DEFAULT_TTL } else { opts.ttl };
        // Refuse to sign a ttl the transcript cannot faithfully carry.
        if ttl > MAX_TTL {
            return Err(PayloadError::TtlOutOfBounds);
        }
        let mut payload = Payload {
            version: opts.version,
            timestamp: opts.timestamp,
            ttl,
            sig_bundles: Vec::with_capacity(signers.len()),
            data: message.to_vec(),
        };
        let signing_bytes = payload.signing_bytes();
        for signer in signers {
            payload.sig_bundles.push(signer.sign(&signing_bytes)?);
        }
        Ok(payload)
    }

    /// Decodes the wire encoding. No verification is applied; verify
    /// after decoding.
    pub fn decode(bytes: &[u8]) -> Result<Self, PayloadError> {
        codec::decode(bytes)
    }

    /// Encodes into the wire format. No verification is applied; verify
    /// before encoding.
    pub fn encode(&self) -> Result<Vec<u8>, PayloadError> {
        codec::encode(self)
    }

    /// Validates and verifies this payload under the given options.
    pub fn verify(&self, opts: &VerifyOptions) -> Result<(), PayloadError> {
        verify::verify(self, opts)
    }

    /// The canonical byte string signed by every signer:
    /// `version | timestamp | ttl | len | data`, integers as 8-byte
    /// big-endian. Signature bundles are excluded; their order is
    /// authenticated indirectly through the endpoint.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let timestamp = self.timestamp.timestamp_nanos_opt().unwrap_or_default();
        let ttl = i64::try_from(self.ttl.as_nanos()).unwrap_or_default();

        let mut out = Vec::with_capacity(32 + self.data.len());
        out.extend_from_slice(&u64::from(self.version).to_be_bytes());
        out.extend_from_slice(&(timestamp as u64).to_be_bytes());
        out.extend_from_slice(&(ttl as u64).to_be_bytes());
        out.extend_from_slice(&(self.data.len() as u64).to_be_bytes());
        out.extend_from_slice(&self.data);
        out
    }

    /// All public keys concatenated in bundle order; the input to the
    /// endpoint hash.
    pub fn pub_key_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for bundle in &self.sig_bundles {
            out.extend_from_slice(&bundle.pub_key);
        }
        out
    }

    /// BLAKE2b-512 hash of [`pub_key_bytes`](Self::pub_key_bytes).
    pub fn pub_key_hash(&self) -> [u8; 64] {
        let digest = Blake2b512::digest(self.pub_key_bytes());
        let mut out = [0u8; 64];
        out.copy_from_slice(&digest);
        out
    }

    /// The payload's storage endpoint: URL-safe base64 of the public
    /// key hash, always [`ENDPOINT_LENGTH`] characters.
    pub fn endpoint(&self) -> String {
        URL_SAFE.encode(self.pub_key_hash())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sig::NaClSigner;

    #[test]
    fn generate_requires_a_signer() {
        let err = Payload::generate(b"unsigned", &[], GenerateOptions::default())
            .expect_err("no signers should fail");
        assert_eq!(err, PayloadError::NoSignatures);
    }

    #[test]
    fn generate_rejects_a_ttl_beyond_the_maximum() {
        let signer = NaClSigner::generate();
        let opts =
            GenerateOptions { ttl: MAX_TTL + Duration::from_secs(1), ..GenerateOptions::default() };
        let err = Payload::generate(b"too long", &[&signer], opts)
            .expect_err("oversized ttl should fail");
        assert_eq!(err, PayloadError::TtlOutOfBounds);
    }

    #[test]
    fn generate_defaults_a_zero_ttl() {
        let signer = NaClSigner::generate();
        let opts = GenerateOptions { ttl: Duration::ZERO, ..GenerateOptions::default() };
        let payload =
            Payload::generate(b"defaulted", &[&signer], opts).expect("generate should succeed");
        assert_eq!(payload.ttl, DEFAULT_TTL);
        assert_eq!(payload.verify(&VerifyOptions::server()), Ok(()));
    }

    #[test]
    fn signing_bytes_cover_exactly_the_authenticated_fields() {
        let signer = NaClSigner::generate();
        let payload = Payload::generate(b"hello, world", &[&signer], GenerateOptions::default())
            .expect("generate should succeed");

        let bytes = payload.signing_bytes();
        assert_eq!(bytes.len(), 32 + payload.data.len());
        assert_eq!(&bytes[..8], &1u64.to_be_bytes());
        assert_eq!(&bytes[24..32], &(payload.data.len() as u64).to_be_bytes());
        assert_eq!(&bytes[32..], b"hello, world");

        // Swapping or dropping signatures does not change the transcript.
        let mut stripped = payload.clone();
        stripped.sig_bundles.clear();
        assert_eq!(stripped.signing_bytes(), bytes);
    }

    #[test]
    fn endpoint_is_deterministic_and_order_sensitive() {
        let s1 = NaClSigner::generate();
        let s2 = NaClSigner::generate();
        let opts = GenerateOptions::default();

        let p12 = Payload::generate(b"m", &[&s1, &s2], opts.clone())
            .expect("generate should succeed");
        let p12_again = Payload::generate(b"other", &[&s1, &s2], opts.clone())
            .expect("generate should succeed");
        let p21 =
            Payload::generate(b"m", &[&s2, &s1], opts).expect("generate should succeed");

        assert_eq!(p12.endpoint().len(), ENDPOINT_LENGTH);
        // Endpoint depends only on the keys and their order, not the data.
        assert_eq!(p12.endpoint(), p12_again.endpoint());
        assert_ne!(p12.endpoint(), p21.endpoint());
    }

    #[test]
    fn endpoint_is_url_safe_base64_of_64_bytes() {
        let signer = NaClSigner::generate();
        let payload = Payload::generate(b"addressed", &[&signer], GenerateOptions::default())
            .expect("generate should succeed");
        let endpoint = payload.endpoint();
        assert_eq!(endpoint.len(), ENDPOINT_LENGTH);
        let decoded = URL_SAFE.decode(&endpoint).expect("endpoint should be valid base64");
        assert_eq!(decoded.len(), 64);
        assert_eq!(decoded, payload.pub_key_hash());
    }

    #[test]
    fn multi_signer_payloads_verify_as_a_unit() {
        let s1 = NaClSigner::generate();
        let s2 = NaClSigner::generate();
        let payload = Payload::generate(b"two signers", &[&s1, &s2], GenerateOptions::default())
            .expect("generate should succeed");
        assert_eq!(payload.sig_bundles.len(), 2);
        assert_eq!(payload.verify(&VerifyOptions::server()), Ok(()));

        // Dropping one signature still verifies the rest, but moves the
        // payload to a different endpoint.
        let mut single = payload.clone();
        single.sig_bundles.truncate(1);
        assert_eq!(single.verify(&VerifyOptions::client()), Ok(()));
        assert_ne!(single.endpoint(), payload.endpoint());
    }
}
