use thiserror::Error;

/// Errors produced while decoding, validating, or verifying a payload.
///
/// Every check in the pipeline fails with its own kind so the server can
/// log the precise cause while collapsing the external response.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PayloadError {
    // ===== Decode errors =====
    #[error("truncated or malformed payload frame: {0}")]
    Decode(String),

    #[error("payload encoding failed: {0}")]
    Encode(String),

    #[error("asserted data length {asserted} does not match actual length {actual}")]
    LengthMismatch { asserted: u32, actual: usize },

    #[error("timestamp is not representable as signed 64-bit nanoseconds")]
    TimestampOutOfRange,

    #[error("ttl is not representable as a non-negative 64-bit nanosecond duration")]
    TtlOutOfRange,

    #[error("unknown signature algorithm tag {0}")]
    UnknownAlgorithm(u16),

    // ===== Validation errors =====
    #[error("encoded payload exceeds the maximum payload size")]
    PayloadTooLarge,

    #[error("data exceeds the maximum data size")]
    DataTooLarge,

    #[error("unsupported payload version {0}")]
    UnsupportedVersion(u16),

    #[error("payload ttl is expired")]
    Expired,

    #[error("payload ttl is outside the allowed bounds")]
    TtlOutOfBounds,

    #[error("payload timestamp is too far in the future")]
    TimestampInFuture,

    #[error("timestamp is outside of the submit window")]
    OutsideSubmitWindow,

    #[error("endpoint does not match the payload public keys")]
    EndpointMismatch,

    // ===== Verification errors =====
    #[error("invalid public key length for signature algorithm")]
    PubKeyLengthInvalid,

    #[error("failed signature verification")]
    SignatureInvalid,

    #[error("payload carries more signatures than allowed")]
    TooManySignatures,

    #[error("payload must carry at least one signature")]
    NoSignatures,

    #[error("signing failed: {0}")]
    SignFailed(String),

    #[error("invalid private key: {0}")]
    InvalidKey(String),
}
