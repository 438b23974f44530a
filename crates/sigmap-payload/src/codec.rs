//! Wire codec for payloads.
//!
//! The wire framing is MessagePack with named fields; what the record
//! carries is fixed: version, timestamp and ttl as signed 64-bit
//! nanoseconds, the signature bundles (tag, public key, signature), an
//! explicit data length, and the data itself. The asserted length must
//! match the data, durations must be non-negative, and unknown
//! algorithm tags are refused here rather than at verification time.
//! The signing transcript is *not* this encoding; see
//! [`Payload::signing_bytes`](crate::Payload::signing_bytes).

use chrono::DateTime;
use serde::{Deserialize, Serialize};

use crate::error::PayloadError;
use crate::sig::{Alg, SignatureBundle};
use crate::{Payload, MAX_PAYLOAD_SIZE};

#[derive(Serialize, Deserialize)]
struct WireSigBundle {
    alg: u16,
    #[serde(rename = "pub", with = "serde_bytes")]
    pub_key: Vec<u8>,
    #[serde(with = "serde_bytes")]
    sig: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct WirePayload {
    version: u16,
    timestamp: i64,
    ttl: i64,
    sig_bundles: Vec<WireSigBundle>,
    len: u32,
    #[serde(with = "serde_bytes")]
    data: Vec<u8>,
}

pub(crate) fn encode(payload: &Payload) -> Result<Vec<u8>, PayloadError> {
    let timestamp =
        payload.timestamp.timestamp_nanos_opt().ok_or(PayloadError::TimestampOutOfRange)?;
    let ttl = i64::try_from(payload.ttl.as_nanos()).map_err(|_| PayloadError::TtlOutOfRange)?;
    let len = u32::try_from(payload.data.len())
        .map_err(|_| PayloadError::Encode("data length exceeds wire range".to_string()))?;

    let sig_bundles = payload
        .sig_bundles
        .iter()
        .map(|b| WireSigBundle { alg: b.alg.tag(), pub_key: b.pub_key.clone(), sig: b.sig.clone() })
        .collect();

    let wire = WirePayload {
        version: payload.version,
        timestamp,
        ttl,
        sig_bundles,
        len,
        data: payload.data.clone(),
    };
    rmp_serde::to_vec_named(&wire).map_err(|e| PayloadError::Encode(e.to_string()))
}

pub(crate) fn decode(bytes: &[u8]) -> Result<Payload, PayloadError> {
    if bytes.len() > MAX_PAYLOAD_SIZE {
        return Err(PayloadError::PayloadTooLarge);
    }
    let wire: WirePayload =
        rmp_serde::from_slice(bytes).map_err(|e| PayloadError::Decode(e.to_string()))?;

    if wire.len as usize != wire.data.len() {
        return Err(PayloadError::LengthMismatch {
            asserted: wire.len,
            actual: wire.data.len(),
        });
    }
    if wire.ttl < 0 {
        return Err(PayloadError::TtlOutOfRange);
    }

    let sig_bundles = wire
        .sig_bundles
        .into_iter()
        .map(|b| {
            Ok(SignatureBundle {
                alg: Alg::try_from(b.alg).map_err(PayloadError::UnknownAlgorithm)?,
                pub_key: b.pub_key,
                sig: b.sig,
            })
        })
        .collect::<Result<Vec<_>, PayloadError>>()?;

    Ok(Payload {
        version: wire.version,
        timestamp: DateTime::from_timestamp_nanos(wire.timestamp),
        ttl: std::time::Duration::from_nanos(wire.ttl as u64),
        sig_bundles,
        data: wire.data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sig::NaClSigner;
    use crate::{GenerateOptions, V1};
    use chrono::Utc;
    use std::time::Duration;

    fn sample_payload() -> Payload {
        let signer = NaClSigner::generate();
        Payload::generate(b"codec round trip", &[&signer], GenerateOptions::default())
            .expect("generate should succeed")
    }

    #[test]
    fn encode_decode_round_trip() {
        let payload = sample_payload();
        let encoded = payload.encode().expect("encode should succeed");
        let decoded = Payload::decode(&encoded).expect("decode should succeed");
        assert_eq!(decoded, payload);

        // Byte-stable on re-encode.
        assert_eq!(decoded.encode().expect("encode should succeed"), encoded);
    }

    #[test]
    fn decode_rejects_truncated_frame() {
        let encoded = sample_payload().encode().expect("encode should succeed");
        let err = Payload::decode(&encoded[..encoded.len() / 2])
            .expect_err("truncated frame should fail");
        assert!(matches!(err, PayloadError::Decode(_)));
    }

    #[test]
    fn decode_rejects_length_mismatch() {
        let wire = WirePayload {
            version: V1,
            timestamp: Utc::now().timestamp_nanos_opt().expect("in range"),
            ttl: 1_000_000_000,
            sig_bundles: vec![],
            len: 3,
            data: b"four".to_vec(),
        };
        let bytes = rmp_serde::to_vec_named(&wire).expect("encode should succeed");
        let err = Payload::decode(&bytes).expect_err("length mismatch should fail");
        assert_eq!(err, PayloadError::LengthMismatch { asserted: 3, actual: 4 });
    }

    #[test]
    fn decode_rejects_negative_ttl() {
        let wire = WirePayload {
            version: V1,
            timestamp: 0,
            ttl: -1,
            sig_bundles: vec![],
            len: 0,
            data: vec![],
        };
        let bytes = rmp_serde::to_vec_named(&wire).expect("encode should succeed");
        assert_eq!(Payload::decode(&bytes), Err(PayloadError::TtlOutOfRange));
    }

    #[test]
    fn decode_rejects_unknown_and_reserved_alg_tags() {
        for tag in [0u16, 9u16] {
            let wire = WirePayload {
                version: V1,
                timestamp: 0,
                ttl: 0,
                sig_bundles: vec![WireSigBundle {
                    alg: tag,
                    pub_key: vec![0u8; 32],
                    sig: vec![0u8; 64],
                }],
                len: 0,
                data: vec![],
            };
            let bytes = rmp_serde::to_vec_named(&wire).expect("encode should succeed");
            assert_eq!(Payload::decode(&bytes), Err(PayloadError::UnknownAlgorithm(tag)));
        }
    }

    #[test]
    fn decode_rejects_oversized_input_before_parsing() {
        let bytes = vec![0u8; MAX_PAYLOAD_SIZE + 1];
        assert_eq!(Payload::decode(&bytes), Err(PayloadError::PayloadTooLarge));
    }

    #[test]
    fn encode_rejects_ttl_beyond_signed_nanos() {
        let mut payload = sample_payload();
        payload.ttl = Duration::from_secs(u64::MAX / 2);
        assert_eq!(payload.encode(), Err(PayloadError::TtlOutOfRange));
    }
}
