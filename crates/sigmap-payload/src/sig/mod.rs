//! Closed signature registry.
//!
//! Two algorithms are supported: Ed25519 in the NaCl `sign` construction
//! and XMSS with the SHA2_10_256 parameter set. The wire tag `0` is
//! reserved so an all-zero bundle never verifies; unknown tags are
//! rejected when a payload is decoded. New algorithms require a new tag
//! here and in the wire codec — there is no runtime registration.

use crate::error::PayloadError;

pub mod nacl_sign;
pub mod xmss;

pub use nacl_sign::NaClSigner;
pub use xmss::XmssSigner;

/// Signature algorithm tag. `0` is reserved for "unset"/invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Alg {
    /// Ed25519 as specified by NaCl `sign`.
    NaClSign,
    /// XMSS with the SHA2_10_256 parameter set.
    Xmss10,
}

impl Alg {
    /// The numeric tag carried on the wire.
    pub fn tag(self) -> u16 {
        match self {
            Alg::NaClSign => 1,
            Alg::Xmss10 => 2,
        }
    }

    /// Expected public key length in bytes.
    pub fn pub_key_len(self) -> usize {
        match self {
            Alg::NaClSign => nacl_sign::PUB_KEY_LEN,
            Alg::Xmss10 => xmss::PUB_KEY_LEN,
        }
    }

    /// Expected signature length in bytes.
    pub fn sig_len(self) -> usize {
        match self {
            Alg::NaClSign => nacl_sign::SIG_LEN,
            Alg::Xmss10 => xmss::SIG_LEN,
        }
    }
}

impl TryFrom<u16> for Alg {
    type Error = u16;

    fn try_from(tag: u16) -> Result<Self, u16> {
        match tag {
            1 => Ok(Alg::NaClSign),
            2 => Ok(Alg::Xmss10),
            other => Err(other),
        }
    }
}

/// An algorithm tag, a public key, and a signature over a payload's
/// signing transcript. Bundles are carried in payload order; that order
/// is what derives the storage endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureBundle {
    pub alg: Alg,
    pub pub_key: Vec<u8>,
    pub sig: Vec<u8>,
}

/// Trait for signing a message into a [`SignatureBundle`].
///
/// Implementations must self-verify the bundle they produce and fail the
/// sign call if it does not round-trip.
pub trait Signer {
    fn sign(&self, message: &[u8]) -> Result<SignatureBundle, PayloadError>;
}

/// Verifies a bundle against a message, dispatching on the bundle's
/// algorithm. Pure and panic-free: malformed key or signature lengths
/// return `false`.
pub fn verify(message: &[u8], bundle: &SignatureBundle) -> bool {
    match bundle.alg {
        Alg::NaClSign => nacl_sign::verify(message, bundle),
        Alg::Xmss10 => xmss::verify(message, bundle),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alg_tags_round_trip() {
        for alg in [Alg::NaClSign, Alg::Xmss10] {
            assert_eq!(Alg::try_from(alg.tag()), Ok(alg));
        }
    }

    #[test]
    fn reserved_and_unknown_tags_are_rejected() {
        assert_eq!(Alg::try_from(0), Err(0));
        assert_eq!(Alg::try_from(3), Err(3));
        assert_eq!(Alg::try_from(u16::MAX), Err(u16::MAX));
    }

    #[test]
    fn registry_dispatches_by_bundle_alg() {
        let signer = NaClSigner::generate();
        let bundle = signer.sign(b"registry message").expect("sign should succeed");
        assert!(verify(b"registry message", &bundle));

        // Same bytes under the wrong algorithm tag must not verify.
        let mut cross = bundle;
        cross.alg = Alg::Xmss10;
        assert!(!verify(b"registry message", &cross));
    }
}
