//! Ed25519 signing in the NaCl `sign` construction.
//!
//! Private keys use the NaCl 64-byte layout (seed followed by the public
//! key); the bundle carries the 32-byte public key and the 64-byte
//! detached signature.

use ed25519_dalek::{
    Signature, Signer as DalekSigner, SigningKey, Verifier as DalekVerifier, VerifyingKey,
};
use rand::rngs::OsRng;

use crate::error::PayloadError;
use crate::sig::{Alg, SignatureBundle, Signer};

/// Ed25519 public key length in bytes.
pub const PUB_KEY_LEN: usize = 32;
/// Ed25519 detached signature length in bytes.
pub const SIG_LEN: usize = 64;
/// NaCl private key length in bytes (seed followed by public key).
pub const PRIVATE_KEY_LEN: usize = 64;

/// Ed25519 signer backed by `ed25519-dalek`.
#[derive(Clone)]
pub struct NaClSigner {
    signing_key: SigningKey,
}

impl NaClSigner {
    /// Generates a signer from a fresh random key.
    pub fn generate() -> Self {
        Self { signing_key: SigningKey::generate(&mut OsRng) }
    }

    /// Creates a signer from a NaCl 64-byte private key (seed || public).
    pub fn from_private_key(private_key: &[u8]) -> Result<Self, PayloadError> {
        if private_key.len() != PRIVATE_KEY_LEN {
            return Err(PayloadError::InvalidKey(format!(
                "expected {} bytes, got {}",
                PRIVATE_KEY_LEN,
                private_key.len()
            )));
        }
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&private_key[..32]);
        let signing_key = SigningKey::from_bytes(&seed);
        if signing_key.verifying_key().to_bytes()[..] != private_key[32..] {
            return Err(PayloadError::InvalidKey(
                "public half does not match the private seed".to_string(),
            ));
        }
        Ok(Self { signing_key })
    }

    /// Returns the private key in the NaCl 64-byte layout.
    pub fn private_key_bytes(&self) -> [u8; PRIVATE_KEY_LEN] {
        let mut out = [0u8; PRIVATE_KEY_LEN];
        out[..32].copy_from_slice(&self.signing_key.to_bytes());
        out[32..].copy_from_slice(&self.signing_key.verifying_key().to_bytes());
        out
    }

    /// Returns the raw 32-byte public key.
    pub fn public_key(&self) -> [u8; PUB_KEY_LEN] {
        self.signing_key.verifying_key().to_bytes()
    }
}

impl Signer for NaClSigner {
    fn sign(&self, message: &[u8]) -> Result<SignatureBundle, PayloadError> {
        let signature = self.signing_key.sign(message);
        let bundle = SignatureBundle {
            alg: Alg::NaClSign,
            pub_key: self.public_key().to_vec(),
            sig: signature.to_bytes().to_vec(),
        };
        if !verify(message, &bundle) {
            return Err(PayloadError::SignFailed(
                "verification sanity check failed on sign".to_string(),
            ));
        }
        Ok(bundle)
    }
}

/// Verifies an Ed25519 bundle. Returns `false` for malformed key or
/// signature lengths rather than erroring.
pub(crate) fn verify(message: &[u8], bundle: &SignatureBundle) -> bool {
    if bundle.pub_key.len() != PUB_KEY_LEN || bundle.sig.len() != SIG_LEN {
        return false;
    }
    let mut pub_key = [0u8; PUB_KEY_LEN];
    pub_key.copy_from_slice(&bundle.pub_key);
    let verifying_key = match VerifyingKey::from_bytes(&pub_key) {
        Ok(k) => k,
        Err(_) => return false,
    };
    let mut sig = [0u8; SIG_LEN];
    sig.copy_from_slice(&bundle.sig);
    verifying_key.verify(message, &Signature::from_bytes(&sig)).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_round_trip() {
        let signer = NaClSigner::generate();
        let bundle = signer.sign(b"sigmap payload").expect("sign should succeed");
        assert_eq!(bundle.alg, Alg::NaClSign);
        assert_eq!(bundle.pub_key.len(), PUB_KEY_LEN);
        assert_eq!(bundle.sig.len(), SIG_LEN);
        assert!(verify(b"sigmap payload", &bundle));
    }

    #[test]
    fn verify_fails_when_message_changes() {
        let signer = NaClSigner::generate();
        let bundle = signer.sign(b"original").expect("sign should succeed");
        assert!(!verify(b"tampered", &bundle));
    }

    #[test]
    fn verify_fails_when_signature_changes() {
        let signer = NaClSigner::generate();
        let mut bundle = signer.sign(b"message").expect("sign should succeed");
        bundle.sig[0] ^= 0x01;
        assert!(!verify(b"message", &bundle));
    }

    #[test]
    fn verify_rejects_malformed_lengths() {
        let signer = NaClSigner::generate();
        let good = signer.sign(b"message").expect("sign should succeed");

        let mut short_pub = good.clone();
        short_pub.pub_key.truncate(31);
        assert!(!verify(b"message", &short_pub));

        let mut long_sig = good;
        long_sig.sig.push(0);
        assert!(!verify(b"message", &long_sig));
    }

    #[test]
    fn private_key_round_trips_through_nacl_layout() {
        let signer = NaClSigner::generate();
        let restored = NaClSigner::from_private_key(&signer.private_key_bytes())
            .expect("restore should succeed");
        assert_eq!(restored.public_key(), signer.public_key());

        let bundle = restored.sign(b"restored key").expect("sign should succeed");
        assert!(verify(b"restored key", &bundle));
    }

    #[test]
    fn from_private_key_rejects_bad_input() {
        assert!(NaClSigner::from_private_key(&[0u8; 63]).is_err());

        // Mismatched public half is refused.
        let mut key = NaClSigner::generate().private_key_bytes();
        key[40] ^= 0xff;
        assert!(NaClSigner::from_private_key(&key).is_err());
    }
}
