//! XMSS with the SHA2_10_256 parameter set (RFC 8391).
//!
//! A 10-level Merkle tree over 1024 WOTS+ one-time keys. The public key
//! is the tree root followed by the public seed (64 bytes); a signature
//! is `idx(4) || r(32) || wots(2144) || auth(320)` = 2500 bytes, the
//! same layout the original NaCl-era deployments used. Signing is
//! stateful: each sign consumes one leaf index, and a key is exhausted
//! after 2^10 signatures.

use std::sync::Mutex;

use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::PayloadError;
use crate::sig::{Alg, SignatureBundle, Signer};

mod wots;

const N: usize = 32;
const W: u32 = 16;
const LEN1: usize = 64;
const LEN2: usize = 3;
const LEN: usize = 67;
const H: usize = 10;
const LEAVES: u32 = 1 << H;

/// XMSS public key length in bytes (root || public seed).
pub const PUB_KEY_LEN: usize = 64;
/// XMSS signature length in bytes.
pub const SIG_LEN: usize = 4 + N + LEN * N + H * N;
/// Serialized private key length (idx || sk_seed || sk_prf || pub_seed || root).
pub const PRIVATE_KEY_LEN: usize = 4 + 4 * N;

// ---------------------------------------------------------------------------
// Keyed hash functions (RFC 8391 §5.1): a 32-byte domain separator is
// prepended before the key and message.
// ---------------------------------------------------------------------------

fn to_byte32(x: u64) -> [u8; N] {
    let mut out = [0u8; N];
    out[N - 8..].copy_from_slice(&x.to_be_bytes());
    out
}

fn keyed_hash(domain: u8, key: &[u8], msg: &[u8]) -> [u8; N] {
    let mut hasher = Sha256::new();
    hasher.update(to_byte32(u64::from(domain)));
    hasher.update(key);
    hasher.update(msg);
    hasher.finalize().into()
}

fn hash_f(key: &[u8; N], msg: &[u8; N]) -> [u8; N] {
    keyed_hash(0, key, msg)
}

fn hash_h(key: &[u8; N], left: &[u8; N], right: &[u8; N]) -> [u8; N] {
    let mut msg = [0u8; 2 * N];
    msg[..N].copy_from_slice(left);
    msg[N..].copy_from_slice(right);
    keyed_hash(1, key, &msg)
}

fn h_msg(r: &[u8; N], root: &[u8; N], idx: u32, message: &[u8]) -> [u8; N] {
    let mut key = [0u8; 3 * N];
    key[..N].copy_from_slice(r);
    key[N..2 * N].copy_from_slice(root);
    key[2 * N..].copy_from_slice(&to_byte32(u64::from(idx)));
    keyed_hash(2, &key, message)
}

fn prf(key: &[u8; N], msg: &[u8; N]) -> [u8; N] {
    keyed_hash(3, key, msg)
}

// ---------------------------------------------------------------------------
// Hash addresses (RFC 8391 §2.5): 8 big-endian words. Word 3 is the
// address type (0 = OTS, 1 = L-tree, 2 = hash tree); the layer and tree
// words stay zero for a single-tree scheme.
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Default)]
struct Adrs([u32; 8]);

impl Adrs {
    fn with_type(addr_type: u32) -> Self {
        let mut adrs = Self::default();
        adrs.0[3] = addr_type;
        adrs
    }

    fn set_ots_address(&mut self, v: u32) {
        self.0[4] = v;
    }

    fn set_ltree_address(&mut self, v: u32) {
        self.0[4] = v;
    }

    fn set_chain_address(&mut self, v: u32) {
        self.0[5] = v;
    }

    fn set_tree_height(&mut self, v: u32) {
        self.0[5] = v;
    }

    fn set_hash_address(&mut self, v: u32) {
        self.0[6] = v;
    }

    fn set_tree_index(&mut self, v: u32) {
        self.0[6] = v;
    }

    fn set_key_and_mask(&mut self, v: u32) {
        self.0[7] = v;
    }

    fn to_bytes(self) -> [u8; N] {
        let mut out = [0u8; N];
        for (chunk, word) in out.chunks_exact_mut(4).zip(self.0.iter()) {
            chunk.copy_from_slice(&word.to_be_bytes());
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Tree construction
// ---------------------------------------------------------------------------

/// Keyed, masked two-to-one compression (RFC 8391 Algorithm 7).
fn rand_hash(left: &[u8; N], right: &[u8; N], pub_seed: &[u8; N], adrs: &mut Adrs) -> [u8; N] {
    adrs.set_key_and_mask(0);
    let key = prf(pub_seed, &adrs.to_bytes());
    adrs.set_key_and_mask(1);
    let bm0 = prf(pub_seed, &adrs.to_bytes());
    adrs.set_key_and_mask(2);
    let bm1 = prf(pub_seed, &adrs.to_bytes());

    let mut l = [0u8; N];
    let mut r = [0u8; N];
    for i in 0..N {
        l[i] = left[i] ^ bm0[i];
        r[i] = right[i] ^ bm1[i];
    }
    hash_h(&key, &l, &r)
}

/// Compresses a WOTS+ public key into a single leaf value (Algorithm 8).
fn ltree(mut pk: Vec<[u8; N]>, pub_seed: &[u8; N], adrs: &mut Adrs) -> [u8; N] {
    let mut l = pk.len();
    let mut height = 0u32;
    adrs.set_tree_height(0);
    while l > 1 {
        for i in 0..l / 2 {
            adrs.set_tree_index(i as u32);
            let (left, right) = (pk[2 * i], pk[2 * i + 1]);
            pk[i] = rand_hash(&left, &right, pub_seed, adrs);
        }
        if l % 2 == 1 {
            pk[l / 2] = pk[l - 1];
        }
        l = l.div_ceil(2);
        height += 1;
        adrs.set_tree_height(height);
    }
    pk[0]
}

/// Per-leaf seed from the main secret seed, domain-separated by the OTS
/// address so every leaf gets an independent WOTS+ key.
fn leaf_seed(sk_seed: &[u8; N], leaf_idx: u32) -> [u8; N] {
    let mut adrs = Adrs::with_type(0);
    adrs.set_ots_address(leaf_idx);
    prf(sk_seed, &adrs.to_bytes())
}

fn leaf(sk_seed: &[u8; N], pub_seed: &[u8; N], leaf_idx: u32) -> [u8; N] {
    let seed = leaf_seed(sk_seed, leaf_idx);
    let mut ots_adrs = Adrs::with_type(0);
    ots_adrs.set_ots_address(leaf_idx);
    let pk = wots::pk_gen(&seed, pub_seed, &mut ots_adrs);

    let mut ltree_adrs = Adrs::with_type(1);
    ltree_adrs.set_ltree_address(leaf_idx);
    ltree(pk, pub_seed, &mut ltree_adrs)
}

/// All tree levels, leaves first. `levels[H][0]` is the root. Kept in
/// the private state so authentication paths are O(H) per sign instead
/// of a full tree recomputation.
fn build_tree(sk_seed: &[u8; N], pub_seed: &[u8; N]) -> Vec<Vec<[u8; N]>> {
    let mut levels: Vec<Vec<[u8; N]>> = Vec::with_capacity(H + 1);
    levels.push((0..LEAVES).map(|i| leaf(sk_seed, pub_seed, i)).collect());
    for height in 0..H {
        let below = &levels[height];
        let mut adrs = Adrs::with_type(2);
        adrs.set_tree_height(height as u32);
        let mut level = Vec::with_capacity(below.len() / 2);
        for i in 0..below.len() / 2 {
            adrs.set_tree_index(i as u32);
            level.push(rand_hash(&below[2 * i], &below[2 * i + 1], pub_seed, &mut adrs));
        }
        levels.push(level);
    }
    levels
}

// ---------------------------------------------------------------------------
// Key state and signing
// ---------------------------------------------------------------------------

struct XmssPrivateKey {
    idx: u32,
    sk_seed: [u8; N],
    sk_prf: [u8; N],
    pub_seed: [u8; N],
    root: [u8; N],
    tree: Vec<Vec<[u8; N]>>,
}

impl XmssPrivateKey {
    fn generate() -> Self {
        let mut sk_seed = [0u8; N];
        let mut sk_prf = [0u8; N];
        let mut pub_seed = [0u8; N];
        OsRng.fill_bytes(&mut sk_seed);
        OsRng.fill_bytes(&mut sk_prf);
        OsRng.fill_bytes(&mut pub_seed);
        Self::from_seeds(0, sk_seed, sk_prf, pub_seed)
    }

    fn from_seeds(idx: u32, sk_seed: [u8; N], sk_prf: [u8; N], pub_seed: [u8; N]) -> Self {
        let tree = build_tree(&sk_seed, &pub_seed);
        let root = tree[H][0];
        Self { idx, sk_seed, sk_prf, pub_seed, root, tree }
    }

    fn auth_path(&self, idx: u32) -> Vec<[u8; N]> {
        (0..H).map(|height| self.tree[height][((idx >> height) ^ 1) as usize]).collect()
    }

    fn sign(&mut self, message: &[u8]) -> Result<Vec<u8>, PayloadError> {
        if self.idx >= LEAVES {
            return Err(PayloadError::SignFailed(
                "xmss one-time key indices exhausted".to_string(),
            ));
        }
        let idx = self.idx;
        let r = prf(&self.sk_prf, &to_byte32(u64::from(idx)));
        let digest = h_msg(&r, &self.root, idx, message);

        let mut ots_adrs = Adrs::with_type(0);
        ots_adrs.set_ots_address(idx);
        let seed = leaf_seed(&self.sk_seed, idx);
        let wots_sig = wots::sign(&digest, &seed, &self.pub_seed, &mut ots_adrs);

        let mut sig = Vec::with_capacity(SIG_LEN);
        sig.extend_from_slice(&idx.to_be_bytes());
        sig.extend_from_slice(&r);
        for chunk in &wots_sig {
            sig.extend_from_slice(chunk);
        }
        for node in self.auth_path(idx) {
            sig.extend_from_slice(&node);
        }

        // The index advances before the signature leaves this call: the
        // same leaf must never sign twice.
        self.idx = idx + 1;
        Ok(sig)
    }
}

/// Stateful XMSS signer. The private state lives behind a mutex so a
/// shared signer cannot consume the same one-time index twice; the lock
/// is held for the whole sign call.
pub struct XmssSigner {
    state: Mutex<XmssPrivateKey>,
}

impl XmssSigner {
    /// Generates a signer with a fresh random key. Builds the full
    /// Merkle tree, which costs on the order of a million compression
    /// calls.
    pub fn generate() -> Self {
        Self { state: Mutex::new(XmssPrivateKey::generate()) }
    }

    /// Restores a signer from the 132-byte serialized private key. The
    /// tree is recomputed from the seeds; a stored root that does not
    /// match the recomputed one is refused.
    pub fn from_private_key(private_key: &[u8]) -> Result<Self, PayloadError> {
        if private_key.len() != PRIVATE_KEY_LEN {
            return Err(PayloadError::InvalidKey(format!(
                "expected {} bytes, got {}",
                PRIVATE_KEY_LEN,
                private_key.len()
            )));
        }
        let idx = u32::from_be_bytes([private_key[0], private_key[1], private_key[2], private_key[3]]);
        if idx > LEAVES {
            return Err(PayloadError::InvalidKey("leaf index out of range".to_string()));
        }
        let mut sk_seed = [0u8; N];
        let mut sk_prf = [0u8; N];
        let mut pub_seed = [0u8; N];
        sk_seed.copy_from_slice(&private_key[4..4 + N]);
        sk_prf.copy_from_slice(&private_key[4 + N..4 + 2 * N]);
        pub_seed.copy_from_slice(&private_key[4 + 2 * N..4 + 3 * N]);

        let state = XmssPrivateKey::from_seeds(idx, sk_seed, sk_prf, pub_seed);
        if state.root[..] != private_key[4 + 3 * N..] {
            return Err(PayloadError::InvalidKey(
                "stored root does not match the recomputed tree".to_string(),
            ));
        }
        Ok(Self { state: Mutex::new(state) })
    }

    /// Serializes the private key with its current index, so persisting
    /// the returned bytes persists the one-time counter with the key
    /// material.
    pub fn private_key_bytes(&self) -> [u8; PRIVATE_KEY_LEN] {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut out = [0u8; PRIVATE_KEY_LEN];
        out[..4].copy_from_slice(&state.idx.to_be_bytes());
        out[4..4 + N].copy_from_slice(&state.sk_seed);
        out[4 + N..4 + 2 * N].copy_from_slice(&state.sk_prf);
        out[4 + 2 * N..4 + 3 * N].copy_from_slice(&state.pub_seed);
        out[4 + 3 * N..].copy_from_slice(&state.root);
        out
    }

    /// Returns the 64-byte public key (root || public seed).
    pub fn public_key(&self) -> [u8; PUB_KEY_LEN] {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut out = [0u8; PUB_KEY_LEN];
        out[..N].copy_from_slice(&state.root);
        out[N..].copy_from_slice(&state.pub_seed);
        out
    }

    /// One-time signatures left before the key is exhausted.
    pub fn remaining_signatures(&self) -> u32 {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        LEAVES - state.idx
    }
}

impl Signer for XmssSigner {
    fn sign(&self, message: &[u8]) -> Result<SignatureBundle, PayloadError> {
        let sig = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.sign(message)?
        };
        let bundle =
            SignatureBundle { alg: Alg::Xmss10, pub_key: self.public_key().to_vec(), sig };
        if !verify(message, &bundle) {
            return Err(PayloadError::SignFailed(
                "verification sanity check failed on sign".to_string(),
            ));
        }
        Ok(bundle)
    }
}

/// Verifies an XMSS bundle by recovering the WOTS+ public key from the
/// signature, compressing it to a leaf, and climbing the authentication
/// path to the root. Malformed lengths return `false`.
pub(crate) fn verify(message: &[u8], bundle: &SignatureBundle) -> bool {
    if bundle.pub_key.len() != PUB_KEY_LEN || bundle.sig.len() != SIG_LEN {
        return false;
    }
    let mut root = [0u8; N];
    let mut pub_seed = [0u8; N];
    root.copy_from_slice(&bundle.pub_key[..N]);
    pub_seed.copy_from_slice(&bundle.pub_key[N..]);

    let sig = &bundle.sig;
    let idx = u32::from_be_bytes([sig[0], sig[1], sig[2], sig[3]]);
    if idx >= LEAVES {
        return false;
    }
    let mut r = [0u8; N];
    r.copy_from_slice(&sig[4..4 + N]);
    let wots_sig: Vec<[u8; N]> = sig[4 + N..4 + N + LEN * N]
        .chunks_exact(N)
        .map(|c| {
            let mut chunk = [0u8; N];
            chunk.copy_from_slice(c);
            chunk
        })
        .collect();
    let auth: Vec<[u8; N]> = sig[4 + N + LEN * N..]
        .chunks_exact(N)
        .map(|c| {
            let mut chunk = [0u8; N];
            chunk.copy_from_slice(c);
            chunk
        })
        .collect();

    let digest = h_msg(&r, &root, idx, message);

    let mut ots_adrs = Adrs::with_type(0);
    ots_adrs.set_ots_address(idx);
    let pk = wots::pk_from_sig(&wots_sig, &digest, &pub_seed, &mut ots_adrs);

    let mut ltree_adrs = Adrs::with_type(1);
    ltree_adrs.set_ltree_address(idx);
    let mut node = ltree(pk, &pub_seed, &mut ltree_adrs);

    let mut tree_adrs = Adrs::with_type(2);
    for (height, sibling) in auth.iter().enumerate() {
        tree_adrs.set_tree_height(height as u32);
        tree_adrs.set_tree_index(idx >> (height + 1));
        node = if (idx >> height) & 1 == 0 {
            rand_hash(&node, sibling, &pub_seed, &mut tree_adrs)
        } else {
            rand_hash(sibling, &node, &pub_seed, &mut tree_adrs)
        };
    }
    node == root
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_rejects_malformed_lengths() {
        let bundle =
            SignatureBundle { alg: Alg::Xmss10, pub_key: vec![0u8; 63], sig: vec![0u8; SIG_LEN] };
        assert!(!verify(b"msg", &bundle));

        let bundle = SignatureBundle {
            alg: Alg::Xmss10,
            pub_key: vec![0u8; PUB_KEY_LEN],
            sig: vec![0u8; SIG_LEN - 1],
        };
        assert!(!verify(b"msg", &bundle));
    }

    #[test]
    fn verify_rejects_out_of_range_index() {
        let mut sig = vec![0u8; SIG_LEN];
        sig[..4].copy_from_slice(&LEAVES.to_be_bytes());
        let bundle = SignatureBundle { alg: Alg::Xmss10, pub_key: vec![0u8; PUB_KEY_LEN], sig };
        assert!(!verify(b"msg", &bundle));
    }

    #[test]
    fn verify_rejects_garbage_signature() {
        let bundle = SignatureBundle {
            alg: Alg::Xmss10,
            pub_key: vec![0x42u8; PUB_KEY_LEN],
            sig: vec![0x42u8; SIG_LEN],
        };
        assert!(!verify(b"msg", &bundle));
    }

    // The tests below generate a full 10-level tree (~10^6 compression
    // calls), too slow for debug builds. Run with:
    // cargo test -p sigmap-payload --release -- --ignored
    #[test]
    #[ignore]
    fn sign_and_verify_round_trip() {
        let signer = XmssSigner::generate();
        let bundle = signer.sign(b"stateful signature").expect("sign should succeed");
        assert_eq!(bundle.pub_key.len(), PUB_KEY_LEN);
        assert_eq!(bundle.sig.len(), SIG_LEN);
        assert!(verify(b"stateful signature", &bundle));
        assert!(!verify(b"another message", &bundle));
    }

    #[test]
    #[ignore]
    fn consecutive_signs_advance_the_index() {
        let signer = XmssSigner::generate();
        let first = signer.sign(b"same message").expect("sign should succeed");
        let second = signer.sign(b"same message").expect("sign should succeed");
        assert_ne!(first.sig, second.sig);
        assert_eq!(&first.sig[..4], &0u32.to_be_bytes());
        assert_eq!(&second.sig[..4], &1u32.to_be_bytes());
        assert!(verify(b"same message", &first));
        assert!(verify(b"same message", &second));
    }

    #[test]
    #[ignore]
    fn private_key_round_trips_with_its_counter() {
        let signer = XmssSigner::generate();
        signer.sign(b"consume one index").expect("sign should succeed");

        let restored = XmssSigner::from_private_key(&signer.private_key_bytes())
            .expect("restore should succeed");
        assert_eq!(restored.public_key(), signer.public_key());
        assert_eq!(restored.remaining_signatures(), LEAVES - 1);

        let bundle = restored.sign(b"post-restore").expect("sign should succeed");
        assert_eq!(&bundle.sig[..4], &1u32.to_be_bytes());
        assert!(verify(b"post-restore", &bundle));
    }
}
