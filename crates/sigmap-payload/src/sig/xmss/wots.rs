//! WOTS+ one-time signatures (RFC 8391 §3) over SHA-256, w = 16.

use super::{hash_f, prf, to_byte32, Adrs, LEN, LEN1, LEN2, N, W};

/// Derives the i-th chain start secret for a leaf from its seed.
fn chain_sk(leaf_seed: &[u8; N], i: usize) -> [u8; N] {
    prf(leaf_seed, &to_byte32(i as u64))
}

/// Iterates the chaining function `steps` times starting at position
/// `start`, keyed and masked per chain position from the public seed.
fn chain(
    mut x: [u8; N],
    start: u32,
    steps: u32,
    pub_seed: &[u8; N],
    adrs: &mut Adrs,
) -> [u8; N] {
    for i in start..start + steps {
        adrs.set_hash_address(i);
        adrs.set_key_and_mask(0);
        let key = prf(pub_seed, &adrs.to_bytes());
        adrs.set_key_and_mask(1);
        let bitmask = prf(pub_seed, &adrs.to_bytes());
        let mut masked = [0u8; N];
        for (m, (&a, &b)) in masked.iter_mut().zip(x.iter().zip(bitmask.iter())) {
            *m = a ^ b;
        }
        x = hash_f(&key, &masked);
    }
    x
}

/// Splits `input` into base-w (4-bit) digits, most significant first.
fn base_w(input: &[u8], out_len: usize) -> Vec<u32> {
    let mut out = Vec::with_capacity(out_len);
    for &byte in input {
        if out.len() == out_len {
            break;
        }
        out.push(u32::from(byte >> 4));
        if out.len() == out_len {
            break;
        }
        out.push(u32::from(byte & 0x0f));
    }
    out
}

/// Message digits plus the WOTS+ checksum digits.
fn msg_digits(digest: &[u8; N]) -> Vec<u32> {
    let mut digits = base_w(digest, LEN1);
    let mut csum: u32 = digits.iter().map(|&d| W - 1 - d).sum();
    // Left-shift so the checksum occupies the top bits of its byte string.
    csum <<= 4;
    let csum_bytes = [(csum >> 8) as u8, csum as u8];
    digits.extend(base_w(&csum_bytes, LEN2));
    digits
}

/// Signs a message digest, producing `LEN` chain values.
pub(super) fn sign(
    digest: &[u8; N],
    leaf_seed: &[u8; N],
    pub_seed: &[u8; N],
    adrs: &mut Adrs,
) -> Vec<[u8; N]> {
    msg_digits(digest)
        .iter()
        .enumerate()
        .map(|(i, &d)| {
            adrs.set_chain_address(i as u32);
            chain(chain_sk(leaf_seed, i), 0, d, pub_seed, adrs)
        })
        .collect()
}

/// Computes the WOTS+ public key directly from a leaf seed.
pub(super) fn pk_gen(leaf_seed: &[u8; N], pub_seed: &[u8; N], adrs: &mut Adrs) -> Vec<[u8; N]> {
    (0..LEN)
        .map(|i| {
            adrs.set_chain_address(i as u32);
            chain(chain_sk(leaf_seed, i), 0, W - 1, pub_seed, adrs)
        })
        .collect()
}

/// Recovers the WOTS+ public key from a signature and message digest.
/// A valid signature yields the same key as [`pk_gen`].
pub(super) fn pk_from_sig(
    sig: &[[u8; N]],
    digest: &[u8; N],
    pub_seed: &[u8; N],
    adrs: &mut Adrs,
) -> Vec<[u8; N]> {
    msg_digits(digest)
        .iter()
        .enumerate()
        .map(|(i, &d)| {
            adrs.set_chain_address(i as u32);
            chain(sig[i], d, W - 1 - d, pub_seed, adrs)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pk_from_sig_matches_pk_gen() {
        let leaf_seed = [0x11u8; N];
        let pub_seed = [0x22u8; N];
        let digest = [0x5au8; N];

        let mut adrs = Adrs::with_type(0);
        adrs.set_ots_address(7);
        let (mut a1, mut a2, mut a3) = (adrs, adrs, adrs);
        let pk = pk_gen(&leaf_seed, &pub_seed, &mut a1);
        let sig = sign(&digest, &leaf_seed, &pub_seed, &mut a2);
        let recovered = pk_from_sig(&sig, &digest, &pub_seed, &mut a3);

        assert_eq!(pk, recovered);
    }

    #[test]
    fn pk_from_sig_diverges_for_wrong_digest() {
        let leaf_seed = [0x11u8; N];
        let pub_seed = [0x22u8; N];
        let digest = [0x5au8; N];
        let mut wrong = digest;
        wrong[0] ^= 0x01;

        let adrs = Adrs::with_type(0);
        let (mut a1, mut a2, mut a3) = (adrs, adrs, adrs);
        let pk = pk_gen(&leaf_seed, &pub_seed, &mut a1);
        let sig = sign(&digest, &leaf_seed, &pub_seed, &mut a2);
        let recovered = pk_from_sig(&sig, &wrong, &pub_seed, &mut a3);

        assert_ne!(pk, recovered);
    }

    #[test]
    fn digit_expansion_is_checksummed() {
        let digits = msg_digits(&[0u8; N]);
        assert_eq!(digits.len(), LEN);
        // All-zero digest: 64 zero digits, checksum 64 * 15 = 960 = 0x3c0,
        // shifted left by four -> 0x3c00 -> digits [3, 12, 0].
        assert!(digits[..LEN1].iter().all(|&d| d == 0));
        assert_eq!(&digits[LEN1..], &[3, 12, 0]);
    }
}
