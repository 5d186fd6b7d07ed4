//! The AES-128 primitives S0 is built from, ported from the teacher's
//! `zwave-core::security::crypto` (ECB/OFB/CBC-MAC helpers). S2-only
//! machinery (CCM, CMAC subkeys, x25519 DER framing, the PRK/network-key
//! KDF chain) has no counterpart here and was left behind; S0 only ever
//! needs single-block ECB, OFB keystreams, and one CBC-MAC.

use aes::cipher::block_padding::ZeroPadding;
use aes::cipher::{BlockEncrypt, BlockEncryptMut, KeyInit, KeyIvInit, StreamCipher};

type Aes128Ofb = ofb::Ofb<aes::Aes128>;
type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;

/// Single-block AES-128-ECB, used only to derive `K_enc`/`K_auth` from the
/// network key (spec §4.E).
pub fn encrypt_aes_ecb(plaintext: &[u8; 16], key: &[u8; 16]) -> [u8; 16] {
    let cipher = aes::Aes128::new(key.into());
    let mut block = (*plaintext).into();
    cipher.encrypt_block(&mut block);
    block.into()
}

/// Applies the AES-128-OFB keystream to `data`. Symmetric: the same call
/// encrypts or decrypts.
pub fn aes_ofb_apply(data: &[u8], key: &[u8; 16], iv: &[u8; 16]) -> Vec<u8> {
    let mut cipher = <Aes128Ofb as KeyIvInit>::new(key.into(), iv.into());
    let mut buf = data.to_vec();
    cipher.apply_keystream(&mut buf);
    buf
}

/// CBC-MAC over `message` under `key` and `iv`, truncated to the first 8
/// bytes of the final ciphertext block (spec §4.E step 5, which MACs over
/// `IV || cmd_byte || src || dst || len(P) || ciphertext` with an all-zero
/// CBC IV of its own).
pub fn compute_mac_iv(message: &[u8], key: &[u8; 16], iv: &[u8; 16]) -> [u8; 8] {
    let cipher = Aes128CbcEnc::new(key.into(), iv.into());
    let buf = cipher.encrypt_padded_vec_mut::<ZeroPadding>(message);
    let mut mac = [0u8; 8];
    mac.copy_from_slice(&buf[buf.len() - 16..][..8]);
    mac
}

/// [`compute_mac_iv`] with the all-zero IV spec §4.E actually calls for.
pub fn compute_mac(message: &[u8], key: &[u8; 16]) -> [u8; 8] {
    compute_mac_iv(message, key, &[0u8; 16])
}

/// Constant-time comparison for the MAC check in spec §4.E step 3 — a
/// timing side-channel here would leak the correct MAC one byte at a time.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod test {
    use super::*;

    fn hex16(s: &str) -> [u8; 16] {
        hex::decode(s).unwrap().try_into().unwrap()
    }

    #[test]
    fn ecb_matches_nist_test_vector() {
        // https://nvlpubs.nist.gov/nistpubs/Legacy/SP/nistspecialpublication800-38a.pdf
        let key = hex16("2b7e151628aed2a6abf7158809cf4f3c");
        let plaintext = hex16("6bc1bee22e409f96e93d7e117393172a");
        let expected = hex16("3ad77bb40d7a3660a89ecaf32466ef97");
        assert_eq!(encrypt_aes_ecb(&plaintext, &key), expected);
    }

    #[test]
    fn ofb_is_its_own_inverse() {
        let key = hex16("2b7e151628aed2a6abf7158809cf4f3c");
        let iv = hex16("000102030405060708090a0b0c0d0e0f");
        let plaintext = hex16("6bc1bee22e409f96e93d7e117393172a");
        let ciphertext = aes_ofb_apply(&plaintext, &key, &iv);
        assert_eq!(aes_ofb_apply(&ciphertext, &key, &iv), plaintext);
    }

    #[test]
    fn mac_iv_matches_known_vector() {
        let key = hex16("2b7e151628aed2a6abf7158809cf4f3c");
        let iv = hex16("000102030405060708090a0b0c0d0e0f");
        let plaintext = hex16("6bc1bee22e409f96e93d7e117393172a");
        let expected = hex::decode("7649abac8119b246").unwrap();
        assert_eq!(compute_mac_iv(&plaintext, &key, &iv), expected.as_slice());
    }

    #[test]
    fn constant_time_eq_rejects_mismatched_bytes() {
        assert!(constant_time_eq(&[1, 2, 3], &[1, 2, 3]));
        assert!(!constant_time_eq(&[1, 2, 3], &[1, 2, 4]));
        assert!(!constant_time_eq(&[1, 2], &[1, 2, 3]));
    }
}
