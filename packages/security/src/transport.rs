//! S0 transport encryption (spec §4.E). This module owns only the crypto
//! and the nonce bookkeeping; obtaining a fresh receiver-nonce via the
//! Nonce-Get/Nonce-Report SendData round trip is the gateway's job (it
//! owns the SHMP dispatcher), so [`S0Transport::encrypt`] takes the
//! already-obtained receiver-nonce as a parameter instead of performing
//! any I/O itself.

use crate::crypto::{aes_ofb_apply, compute_mac_iv, constant_time_eq, encrypt_aes_ecb};
use crate::error::{Error, Result};
use crate::nonce::{NonceBlacklist, NonceStore};

const MAC_LEN: usize = 8;
const IV_LEN: usize = 16;
const NONCE_HALF_LEN: usize = 8;

/// `K_enc`/`K_auth`, derived once from the network key (spec §4.E).
pub struct S0Keys {
    pub k_enc: [u8; 16],
    pub k_auth: [u8; 16],
}

impl S0Keys {
    /// `K_enc = AES_ECB(K_net, 0x55^16)`, `K_auth = AES_ECB(K_net, 0xAA^16)`.
    pub fn derive(network_key: &[u8; 16]) -> Self {
        Self {
            k_enc: encrypt_aes_ecb(&[0x55; 16], network_key),
            k_auth: encrypt_aes_ecb(&[0xaa; 16], network_key),
        }
    }
}

/// Ties the derived keys to the nonce table and blacklist that guard
/// against replay. One instance per network key — spec §6 names a single
/// `network_key` per gateway.
pub struct S0Transport {
    keys: S0Keys,
    nonces: NonceStore,
    blacklist: NonceBlacklist,
}

fn mac_input(iv: &[u8; 16], cmd_byte: u8, src: u8, dst: u8, plaintext_len: u8, body: &[u8]) -> Vec<u8> {
    let mut input = Vec::with_capacity(IV_LEN + 4 + body.len());
    input.extend_from_slice(iv);
    input.push(cmd_byte);
    input.push(src);
    input.push(dst);
    input.push(plaintext_len);
    input.extend_from_slice(body);
    input
}

impl S0Transport {
    pub fn new(network_key: &[u8; 16]) -> Self {
        Self {
            keys: S0Keys::derive(network_key),
            nonces: NonceStore::new(),
            blacklist: NonceBlacklist::new(),
        }
    }

    pub fn nonces_mut(&mut self) -> &mut NonceStore {
        &mut self.nonces
    }

    pub fn blacklist_mut(&mut self) -> &mut NonceBlacklist {
        &mut self.blacklist
    }

    /// Registers the reply-nonce we hand out in a Nonce-Report, so a later
    /// inbound frame referencing it by its first byte can find it again.
    pub fn register_reply_nonce(&mut self, src: u8, dst: u8, nonce: [u8; 8]) -> bool {
        self.nonces.register(src, dst, true, nonce)
    }

    /// Spec §4.E "Encrypt (outbound)" steps 2-6: `rn` is the receiver-nonce
    /// already obtained via Nonce-Get/Nonce-Report (step 1, owned by the
    /// caller). Returns the wire frame `si || ciphertext || rn[0] || auth8`.
    pub fn encrypt(&self, src: u8, dst: u8, cmd_byte: u8, rn: [u8; 8], plaintext: &[u8]) -> Vec<u8> {
        let si: [u8; NONCE_HALF_LEN] = zwip_pal::random_bytes();
        let mut iv = [0u8; IV_LEN];
        iv[..NONCE_HALF_LEN].copy_from_slice(&si);
        iv[NONCE_HALF_LEN..].copy_from_slice(&rn);

        let ciphertext = aes_ofb_apply(plaintext, &self.keys.k_enc, &iv);
        let mac_message = mac_input(&iv, cmd_byte, src, dst, plaintext.len() as u8, &ciphertext);
        let auth = compute_mac_iv(&mac_message, &self.keys.k_auth, &[0u8; IV_LEN]);

        let mut frame = Vec::with_capacity(NONCE_HALF_LEN + ciphertext.len() + 1 + MAC_LEN);
        frame.extend_from_slice(&si);
        frame.extend_from_slice(&ciphertext);
        frame.push(rn[0]);
        frame.extend_from_slice(&auth);
        frame
    }

    /// Spec §4.E "Decrypt (inbound)": `frame` is `si || ct || ri || auth`
    /// as received off the wire, addressed from `src` to `dst` (us).
    pub fn decrypt(&mut self, src: u8, dst: u8, cmd_byte: u8, frame: &[u8]) -> Result<Vec<u8>> {
        if frame.len() < NONCE_HALF_LEN + 1 + MAC_LEN {
            return Err(Error::NonceUnknown);
        }
        let si: [u8; NONCE_HALF_LEN] = frame[..NONCE_HALF_LEN].try_into().unwrap();
        let ri = frame[frame.len() - MAC_LEN - 1];
        let auth = &frame[frame.len() - MAC_LEN..];
        let ciphertext = &frame[NONCE_HALF_LEN..frame.len() - MAC_LEN - 1];

        if self.blacklist.is_blacklisted(src, dst, si) {
            return Err(Error::NonceReplay);
        }

        let rn = self
            .nonces
            .get(dst, src, Some(ri))
            .ok_or(Error::NonceUnknown)?;

        let mut iv = [0u8; IV_LEN];
        iv[..NONCE_HALF_LEN].copy_from_slice(&si);
        iv[NONCE_HALF_LEN..].copy_from_slice(&rn);

        let plaintext = aes_ofb_apply(ciphertext, &self.keys.k_enc, &iv);
        let mac_message = mac_input(&iv, cmd_byte, src, dst, plaintext.len() as u8, ciphertext);
        let expected = compute_mac_iv(&mac_message, &self.keys.k_auth, &[0u8; IV_LEN]);
        if !constant_time_eq(&expected, auth) {
            return Err(Error::MacMismatch);
        }

        self.blacklist.add(src, dst, si);
        self.nonces.clear(dst, src);

        Ok(plaintext)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trip_then_reject_replay() {
        let network_key = [0x00u8, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f];
        let mut transport = S0Transport::new(&network_key);

        let src = 7u8; // the node
        let dst = 1u8; // the controller, us
        let cmd_byte = 0x81; // SECURITY_MESSAGE_ENCAPSULATION

        let rn = [0x42; 8];
        // We handed this reply-nonce out via Nonce-Report.
        assert!(transport.register_reply_nonce(dst, src, rn));

        let plaintext = [0x20, 0x01, 0xff]; // Basic Set On
        let frame = transport.encrypt(dst, src, cmd_byte, rn, &plaintext);

        let decrypted = transport.decrypt(src, dst, cmd_byte, &frame).unwrap();
        assert_eq!(decrypted, plaintext);

        // Re-injecting the exact same encrypted frame must be rejected.
        let err = transport.decrypt(src, dst, cmd_byte, &frame).unwrap_err();
        assert_eq!(err, Error::NonceReplay);
    }

    #[test]
    fn tampered_ciphertext_fails_the_mac_check() {
        let network_key = [0xaa; 16];
        let mut transport = S0Transport::new(&network_key);
        let rn = [0x11; 8];
        transport.register_reply_nonce(1, 7, rn);

        let mut frame = transport.encrypt(1, 7, 0x81, rn, &[0x25, 0x03, 0xff]);
        let last = frame.len() - 1;
        frame[last] ^= 0xff;

        let err = transport.decrypt(7, 1, 0x81, &frame).unwrap_err();
        assert_eq!(err, Error::MacMismatch);
    }

    #[test]
    fn unknown_reply_nonce_is_rejected() {
        let network_key = [0x11; 16];
        let mut transport = S0Transport::new(&network_key);
        let frame = transport.encrypt(1, 7, 0x81, [0x99; 8], &[0x00]);
        let err = transport.decrypt(7, 1, 0x81, &frame).unwrap_err();
        assert_eq!(err, Error::NonceUnknown);
    }
}
