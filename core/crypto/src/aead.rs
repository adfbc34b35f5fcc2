//! Authenticated encryption using XChaCha20-Poly1305.
//!
//! XChaCha20-Poly1305 provides both confidentiality and authenticity,
//! with a 24-byte nonce that is safe for random generation. Nonce, body
//! and tag are kept apart because the envelope stores them as separate
//! fields.

use chacha20poly1305::{
    aead::{AeadCore, AeadInPlace, KeyInit, OsRng},
    Key, Tag, XChaCha20Poly1305, XNonce,
};
use zeroize::Zeroize;

use crate::keys::VaultKey;
use keepvault_common::{Error, Result, SensitiveBytes};

/// Algorithm identifier recorded in envelopes.
pub const ALGORITHM_ID: &str = "XChaCha20-Poly1305";

/// Nonce size for XChaCha20-Poly1305 (24 bytes).
pub const NONCE_SIZE: usize = 24;

/// Authentication tag size (16 bytes).
pub const TAG_SIZE: usize = 16;

/// Output of a single sealing operation.
#[derive(Debug, Clone)]
pub struct Sealed {
    pub nonce: [u8; NONCE_SIZE],
    pub ciphertext: Vec<u8>,
    pub tag: [u8; TAG_SIZE],
}

/// Encrypt `plaintext` under `key`, authenticating `aad` alongside it.
///
/// # Postconditions
/// - The nonce is freshly generated from the OS RNG
/// - `ciphertext` has the same length as `plaintext`
///
/// # Errors
/// - Returns error if encryption fails
pub fn seal(key: &VaultKey, plaintext: &[u8], aad: &[u8]) -> Result<Sealed> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);

    let mut buffer = plaintext.to_vec();
    let tag = match cipher.encrypt_in_place_detached(&nonce, aad, &mut buffer) {
        Ok(tag) => tag,
        Err(e) => {
            buffer.zeroize();
            return Err(Error::Crypto(format!("Encryption failed: {}", e)));
        }
    };

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    nonce_bytes.copy_from_slice(&nonce);
    let mut tag_bytes = [0u8; TAG_SIZE];
    tag_bytes.copy_from_slice(&tag);

    Ok(Sealed {
        nonce: nonce_bytes,
        ciphertext: buffer,
        tag: tag_bytes,
    })
}

/// Decrypt and authenticate a sealed payload.
///
/// # Errors
/// - `AuthenticationFailed` if the key is wrong or any byte of nonce,
///   ciphertext, tag or `aad` was altered. No other detail is reported.
///
/// # Security
/// - The tag is verified before any plaintext is produced
pub fn open(
    key: &VaultKey,
    nonce: &[u8; NONCE_SIZE],
    ciphertext: &[u8],
    tag: &[u8; TAG_SIZE],
    aad: &[u8],
) -> Result<SensitiveBytes> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));

    let mut buffer = ciphertext.to_vec();
    match cipher.decrypt_in_place_detached(
        XNonce::from_slice(nonce),
        aad,
        &mut buffer,
        Tag::from_slice(tag),
    ) {
        Ok(()) => Ok(SensitiveBytes::new(buffer)),
        Err(_) => {
            buffer.zeroize();
            Err(Error::AuthenticationFailed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KEY_LENGTH;

    fn key(byte: u8) -> VaultKey {
        VaultKey::from_bytes([byte; KEY_LENGTH])
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let sealed = seal(&key(42), b"Hello, World!", b"aad").unwrap();
        let opened = open(&key(42), &sealed.nonce, &sealed.ciphertext, &sealed.tag, b"aad").unwrap();

        assert_eq!(opened.as_bytes(), b"Hello, World!");
        assert_eq!(sealed.ciphertext.len(), 13);
    }

    #[test]
    fn test_different_nonce_each_time() {
        let a = seal(&key(42), b"Same plaintext", b"").unwrap();
        let b = seal(&key(42), b"Same plaintext", b"").unwrap();

        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = seal(&key(1), b"Secret data", b"").unwrap();
        let result = open(&key(2), &sealed.nonce, &sealed.ciphertext, &sealed.tag, b"");

        assert!(matches!(result, Err(Error::AuthenticationFailed)));
    }

    #[test]
    fn test_aad_mismatch_fails() {
        let sealed = seal(&key(42), b"payload", b"version=1.0").unwrap();
        let result = open(
            &key(42),
            &sealed.nonce,
            &sealed.ciphertext,
            &sealed.tag,
            b"version=0.9",
        );

        assert!(matches!(result, Err(Error::AuthenticationFailed)));
    }

    #[test]
    fn test_tampered_tag_fails() {
        let mut sealed = seal(&key(42), b"Important data", b"").unwrap();
        sealed.tag[0] ^= 0x01;

        let result = open(&key(42), &sealed.nonce, &sealed.ciphertext, &sealed.tag, b"");
        assert!(matches!(result, Err(Error::AuthenticationFailed)));
    }

    #[test]
    fn test_empty_plaintext() {
        let sealed = seal(&key(42), b"", b"").unwrap();
        let opened = open(&key(42), &sealed.nonce, &sealed.ciphertext, &sealed.tag, b"").unwrap();

        assert!(opened.is_empty());
    }
}
