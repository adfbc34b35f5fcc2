//! Password-based envelope encryption.
//!
//! [`CryptoEngine`] ties the KDF, the AEAD and the envelope format
//! together: every encryption draws a fresh salt and nonce, derives a key
//! with the engine's KDF parameters and binds the envelope identifiers as
//! associated data.

use tracing::debug;

use crate::aead::{self, ALGORITHM_ID, NONCE_SIZE, TAG_SIZE};
use crate::envelope::{associated_data, VaultEnvelope, FORMAT_VERSION, KDF_ID};
use crate::kdf::{derive_key, KdfParams};
use crate::keys::Salt;
use keepvault_common::{Error, Password, Result, SensitiveBytes};

/// Encrypts and decrypts opaque payloads under a password.
#[derive(Debug, Clone, Default)]
pub struct CryptoEngine {
    params: KdfParams,
}

impl CryptoEngine {
    /// Create an engine writing envelopes with the interactive KDF parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an engine writing envelopes with specific KDF parameters.
    ///
    /// Decryption always uses the parameters recorded in the envelope.
    pub fn with_params(params: KdfParams) -> Self {
        Self { params }
    }

    /// KDF parameters used for new envelopes.
    pub fn params(&self) -> &KdfParams {
        &self.params
    }

    /// Encrypt `plaintext` under `password`.
    ///
    /// # Postconditions
    /// - Salt and nonce are freshly random, so two calls with identical
    ///   inputs produce different envelopes
    /// - The derived key is zeroized before returning
    ///
    /// # Errors
    /// - `InvalidInput` if the password is empty or the parameters invalid
    /// - `Crypto` if key derivation or encryption fails
    pub fn encrypt(&self, plaintext: &[u8], password: &Password) -> Result<VaultEnvelope> {
        let salt = Salt::generate();
        let key = derive_key(password.as_bytes(), &salt, &self.params)?;
        let aad = associated_data(FORMAT_VERSION, ALGORITHM_ID, KDF_ID);

        let sealed = aead::seal(&key, plaintext, &aad)?;
        debug!(bytes = plaintext.len(), "Encrypted vault payload");

        Ok(VaultEnvelope {
            version: FORMAT_VERSION.to_string(),
            algorithm: ALGORITHM_ID.to_string(),
            kdf: KDF_ID.to_string(),
            kdf_params: self.params.clone(),
            salt: salt.as_bytes().to_vec(),
            nonce: sealed.nonce.to_vec(),
            ciphertext: sealed.ciphertext,
            auth_tag: sealed.tag.to_vec(),
        })
    }

    /// Decrypt an envelope with `password`.
    ///
    /// # Errors
    /// - `MalformedEnvelope` if the envelope format is not supported
    /// - `AuthenticationFailed` if the password is wrong or any byte of
    ///   the ciphertext, tag or bound identifiers was altered
    pub fn decrypt(&self, envelope: &VaultEnvelope, password: &Password) -> Result<SensitiveBytes> {
        envelope.validate()?;

        if password.is_empty() {
            return Err(Error::AuthenticationFailed);
        }

        let salt = Salt::from_slice(&envelope.salt)
            .ok_or_else(|| Error::MalformedEnvelope("invalid salt".to_string()))?;
        let nonce: [u8; NONCE_SIZE] = envelope
            .nonce
            .as_slice()
            .try_into()
            .map_err(|_| Error::MalformedEnvelope("invalid nonce".to_string()))?;
        let tag: [u8; TAG_SIZE] = envelope
            .auth_tag
            .as_slice()
            .try_into()
            .map_err(|_| Error::MalformedEnvelope("invalid auth_tag".to_string()))?;

        let key = derive_key(password.as_bytes(), &salt, &envelope.kdf_params)?;
        let plaintext = aead::open(
            &key,
            &nonce,
            &envelope.ciphertext,
            &tag,
            &envelope.associated_data(),
        )?;
        debug!(bytes = plaintext.len(), "Decrypted vault payload");

        Ok(plaintext)
    }
}
