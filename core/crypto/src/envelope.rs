//! Versioned on-disk vault envelope.
//!
//! The envelope is the canonical JSON document written to disk. It
//! carries everything needed to re-derive the key and authenticate the
//! ciphertext: format version, algorithm identifiers, KDF parameters,
//! salt, nonce, ciphertext and tag. Binary fields are base64 encoded.

use serde::{Deserialize, Serialize};

use crate::aead::{ALGORITHM_ID, NONCE_SIZE, TAG_SIZE};
use crate::kdf::KdfParams;
use crate::keys::SALT_LENGTH;
use keepvault_common::{Error, Result};

/// Envelope format version written by this build.
pub const FORMAT_VERSION: &str = "1.0";

/// KDF identifier recorded in envelopes.
pub const KDF_ID: &str = "Argon2id";

/// Domain separator for the associated data.
const AAD_PREFIX: &[u8] = b"keepvault-envelope";

/// Encrypted vault as stored on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultEnvelope {
    /// Format version; unknown versions are rejected.
    pub version: String,
    /// Authenticated cipher identifier.
    pub algorithm: String,
    /// Key derivation function identifier.
    pub kdf: String,
    /// Parameters the key was derived with.
    pub kdf_params: KdfParams,
    #[serde(with = "base64_bytes")]
    pub salt: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub nonce: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub auth_tag: Vec<u8>,
}

impl VaultEnvelope {
    /// Associated data bound to the ciphertext.
    ///
    /// Covers the version and algorithm identifiers so that swapping them
    /// in the JSON is detected as tampering.
    pub fn associated_data(&self) -> Vec<u8> {
        associated_data(&self.version, &self.algorithm, &self.kdf)
    }

    /// Check that this envelope uses a format this build understands.
    ///
    /// # Errors
    /// - `MalformedEnvelope` on unknown version, algorithm or KDF, on
    ///   out-of-range KDF parameters, or on wrong field lengths
    pub fn validate(&self) -> Result<()> {
        if self.version != FORMAT_VERSION {
            return Err(Error::MalformedEnvelope(format!(
                "unsupported version '{}'",
                self.version
            )));
        }
        if self.algorithm != ALGORITHM_ID {
            return Err(Error::MalformedEnvelope(format!(
                "unsupported algorithm '{}'",
                self.algorithm
            )));
        }
        if self.kdf != KDF_ID {
            return Err(Error::MalformedEnvelope(format!(
                "unsupported kdf '{}'",
                self.kdf
            )));
        }
        self.kdf_params
            .validate()
            .map_err(|e| Error::MalformedEnvelope(e.to_string()))?;

        check_len("salt", &self.salt, SALT_LENGTH)?;
        check_len("nonce", &self.nonce, NONCE_SIZE)?;
        check_len("auth_tag", &self.auth_tag, TAG_SIZE)?;
        Ok(())
    }

    /// Encode to the canonical on-disk representation.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Decode from the on-disk representation and validate it.
    ///
    /// # Errors
    /// - `MalformedEnvelope` if the bytes are not a structurally valid
    ///   envelope or use an unsupported format
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let envelope: Self = serde_json::from_slice(bytes)
            .map_err(|e| Error::MalformedEnvelope(e.to_string()))?;
        envelope.validate()?;
        Ok(envelope)
    }
}

/// Build the associated data for a set of identifiers.
pub(crate) fn associated_data(version: &str, algorithm: &str, kdf: &str) -> Vec<u8> {
    let mut aad = Vec::with_capacity(
        AAD_PREFIX.len() + version.len() + algorithm.len() + kdf.len() + 3,
    );
    for part in [AAD_PREFIX, version.as_bytes(), algorithm.as_bytes(), kdf.as_bytes()] {
        aad.extend_from_slice(part);
        aad.push(0);
    }
    aad.pop();
    aad
}

fn check_len(field: &str, value: &[u8], expected: usize) -> Result<()> {
    if value.len() != expected {
        return Err(Error::MalformedEnvelope(format!(
            "{} must be {} bytes, got {}",
            field,
            expected,
            value.len()
        )));
    }
    Ok(())
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
