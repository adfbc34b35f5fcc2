//! Password stretching.
//!
//! Keys come from Argon2id. Its cost parameters travel inside each
//! envelope, so they can be raised later without breaking old vaults.

use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::keys::{Salt, VaultKey, KEY_LENGTH};
use keepvault_common::{Error, Result};

/// Upper bound on memory cost accepted from an envelope (1 GiB, in KiB).
///
/// Sixteen times the interactive cost; anything above it is refused
/// before Argon2 allocates.
pub const MAX_MEMORY_KIB: u32 = 1024 * 1024;

/// Upper bound on iterations accepted from an envelope.
pub const MAX_ITERATIONS: u32 = 64;

/// Upper bound on lanes accepted from an envelope.
pub const MAX_PARALLELISM: u32 = 64;

/// Argon2id cost settings.
///
/// Recorded verbatim in every envelope so readers know exactly how the
/// key was derived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// KiB of memory per derivation.
    pub memory: u32,
    /// Passes over memory.
    pub iterations: u32,
    /// Lanes.
    pub parallelism: u32,
}

impl KdfParams {
    /// Parameters written into every new envelope.
    ///
    /// Unlock and save take a few hundred milliseconds with these; that
    /// cost is the brute-force deterrent.
    pub fn interactive() -> Self {
        Self {
            memory: 65536, // 64 MiB
            iterations: 3,
            parallelism: 4,
        }
    }

    /// Cheap parameters for test suites. Never use for real data.
    #[cfg(any(test, feature = "test-util"))]
    pub fn insecure_fast() -> Self {
        Self {
            memory: 256,
            iterations: 1,
            parallelism: 1,
        }
    }

    /// Check the parameters against Argon2 limits and our own ceilings.
    ///
    /// The ceilings stop a crafted envelope from making the reader
    /// allocate unbounded memory.
    pub fn validate(&self) -> Result<()> {
        if self.memory > MAX_MEMORY_KIB
            || self.iterations > MAX_ITERATIONS
            || self.parallelism == 0
            || self.parallelism > MAX_PARALLELISM
        {
            return Err(Error::InvalidInput(format!(
                "KDF parameters out of range: memory={} iterations={} parallelism={}",
                self.memory, self.iterations, self.parallelism
            )));
        }
        self.to_argon2().map(|_| ())
    }

    fn to_argon2(&self) -> Result<Params> {
        Params::new(
            self.memory,
            self.iterations,
            self.parallelism,
            Some(KEY_LENGTH),
        )
        .map_err(|e| Error::InvalidInput(format!("Invalid KDF parameters: {}", e)))
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::interactive()
    }
}

/// Stretch `password` into the envelope key.
///
/// Same password, salt and parameters always give the same key; that is
/// what lets `decrypt` rebuild it from the envelope alone.
///
/// # Errors
/// - `InvalidInput` for an empty password or parameters Argon2 refuses
/// - `Crypto` if hashing itself fails
pub fn derive_key(password: &[u8], salt: &Salt, params: &KdfParams) -> Result<VaultKey> {
    if password.is_empty() {
        return Err(Error::InvalidInput("Empty password".to_string()));
    }

    let hasher = Argon2::new(Algorithm::Argon2id, Version::V0x13, params.to_argon2()?);

    let mut output = Zeroizing::new([0u8; KEY_LENGTH]);
    hasher
        .hash_password_into(password, salt.as_bytes(), &mut *output)
        .map_err(|e| Error::Crypto(format!("Argon2id failed: {}", e)))?;

    Ok(VaultKey::from_bytes(*output))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(password: &[u8], salt_byte: u8) -> [u8; KEY_LENGTH] {
        let salt = Salt::from_bytes([salt_byte; 32]);
        *derive_key(password, &salt, &KdfParams::insecure_fast())
            .unwrap()
            .as_bytes()
    }

    #[test]
    fn test_key_depends_on_every_input() {
        let base = key(b"Secret123!", 7);

        assert_eq!(base, key(b"Secret123!", 7));
        assert_ne!(base, key(b"Secret123?", 7));
        assert_ne!(base, key(b"Secret123!", 8));

        let stronger = KdfParams {
            iterations: 2,
            ..KdfParams::insecure_fast()
        };
        let other = derive_key(b"Secret123!", &Salt::from_bytes([7; 32]), &stronger).unwrap();
        assert_ne!(&base, other.as_bytes());
    }

    #[test]
    fn test_empty_password_rejected() {
        let result = derive_key(b"", &Salt::generate(), &KdfParams::insecure_fast());
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_interactive_is_default() {
        assert_eq!(
            KdfParams::default(),
            KdfParams {
                memory: 64 * 1024,
                iterations: 3,
                parallelism: 4,
            }
        );
        assert!(KdfParams::default().validate().is_ok());
    }

    #[test]
    fn test_validate_bounds() {
        let base = KdfParams::interactive();
        for bad in [
            KdfParams { memory: MAX_MEMORY_KIB + 1, ..base.clone() },
            KdfParams { iterations: 0, ..base.clone() },
            KdfParams { iterations: MAX_ITERATIONS + 1, ..base.clone() },
            KdfParams { parallelism: 0, ..base.clone() },
            KdfParams { memory: 8, ..base.clone() },
        ] {
            assert!(bad.validate().is_err(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn test_multi_gigabyte_memory_refused_before_hashing() {
        let greedy = KdfParams {
            memory: 2 * 1024 * 1024,
            iterations: 1,
            parallelism: 1,
        };
        assert!(matches!(greedy.validate(), Err(Error::InvalidInput(_))));

        let ceiling = KdfParams {
            memory: MAX_MEMORY_KIB,
            ..greedy
        };
        assert!(ceiling.validate().is_ok());
    }
}
