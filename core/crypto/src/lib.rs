//! Cryptographic primitives for KeepVault.
//!
//! This module provides:
//! - Key derivation using Argon2id
//! - Authenticated encryption using XChaCha20-Poly1305
//! - Secure key management with automatic zeroization
//! - The versioned on-disk envelope wrapping ciphertext and parameters
//!
//! # Security Guarantees
//! - All key material is automatically zeroized on drop
//! - No plaintext or key material is ever logged
//! - Wrong-password and tampered-data failures are indistinguishable

pub mod aead;
pub mod engine;
pub mod envelope;
pub mod kdf;
pub mod keys;

pub use engine::CryptoEngine;
pub use envelope::VaultEnvelope;
pub use kdf::{derive_key, KdfParams};
pub use keys::{Salt, VaultKey};
