//! Proof Key for Code Exchange (RFC 7636).
//!
//! The verifier is drawn from the operating system's CSPRNG and mapped onto
//! a 64 character alphabet. Because 256 is a multiple of 64, the byte-wise
//! modulo keeps every character equally likely.
//!
//! # Example
//!
//! ```rust
//! use cadenza::pkce::{self, PkcePair};
//!
//! let pair = PkcePair::generate()?;
//! assert_eq!(pair.challenge, pkce::derive_challenge(&pair.verifier));
//! ```

use std::ops::RangeInclusive;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::{rngs::OsRng, TryRngCore};
use sha2::{Digest, Sha256};
use veil::Redact;

use crate::error::{Error, Result};

/// Unreserved characters the verifier is built from.
pub const ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// Verifier lengths permitted by RFC 7636.
pub const VERIFIER_LENGTH: RangeInclusive<usize> = 43..=128;

/// Verifier length used by [`PkcePair::generate`].
pub const DEFAULT_VERIFIER_LENGTH: usize = 64;

/// A verifier and the challenge derived from it.
#[derive(Clone, PartialEq, Eq, Redact)]
pub struct PkcePair {
    #[redact]
    pub verifier: String,
    pub challenge: String,
}

impl PkcePair {
    /// Generates a pair with a verifier of the default length.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the system random source fails.
    pub fn generate() -> Result<Self> {
        Self::with_length(DEFAULT_VERIFIER_LENGTH)
    }

    /// Generates a pair with a verifier of `length` characters.
    ///
    /// # Errors
    ///
    /// See [`generate_verifier`].
    pub fn with_length(length: usize) -> Result<Self> {
        let verifier = generate_verifier(length)?;
        let challenge = derive_challenge(&verifier);
        Ok(Self {
            verifier,
            challenge,
        })
    }
}

/// Generates a verifier of exactly `length` characters.
///
/// # Errors
///
/// Returns an invalid argument error if `length` is outside of 43..=128, or
/// an internal error if the system random source fails.
pub fn generate_verifier(length: usize) -> Result<String> {
    if !VERIFIER_LENGTH.contains(&length) {
        return Err(Error::invalid_argument(format!(
            "verifier length should be between {} and {} but is {length}",
            VERIFIER_LENGTH.start(),
            VERIFIER_LENGTH.end()
        )));
    }

    let mut bytes = vec![0u8; length];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| Error::internal(format!("system random source failed: {e}")))?;

    Ok(bytes
        .into_iter()
        .map(|byte| char::from(ALPHABET[usize::from(byte) % ALPHABET.len()]))
        .collect())
}

/// Derives the `S256` challenge: base64url of the SHA-256 digest, without
/// padding.
#[must_use]
pub fn derive_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}
