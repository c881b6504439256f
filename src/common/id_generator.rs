// src/common/id_generator.rs
//! Random identifier and secret generation
//!
//! - Prefixed Crockford Base32 record IDs (e.g. `K_K7NP3X` for refresh tokens)
//! - Opaque refresh token values (256 bits from the OS RNG, base64url)
//! - Numeric one-time verification codes

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::rngs::OsRng;
use rand::{Rng, RngCore};

/// Crockford Base32 alphabet (excludes I, L, O, U to avoid confusion)
const CROCKFORD_ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// Number of random bytes behind an opaque token
const OPAQUE_TOKEN_BYTES: usize = 32;

/// Entity type prefixes for ID generation
#[derive(Debug, Clone, Copy)]
pub enum EntityPrefix {
    /// Refresh token record (K_) - K for Key
    Token,
}

impl EntityPrefix {
    /// Get the string prefix for this entity type
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityPrefix::Token => "K",
        }
    }
}

/// Generate a random Crockford Base32 string of specified length
fn generate_crockford_string(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| {
            let idx = rng.gen_range(0..32);
            CROCKFORD_ALPHABET[idx] as char
        })
        .collect()
}

/// Generate a prefixed ID using Crockford Base32 encoding
///
/// Record IDs are 12 random characters (60 bits); they only need to be
/// unique, the secret part of a refresh token is its value.
pub fn generate_id(prefix: EntityPrefix) -> String {
    format!("{}_{}", prefix.as_str(), generate_crockford_string(12))
}

/// Generate a Token ID (K_XXXXXXXXXXXX)
pub fn generate_token_id() -> String {
    generate_id(EntityPrefix::Token)
}

/// Generate an opaque, unguessable token value
pub fn generate_opaque_token() -> String {
    let mut bytes = [0u8; OPAQUE_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Generate a numeric code of `length` digits from the OS RNG
pub fn generate_numeric_code(length: usize) -> String {
    (0..length)
        .map(|_| char::from(b'0' + OsRng.gen_range(0..10u8)))
        .collect()
}
