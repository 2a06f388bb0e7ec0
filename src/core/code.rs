//! Voucher code generation and normalization.
//!
//! Codes are eight characters over `A-Z0-9` (36^8 possibilities) drawn from the
//! thread-local CSPRNG. The generator never checks uniqueness; the issuance
//! flow retries on a unique-constraint violation instead.

use crate::errors::{Error, Result};
use rand::Rng;

/// Number of characters in a voucher code.
pub const CODE_LENGTH: usize = 8;

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Source of candidate voucher codes.
pub trait CodeGenerator: Send + Sync {
    /// Draws a fresh candidate code.
    fn generate(&self) -> String;
}

/// Default generator backed by `rand::thread_rng`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomCodeGenerator;

impl CodeGenerator for RandomCodeGenerator {
    fn generate(&self) -> String {
        let mut rng = rand::thread_rng();
        (0..CODE_LENGTH)
            .map(|_| char::from(ALPHABET[rng.gen_range(0..ALPHABET.len())]))
            .collect()
    }
}

/// Normalizes operator-entered codes: trims, drops `-` and spaces, upper-cases.
///
/// Returns `InvalidCode` unless the result is exactly eight alphanumerics.
pub fn normalize_code(input: &str) -> Result<String> {
    let normalized: String = input
        .chars()
        .filter(|c| !matches!(c, '-' | ' '))
        .map(|c| c.to_ascii_uppercase())
        .collect();

    if normalized.len() == CODE_LENGTH && normalized.chars().all(|c| c.is_ascii_alphanumeric()) {
        Ok(normalized)
    } else {
        Err(Error::InvalidCode {
            code: input.trim().to_string(),
        })
    }
}

/// Splits a code into two groups of four for printing, e.g. `ABCD-1234`.
#[must_use]
pub fn format_grouped(code: &str) -> String {
    if code.len() == CODE_LENGTH && code.is_ascii() {
        let (head, tail) = code.split_at(CODE_LENGTH / 2);
        format!("{head}-{tail}")
    } else {
        code.to_string()
    }
}
