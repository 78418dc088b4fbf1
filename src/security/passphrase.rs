//! Random passphrase generation
//!
//! Produces grouped base-36 passphrases like `TDW6-DU5M-TANI-LJXY` from a
//! cryptographically secure random source.

use crate::error::{CoreError, Result};
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};

/// Number of random bytes consumed per passphrase, and the minimum input
/// length for [`bytes_to_password`].
const PASSPHRASE_BYTES: usize = 16;

/// Generate a random passphrase from the OS random source.
pub fn random() -> String {
    random_with(&mut OsRng)
}

/// Generate a passphrase from an explicit random source.
///
/// The `CryptoRng` bound keeps weak generators out of production call
/// sites; deterministic test rngs opt in by implementing it.
pub fn random_with<R: RngCore + CryptoRng>(rng: &mut R) -> String {
    let mut bytes = [0u8; PASSPHRASE_BYTES];
    rng.fill_bytes(&mut bytes);
    // Cannot fail: the buffer is exactly PASSPHRASE_BYTES long
    bytes_to_password(&bytes).unwrap_or_default()
}

/// Map random bytes to a grouped base-36 (`0-9A-Z`) passphrase.
///
/// Each byte maps to `byte mod 36`; a `-` separates every group of four
/// characters. Requires at least 16 input bytes.
pub fn bytes_to_password(bytes: &[u8]) -> Result<String> {
    if bytes.len() < PASSPHRASE_BYTES {
        return Err(CoreError::InvalidInput(format!(
            "source byte array is too short: required minimum length is {}, but the actual length is {}",
            PASSPHRASE_BYTES,
            bytes.len()
        )));
    }

    let mut out = String::with_capacity(bytes.len() + bytes.len() / 4);
    for (i, byte) in bytes.iter().enumerate() {
        if i > 0 && i % 4 == 0 {
            out.push('-');
        }
        let value = byte % 36;
        let ch = if value < 10 {
            b'0' + value
        } else {
            b'A' + (value - 10)
        };
        out.push(ch as char);
    }
    Ok(out)
}
