//! Payload masking (RFC 6455 Section 5.3).
//!
//! Client frames are XOR-masked with a fresh 4-byte key cycled modulo 4.
//! Masking is an involution: applying the same key twice restores the
//! payload. Keys come from the platform CSPRNG; RFC 6455 only requires
//! unpredictability, but a strong source costs nothing here.

use crate::error::{Error, Result};

/// Generate a fresh 4-byte masking key from the platform CSPRNG.
///
/// # Errors
///
/// Returns `Error::Io` if the platform entropy source fails.
pub fn generate_mask_key() -> Result<[u8; 4]> {
    let mut key = [0u8; 4];
    getrandom::getrandom(&mut key)
        .map_err(|e| Error::Io(format!("entropy source failed: {}", e)))?;
    Ok(key)
}

/// XOR `data` in place with `key` cycled modulo 4.
#[inline]
pub fn apply_mask(data: &mut [u8], key: [u8; 4]) {
    let key_word = u32::from_ne_bytes(key);
    let mut chunks = data.chunks_exact_mut(4);
    for chunk in &mut chunks {
        let word = u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) ^ key_word;
        chunk.copy_from_slice(&word.to_ne_bytes());
    }
    for (i, byte) in chunks.into_remainder().iter_mut().enumerate() {
        *byte ^= key[i];
    }
}
