//! Incremental UTF-8 validation for fragmented text messages.
//!
//! A multi-byte sequence may straddle a fragment boundary, so the validator
//! carries up to three pending bytes between calls. The final fragment must
//! complete every sequence.

use crate::error::{Error, Result};

/// Incremental UTF-8 validator.
#[derive(Debug, Clone, Default)]
pub struct Utf8Validator {
    /// Unfinished multi-byte sequence from the previous fragment.
    pending: [u8; 4],
    pending_len: usize,
}

impl Utf8Validator {
    /// Create a fresh validator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next fragment. With `is_final` set, a trailing incomplete
    /// sequence is an error instead of being carried over.
    ///
    /// # Errors
    ///
    /// `Error::InvalidUtf8` on any invalid sequence.
    pub fn feed(&mut self, data: &[u8], is_final: bool) -> Result<()> {
        let combined;
        let view: &[u8] = if self.pending_len > 0 {
            let mut buf = Vec::with_capacity(self.pending_len + data.len());
            buf.extend_from_slice(&self.pending[..self.pending_len]);
            buf.extend_from_slice(data);
            combined = buf;
            &combined
        } else {
            data
        };
        self.pending_len = 0;

        if view.is_empty() {
            return Ok(());
        }

        match std::str::from_utf8(view) {
            Ok(_) => Ok(()),
            Err(e) => {
                // error_len() == None means the data merely ended mid-sequence.
                if !is_final && e.error_len().is_none() {
                    let tail = &view[e.valid_up_to()..];
                    debug_assert!(tail.len() < 4);
                    self.pending[..tail.len()].copy_from_slice(tail);
                    self.pending_len = tail.len();
                    return Ok(());
                }
                Err(Error::InvalidUtf8)
            }
        }
    }

    /// Discard carried state.
    pub fn reset(&mut self) {
        self.pending_len = 0;
    }

    /// Whether an unfinished sequence is pending.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.pending_len > 0
    }
}

/// Validate a complete byte slice.
///
/// # Errors
///
/// `Error::InvalidUtf8` if `data` is not valid UTF-8.
pub fn validate_utf8(data: &[u8]) -> Result<()> {
    std::str::from_utf8(data)
        .map(|_| ())
        .map_err(|_| Error::InvalidUtf8)
}
