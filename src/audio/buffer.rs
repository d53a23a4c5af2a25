//! PCM sample accumulator
//!
//! A growable `f32` buffer with a consumed/filled cursor pair. The mixer
//! reads `[0, consumed)` after each pull; the next pull shifts the unread
//! tail `[consumed, filled)` back to the front before decoding more.

use crate::error::{Error, Result};

/// Sample buffer with consumption cursors.
///
/// Invariant: `consumed <= filled <= capacity`.
#[derive(Debug, Default)]
pub struct PcmBuffer {
    samples: Vec<f32>,
    consumed: usize,
    filled: usize,
}

impl PcmBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move unread samples to the front and forget the consumed ones
    pub fn shift(&mut self) {
        // A pull that failed half way can leave `consumed` past `filled`
        let consumed = self.consumed.min(self.filled);
        if consumed > 0 {
            self.samples.copy_within(consumed..self.filled, 0);
            self.filled -= consumed;
        }
        self.consumed = 0;
    }

    /// Mark the first `n` samples as handed to the mixer. The caller fills
    /// up to `n` before handing the buffer out.
    pub fn set_consumed(&mut self, n: usize) {
        self.consumed = n;
    }

    /// Grow capacity to at least `filled + len` samples and return the free
    /// region of exactly `len` samples. Never shrinks.
    pub fn reserve_tail(&mut self, len: usize) -> Result<&mut [f32]> {
        let needed = self.filled + len;
        if self.samples.len() < needed {
            self.samples
                .try_reserve(needed - self.samples.len())
                .map_err(|_| Error::ResourceExhausted { requested: needed })?;
            self.samples.resize(needed, 0.0);
        }
        Ok(&mut self.samples[self.filled..needed])
    }

    /// Account for `len` samples written into the region from `reserve_tail`
    pub fn commit(&mut self, len: usize) {
        self.filled = (self.filled + len).min(self.samples.len());
    }

    /// Unread samples
    pub fn unread(&self) -> usize {
        self.filled.saturating_sub(self.consumed)
    }

    pub fn consumed(&self) -> usize {
        self.consumed
    }

    pub fn filled(&self) -> usize {
        self.filled
    }

    pub fn capacity(&self) -> usize {
        self.samples.len()
    }

    /// Samples handed out by the last pull
    pub fn consumed_samples(&self) -> &[f32] {
        &self.samples[..self.consumed.min(self.filled)]
    }
}
