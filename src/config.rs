//! Playout configuration
//!
//! All values have defaults matching the 48 kHz / 10 ms voice framing, so an
//! empty TOML document is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::constants::*;
use crate::error::{Error, Result};

/// Which jitter buffer primitive speakers use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterBackend {
    /// In-crate reorder buffer
    Builtin,
    /// speexdsp jitter buffer (requires the `speexdsp` feature)
    Speex,
}

/// Per-speaker decode pipeline settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayoutConfig {
    /// Output sample rate in Hz
    pub sample_rate: u32,
    /// Samples per base frame
    pub frame_size: usize,
    /// Reorder margin, in frames
    pub jitter_margin_frames: u32,
    /// Maximum entries held by the built-in reorder buffer
    pub jitter_capacity: usize,
    pub jitter_backend: JitterBackend,
    /// Bytes allocated for a fresh pooled payload buffer
    pub pool_slot_size: usize,
    /// Idle payload buffers retained per speaker
    pub pool_capacity: usize,
    /// Largest Opus frame, in base frames (120 ms / 10 ms)
    pub max_frame_multiplier: usize,
}

impl Default for PlayoutConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            frame_size: DEFAULT_FRAME_SIZE,
            jitter_margin_frames: DEFAULT_JITTER_MARGIN_FRAMES,
            jitter_capacity: DEFAULT_JITTER_CAPACITY,
            jitter_backend: JitterBackend::Builtin,
            pool_slot_size: POOL_SLOT_SIZE,
            pool_capacity: POOL_CAPACITY,
            max_frame_multiplier: MAX_FRAME_MULTIPLIER,
        }
    }
}

impl PlayoutConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Serialize to TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(Error::Config("sample_rate must be non-zero".into()));
        }
        if self.frame_size == 0 {
            return Err(Error::Config("frame_size must be non-zero".into()));
        }
        if self.max_frame_multiplier == 0 {
            return Err(Error::Config("max_frame_multiplier must be non-zero".into()));
        }
        if self.jitter_capacity == 0 {
            return Err(Error::Config("jitter_capacity must be non-zero".into()));
        }

        // Timestamps are u32 samples
        let frame_size = u32::try_from(self.frame_size)
            .map_err(|_| Error::Config(format!("frame_size {} out of range", self.frame_size)))?;
        if self.jitter_margin_frames.checked_mul(frame_size).is_none() {
            return Err(Error::Config(format!(
                "jitter margin of {} frames of {} samples overflows",
                self.jitter_margin_frames, self.frame_size
            )));
        }
        if self.frame_size.checked_mul(self.max_frame_multiplier).is_none() {
            return Err(Error::Config(format!(
                "max_frame_multiplier {} overflows",
                self.max_frame_multiplier
            )));
        }
        Ok(())
    }

    /// Reorder margin in samples
    pub fn jitter_margin(&self) -> u32 {
        let frame_size = u32::try_from(self.frame_size).unwrap_or(u32::MAX);
        self.jitter_margin_frames.saturating_mul(frame_size)
    }

    /// Largest decode output a modern-codec speaker must hold
    pub fn max_frame_samples(&self) -> usize {
        self.frame_size.saturating_mul(self.max_frame_multiplier)
    }
}
