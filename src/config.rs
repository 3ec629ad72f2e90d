//! Operating parameters for the engine and the device layer.
//!
//! Defaults are the fixed values the demo runs at. A few can be overridden
//! from the environment, the same way the input device is picked.

use std::env;
use std::time::Duration;

use crate::error::{ReverbError, Result};

pub const SAMPLE_RATE: u32 = 16_000;
pub const BLOCK_LEN: usize = 2048;
pub const IMPULSE_LEN: usize = 4096;
pub const SPEED_OF_SOUND: f64 = 340.0;

/// How the streaming loop obtains a response each tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponsePolicy {
    /// Reuse the last response while the snapshot is unchanged.
    Cached,
    /// Synthesize a fresh response on every tick.
    RecomputeEveryTick,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub sample_rate: u32,
    pub block_len: usize,
    pub impulse_len: usize,
    pub speed_of_sound: f64,
    pub response_policy: ResponsePolicy,
    /// Longest a capture read may wait for a full block.
    pub capture_timeout: Duration,
    /// Longest a playback write may wait for room in the device queue.
    pub playback_timeout: Duration,
    /// Case-insensitive substring of the wanted input device name.
    pub input_device: Option<String>,
    pub output_device: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            block_len: BLOCK_LEN,
            impulse_len: IMPULSE_LEN,
            speed_of_sound: SPEED_OF_SOUND,
            response_policy: ResponsePolicy::Cached,
            capture_timeout: Duration::from_secs(1),
            playback_timeout: Duration::from_secs(1),
            input_device: None,
            output_device: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();

        if let Ok(name) = env::var("ROOMVERB_INPUT") {
            cfg.input_device = Some(name);
        }
        if let Ok(name) = env::var("ROOMVERB_OUTPUT") {
            cfg.output_device = Some(name);
        }
        if let Ok(v) = env::var("ROOMVERB_RECOMPUTE") {
            if v == "1" || v.eq_ignore_ascii_case("true") {
                cfg.response_policy = ResponsePolicy::RecomputeEveryTick;
            }
        }
        if let Ok(v) = env::var("ROOMVERB_BLOCK") {
            cfg.block_len = v.parse().map_err(|_| {
                ReverbError::Parameter(format!("ROOMVERB_BLOCK='{}' is not a length", v))
            })?;
        }
        if let Ok(v) = env::var("ROOMVERB_RATE") {
            cfg.sample_rate = v.parse().map_err(|_| {
                ReverbError::Parameter(format!("ROOMVERB_RATE='{}' is not a rate", v))
            })?;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(ReverbError::Parameter("sample rate must be positive".into()));
        }
        if self.block_len == 0 || self.impulse_len == 0 {
            return Err(ReverbError::Parameter(
                "block and impulse lengths must be positive".into(),
            ));
        }
        if !(self.speed_of_sound.is_finite() && self.speed_of_sound > 0.0) {
            return Err(ReverbError::Parameter("speed of sound must be positive".into()));
        }
        Ok(())
    }

    /// Wall-clock length of one block.
    pub fn block_duration(&self) -> Duration {
        Duration::from_secs_f64(self.block_len as f64 / self.sample_rate as f64)
    }
}
