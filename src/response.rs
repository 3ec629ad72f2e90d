//! Impulse responses and the adapter the streaming loop asks for them.

use std::time::Instant;

use log::debug;

use crate::config::ResponsePolicy;
use crate::error::{ReverbError, Result};
use crate::params::RoomParams;

#[derive(Debug, Clone, PartialEq)]
pub struct ImpulseResponse {
    taps: Vec<f32>,
}

impl ImpulseResponse {
    pub fn new(taps: Vec<f32>) -> Self {
        Self { taps }
    }

    pub fn taps(&self) -> &[f32] {
        &self.taps
    }

    pub fn len(&self) -> usize {
        self.taps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.taps.is_empty()
    }
}

/// Turns a room snapshot into a filter of exactly `len` taps.
///
/// Implementations must be deterministic for identical inputs and fail with
/// [`ReverbError::AcousticSimulation`] when the geometry cannot be simulated.
pub trait ImpulseResponseProvider: Send {
    fn generate(&self, params: &RoomParams, sample_rate: u32, len: usize)
        -> Result<ImpulseResponse>;
}

/// Validates snapshots and remembers the last response.
///
/// With [`ResponsePolicy::Cached`] the provider only runs when the snapshot
/// differs from the one that produced the stored response.
pub struct ResponseCache<P> {
    provider: P,
    policy: ResponsePolicy,
    sample_rate: u32,
    last: Option<(RoomParams, ImpulseResponse)>,
    misses: u64,
}

impl<P: ImpulseResponseProvider> ResponseCache<P> {
    pub fn new(provider: P, policy: ResponsePolicy, sample_rate: u32) -> Self {
        Self {
            provider,
            policy,
            sample_rate,
            last: None,
            misses: 0,
        }
    }

    pub fn get(&mut self, params: &RoomParams) -> Result<&ImpulseResponse> {
        params.validate()?;

        let hit = self.policy == ResponsePolicy::Cached
            && matches!(&self.last, Some((key, _)) if key == params);

        if !hit {
            let t0 = Instant::now();
            let ir = self
                .provider
                .generate(params, self.sample_rate, params.impulse_len)?;
            if ir.len() != params.impulse_len {
                return Err(ReverbError::DimensionMismatch(format!(
                    "provider returned {} taps, expected {}",
                    ir.len(),
                    params.impulse_len
                )));
            }
            self.misses += 1;
            debug!(
                "impulse response synthesized in {:.1} ms (rt60 {:.2}s)",
                t0.elapsed().as_secs_f64() * 1e3,
                params.rt60
            );
            self.last = Some((*params, ir));
        }

        match &self.last {
            Some((_, ir)) => Ok(ir),
            None => Err(ReverbError::AcousticSimulation("no response available".into())),
        }
    }

    /// Number of times the provider actually ran.
    pub fn misses(&self) -> u64 {
        self.misses
    }
}
