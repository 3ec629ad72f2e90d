use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner, Length};

use crate::dsp::prepare_fft_input_inplace;
use crate::error::{ReverbError, Result};

/// One-sided magnitude spectrum: `frequencies[k] = k * sr / n`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpectralSeries {
    pub frequencies: Vec<f32>,
    pub magnitudes: Vec<f32>,
}

impl SpectralSeries {
    pub fn len(&self) -> usize {
        self.magnitudes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.magnitudes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (f32, f32)> + '_ {
        self.frequencies
            .iter()
            .copied()
            .zip(self.magnitudes.iter().copied())
    }

    /// Index of the largest magnitude.
    pub fn peak_bin(&self) -> Option<usize> {
        self.magnitudes
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
    }
}

pub struct SpectrumAnalyzer {
    sample_rate: u32,
    planner: FftPlanner<f32>,
    fft: Option<Arc<dyn Fft<f32>>>,
    buf: Vec<Complex<f32>>,
}

impl SpectrumAnalyzer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            planner: FftPlanner::new(),
            fft: None,
            buf: Vec::new(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// |DFT| / n for bins 0..=n/2.
    pub fn analyze(&mut self, samples: &[f32]) -> Result<SpectralSeries> {
        let n = samples.len();
        if n == 0 {
            return Err(ReverbError::DimensionMismatch(
                "cannot analyze an empty block".into(),
            ));
        }

        let fft = match &self.fft {
            Some(f) if f.len() == n => f.clone(),
            _ => {
                let f = self.planner.plan_fft_forward(n);
                self.fft = Some(f.clone());
                f
            }
        };

        prepare_fft_input_inplace(samples, &mut self.buf);
        fft.process(&mut self.buf);

        let bins = n / 2 + 1;
        let hz_per_bin = self.sample_rate as f32 / n as f32;
        let inv_n = 1.0 / n as f32;
        Ok(SpectralSeries {
            frequencies: (0..bins).map(|k| k as f32 * hz_per_bin).collect(),
            magnitudes: self.buf[..bins].iter().map(|c| c.norm() * inv_n).collect(),
        })
    }
}
