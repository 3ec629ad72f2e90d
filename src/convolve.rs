use realfft::{ComplexToReal, FftError, RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex;
use std::sync::Arc;

use crate::buffer::{AudioBlock, ProcessedBlock};
use crate::dsp::normalize_peak;
use crate::error::{ReverbError, Result};
use crate::response::ImpulseResponse;

#[derive(Clone)]
struct Fft {
    len: usize,
    forward: Arc<dyn RealToComplex<f32>>,
    inverse: Arc<dyn ComplexToReal<f32>>,
}

impl std::fmt::Debug for Fft {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Fft({})", self.len)
    }
}

impl Fft {
    fn new(planner: &mut RealFftPlanner<f32>, len: usize) -> Self {
        Self {
            len,
            forward: planner.plan_fft_forward(len),
            inverse: planner.plan_fft_inverse(len),
        }
    }

    fn forward(&self, input: &mut [f32], output: &mut [Complex<f32>]) -> std::result::Result<(), FftError> {
        self.forward.process(input, output)
    }

    /// Inverse transform including the 1/len scaling.
    fn inverse(&self, input: &mut [Complex<f32>], output: &mut [f32]) -> std::result::Result<(), FftError> {
        // DC and Nyquist bins of a real signal are real
        if let Some(first) = input.first_mut() {
            first.im = 0.0;
        }
        if self.len % 2 == 0 {
            if let Some(last) = input.last_mut() {
                last.im = 0.0;
            }
        }
        self.inverse.process(input, output)?;
        let scale = 1.0 / self.len as f32;
        output.iter_mut().for_each(|x| *x *= scale);
        Ok(())
    }
}

fn complex_size(size: usize) -> usize {
    (size / 2) + 1
}

fn copy_and_pad(dst: &mut [f32], src: &[f32]) {
    assert!(dst.len() >= src.len());
    dst[..src.len()].copy_from_slice(src);
    dst[src.len()..].iter_mut().for_each(|v| *v = 0.);
}

fn fft_err(e: FftError) -> ReverbError {
    ReverbError::DimensionMismatch(e.to_string())
}

/// Block convolver with "same"-length cropping and per-block peak
/// normalization.
///
/// Uses one zero-padded real FFT large enough for the full linear
/// convolution, so every block is independent of the previous one. Plans are
/// kept and only rebuilt when the block or response length changes.
pub struct ConvolutionEngine {
    planner: RealFftPlanner<f32>,
    fft: Option<Fft>,
    time_buf: Vec<f32>,
    block_spec: Vec<Complex<f32>>,
    ir_spec: Vec<Complex<f32>>,
}

impl Default for ConvolutionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConvolutionEngine {
    pub fn new() -> Self {
        Self {
            planner: RealFftPlanner::new(),
            fft: None,
            time_buf: Vec::new(),
            block_spec: Vec::new(),
            ir_spec: Vec::new(),
        }
    }

    /// Plans ahead for the given shape so the first tick does not pay for it.
    pub fn with_shape(block_len: usize, ir_len: usize) -> Self {
        let mut engine = Self::new();
        if block_len > 0 && ir_len > 0 {
            engine.prepare(block_len, ir_len);
        }
        engine
    }

    fn prepare(&mut self, block_len: usize, ir_len: usize) -> Fft {
        let fft_len = (block_len + ir_len - 1).next_power_of_two();
        match &self.fft {
            Some(fft) if fft.len == fft_len => fft.clone(),
            _ => {
                let fft = Fft::new(&mut self.planner, fft_len);
                self.time_buf = vec![0.0; fft_len];
                self.block_spec = vec![Complex::new(0.0, 0.0); complex_size(fft_len)];
                self.ir_spec = vec![Complex::new(0.0, 0.0); complex_size(fft_len)];
                self.fft = Some(fft.clone());
                fft
            }
        }
    }

    /// Convolves without normalizing; output has the block's length.
    pub fn convolve_same(&mut self, block: &[f32], response: &[f32]) -> Result<Vec<f32>> {
        if response.is_empty() {
            return Err(ReverbError::DimensionMismatch(
                "impulse response has no taps".into(),
            ));
        }
        let n = block.len();
        if n == 0 {
            return Ok(Vec::new());
        }
        let m = response.len();

        let fft = self.prepare(n, m);

        copy_and_pad(&mut self.time_buf, block);
        fft.forward(&mut self.time_buf, &mut self.block_spec).map_err(fft_err)?;
        copy_and_pad(&mut self.time_buf, response);
        fft.forward(&mut self.time_buf, &mut self.ir_spec).map_err(fft_err)?;

        for (x, h) in self.block_spec.iter_mut().zip(self.ir_spec.iter()) {
            *x *= *h;
        }
        fft.inverse(&mut self.block_spec, &mut self.time_buf).map_err(fft_err)?;

        let start = (m - 1) / 2;
        Ok(self.time_buf[start..start + n].to_vec())
    }

    pub fn process(&mut self, block: &AudioBlock, response: &ImpulseResponse) -> Result<ProcessedBlock> {
        let mut out = self.convolve_same(block.samples(), response.taps())?;
        normalize_peak(&mut out);
        Ok(ProcessedBlock::new(out))
    }
}
