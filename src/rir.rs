//! Image-source room impulse responses.
//!
//! Rectangular room, omnidirectional receiver, uniform wall reflection derived
//! from RT60 through Sabine's formula. Each image source is placed with a
//! Hann-windowed sinc so fractional delays stay band-limited.

use std::f64::consts::PI;

use crate::error::{ReverbError, Result};
use crate::params::RoomParams;
use crate::response::{ImpulseResponse, ImpulseResponseProvider};

/// Cutoff of the DC-blocking high-pass, Hz.
const HIGH_PASS_HZ: f64 = 100.0;

/// Upper bound on the image lattice `(2nx+1)(2ny+1)(2nz+1)`. A 1 m cube at
/// 16 kHz with 4096 taps needs about 7e5.
const MAX_IMAGE_CELLS: f64 = 4.0e6;

#[derive(Debug, Clone)]
pub struct ImageSourceRir {
    /// Highest reflection order to include; `None` keeps every image whose
    /// delay fits in the response.
    pub max_order: Option<u32>,
    pub high_pass: bool,
}

impl Default for ImageSourceRir {
    fn default() -> Self {
        Self {
            max_order: None,
            high_pass: true,
        }
    }
}

/// Uniform wall reflection coefficient for the room and RT60 (Sabine).
pub fn reflection_coefficient(p: &RoomParams) -> Result<f64> {
    let alpha = 24.0 * p.volume() * 10f64.ln() / (p.speed_of_sound * p.surface_area() * p.rt60);
    if !(alpha.is_finite() && alpha >= 0.0) || alpha > 1.0 {
        return Err(ReverbError::AcousticSimulation(format!(
            "absorption {:.3} out of range: room too small for RT60 {:.2}s",
            alpha, p.rt60
        )));
    }
    Ok((1.0 - alpha).sqrt())
}

impl ImageSourceRir {
    fn check_geometry(p: &RoomParams) -> Result<()> {
        if !(p.rt60.is_finite() && p.rt60 > 0.0) {
            return Err(ReverbError::AcousticSimulation(format!(
                "non-positive RT60 {}",
                p.rt60
            )));
        }
        for i in 0..3 {
            let dim = p.room_dimensions[i];
            let inside = |x: f64| x.is_finite() && (0.0..=dim).contains(&x);
            if !(dim > 0.0) || !inside(p.source_position[i]) || !inside(p.receiver_position[i]) {
                return Err(ReverbError::AcousticSimulation(
                    "source or receiver outside the room".into(),
                ));
            }
        }
        Ok(())
    }
}

impl ImpulseResponseProvider for ImageSourceRir {
    fn generate(&self, p: &RoomParams, sample_rate: u32, len: usize) -> Result<ImpulseResponse> {
        Self::check_geometry(p)?;
        let beta = reflection_coefficient(p)?;
        let fs = sample_rate as f64;

        // work in units of samples
        let c_ts = p.speed_of_sound / fs;
        let src = p.source_position.map(|v| v / c_ts);
        let rcv = p.receiver_position.map(|v| v / c_ts);
        let room = p.room_dimensions.map(|v| v / c_ts);

        let tw = 2 * (0.004 * fs).round() as usize;
        let mut window = vec![0.0f64; tw];
        let mut taps = vec![0.0f64; len];

        let reach = room.map(|l| (len as f64 / (2.0 * l)).ceil());
        let cells: f64 = reach.iter().map(|r| 2.0 * r + 1.0).product();
        if !cells.is_finite() || cells > MAX_IMAGE_CELLS {
            return Err(ReverbError::AcousticSimulation(format!(
                "room {:?} m too narrow for a {} tap response",
                p.room_dimensions, len
            )));
        }
        let n = reach.map(|r| r as i64);

        for mx in -n[0]..=n[0] {
            for my in -n[1]..=n[1] {
                for mz in -n[2]..=n[2] {
                    let m = [mx, my, mz];
                    for q in 0..2i64 {
                        for j in 0..2i64 {
                            for k in 0..2i64 {
                                let mirror = [q, j, k];
                                let mut d2 = 0.0;
                                let mut gain = 1.0;
                                let mut order = 0i64;
                                for a in 0..3 {
                                    let image = (1 - 2 * mirror[a]) as f64 * src[a] - rcv[a]
                                        + 2.0 * m[a] as f64 * room[a];
                                    d2 += image * image;
                                    // beta^|m-q| * beta^|m|, one factor per wall
                                    let hits = (m[a] - mirror[a]).abs() + m[a].abs();
                                    gain *= beta.powi(hits as i32);
                                    order += (2 * m[a] - mirror[a]).abs();
                                }
                                if let Some(max) = self.max_order {
                                    if order > max as i64 {
                                        continue;
                                    }
                                }

                                let dist = d2.sqrt();
                                let fdist = dist.floor();
                                if fdist >= len as f64 {
                                    continue;
                                }
                                let amp = gain / (4.0 * PI * dist.max(1e-9) * c_ts);
                                let frac = dist - fdist;
                                for (i, w) in window.iter_mut().enumerate() {
                                    let t = i as f64 + 1.0 - frac;
                                    *w = 0.5 * (1.0 - (2.0 * PI * t / tw as f64).cos())
                                        * sinc(PI * (t - tw as f64 / 2.0));
                                }
                                let start = fdist as i64 - (tw as i64 / 2) + 1;
                                for (i, &w) in window.iter().enumerate() {
                                    let pos = start + i as i64;
                                    if pos >= 0 && (pos as usize) < len {
                                        taps[pos as usize] += amp * w;
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }

        if self.high_pass {
            high_pass_in_place(&mut taps, fs);
        }

        let taps: Vec<f32> = taps.into_iter().map(|v| v as f32).collect();
        if taps.iter().any(|v| !v.is_finite()) {
            return Err(ReverbError::AcousticSimulation(
                "synthesis produced non-finite taps".into(),
            ));
        }
        Ok(ImpulseResponse::new(taps))
    }
}

#[inline]
fn sinc(x: f64) -> f64 {
    if x == 0.0 {
        1.0
    } else {
        x.sin() / x
    }
}

/// Second-order DC-blocking filter from Allen and Berkley.
fn high_pass_in_place(x: &mut [f64], fs: f64) {
    let w = 2.0 * PI * HIGH_PASS_HZ / fs;
    let r1 = (-w).exp();
    let b1 = 2.0 * r1 * w.cos();
    let b2 = -r1 * r1;
    let a1 = -(1.0 + r1);
    let mut y = [0.0f64; 3];
    for v in x.iter_mut() {
        y[2] = y[1];
        y[1] = y[0];
        y[0] = b1 * y[1] + b2 * y[2] + *v;
        *v = y[0] + a1 * y[1] + r1 * y[2];
    }
}
