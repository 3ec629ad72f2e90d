use rustfft::num_complex::Complex;

/// Below this peak a block counts as silence and normalizes to zeros.
pub const SILENCE_PEAK: f32 = 1e-6;

/// 16-bit capture value to [-1, 1).
#[inline]
pub fn i16_to_unit(x: i16) -> f32 {
    x as f32 / 32768.0
}

/// [-1, 1] playback value to 16-bit, saturating.
#[inline]
pub fn unit_to_i16(x: f32) -> i16 {
    (x * 32767.0).clamp(-32768.0, 32767.0) as i16
}

pub fn peak_abs(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |m, &x| m.max(x.abs()))
}

pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    (samples.iter().map(|x| x * x).sum::<f32>() / samples.len() as f32).sqrt()
}

/// Scales so the peak magnitude is exactly 1.0, or zeroes a near-silent block.
pub fn normalize_peak(samples: &mut [f32]) {
    let peak = peak_abs(samples);
    if peak > SILENCE_PEAK {
        let inv = 1.0 / peak;
        for x in samples.iter_mut() {
            *x *= inv;
        }
        // 1/peak rounding can leave the peak a ulp off
        if let Some(p) = samples.iter_mut().max_by(|a, b| a.abs().total_cmp(&b.abs())) {
            *p = p.signum();
        }
    } else {
        samples.iter_mut().for_each(|x| *x = 0.0);
    }
}

#[inline]
pub fn prepare_fft_input_inplace(samples: &[f32], buf: &mut Vec<Complex<f32>>) {
    buf.clear();
    buf.reserve(samples.len());
    buf.extend(samples.iter().map(|&x| Complex { re: x, im: 0.0 }));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn i16_conversion_matches_device_scaling() {
        assert_eq!(i16_to_unit(-32768), -1.0);
        assert_eq!(i16_to_unit(16384), 0.5);
        assert_eq!(unit_to_i16(1.0), 32767);
        assert_eq!(unit_to_i16(-1.0), -32767);
        assert_eq!(unit_to_i16(4.0), 32767);
    }

    #[test]
    fn normalize_scales_peak_to_one() {
        let mut v = vec![0.1, -0.4, 0.2, 0.05];
        normalize_peak(&mut v);
        assert_eq!(peak_abs(&v), 1.0);
        assert_eq!(v[1], -1.0);
        assert!((v[0] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn normalize_zeroes_near_silence() {
        let mut v = vec![1e-7, -5e-7, 0.0];
        normalize_peak(&mut v);
        assert!(v.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn normalize_is_idempotent() {
        let mut v: Vec<f32> = (0..257).map(|i| ((i as f32) * 0.37).sin() * 0.3).collect();
        normalize_peak(&mut v);
        let once = v.clone();
        normalize_peak(&mut v);
        assert_eq!(peak_abs(&v), 1.0);
        for (a, b) in once.iter().zip(v.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn rms_of_constant() {
        assert!((rms(&[0.5; 64]) - 0.5).abs() < 1e-6);
        assert_eq!(rms(&[]), 0.0);
    }
}
