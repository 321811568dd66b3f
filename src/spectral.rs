//! Spectral processing utilities (difference function, CMNDF, framing)

use rustfft::{num_complex::Complex64, Fft, FftPlanner};
use std::sync::Arc;

/// Relative level below which FFT-derived differences are treated as zero
const FFT_NOISE_FLOOR: f64 = 1e-5;

/// Number of full analysis windows of `window` samples taken every `hop`
/// samples from a buffer of `n_samples`
pub fn frame_count(n_samples: usize, window: usize, hop: usize) -> usize {
    if hop == 0 || window == 0 || n_samples < window {
        0
    } else {
        (n_samples - window) / hop + 1
    }
}

/// Squared-difference function, computed directly.
///
/// `d[tau] = sum_{i < W/2} (x[i] - x[i + tau])^2` for `tau` in `0..W/2`.
pub fn difference_function_direct(signal: &[f32]) -> Vec<f32> {
    let size = signal.len() / 2;
    let mut df = vec![0.0f32; size];

    for (tau, d) in df.iter_mut().enumerate() {
        let mut sum = 0.0f32;
        for i in 0..size {
            let delta = signal[i] - signal[i + tau];
            sum += delta * delta;
        }
        *d = sum;
    }

    df
}

/// Squared-difference function via FFT cross-correlation.
///
/// Plans for a single call; use [`DifferenceFft`] to reuse them across
/// windows.
pub fn difference_function_fft(signal: &[f32]) -> Vec<f32> {
    DifferenceFft::new(signal.len()).compute(signal)
}

/// FFT plans for the difference function at one window length.
///
/// Plans are immutable once built, so one instance can serve every rayon
/// worker.
#[derive(Clone)]
pub struct DifferenceFft {
    window_len: usize,
    fft_len: usize,
    forward: Arc<dyn Fft<f64>>,
    inverse: Arc<dyn Fft<f64>>,
}

impl DifferenceFft {
    pub fn new(window_len: usize) -> Self {
        let fft_len = (window_len + window_len / 2).next_power_of_two();
        let mut planner = FftPlanner::<f64>::new();
        Self {
            window_len,
            fft_len,
            forward: planner.plan_fft_forward(fft_len),
            inverse: planner.plan_fft_inverse(fft_len),
        }
    }

    pub fn window_len(&self) -> usize {
        self.window_len
    }

    /// Expands the square into `E_head + E(tau) - 2 r(tau)`, where `E_head`
    /// is the energy of `x[0..W/2]`, `E(tau)` the energy of
    /// `x[tau..tau + W/2]`, and `r(tau)` the cross-correlation of the head
    /// against the full window.
    ///
    /// A signal of another length gets a one-off plan.
    pub fn compute(&self, signal: &[f32]) -> Vec<f32> {
        if signal.len() != self.window_len {
            return DifferenceFft::new(signal.len()).compute(signal);
        }

        let size = signal.len() / 2;
        if size == 0 {
            return Vec::new();
        }

        let zero = Complex64::new(0.0, 0.0);
        let mut head: Vec<Complex64> = vec![zero; self.fft_len];
        for (dst, &x) in head.iter_mut().zip(&signal[..size]) {
            *dst = Complex64::new(x as f64, 0.0);
        }
        let mut full: Vec<Complex64> = vec![zero; self.fft_len];
        for (dst, &x) in full.iter_mut().zip(signal) {
            *dst = Complex64::new(x as f64, 0.0);
        }

        self.forward.process(&mut head);
        self.forward.process(&mut full);

        // conj(H) * F gives r(tau) = sum_i head[i] * full[i + tau]
        let mut corr: Vec<Complex64> = head
            .iter()
            .zip(&full)
            .map(|(h, f)| h.conj() * f)
            .collect();
        self.inverse.process(&mut corr);
        let scale = 1.0 / self.fft_len as f64;

        // Prefix sums of squares for the sliding energy term
        let mut prefix = Vec::with_capacity(signal.len() + 1);
        prefix.push(0.0f64);
        for &x in signal {
            let last = *prefix.last().unwrap_or(&0.0);
            prefix.push(last + (x as f64) * (x as f64));
        }
        let head_energy = prefix[size];
        // Rounding error follows the energy of the whole window, not of the
        // two halves being compared
        let floor = FFT_NOISE_FLOOR * prefix[signal.len()];

        (0..size)
            .map(|tau| {
                let window_energy = prefix[tau + size] - prefix[tau];
                let d = head_energy + window_energy - 2.0 * corr[tau].re * scale;
                if d <= floor {
                    0.0
                } else {
                    d as f32
                }
            })
            .collect()
    }
}

/// Cumulative-mean-normalized difference function.
///
/// `cmndf[0] = 1`; `cmndf[tau] = d[tau] / ((1/tau) * sum_{k=1..=tau} d[k])`.
/// Where the running sum is zero the value is 1.
pub fn cumulative_mean_normalized(df: &[f32]) -> Vec<f32> {
    let mut cmndf = vec![1.0f32; df.len()];
    let mut running_sum = 0.0f32;

    for tau in 1..df.len() {
        running_sum += df[tau];
        cmndf[tau] = if running_sum > 0.0 {
            df[tau] * tau as f32 / running_sum
        } else {
            1.0
        };
    }

    cmndf
}

/// Parabolic interpolation of a minimum at `idx`; returns a fractional index
pub fn parabolic_minimum(values: &[f32], idx: usize) -> f32 {
    if idx == 0 || idx + 1 >= values.len() {
        return idx as f32;
    }

    let (a, b, c) = (values[idx - 1], values[idx], values[idx + 1]);
    let denom = a - 2.0 * b + c;
    if denom.abs() < f32::EPSILON {
        return idx as f32;
    }

    let offset = 0.5 * (a - c) / denom;
    if offset.abs() > 1.0 {
        idx as f32
    } else {
        idx as f32 + offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn sine(freq: f32, sr: f32, n: usize) -> Vec<f32> {
        (0..n)
            .map(|i| (2.0 * PI * freq * i as f32 / sr).sin() * 0.5)
            .collect()
    }

    #[test]
    fn test_frame_count() {
        assert_eq!(frame_count(2048, 2048, 512), 1);
        assert_eq!(frame_count(2047, 2048, 512), 0);
        assert_eq!(frame_count(44100, 2048, 512), (44100 - 2048) / 512 + 1);
        assert_eq!(frame_count(4096, 2048, 0), 0);
    }

    #[test]
    fn test_fft_matches_direct() {
        let signal = sine(523.25, 44100.0, 2048);
        let direct = difference_function_direct(&signal);
        let fast = difference_function_fft(&signal);

        assert_eq!(direct.len(), 1024);
        assert_eq!(fast.len(), direct.len());
        for (tau, (&d, &f)) in direct.iter().zip(&fast).enumerate() {
            assert!(
                (d - f).abs() < 1e-2 * (1.0 + d.abs()),
                "lag {}: direct {} vs fft {}",
                tau,
                d,
                f
            );
        }
    }

    #[test]
    fn test_fft_matches_direct_on_onset_window() {
        // Silent first half, tone starting in the second half
        let mut signal = vec![0.0f32; 1024];
        signal.extend(sine(880.0, 44100.0, 1024));
        let direct = difference_function_direct(&signal);
        let fast = difference_function_fft(&signal);

        for (tau, (&d, &f)) in direct.iter().zip(&fast).enumerate() {
            assert!(
                (d - f).abs() < 2e-3 * (1.0 + d.abs()),
                "lag {}: direct {} vs fft {}",
                tau,
                d,
                f
            );
        }
        let cmndf = cumulative_mean_normalized(&fast);
        assert!(cmndf[1..].iter().all(|&v| v > 0.5));
    }

    #[test]
    fn test_plan_reuse_and_other_lengths() {
        let plan = DifferenceFft::new(2048);
        let a = sine(440.0, 44100.0, 2048);
        let b = sine(660.0, 44100.0, 2048);
        assert_eq!(plan.compute(&a), difference_function_fft(&a));
        assert_eq!(plan.compute(&b), difference_function_fft(&b));

        let short = sine(440.0, 44100.0, 512);
        assert_eq!(plan.compute(&short).len(), 256);
        assert!(plan.compute(&[]).is_empty());
    }

    #[test]
    fn test_difference_zero_lag() {
        let signal = sine(440.0, 44100.0, 512);
        let df = difference_function_direct(&signal);
        assert_eq!(df[0], 0.0);
    }

    #[test]
    fn test_cmndf_constant_signal() {
        let df = difference_function_direct(&[0.5; 64]);
        let cmndf = cumulative_mean_normalized(&df);
        assert!(cmndf.iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_cmndf_dips_at_period() {
        // 441 Hz at 44.1 kHz has a period of exactly 100 samples
        let signal = sine(441.0, 44100.0, 2048);
        let cmndf = cumulative_mean_normalized(&difference_function_direct(&signal));
        assert!(cmndf[100] < 0.01);
        assert!(cmndf[50] > 1.0);
    }

    #[test]
    fn test_parabolic_minimum() {
        let values = [4.0, 1.0, 0.0, 1.0, 4.0];
        assert!((parabolic_minimum(&values, 2) - 2.0).abs() < 1e-6);

        let skewed = [3.0, 0.5, 1.0, 5.0];
        let refined = parabolic_minimum(&skewed, 1);
        assert!(refined > 1.0 && refined < 1.5);

        assert_eq!(parabolic_minimum(&values, 0), 0.0);
    }
}
