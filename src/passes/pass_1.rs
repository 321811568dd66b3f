//! Pass 1: Windowed YIN Pitch Estimation

use crate::analysis::{midi_to_frequency, Frame};
use crate::audio::{rms, AudioState};
use crate::config::{Config, PitchConfig};
use crate::error::{Result as TranscribeResult, TranscribeError};
use crate::spectral::{
    cumulative_mean_normalized, difference_function_direct, frame_count, parabolic_minimum,
    DifferenceFft,
};
use rayon::prelude::*;

/// Thresholds for a single window estimate
#[derive(Debug, Clone, Copy)]
pub struct PitchParams {
    /// Windows with RMS below this are unvoiced
    pub silence_threshold: f32,
    /// CMNDF value a lag must fall below to be a candidate
    pub tolerance: f32,
    /// Minimum forward search span after the first candidate
    pub refine_lags: usize,
    pub use_fft: bool,
    /// Estimates above this frequency are unvoiced
    pub max_frequency_hz: f32,
}

impl PitchParams {
    /// Cap the accepted frequency, e.g. at the preprocessing lowpass
    pub fn with_max_frequency(mut self, max_frequency_hz: f32) -> Self {
        self.max_frequency_hz = self.max_frequency_hz.min(max_frequency_hz);
        self
    }
}

impl From<&PitchConfig> for PitchParams {
    fn from(config: &PitchConfig) -> Self {
        Self {
            silence_threshold: config.silence_threshold,
            tolerance: config.yin_tolerance,
            refine_lags: config.refine_lags,
            use_fft: config.use_fft,
            max_frequency_hz: midi_to_frequency(127.0),
        }
    }
}

/// Estimate the fundamental of one window.
///
/// Pure function of its inputs, safe to call from any thread.
pub fn estimate_pitch(window: &[f32], sr: u32, params: &PitchParams) -> Frame {
    let plan = params.use_fft.then(|| DifferenceFft::new(window.len()));
    estimate_with_plan(window, sr, params, plan.as_ref())
}

fn estimate_with_plan(
    window: &[f32],
    sr: u32,
    params: &PitchParams,
    plan: Option<&DifferenceFft>,
) -> Frame {
    if window.len() < 4 || sr == 0 {
        return Frame::Unvoiced;
    }

    if rms(window) < params.silence_threshold {
        return Frame::Unvoiced;
    }

    let df = match plan {
        Some(plan) => plan.compute(window),
        None => difference_function_direct(window),
    };
    let cmndf = cumulative_mean_normalized(&df);

    best_lag(&cmndf, params).map_or(Frame::Unvoiced, |lag| frame_for_lag(lag, sr, params))
}

/// Lags shorter than `sr / max_frequency_hz` cannot survive the lowpass
fn frame_for_lag(lag: f32, sr: u32, params: &PitchParams) -> Frame {
    if lag <= 0.0 {
        return Frame::Unvoiced;
    }
    let frequency = sr as f32 / lag;
    if frequency > params.max_frequency_hz {
        Frame::Unvoiced
    } else {
        Frame::from_frequency(frequency)
    }
}

/// First lag under tolerance, refined to the smallest value in a forward
/// window and then interpolated
fn best_lag(cmndf: &[f32], params: &PitchParams) -> Option<f32> {
    let size = cmndf.len();
    let candidate = (1..size).find(|&tau| cmndf[tau] < params.tolerance)?;

    // A fixed span under-refines long periods, so it grows with the lag
    let span = params.refine_lags.max(candidate / 4).max(1);
    let end = (candidate + span).min(size);

    let mut min_idx = candidate;
    for tau in candidate + 1..end {
        if cmndf[tau] < cmndf[min_idx] {
            min_idx = tau;
        }
    }

    Some(parabolic_minimum(cmndf, min_idx))
}

/// Estimate every full window of `samples`, in window order
pub fn estimate_frames(samples: &[f32], sr: u32, config: &PitchConfig) -> Vec<Frame> {
    estimate_frames_with(samples, sr, config, &PitchParams::from(config))
}

/// [`estimate_frames`] with explicit thresholds; FFT plans are built once
/// and shared by every window
pub fn estimate_frames_with(
    samples: &[f32],
    sr: u32,
    config: &PitchConfig,
    params: &PitchParams,
) -> Vec<Frame> {
    let window = config.window_size;
    let hop = config.hop_size;
    let n_frames = frame_count(samples.len(), window, hop);
    if n_frames == 0 {
        return Vec::new();
    }
    let plan = params.use_fft.then(|| DifferenceFft::new(window));

    let estimate = |idx: usize| {
        let start = idx * hop;
        estimate_with_plan(&samples[start..start + window], sr, params, plan.as_ref())
    };

    if config.parallel {
        (0..n_frames).into_par_iter().map(estimate).collect()
    } else {
        (0..n_frames).map(estimate).collect()
    }
}

pub fn run(state: &mut AudioState, config: &Config) -> TranscribeResult<()> {
    log::info!("Pass 1: Windowed YIN Pitch Estimation");

    if config.pitch.window_size == 0 || config.pitch.hop_size == 0 {
        return Err(TranscribeError::PitchEstimationError(
            "window and hop sizes must be > 0".to_string(),
        ));
    }

    let params = PitchParams::from(&config.pitch).with_max_frequency(config.preprocess.lowpass_hz);
    let frames = estimate_frames_with(state.analysis_samples(), state.sr, &config.pitch, &params);
    let voiced = frames.iter().filter(|f| f.is_voiced()).count();

    log::debug!(
        "  {} frames ({} voiced), window {} hop {}",
        frames.len(),
        voiced,
        config.pitch.window_size,
        config.pitch.hop_size
    );

    state.frames = frames;

    log::info!("  ✓ Pass 1 complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::frequency_to_midi;
    use std::f32::consts::PI;

    fn params() -> PitchParams {
        PitchParams::from(&PitchConfig::default())
    }

    #[test]
    fn test_silence_is_unvoiced() {
        assert_eq!(estimate_pitch(&[0.0; 2048], 44100, &params()), Frame::Unvoiced);
        assert_eq!(estimate_pitch(&[0.001; 2048], 44100, &params()), Frame::Unvoiced);
    }

    #[test]
    fn test_dc_is_unvoiced() {
        assert_eq!(estimate_pitch(&[0.5; 2048], 44100, &params()), Frame::Unvoiced);
    }

    #[test]
    fn test_a4() {
        let window: Vec<f32> = (0..2048)
            .map(|i| (2.0 * PI * 440.0 * i as f32 / 44100.0).sin() * 0.8)
            .collect();
        let midi = estimate_pitch(&window, 44100, &params()).midi().unwrap();
        assert!((midi - 69.0).abs() < 0.1, "got {}", midi);
    }

    #[test]
    fn test_lag_past_frequency_ceiling_is_unvoiced() {
        let capped = params().with_max_frequency(6000.0);
        // 44.1 kHz / 5 samples = 8.82 kHz
        assert_eq!(frame_for_lag(5.0, 44100, &capped), Frame::Unvoiced);
        assert_eq!(frame_for_lag(0.0, 44100, &capped), Frame::Unvoiced);

        let midi = frame_for_lag(50.0, 44100, &capped).midi().unwrap();
        assert!((midi - frequency_to_midi(882.0)).abs() < 1e-3);

        // Above MIDI 127 even without a lowpass cap
        assert_eq!(frame_for_lag(3.0, 44100, &params()), Frame::Unvoiced);
    }

    #[test]
    fn test_onset_window_is_unvoiced_on_both_paths() {
        let mut window = vec![0.0f32; 1024];
        window.extend((0..1024).map(|i| (2.0 * PI * 880.0 * i as f32 / 44100.0).sin() * 0.5));

        let direct = PitchParams {
            use_fft: false,
            ..params()
        };
        assert_eq!(estimate_pitch(&window, 44100, &params()), Frame::Unvoiced);
        assert_eq!(estimate_pitch(&window, 44100, &direct), Frame::Unvoiced);
    }

    #[test]
    fn test_short_buffer_gives_no_frames() {
        let config = PitchConfig::default();
        assert!(estimate_frames(&[0.5; 1000], 44100, &config).is_empty());
    }
}
