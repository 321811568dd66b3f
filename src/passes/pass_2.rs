//! Pass 2: Median Frame Smoothing

use crate::analysis::Frame;
use crate::audio::AudioState;
use crate::config::Config;
use crate::error::{Result as TranscribeResult, TranscribeError};

/// Centered sliding median over voiced frames.
///
/// Unvoiced frames are skipped inside each window; a position becomes
/// unvoiced only when its whole window is unvoiced. For an even number of
/// voiced values the upper median is used. Output length equals input length.
pub fn median_smooth(frames: &[Frame], window: usize) -> Vec<Frame> {
    let half = window / 2;
    let mut values: Vec<f32> = Vec::with_capacity(window);

    (0..frames.len())
        .map(|i| {
            let start = i.saturating_sub(half);
            let end = (i + half + 1).min(frames.len());

            values.clear();
            values.extend(frames[start..end].iter().filter_map(Frame::midi));

            if values.is_empty() {
                Frame::Unvoiced
            } else {
                values.sort_by(|a, b| a.total_cmp(b));
                Frame::Voiced(values[values.len() / 2])
            }
        })
        .collect()
}

pub fn run(state: &mut AudioState, config: &Config) -> TranscribeResult<()> {
    log::info!("Pass 2: Median Frame Smoothing");

    let window = config.smoothing.median_window;
    if window == 0 || window % 2 == 0 {
        return Err(TranscribeError::ConfigValidationFailed(format!(
            "median window must be odd, got {}",
            window
        )));
    }

    state.smoothed_frames = median_smooth(&state.frames, window);

    let changed = state
        .frames
        .iter()
        .zip(&state.smoothed_frames)
        .filter(|(a, b)| a != b)
        .count();
    log::debug!("  window {}, {} frames changed", window, changed);

    log::info!("  ✓ Pass 2 complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_of_one_is_identity() {
        let frames = vec![Frame::Voiced(60.0), Frame::Unvoiced, Frame::Voiced(72.0)];
        assert_eq!(median_smooth(&frames, 1), frames);
    }

    #[test]
    fn test_upper_median_for_even_count() {
        // At the first position only two values are in range
        let frames = vec![Frame::Voiced(60.0), Frame::Voiced(62.0), Frame::Voiced(61.0)];
        let out = median_smooth(&frames, 3);
        assert_eq!(out[0], Frame::Voiced(62.0));
        assert_eq!(out[1], Frame::Voiced(61.0));
    }
}
