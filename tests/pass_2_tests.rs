//! Validation tests for Pass 2: Median Frame Smoothing

use whistle2midi::analysis::Frame;
use whistle2midi::audio::AudioState;
use whistle2midi::config::Config;
use whistle2midi::error::TranscribeError;
use whistle2midi::passes::pass_2::{self, median_smooth};

/// Stable pitch track with isolated glitches every `period` frames
fn generate_glitchy_track(n_frames: usize, pitch: f32, period: usize) -> Vec<Frame> {
    (0..n_frames)
        .map(|i| {
            if i % period == period / 2 {
                Frame::Voiced(pitch + 12.0)
            } else {
                Frame::Voiced(pitch)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removes_isolated_octave_jumps() {
        let frames = generate_glitchy_track(50, 69.0, 10);
        let smoothed = median_smooth(&frames, 3);

        assert_eq!(smoothed.len(), frames.len());
        assert!(smoothed.iter().all(|f| *f == Frame::Voiced(69.0)));
    }

    #[test]
    fn test_fills_single_frame_dropout() {
        let frames = vec![
            Frame::Voiced(72.0),
            Frame::Voiced(72.0),
            Frame::Unvoiced,
            Frame::Voiced(72.0),
            Frame::Voiced(72.0),
        ];
        assert_eq!(median_smooth(&frames, 3)[2], Frame::Voiced(72.0));
    }

    #[test]
    fn test_long_silence_stays_unvoiced() {
        let mut frames = vec![Frame::Voiced(60.0); 5];
        frames.extend(vec![Frame::Unvoiced; 5]);
        frames.extend(vec![Frame::Voiced(64.0); 5]);

        let smoothed = median_smooth(&frames, 3);
        for frame in &smoothed[6..9] {
            assert_eq!(*frame, Frame::Unvoiced);
        }
        assert_eq!(smoothed[4], Frame::Voiced(60.0));
        assert_eq!(smoothed[10], Frame::Voiced(64.0));
    }

    #[test]
    fn test_step_edges_are_preserved() {
        let mut frames = vec![Frame::Voiced(60.0); 6];
        frames.extend(vec![Frame::Voiced(67.0); 6]);

        let smoothed = median_smooth(&frames, 5);
        assert_eq!(smoothed[5], Frame::Voiced(60.0));
        assert_eq!(smoothed[6], Frame::Voiced(67.0));
    }

    #[test]
    fn test_empty_input() {
        assert!(median_smooth(&[], 3).is_empty());
    }

    #[test]
    fn test_run_rejects_even_window() {
        let mut config = Config::default();
        config.smoothing.median_window = 4;
        let mut state = AudioState::from_samples(Vec::new(), 44100, &config);
        state.frames = vec![Frame::Voiced(60.0); 4];

        let result = pass_2::run(&mut state, &config);
        assert!(matches!(result, Err(TranscribeError::ConfigValidationFailed(_))));
    }

    #[test]
    fn test_run_fills_smoothed_frames() {
        let config = Config::default();
        let mut state = AudioState::from_samples(Vec::new(), 44100, &config);
        state.frames = generate_glitchy_track(20, 76.0, 7);

        pass_2::run(&mut state, &config).unwrap();
        assert_eq!(state.smoothed_frames.len(), 20);
        assert!(state.smoothed_frames.iter().all(|f| *f == Frame::Voiced(76.0)));
    }
}
