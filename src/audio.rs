//! Audio I/O and basic signal statistics

use crate::analysis::{Frame, NoNotesReason, NoteEvent};
use crate::config::Config;
use crate::error::{Result as TranscribeResult, TranscribeError};
use hound::WavReader;
use std::path::Path;

/// Audio state carried through the transcription passes
#[derive(Debug, Clone)]
pub struct AudioState {
    /// Audio samples (mono, channel 0 of the input)
    pub y: Vec<f32>,
    /// Sample rate in Hz
    pub sr: u32,
    /// Configuration snapshot for this invocation
    pub config: Config,

    // Pass 0: Filtering, compression, normalization
    pub y_processed: Option<Vec<f32>>,

    // Pass 1: Per-window pitch estimates
    pub frames: Vec<Frame>,

    // Pass 2: Median-smoothed estimates
    pub smoothed_frames: Vec<Frame>,

    // Pass 3: Note aggregation
    pub notes: Vec<NoteEvent>,
}

impl AudioState {
    /// Load audio file and create initial state
    pub fn load<P: AsRef<Path>>(path: P, config: &Config) -> TranscribeResult<Self> {
        let (y, sr) = load_audio_file(path)?;
        Ok(Self::from_samples(y, sr, config))
    }

    /// Create a state from an already decoded buffer
    pub fn from_samples(samples: Vec<f32>, sr: u32, config: &Config) -> Self {
        AudioState {
            y: samples,
            sr,
            config: config.clone(),
            y_processed: None,
            frames: Vec::new(),
            smoothed_frames: Vec::new(),
            notes: Vec::new(),
        }
    }

    /// Get audio duration in seconds
    pub fn duration_sec(&self) -> f32 {
        if self.sr == 0 {
            return 0.0;
        }
        self.y.len() as f32 / self.sr as f32
    }

    /// Get number of samples
    pub fn n_samples(&self) -> usize {
        self.y.len()
    }

    /// Samples to analyze: the processed buffer once pass 0 has run
    pub fn analysis_samples(&self) -> &[f32] {
        self.y_processed.as_deref().unwrap_or(&self.y)
    }

    /// Duration of one analysis frame in seconds
    pub fn frame_duration_sec(&self) -> f32 {
        if self.sr == 0 {
            return 0.0;
        }
        self.config.frame_duration_sec(self.sr)
    }

    /// Explain an empty result, or `None` when notes were found
    pub fn no_notes_reason(&self) -> Option<NoNotesReason> {
        if !self.notes.is_empty() {
            return None;
        }
        if self.y.len() < self.config.pitch.window_size {
            Some(NoNotesReason::EmptyBuffer)
        } else if self.smoothed_frames.iter().all(|f| !f.is_voiced()) {
            Some(NoNotesReason::TooQuiet)
        } else {
            Some(NoNotesReason::NoStableNotes)
        }
    }
}

/// Load audio file and return channel-0 samples with sample rate
pub fn load_audio_file<P: AsRef<Path>>(path: P) -> TranscribeResult<(Vec<f32>, u32)> {
    let path = path.as_ref();

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
        .to_lowercase();

    match extension.as_str() {
        "wav" | "wave" => load_wav_file(path),
        _ => Err(TranscribeError::InvalidAudioFormat(format!(
            "Unsupported audio format: '{}' (decode to WAV first)",
            extension
        ))),
    }
}

/// Load WAV file, keeping only the first channel
fn load_wav_file<P: AsRef<Path>>(path: P) -> TranscribeResult<(Vec<f32>, u32)> {
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();

    if spec.channels == 0 {
        return Err(TranscribeError::InvalidAudioFormat(
            "WAV header declares zero channels".to_string(),
        ));
    }

    if spec.bits_per_sample == 0 || spec.bits_per_sample > 32 {
        return Err(TranscribeError::InvalidAudioFormat(format!(
            "Unsupported bit depth: {}",
            spec.bits_per_sample
        )));
    }

    let sr = spec.sample_rate;
    let channels = spec.channels as usize;
    let mut samples: Vec<f32> = Vec::with_capacity(reader.len() as usize / channels);

    match spec.sample_format {
        hound::SampleFormat::Int => {
            let max_value = (1i64 << (spec.bits_per_sample - 1)) as f32;
            for (i, sample) in reader.samples::<i32>().enumerate() {
                let sample = sample?;
                if i % channels == 0 {
                    samples.push(sample as f32 / max_value);
                }
            }
        }
        hound::SampleFormat::Float => {
            for (i, sample) in reader.samples::<f32>().enumerate() {
                let sample = sample?;
                if i % channels == 0 {
                    samples.push(sample);
                }
            }
        }
    }

    log::debug!(
        "Loaded {} samples at {} Hz ({} channel(s), {}-bit {:?})",
        samples.len(),
        sr,
        spec.channels,
        spec.bits_per_sample,
        spec.sample_format
    );

    Ok((samples, sr))
}

/// Validate the input file and its sample rate.
///
/// Silent or very short recordings are not rejected here: the pipeline
/// reports them as an empty note sequence instead.
pub fn validate_audio_file<P: AsRef<Path>>(path: P) -> TranscribeResult<()> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(TranscribeError::InputValidationError(format!(
            "Audio file does not exist: {}",
            path.display()
        )));
    }

    let (samples, sr) = load_audio_file(path)?;
    validate_sample_rate(sr)?;

    let p = peak(&samples);
    if p > 0.99 {
        log::warn!("Audio file may be clipped (peak = {:.3})", p);
    }

    Ok(())
}

/// Reject sample rates outside 8-192 kHz
pub fn validate_sample_rate(sr: u32) -> TranscribeResult<()> {
    if !(8000..=192000).contains(&sr) {
        return Err(TranscribeError::UnsupportedSampleRate(sr));
    }
    Ok(())
}

/// Root-mean-square amplitude
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    (samples.iter().map(|&x| x * x).sum::<f32>() / samples.len() as f32).sqrt()
}

/// Maximum absolute sample value
pub fn peak(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |acc, &x| acc.max(x.abs()))
}

/// Write a mono 32-bit float WAV file
pub fn write_wav_file<P: AsRef<Path>>(path: P, samples: &[f32], sr: u32) -> TranscribeResult<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: sr,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    #[test]
    fn test_rms_and_peak() {
        assert_eq!(rms(&[]), 0.0);
        assert_eq!(peak(&[]), 0.0);

        let sine: Vec<f32> = (0..44100)
            .map(|i| (2.0 * PI * 440.0 * i as f32 / 44100.0).sin())
            .collect();
        assert!((rms(&sine) - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-3);
        assert!((peak(&[0.2, -0.7, 0.5]) - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_sample_rate_validation() {
        assert!(validate_sample_rate(44100).is_ok());
        assert!(validate_sample_rate(8000).is_ok());
        assert!(matches!(
            validate_sample_rate(4000),
            Err(TranscribeError::UnsupportedSampleRate(4000))
        ));
    }

    #[test]
    fn test_unsupported_extension() {
        let err = load_audio_file("take.mp3").unwrap_err();
        assert!(matches!(err, TranscribeError::InvalidAudioFormat(_)));
    }

    #[test]
    fn test_no_notes_reason() {
        let config = Config::default();
        let state = AudioState::from_samples(vec![0.0; 100], 44100, &config);
        assert_eq!(state.no_notes_reason(), Some(NoNotesReason::EmptyBuffer));

        let mut state = AudioState::from_samples(vec![0.0; 44100], 44100, &config);
        state.smoothed_frames = vec![Frame::Unvoiced; 10];
        assert_eq!(state.no_notes_reason(), Some(NoNotesReason::TooQuiet));

        state.smoothed_frames[3] = Frame::Voiced(70.0);
        assert_eq!(state.no_notes_reason(), Some(NoNotesReason::NoStableNotes));

        state.notes.push(NoteEvent::note(70, 1.0));
        assert_eq!(state.no_notes_reason(), None);
    }
}
