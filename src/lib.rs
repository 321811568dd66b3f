//! Whistle-to-MIDI Transcription System
//!
//! A deterministic signal processing pipeline that turns a monophonic
//! whistled or hummed melody into quantized note events and a Standard MIDI
//! File.

pub mod analysis;
pub mod audio;
pub mod config;
pub mod error;
pub mod filters;
pub mod midi;
pub mod passes;
pub mod qa;
pub mod spectral;

pub use analysis::{NoteEvent, Track};
pub use audio::AudioState;
pub use config::Config;
pub use error::{Result as TranscribeResult, TranscribeError};

use std::path::{Path, PathBuf};

/// Main processing pipeline for whistle-to-MIDI conversion
pub struct Transcriber {
    config: Config,
}

impl Transcriber {
    /// Create a new transcriber with the given configuration
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Transcribe a decoded mono buffer. Silent or empty input gives an
    /// empty note sequence; see [`AudioState::no_notes_reason`].
    pub fn transcribe_samples(&self, samples: Vec<f32>, sr: u32) -> TranscribeResult<AudioState> {
        let mut state = AudioState::from_samples(samples, sr, &self.config);
        self.run_pipeline(&mut state)?;
        Ok(state)
    }

    /// Same as [`Transcriber::transcribe_samples`], awaiting the
    /// preprocessing render instead of blocking on it
    pub async fn transcribe_async(
        &self,
        samples: Vec<f32>,
        sr: u32,
    ) -> TranscribeResult<AudioState> {
        let mut state = AudioState::from_samples(samples, sr, &self.config);
        audio::validate_sample_rate(state.sr)?;
        passes::pass_0::run_async(&mut state, &self.config).await?;
        self.run_analysis(&mut state)?;
        Ok(state)
    }

    /// Process an audio file and write MIDI, analysis and QA output.
    /// Returns the MIDI path, or `None` when nothing was transcribed.
    pub fn process<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        input_path: P,
        output_dir: Q,
        title: &str,
    ) -> TranscribeResult<Option<PathBuf>> {
        let mut state = AudioState::load(input_path, &self.config)?;

        self.run_pipeline(&mut state)?;

        if let Some(reason) = state.no_notes_reason() {
            log::warn!("{}", reason.user_message(self.config.source));
        }

        self.export_results(&state, output_dir.as_ref(), title)
    }

    /// Execute the complete multi-pass pipeline
    pub fn run_pipeline(&self, state: &mut AudioState) -> TranscribeResult<()> {
        audio::validate_sample_rate(state.sr)?;

        // Pass 0: Filtering, Compression & Normalization
        passes::pass_0::run(state, &self.config)?;

        self.run_analysis(state)
    }

    fn run_analysis(&self, state: &mut AudioState) -> TranscribeResult<()> {
        // Pass 1: Windowed YIN Pitch Estimation
        passes::pass_1::run(state, &self.config)?;

        // Pass 2: Median Frame Smoothing
        passes::pass_2::run(state, &self.config)?;

        // Pass 3: Note Aggregation & Quantization
        passes::pass_3::run(state, &self.config)?;

        Ok(())
    }

    /// Export MIDI and analysis results
    fn export_results(
        &self,
        state: &AudioState,
        output_dir: &Path,
        title: &str,
    ) -> TranscribeResult<Option<PathBuf>> {
        let midi_path = midi::export_midi(state, output_dir, &self.config, title)?;
        analysis::export_analysis(state, output_dir)?;
        if self.config.qa.enabled {
            qa::generate_artifacts(state, output_dir)?;
        }
        Ok(midi_path)
    }
}

/// Validate configuration and input files
pub fn validate_input<P: AsRef<Path>>(input_path: P, config: &Config) -> TranscribeResult<()> {
    // Check input file exists and is valid audio
    audio::validate_audio_file(input_path)?;

    config::validate_config(config)?;

    Ok(())
}
