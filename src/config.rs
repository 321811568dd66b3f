//! Configuration system for the whistle-to-MIDI transcriber

use crate::error::{Result as TranscribeResult, TranscribeError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Where the recording came from. Selects filter and tolerance presets,
/// since microphone captures are noisier than imported files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    #[default]
    File,
    Mic,
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceType::File => write!(f, "file"),
            SourceType::Mic => write!(f, "mic"),
        }
    }
}

impl FromStr for SourceType {
    type Err = TranscribeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "file" => Ok(SourceType::File),
            "mic" | "microphone" => Ok(SourceType::Mic),
            other => Err(TranscribeError::ConfigValidationFailed(format!(
                "unknown source type '{}' (expected 'file' or 'mic')",
                other
            ))),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub version: String,
    pub source: SourceType,
    pub tempo: TempoConfig,
    pub preprocess: PreprocessConfig,
    pub pitch: PitchConfig,
    pub smoothing: SmoothingConfig,
    pub aggregation: AggregationConfig,
    pub export: ExportConfig,
    pub qa: QaConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self::for_source(SourceType::File)
    }
}

impl Config {
    /// Build the preset configuration for a source type
    pub fn for_source(source: SourceType) -> Self {
        let mut config = Self {
            version: "1.0".to_string(),
            source,
            tempo: TempoConfig::default(),
            preprocess: PreprocessConfig::default(),
            pitch: PitchConfig::default(),
            smoothing: SmoothingConfig::default(),
            aggregation: AggregationConfig::default(),
            export: ExportConfig::default(),
            qa: QaConfig::default(),
        };
        config.apply_source_preset(source);
        config
    }

    /// Overwrite the source-dependent fields with the preset for `source`.
    /// Tempo, sensitivity and export settings are left untouched.
    pub fn apply_source_preset(&mut self, source: SourceType) {
        self.source = source;
        match source {
            SourceType::File => {
                self.preprocess.highpass_hz = 200.0;
                self.preprocess.lowpass_hz = 6000.0;
                self.pitch.silence_threshold = 0.01;
                self.pitch.yin_tolerance = 0.25;
                self.aggregation.fuzzy_tolerance_semitones = 0.5;
                self.aggregation.merge_tolerance_semitones = 0.4;
                self.aggregation.merge_gap_sec = 0.2;
            }
            SourceType::Mic => {
                self.preprocess.highpass_hz = 300.0;
                self.preprocess.lowpass_hz = 5000.0;
                self.pitch.silence_threshold = 0.02;
                self.pitch.yin_tolerance = 0.2;
                self.aggregation.fuzzy_tolerance_semitones = 0.5;
                self.aggregation.merge_tolerance_semitones = 0.6;
                self.aggregation.merge_gap_sec = 0.25;
            }
        }
    }

    /// Duration of one analysis frame in seconds
    pub fn frame_duration_sec(&self, sr: u32) -> f32 {
        self.pitch.hop_size as f32 / sr as f32
    }
}

/// Tempo configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TempoConfig {
    pub bpm: f32,
}

impl Default for TempoConfig {
    fn default() -> Self {
        Self { bpm: 120.0 }
    }
}

/// Filter and dynamics preprocessing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    pub highpass_hz: f32,
    pub lowpass_hz: f32,
    pub filter_q: f32,
    pub compressor: CompressorConfig,
    pub normalize_peak: f32,
    pub normalize_epsilon: f32,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            highpass_hz: 200.0,
            lowpass_hz: 6000.0,
            filter_q: std::f32::consts::FRAC_1_SQRT_2,
            compressor: CompressorConfig::default(),
            normalize_peak: 0.95,
            normalize_epsilon: 0.001,
        }
    }
}

/// Dynamics compressor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressorConfig {
    pub enabled: bool,
    pub threshold_db: f32,
    pub knee_db: f32,
    pub ratio: f32,
    pub attack_sec: f32,
    pub release_sec: f32,
}

impl Default for CompressorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_db: -30.0,
            knee_db: 30.0,
            ratio: 4.0,
            attack_sec: 0.01,
            release_sec: 0.1,
        }
    }
}

/// Pitch estimation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PitchConfig {
    pub window_size: usize,
    pub hop_size: usize,
    pub silence_threshold: f32,
    pub yin_tolerance: f32,
    pub refine_lags: usize,
    pub use_fft: bool,
    pub parallel: bool,
}

impl Default for PitchConfig {
    fn default() -> Self {
        Self {
            window_size: 2048,
            hop_size: 512,
            silence_threshold: 0.01,
            yin_tolerance: 0.25,
            refine_lags: 10,
            use_fft: true,
            parallel: true,
        }
    }
}

/// Frame smoothing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    pub median_window: usize,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self { median_window: 3 }
    }
}

/// Note aggregation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    pub fuzzy_tolerance_semitones: f32,
    pub merge_tolerance_semitones: f32,
    pub merge_gap_sec: f32,
    pub min_rest_gap_sec: f32,
    /// User "merge sensitivity", 1-12
    pub merge_sensitivity: u8,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            fuzzy_tolerance_semitones: 0.5,
            merge_tolerance_semitones: 0.4,
            merge_gap_sec: 0.2,
            min_rest_gap_sec: 0.1,
            merge_sensitivity: 6,
        }
    }
}

impl AggregationConfig {
    /// Minimum note duration in seconds, mapped linearly from sensitivity
    /// 1..=12 onto 0.02..=0.24 s. Out-of-range values are clamped.
    pub fn min_note_duration_sec(&self) -> f32 {
        self.merge_sensitivity.clamp(1, 12) as f32 * 0.02
    }
}

/// MIDI export configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub velocity: u8,
    pub note_off_velocity: u8,
    pub program: u8,
    pub write_tempo: bool,
    pub write_track_names: bool,
    pub filename_prefix: String,
    pub default_title: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            velocity: 100,
            note_off_velocity: 64,
            program: 1,
            write_tempo: true,
            write_track_names: true,
            filename_prefix: "AudioScore".to_string(),
            default_title: "Untitled".to_string(),
        }
    }
}

/// QA artifact configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QaConfig {
    pub enabled: bool,
    pub generate_images: bool,
    pub plot_size: [u32; 2],
}

impl Default for QaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            generate_images: true,
            plot_size: [1200, 600],
        }
    }
}

/// Validate configuration parameters
pub fn validate_config(config: &Config) -> TranscribeResult<()> {
    let fail = |msg: String| Err(TranscribeError::ConfigValidationFailed(msg));

    let bpm = config.tempo.bpm;
    if !bpm.is_finite() || !(20.0..=300.0).contains(&bpm) {
        return fail(format!("tempo.bpm must be within 20-300, got {}", bpm));
    }

    let sensitivity = config.aggregation.merge_sensitivity;
    if !(1..=12).contains(&sensitivity) {
        return fail(format!(
            "aggregation.merge_sensitivity must be within 1-12, got {}",
            sensitivity
        ));
    }

    let pitch = &config.pitch;
    if pitch.window_size < 4 || pitch.hop_size == 0 {
        return fail("pitch.window_size must be >= 4 and pitch.hop_size > 0".to_string());
    }
    if pitch.hop_size > pitch.window_size {
        return fail(format!(
            "pitch.hop_size ({}) must not exceed pitch.window_size ({})",
            pitch.hop_size, pitch.window_size
        ));
    }
    if !(pitch.yin_tolerance > 0.0 && pitch.yin_tolerance < 1.0) {
        return fail("pitch.yin_tolerance must be in (0, 1)".to_string());
    }
    if pitch.silence_threshold < 0.0 {
        return fail("pitch.silence_threshold must be >= 0".to_string());
    }

    let window = config.smoothing.median_window;
    if window % 2 == 0 || window > 9 {
        return fail(format!(
            "smoothing.median_window must be odd and <= 9, got {}",
            window
        ));
    }

    let pre = &config.preprocess;
    if pre.highpass_hz <= 0.0 || pre.lowpass_hz <= pre.highpass_hz {
        return fail(format!(
            "preprocess cutoffs must satisfy 0 < highpass ({}) < lowpass ({})",
            pre.highpass_hz, pre.lowpass_hz
        ));
    }
    if pre.filter_q <= 0.0 {
        return fail("preprocess.filter_q must be > 0".to_string());
    }
    if pre.compressor.ratio < 1.0 {
        return fail("preprocess.compressor.ratio must be >= 1".to_string());
    }
    if pre.compressor.knee_db < 0.0
        || pre.compressor.attack_sec < 0.0
        || pre.compressor.release_sec < 0.0
    {
        return fail("preprocess.compressor knee/attack/release must be >= 0".to_string());
    }
    if !(pre.normalize_peak > 0.0 && pre.normalize_peak <= 1.0) {
        return fail("preprocess.normalize_peak must be in (0, 1]".to_string());
    }

    let agg = &config.aggregation;
    if agg.fuzzy_tolerance_semitones <= 0.0 || agg.merge_tolerance_semitones <= 0.0 {
        return fail("aggregation tolerances must be > 0".to_string());
    }
    if agg.merge_gap_sec < 0.0 || agg.min_rest_gap_sec < 0.0 {
        return fail("aggregation gap thresholds must be >= 0".to_string());
    }

    let export = &config.export;
    if export.velocity > 127 || export.note_off_velocity > 127 || export.program > 127 {
        return fail("export velocity and program values must be <= 127".to_string());
    }

    Ok(())
}

/// Load configuration from JSON file
pub fn load_config<P: AsRef<std::path::Path>>(path: P) -> anyhow::Result<Config> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&content)?;
    validate_config(&config)?;
    Ok(config)
}

/// Save configuration to JSON file
pub fn save_config<P: AsRef<std::path::Path>>(config: &Config, path: P) -> anyhow::Result<()> {
    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
