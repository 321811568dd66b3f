//! Error types for the whistle-to-MIDI system

use std::fmt;

/// Custom error type for transcription and export
#[derive(Debug, Clone)]
pub enum TranscribeError {
    /// E001: Invalid audio format (e.g., unsupported WAV encoding)
    InvalidAudioFormat(String),
    /// E002: Unsupported sample rate
    UnsupportedSampleRate(u32),
    /// E003: Configuration validation failed
    ConfigValidationFailed(String),
    /// E004: Audio file I/O error
    AudioFileError(String),
    /// E005: Preprocessing render error
    PreprocessError(String),
    /// E006: Pitch estimation error
    PitchEstimationError(String),
    /// E007: Note event cannot be encoded (bad pitch or duration)
    InvalidNoteEvent(String),
    /// E008: Delta time exceeds the variable-length quantity range
    EventTooLarge(u64),
    /// E009: Processing pipeline error
    ProcessingPipelineError(String),
    /// E010: MIDI export error
    MidiExportError(String),
    /// E011: Analysis export error
    AnalysisExportError(String),
    /// E012: QA artifact generation error
    QaGenerationError(String),
    /// E013: Input validation error
    InputValidationError(String),
    /// E014: Note name could not be parsed
    InvalidNoteName(String),
    /// E015: MIDI byte stream could not be decoded
    MidiDecodeError(String),
}

impl fmt::Display for TranscribeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscribeError::InvalidAudioFormat(msg) => {
                write!(f, "E001: Invalid audio format - {}", msg)
            }
            TranscribeError::UnsupportedSampleRate(sr) => {
                write!(f, "E002: Unsupported sample rate {} Hz", sr)
            }
            TranscribeError::ConfigValidationFailed(msg) => {
                write!(f, "E003: Configuration validation failed - {}", msg)
            }
            TranscribeError::AudioFileError(msg) => {
                write!(f, "E004: Audio file I/O error - {}", msg)
            }
            TranscribeError::PreprocessError(msg) => {
                write!(f, "E005: Preprocessing error - {}", msg)
            }
            TranscribeError::PitchEstimationError(msg) => {
                write!(f, "E006: Pitch estimation error - {}", msg)
            }
            TranscribeError::InvalidNoteEvent(msg) => {
                write!(f, "E007: Invalid note event - {}", msg)
            }
            TranscribeError::EventTooLarge(value) => {
                write!(
                    f,
                    "E008: Event too large - {} ticks exceeds the variable-length maximum of {}",
                    value,
                    crate::midi::VLQ_MAX
                )
            }
            TranscribeError::ProcessingPipelineError(msg) => {
                write!(f, "E009: Processing pipeline error - {}", msg)
            }
            TranscribeError::MidiExportError(msg) => {
                write!(f, "E010: MIDI export error - {}", msg)
            }
            TranscribeError::AnalysisExportError(msg) => {
                write!(f, "E011: Analysis export error - {}", msg)
            }
            TranscribeError::QaGenerationError(msg) => {
                write!(f, "E012: QA artifact generation error - {}", msg)
            }
            TranscribeError::InputValidationError(msg) => {
                write!(f, "E013: Input validation error - {}", msg)
            }
            TranscribeError::InvalidNoteName(name) => {
                write!(f, "E014: Invalid note name '{}'", name)
            }
            TranscribeError::MidiDecodeError(msg) => {
                write!(f, "E015: MIDI decode error - {}", msg)
            }
        }
    }
}

impl std::error::Error for TranscribeError {}

// From implementations for common error types
impl From<std::io::Error> for TranscribeError {
    fn from(err: std::io::Error) -> Self {
        TranscribeError::AudioFileError(format!("File I/O error: {}", err))
    }
}

impl From<serde_json::Error> for TranscribeError {
    fn from(err: serde_json::Error) -> Self {
        TranscribeError::AnalysisExportError(format!("JSON serialization error: {}", err))
    }
}

impl From<hound::Error> for TranscribeError {
    fn from(err: hound::Error) -> Self {
        match err {
            hound::Error::IoError(e) => TranscribeError::AudioFileError(e.to_string()),
            other => TranscribeError::InvalidAudioFormat(other.to_string()),
        }
    }
}

impl From<anyhow::Error> for TranscribeError {
    fn from(err: anyhow::Error) -> Self {
        TranscribeError::ProcessingPipelineError(format!("Generic error: {}", err))
    }
}

/// Result type alias for transcription operations
pub type Result<T> = std::result::Result<T, TranscribeError>;
