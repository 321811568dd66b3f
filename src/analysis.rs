//! Shared data structures for transcription results

use crate::audio::AudioState;
use crate::error::{Result as TranscribeResult, TranscribeError};
use crate::midi::note_name_to_midi;
use serde::{Deserialize, Deserializer, Serialize};

/// Smallest representable duration, in beats
pub const BEAT_QUANTUM: f32 = 0.25;

/// One pitch estimate for one analysis window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Frame {
    /// No pitch detected (silence or no periodicity)
    Unvoiced,
    /// Fractional MIDI pitch number
    Voiced(f32),
}

impl Frame {
    /// Build a frame from a frequency in Hz; non-positive or non-finite
    /// frequencies are unvoiced.
    pub fn from_frequency(frequency_hz: f32) -> Self {
        if frequency_hz.is_finite() && frequency_hz > 0.0 {
            Frame::Voiced(frequency_to_midi(frequency_hz))
        } else {
            Frame::Unvoiced
        }
    }

    pub fn midi(&self) -> Option<f32> {
        match self {
            Frame::Voiced(m) => Some(*m),
            Frame::Unvoiced => None,
        }
    }

    pub fn is_voiced(&self) -> bool {
        matches!(self, Frame::Voiced(_))
    }
}

/// Convert frequency in Hz to a fractional MIDI number (A4 = 440 Hz = 69)
pub fn frequency_to_midi(frequency_hz: f32) -> f32 {
    69.0 + 12.0 * (frequency_hz / 440.0).log2()
}

/// Convert a fractional MIDI number to frequency in Hz
pub fn midi_to_frequency(midi: f32) -> f32 {
    440.0 * 2.0f32.powf((midi - 69.0) / 12.0)
}

/// A rest or a voiced note with a duration in beats
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteEvent {
    /// MIDI note number, `None` for a rest. Input may also name the note
    /// (`"C4"`, `"F#3"`).
    #[serde(
        rename = "midi",
        alias = "pitch",
        default,
        deserialize_with = "deserialize_pitch"
    )]
    pub pitch: Option<u8>,
    /// Duration in beats
    pub beats: f32,
    /// Absolute start in beats (arrangement tracks only)
    #[serde(
        rename = "startTime",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub start_time: Option<f32>,
}

fn deserialize_pitch<'de, D>(deserializer: D) -> Result<Option<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum PitchInput {
        Number(u8),
        Name(String),
    }

    match Option::<PitchInput>::deserialize(deserializer)? {
        None => Ok(None),
        Some(PitchInput::Number(midi)) => Ok(Some(midi)),
        Some(PitchInput::Name(name)) => note_name_to_midi(&name)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

impl NoteEvent {
    pub fn note(pitch: u8, beats: f32) -> Self {
        Self {
            pitch: Some(pitch),
            beats,
            start_time: None,
        }
    }

    pub fn rest(beats: f32) -> Self {
        Self {
            pitch: None,
            beats,
            start_time: None,
        }
    }

    /// Attach an absolute start time in beats
    pub fn at(mut self, start_time: f32) -> Self {
        self.start_time = Some(start_time);
        self
    }

    pub fn is_rest(&self) -> bool {
        self.pitch.is_none()
    }
}

/// An instrument label and its notes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub instrument: String,
    pub notes: Vec<NoteEvent>,
}

impl Track {
    pub fn new(instrument: impl Into<String>, notes: Vec<NoteEvent>) -> Self {
        Self {
            instrument: instrument.into(),
            notes,
        }
    }

    /// True when every voiced note carries an absolute start time
    pub fn is_time_tagged(&self) -> bool {
        let mut voiced = self.notes.iter().filter(|n| !n.is_rest()).peekable();
        voiced.peek().is_some() && voiced.all(|n| n.start_time.is_some())
    }

    /// Length of the track in beats
    pub fn total_beats(&self) -> f32 {
        if self.is_time_tagged() {
            self.notes
                .iter()
                .filter(|n| !n.is_rest())
                .map(|n| n.start_time.unwrap_or(0.0) + n.beats)
                .fold(0.0, f32::max)
        } else {
            total_beats(&self.notes)
        }
    }
}

/// Multi-track arrangement produced by an external collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Arrangement {
    pub tracks: Vec<Track>,
}

/// Either a plain note list or an arrangement, as found in note JSON files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Score {
    Melody(Vec<NoteEvent>),
    Arrangement(Arrangement),
}

impl Score {
    /// Tracks to encode; a bare melody becomes a single "Melody" track
    pub fn into_tracks(self) -> Vec<Track> {
        match self {
            Score::Melody(notes) => vec![Track::new("Melody", notes)],
            Score::Arrangement(arrangement) => arrangement.tracks,
        }
    }
}

/// Parse note JSON (a NoteEvent array or `{ "tracks": [...] }`)
pub fn parse_score(json: &str) -> TranscribeResult<Score> {
    serde_json::from_str(json)
        .map_err(|e| TranscribeError::InputValidationError(format!("Invalid note JSON: {}", e)))
}

/// Sum of sequential durations in beats
pub fn total_beats(notes: &[NoteEvent]) -> f32 {
    notes.iter().map(|n| n.beats).sum()
}

/// Why a transcription produced no notes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoNotesReason {
    /// The buffer held no (or too few) samples
    EmptyBuffer,
    /// Every frame was below the silence threshold
    TooQuiet,
    /// Pitch was detected but no group survived the duration filter
    NoStableNotes,
}

impl NoNotesReason {
    /// User-facing message, phrased for the input source
    pub fn user_message(&self, source: crate::config::SourceType) -> &'static str {
        use crate::config::SourceType;
        match (self, source) {
            (NoNotesReason::EmptyBuffer, _) => "The audio appears to be empty.",
            (_, SourceType::Mic) => "No clear notes detected. Try whistling louder.",
            (_, SourceType::File) => "The file appears to be empty or too quiet.",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioInfo {
    pub duration_seconds: f32,
    pub sample_rate: u32,
    pub total_samples: usize,
    pub peak: f32,
    pub rms: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameStats {
    pub total_frames: usize,
    pub voiced_frames: usize,
    pub smoothed_voiced_frames: usize,
    pub frame_duration_sec: f32,
}

/// Analysis report written next to the MIDI file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResults {
    pub version: String,
    pub source: crate::config::SourceType,
    pub bpm: f32,
    pub audio_info: AudioInfo,
    pub frames: FrameStats,
    pub note_count: usize,
    pub rest_count: usize,
    pub total_beats: f32,
    pub pitch_range: Option<[u8; 2]>,
    pub no_notes_reason: Option<NoNotesReason>,
    pub notes: Vec<NoteEvent>,
}

/// Build the analysis report for a processed state
pub fn build_analysis_results(state: &AudioState) -> AnalysisResults {
    let voiced: Vec<u8> = state.notes.iter().filter_map(|n| n.pitch).collect();
    let pitch_range = match (voiced.iter().min(), voiced.iter().max()) {
        (Some(&lo), Some(&hi)) => Some([lo, hi]),
        _ => None,
    };

    AnalysisResults {
        version: env!("CARGO_PKG_VERSION").to_string(),
        source: state.config.source,
        bpm: state.config.tempo.bpm,
        audio_info: AudioInfo {
            duration_seconds: state.duration_sec(),
            sample_rate: state.sr,
            total_samples: state.n_samples(),
            peak: crate::audio::peak(&state.y),
            rms: crate::audio::rms(&state.y),
        },
        frames: FrameStats {
            total_frames: state.frames.len(),
            voiced_frames: state.frames.iter().filter(|f| f.is_voiced()).count(),
            smoothed_voiced_frames: state
                .smoothed_frames
                .iter()
                .filter(|f| f.is_voiced())
                .count(),
            frame_duration_sec: state.frame_duration_sec(),
        },
        note_count: voiced.len(),
        rest_count: state.notes.iter().filter(|n| n.is_rest()).count(),
        total_beats: total_beats(&state.notes),
        pitch_range,
        no_notes_reason: state.no_notes_reason(),
        notes: state.notes.clone(),
    }
}

/// Export analysis results to JSON
pub fn export_analysis(
    state: &AudioState,
    output_dir: &std::path::Path,
) -> TranscribeResult<()> {
    std::fs::create_dir_all(output_dir)?;

    let analysis_path = output_dir.join("analysis.json");
    let analysis = build_analysis_results(state);
    let json = serde_json::to_string_pretty(&analysis)?;
    std::fs::write(&analysis_path, json)?;

    let notes_path = output_dir.join("notes.json");
    std::fs::write(&notes_path, serde_json::to_string_pretty(&state.notes)?)?;

    log::info!(
        "Exported analysis results to {} and {}",
        analysis_path.display(),
        notes_path.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frequency_midi_conversion() {
        assert!((frequency_to_midi(440.0) - 69.0).abs() < 1e-5);
        assert!((frequency_to_midi(261.6256) - 60.0).abs() < 1e-3);
        assert!((midi_to_frequency(81.0) - 880.0).abs() < 1e-2);
        assert_eq!(Frame::from_frequency(-1.0), Frame::Unvoiced);
        assert_eq!(Frame::from_frequency(f32::NAN), Frame::Unvoiced);
    }

    #[test]
    fn test_note_event_json_shape() {
        let json = serde_json::to_string(&NoteEvent::note(60, 1.0)).unwrap();
        assert_eq!(json, r#"{"midi":60,"beats":1.0}"#);

        let json = serde_json::to_string(&NoteEvent::rest(0.5)).unwrap();
        assert_eq!(json, r#"{"midi":null,"beats":0.5}"#);

        let json = serde_json::to_string(&NoteEvent::note(64, 2.0).at(4.0)).unwrap();
        assert_eq!(json, r#"{"midi":64,"beats":2.0,"startTime":4.0}"#);
    }

    #[test]
    fn test_parse_score_variants() {
        let melody = parse_score(r#"[{"midi": 60, "beats": 1}, {"pitch": null, "beats": 0.5}]"#)
            .unwrap();
        assert_eq!(
            melody,
            Score::Melody(vec![NoteEvent::note(60, 1.0), NoteEvent::rest(0.5)])
        );

        let arrangement = parse_score(
            r#"{"tracks": [{"instrument": "Bass", "notes": [{"midi": 40, "beats": 2, "startTime": 0}]}]}"#,
        )
        .unwrap();
        let tracks = arrangement.into_tracks();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].instrument, "Bass");
        assert!(tracks[0].is_time_tagged());

        assert!(parse_score("{not json").is_err());
    }

    #[test]
    fn test_note_names_in_json() {
        let melody = parse_score(
            r#"[{"midi": "C4", "beats": 1}, {"pitch": "f#3", "beats": 0.5}, {"midi": null, "beats": 1}]"#,
        )
        .unwrap();
        assert_eq!(
            melody,
            Score::Melody(vec![
                NoteEvent::note(60, 1.0),
                NoteEvent::note(54, 0.5),
                NoteEvent::rest(1.0),
            ])
        );

        assert!(parse_score(r#"[{"midi": "H2", "beats": 1}]"#).is_err());
        assert!(parse_score(r#"[{"midi": 300, "beats": 1}]"#).is_err());
    }

    #[test]
    fn test_track_total_beats() {
        let sequential = Track::new(
            "Melody",
            vec![NoteEvent::note(60, 1.0), NoteEvent::rest(1.0), NoteEvent::note(62, 2.0)],
        );
        assert!(!sequential.is_time_tagged());
        assert_eq!(sequential.total_beats(), 4.0);

        let tagged = Track::new(
            "Piano",
            vec![
                NoteEvent::note(60, 1.0).at(0.0),
                NoteEvent::note(64, 3.0).at(0.0),
                NoteEvent::note(67, 1.0).at(2.0),
            ],
        );
        assert!(tagged.is_time_tagged());
        assert_eq!(tagged.total_beats(), 3.0);
    }
}
