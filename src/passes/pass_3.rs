//! Pass 3: Note Aggregation, Gap Filling & Beat Quantization

use crate::analysis::{Frame, NoteEvent, BEAT_QUANTUM};
use crate::audio::AudioState;
use crate::config::{AggregationConfig, Config};
use crate::error::{Result as TranscribeResult, TranscribeError};

/// Thresholds for one aggregation run
#[derive(Debug, Clone, Copy)]
pub struct AggregationParams {
    /// Max deviation from a group's mean for a frame to join it (semitones)
    pub fuzzy_tolerance: f32,
    /// Max difference of group means for gap filling (semitones)
    pub merge_tolerance: f32,
    /// Max gap bridged by gap filling (seconds)
    pub merge_gap_sec: f32,
    /// Groups not longer than this are dropped (seconds)
    pub min_note_duration_sec: f32,
    /// Silence before a note must exceed this to produce a rest (seconds)
    pub min_rest_gap_sec: f32,
}

impl From<&AggregationConfig> for AggregationParams {
    fn from(config: &AggregationConfig) -> Self {
        Self {
            fuzzy_tolerance: config.fuzzy_tolerance_semitones,
            merge_tolerance: config.merge_tolerance_semitones,
            merge_gap_sec: config.merge_gap_sec,
            min_note_duration_sec: config.min_note_duration_sec(),
            min_rest_gap_sec: config.min_rest_gap_sec,
        }
    }
}

/// An open run of similar frames. Extended in place while frames merge into
/// it, then finalized once.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteGroup {
    pub start_index: usize,
    pub end_index: usize,
    pub frame_count: usize,
    pub mean_midi: f32,
}

impl NoteGroup {
    fn new(index: usize, midi: f32) -> Self {
        Self {
            start_index: index,
            end_index: index,
            frame_count: 1,
            mean_midi: midi,
        }
    }

    fn accepts(&self, midi: f32, tolerance: f32) -> bool {
        (midi - self.mean_midi).abs() < tolerance
    }

    fn extend(&mut self, index: usize, midi: f32) {
        self.end_index = index;
        self.mean_midi =
            (self.mean_midi * self.frame_count as f32 + midi) / (self.frame_count + 1) as f32;
        self.frame_count += 1;
    }

    fn absorb(&mut self, other: &NoteGroup) {
        let total = self.frame_count + other.frame_count;
        self.mean_midi = (self.mean_midi * self.frame_count as f32
            + other.mean_midi * other.frame_count as f32)
            / total as f32;
        self.end_index = other.end_index;
        self.frame_count = total;
    }

    pub fn start_sec(&self, frame_dur: f32) -> f32 {
        self.start_index as f32 * frame_dur
    }

    pub fn end_sec(&self, frame_dur: f32) -> f32 {
        self.end_index as f32 * frame_dur
    }

    /// Nearest MIDI note number, clamped to 0-127
    pub fn pitch(&self) -> u8 {
        self.mean_midi.round().clamp(0.0, 127.0) as u8
    }
}

/// Fuzzy grouping: unvoiced frames close the open group, voiced frames join
/// it while within tolerance of its running mean.
pub fn group_frames(frames: &[Frame], fuzzy_tolerance: f32) -> Vec<NoteGroup> {
    let mut groups = Vec::new();
    let mut current: Option<NoteGroup> = None;

    for (i, frame) in frames.iter().enumerate() {
        let Some(midi) = frame.midi() else {
            if let Some(group) = current.take() {
                groups.push(group);
            }
            continue;
        };

        let joins = current
            .as_ref()
            .is_some_and(|group| group.accepts(midi, fuzzy_tolerance));

        if joins {
            if let Some(group) = current.as_mut() {
                group.extend(i, midi);
            }
        } else if let Some(group) = current.replace(NoteGroup::new(i, midi)) {
            groups.push(group);
        }
    }

    if let Some(group) = current {
        groups.push(group);
    }

    groups
}

/// Gap filling: merge a group into its predecessor when both pitch and the
/// time gap between them are small.
pub fn merge_groups(
    groups: Vec<NoteGroup>,
    frame_dur: f32,
    merge_tolerance: f32,
    merge_gap_sec: f32,
) -> Vec<NoteGroup> {
    let mut merged: Vec<NoteGroup> = Vec::with_capacity(groups.len());

    for group in groups {
        match merged.last_mut() {
            Some(prev) => {
                let gap_sec = group.start_index.saturating_sub(prev.end_index) as f32 * frame_dur;
                let close_in_pitch = (prev.mean_midi - group.mean_midi).abs() < merge_tolerance;
                if close_in_pitch && gap_sec < merge_gap_sec {
                    prev.absorb(&group);
                } else {
                    merged.push(group);
                }
            }
            None => merged.push(group),
        }
    }

    merged
}

/// Round seconds to the nearest quarter beat at `bpm`
pub fn quantize_beats(seconds: f32, bpm: f32) -> f32 {
    let seconds_per_beat = 60.0 / bpm;
    ((seconds / seconds_per_beat) / BEAT_QUANTUM).round() * BEAT_QUANTUM
}

fn validate_tempo(bpm: f32) -> TranscribeResult<()> {
    if !bpm.is_finite() || bpm <= 0.0 {
        return Err(TranscribeError::ConfigValidationFailed(format!(
            "tempo must be a positive number of beats per minute, got {}",
            bpm
        )));
    }
    Ok(())
}

/// Turn smoothed frames into rests and notes.
///
/// `frame_dur` is the hop duration in seconds. An all-unvoiced input gives
/// an empty sequence.
pub fn aggregate_notes(
    frames: &[Frame],
    frame_dur: f32,
    bpm: f32,
    params: &AggregationParams,
) -> TranscribeResult<Vec<NoteEvent>> {
    validate_tempo(bpm)?;
    if !frame_dur.is_finite() || frame_dur <= 0.0 {
        return Err(TranscribeError::ProcessingPipelineError(format!(
            "frame duration must be positive, got {}",
            frame_dur
        )));
    }

    let groups = group_frames(frames, params.fuzzy_tolerance);
    let groups = merge_groups(groups, frame_dur, params.merge_tolerance, params.merge_gap_sec);

    let mut events = Vec::new();
    let mut last_end = 0.0f32;

    for group in &groups {
        let start = group.start_sec(frame_dur);
        let end = group.end_sec(frame_dur);
        let duration = end - start;

        if duration <= params.min_note_duration_sec {
            continue;
        }

        let silence = start - last_end;
        if silence > params.min_rest_gap_sec {
            let rest_beats = quantize_beats(silence, bpm);
            if rest_beats >= BEAT_QUANTUM {
                events.push(NoteEvent::rest(rest_beats));
            }
        }

        let note_beats = quantize_beats(duration, bpm).max(BEAT_QUANTUM);
        events.push(NoteEvent::note(group.pitch(), note_beats));
        last_end = end;
    }

    Ok(events)
}

pub fn run(state: &mut AudioState, config: &Config) -> TranscribeResult<()> {
    log::info!("Pass 3: Note Aggregation & Quantization");

    let params = AggregationParams::from(&config.aggregation);
    let frame_dur = state.frame_duration_sec();

    let notes = aggregate_notes(&state.smoothed_frames, frame_dur, config.tempo.bpm, &params)?;

    log::debug!(
        "  {} events at {} BPM (min note {:.2}s)",
        notes.len(),
        config.tempo.bpm,
        params.min_note_duration_sec
    );
    if notes.is_empty() {
        log::warn!("  No notes detected");
    }

    state.notes = notes;

    log::info!("  ✓ Pass 3 complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_running_mean() {
        let frames = vec![
            Frame::Voiced(60.0),
            Frame::Voiced(60.2),
            Frame::Voiced(60.4),
            Frame::Voiced(62.0),
        ];
        let groups = group_frames(&frames, 0.5);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].frame_count, 3);
        assert!((groups[0].mean_midi - 60.2).abs() < 1e-4);
        assert_eq!(groups[1].start_index, 3);
    }

    #[test]
    fn test_unvoiced_closes_group() {
        let frames = vec![Frame::Voiced(60.0), Frame::Unvoiced, Frame::Voiced(60.0)];
        let groups = group_frames(&frames, 0.5);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].end_index, 0);
        assert_eq!(groups[1].start_index, 2);
    }

    #[test]
    fn test_quantize_beats() {
        assert_eq!(quantize_beats(0.5, 120.0), 1.0);
        assert_eq!(quantize_beats(0.06, 120.0), 0.0);
        assert_eq!(quantize_beats(0.2, 60.0), 0.25);
    }

    #[test]
    fn test_pitch_clamped() {
        let group = NoteGroup::new(0, 140.0);
        assert_eq!(group.pitch(), 127);
        let group = NoteGroup::new(0, 59.6);
        assert_eq!(group.pitch(), 60);
    }
}
