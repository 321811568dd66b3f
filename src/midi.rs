//! MIDI export functionality
//!
//! Files are written by hand through [`MidiByteWriter`]: a format-1 header
//! at [`TICKS_PER_BEAT`] resolution followed by one track chunk per
//! [`Track`]. Delta times are variable-length quantities. Rests have no
//! native event, so the time they consume is carried by a no-op controller
//! message (All Notes Off) placed at the end of the gap.
//!
//! Reading goes through `midly`, which serves as an independent check on
//! what the writer produced.

use crate::analysis::{NoteEvent, Track};
use crate::audio::AudioState;
use crate::config::Config;
use crate::error::{Result as TranscribeResult, TranscribeError};
use base64::Engine;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};

/// Resolution of every exported file
pub const TICKS_PER_BEAT: u16 = 128;

/// Largest value a four-byte variable-length quantity can hold
pub const VLQ_MAX: u32 = 0x0FFF_FFFF;

/// Controller used as the "wait" carrier (All Notes Off)
const REST_CONTROLLER: u8 = 123;

const NOTE_OFF: u8 = 0x80;
const NOTE_ON: u8 = 0x90;
const CONTROL_CHANGE: u8 = 0xB0;
const PROGRAM_CHANGE: u8 = 0xC0;
const META: u8 = 0xFF;
const META_TRACK_NAME: u8 = 0x03;
const META_TEMPO: u8 = 0x51;
const META_END_OF_TRACK: u8 = 0x2F;

const PERCUSSION_CHANNEL: u8 = 9;

/// Encode a value as a variable-length quantity: 7 bits per byte, most
/// significant group first, high bit set on every byte but the last.
pub fn encode_vlq(value: u32) -> TranscribeResult<Vec<u8>> {
    if value > VLQ_MAX {
        return Err(TranscribeError::EventTooLarge(value as u64));
    }

    let mut groups = [0u8; 4];
    let mut n = 0;
    let mut rest = value;
    loop {
        groups[n] = (rest & 0x7F) as u8;
        n += 1;
        rest >>= 7;
        if rest == 0 {
            break;
        }
    }

    Ok((0..n)
        .rev()
        .map(|i| if i == 0 { groups[i] } else { groups[i] | 0x80 })
        .collect())
}

/// Decode a variable-length quantity; returns the value and bytes consumed
pub fn decode_vlq(bytes: &[u8]) -> TranscribeResult<(u32, usize)> {
    let mut value: u32 = 0;
    for (i, &byte) in bytes.iter().enumerate().take(4) {
        value = (value << 7) | (byte & 0x7F) as u32;
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }

    Err(TranscribeError::MidiDecodeError(if bytes.len() < 4 {
        "truncated variable-length quantity".to_string()
    } else {
        "variable-length quantity longer than 4 bytes".to_string()
    }))
}

/// Big-endian byte stream builder for SMF chunks
#[derive(Debug, Default, Clone)]
pub struct MidiByteWriter {
    bytes: Vec<u8>,
}

impl MidiByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn u8(&mut self, value: u8) -> &mut Self {
        self.bytes.push(value);
        self
    }

    pub fn u16_be(&mut self, value: u16) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn u32_be(&mut self, value: u32) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.bytes.extend_from_slice(bytes);
        self
    }

    /// Append a variable-length quantity, failing above [`VLQ_MAX`]
    pub fn vlq(&mut self, value: u64) -> TranscribeResult<&mut Self> {
        let value = u32::try_from(value)
            .map_err(|_| TranscribeError::EventTooLarge(value))?;
        let encoded = encode_vlq(value)?;
        self.bytes.extend_from_slice(&encoded);
        Ok(self)
    }

    /// Append a chunk: 4-byte tag, 32-bit length, body
    pub fn chunk(&mut self, tag: &[u8; 4], body: &[u8]) -> TranscribeResult<&mut Self> {
        let len = u32::try_from(body.len()).map_err(|_| {
            TranscribeError::MidiExportError(format!("chunk of {} bytes is too long", body.len()))
        })?;
        self.raw(tag).u32_be(len).raw(body);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Common notated durations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteDuration {
    Whole,
    Half,
    Quarter,
    Eighth,
    Sixteenth,
}

impl NoteDuration {
    pub fn ticks(&self) -> u32 {
        let quarter = TICKS_PER_BEAT as u32;
        match self {
            NoteDuration::Whole => quarter * 4,
            NoteDuration::Half => quarter * 2,
            NoteDuration::Quarter => quarter,
            NoteDuration::Eighth => quarter / 2,
            NoteDuration::Sixteenth => quarter / 4,
        }
    }

    pub fn beats(&self) -> f32 {
        self.ticks() as f32 / TICKS_PER_BEAT as f32
    }

    /// Largest duration not longer than `beats`, sixteenth at minimum
    pub fn from_beats(beats: f32) -> Self {
        if beats >= 4.0 {
            NoteDuration::Whole
        } else if beats >= 2.0 {
            NoteDuration::Half
        } else if beats >= 1.0 {
            NoteDuration::Quarter
        } else if beats >= 0.5 {
            NoteDuration::Eighth
        } else {
            NoteDuration::Sixteenth
        }
    }

    /// Parse the reciprocal code used by notation tools ("1", "2", "4", "8", "16")
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "1" => Some(NoteDuration::Whole),
            "2" => Some(NoteDuration::Half),
            "4" => Some(NoteDuration::Quarter),
            "8" => Some(NoteDuration::Eighth),
            "16" => Some(NoteDuration::Sixteenth),
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            NoteDuration::Whole => "1",
            NoteDuration::Half => "2",
            NoteDuration::Quarter => "4",
            NoteDuration::Eighth => "8",
            NoteDuration::Sixteenth => "16",
        }
    }
}

/// Convert beats to ticks, rounding to the nearest tick
pub fn beats_to_ticks(beats: f32) -> TranscribeResult<u64> {
    if !beats.is_finite() || beats < 0.0 {
        return Err(TranscribeError::InvalidNoteEvent(format!(
            "duration must be a non-negative number of beats, got {}",
            beats
        )));
    }
    let ticks = (beats as f64 * TICKS_PER_BEAT as f64).round();
    if ticks > VLQ_MAX as f64 {
        return Err(TranscribeError::EventTooLarge(ticks as u64));
    }
    Ok(ticks as u64)
}

const CHROMATIC: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Parse a note name such as "C4" or "F#3": `(octave + 1) * 12 + index`
pub fn note_name_to_midi(name: &str) -> TranscribeResult<u8> {
    let invalid = || TranscribeError::InvalidNoteName(name.to_string());
    let trimmed = name.trim();

    let split = trimmed
        .find(|c: char| c.is_ascii_digit() || c == '-')
        .ok_or_else(invalid)?;
    let (pitch_class, octave) = trimmed.split_at(split);

    let index = CHROMATIC
        .iter()
        .position(|&n| n.eq_ignore_ascii_case(pitch_class))
        .ok_or_else(invalid)? as i32;
    let octave: i32 = octave.parse().map_err(|_| invalid())?;

    let midi = (octave + 1) * 12 + index;
    u8::try_from(midi)
        .ok()
        .filter(|&m| m <= 127)
        .ok_or_else(invalid)
}

/// Inverse of [`note_name_to_midi`], sharps only
pub fn midi_to_note_name(midi: u8) -> String {
    let octave = (midi / 12) as i32 - 1;
    format!("{}{}", CHROMATIC[(midi % 12) as usize], octave)
}

/// Settings that shape the exported event stream
#[derive(Debug, Clone)]
pub struct MidiExportOptions {
    pub velocity: u8,
    pub note_off_velocity: u8,
    pub program: u8,
    /// Tempo written to the first track, if any
    pub bpm: Option<f32>,
    pub write_track_names: bool,
}

impl Default for MidiExportOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for MidiExportOptions {
    fn from(config: &Config) -> Self {
        Self {
            velocity: config.export.velocity.min(127),
            note_off_velocity: config.export.note_off_velocity.min(127),
            program: config.export.program.min(127),
            bpm: config.export.write_tempo.then_some(config.tempo.bpm),
            write_track_names: config.export.write_track_names,
        }
    }
}

impl MidiExportOptions {
    /// Options that produce only program, note and wait events
    pub fn minimal() -> Self {
        Self {
            bpm: None,
            write_track_names: false,
            ..Self::default()
        }
    }
}

/// Channel for the track at `index`; percussion goes to channel 10
pub fn channel_for_track(index: usize, instrument: &str) -> u8 {
    if is_percussion(instrument) {
        return PERCUSSION_CHANNEL;
    }
    let channel = if index >= PERCUSSION_CHANNEL as usize {
        index + 1
    } else {
        index
    };
    (channel % 16) as u8
}

fn is_percussion(instrument: &str) -> bool {
    let name = instrument.to_lowercase();
    name.contains("drum") || name.contains("perc")
}

/// General MIDI program inferred from an instrument label
pub fn program_for_instrument(instrument: &str, default_program: u8) -> u8 {
    const PROGRAMS: [(&str, u8); 14] = [
        ("electric piano", 4),
        ("piano", 0),
        ("organ", 19),
        ("guitar", 24),
        ("bass", 33),
        ("violin", 40),
        ("cello", 42),
        ("string", 48),
        ("choir", 52),
        ("trumpet", 56),
        ("sax", 65),
        ("flute", 73),
        ("whistle", 78),
        ("pad", 88),
    ];

    let name = instrument.to_lowercase();
    PROGRAMS
        .iter()
        .find(|(keyword, _)| name.contains(keyword))
        .map(|&(_, program)| program)
        .unwrap_or(default_program)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScheduledKind {
    NoteOff(u8),
    Rest,
    NoteOn(u8),
}

impl ScheduledKind {
    /// Same-tick ordering: releases first, then the wait marker, then attacks
    fn rank(&self) -> u8 {
        match self {
            ScheduledKind::NoteOff(_) => 0,
            ScheduledKind::Rest => 1,
            ScheduledKind::NoteOn(_) => 2,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ScheduledEvent {
    tick: u64,
    kind: ScheduledKind,
}

/// Absolute-tick event list for one track.
///
/// Every step (one note, or all notes sharing a start) advances the cursor
/// to `max(cursor, start + longest duration in the step)`; a step that
/// begins after the cursor is preceded by a rest marker.
#[derive(Debug, Default)]
struct TrackSchedule {
    events: Vec<ScheduledEvent>,
    cursor: u64,
}

impl TrackSchedule {
    fn push(&mut self, tick: u64, kind: ScheduledKind) {
        self.events.push(ScheduledEvent { tick, kind });
    }

    fn step(&mut self, start: u64, notes: &[(u8, u64)]) {
        if notes.is_empty() {
            return;
        }
        if start > self.cursor {
            self.push(start, ScheduledKind::Rest);
        }

        let mut longest = 0;
        for &(key, ticks) in notes {
            self.push(start, ScheduledKind::NoteOn(key));
            self.push(start + ticks, ScheduledKind::NoteOff(key));
            longest = longest.max(ticks);
        }
        self.cursor = self.cursor.max(start + longest);
    }

    /// Close a trailing rest that runs past the last note
    fn finish(&mut self, end: u64) {
        if end > self.cursor {
            self.push(end, ScheduledKind::Rest);
            self.cursor = end;
        }
    }

    fn into_sorted(mut self) -> Vec<ScheduledEvent> {
        // Stable: insertion order breaks ties inside a rank
        self.events.sort_by_key(|e| (e.tick, e.kind.rank()));
        self.events
    }
}

fn note_key(note: &NoteEvent) -> TranscribeResult<Option<u8>> {
    match note.pitch {
        Some(p) if p > 127 => Err(TranscribeError::InvalidNoteEvent(format!(
            "pitch {} is outside 0-127",
            p
        ))),
        other => Ok(other),
    }
}

fn voiced_ticks(note: &NoteEvent) -> TranscribeResult<u64> {
    let ticks = beats_to_ticks(note.beats)?;
    if ticks == 0 {
        return Err(TranscribeError::InvalidNoteEvent(format!(
            "note duration {} beats rounds to zero ticks",
            note.beats
        )));
    }
    Ok(ticks)
}

fn schedule_track(track: &Track) -> TranscribeResult<Vec<ScheduledEvent>> {
    let mut schedule = TrackSchedule::default();

    if track.is_time_tagged() {
        // Rests carry no information once every note has a start time
        let mut steps: BTreeMap<u64, Vec<(u8, u64)>> = BTreeMap::new();
        for note in &track.notes {
            let Some(key) = note_key(note)? else {
                continue;
            };
            let start = beats_to_ticks(note.start_time.unwrap_or(0.0))?;
            steps
                .entry(start)
                .or_default()
                .push((key, voiced_ticks(note)?));
        }
        for (start, notes) in &steps {
            schedule.step(*start, notes);
        }
    } else {
        let mut position = 0u64;
        for note in &track.notes {
            match note_key(note)? {
                Some(key) => {
                    let ticks = voiced_ticks(note)?;
                    schedule.step(position, &[(key, ticks)]);
                    position += ticks;
                }
                None => position += beats_to_ticks(note.beats)?,
            }
        }
        schedule.finish(position);
    }

    let events = schedule.into_sorted();
    if let Some(last) = events.last() {
        if last.tick > VLQ_MAX as u64 {
            return Err(TranscribeError::EventTooLarge(last.tick));
        }
    }
    Ok(events)
}

/// Encode the event stream of one track chunk (without the chunk header)
fn encode_track_events(
    track: &Track,
    index: usize,
    options: &MidiExportOptions,
) -> TranscribeResult<Vec<u8>> {
    let channel = channel_for_track(index, &track.instrument);
    let program = if is_percussion(&track.instrument) {
        0
    } else {
        program_for_instrument(&track.instrument, options.program)
    };

    let mut w = MidiByteWriter::new();

    if options.write_track_names && !track.instrument.is_empty() {
        let name = track.instrument.as_bytes();
        w.u8(0x00).u8(META).u8(META_TRACK_NAME);
        w.vlq(name.len() as u64)?.raw(name);
    }

    if index == 0 {
        if let Some(bpm) = options.bpm.filter(|b| b.is_finite() && *b > 0.0) {
            let uspq = ((60_000_000.0 / bpm as f64).round() as u32).min(0x00FF_FFFF);
            w.u8(0x00).u8(META).u8(META_TEMPO).u8(0x03);
            w.raw(&uspq.to_be_bytes()[1..]);
        }
    }

    w.u8(0x00).u8(PROGRAM_CHANGE | channel).u8(program & 0x7F);

    let mut previous = 0u64;
    for event in schedule_track(track)? {
        w.vlq(event.tick - previous)?;
        previous = event.tick;

        match event.kind {
            ScheduledKind::NoteOn(key) => {
                w.u8(NOTE_ON | channel).u8(key).u8(options.velocity);
            }
            ScheduledKind::NoteOff(key) => {
                w.u8(NOTE_OFF | channel).u8(key).u8(options.note_off_velocity);
            }
            ScheduledKind::Rest => {
                w.u8(CONTROL_CHANGE | channel).u8(REST_CONTROLLER).u8(0);
            }
        }
    }

    w.u8(0x00).u8(META).u8(META_END_OF_TRACK).u8(0x00);
    Ok(w.into_bytes())
}

/// Encode tracks into a complete format-1 MIDI file
pub fn encode_tracks(tracks: &[Track], options: &MidiExportOptions) -> TranscribeResult<Vec<u8>> {
    if tracks.is_empty() {
        return Err(TranscribeError::MidiExportError(
            "at least one track is required".to_string(),
        ));
    }
    let track_count = u16::try_from(tracks.len()).map_err(|_| {
        TranscribeError::MidiExportError(format!("too many tracks: {}", tracks.len()))
    })?;

    let mut header = MidiByteWriter::new();
    header.u16_be(1).u16_be(track_count).u16_be(TICKS_PER_BEAT);

    let mut file = MidiByteWriter::new();
    file.chunk(b"MThd", header.as_bytes())?;

    for (index, track) in tracks.iter().enumerate() {
        let body = encode_track_events(track, index, options)?;
        file.chunk(b"MTrk", &body)?;
    }

    Ok(file.into_bytes())
}

/// Encode a single melody as a one-track file
pub fn encode_melody(notes: &[NoteEvent], options: &MidiExportOptions) -> TranscribeResult<Vec<u8>> {
    encode_tracks(&[Track::new("Melody", notes.to_vec())], options)
}

/// Wrap MIDI bytes as a `data:` URI
pub fn to_data_uri(bytes: &[u8]) -> String {
    format!(
        "data:audio/midi;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

/// File name for an exported composition: `<prefix>-<Title-With-Dashes>.mid`
pub fn export_filename(prefix: &str, title: &str) -> String {
    let slug = title
        .split(|c: char| c.is_whitespace() || c == '/' || c == '\\')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    if slug.is_empty() {
        format!("{}.mid", prefix)
    } else {
        format!("{}-{}.mid", prefix, slug)
    }
}

/// Export the transcribed melody of a processed state
pub fn export_midi(
    state: &AudioState,
    output_dir: &Path,
    config: &Config,
    title: &str,
) -> TranscribeResult<Option<PathBuf>> {
    if state.notes.is_empty() {
        log::warn!("No notes to export, skipping MIDI file");
        return Ok(None);
    }

    std::fs::create_dir_all(output_dir)?;

    let options = MidiExportOptions::from(config);
    let bytes = encode_melody(&state.notes, &options)?;
    let path = output_dir.join(export_filename(&config.export.filename_prefix, title));
    std::fs::write(&path, &bytes)?;

    log::info!(
        "Exported {} note events ({} bytes) to {}",
        state.notes.len(),
        bytes.len(),
        path.display()
    );
    Ok(Some(path))
}

/// A sounding note recovered from a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoteSpan {
    pub channel: u8,
    pub key: u8,
    pub start_tick: u32,
    pub duration_ticks: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackSummary {
    pub name: Option<String>,
    pub program: Option<u8>,
    pub tempo_bpm: Option<f32>,
    pub notes: Vec<NoteSpan>,
    pub controller_events: usize,
    /// Absolute tick of the end-of-track marker
    pub end_tick: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MidiSummary {
    pub format: u16,
    pub ticks_per_beat: Option<u16>,
    pub tracks: Vec<TrackSummary>,
}

/// Parse a MIDI file with `midly` and pair up note-on/note-off events
pub fn summarize(bytes: &[u8]) -> TranscribeResult<MidiSummary> {
    use midly::{Format, MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};

    let smf = Smf::parse(bytes).map_err(|e| TranscribeError::MidiDecodeError(e.to_string()))?;

    let format = match smf.header.format {
        Format::SingleTrack => 0,
        Format::Parallel => 1,
        Format::Sequential => 2,
    };
    let ticks_per_beat = match smf.header.timing {
        Timing::Metrical(tpb) => Some(tpb.as_int()),
        Timing::Timecode(..) => None,
    };

    let mut tracks = Vec::with_capacity(smf.tracks.len());
    for events in &smf.tracks {
        let mut summary = TrackSummary::default();
        let mut open: HashMap<(u8, u8), VecDeque<u32>> = HashMap::new();
        let mut tick = 0u32;

        for event in events {
            tick = tick.checked_add(event.delta.as_int()).ok_or_else(|| {
                TranscribeError::MidiDecodeError(format!(
                    "track position overflows past tick {}",
                    tick
                ))
            })?;
            match event.kind {
                TrackEventKind::Midi { channel, message } => {
                    let channel = channel.as_int();
                    match message {
                        MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                            open.entry((channel, key.as_int()))
                                .or_default()
                                .push_back(tick);
                        }
                        MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                            let key = key.as_int();
                            if let Some(start) = open
                                .get_mut(&(channel, key))
                                .and_then(|starts| starts.pop_front())
                            {
                                summary.notes.push(NoteSpan {
                                    channel,
                                    key,
                                    start_tick: start,
                                    duration_ticks: tick - start,
                                });
                            }
                        }
                        MidiMessage::ProgramChange { program } => {
                            summary.program = Some(program.as_int());
                        }
                        MidiMessage::Controller { .. } => summary.controller_events += 1,
                        _ => {}
                    }
                }
                TrackEventKind::Meta(MetaMessage::TrackName(name)) => {
                    summary.name = Some(String::from_utf8_lossy(name).into_owned());
                }
                TrackEventKind::Meta(MetaMessage::Tempo(uspq)) => {
                    summary.tempo_bpm = Some(60_000_000.0 / uspq.as_int() as f32);
                }
                TrackEventKind::Meta(MetaMessage::EndOfTrack) => summary.end_tick = tick,
                _ => {}
            }
        }

        summary
            .notes
            .sort_by_key(|n| (n.start_tick, n.key, n.duration_ticks));
        tracks.push(summary);
    }

    Ok(MidiSummary {
        format,
        ticks_per_beat,
        tracks,
    })
}
