//! End-to-end tests: samples in, notes and MIDI out

use whistle2midi::analysis::{frequency_to_midi, NoNotesReason, NoteEvent};
use whistle2midi::audio::write_wav_file;
use whistle2midi::config::{Config, SourceType};
use whistle2midi::midi::summarize;
use whistle2midi::Transcriber;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f32::consts::PI;
use std::path::PathBuf;

const SR: u32 = 44100;

fn tone(freq: f32, seconds: f32, amplitude: f32) -> Vec<f32> {
    let n = (seconds * SR as f32) as usize;
    (0..n)
        .map(|i| amplitude * (2.0 * PI * freq * i as f32 / SR as f32).sin())
        .collect()
}

fn silence(seconds: f32) -> Vec<f32> {
    vec![0.0; (seconds * SR as f32) as usize]
}

/// 880 Hz for 1 s, 0.5 s of silence, 660 Hz for 1 s
fn generate_two_note_melody() -> Vec<f32> {
    let mut audio = tone(880.0, 1.0, 0.5);
    audio.extend(silence(0.5));
    audio.extend(tone(660.0, 1.0, 0.5));
    audio
}

fn voiced(notes: &[NoteEvent]) -> Vec<&NoteEvent> {
    notes.iter().filter(|n| !n.is_rest()).collect()
}

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("whistle2midi-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_note_melody() {
        let transcriber = Transcriber::new(Config::default());
        let state = transcriber
            .transcribe_samples(generate_two_note_melody(), SR)
            .unwrap();

        let notes = voiced(&state.notes);
        let pitches: Vec<u8> = notes.iter().filter_map(|n| n.pitch).collect();
        assert_eq!(pitches, vec![81, 76], "notes: {:?}", state.notes);

        for note in &notes {
            assert!(
                (1.5..=2.5).contains(&note.beats),
                "expected about 2 beats, got {}",
                note.beats
            );
        }

        let rests: Vec<&NoteEvent> = state.notes.iter().filter(|n| n.is_rest()).collect();
        assert_eq!(rests.len(), 1, "notes: {:?}", state.notes);
        assert!((0.5..=1.5).contains(&rests[0].beats));
        assert!(state.no_notes_reason().is_none());
    }

    #[test]
    fn test_short_dropout_merges_into_one_note() {
        // 80 ms break in the middle of a held A5
        let mut audio = tone(880.0, 0.6, 0.5);
        audio.extend(silence(0.08));
        audio.extend(tone(880.0, 0.6, 0.5));

        let state = Transcriber::new(Config::default())
            .transcribe_samples(audio, SR)
            .unwrap();

        let ceiling = frequency_to_midi(6000.0);
        assert!(
            state.frames.iter().filter_map(|f| f.midi()).all(|m| m <= ceiling),
            "frames above the lowpass: {:?}",
            state.frames
        );

        let notes = voiced(&state.notes);
        assert_eq!(notes.len(), 1, "notes: {:?}", state.notes);
        assert_eq!(notes[0].pitch, Some(81));
        assert!((2.25..=2.75).contains(&notes[0].beats), "got {}", notes[0].beats);
    }

    #[test]
    fn test_tempo_scales_durations() {
        let mut config = Config::default();
        config.tempo.bpm = 60.0;
        let state = Transcriber::new(config)
            .transcribe_samples(tone(440.0, 2.0, 0.5), SR)
            .unwrap();

        let notes = voiced(&state.notes);
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].pitch, Some(69));
        assert!((1.75..=2.25).contains(&notes[0].beats), "got {}", notes[0].beats);
    }

    #[test]
    fn test_silence_gives_empty_sequence() {
        let state = Transcriber::new(Config::default())
            .transcribe_samples(silence(2.0), SR)
            .unwrap();
        assert!(state.notes.is_empty());
        assert_eq!(state.no_notes_reason(), Some(NoNotesReason::TooQuiet));
    }

    #[test]
    fn test_empty_buffer_gives_empty_sequence() {
        let state = Transcriber::new(Config::default())
            .transcribe_samples(Vec::new(), SR)
            .unwrap();
        assert!(state.notes.is_empty());
        assert!(state.frames.is_empty());
        assert_eq!(state.no_notes_reason(), Some(NoNotesReason::EmptyBuffer));
    }

    #[test]
    fn test_microphone_preset_with_noise() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut audio = silence(0.3);
        audio.extend(tone(1046.5, 1.5, 0.4));
        audio.extend(silence(0.3));
        for sample in audio.iter_mut() {
            *sample += rng.gen_range(-0.003..0.003);
        }

        let state = Transcriber::new(Config::for_source(SourceType::Mic))
            .transcribe_samples(audio, SR)
            .unwrap();

        let pitches: Vec<u8> = voiced(&state.notes).iter().filter_map(|n| n.pitch).collect();
        assert_eq!(pitches, vec![84], "notes: {:?}", state.notes);
    }

    #[test]
    fn test_async_matches_blocking() {
        let transcriber = Transcriber::new(Config::default());
        let blocking = transcriber
            .transcribe_samples(generate_two_note_melody(), SR)
            .unwrap();
        let awaited = pollster::block_on(transcriber.transcribe_async(generate_two_note_melody(), SR))
            .unwrap();
        assert_eq!(blocking.notes, awaited.notes);
    }

    #[test]
    fn test_unsupported_sample_rate() {
        let result = Transcriber::new(Config::default()).transcribe_samples(vec![0.0; 4096], 4000);
        assert!(result.is_err());
    }

    #[test]
    fn test_process_writes_outputs() {
        let dir = scratch_dir("process");
        let input = dir.join("melody.wav");
        write_wav_file(&input, &generate_two_note_melody(), SR).unwrap();

        let mut config = Config::default();
        config.qa.generate_images = false;
        let out = dir.join("out");

        let midi_path = Transcriber::new(config)
            .process(&input, &out, "Two  Notes")
            .unwrap()
            .expect("notes were transcribed");
        assert_eq!(midi_path, out.join("AudioScore-Two-Notes.mid"));

        let summary = summarize(&std::fs::read(&midi_path).unwrap()).unwrap();
        let keys: Vec<u8> = summary.tracks[0].notes.iter().map(|n| n.key).collect();
        assert_eq!(keys, vec![81, 76]);

        let notes: Vec<NoteEvent> =
            serde_json::from_str(&std::fs::read_to_string(out.join("notes.json")).unwrap()).unwrap();
        assert_eq!(voiced(&notes).len(), 2);
        assert!(out.join("analysis.json").exists());
        assert!(out.join("qa").join("statistics.json").exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_process_silent_file_writes_no_midi() {
        let dir = scratch_dir("silent");
        let input = dir.join("silent.wav");
        write_wav_file(&input, &silence(1.0), SR).unwrap();

        let mut config = Config::default();
        config.qa.enabled = false;
        let out = dir.join("out");

        let midi_path = Transcriber::new(config).process(&input, &out, "Quiet").unwrap();
        assert!(midi_path.is_none());
        assert!(out.join("notes.json").exists());
        assert!(!out.join("qa").exists());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
