//! QA artifacts generation

use crate::analysis::Frame;
use crate::audio::{peak, rms, AudioState};
use crate::error::{Result as TranscribeResult, TranscribeError};
use crate::midi::midi_to_note_name;
use plotters::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Generate QA artifacts (plots, reports, etc.) under `<output_dir>/qa`
pub fn generate_artifacts(state: &AudioState, output_dir: &Path) -> TranscribeResult<()> {
    let qa_dir = output_dir.join("qa");
    fs::create_dir_all(&qa_dir)?;

    log::info!("Generating QA artifacts...");

    if state.config.qa.generate_images {
        generate_pitch_track_plot(state, &qa_dir)?;
        generate_notes_plot(state, &qa_dir)?;
    }
    generate_statistics_report(state, &qa_dir)?;
    generate_quality_report(state, &qa_dir)?;

    log::info!("QA artifacts generated in {}", qa_dir.display());
    Ok(())
}

fn plot_size(state: &AudioState) -> (u32, u32) {
    let [w, h] = state.config.qa.plot_size;
    (w.max(200), h.max(150))
}

fn plot_error<E: std::fmt::Debug>(what: &str) -> impl Fn(E) -> TranscribeError + '_ {
    move |e| TranscribeError::QaGenerationError(format!("Failed to {}: {:?}", what, e))
}

/// Raw frame estimates (points) against the smoothed track (line)
fn generate_pitch_track_plot(state: &AudioState, output_dir: &Path) -> TranscribeResult<()> {
    let path = output_dir.join("pitch_track.png");
    let root = BitMapBackend::new(&path, plot_size(state)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_error("fill plot background"))?;

    let frame_dur = state.frame_duration_sec() as f64;
    let duration = (state.frames.len() as f64 * frame_dur).max(frame_dur).max(1e-3);

    let (lo, hi) = state
        .frames
        .iter()
        .chain(&state.smoothed_frames)
        .filter_map(Frame::midi)
        .fold((f32::MAX, f32::MIN), |(lo, hi), m| (lo.min(m), hi.max(m)));
    let (lo, hi) = if lo <= hi {
        ((lo - 2.0) as f64, (hi + 2.0) as f64)
    } else {
        (48.0, 84.0)
    };

    let mut chart = ChartBuilder::on(&root)
        .caption("Pitch Track", ("sans-serif", 30))
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(0.0f64..duration, lo..hi)
        .map_err(plot_error("build chart"))?;

    chart
        .configure_mesh()
        .x_desc("Time (seconds)")
        .y_desc("MIDI pitch")
        .draw()
        .map_err(plot_error("draw mesh"))?;

    chart
        .draw_series(state.frames.iter().enumerate().filter_map(|(i, f)| {
            f.midi()
                .map(|m| Circle::new((i as f64 * frame_dur, m as f64), 2, RED.filled()))
        }))
        .map_err(plot_error("draw raw frames"))?;

    // One line segment per voiced run so unvoiced gaps stay open
    let mut runs: Vec<Vec<(f64, f64)>> = Vec::new();
    let mut current = Vec::new();
    for (i, frame) in state.smoothed_frames.iter().enumerate() {
        match frame.midi() {
            Some(m) => current.push((i as f64 * frame_dur, m as f64)),
            None if !current.is_empty() => runs.push(std::mem::take(&mut current)),
            None => {}
        }
    }
    if !current.is_empty() {
        runs.push(current);
    }
    for run in runs {
        chart
            .draw_series(LineSeries::new(run, &BLUE))
            .map_err(plot_error("draw smoothed track"))?;
    }

    root.present().map_err(plot_error("write pitch track plot"))?;
    Ok(())
}

/// Piano-roll style view of the quantized notes, in beats
fn generate_notes_plot(state: &AudioState, output_dir: &Path) -> TranscribeResult<()> {
    let path = output_dir.join("notes.png");
    let root = BitMapBackend::new(&path, plot_size(state)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_error("fill plot background"))?;

    let mut bars = Vec::new();
    let mut position = 0.0f64;
    for note in &state.notes {
        let beats = note.beats as f64;
        if let Some(pitch) = note.pitch {
            bars.push((position, position + beats, pitch as i32));
        }
        position += beats;
    }

    let total = position.max(1.0);
    let (lo, hi) = bars
        .iter()
        .fold((i32::MAX, i32::MIN), |(lo, hi), &(_, _, p)| (lo.min(p), hi.max(p)));
    let (lo, hi) = if lo <= hi { (lo - 2, hi + 3) } else { (48, 84) };

    let mut chart = ChartBuilder::on(&root)
        .caption("Quantized Notes", ("sans-serif", 30))
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(0.0f64..total, lo..hi)
        .map_err(plot_error("build chart"))?;

    chart
        .configure_mesh()
        .x_desc("Beats")
        .y_desc("MIDI pitch")
        .draw()
        .map_err(plot_error("draw mesh"))?;

    chart
        .draw_series(bars.into_iter().map(|(start, end, pitch)| {
            Rectangle::new([(start, pitch), (end, pitch + 1)], GREEN.mix(0.8).filled())
        }))
        .map_err(plot_error("draw notes"))?;

    root.present().map_err(plot_error("write notes plot"))?;
    Ok(())
}

/// Generate statistics report
fn generate_statistics_report(state: &AudioState, output_dir: &Path) -> TranscribeResult<()> {
    let path = output_dir.join("statistics.json");

    let mut stats = serde_json::Map::new();

    stats.insert("duration_seconds".to_string(), state.duration_sec().into());
    stats.insert("sample_rate".to_string(), state.sr.into());
    stats.insert("total_samples".to_string(), state.n_samples().into());
    stats.insert("input_peak".to_string(), peak(&state.y).into());
    stats.insert("input_rms".to_string(), rms(&state.y).into());
    if let Some(processed) = &state.y_processed {
        stats.insert("processed_peak".to_string(), peak(processed).into());
        stats.insert("processed_rms".to_string(), rms(processed).into());
    }

    stats.insert("total_frames".to_string(), state.frames.len().into());
    stats.insert(
        "voiced_frames".to_string(),
        state.frames.iter().filter(|f| f.is_voiced()).count().into(),
    );

    let mut pitch_distribution: BTreeMap<u8, usize> = BTreeMap::new();
    for pitch in state.notes.iter().filter_map(|n| n.pitch) {
        *pitch_distribution.entry(pitch).or_insert(0) += 1;
    }
    let named: serde_json::Map<String, serde_json::Value> = pitch_distribution
        .into_iter()
        .map(|(pitch, count)| (midi_to_note_name(pitch), count.into()))
        .collect();
    stats.insert("pitch_distribution".to_string(), named.into());

    let metrics = compute_quality_metrics(state);
    stats.insert("quality_metrics".to_string(), serde_json::to_value(metrics)?);

    let json = serde_json::to_string_pretty(&stats)?;
    fs::write(path, json)?;

    Ok(())
}

/// Generate quality metrics report
fn generate_quality_report(state: &AudioState, output_dir: &Path) -> TranscribeResult<()> {
    let path = output_dir.join("quality_metrics.txt");
    let metrics = compute_quality_metrics(state);

    let mut report = String::new();
    report.push_str("WHISTLE TO MIDI - QUALITY METRICS REPORT\n");
    report.push_str("========================================\n\n");

    report.push_str(&format!("Source: {}\n", state.config.source));
    report.push_str(&format!("Tempo: {} BPM\n\n", state.config.tempo.bpm));
    report.push_str(&format!("Voiced Ratio: {:.3}\n", metrics.voiced_ratio));
    report.push_str(&format!(
        "Frames Changed by Smoothing: {}\n",
        metrics.smoothing_changes
    ));
    report.push_str(&format!(
        "Mean Frame-to-Frame Jitter: {:.3} semitones\n",
        metrics.mean_jitter_semitones
    ));
    report.push_str(&format!(
        "Notes: {} ({} rests, {:.2} beats)\n",
        metrics.note_count, metrics.rest_count, metrics.total_beats
    ));

    if let Some(reason) = state.no_notes_reason() {
        report.push_str(&format!("\nNo notes: {}\n", reason.user_message(state.config.source)));
    }

    fs::write(path, report)?;

    Ok(())
}

/// Quality metrics structure
#[derive(Debug, serde::Serialize)]
struct QualityMetrics {
    voiced_ratio: f32,
    smoothing_changes: usize,
    mean_jitter_semitones: f32,
    note_count: usize,
    rest_count: usize,
    total_beats: f32,
}

fn compute_quality_metrics(state: &AudioState) -> QualityMetrics {
    let total = state.smoothed_frames.len();
    let voiced = state.smoothed_frames.iter().filter(|f| f.is_voiced()).count();
    let voiced_ratio = if total > 0 {
        voiced as f32 / total as f32
    } else {
        0.0
    };

    let smoothing_changes = state
        .frames
        .iter()
        .zip(&state.smoothed_frames)
        .filter(|(a, b)| a != b)
        .count();

    let jumps: Vec<f32> = state
        .smoothed_frames
        .windows(2)
        .filter_map(|pair| match (pair[0].midi(), pair[1].midi()) {
            (Some(a), Some(b)) => Some((b - a).abs()),
            _ => None,
        })
        .collect();
    let mean_jitter_semitones = if jumps.is_empty() {
        0.0
    } else {
        jumps.iter().sum::<f32>() / jumps.len() as f32
    };

    let rest_count = state.notes.iter().filter(|n| n.is_rest()).count();

    QualityMetrics {
        voiced_ratio,
        smoothing_changes,
        mean_jitter_semitones,
        note_count: state.notes.len() - rest_count,
        rest_count,
        total_beats: crate::analysis::total_beats(&state.notes),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::NoteEvent;
    use crate::config::Config;

    #[test]
    fn test_quality_metrics() {
        let mut state = AudioState::from_samples(vec![0.0; 4096], 44100, &Config::default());
        state.frames = vec![Frame::Voiced(60.0), Frame::Voiced(61.0), Frame::Unvoiced, Frame::Voiced(62.0)];
        state.smoothed_frames = vec![Frame::Voiced(60.0), Frame::Voiced(60.5), Frame::Unvoiced, Frame::Voiced(62.0)];
        state.notes = vec![NoteEvent::note(60, 1.0), NoteEvent::rest(0.5), NoteEvent::note(62, 0.5)];

        let metrics = compute_quality_metrics(&state);
        assert!((metrics.voiced_ratio - 0.75).abs() < 1e-6);
        assert_eq!(metrics.smoothing_changes, 1);
        assert!((metrics.mean_jitter_semitones - 0.5).abs() < 1e-6);
        assert_eq!(metrics.note_count, 2);
        assert_eq!(metrics.rest_count, 1);
        assert!((metrics.total_beats - 2.0).abs() < 1e-6);
    }
}
