//! Pass 0: Filtering, Compression & Normalization

use crate::audio::AudioState;
use crate::config::{Config, PreprocessConfig};
use crate::error::{Result as TranscribeResult, TranscribeError};
use crate::filters::{cutoff_is_usable, peak_normalize, Biquad, Compressor};

/// Render the whole buffer through highpass -> lowpass -> compressor, then
/// peak-normalize. The returned buffer has the input's length and rate.
///
/// This is the pipeline's only suspend point: nothing is observable until
/// the complete buffer has been rendered.
pub async fn render(
    samples: &[f32],
    sr: u32,
    config: &PreprocessConfig,
) -> TranscribeResult<Vec<f32>> {
    if sr == 0 {
        return Err(TranscribeError::PreprocessError(
            "sample rate must be > 0".to_string(),
        ));
    }
    if let Some(idx) = samples.iter().position(|x| !x.is_finite()) {
        return Err(TranscribeError::PreprocessError(format!(
            "non-finite sample at index {}",
            idx
        )));
    }

    let mut data = samples.to_vec();

    if cutoff_is_usable(config.highpass_hz, sr) {
        data = Biquad::highpass(config.highpass_hz, config.filter_q, sr).process(&data);
    } else {
        log::warn!(
            "Skipping highpass: {} Hz not realizable at {} Hz",
            config.highpass_hz,
            sr
        );
    }

    if cutoff_is_usable(config.lowpass_hz, sr) {
        data = Biquad::lowpass(config.lowpass_hz, config.filter_q, sr).process(&data);
    } else {
        log::debug!(
            "Skipping lowpass: {} Hz at or above Nyquist for {} Hz",
            config.lowpass_hz,
            sr
        );
    }

    if config.compressor.enabled {
        data = Compressor::new(&config.compressor, sr).process(&data);
    }

    let factor = peak_normalize(&mut data, config.normalize_peak, config.normalize_epsilon);
    log::debug!("Normalization factor {:.3}", factor);

    Ok(data)
}

/// Blocking wrapper over [`render`]
pub fn preprocess(samples: &[f32], sr: u32, config: &PreprocessConfig) -> TranscribeResult<Vec<f32>> {
    pollster::block_on(render(samples, sr, config))
}

pub fn run(state: &mut AudioState, config: &Config) -> TranscribeResult<()> {
    log::info!("Pass 0: Filtering, Compression & Normalization");
    log::debug!(
        "  highpass {} Hz, lowpass {} Hz, compressor {} dB / {}:1",
        config.preprocess.highpass_hz,
        config.preprocess.lowpass_hz,
        config.preprocess.compressor.threshold_db,
        config.preprocess.compressor.ratio
    );

    let processed = preprocess(&state.y, state.sr, &config.preprocess)?;
    state.y_processed = Some(processed);

    log::info!("  ✓ Pass 0 complete");
    Ok(())
}

/// Async variant of [`run`] for callers already inside an executor
pub async fn run_async(state: &mut AudioState, config: &Config) -> TranscribeResult<()> {
    log::info!("Pass 0: Filtering, Compression & Normalization");
    let processed = render(&state.y, state.sr, &config.preprocess).await?;
    state.y_processed = Some(processed);
    log::info!("  ✓ Pass 0 complete");
    Ok(())
}
