//! Time-domain filters and dynamics used by preprocessing

use crate::config::CompressorConfig;

/// Second-order IIR section (RBJ cookbook), direct form I
#[derive(Debug, Clone)]
pub struct Biquad {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl Biquad {
    fn from_coefficients(b: [f32; 3], a: [f32; 3]) -> Self {
        let a0 = a[0];
        Self {
            b0: b[0] / a0,
            b1: b[1] / a0,
            b2: b[2] / a0,
            a1: a[1] / a0,
            a2: a[2] / a0,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        }
    }

    pub fn highpass(cutoff_hz: f32, q: f32, sr: u32) -> Self {
        let (cos_w0, alpha) = Self::prewarp(cutoff_hz, q, sr);
        Self::from_coefficients(
            [(1.0 + cos_w0) / 2.0, -(1.0 + cos_w0), (1.0 + cos_w0) / 2.0],
            [1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha],
        )
    }

    pub fn lowpass(cutoff_hz: f32, q: f32, sr: u32) -> Self {
        let (cos_w0, alpha) = Self::prewarp(cutoff_hz, q, sr);
        Self::from_coefficients(
            [(1.0 - cos_w0) / 2.0, 1.0 - cos_w0, (1.0 - cos_w0) / 2.0],
            [1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha],
        )
    }

    fn prewarp(cutoff_hz: f32, q: f32, sr: u32) -> (f32, f32) {
        let w0 = 2.0 * std::f32::consts::PI * cutoff_hz / sr as f32;
        (w0.cos(), w0.sin() / (2.0 * q))
    }

    #[inline]
    pub fn process_sample(&mut self, x0: f32) -> f32 {
        let y0 = self.b0 * x0 + self.b1 * self.x1 + self.b2 * self.x2
            - self.a1 * self.y1
            - self.a2 * self.y2;

        self.x2 = self.x1;
        self.x1 = x0;
        self.y2 = self.y1;
        self.y1 = y0;

        y0
    }

    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        samples.iter().map(|&x| self.process_sample(x)).collect()
    }
}

/// True when a cutoff can be realized at this sample rate
pub fn cutoff_is_usable(cutoff_hz: f32, sr: u32) -> bool {
    cutoff_hz > 0.0 && cutoff_hz < 0.99 * (sr as f32 / 2.0)
}

/// Feed-forward compressor with a peak envelope follower and soft knee
#[derive(Debug, Clone)]
pub struct Compressor {
    threshold_db: f32,
    knee_db: f32,
    ratio: f32,
    attack_coeff: f32,
    release_coeff: f32,
    envelope: f32,
}

impl Compressor {
    pub fn new(config: &CompressorConfig, sr: u32) -> Self {
        Self {
            threshold_db: config.threshold_db,
            knee_db: config.knee_db,
            ratio: config.ratio.max(1.0),
            attack_coeff: time_constant(config.attack_sec, sr),
            release_coeff: time_constant(config.release_sec, sr),
            envelope: 0.0,
        }
    }

    /// Static gain curve: gain change in dB for an input level in dB
    pub fn gain_reduction_db(&self, level_db: f32) -> f32 {
        let slope = 1.0 / self.ratio - 1.0;
        let over = level_db - self.threshold_db;

        if self.knee_db > 0.0 && 2.0 * over.abs() <= self.knee_db {
            let x = over + self.knee_db / 2.0;
            slope * x * x / (2.0 * self.knee_db)
        } else if over > 0.0 {
            slope * over
        } else {
            0.0
        }
    }

    #[inline]
    pub fn process_sample(&mut self, x: f32) -> f32 {
        let level = x.abs();
        let coeff = if level > self.envelope {
            self.attack_coeff
        } else {
            self.release_coeff
        };
        self.envelope = coeff * self.envelope + (1.0 - coeff) * level;

        let level_db = 20.0 * (self.envelope + 1e-9).log10();
        let gain = 10.0f32.powf(self.gain_reduction_db(level_db) / 20.0);
        x * gain
    }

    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        samples.iter().map(|&x| self.process_sample(x)).collect()
    }
}

/// One-pole smoothing coefficient for a time constant in seconds
fn time_constant(seconds: f32, sr: u32) -> f32 {
    if seconds <= 0.0 {
        0.0
    } else {
        (-1.0 / (seconds * sr as f32)).exp()
    }
}

/// Scale the buffer so its peak hits `target`, unless the peak is at or
/// below `epsilon`. Returns the factor applied.
pub fn peak_normalize(samples: &mut [f32], target: f32, epsilon: f32) -> f32 {
    let max_peak = crate::audio::peak(samples);
    if max_peak <= epsilon {
        return 1.0;
    }

    let factor = target / max_peak;
    for sample in samples.iter_mut() {
        *sample *= factor;
    }
    factor
}
