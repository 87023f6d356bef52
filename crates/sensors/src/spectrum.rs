//! Spectrum analysis for the audio adapter.
//!
//! Mirrors a browser analyser node: Blackman window, FFT magnitude per bin
//! normalised by the FFT size, exponential smoothing over time, conversion to
//! decibels, and a linear map of `[min_db, max_db]` onto [0, 1].

use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};

/// Band energies of the latest analysis, each in [0, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioBands {
    pub low: f32,
    pub mid: f32,
    pub high: f32,
    /// Mean of every normalised bin.
    pub rms: f32,
}

impl AudioBands {
    pub const SILENT: AudioBands = AudioBands {
        low: 0.0,
        mid: 0.0,
        high: 0.0,
        rms: 0.0,
    };

    pub(crate) fn to_array(self) -> [f32; 4] {
        [self.low, self.mid, self.high, self.rms]
    }

    pub(crate) fn from_array([low, mid, high, rms]: [f32; 4]) -> Self {
        Self {
            low,
            mid,
            high,
            rms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrumConfig {
    /// FFT length in samples. Must be a power of two.
    pub fft_size: usize,
    /// Weight of the previous magnitude in the temporal smoothing, in [0, 1).
    pub smoothing: f32,
    pub min_db: f32,
    pub max_db: f32,
    /// `[low, mid, high]` band edges in Hz.
    pub bands: [(f32, f32); 3],
}

impl Default for SpectrumConfig {
    fn default() -> Self {
        Self {
            fft_size: 2048,
            smoothing: 0.85,
            min_db: -100.0,
            max_db: -30.0,
            bands: [(20.0, 250.0), (250.0, 2000.0), (2000.0, 8000.0)],
        }
    }
}

pub struct SpectrumAnalyzer {
    config: SpectrumConfig,
    sample_rate: u32,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    buf: Vec<Complex<f32>>,
    smoothed: Vec<f32>,
    levels: Vec<f32>,
}

impl SpectrumAnalyzer {
    /// `fft_size` is rounded up to a power of two (minimum 32).
    pub fn new(mut config: SpectrumConfig, sample_rate: u32) -> Self {
        config.fft_size = config.fft_size.max(32).next_power_of_two();
        config.smoothing = config.smoothing.clamp(0.0, 0.999);
        let n = config.fft_size;
        let fft = FftPlanner::<f32>::new().plan_fft_forward(n);
        Self {
            window: blackman(n),
            buf: vec![Complex { re: 0.0, im: 0.0 }; n],
            smoothed: vec![0.0; n / 2],
            levels: vec![0.0; n / 2],
            fft,
            sample_rate: sample_rate.max(1),
            config,
        }
    }

    pub fn fft_size(&self) -> usize {
        self.config.fft_size
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Normalised level of every bin from the last [`process`](Self::process).
    pub fn levels(&self) -> &[f32] {
        &self.levels
    }

    /// Analyses the most recent `fft_size` samples, oldest first.
    ///
    /// `samples` shorter than the FFT size are zero-padded at the front.
    pub fn process(&mut self, samples: &[f32]) -> AudioBands {
        let n = self.config.fft_size;
        let take = samples.len().min(n);
        let pad = n - take;
        let recent = &samples[samples.len() - take..];
        for (i, c) in self.buf.iter_mut().enumerate() {
            let s = if i < pad { 0.0 } else { recent[i - pad] };
            *c = Complex {
                re: s * self.window[i],
                im: 0.0,
            };
        }
        self.fft.process(&mut self.buf);

        let tau = self.config.smoothing;
        let span = (self.config.max_db - self.config.min_db).max(f32::EPSILON);
        for (k, c) in self.buf.iter().take(n / 2).enumerate() {
            let mag = c.norm() / n as f32;
            let s = tau * self.smoothed[k] + (1.0 - tau) * mag;
            self.smoothed[k] = if s.is_finite() { s } else { 0.0 };
            let db = 20.0 * self.smoothed[k].log10();
            self.levels[k] = ((db - self.config.min_db) / span).clamp(0.0, 1.0);
        }

        let [low, mid, high] = self.config.bands.map(|(f0, f1)| self.band_mean(f0, f1));
        let rms = self.levels.iter().sum::<f32>() / self.levels.len() as f32;
        AudioBands {
            low,
            mid,
            high,
            rms,
        }
    }

    /// Mean level of bins `floor(f0/nyq·n) ..= min(n−1, ceil(f1/nyq·n))`.
    pub fn band_mean(&self, f0: f32, f1: f32) -> f32 {
        let bins = self.levels.len();
        let (i0, i1) = band_bins(f0, f1, self.sample_rate, bins);
        if i0 > i1 {
            return 0.0;
        }
        let slice = &self.levels[i0..=i1];
        slice.iter().sum::<f32>() / slice.len() as f32
    }
}

/// Inclusive bin range covering `[f0, f1]` Hz.
pub fn band_bins(f0: f32, f1: f32, sample_rate: u32, bins: usize) -> (usize, usize) {
    let nyquist = sample_rate as f32 / 2.0;
    let last = bins.saturating_sub(1);
    let i0 = ((f0 / nyquist) * bins as f32).floor().max(0.0) as usize;
    let i1 = (((f1 / nyquist) * bins as f32).ceil().max(0.0) as usize).min(last);
    (i0, i1)
}

fn blackman(n: usize) -> Vec<f32> {
    use std::f32::consts::TAU;
    let (a0, a1, a2) = (0.42_f32, 0.5_f32, 0.08_f32);
    (0..n)
        .map(|i| {
            let x = i as f32 / n as f32;
            a0 - a1 * (TAU * x).cos() + a2 * (2.0 * TAU * x).cos()
        })
        .collect()
}
