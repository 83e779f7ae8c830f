//! Byte-scale spectral energy of the latest capture window.
//!
//! Mirrors a browser analyser node: Blackman window, real FFT, magnitude
//! normalised by the FFT size, exponential smoothing against the previous
//! frame, then decibels mapped linearly from `[min_db, max_db]` onto
//! `0..=255`. The reported energy is the mean over the `fft_size / 2` bins.

use std::f32::consts::PI;
use std::fmt;
use std::sync::Arc;

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};
use tracing::warn;

use crate::config::AudioConfig;

pub struct SpectrumAnalyser {
    fft_size: usize,
    smoothing: f32,
    min_db: f32,
    max_db: f32,
    plan: Arc<dyn RealToComplex<f32>>,
    input: Vec<f32>,
    spectrum: Vec<Complex32>,
    scratch: Vec<Complex32>,
    window: Vec<f32>,
    smoothed: Vec<f32>,
}

impl SpectrumAnalyser {
    pub fn new(config: &AudioConfig) -> Self {
        let fft_size = config.fft_size.max(2);
        let mut planner = RealFftPlanner::<f32>::new();
        let plan = planner.plan_fft_forward(fft_size);
        let input = plan.make_input_vec();
        let spectrum = plan.make_output_vec();
        let scratch = plan.make_scratch_vec();
        let window = (0..fft_size).map(|n| blackman_value(n, fft_size)).collect();

        Self {
            fft_size,
            smoothing: config.smoothing.clamp(0.0, 0.99),
            min_db: config.min_db,
            max_db: config.max_db.max(config.min_db + 1.0),
            plan,
            input,
            spectrum,
            scratch,
            window,
            smoothed: vec![0.0; fft_size / 2],
        }
    }

    /// Number of time-domain samples consumed per analysis.
    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Analyse one window and return the mean byte energy in `0.0..=255.0`.
    /// `time_domain` shorter than the FFT size is zero-padded at the front.
    pub fn average_energy(&mut self, time_domain: &[f32]) -> f32 {
        let n = self.fft_size;
        let take = time_domain.len().min(n);
        let pad = n - take;
        self.input[..pad].fill(0.0);
        let tail = &time_domain[time_domain.len() - take..];
        for (i, &s) in tail.iter().enumerate() {
            self.input[pad + i] = s * self.window[pad + i];
        }

        if let Err(e) =
            self.plan
                .process_with_scratch(&mut self.input, &mut self.spectrum, &mut self.scratch)
        {
            warn!(error = %e, "spectrum fft failed");
            return 0.0;
        }

        let scale = 1.0 / n as f32;
        let range = self.max_db - self.min_db;
        let mut total = 0.0f32;
        for (bin, smoothed) in self.smoothed.iter_mut().enumerate() {
            let magnitude = self.spectrum[bin].norm() * scale;
            *smoothed = self.smoothing * *smoothed + (1.0 - self.smoothing) * magnitude;
            if *smoothed <= f32::MIN_POSITIVE {
                continue;
            }
            let db = 20.0 * smoothed.log10();
            let byte = (255.0 / range * (db - self.min_db)).floor().clamp(0.0, 255.0);
            total += byte;
        }

        if self.smoothed.is_empty() {
            0.0
        } else {
            total / self.smoothed.len() as f32
        }
    }
}

impl fmt::Debug for SpectrumAnalyser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectrumAnalyser")
            .field("fft_size", &self.fft_size)
            .field("smoothing", &self.smoothing)
            .field("min_db", &self.min_db)
            .field("max_db", &self.max_db)
            .finish()
    }
}

fn blackman_value(index: usize, len: usize) -> f32 {
    let x = index as f32 / len as f32;
    0.42 - 0.5 * (2.0 * PI * x).cos() + 0.08 * (4.0 * PI * x).cos()
}
