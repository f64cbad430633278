use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use serde::{Deserialize, Serialize};

/// Default ratio of the spectrum maximum a bin must exceed to count as a peak
/// during live detection.
pub const DETECTION_PEAK_RATIO: f32 = 0.6;

/// Default ratio used when extracting fingerprints from labelled recordings.
pub const LEARN_PEAK_RATIO: f32 = 0.1;

/// A spectral peak: frequency in Hz and amplitude normalized to the spectrum maximum.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HarmonicPeak {
    pub frequency: f32,
    pub amplitude: f32,
}

impl HarmonicPeak {
    pub fn new(frequency: f32, amplitude: f32) -> Self {
        Self {
            frequency,
            amplitude,
        }
    }
}

/// Everything recorded from just before a trigger through the end of the dwell.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisWindow {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AnalysisWindow {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Full-window DFT and harmonic peak extraction.
pub struct SpectralAnalyzer {
    planner: FftPlanner<f32>,
    threshold_ratio: f32,
}

impl SpectralAnalyzer {
    pub fn new(threshold_ratio: f32) -> Self {
        Self {
            planner: FftPlanner::new(),
            threshold_ratio,
        }
    }

    /// Normalized magnitude spectrum `|X| / N`, divided by its maximum.
    /// Returns an all-zero spectrum when the window is silent.
    pub fn power_spectrum(&mut self, samples: &[f32]) -> Vec<f32> {
        let n = samples.len();
        if n == 0 {
            return Vec::new();
        }

        let fft = self.planner.plan_fft_forward(n);
        let mut buf: Vec<Complex<f32>> = samples.iter().map(|&s| Complex::new(s, 0.0)).collect();
        fft.process(&mut buf);

        let mut power: Vec<f32> = buf.iter().map(|c| c.norm() / n as f32).collect();
        let max_amplitude = power.iter().copied().fold(0.0f32, f32::max);
        if max_amplitude <= 0.0 || !max_amplitude.is_finite() {
            power.fill(0.0);
            return power;
        }
        for p in &mut power {
            *p /= max_amplitude;
        }
        power
    }

    /// Peaks from bins `1 .. N/2 - 1` above the threshold ratio, ascending in frequency.
    pub fn analyze(&mut self, window: &AnalysisWindow) -> Vec<HarmonicPeak> {
        let power = self.power_spectrum(&window.samples);
        let n = power.len();
        let resolution = window.sample_rate as f32 / n.max(1) as f32;

        (1..n / 2)
            .filter(|&bin| power[bin] > self.threshold_ratio)
            .map(|bin| HarmonicPeak::new(bin as f32 * resolution, power[bin]))
            .collect()
    }
}

impl Default for SpectralAnalyzer {
    fn default() -> Self {
        Self::new(DETECTION_PEAK_RATIO)
    }
}
