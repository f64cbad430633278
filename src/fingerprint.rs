//! Bark fingerprints and the harmonic resemblance matcher.
//!
//! A detected peak resembles a fingerprint peak when their frequencies are
//! close (`1 / |Δf|`, or 1 when identical, at least the harmonic cutoff) and
//! their normalized amplitudes are close (`exp(-|Δa|)` above the amplitude
//! cutoff). A fingerprint matches when the fraction of resembled detected
//! peaks exceeds the resemblance cutoff.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::spectrum::HarmonicPeak;

/// A known bark: its harmonic peaks as extracted from a labelled recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarkFingerprint {
    pub id: u32,
    pub peaks: Vec<HarmonicPeak>,
}

/// Cutoffs used by [`FingerprintMatcher`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchThresholds {
    pub harmonic_resemblance: f32,
    pub amplitude_resemblance: f32,
    pub resemblance_fraction: f32,
}

impl Default for MatchThresholds {
    fn default() -> Self {
        Self {
            harmonic_resemblance: 0.5,
            amplitude_resemblance: 0.9,
            resemblance_fraction: 0.4,
        }
    }
}

pub fn harmonic_resemblance(f1: f32, f2: f32) -> f32 {
    let diff = (f1 - f2).abs();
    if diff != 0.0 {
        1.0 / diff
    } else {
        1.0
    }
}

pub fn amplitude_resemblance(a1: f32, a2: f32) -> f32 {
    (-(a1 - a2).abs()).exp()
}

pub struct FingerprintMatcher {
    thresholds: MatchThresholds,
}

impl FingerprintMatcher {
    pub fn new(thresholds: MatchThresholds) -> Self {
        Self { thresholds }
    }

    fn resembles(&self, peak: &HarmonicPeak, reference: &HarmonicPeak) -> bool {
        harmonic_resemblance(peak.frequency, reference.frequency)
            >= self.thresholds.harmonic_resemblance
            && amplitude_resemblance(peak.amplitude, reference.amplitude)
                > self.thresholds.amplitude_resemblance
    }

    /// Fraction of `peaks` resembled by at least one fingerprint peak.
    /// `None` when there are no detected peaks.
    pub fn resemblance(&self, peaks: &[HarmonicPeak], fingerprint: &BarkFingerprint) -> Option<f32> {
        if peaks.is_empty() {
            return None;
        }
        let resembled = peaks
            .iter()
            .filter(|peak| fingerprint.peaks.iter().any(|r| self.resembles(peak, r)))
            .count();
        Some(resembled as f32 / peaks.len() as f32)
    }

    /// Whether `peaks` match `fingerprint`. An empty peak list never matches.
    pub fn compare_barks(&self, peaks: &[HarmonicPeak], fingerprint: &BarkFingerprint) -> bool {
        match self.resemblance(peaks, fingerprint) {
            Some(fraction) => {
                debug!(id = fingerprint.id, fraction, "resemblance");
                fraction > self.thresholds.resemblance_fraction
            }
            None => false,
        }
    }

    /// First fingerprint in library order that matches `peaks`.
    pub fn find_match<'a>(
        &self,
        peaks: &[HarmonicPeak],
        library: &'a [BarkFingerprint],
    ) -> Option<&'a BarkFingerprint> {
        let mut sorted = peaks.to_vec();
        sorted.sort_by(|a, b| a.frequency.total_cmp(&b.frequency));
        library.iter().find(|fp| self.compare_barks(&sorted, fp))
    }

    pub fn compare_with_data(&self, peaks: &[HarmonicPeak], library: &[BarkFingerprint]) -> bool {
        self.find_match(peaks, library).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(id: u32, peaks: &[(f32, f32)]) -> BarkFingerprint {
        BarkFingerprint {
            id,
            peaks: peaks.iter().map(|&(f, a)| HarmonicPeak::new(f, a)).collect(),
        }
    }

    fn peaks(list: &[(f32, f32)]) -> Vec<HarmonicPeak> {
        list.iter().map(|&(f, a)| HarmonicPeak::new(f, a)).collect()
    }

    #[test]
    fn resemblance_scores() {
        assert_eq!(harmonic_resemblance(500.0, 500.0), 1.0);
        assert_eq!(harmonic_resemblance(500.0, 502.0), 0.5);
        assert_eq!(amplitude_resemblance(0.7, 0.7), 1.0);
        assert!((amplitude_resemblance(1.0, 0.9) - (-0.1f32).exp()).abs() < 1e-6);
    }

    #[test]
    fn identical_peaks_match() {
        let reference = fp(1, &[(420.0, 1.0), (840.0, 0.7), (1260.0, 0.65)]);
        let matcher = FingerprintMatcher::new(MatchThresholds {
            resemblance_fraction: 0.99,
            ..MatchThresholds::default()
        });
        assert_eq!(matcher.resemblance(&reference.peaks, &reference), Some(1.0));
        assert!(matcher.compare_barks(&reference.peaks, &reference));
    }

    #[test]
    fn distant_frequencies_never_match() {
        let reference = fp(1, &[(500.0, 1.0), (1000.0, 0.8)]);
        let detected = peaks(&[(510.0, 1.0), (1020.0, 0.8)]);
        let matcher = FingerprintMatcher::new(MatchThresholds {
            resemblance_fraction: 0.0,
            ..MatchThresholds::default()
        });
        assert!(!matcher.compare_barks(&detected, &reference));
    }

    #[test]
    fn amplitude_mismatch_is_not_resembled() {
        let reference = fp(1, &[(500.0, 1.0)]);
        let detected = peaks(&[(500.0, 0.7)]);
        let matcher = FingerprintMatcher::new(MatchThresholds::default());
        assert_eq!(matcher.resemblance(&detected, &reference), Some(0.0));
    }

    #[test]
    fn empty_peaks_never_match() {
        let library = vec![fp(1, &[]), fp(2, &[(500.0, 1.0)])];
        for fraction in [-1.0, 0.0, 0.4, 0.99] {
            let matcher = FingerprintMatcher::new(MatchThresholds {
                harmonic_resemblance: 0.0,
                amplitude_resemblance: -1.0,
                resemblance_fraction: fraction,
            });
            assert!(!matcher.compare_barks(&[], &library[1]));
            assert!(!matcher.compare_with_data(&[], &library));
        }
    }

    #[test]
    fn fraction_must_strictly_exceed_cutoff() {
        let reference = fp(1, &[(500.0, 1.0)]);
        // One of two peaks resembled => 0.5
        let detected = peaks(&[(500.0, 1.0), (3000.0, 0.7)]);
        let at_cutoff = FingerprintMatcher::new(MatchThresholds {
            resemblance_fraction: 0.5,
            ..MatchThresholds::default()
        });
        assert!(!at_cutoff.compare_barks(&detected, &reference));
        let below = FingerprintMatcher::new(MatchThresholds::default());
        assert!(below.compare_barks(&detected, &reference));
    }

    #[test]
    fn first_matching_fingerprint_wins() {
        let library = vec![
            fp(7, &[(200.0, 1.0)]),
            fp(3, &[(500.0, 1.0)]),
            fp(1, &[(500.0, 1.0), (800.0, 0.8)]),
        ];
        let matcher = FingerprintMatcher::new(MatchThresholds::default());
        let detected = peaks(&[(800.0, 0.8), (500.0, 1.0)]);
        assert_eq!(matcher.find_match(&detected, &library).map(|f| f.id), Some(3));
        assert!(matcher.compare_with_data(&detected, &library));
        assert!(!matcher.compare_with_data(&detected, &[]));
    }

    #[test]
    fn reference_tone_scenario() {
        let library = vec![fp(1, &[(500.0, 1.0)])];
        let matcher = FingerprintMatcher::new(MatchThresholds {
            harmonic_resemblance: 0.5,
            amplitude_resemblance: 0.9,
            resemblance_fraction: 0.4,
        });
        assert!(matcher.compare_with_data(&peaks(&[(500.0, 1.0)]), &library));
    }
}
