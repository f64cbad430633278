/// Reference energy for the dB conversion.
const REFERENCE_ENERGY: f32 = 1.0;

/// Sum of squared samples over one frame.
pub fn frame_energy(samples: &[f32]) -> f32 {
    samples.iter().map(|&s| s * s).sum()
}

/// Frame loudness in dB relative to [`REFERENCE_ENERGY`].
/// A silent frame yields `-inf`, which never clears any threshold.
pub fn volume_db(samples: &[f32]) -> f32 {
    let energy = frame_energy(samples);
    if energy <= 0.0 {
        return f32::NEG_INFINITY;
    }
    10.0 * (energy / REFERENCE_ENERGY).log10()
}

/// Per-frame loudness check that decides whether a capture should begin.
#[derive(Debug, Clone, Copy)]
pub struct EnergyGate {
    noise_threshold_db: f32,
}

impl EnergyGate {
    pub fn new(noise_threshold_db: f32) -> Self {
        Self { noise_threshold_db }
    }

    /// Returns the frame volume if it is strictly above the noise threshold.
    pub fn check(&self, frame: &[f32]) -> Option<f32> {
        let volume = volume_db(frame);
        (volume > self.noise_threshold_db).then_some(volume)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silent_frame_is_negative_infinity() {
        assert_eq!(volume_db(&[0.0; 256]), f32::NEG_INFINITY);
        assert_eq!(volume_db(&[]), f32::NEG_INFINITY);
        assert!(EnergyGate::new(-1000.0).check(&[0.0; 16]).is_none());
    }

    #[test]
    fn volume_matches_energy() {
        // 10 samples of 1.0 => energy 10 => 10 dB
        let frame = [1.0f32; 10];
        assert!((volume_db(&frame) - 10.0).abs() < 1e-5);
        assert!((frame_energy(&[0.5, -0.5]) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn gate_is_strictly_above_threshold() {
        let gate = EnergyGate::new(10.0);
        assert!(gate.check(&[1.0f32; 9]).is_none());
        assert!(gate.check(&[1.0f32; 11]).is_some());
        assert!(EnergyGate::new(f32::INFINITY).check(&[1.0f32; 11]).is_none());
        assert!(gate.check(&[0.01f32; 1024]).is_none());
    }
}
