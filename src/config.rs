use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::fingerprint::MatchThresholds;
use crate::spectrum::{DETECTION_PEAK_RATIO, LEARN_PEAK_RATIO};

pub const DEFAULT_CONFIG_FILE: &str = "barkwatch.toml";

const DEFAULT_VOICES: &[&str] = &["Papa", "Maman", "Héloïse", "Oscar", "Augustine"];

/// Upper bound for cooldown, delay and device timeout. Keeps every
/// `Instant + Duration` the engine computes far from overflow.
pub const MAX_WAIT_SECS: f32 = 7.0 * 24.0 * 3600.0;

/// Upper bound for the pretrigger and dwell spans, which are buffered in memory.
pub const MAX_WINDOW_SECS: f32 = 60.0;

/// Detection thresholds. The state machine copies these at every trigger, so
/// a change never affects a capture already in progress.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Frame volume (dB re. energy 1.0) that opens the gate.
    pub noise_db: f32,
    pub harmonic_resemblance: f32,
    pub amplitude_resemblance: f32,
    /// Fraction of detected peaks that must be resembled for a match.
    pub resemblance_fraction: f32,
    /// No feedback for this long after a confirmed bark.
    pub cooldown_secs: f32,
    /// Capture length after the gate opens.
    pub dwell_secs: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            noise_db: 10.0,
            harmonic_resemblance: 0.5,
            amplitude_resemblance: 0.9,
            resemblance_fraction: 0.4,
            cooldown_secs: 120.0,
            dwell_secs: 1.0,
        }
    }
}

fn invalid(field: &'static str, value: f32, reason: &'static str) -> ConfigError {
    ConfigError::Invalid {
        field,
        value: value as f64,
        reason,
    }
}

/// A span of seconds in `[0, max]`, or `(0, max]` when zero is not allowed.
fn check_secs(field: &'static str, value: f32, allow_zero: bool, max: f32) -> Result<(), ConfigError> {
    let lower_ok = if allow_zero { value >= 0.0 } else { value > 0.0 };
    if !(value.is_finite() && lower_ok) {
        let reason = if allow_zero {
            "must be a non-negative number of seconds"
        } else {
            "must be a positive number of seconds"
        };
        return Err(invalid(field, value, reason));
    }
    if value > max || Duration::try_from_secs_f32(value).is_err() {
        return Err(invalid(field, value, "is longer than allowed"));
    }
    Ok(())
}

/// Seconds to a `Duration`, clamped to `[0, MAX_WAIT_SECS]`; NaN becomes zero.
fn secs(value: f32) -> Duration {
    Duration::try_from_secs_f32(value.clamp(0.0, MAX_WAIT_SECS)).unwrap_or_default()
}

impl Thresholds {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.noise_db.is_finite() {
            return Err(invalid("noise_db", self.noise_db, "must be finite"));
        }
        if !(self.harmonic_resemblance.is_finite() && self.harmonic_resemblance >= 0.0) {
            return Err(invalid(
                "harmonic_resemblance",
                self.harmonic_resemblance,
                "must be a non-negative number",
            ));
        }
        if !(0.0..=1.0).contains(&self.amplitude_resemblance) {
            return Err(invalid(
                "amplitude_resemblance",
                self.amplitude_resemblance,
                "must be within [0, 1]",
            ));
        }
        if !(0.0..1.0).contains(&self.resemblance_fraction) {
            return Err(invalid(
                "resemblance_fraction",
                self.resemblance_fraction,
                "must be within [0, 1)",
            ));
        }
        check_secs("cooldown_secs", self.cooldown_secs, true, MAX_WAIT_SECS)?;
        check_secs("dwell_secs", self.dwell_secs, false, MAX_WINDOW_SECS)
    }

    /// Copy with the three remotely adjustable values replaced, validated.
    pub fn with_update(
        &self,
        noise_db: f32,
        resemblance_fraction: f32,
        cooldown_secs: f32,
    ) -> Result<Self, ConfigError> {
        let next = Self {
            noise_db,
            resemblance_fraction,
            cooldown_secs,
            ..*self
        };
        next.validate()?;
        Ok(next)
    }

    pub fn matching(&self) -> MatchThresholds {
        MatchThresholds {
            harmonic_resemblance: self.harmonic_resemblance,
            amplitude_resemblance: self.amplitude_resemblance,
            resemblance_fraction: self.resemblance_fraction,
        }
    }

    pub fn cooldown(&self) -> Duration {
        secs(self.cooldown_secs)
    }

    pub fn dwell_samples(&self, sample_rate: u32) -> usize {
        (self.dwell_secs * sample_rate as f32).round() as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Peak ratio for live detection.
    pub peak_ratio: f32,
    /// Peak ratio for fingerprints extracted by `learn`.
    pub learn_peak_ratio: f32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            peak_ratio: DETECTION_PEAK_RATIO,
            learn_peak_ratio: LEARN_PEAK_RATIO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub fingerprints: PathBuf,
    pub events: PathBuf,
    /// Last thresholds accepted at runtime, restored at start-up.
    pub parameters: PathBuf,
    /// One sub-directory of clips per voice.
    pub audio_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            fingerprints: PathBuf::from("data/fingerprints.json"),
            events: PathBuf::from("data/events.jsonl"),
            parameters: PathBuf::from("data/parameters.json"),
            audio_dir: PathBuf::from("audio"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub program: String,
    /// Extra arguments placed before the clip path.
    pub args: Vec<String>,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        let program = if cfg!(target_os = "macos") {
            "afplay"
        } else {
            "ffplay"
        };
        let args = if cfg!(target_os = "macos") {
            Vec::new()
        } else {
            vec!["-nodisp".into(), "-autoexit".into(), "-loglevel".into(), "quiet".into()]
        };
        Self {
            program: program.into(),
            args,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Rate the detector runs at; device audio is resampled to it.
    pub sample_rate: u32,
    /// Samples per gate frame.
    pub frame_size: usize,
    pub pretrigger_secs: f32,
    pub delay_before_message_secs: f32,
    /// No audio for this long is treated as a lost device.
    pub device_timeout_secs: f32,
    /// Input device name; the host default when absent.
    pub device: Option<String>,
    pub voices: Vec<String>,
    pub thresholds: Thresholds,
    pub analysis: AnalysisConfig,
    pub paths: PathsConfig,
    pub playback: PlaybackConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            frame_size: 1024,
            pretrigger_secs: 0.5,
            delay_before_message_secs: 2.0,
            device_timeout_secs: 3.0,
            device: None,
            voices: DEFAULT_VOICES.iter().map(|v| v.to_string()).collect(),
            thresholds: Thresholds::default(),
            analysis: AnalysisConfig::default(),
            paths: PathsConfig::default(),
            playback: PlaybackConfig::default(),
        }
    }
}

impl Config {
    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate == 0 {
            return Err(invalid("sample_rate", 0.0, "must be positive"));
        }
        if self.frame_size == 0 {
            return Err(invalid("frame_size", 0.0, "must be positive"));
        }
        check_secs("pretrigger_secs", self.pretrigger_secs, true, MAX_WINDOW_SECS)?;
        check_secs(
            "delay_before_message_secs",
            self.delay_before_message_secs,
            true,
            MAX_WAIT_SECS,
        )?;
        check_secs("device_timeout_secs", self.device_timeout_secs, false, MAX_WAIT_SECS)?;
        for (field, ratio) in [
            ("analysis.peak_ratio", self.analysis.peak_ratio),
            ("analysis.learn_peak_ratio", self.analysis.learn_peak_ratio),
        ] {
            if !(0.0..1.0).contains(&ratio) {
                return Err(invalid(field, ratio, "must be within [0, 1)"));
            }
        }
        self.thresholds.validate()
    }

    pub fn delay_before_message(&self) -> Duration {
        secs(self.delay_before_message_secs)
    }

    pub fn device_timeout(&self) -> Duration {
        secs(self.device_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.sample_rate, 44100);
        assert_eq!(config.voices.len(), 5);
        assert_eq!(config.thresholds.dwell_samples(44100), 44100);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            frame_size = 512
            voices = ["Papa"]

            [thresholds]
            noise_db = 20.0
            cooldown_secs = 30
            "#,
        )
        .unwrap();
        assert_eq!(config.frame_size, 512);
        assert_eq!(config.voices, vec!["Papa".to_string()]);
        assert_eq!(config.thresholds.noise_db, 20.0);
        assert_eq!(config.thresholds.cooldown_secs, 30.0);
        assert_eq!(config.thresholds.resemblance_fraction, 0.4);
        assert_eq!(config.analysis.peak_ratio, DETECTION_PEAK_RATIO);
    }

    #[test]
    fn invalid_toml_values_are_rejected() {
        let err = Config::from_toml("[thresholds]\nresemblance_fraction = 1.5\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "resemblance_fraction",
                ..
            }
        ));
        assert!(matches!(
            Config::from_toml("frame_size = \"big\"").unwrap_err(),
            ConfigError::Parse(_)
        ));
    }

    #[test]
    fn missing_file_means_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn update_rejects_and_keeps_previous() {
        let current = Thresholds::default();
        let err = current.with_update(f32::NAN, 0.5, 10.0).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "noise_db", .. }));
        assert!(current.with_update(12.0, 0.5, -1.0).is_err());
        assert_eq!(current, Thresholds::default());

        let next = current.with_update(15.0, 0.6, 45.0).unwrap();
        assert_eq!(next.noise_db, 15.0);
        assert_eq!(next.resemblance_fraction, 0.6);
        assert_eq!(next.cooldown(), Duration::from_secs(45));
        assert_eq!(next.harmonic_resemblance, current.harmonic_resemblance);
    }

    #[test]
    fn oversized_durations_are_rejected() {
        let current = Thresholds::default();
        let err = current.with_update(10.0, 0.4, 1e30).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "cooldown_secs", .. }));
        assert!(current.with_update(10.0, 0.4, f32::INFINITY).is_err());
        assert!(current.with_update(10.0, 0.4, MAX_WAIT_SECS * 2.0).is_err());
        let longest = current.with_update(10.0, 0.4, MAX_WAIT_SECS).unwrap();
        let now = std::time::Instant::now();
        assert!(now.checked_add(longest.cooldown()).is_some());

        for text in [
            "delay_before_message_secs = 1e30",
            "device_timeout_secs = 1e30",
            "pretrigger_secs = 3600.0",
            "[thresholds]\ndwell_secs = 1e12",
        ] {
            assert!(
                matches!(Config::from_toml(text), Err(ConfigError::Invalid { .. })),
                "{text} should be rejected"
            );
        }
    }

    #[test]
    fn unvalidated_durations_are_clamped() {
        let thresholds = Thresholds {
            cooldown_secs: f32::NAN,
            ..Thresholds::default()
        };
        assert_eq!(thresholds.cooldown(), Duration::ZERO);
        let config = Config {
            delay_before_message_secs: 1e30,
            ..Config::default()
        };
        assert_eq!(
            config.delay_before_message(),
            Duration::from_secs_f32(MAX_WAIT_SECS)
        );
    }
}
