//! Fingerprint library and event log persistence.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Local};
use serde::{Deserialize, Serialize};

use crate::config::Thresholds;
use crate::error::StoreError;
use crate::fingerprint::BarkFingerprint;
use crate::spectrum::HarmonicPeak;

/// Source of the fingerprint library. Order of the result is match priority.
pub trait FingerprintStore: Send + Sync {
    fn load_fingerprints(&self) -> Result<Vec<BarkFingerprint>, StoreError>;
}

/// How a feedback was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    Automatic,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarkEvent {
    pub timestamp: DateTime<Local>,
    pub mode: Mode,
    /// Voice played back, if any clip could be chosen.
    pub voice: Option<String>,
}

impl BarkEvent {
    pub fn now(mode: Mode, voice: Option<String>) -> Self {
        Self {
            timestamp: Local::now(),
            mode,
            voice,
        }
    }
}

/// Sink for detected and manual feedback events.
pub trait EventLog: Send + Sync {
    fn record(&self, event: &BarkEvent) -> Result<(), StoreError>;
}

/// The remotely adjustable detection parameters, as persisted between runs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Parameters {
    pub noise_db: f32,
    pub resemblance_fraction: f32,
    pub cooldown_secs: f32,
}

impl From<Thresholds> for Parameters {
    fn from(t: Thresholds) -> Self {
        Self {
            noise_db: t.noise_db,
            resemblance_fraction: t.resemblance_fraction,
            cooldown_secs: t.cooldown_secs,
        }
    }
}

/// Keeps the last accepted [`Parameters`] across restarts.
pub trait ParameterStore: Send + Sync {
    /// `None` when nothing has been saved yet.
    fn load_parameters(&self) -> Result<Option<Parameters>, StoreError>;
    fn save_parameters(&self, parameters: &Parameters) -> Result<(), StoreError>;
}

/// Fingerprints kept as one JSON array, in insertion order.
pub struct JsonFingerprintStore {
    path: PathBuf,
}

impl JsonFingerprintStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store `peaks` as a new fingerprint with the next free id.
    pub fn append(&self, peaks: Vec<HarmonicPeak>) -> Result<BarkFingerprint, StoreError> {
        let mut library = self.load_fingerprints()?;
        let id = library.iter().map(|f| f.id).max().unwrap_or(0) + 1;
        let fingerprint = BarkFingerprint { id, peaks };
        library.push(fingerprint.clone());
        write_json(&self.path, &library)?;
        Ok(fingerprint)
    }
}

impl FingerprintStore for JsonFingerprintStore {
    fn load_fingerprints(&self) -> Result<Vec<BarkFingerprint>, StoreError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }
}

/// Events appended as JSON lines.
pub struct JsonlEventLog {
    path: PathBuf,
}

impl JsonlEventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Events at or after `since`, newest first, at most `limit`.
    /// Unparseable lines are skipped.
    pub fn recent(&self, since: DateTime<Local>, limit: usize) -> Result<Vec<BarkEvent>, StoreError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut events = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<BarkEvent>(&line) {
                Ok(event) if event.timestamp >= since => events.push(event),
                Ok(_) => {}
                Err(e) => tracing::debug!(error = %e, "skipping malformed event line"),
            }
        }
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        events.truncate(limit);
        Ok(events)
    }

    /// Recent history as shown by the CLI: last three days, five entries.
    pub fn last_barks(&self) -> Result<Vec<BarkEvent>, StoreError> {
        self.recent(Local::now() - Duration::days(3), 5)
    }
}

impl EventLog for JsonlEventLog {
    fn record(&self, event: &BarkEvent) -> Result<(), StoreError> {
        ensure_parent(&self.path)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        file.write_all(&line)?;
        Ok(())
    }
}

/// Parameters kept as a single JSON object, replaced on every save.
pub struct JsonParameterStore {
    path: PathBuf,
}

impl JsonParameterStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ParameterStore for JsonParameterStore {
    fn load_parameters(&self) -> Result<Option<Parameters>, StoreError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_reader(BufReader::new(file))?))
    }

    fn save_parameters(&self, parameters: &Parameters) -> Result<(), StoreError> {
        write_json(&self.path, parameters)
    }
}

/// Write through a temporary file so readers never see a partial document.
fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    ensure_parent(path)?;
    let tmp = path.with_extension("json.tmp");
    let mut writer = BufWriter::new(File::create(&tmp)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush()?;
    drop(writer);
    fs::rename(&tmp, path)?;
    Ok(())
}

fn ensure_parent(path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fingerprint_file_is_empty_library() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFingerprintStore::new(dir.path().join("none.json"));
        assert!(store.load_fingerprints().unwrap().is_empty());
    }

    #[test]
    fn append_assigns_increasing_ids_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFingerprintStore::new(dir.path().join("db/fingerprints.json"));
        let first = store.append(vec![HarmonicPeak::new(500.0, 1.0)]).unwrap();
        let second = store
            .append(vec![HarmonicPeak::new(700.0, 1.0), HarmonicPeak::new(1400.0, 0.8)])
            .unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);

        let library = store.load_fingerprints().unwrap();
        assert_eq!(library, vec![first, second]);
    }

    #[test]
    fn corrupt_fingerprint_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fingerprints.json");
        fs::write(&path, "not json").unwrap();
        let err = JsonFingerprintStore::new(&path).load_fingerprints().unwrap_err();
        assert!(matches!(err, StoreError::Json(_)));
    }

    #[test]
    fn events_round_trip_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let log = JsonlEventLog::new(dir.path().join("events.jsonl"));
        let now = Local::now();
        let old = BarkEvent {
            timestamp: now - Duration::days(10),
            mode: Mode::Automatic,
            voice: Some("Papa".into()),
        };
        let earlier = BarkEvent {
            timestamp: now - Duration::hours(2),
            mode: Mode::Manual,
            voice: Some("Maman".into()),
        };
        let latest = BarkEvent {
            timestamp: now - Duration::minutes(1),
            mode: Mode::Automatic,
            voice: None,
        };
        for event in [&old, &earlier, &latest] {
            log.record(event).unwrap();
        }

        let recent = log.last_barks().unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].mode, Mode::Automatic);
        assert_eq!(recent[0].voice, None);
        assert_eq!(recent[1].voice.as_deref(), Some("Maman"));

        assert_eq!(log.recent(now - Duration::days(30), 1).unwrap().len(), 1);
    }

    #[test]
    fn malformed_event_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let log = JsonlEventLog::new(&path);
        log.record(&BarkEvent::now(Mode::Manual, Some("Oscar".into())))
            .unwrap();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{{garbage").unwrap();
        let recent = log.recent(Local::now() - Duration::hours(1), 10).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].voice.as_deref(), Some("Oscar"));
    }

    #[test]
    fn parameters_survive_a_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data/parameters.json");
        assert_eq!(JsonParameterStore::new(&path).load_parameters().unwrap(), None);

        let saved = Parameters::from(Thresholds::default().with_update(18.0, 0.55, 30.0).unwrap());
        JsonParameterStore::new(&path).save_parameters(&saved).unwrap();
        let replaced = Parameters {
            noise_db: 22.0,
            ..saved
        };
        JsonParameterStore::new(&path).save_parameters(&replaced).unwrap();

        let reopened = JsonParameterStore::new(&path);
        assert_eq!(reopened.load_parameters().unwrap(), Some(replaced));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn corrupt_parameter_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parameters.json");
        fs::write(&path, "{\"noise_db\": ").unwrap();
        assert!(matches!(
            JsonParameterStore::new(&path).load_parameters(),
            Err(StoreError::Json(_))
        ));
    }
}
