//! Detection loop and feedback worker.
//!
//! The loop thread pops fixed-size frames from the capture queue and drives
//! the [`DetectionStateMachine`]. Everything slow (spectral analysis, store
//! access, the pre-feedback delay, event logging, playback) runs on a single
//! worker thread, which receives finished windows by value and answers with a
//! verdict. Manual triggers go through the same worker, so they are serialized
//! with automatic feedback.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use ringbuf::traits::*;
use tracing::{debug, error, info, warn};

use crate::audio::AudioInput;
use crate::config::{Config, Thresholds};
use crate::detector::{AnalysisJob, DetectionStateMachine};
use crate::error::{ConfigError, EngineError};
use crate::feedback::FeedbackSelector;
use crate::fingerprint::FingerprintMatcher;
use crate::playback::PlaybackSink;
use crate::spectrum::SpectralAnalyzer;
use crate::state::DetectionState;
use crate::store::{BarkEvent, EventLog, FingerprintStore, Mode, ParameterStore};
use crate::timer::ShutdownSignal;

/// How long the loop naps when a full frame is not yet available.
const IDLE_POLL: Duration = Duration::from_millis(5);

/// How often a stopped supervisor looks for `start` or shutdown.
const PAUSE_POLL: Duration = Duration::from_millis(100);

/// External services the engine talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub fingerprints: Arc<dyn FingerprintStore>,
    pub events: Arc<dyn EventLog>,
    pub player: Arc<dyn PlaybackSink>,
    pub parameters: Arc<dyn ParameterStore>,
}

enum Command {
    SetThresholds(Thresholds),
    Manual(Option<String>),
    ReloadVoices,
}

/// What the detection loop last published.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Status {
    state: DetectionState,
    cycle: u64,
}

/// Cloneable control surface for a running (or not yet running) engine.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<Command>,
    status: Arc<Mutex<Status>>,
    thresholds: Arc<Mutex<Thresholds>>,
    parameters: Arc<dyn ParameterStore>,
    detecting: Arc<AtomicBool>,
    shutdown: ShutdownSignal,
}

impl EngineHandle {
    pub fn state(&self) -> DetectionState {
        self.status.lock().state
    }

    /// Number of captures started in the current session.
    pub fn cycle(&self) -> u64 {
        self.status.lock().cycle
    }

    fn publish(&self, machine: &DetectionStateMachine) {
        *self.status.lock() = Status {
            state: machine.state(),
            cycle: machine.cycle(),
        };
    }

    /// Latest accepted thresholds.
    pub fn thresholds(&self) -> Thresholds {
        *self.thresholds.lock()
    }

    /// Update the three remotely adjustable thresholds. Invalid values are
    /// rejected and the previous configuration is kept. Accepted values apply
    /// from the next trigger and are saved for the next start.
    pub fn set_thresholds(
        &self,
        noise_db: f32,
        resemblance_fraction: f32,
        cooldown_secs: f32,
    ) -> Result<Thresholds, ConfigError> {
        let mut current = self.thresholds.lock();
        let next = current.with_update(noise_db, resemblance_fraction, cooldown_secs)?;
        *current = next;
        self.send(Command::SetThresholds(next));
        info!(noise_db, resemblance_fraction, cooldown_secs, "thresholds updated");
        if let Err(e) = self.parameters.save_parameters(&next.into()) {
            warn!(error = %e, "failed to save parameters");
        }
        Ok(next)
    }

    /// Log a manual event and play `voice` (or a random voice), bypassing the gate.
    pub fn manual_trigger(&self, voice: Option<String>) {
        self.send(Command::Manual(voice));
    }

    /// Rescan the clip directories.
    pub fn reload_voices(&self) {
        self.send(Command::ReloadVoices);
    }

    fn send(&self, command: Command) {
        let what = match &command {
            Command::SetThresholds(_) => "threshold update",
            Command::Manual(_) => "manual trigger",
            Command::ReloadVoices => "voice reload",
        };
        if self.commands.send(command).is_err() {
            warn!(command = what, "engine is gone, command dropped");
        }
    }

    /// End the current session without shutting down; `run` returns `Ok(())`.
    pub fn stop_detection(&self) {
        if self.detecting.swap(false, Ordering::SeqCst) {
            info!("detection stop requested");
        }
    }

    /// Allow `run` to be entered again after [`stop_detection`](Self::stop_detection).
    pub fn start_detection(&self) {
        if !self.detecting.swap(true, Ordering::SeqCst) {
            info!("detection start requested");
        }
    }

    pub fn is_detecting(&self) -> bool {
        self.detecting.load(Ordering::SeqCst)
    }

    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }
}

pub struct Engine {
    config: Config,
    collaborators: Collaborators,
    selector: Arc<Mutex<FeedbackSelector>>,
    commands: mpsc::Receiver<Command>,
    handle: EngineHandle,
}

impl Engine {
    /// Validate `config` and apply any parameters saved by a previous run
    /// over its thresholds. Unreadable or invalid saved parameters are
    /// logged and ignored.
    pub fn new(
        mut config: Config,
        collaborators: Collaborators,
        selector: FeedbackSelector,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        match collaborators.parameters.load_parameters() {
            Ok(Some(p)) => match config
                .thresholds
                .with_update(p.noise_db, p.resemblance_fraction, p.cooldown_secs)
            {
                Ok(restored) => {
                    info!(
                        noise_db = p.noise_db,
                        resemblance_fraction = p.resemblance_fraction,
                        cooldown_secs = p.cooldown_secs,
                        "saved parameters restored"
                    );
                    config.thresholds = restored;
                }
                Err(e) => warn!(error = %e, "ignoring saved parameters"),
            },
            Ok(None) => {}
            Err(e) => warn!(error = %e, "cannot read saved parameters"),
        }

        let (tx, commands) = mpsc::channel();
        let handle = EngineHandle {
            commands: tx,
            status: Arc::new(Mutex::new(Status::default())),
            thresholds: Arc::new(Mutex::new(config.thresholds)),
            parameters: collaborators.parameters.clone(),
            detecting: Arc::new(AtomicBool::new(true)),
            shutdown: ShutdownSignal::new(),
        };
        Ok(Self {
            config,
            collaborators,
            selector: Arc::new(Mutex::new(selector)),
            commands,
            handle,
        })
    }

    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    /// Run one detection session on `input` until shutdown, stop or device loss.
    ///
    /// Returns `Ok(())` after a requested shutdown or stop and
    /// [`EngineError::DeviceLost`] when the audio stops; the engine can then
    /// be run again on a fresh input. Commands queued while no session runs
    /// are handled when the next one starts.
    pub fn run(&mut self, mut input: AudioInput) -> Result<(), EngineError> {
        let (job_tx, job_rx) = mpsc::channel::<Job>();
        let (verdict_tx, verdict_rx) = mpsc::channel::<Verdict>();

        let worker = FeedbackWorker {
            collaborators: self.collaborators.clone(),
            selector: self.selector.clone(),
            analyzer: SpectralAnalyzer::new(self.config.analysis.peak_ratio),
            delay: self.config.delay_before_message(),
            audio_dir: self.config.paths.audio_dir.clone(),
            voices: self.config.voices.clone(),
            shutdown: self.handle.shutdown.clone(),
        };
        let worker = thread::Builder::new()
            .name("bark-feedback".into())
            .spawn(move || worker.run(job_rx, verdict_tx))
            .map_err(|e| EngineError::Worker(e.to_string()))?;

        let mut machine = DetectionStateMachine::new(
            self.config.sample_rate,
            self.config.pretrigger_secs,
            self.handle.thresholds(),
        );
        let result = self.detection_loop(&mut machine, &mut input, &job_tx, &verdict_rx);

        machine.shutdown();
        self.handle.publish(&machine);
        drop(job_tx);
        if worker.join().is_err() {
            error!("feedback worker panicked");
        }
        result
    }

    /// Run sessions until shutdown, reopening the input after device loss.
    ///
    /// `open` is called for every session; the guard it returns (the device
    /// stream) is dropped when that session ends. While detection is stopped
    /// no input is held open. A failed open and a lost device both count as a
    /// restart; once `max_restarts` is used up the last error is returned.
    /// A session ended by `stop_detection` resets the count.
    pub fn supervise<G>(
        &mut self,
        max_restarts: u32,
        backoff: Duration,
        mut open: impl FnMut() -> anyhow::Result<(G, AudioInput)>,
    ) -> anyhow::Result<()> {
        let shutdown = self.handle.shutdown.clone();
        let mut restarts = 0;
        while !shutdown.is_triggered() {
            if !self.handle.is_detecting() {
                shutdown.sleep(PAUSE_POLL);
                continue;
            }

            let failure = match open() {
                Ok((guard, input)) => {
                    let result = self.run(input);
                    drop(guard);
                    match result {
                        Ok(()) => {
                            restarts = 0;
                            continue;
                        }
                        Err(e @ EngineError::DeviceLost(_)) => anyhow::Error::new(e),
                        Err(e) => return Err(e.into()),
                    }
                }
                Err(e) => e.context("failed to open audio input"),
            };

            if restarts >= max_restarts {
                return Err(failure.context(format!("giving up after {restarts} restarts")));
            }
            restarts += 1;
            warn!(
                error = format!("{failure:#}"),
                restarts, max_restarts, "audio unavailable, retrying"
            );
            shutdown.sleep(backoff);
        }
        Ok(())
    }

    fn detection_loop(
        &mut self,
        machine: &mut DetectionStateMachine,
        input: &mut AudioInput,
        jobs: &mpsc::Sender<Job>,
        verdicts: &mpsc::Receiver<Verdict>,
    ) -> Result<(), EngineError> {
        let frame_size = self.config.frame_size;
        let device_timeout = self.config.device_timeout();
        let mut frame = vec![0.0f32; frame_size];
        let mut last_audio = Instant::now();

        info!(
            sample_rate = self.config.sample_rate,
            frame_size,
            noise_db = machine.thresholds().noise_db,
            "listening"
        );

        loop {
            if self.handle.shutdown.is_triggered() {
                info!("detection stopped");
                return Ok(());
            }
            if !self.handle.is_detecting() {
                info!("detection paused");
                return Ok(());
            }

            while let Ok(command) = self.commands.try_recv() {
                let job = match command {
                    Command::SetThresholds(t) => {
                        machine.set_thresholds(t);
                        continue;
                    }
                    Command::Manual(voice) => Job::Manual(voice),
                    Command::ReloadVoices => Job::ReloadVoices,
                };
                jobs.send(job)
                    .map_err(|_| EngineError::Worker("feedback worker exited".into()))?;
            }

            let now = Instant::now();
            while let Ok(verdict) = verdicts.try_recv() {
                machine.on_analysis_complete(verdict.cycle, verdict.matched, now);
            }
            machine.poll(now);

            if let Ok(fault) = input.faults.try_recv() {
                error!(%fault, "audio stream error");
                return Err(EngineError::DeviceLost(fault));
            }

            self.handle.publish(machine);

            if input.consumer.occupied_len() < frame_size {
                if last_audio.elapsed() > device_timeout {
                    return Err(EngineError::DeviceLost(format!(
                        "no audio for {:.1}s",
                        device_timeout.as_secs_f32()
                    )));
                }
                self.handle.shutdown.sleep(IDLE_POLL);
                continue;
            }
            last_audio = now;
            input.consumer.pop_slice(&mut frame);

            if let Some(job) = machine.on_frame(&frame, now) {
                self.handle.publish(machine);
                jobs.send(Job::Analyze(job))
                    .map_err(|_| EngineError::Worker("feedback worker exited".into()))?;
            }
        }
    }
}

enum Job {
    Analyze(AnalysisJob),
    Manual(Option<String>),
    ReloadVoices,
}

struct Verdict {
    cycle: u64,
    matched: bool,
}

struct FeedbackWorker {
    collaborators: Collaborators,
    selector: Arc<Mutex<FeedbackSelector>>,
    analyzer: SpectralAnalyzer,
    delay: Duration,
    audio_dir: PathBuf,
    voices: Vec<String>,
    shutdown: ShutdownSignal,
}

impl FeedbackWorker {
    fn run(mut self, jobs: mpsc::Receiver<Job>, verdicts: mpsc::Sender<Verdict>) {
        while let Ok(job) = jobs.recv() {
            match job {
                Job::Analyze(job) => {
                    let cycle = job.cycle;
                    let matched = self.analyze(job);
                    if matched {
                        if !self.shutdown.sleep(self.delay) {
                            debug!(cycle, "shutdown during feedback delay");
                            return;
                        }
                        self.feedback(Mode::Automatic, None);
                    }
                    if verdicts.send(Verdict { cycle, matched }).is_err() {
                        return;
                    }
                }
                Job::Manual(voice) => {
                    info!(voice = voice.as_deref().unwrap_or("random"), "manual trigger");
                    self.feedback(Mode::Manual, voice.as_deref());
                }
                Job::ReloadVoices => {
                    let selector = FeedbackSelector::scan(&self.audio_dir, &self.voices);
                    info!(playable = selector.playable_voices().count(), "voices reloaded");
                    *self.selector.lock() = selector;
                }
            }
        }
    }

    fn analyze(&mut self, job: AnalysisJob) -> bool {
        let library = match self.collaborators.fingerprints.load_fingerprints() {
            Ok(library) => library,
            Err(e) => {
                warn!(error = %e, "cannot load fingerprints, no match possible");
                return false;
            }
        };
        let peaks = self.analyzer.analyze(&job.window);
        let matcher = FingerprintMatcher::new(job.thresholds.matching());
        match matcher.find_match(&peaks, &library) {
            Some(fingerprint) => {
                info!(cycle = job.cycle, fingerprint = fingerprint.id, peaks = peaks.len(), "bark detected");
                true
            }
            None => {
                debug!(
                    cycle = job.cycle,
                    peaks = peaks.len(),
                    fingerprints = library.len(),
                    "no fingerprint matched"
                );
                false
            }
        }
    }

    /// Record the event, then play a clip. Failures are logged and absorbed.
    fn feedback(&mut self, mode: Mode, requested: Option<&str>) {
        let selection = self.selector.lock().select(requested, &mut rand::rng());
        let voice = selection.as_ref().ok().map(|s| s.voice.clone());

        if let Err(e) = self.collaborators.events.record(&BarkEvent::now(mode, voice)) {
            warn!(error = %e, "failed to record event");
        }

        match selection {
            Ok(selection) => {
                if let Err(e) = self
                    .collaborators
                    .player
                    .play(&selection.voice, &selection.clip)
                {
                    warn!(voice = %selection.voice, error = %e, "playback failed");
                }
            }
            Err(e) => warn!(error = %e, ?mode, "no feedback played"),
        }
    }
}
