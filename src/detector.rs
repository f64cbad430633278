use std::time::Instant;

use tracing::{debug, info, warn};

use crate::buffer::{CaptureBuffer, RingBuffer};
use crate::config::Thresholds;
use crate::gate::EnergyGate;
use crate::spectrum::AnalysisWindow;
use crate::state::DetectionState;
use crate::timer::{SampleTimer, Timer};

/// A finished capture, handed off by value to the feedback worker.
#[derive(Debug)]
pub struct AnalysisJob {
    pub cycle: u64,
    pub window: AnalysisWindow,
    /// Thresholds in force when the gate fired.
    pub thresholds: Thresholds,
}

/// Gate, buffers and timers of the detection cycle.
///
/// Driven frame by frame from the detection loop. Time is passed in so the
/// cooldown can be stepped deterministically; the dwell is counted in samples
/// so every window has the same length.
pub struct DetectionStateMachine {
    sample_rate: u32,
    state: DetectionState,
    /// Latest accepted thresholds.
    pending: Thresholds,
    /// Snapshot of `pending` taken when the current cycle began.
    active: Thresholds,
    ring: RingBuffer,
    pretrigger: Vec<f32>,
    capture: CaptureBuffer,
    dwell: SampleTimer,
    cooldown: Timer,
    cycle: u64,
}

impl DetectionStateMachine {
    pub fn new(sample_rate: u32, pretrigger_secs: f32, thresholds: Thresholds) -> Self {
        let dwell = thresholds.dwell_samples(sample_rate);
        Self {
            sample_rate,
            state: DetectionState::Idle,
            pending: thresholds,
            active: thresholds,
            ring: RingBuffer::new(sample_rate, pretrigger_secs),
            pretrigger: Vec::new(),
            capture: CaptureBuffer::with_capacity(dwell),
            dwell: SampleTimer::default(),
            cooldown: Timer::default(),
            cycle: 0,
        }
    }

    pub fn state(&self) -> DetectionState {
        self.state
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.pending
    }

    /// Replace the thresholds used from the next trigger on.
    pub fn set_thresholds(&mut self, thresholds: Thresholds) {
        self.pending = thresholds;
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Expire the cooldown if its deadline has passed.
    pub fn poll(&mut self, now: Instant) {
        if self.state == DetectionState::Cooldown && self.cooldown.fire(now) {
            info!(cycle = self.cycle, "cooldown over, listening again");
            self.state = DetectionState::Idle;
        }
    }

    /// Feed one frame. Returns the completed window when the dwell ends.
    pub fn on_frame(&mut self, frame: &[f32], now: Instant) -> Option<AnalysisJob> {
        self.poll(now);

        match self.state {
            DetectionState::Idle => {
                self.ring.push(frame);
                if let Some(volume) = EnergyGate::new(self.pending.noise_db).check(frame) {
                    self.trigger(volume);
                }
                None
            }
            DetectionState::Capturing => {
                let (taken, done) = self.dwell.advance(frame.len());
                self.capture.push(&frame[..taken]);
                if !done {
                    return None;
                }
                self.ring.push(&frame[taken..]);
                Some(self.finish_capture())
            }
            DetectionState::Analyzing | DetectionState::Cooldown => {
                self.ring.push(frame);
                None
            }
        }
    }

    fn trigger(&mut self, volume_db: f32) {
        self.cycle += 1;
        self.active = self.pending;
        self.pretrigger = self.ring.snapshot();
        self.capture.clear();
        self.dwell.arm(self.active.dwell_samples(self.sample_rate));
        self.state = DetectionState::Capturing;
        info!(
            cycle = self.cycle,
            volume_db,
            threshold_db = self.active.noise_db,
            "loud sound, capturing"
        );
    }

    fn finish_capture(&mut self) -> AnalysisJob {
        let mut samples = std::mem::take(&mut self.pretrigger);
        self.capture.drain_into(&mut samples);
        self.state = DetectionState::Analyzing;
        debug!(cycle = self.cycle, samples = samples.len(), "capture complete");
        AnalysisJob {
            cycle: self.cycle,
            window: AnalysisWindow {
                samples,
                sample_rate: self.sample_rate,
            },
            thresholds: self.active,
        }
    }

    /// Apply the worker's verdict for `cycle`.
    pub fn on_analysis_complete(&mut self, cycle: u64, matched: bool, now: Instant) {
        if self.state != DetectionState::Analyzing || cycle != self.cycle {
            warn!(
                cycle,
                current = self.cycle,
                state = %self.state,
                "ignoring stale analysis result"
            );
            return;
        }
        if matched {
            self.cooldown.arm(now, self.active.cooldown());
            self.state = DetectionState::Cooldown;
            info!(cycle, cooldown_secs = self.active.cooldown_secs, "bark confirmed, cooling down");
        } else {
            self.state = DetectionState::Idle;
            debug!(cycle, "no match, back to idle");
        }
    }

    /// Cancel both timers and drop any partial capture.
    pub fn shutdown(&mut self) {
        self.dwell.cancel();
        self.cooldown.cancel();
        self.capture.clear();
        self.pretrigger.clear();
        self.state = DetectionState::Idle;
    }
}
