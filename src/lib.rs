//! Bark detection and voice feedback.
//!
//! Audio is captured into a pretrigger ring, gated on frame energy, and every
//! triggered window is compared against a library of spectral fingerprints.
//! A match logs an event and plays a recorded voice clip, then the detector
//! stays quiet for a cooldown.

pub mod audio;
pub mod buffer;
pub mod config;
pub mod detector;
pub mod engine;
pub mod error;
pub mod feedback;
pub mod fingerprint;
pub mod gate;
pub mod playback;
pub mod spectrum;
pub mod state;
pub mod store;
pub mod timer;
