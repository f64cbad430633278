use std::path::PathBuf;

use thiserror::Error;

/// Rejected or unreadable configuration. The previous configuration stays in effect.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid {field} = {value}: {reason}")]
    Invalid {
        field: &'static str,
        value: f64,
        reason: &'static str,
    },
}

/// Failures of the fingerprint store or the event log.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed store record: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures while picking a voice clip.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FeedbackError {
    #[error("no voice has any playable clip")]
    NoPlayableContent,
}

/// Failures of the playback sink.
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("failed to launch player {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("player {program} exited with {status}")]
    Exit { program: String, status: String },
}

/// Structural failures that end a detection session.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("audio device lost: {0}")]
    DeviceLost(String),

    #[error("feedback worker failed: {0}")]
    Worker(String),
}
