use std::path::Path;
use std::process::{Command, Stdio};

use crate::config::PlaybackConfig;
use crate::error::PlaybackError;

/// Plays a voice clip. Blocks until the clip has finished.
pub trait PlaybackSink: Send + Sync {
    fn play(&self, voice: &str, clip: &Path) -> Result<(), PlaybackError>;
}

/// Plays clips through an external player program (`afplay`, `ffplay`, ...).
pub struct CommandPlayer {
    program: String,
    args: Vec<String>,
}

impl CommandPlayer {
    pub fn new(config: &PlaybackConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
        }
    }
}

impl PlaybackSink for CommandPlayer {
    fn play(&self, voice: &str, clip: &Path) -> Result<(), PlaybackError> {
        tracing::debug!(voice, clip = %clip.display(), program = %self.program, "playing clip");
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(clip)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .status()
            .map_err(|source| PlaybackError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        if !status.success() {
            return Err(PlaybackError::Exit {
                program: self.program.clone(),
                status: status.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn player(program: &str) -> CommandPlayer {
        CommandPlayer::new(&PlaybackConfig {
            program: program.into(),
            args: Vec::new(),
        })
    }

    #[test]
    fn successful_player_exit() {
        player("true").play("Papa", Path::new("clip.m4a")).unwrap();
    }

    #[test]
    fn failing_player_is_reported() {
        let err = player("false").play("Papa", Path::new("clip.m4a")).unwrap_err();
        assert!(matches!(err, PlaybackError::Exit { .. }));
    }

    #[test]
    fn missing_player_is_reported() {
        let err = player("barkwatch-no-such-player")
            .play("Papa", Path::new("clip.m4a"))
            .unwrap_err();
        assert!(matches!(err, PlaybackError::Spawn { .. }));
    }
}
