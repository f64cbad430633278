use std::fmt;

/// Detection state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DetectionState {
    /// Gate armed, pretrigger buffer filling.
    #[default]
    Idle,
    /// Gate fired; accumulating samples until the dwell ends.
    Capturing,
    /// Window handed to the feedback worker; waiting for its verdict.
    Analyzing,
    /// A bark was confirmed recently; the gate stays closed.
    Cooldown,
}

impl fmt::Display for DetectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DetectionState::Idle => "idle",
            DetectionState::Capturing => "capturing",
            DetectionState::Analyzing => "analyzing",
            DetectionState::Cooldown => "cooldown",
        };
        f.write_str(name)
    }
}
