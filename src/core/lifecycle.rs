use serde::Serialize;
use strum::Display;

/// Lifecycle phase of a runtime instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, Serialize)]
#[strum(serialize_all = "lowercase")]
pub enum Phase {
    /// Created but `init` has not run yet
    #[default]
    Created,
    /// `init` committed the first state; the first render is in progress
    Initialized,
    /// Waiting for dispatches
    Idle,
    /// `done` ran; nothing is accepted anymore
    Terminated,
}

impl Phase {
    /// Whether dispatches are accepted in this phase
    pub fn accepts_dispatch(self) -> bool {
        matches!(self, Phase::Initialized | Phase::Idle)
    }

    pub fn is_terminated(self) -> bool {
        self == Phase::Terminated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_dispatch() {
        assert!(!Phase::Created.accepts_dispatch());
        assert!(Phase::Initialized.accepts_dispatch());
        assert!(Phase::Idle.accepts_dispatch());
        assert!(!Phase::Terminated.accepts_dispatch());
    }

    #[test]
    fn test_display() {
        assert_eq!(Phase::Created.to_string(), "created");
        assert_eq!(Phase::Terminated.to_string(), "terminated");
    }
}
