//! Run state machine

use crate::error::PipelineError;

/// Why a run ended in `Failed`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The input directory held no segments
    NoInput,
    NoMatchingTrack,
    CodecFault,
    Cancelled,
    Stalled,
    /// Any other error, with its message
    Error(String),
}

impl From<&PipelineError> for FailureReason {
    fn from(error: &PipelineError) -> Self {
        match error {
            PipelineError::NoInput { .. } => FailureReason::NoInput,
            PipelineError::NoMatchingTrack { .. } => FailureReason::NoMatchingTrack,
            PipelineError::CodecFault { .. } => FailureReason::CodecFault,
            PipelineError::Cancelled => FailureReason::Cancelled,
            PipelineError::Stalled(_) => FailureReason::Stalled,
            other => FailureReason::Error(other.to_string()),
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::NoInput => write!(f, "no input"),
            FailureReason::NoMatchingTrack => write!(f, "no matching track"),
            FailureReason::CodecFault => write!(f, "codec fault"),
            FailureReason::Cancelled => write!(f, "cancelled"),
            FailureReason::Stalled => write!(f, "stalled"),
            FailureReason::Error(message) => write!(f, "{message}"),
        }
    }
}

/// Pipeline run state machine
///
/// A run moves strictly forward through
/// `Idle → Configuring → Draining → Flushing → Complete`; `Failed` can be
/// entered from any state that is not already `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PipelineRunState {
    /// Nothing has happened yet
    #[default]
    Idle,

    /// Opening the first segment and configuring engines and muxer
    Configuring,

    /// Feeding every segment through the decoder
    Draining,

    /// Waiting for the encoder to emit its end-of-stream output
    Flushing,

    /// Every resource released, output finalized
    Complete,

    Failed(FailureReason),
}

impl PipelineRunState {
    /// Check if this state transition is valid
    pub fn can_transition_to(&self, target: &PipelineRunState) -> bool {
        use PipelineRunState::*;

        match (self, target) {
            (Failed(_), _) => false,
            (_, Failed(_)) => true,

            (Idle, Configuring) => true,
            (Configuring, Draining) => true,
            (Draining, Flushing) => true,
            (Flushing, Complete) => true,

            _ => false,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            PipelineRunState::Idle => "Idle",
            PipelineRunState::Configuring => "Configuring",
            PipelineRunState::Draining => "Draining",
            PipelineRunState::Flushing => "Flushing",
            PipelineRunState::Complete => "Complete",
            PipelineRunState::Failed(_) => "Failed",
        }
    }
}

impl std::fmt::Display for PipelineRunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineRunState::Failed(reason) => write!(f, "Failed ({reason})"),
            other => write!(f, "{}", other.description()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_forward_path() {
        use PipelineRunState::*;
        let path = [Idle, Configuring, Draining, Flushing, Complete];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(&pair[1]), "{} -> {}", pair[0], pair[1]);
            assert!(!pair[1].can_transition_to(&pair[0]));
        }
    }

    #[test]
    fn test_no_skipping_states() {
        use PipelineRunState::*;
        assert!(!Idle.can_transition_to(&Draining));
        assert!(!Configuring.can_transition_to(&Flushing));
        assert!(!Draining.can_transition_to(&Complete));
        assert!(!Complete.can_transition_to(&Idle));
    }

    #[test]
    fn test_failed_reachable_and_terminal() {
        use PipelineRunState::*;
        let failed = Failed(FailureReason::CodecFault);
        for state in [Idle, Configuring, Draining, Flushing, Complete] {
            assert!(state.can_transition_to(&failed));
        }
        assert!(!failed.can_transition_to(&Failed(FailureReason::Cancelled)));
        assert!(!failed.can_transition_to(&Idle));
        assert!(!Complete.can_transition_to(&Configuring));
    }

    #[test]
    fn test_reason_from_error() {
        let err = PipelineError::NoInput {
            dir: PathBuf::from("split"),
        };
        assert_eq!(FailureReason::from(&err), FailureReason::NoInput);
        assert_eq!(
            FailureReason::from(&PipelineError::Cancelled).to_string(),
            "cancelled"
        );
        assert_eq!(
            PipelineRunState::Failed(FailureReason::NoInput).to_string(),
            "Failed (no input)"
        );
    }
}
