//! Per-request state machine.

use alloy_primitives::B256;
use serde::Serialize;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum FailureReason {
    Detection,
    NotRegistered,
    Timeout,
    Unreachable,
    Malformed,
    SignerMismatch,
    SignatureInvalid,
    ParameterMismatch,
    SimulationFailed,
    DuplicateRequest,
    Reestimation,
    Internal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum RequestState {
    Detected,
    Resolving,
    Requesting,
    Verifying,
    Populating,
    Reestimating,
    Completed,
    Failed { reason: FailureReason },
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestState::Completed | RequestState::Failed { .. })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("invalid transition from {from:?} to {to:?}")]
pub struct TransitionError {
    pub from: RequestState,
    pub to: RequestState,
}

pub fn transition(current: &RequestState, next: &RequestState) -> Result<RequestState, TransitionError> {
    use RequestState::*;
    match (current, next) {
        (Detected, Resolving) => Ok(Resolving),
        (Resolving, Requesting) => Ok(Requesting),
        (Requesting, Verifying) => Ok(Verifying),
        (Verifying, Populating) => Ok(Populating),
        (Populating, Reestimating) => Ok(Reestimating),
        (Reestimating, Completed) => Ok(Completed),
        (from, Failed { reason }) if !from.is_terminal() => Ok(Failed { reason: *reason }),
        _ => Err(TransitionError {
            from: *current,
            to: *next,
        }),
    }
}

/// Records every state a request passes through.
#[derive(Clone, Debug)]
pub struct RequestLifecycle {
    request_id: B256,
    history: Vec<RequestState>,
}

impl RequestLifecycle {
    pub fn new(request_id: B256) -> Self {
        Self {
            request_id,
            history: vec![RequestState::Detected],
        }
    }

    pub fn request_id(&self) -> B256 {
        self.request_id
    }

    pub fn state(&self) -> RequestState {
        // history always holds at least `Detected`
        self.history.last().copied().unwrap_or(RequestState::Detected)
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn history(&self) -> &[RequestState] {
        &self.history
    }

    pub fn advance(&mut self, next: RequestState) -> Result<RequestState, TransitionError> {
        let state = transition(&self.state(), &next)?;
        self.history.push(state);
        Ok(state)
    }

    pub fn fail(&mut self, reason: FailureReason) -> Result<RequestState, TransitionError> {
        self.advance(RequestState::Failed { reason })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use RequestState::*;

    #[test]
    fn happy_path_reaches_completed() {
        let mut lc = RequestLifecycle::new(B256::ZERO);
        for next in [Resolving, Requesting, Verifying, Populating, Reestimating, Completed] {
            lc.advance(next).expect("forward transition");
        }
        assert!(lc.is_terminal());
        assert_eq!(lc.history().len(), 7);
    }

    #[test]
    fn failure_is_reachable_from_every_live_state() {
        for from in [Detected, Resolving, Requesting, Verifying, Populating, Reestimating] {
            let to = Failed {
                reason: FailureReason::Timeout,
            };
            assert_eq!(transition(&from, &to), Ok(to));
        }
    }

    #[test]
    fn terminal_states_never_move() {
        let failed = Failed {
            reason: FailureReason::Unreachable,
        };
        assert!(transition(&Completed, &failed).is_err());
        assert!(transition(&failed, &failed).is_err());
        assert!(transition(&failed, &Resolving).is_err());
    }

    #[test]
    fn no_skipping_or_revisiting() {
        assert!(transition(&Detected, &Requesting).is_err());
        assert!(transition(&Verifying, &Verifying).is_err());
        assert!(transition(&Populating, &Resolving).is_err());

        let mut lc = RequestLifecycle::new(B256::ZERO);
        lc.advance(Resolving).expect("resolving");
        assert!(lc.advance(Detected).is_err());
        assert_eq!(lc.state(), Resolving);
    }
}
