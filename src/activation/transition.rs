use crate::core::ActivationState;

/// Result of evaluating one activation attempt against a stored state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Account is blocked; nothing may change until it is reclaimed.
    RejectBlocked,
    /// Pending record with no tries left. Treated as blocked, but it is the
    /// abandonment rule, not block retention, that reclaims it.
    RejectExhausted,
    /// Activation already happened; the code is dead.
    RejectAlreadyActivated,
    /// Write `next` back. `success` tells whether the code matched.
    Apply { next: ActivationState, success: bool },
}

/// Decide what a submitted code does to `state`.
///
/// Checks run in the order blocked, activated, code. A pending record that
/// has no attempts left is rejected as exhausted and never written.
pub fn evaluate(state: &ActivationState, given_code: &str) -> Transition {
    if state.blocked {
        return Transition::RejectBlocked;
    }
    if state.activated {
        return Transition::RejectAlreadyActivated;
    }
    if state.attempts_left == 0 {
        return Transition::RejectExhausted;
    }

    let success = given_code == state.activation_code;
    let attempts_left = state.attempts_left - 1;

    Transition::Apply {
        next: ActivationState {
            activated: success,
            activation_code: state.activation_code.clone(),
            attempts_left,
            blocked: attempts_left == 0 && !success,
        },
        success,
    }
}
