//! Config Entry State Machine
//!
//! Enforces valid state transitions for the ConfigEntry lifecycle:
//!
//! ```text
//! NotLoaded → SetupInProgress → Loaded
//!                            ↘ SetupError → SetupInProgress (retry)
//!                            ↘ SetupRetry → SetupInProgress (auto-retry)
//!
//! Loaded/SetupError/SetupRetry → UnloadInProgress → NotLoaded
//!                                                 ↘ FailedUnload (terminal)
//! ```

use crate::entry::ConfigEntryState;
use std::time::Duration;
use thiserror::Error;

/// Error when an invalid state transition is attempted
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Invalid state transition from {from:?} to {to:?}: {reason}")]
pub struct InvalidTransition {
    pub from: ConfigEntryState,
    pub to: ConfigEntryState,
    pub reason: &'static str,
}

impl ConfigEntryState {
    /// Attempt a transition to a new state.
    ///
    /// Returns the new state if valid, or an error describing why the transition
    /// is invalid.
    pub fn try_transition(
        self,
        to: ConfigEntryState,
    ) -> Result<ConfigEntryState, InvalidTransition> {
        use ConfigEntryState::*;

        let valid = match (self, to) {
            // From NotLoaded - can only start setup
            (NotLoaded, SetupInProgress) => true,

            // From SetupInProgress - can go to any setup result state
            (SetupInProgress, Loaded) => true,
            (SetupInProgress, SetupError) => true,
            (SetupInProgress, SetupRetry) => true,

            // From SetupError - can retry setup or start unload
            (SetupError, SetupInProgress) => true,
            (SetupError, UnloadInProgress) => true,

            // From SetupRetry - can retry setup or start unload
            (SetupRetry, SetupInProgress) => true,
            (SetupRetry, UnloadInProgress) => true,

            // From Loaded - can only start unload
            (Loaded, UnloadInProgress) => true,

            // From UnloadInProgress - can complete or fail
            (UnloadInProgress, NotLoaded) => true,
            (UnloadInProgress, FailedUnload) => true,

            // Terminal - no transitions allowed
            (FailedUnload, _) => false,

            // All other transitions are invalid
            _ => false,
        };

        if valid {
            Ok(to)
        } else {
            Err(InvalidTransition {
                from: self,
                to,
                reason: Self::transition_error_reason(self, to),
            })
        }
    }

    /// Check if a transition is valid without performing it
    pub fn can_transition_to(self, to: ConfigEntryState) -> bool {
        self.try_transition(to).is_ok()
    }

    /// Get a human-readable reason for why a transition is invalid
    fn transition_error_reason(from: ConfigEntryState, to: ConfigEntryState) -> &'static str {
        use ConfigEntryState::*;

        match (from, to) {
            (FailedUnload, _) => "FailedUnload is terminal - entry cannot recover",
            (SetupInProgress, NotLoaded) => {
                "Setup in progress - must complete before returning to NotLoaded"
            }
            (UnloadInProgress, Loaded) => "Unload in progress - cannot go back to Loaded",
            (NotLoaded, Loaded) => "Cannot jump to Loaded - must go through SetupInProgress",
            (NotLoaded, SetupError) => {
                "Cannot jump to SetupError - must go through SetupInProgress"
            }
            (Loaded, NotLoaded) => "Cannot jump to NotLoaded - must go through UnloadInProgress",
            (Loaded, SetupInProgress) => "Already loaded - unload first before re-setup",
            _ => "Invalid state transition",
        }
    }
}

/// Calculates retry delay with exponential backoff.
///
/// `2^min(tries, 4) * 5` seconds plus up to 100ms of jitter, so delays run
/// 5s, 10s, 20s, 40s, 80s and then stay at 80s.
pub fn calculate_retry_delay(tries: u32) -> Duration {
    let base_delay = 2_u64.pow(tries.min(4)) * 5;
    let jitter = rand::random::<f64>() * 0.1;
    Duration::from_secs(base_delay) + Duration::from_secs_f64(jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConfigEntryState::*;

    const ALL: [ConfigEntryState; 7] = [
        NotLoaded,
        SetupInProgress,
        Loaded,
        SetupError,
        SetupRetry,
        UnloadInProgress,
        FailedUnload,
    ];

    #[test]
    fn test_allowed_transitions() {
        let allowed = [
            (NotLoaded, SetupInProgress),
            (SetupInProgress, Loaded),
            (SetupInProgress, SetupError),
            (SetupInProgress, SetupRetry),
            (SetupError, SetupInProgress),
            (SetupError, UnloadInProgress),
            (SetupRetry, SetupInProgress),
            (SetupRetry, UnloadInProgress),
            (Loaded, UnloadInProgress),
            (UnloadInProgress, NotLoaded),
            (UnloadInProgress, FailedUnload),
        ];

        for from in ALL {
            for to in ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{:?} -> {:?}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn test_failed_unload_is_terminal() {
        for to in ALL {
            let err = FailedUnload.try_transition(to).unwrap_err();
            assert!(err.reason.contains("terminal"));
        }
    }

    #[test]
    fn test_error_display() {
        let err = NotLoaded.try_transition(Loaded).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("NotLoaded"));
        assert!(msg.contains("SetupInProgress"));
    }

    #[test]
    fn test_retry_delay_exponential_backoff() {
        let expected = [5, 10, 20, 40, 80, 80, 80];
        for (tries, base) in expected.into_iter().enumerate() {
            let delay = calculate_retry_delay(tries as u32);
            assert!(delay >= Duration::from_secs(base), "tries={}", tries);
            assert!(delay < Duration::from_millis(base * 1000 + 101), "tries={}", tries);
        }
    }

    #[test]
    fn test_bridge_offline_then_online() {
        let state = NotLoaded
            .try_transition(SetupInProgress)
            .and_then(|s| s.try_transition(SetupRetry))
            .and_then(|s| s.try_transition(SetupInProgress))
            .and_then(|s| s.try_transition(Loaded))
            .and_then(|s| s.try_transition(UnloadInProgress))
            .and_then(|s| s.try_transition(NotLoaded));
        assert_eq!(state, Ok(NotLoaded));
    }
}
