//! Build status state machine.
//!
//! Guarded targets:
//!
//! ```text
//! BUILDING                         ← BEFORE_TRIGGER
//! BUILT                            ← BUILDING
//! RELEASE_COMPLETE(_WITH_WARNINGS) ← BUILDING (offline) | RVF_RUNNING (online)
//! CANCELLED                        ← CANCEL_REQUESTED
//! anything else                    ← any non-terminal status
//! ```
//!
//! Terminal statuses absorb: every transition out of one is rejected.

use buildplane_core::BuildStatus;

use crate::error::{CatalogError, CatalogResult};

/// Validates status transitions.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusMachine {
    offline_mode: bool,
}

impl StatusMachine {
    pub fn new(offline_mode: bool) -> Self {
        Self { offline_mode }
    }

    pub fn offline_mode(&self) -> bool {
        self.offline_mode
    }

    /// Status a release-complete transition must start from.
    fn release_source(&self) -> BuildStatus {
        if self.offline_mode {
            BuildStatus::Building
        } else {
            BuildStatus::RvfRunning
        }
    }

    /// The status `to` requires as its predecessor, if it is guarded.
    pub fn required_predecessor(&self, to: BuildStatus) -> Option<BuildStatus> {
        match to {
            BuildStatus::Building => Some(BuildStatus::BeforeTrigger),
            BuildStatus::Built => Some(BuildStatus::Building),
            BuildStatus::ReleaseComplete | BuildStatus::ReleaseCompleteWithWarnings => {
                Some(self.release_source())
            }
            BuildStatus::Cancelled => Some(BuildStatus::CancelRequested),
            _ => None,
        }
    }

    pub fn can_transition(&self, from: BuildStatus, to: BuildStatus) -> bool {
        self.check(from, to).is_ok()
    }

    /// Reject the transition with `BadConfiguration` unless it is allowed.
    pub fn check(&self, from: BuildStatus, to: BuildStatus) -> CatalogResult<()> {
        if from.is_terminal() {
            return Err(CatalogError::BadConfiguration(format!(
                "build is in terminal status {from}; cannot move to {to}"
            )));
        }
        match self.required_predecessor(to) {
            Some(required) if required != from => Err(CatalogError::BadConfiguration(format!(
                "cannot move to {to} from {from}; {to} requires {required}"
            ))),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_online() {
        let machine = StatusMachine::new(false);
        let path = [
            BuildStatus::BeforeTrigger,
            BuildStatus::Building,
            BuildStatus::Built,
            BuildStatus::RvfQueued,
            BuildStatus::RvfRunning,
            BuildStatus::ReleaseComplete,
        ];
        for pair in path.windows(2) {
            assert!(machine.can_transition(pair[0], pair[1]), "{:?}", pair);
        }
    }

    #[test]
    fn building_only_from_before_trigger() {
        let machine = StatusMachine::new(false);
        for from in BuildStatus::ALL {
            let allowed = machine.can_transition(from, BuildStatus::Building);
            assert_eq!(allowed, from == BuildStatus::BeforeTrigger, "{from}");
        }
    }

    #[test]
    fn release_source_depends_on_mode() {
        let online = StatusMachine::new(false);
        let offline = StatusMachine::new(true);

        assert!(online.can_transition(BuildStatus::RvfRunning, BuildStatus::ReleaseComplete));
        assert!(!online.can_transition(BuildStatus::Building, BuildStatus::ReleaseComplete));

        assert!(offline.can_transition(BuildStatus::Building, BuildStatus::ReleaseCompleteWithWarnings));
        assert!(!offline.can_transition(BuildStatus::RvfRunning, BuildStatus::ReleaseComplete));
    }

    #[test]
    fn cancelled_requires_cancel_requested() {
        let machine = StatusMachine::default();
        assert!(machine.can_transition(BuildStatus::Building, BuildStatus::CancelRequested));
        assert!(machine.can_transition(BuildStatus::CancelRequested, BuildStatus::Cancelled));
        assert!(!machine.can_transition(BuildStatus::Building, BuildStatus::Cancelled));
    }

    #[test]
    fn failures_reachable_from_any_non_terminal() {
        let machine = StatusMachine::default();
        for from in BuildStatus::ALL.into_iter().filter(|s| !s.is_terminal()) {
            assert!(machine.can_transition(from, BuildStatus::Failed), "{from}");
            assert!(machine.can_transition(from, BuildStatus::FailedPostConditions), "{from}");
            assert!(machine.can_transition(from, BuildStatus::RvfFailed), "{from}");
        }
    }

    #[test]
    fn terminal_statuses_absorb() {
        let machine = StatusMachine::default();
        for from in BuildStatus::ALL.into_iter().filter(BuildStatus::is_terminal) {
            for to in BuildStatus::ALL {
                let err = machine.check(from, to).unwrap_err();
                assert!(matches!(err, CatalogError::BadConfiguration(_)));
            }
        }
    }
}
