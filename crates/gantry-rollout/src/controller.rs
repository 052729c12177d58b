//! The rollout state machine.
//!
//! Pure transitions: feed it events, get back the single directive the
//! driver must execute next. Every `(phase, event)` pair is handled
//! exhaustively; anything not listed is an invalid transition, and
//! terminal phases accept nothing.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use gantry_core::{ShiftSchedule, TargetColor};

/// Phase of a rollout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutPhase {
    /// Admitted, nothing launched yet.
    Created,
    /// Replacement tasks launching behind the inactive target set.
    Provisioning,
    /// Canary fraction moving to the replacement.
    Shifting,
    /// Canary live; holding the bake window.
    Monitoring,
    /// Cutover finished; replacement is the live set.
    Completed,
    /// Traffic reverted to the original live set.
    RolledBack,
    /// Unrecoverable error; pre-rollout steady state preserved.
    Failed,
}

impl RolloutPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RolloutPhase::Completed | RolloutPhase::RolledBack | RolloutPhase::Failed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RolloutPhase::Created => "created",
            RolloutPhase::Provisioning => "provisioning",
            RolloutPhase::Shifting => "shifting",
            RolloutPhase::Monitoring => "monitoring",
            RolloutPhase::Completed => "completed",
            RolloutPhase::RolledBack => "rolled_back",
            RolloutPhase::Failed => "failed",
        }
    }
}

/// Inputs observed by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RolloutEvent {
    /// Begin the rollout.
    Start,
    /// Every replacement task passed its health checks in time.
    ReplacementHealthy,
    /// The bounded health wait expired first.
    HealthTimeout,
    /// The canary weight split has been applied.
    CanaryShifted,
    /// The bake window elapsed with no rollback signal.
    BakeElapsed,
    /// External rollback/abort signal (alarm, operator, policy).
    RollbackSignal,
    /// Unrecoverable provisioning error.
    Fault(String),
}

/// The single directive the driver must execute after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RolloutAction {
    /// Register the new revision and launch its tasks behind `target`.
    LaunchReplacement { target: TargetColor },
    /// Move the canary fraction of listener weight to `to`.
    ShiftCanary { to: TargetColor, percent: u32 },
    /// Hold the canary split for the fixed bake window.
    StartBake { duration: Duration },
    /// Shift the remainder; `to` becomes the live set, the old set is
    /// drained and becomes the inactive pool for the next rollout.
    PromoteRemainder { to: TargetColor },
    /// Atomically restore all weight to `restore` and drain `cleanup`.
    Revert {
        restore: TargetColor,
        cleanup: TargetColor,
    },
    /// Drain the replacement; no traffic ever shifted.
    Cleanup { target: TargetColor },
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("rollout is terminal in phase {0:?}")]
    Terminal(RolloutPhase),

    #[error("event {event} is not valid in phase {phase:?}")]
    InvalidTransition {
        phase: RolloutPhase,
        event: &'static str,
    },
}

/// One rollout's state machine.
#[derive(Debug, Clone)]
pub struct RolloutMachine {
    service: String,
    /// The color that was live when the rollout was admitted. Never
    /// changes during the rollout; `Failed`/`RolledBack` restore it.
    live: TargetColor,
    schedule: ShiftSchedule,
    phase: RolloutPhase,
    reason: Option<String>,
}

impl RolloutMachine {
    pub fn new(service: &str, live: TargetColor, schedule: ShiftSchedule) -> Self {
        Self {
            service: service.to_string(),
            live,
            schedule,
            phase: RolloutPhase::Created,
            reason: None,
        }
    }

    pub fn phase(&self) -> RolloutPhase {
        self.phase
    }

    /// The color the new revision launches behind.
    pub fn replacement(&self) -> TargetColor {
        self.live.other()
    }

    /// The pre-rollout live color.
    pub fn live(&self) -> TargetColor {
        self.live
    }

    /// Terminal reason, if the rollout ended badly.
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// Apply one event. Returns the directive for the driver.
    pub fn handle(&mut self, event: RolloutEvent) -> Result<RolloutAction, TransitionError> {
        use RolloutEvent as E;
        use RolloutPhase as P;

        if self.phase.is_terminal() {
            return Err(TransitionError::Terminal(self.phase));
        }

        let (next, action) = match (self.phase, event) {
            (P::Created, E::Start) => (
                P::Provisioning,
                RolloutAction::LaunchReplacement {
                    target: self.replacement(),
                },
            ),

            (P::Provisioning, E::ReplacementHealthy) => (
                P::Shifting,
                RolloutAction::ShiftCanary {
                    to: self.replacement(),
                    percent: self.schedule.canary_percent(),
                },
            ),
            (P::Provisioning, E::HealthTimeout) => {
                // No traffic ever shifted; the live set is untouched.
                self.reason = Some("replacement tasks failed health checks in time".to_string());
                (
                    P::Failed,
                    RolloutAction::Cleanup {
                        target: self.replacement(),
                    },
                )
            }

            (P::Shifting, E::CanaryShifted) => (
                P::Monitoring,
                RolloutAction::StartBake {
                    duration: Duration::from_secs(self.schedule.bake_secs()),
                },
            ),

            (P::Monitoring, E::BakeElapsed) => (
                P::Completed,
                RolloutAction::PromoteRemainder {
                    to: self.replacement(),
                },
            ),
            (P::Monitoring, E::RollbackSignal) => {
                self.reason = Some("rollback signal during bake window".to_string());
                (
                    P::RolledBack,
                    RolloutAction::Revert {
                        restore: self.live,
                        cleanup: self.replacement(),
                    },
                )
            }

            // Aborting before the bake window is not a defined rollback:
            // it is a forced failure with cleanup of anything partially
            // attached.
            (P::Created | P::Provisioning, E::RollbackSignal) => {
                self.reason = Some("aborted before traffic shift".to_string());
                (
                    P::Failed,
                    RolloutAction::Cleanup {
                        target: self.replacement(),
                    },
                )
            }
            (P::Shifting, E::RollbackSignal) => {
                self.reason = Some("aborted during traffic shift".to_string());
                (
                    P::Failed,
                    RolloutAction::Revert {
                        restore: self.live,
                        cleanup: self.replacement(),
                    },
                )
            }

            // Unrecoverable faults from any non-terminal phase.
            (P::Created | P::Provisioning, E::Fault(reason)) => {
                self.reason = Some(reason);
                (
                    P::Failed,
                    RolloutAction::Cleanup {
                        target: self.replacement(),
                    },
                )
            }
            (P::Shifting | P::Monitoring, E::Fault(reason)) => {
                self.reason = Some(reason);
                (
                    P::Failed,
                    RolloutAction::Revert {
                        restore: self.live,
                        cleanup: self.replacement(),
                    },
                )
            }

            (phase, event) => {
                return Err(TransitionError::InvalidTransition {
                    phase,
                    event: event_name(&event),
                });
            }
        };

        if next == RolloutPhase::Failed || next == RolloutPhase::RolledBack {
            warn!(
                service = %self.service,
                from = self.phase.as_str(),
                to = next.as_str(),
                reason = self.reason.as_deref().unwrap_or(""),
                "rollout transition"
            );
        } else {
            info!(
                service = %self.service,
                from = self.phase.as_str(),
                to = next.as_str(),
                "rollout transition"
            );
        }
        self.phase = next;
        Ok(action)
    }
}

fn event_name(event: &RolloutEvent) -> &'static str {
    match event {
        RolloutEvent::Start => "start",
        RolloutEvent::ReplacementHealthy => "replacement_healthy",
        RolloutEvent::HealthTimeout => "health_timeout",
        RolloutEvent::CanaryShifted => "canary_shifted",
        RolloutEvent::BakeElapsed => "bake_elapsed",
        RolloutEvent::RollbackSignal => "rollback_signal",
        RolloutEvent::Fault(_) => "fault",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::CanaryPolicy;

    fn machine() -> RolloutMachine {
        RolloutMachine::new(
            "storefront",
            TargetColor::Blue,
            ShiftSchedule::Canary(CanaryPolicy {
                canary_percent: 10,
                bake_secs: 300,
            }),
        )
    }

    #[test]
    fn happy_path_completes() {
        let mut m = machine();
        assert_eq!(m.replacement(), TargetColor::Green);

        assert_eq!(
            m.handle(RolloutEvent::Start).unwrap(),
            RolloutAction::LaunchReplacement {
                target: TargetColor::Green
            }
        );
        assert_eq!(
            m.handle(RolloutEvent::ReplacementHealthy).unwrap(),
            RolloutAction::ShiftCanary {
                to: TargetColor::Green,
                percent: 10
            }
        );
        assert_eq!(
            m.handle(RolloutEvent::CanaryShifted).unwrap(),
            RolloutAction::StartBake {
                duration: Duration::from_secs(300)
            }
        );
        assert_eq!(
            m.handle(RolloutEvent::BakeElapsed).unwrap(),
            RolloutAction::PromoteRemainder {
                to: TargetColor::Green
            }
        );
        assert_eq!(m.phase(), RolloutPhase::Completed);
        assert!(m.reason().is_none());
    }

    #[test]
    fn health_timeout_fails_without_shift() {
        let mut m = machine();
        m.handle(RolloutEvent::Start).unwrap();

        let action = m.handle(RolloutEvent::HealthTimeout).unwrap();
        assert_eq!(
            action,
            RolloutAction::Cleanup {
                target: TargetColor::Green
            }
        );
        assert_eq!(m.phase(), RolloutPhase::Failed);
        assert!(m.reason().unwrap().contains("health checks"));
    }

    #[test]
    fn rollback_signal_during_bake_reverts() {
        let mut m = machine();
        m.handle(RolloutEvent::Start).unwrap();
        m.handle(RolloutEvent::ReplacementHealthy).unwrap();
        m.handle(RolloutEvent::CanaryShifted).unwrap();

        let action = m.handle(RolloutEvent::RollbackSignal).unwrap();
        assert_eq!(
            action,
            RolloutAction::Revert {
                restore: TargetColor::Blue,
                cleanup: TargetColor::Green
            }
        );
        assert_eq!(m.phase(), RolloutPhase::RolledBack);
    }

    #[test]
    fn abort_during_provisioning_is_forced_failure() {
        let mut m = machine();
        m.handle(RolloutEvent::Start).unwrap();

        let action = m.handle(RolloutEvent::RollbackSignal).unwrap();
        assert_eq!(
            action,
            RolloutAction::Cleanup {
                target: TargetColor::Green
            }
        );
        assert_eq!(m.phase(), RolloutPhase::Failed);
    }

    #[test]
    fn abort_during_shifting_reverts_then_fails() {
        let mut m = machine();
        m.handle(RolloutEvent::Start).unwrap();
        m.handle(RolloutEvent::ReplacementHealthy).unwrap();

        let action = m.handle(RolloutEvent::RollbackSignal).unwrap();
        assert_eq!(
            action,
            RolloutAction::Revert {
                restore: TargetColor::Blue,
                cleanup: TargetColor::Green
            }
        );
        assert_eq!(m.phase(), RolloutPhase::Failed);
    }

    #[test]
    fn fault_is_reachable_from_every_non_terminal_phase() {
        // Created.
        let mut m = machine();
        m.handle(RolloutEvent::Fault("boom".to_string())).unwrap();
        assert_eq!(m.phase(), RolloutPhase::Failed);
        assert_eq!(m.reason(), Some("boom"));

        // Provisioning.
        let mut m = machine();
        m.handle(RolloutEvent::Start).unwrap();
        m.handle(RolloutEvent::Fault("image pull failure".to_string()))
            .unwrap();
        assert_eq!(m.phase(), RolloutPhase::Failed);

        // Monitoring faults revert before failing.
        let mut m = machine();
        m.handle(RolloutEvent::Start).unwrap();
        m.handle(RolloutEvent::ReplacementHealthy).unwrap();
        m.handle(RolloutEvent::CanaryShifted).unwrap();
        let action = m.handle(RolloutEvent::Fault("backend gone".to_string())).unwrap();
        assert!(matches!(action, RolloutAction::Revert { .. }));
        assert_eq!(m.phase(), RolloutPhase::Failed);
    }

    #[test]
    fn terminal_phases_accept_nothing() {
        let mut m = machine();
        m.handle(RolloutEvent::Start).unwrap();
        m.handle(RolloutEvent::ReplacementHealthy).unwrap();
        m.handle(RolloutEvent::CanaryShifted).unwrap();
        m.handle(RolloutEvent::BakeElapsed).unwrap();

        let err = m.handle(RolloutEvent::Start).unwrap_err();
        assert_eq!(err, TransitionError::Terminal(RolloutPhase::Completed));
    }

    #[test]
    fn out_of_order_events_are_invalid() {
        let mut m = machine();
        let err = m.handle(RolloutEvent::BakeElapsed).unwrap_err();
        assert!(matches!(err, TransitionError::InvalidTransition { .. }));

        m.handle(RolloutEvent::Start).unwrap();
        let err = m.handle(RolloutEvent::CanaryShifted).unwrap_err();
        assert!(matches!(err, TransitionError::InvalidTransition { .. }));
    }

    #[test]
    fn all_at_once_schedule_shifts_everything_before_bake() {
        let mut m = RolloutMachine::new("storefront", TargetColor::Green, ShiftSchedule::AllAtOnce);
        assert_eq!(m.replacement(), TargetColor::Blue);

        m.handle(RolloutEvent::Start).unwrap();
        assert_eq!(
            m.handle(RolloutEvent::ReplacementHealthy).unwrap(),
            RolloutAction::ShiftCanary {
                to: TargetColor::Blue,
                percent: 100
            }
        );
        assert_eq!(
            m.handle(RolloutEvent::CanaryShifted).unwrap(),
            RolloutAction::StartBake {
                duration: Duration::ZERO
            }
        );
    }
}
