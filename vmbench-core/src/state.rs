// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Sandbox instance lifecycle with typed state transitions.
//!
//! Implements: Idle → Prepared → Running → Ready → Stopped → Released.
//! A released backend may be prepared again for the resource-usage run.
//! Invalid transitions result in StateTransitionError.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::error::StateTransitionError;
use crate::types::BackendKind;

/// Sandbox instance lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceState {
    /// Nothing provisioned yet.
    Idle,

    /// Artifacts (image, boot config, link) are in place.
    Prepared,

    /// The sandbox has been launched; readiness not yet observed.
    Running,

    /// The workload answered (or the readiness budget was spent).
    Ready,

    /// The sandbox process or container has been stopped.
    Stopped,

    /// All run-scoped resources have been discarded.
    Released,
}

impl InstanceState {
    /// Get the state name for error messages.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Prepared => "Prepared",
            Self::Running => "Running",
            Self::Ready => "Ready",
            Self::Stopped => "Stopped",
            Self::Released => "Released",
        }
    }

    /// Check if transition to the target state is valid.
    pub fn can_transition_to(&self, target: InstanceState) -> bool {
        matches!(
            (self, target),
            // From Idle
            (Self::Idle, Self::Prepared) |
            (Self::Idle, Self::Released) |
            // From Prepared
            (Self::Prepared, Self::Running) |
            (Self::Prepared, Self::Released) |
            // From Running
            (Self::Running, Self::Ready) |
            (Self::Running, Self::Stopped) |
            // From Ready
            (Self::Ready, Self::Stopped) |
            // From Stopped
            (Self::Stopped, Self::Released) |
            // From Released
            (Self::Released, Self::Prepared)
        )
    }

    /// Whether a live sandbox may exist in this state.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Running | Self::Ready)
    }
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Lifecycle tracker owned by a single backend.
/// Enforces the call order prepare → start → await_ready → stop → release.
#[derive(Debug)]
pub struct InstanceLifecycle {
    backend: BackendKind,
    current_state: InstanceState,
    last_transition: Instant,
    transition_count: u64,
}

impl InstanceLifecycle {
    /// Create a new lifecycle in the Idle state.
    pub fn new(backend: BackendKind) -> Self {
        Self {
            backend,
            current_state: InstanceState::Idle,
            last_transition: Instant::now(),
            transition_count: 0,
        }
    }

    /// Get the current state.
    pub fn state(&self) -> InstanceState {
        self.current_state
    }

    /// Get total number of transitions.
    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    /// Attempt to transition to a new state.
    pub fn transition_to(&mut self, target: InstanceState) -> Result<(), StateTransitionError> {
        if !self.current_state.can_transition_to(target) {
            return Err(StateTransitionError::InvalidTransition {
                backend: self.backend,
                from: self.current_state.name(),
                to: target.name(),
            });
        }

        tracing::debug!(
            backend = %self.backend,
            from = self.current_state.name(),
            to = target.name(),
            in_state_ms = self.last_transition.elapsed().as_millis() as u64,
            "Lifecycle transition"
        );

        self.current_state = target;
        self.last_transition = Instant::now();
        self.transition_count += 1;

        Ok(())
    }

    /// Transition only if allowed; used by best-effort teardown.
    pub fn advance_if_possible(&mut self, target: InstanceState) -> bool {
        self.transition_to(target).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let lc = InstanceLifecycle::new(BackendKind::Container);
        assert_eq!(lc.state(), InstanceState::Idle);
        assert_eq!(lc.transition_count(), 0);
    }

    #[test]
    fn test_full_cycle_and_reprovision() {
        let mut lc = InstanceLifecycle::new(BackendKind::MicroVm);

        for state in [
            InstanceState::Prepared,
            InstanceState::Running,
            InstanceState::Ready,
            InstanceState::Stopped,
            InstanceState::Released,
            InstanceState::Prepared,
        ] {
            assert!(lc.transition_to(state).is_ok(), "-> {}", state);
        }
        assert_eq!(lc.transition_count(), 6);
    }

    #[test]
    fn test_invalid_transitions() {
        let mut lc = InstanceLifecycle::new(BackendKind::Container);

        // Cannot start without preparing
        assert!(lc.transition_to(InstanceState::Running).is_err());
        assert_eq!(lc.state(), InstanceState::Idle);

        // Cannot release a live instance without stopping it
        lc.transition_to(InstanceState::Prepared).unwrap();
        lc.transition_to(InstanceState::Running).unwrap();
        assert!(lc.transition_to(InstanceState::Released).is_err());
        assert!(lc.state().is_live());
    }

    #[test]
    fn test_advance_if_possible_is_idempotent() {
        let mut lc = InstanceLifecycle::new(BackendKind::Container);
        assert!(!lc.advance_if_possible(InstanceState::Stopped));
        assert!(lc.advance_if_possible(InstanceState::Released));
        assert!(!lc.advance_if_possible(InstanceState::Released));
    }
}
