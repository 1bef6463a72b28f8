// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::{Duration, Instant};

use crate::CircuitOptions;
use crate::circuit::CircuitState;

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    /// The call may proceed.
    Allowed,
    /// The cooldown just elapsed; the call proceeds as the first half-open probe.
    Probe,
    /// The circuit is open; `retry_after` is the remaining cooldown.
    Rejected { retry_after: Duration },
}

/// State change caused by recording an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transition {
    Unchanged,
    /// The circuit opened (or stayed open) with a new cooldown.
    Opened { cooldown: Duration, failure_count: u32 },
    /// The circuit closed after having been open or half-open.
    Closed,
}

/// Circuit of a single destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CircuitEntry {
    pub(crate) state: CircuitState,
    pub(crate) failure_count: u32,
    pub(crate) next_try_at: Option<Instant>,
}

impl Default for CircuitEntry {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            next_try_at: None,
        }
    }
}

impl CircuitEntry {
    /// Decides whether a call may proceed at `now`; moves an open circuit whose cooldown has
    /// elapsed into half-open.
    pub(crate) fn enter(&mut self, now: Instant) -> Admission {
        match (self.state, self.next_try_at) {
            (CircuitState::Open, Some(next_try_at)) if now < next_try_at => Admission::Rejected {
                retry_after: next_try_at.saturating_duration_since(now),
            },
            (CircuitState::Open, _) => {
                self.state = CircuitState::HalfOpen;
                Admission::Probe
            }
            (CircuitState::Closed | CircuitState::HalfOpen, _) => Admission::Allowed,
        }
    }

    /// State as observed at `now`, without mutating the entry.
    pub(crate) fn state_at(&self, now: Instant) -> CircuitState {
        match (self.state, self.next_try_at) {
            (CircuitState::Open, Some(next_try_at)) if now < next_try_at => CircuitState::Open,
            (CircuitState::Open, _) => CircuitState::HalfOpen,
            (state, _) => state,
        }
    }

    pub(crate) fn record_success(&mut self) -> Transition {
        let previous = self.state;
        *self = Self::default();

        if previous == CircuitState::Closed {
            Transition::Unchanged
        } else {
            Transition::Closed
        }
    }

    pub(crate) fn record_failure(&mut self, now: Instant, options: &CircuitOptions) -> Transition {
        self.failure_count = self.failure_count.saturating_add(1);

        if self.failure_count < options.get_failure_threshold() {
            return Transition::Unchanged;
        }

        let cooldown = options.cooldown_for(self.failure_count);
        self.state = CircuitState::Open;
        self.next_try_at = Some(now.checked_add(cooldown).unwrap_or(now));

        Transition::Opened {
            cooldown,
            failure_count: self.failure_count,
        }
    }
}
