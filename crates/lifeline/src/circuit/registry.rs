// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;
use tick::Clock;
use tick::runtime::InactiveClock;

use crate::CircuitOptions;
use crate::circuit::{Admission, CircuitEntry, CircuitState, Transition};

/// Point-in-time view of a destination's circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitSnapshot {
    /// The state as observed at the time of the snapshot.
    pub state: CircuitState,
    /// Consecutive failures recorded since the last success.
    pub failure_count: u32,
    /// Time left until calls are admitted again; zero unless the circuit is open.
    pub retry_after: Duration,
}

/// Tracks one circuit per destination.
///
/// Circuits are created lazily on first use and live as long as the registry. Share a registry
/// between gateways with an [`Arc`]; every gateway created without an explicit registry gets its
/// own isolated instance. [`CircuitRegistry::global`] provides a process-wide instance for callers
/// that want every gateway to share breaker state.
///
/// # Examples
///
/// ```
/// use lifeline::{CircuitOptions, CircuitRegistry, CircuitState};
/// use tick::Clock;
///
/// let registry = CircuitRegistry::new(CircuitOptions::default(), Clock::new_frozen());
///
/// for _ in 0..3 {
///     assert!(registry.should_allow("send-email"));
///     registry.record_outcome("send-email", false);
/// }
///
/// assert!(!registry.should_allow("send-email"));
/// assert!(registry.should_allow("generate-quote-pdf"));
/// assert_eq!(registry.state("send-email"), Some(CircuitState::Open));
/// ```
#[derive(Debug)]
pub struct CircuitRegistry {
    map: Mutex<HashMap<String, Arc<Mutex<CircuitEntry>>>>,
    options: CircuitOptions,
    clock: Clock,
}

impl CircuitRegistry {
    /// Creates an empty registry whose cooldowns are measured with `clock`.
    #[must_use]
    pub fn new(options: CircuitOptions, clock: Clock) -> Self {
        Self {
            map: Mutex::new(HashMap::new()),
            options,
            clock,
        }
    }

    /// Returns the process-wide registry, created with the default options and the system clock.
    #[must_use]
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<CircuitRegistry>> = OnceLock::new();

        Arc::clone(GLOBAL.get_or_init(|| Arc::new(Self::new(CircuitOptions::default(), system_clock()))))
    }

    pub(crate) fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Returns the options shared by every circuit of this registry.
    #[must_use]
    pub fn options(&self) -> &CircuitOptions {
        &self.options
    }

    /// Returns whether a call to `destination` may proceed.
    ///
    /// Only an open circuit whose cooldown has not yet elapsed rejects calls. Unknown
    /// destinations are always allowed.
    pub fn should_allow(&self, destination: &str) -> bool {
        self.admit(destination).is_ok()
    }

    /// Records the outcome of a finished call to `destination`.
    ///
    /// A success closes the circuit and resets its failure count. A failure increments the count
    /// and, once the threshold is reached, opens the circuit for an exponentially growing cooldown.
    pub fn record_outcome(&self, destination: &str, success: bool) {
        let now = self.clock.instant();
        let entry = self.entry(destination);

        let transition = {
            let mut entry = entry.lock();
            if success {
                entry.record_success()
            } else {
                entry.record_failure(now, &self.options)
            }
        };

        match transition {
            Transition::Opened { cooldown, failure_count } => {
                tracing::event!(
                    name: "lifeline.circuit.opened",
                    tracing::Level::WARN,
                    circuit.destination = destination,
                    circuit.state = CircuitState::Open.as_str(),
                    circuit.failure_count = failure_count,
                    circuit.cooldown.ms = u64::try_from(cooldown.as_millis()).unwrap_or(u64::MAX),
                );
            }
            Transition::Closed => {
                tracing::event!(
                    name: "lifeline.circuit.closed",
                    tracing::Level::INFO,
                    circuit.destination = destination,
                    circuit.state = CircuitState::Closed.as_str(),
                );
            }
            Transition::Unchanged => {}
        }
    }

    /// Returns the state of `destination` as observed now, or `None` if it was never used.
    #[must_use]
    pub fn state(&self, destination: &str) -> Option<CircuitState> {
        self.snapshot(destination).map(|snapshot| snapshot.state)
    }

    /// Returns a snapshot of `destination`, or `None` if it was never used.
    ///
    /// Taking a snapshot never changes the circuit.
    #[must_use]
    pub fn snapshot(&self, destination: &str) -> Option<CircuitSnapshot> {
        let now = self.clock.instant();
        let entry = Arc::clone(self.map.lock().get(destination)?);
        let entry = entry.lock();

        Some(CircuitSnapshot {
            state: entry.state_at(now),
            failure_count: entry.failure_count,
            retry_after: entry
                .next_try_at
                .map_or(Duration::ZERO, |next_try_at| next_try_at.saturating_duration_since(now)),
        })
    }

    /// Admission check that reports the remaining cooldown of a rejected call.
    pub(crate) fn admit(&self, destination: &str) -> Result<(), Duration> {
        let now = self.clock.instant();
        let entry = self.entry(destination);
        let admission = entry.lock().enter(now);

        match admission {
            Admission::Allowed => Ok(()),
            Admission::Probe => {
                tracing::event!(
                    name: "lifeline.circuit.probe",
                    tracing::Level::INFO,
                    circuit.destination = destination,
                    circuit.state = CircuitState::HalfOpen.as_str(),
                );
                Ok(())
            }
            Admission::Rejected { retry_after } => {
                tracing::event!(
                    name: "lifeline.circuit.rejected",
                    tracing::Level::WARN,
                    circuit.destination = destination,
                    circuit.state = CircuitState::Open.as_str(),
                    circuit.retry_after.ms = u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX),
                );
                Err(retry_after)
            }
        }
    }

    fn entry(&self, destination: &str) -> Arc<Mutex<CircuitEntry>> {
        let mut map = self.map.lock();

        if let Some(entry) = map.get(destination) {
            return Arc::clone(entry);
        }

        let entry = Arc::new(Mutex::new(CircuitEntry::default()));
        map.insert(destination.to_string(), Arc::clone(&entry));
        entry
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.map.lock().len()
    }
}

/// A clock reading machine time. Only instants and timestamps are read from it, so its timer
/// driver is not needed.
pub(crate) fn system_clock() -> Clock {
    InactiveClock::default().activate().0
}
