// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-destination circuit breaking.
//!
//! A [`CircuitRegistry`] tracks one circuit per destination (remote function name). Each circuit
//! counts consecutive failures and stops calls to its destination for a cooldown once the
//! failure threshold is reached:
//!
//! ```text
//! ┌────────┐   failure_count >= threshold   ┌──────────┐
//! │ Closed │ ─────────────────────────────▶ │   Open   │
//! └────────┘                                └──────────┘
//!      ▲                                          │
//!      │ success     ┌────────────────┐           │ cooldown
//!      └──────────── │   Half-Open    │ ◀─────────┘ elapsed
//!                    └────────────────┘
//!                      │ failure: Open again with a doubled cooldown
//! ```
//!
//! - **Closed**: calls proceed; failures accumulate silently below the threshold.
//! - **Open**: calls are rejected without any network attempt until the cooldown elapses.
//! - **Half-Open**: entered by the first admission check after the cooldown. Calls proceed;
//!   the next success closes the circuit, the next failure opens it again.
//!
//! The cooldown is `base * 2^(failure_count - threshold)` capped at a ceiling, so with the
//! defaults the circuit stays open for 1s, then 2s, 4s, … up to 30s.
//!
//! Any success resets the failure count and closes the circuit. Destinations never affect each
//! other.

mod constants;
mod entry;
mod registry;

pub(crate) use constants::*;
pub(crate) use entry::{Admission, CircuitEntry, Transition};
pub(crate) use registry::system_clock;
pub use registry::{CircuitRegistry, CircuitSnapshot};

/// State of a single destination's circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    /// Calls proceed normally.
    Closed,
    /// Calls are rejected until the cooldown elapses.
    Open,
    /// The cooldown elapsed and no success has been observed yet.
    HalfOpen,
}

impl CircuitState {
    /// Returns the `snake_case` name of the state, as used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}
