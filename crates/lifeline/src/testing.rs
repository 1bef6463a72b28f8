// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Scripted collaborators for testing code built on the gateway.
//!
//! Every fake answers from a queue of scripted outcomes and records what it was asked, so tests
//! can assert both on the result of an invocation and on the exact calls it made. Fakes are
//! cheap to clone; clones share their script and their recordings.
//!
//! Available with the `test-util` feature. Never enable it outside of `dev-dependencies`.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::error::{CredentialError, RawFailure, RawResponse, TransportError};
use crate::request::{Credential, InvocationRequest};
use crate::transport::{FunctionTransport, RawRequest, RawTransport, SessionProvider};

/// Scripted [`FunctionTransport`].
///
/// Returns `null` once the script is exhausted.
#[derive(Debug, Clone, Default)]
pub struct FakeTransport {
    state: Arc<Mutex<Script<Result<Value, RawFailure>, InvocationRequest>>>,
}

/// Scripted [`RawTransport`].
///
/// Fails with a [`TransportError`] once the script is exhausted.
#[derive(Debug, Clone, Default)]
pub struct FakeRawTransport {
    state: Arc<Mutex<Script<Result<RawResponse, TransportError>, RawRequest>>>,
}

/// Scripted [`SessionProvider`].
///
/// A successful refresh replaces the current credential. Refreshing fails once the script is
/// exhausted.
#[derive(Debug, Clone, Default)]
pub struct FakeSession {
    current: Arc<Mutex<Option<Credential>>>,
    refreshes: Arc<Mutex<Script<Result<Credential, CredentialError>, ()>>>,
}

#[derive(Debug)]
struct Script<O, C> {
    outcomes: VecDeque<O>,
    calls: Vec<C>,
}

impl<O, C> Default for Script<O, C> {
    fn default() -> Self {
        Self {
            outcomes: VecDeque::new(),
            calls: Vec::new(),
        }
    }
}

impl<O, C> Script<O, C> {
    fn next(&mut self, call: C) -> Option<O> {
        self.calls.push(call);
        self.outcomes.pop_front()
    }
}

impl FakeTransport {
    /// Creates a transport with an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an outcome to the script.
    pub fn push(&self, outcome: Result<Value, RawFailure>) -> &Self {
        self.state.lock().outcomes.push_back(outcome);
        self
    }

    /// Returns every request received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<InvocationRequest> {
        self.state.lock().calls.clone()
    }

    /// Returns the number of requests received so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.state.lock().calls.len()
    }
}

impl FunctionTransport for FakeTransport {
    async fn call(&self, request: &InvocationRequest) -> Result<Value, RawFailure> {
        self.state.lock().next(request.clone()).unwrap_or(Ok(Value::Null))
    }
}

impl FakeRawTransport {
    /// Creates a transport with an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an outcome to the script.
    pub fn push(&self, outcome: Result<RawResponse, TransportError>) -> &Self {
        self.state.lock().outcomes.push_back(outcome);
        self
    }

    /// Returns every request received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<RawRequest> {
        self.state.lock().calls.clone()
    }

    /// Returns the number of requests received so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.state.lock().calls.len()
    }
}

impl RawTransport for FakeRawTransport {
    async fn send(&self, request: RawRequest) -> Result<RawResponse, TransportError> {
        self.state
            .lock()
            .next(request)
            .unwrap_or_else(|| Err(TransportError::new("no scripted response")))
    }
}

impl FakeSession {
    /// Creates a session without a current credential.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a session holding `credential`.
    #[must_use]
    pub fn signed_in(credential: impl Into<Credential>) -> Self {
        let session = Self::new();
        *session.current.lock() = Some(credential.into());
        session
    }

    /// Appends a refresh outcome to the script.
    pub fn push_refresh(&self, outcome: Result<Credential, CredentialError>) -> &Self {
        self.refreshes.lock().outcomes.push_back(outcome);
        self
    }

    /// Returns the number of refresh attempts so far.
    #[must_use]
    pub fn refresh_count(&self) -> usize {
        self.refreshes.lock().calls.len()
    }
}

impl SessionProvider for FakeSession {
    fn current_credential(&self) -> Option<Credential> {
        self.current.lock().clone()
    }

    async fn refresh_credential(&self) -> Result<Credential, CredentialError> {
        let outcome = self
            .refreshes
            .lock()
            .next(())
            .unwrap_or_else(|| Err(CredentialError::new("no session")));

        if let Ok(credential) = &outcome {
            *self.current.lock() = Some(credential.clone());
        }

        outcome
    }
}
