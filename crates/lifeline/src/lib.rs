// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Resilient invocation of remote backend functions.
//!
//! A [`Gateway`] calls named, stateless remote functions over HTTP and keeps working through
//! expired sessions, flaky networks and failing destinations:
//!
//! - **Payload enrichment**: every call carries a fresh trace id and an idempotency key derived
//!   from its body ([`enrich`]), so retried deliveries can be deduplicated by the receiver.
//! - **Credential recovery**: an authentication failure triggers a session refresh and one
//!   reissue, then one attempt with the public credential.
//! - **Transport fallback**: when the primary transport cannot deliver a request, the call is
//!   retried once through a raw HTTP primitive.
//! - **Circuit breaking**: after repeated failures a destination is rejected locally for an
//!   exponentially growing cooldown ([`CircuitRegistry`]).
//! - **Error normalization**: every failure is returned as a [`NormalizedError`] with a readable
//!   message and an [`ErrorClassification`].
//!
//! The gateway performs no I/O itself. It drives three collaborators: a [`FunctionTransport`]
//! (the normal call path), a [`RawTransport`] (the fallback path) and a [`SessionProvider`] (the
//! ambient authentication subsystem).
//!
//! # Examples
//!
//! ```
//! use lifeline::{
//!     Credential, CredentialError, FunctionTransport, Gateway, GatewayOptions, InvocationRequest,
//!     InvokeOptions, RawFailure, RawRequest, RawResponse, RawTransport, SessionProvider,
//!     TransportError,
//! };
//! use serde_json::{Value, json};
//!
//! struct Sdk;
//!
//! impl FunctionTransport for Sdk {
//!     async fn call(&self, request: &InvocationRequest) -> Result<Value, RawFailure> {
//!         Ok(json!({ "sent": true, "to": request.body().map(|body| body["to"].clone()) }))
//!     }
//! }
//!
//! struct Offline;
//!
//! impl RawTransport for Offline {
//!     async fn send(&self, _request: RawRequest) -> Result<RawResponse, TransportError> {
//!         Err(TransportError::new("offline"))
//!     }
//! }
//!
//! struct SignedOut;
//!
//! impl SessionProvider for SignedOut {
//!     fn current_credential(&self) -> Option<Credential> {
//!         None
//!     }
//!
//!     async fn refresh_credential(&self) -> Result<Credential, CredentialError> {
//!         Err(CredentialError::new("signed out"))
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let options = GatewayOptions::new()
//!     .base_url("https://project.example.com")
//!     .public_credential("anon-key");
//! let gateway = Gateway::new(Sdk, Offline, SignedOut, options);
//!
//! let result = gateway
//!     .invoke("send-email", InvokeOptions::new().body(json!({ "to": "ops@example.com" })))
//!     .await;
//!
//! assert_eq!(result.data(), Some(&json!({ "sent": true, "to": "ops@example.com" })));
//! # }
//! ```
//!
//! # Configuration
//!
//! [`GatewayOptions`] can be built in code, deserialized with serde or loaded from the
//! `LIFELINE_*` environment variables with [`GatewayOptions::from_env`].
//!
//! # Logging
//!
//! The crate emits [`tracing`] events. State changes of circuits are reported as
//! `lifeline.circuit.opened`, `lifeline.circuit.closed`, `lifeline.circuit.probe` and
//! `lifeline.circuit.rejected`; recovery attempts as `lifeline.invoke.recovery` and
//! `lifeline.invoke.recovered`; failed invocations as `lifeline.invoke.failed`. Credentials are
//! never logged.
//!
//! # Features
//!
//! - **`test-util`** - Enables the [`testing`] module with scripted fakes of every collaborator.
//!   **Only enable this in `dev-dependencies`.**
//!
//! Time is read from a [`tick::Clock`]. Pass a clock created from `tick::ClockControl` to
//! [`CircuitRegistry::new`] to drive cooldowns in tests without sleeping.

mod circuit;
mod enrich;
mod error;
mod gateway;
mod options;
mod recovery;
mod request;
mod transport;

#[cfg(any(feature = "test-util", test))]
#[cfg_attr(docsrs, doc(cfg(feature = "test-util")))]
pub mod testing;

pub use circuit::{CircuitRegistry, CircuitSnapshot, CircuitState};
pub use enrich::{
    EnrichedPayload, IDEMPOTENCY_KEY_FIELD, IDEMPOTENCY_KEY_HEADER, TRACE_ID_FIELD, TRACE_ID_HEADER, enrich,
    idempotency_key,
};
pub use error::{
    CredentialError, ErrorClassification, NormalizedError, RawFailure, RawResponse, TransportError, normalize,
};
pub use gateway::{Gateway, InvocationResult};
pub use options::{
    CircuitOptions, ENV_CIRCUIT_BASE_COOLDOWN_MS, ENV_CIRCUIT_FAILURE_THRESHOLD, ENV_CIRCUIT_MAX_COOLDOWN_MS,
    ENV_DEV_MODE, ENV_FUNCTIONS_URL, ENV_PUBLIC_KEY, ENV_PUBLISHABLE_KEY, GatewayOptions,
};
pub use request::{Credential, Headers, InvocationRequest, InvokeOptions, Method};
pub use transport::{FunctionTransport, RawRequest, RawTransport, SessionProvider};
