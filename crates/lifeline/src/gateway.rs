// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::circuit::{CircuitRegistry, system_clock};
use crate::enrich::enrich;
use crate::error::{ErrorClassification, NormalizedError, RawFailure, normalize};
use crate::options::GatewayOptions;
use crate::recovery::RecoveryChain;
use crate::request::{Headers, InvocationRequest, InvokeOptions, Method};
use crate::transport::{FunctionTransport, RawRequest, RawTransport, SessionProvider, decode_response};

pub(crate) const DEV_NETWORK_MESSAGE: &str =
    "Network error. Check if the functions host is running or if CORS is blocking requests.";

/// Outcome of an invocation: either data or an error, never both and never neither.
///
/// # Examples
///
/// ```
/// use lifeline::InvocationResult;
/// use serde::Deserialize;
/// use serde_json::json;
///
/// #[derive(Deserialize)]
/// struct Quote {
///     total: u32,
/// }
///
/// let result = InvocationResult::success(json!({ "total": 1200 }));
/// let quote = result.decode::<Quote>().into_result().unwrap();
/// assert_eq!(quote.total, 1200);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationResult<T = Value> {
    outcome: Result<T, NormalizedError>,
}

impl<T> InvocationResult<T> {
    /// A successful result.
    #[must_use]
    pub fn success(data: T) -> Self {
        Self { outcome: Ok(data) }
    }

    /// A failed result.
    #[must_use]
    pub fn failure(error: NormalizedError) -> Self {
        Self { outcome: Err(error) }
    }

    /// The data of a successful invocation.
    #[must_use]
    pub fn data(&self) -> Option<&T> {
        self.outcome.as_ref().ok()
    }

    /// The error of a failed invocation.
    #[must_use]
    pub fn error(&self) -> Option<&NormalizedError> {
        self.outcome.as_ref().err()
    }

    /// Whether the invocation succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Converts into a standard [`Result`].
    ///
    /// # Errors
    ///
    /// Returns the normalized error of a failed invocation.
    pub fn into_result(self) -> Result<T, NormalizedError> {
        self.outcome
    }

    /// Splits into the `(data, error)` pair.
    #[must_use]
    pub fn into_parts(self) -> (Option<T>, Option<NormalizedError>) {
        match self.outcome {
            Ok(data) => (Some(data), None),
            Err(error) => (None, Some(error)),
        }
    }
}

impl InvocationResult<Value> {
    /// Deserializes the data into `U`. A value that does not match `U` becomes an
    /// [`ErrorClassification::Unknown`] error.
    #[must_use]
    pub fn decode<U: DeserializeOwned>(self) -> InvocationResult<U> {
        match self.outcome {
            Ok(data) => match serde_json::from_value(data) {
                Ok(decoded) => InvocationResult::success(decoded),
                Err(error) => InvocationResult::failure(NormalizedError::new(
                    ErrorClassification::Unknown,
                    format!("Unexpected function response: {error}"),
                )),
            },
            Err(error) => InvocationResult::failure(error),
        }
    }
}

impl<T> From<Result<T, NormalizedError>> for InvocationResult<T> {
    fn from(outcome: Result<T, NormalizedError>) -> Self {
        Self { outcome }
    }
}

impl<T> From<InvocationResult<T>> for Result<T, NormalizedError> {
    fn from(result: InvocationResult<T>) -> Self {
        result.outcome
    }
}

/// Invokes remote functions with payload enrichment, credential recovery and per-destination
/// circuit breaking.
///
/// Each [`invoke`][Self::invoke]:
///
/// 1. Rejects the call immediately with [`ErrorClassification::CircuitOpen`] while the
///    destination's circuit is open. Rejections are not counted as failures.
/// 2. Stamps the body and headers with a trace id and an idempotency key, and strips any
///    caller-supplied `Authorization` header.
/// 3. Calls the [`FunctionTransport`].
/// 4. On an authentication failure, refreshes the session and reissues the call, then falls back
///    to the public credential. On a transport failure, retries once through the
///    [`RawTransport`]. Other failures are returned as they are.
/// 5. Records exactly one success or failure against the destination's circuit.
///
/// The gateway never panics and never returns an error outside of its [`InvocationResult`].
///
/// See the [crate documentation][crate] for a complete example.
#[derive(Debug)]
pub struct Gateway<T, R, S> {
    transport: T,
    raw: R,
    session: S,
    options: GatewayOptions,
    registry: Arc<CircuitRegistry>,
}

impl<T, R, S> Gateway<T, R, S>
where
    T: FunctionTransport,
    R: RawTransport,
    S: SessionProvider,
{
    /// Creates a gateway with its own circuit registry configured from `options`.
    #[must_use]
    pub fn new(transport: T, raw: R, session: S, options: GatewayOptions) -> Self {
        let registry = Arc::new(CircuitRegistry::new(*options.get_circuit(), system_clock()));

        Self {
            transport,
            raw,
            session,
            options,
            registry,
        }
    }

    /// Replaces the circuit registry, for example to share one registry between gateways or to
    /// use [`CircuitRegistry::global`].
    ///
    /// The registry's own options apply; the circuit settings of [`GatewayOptions`] are ignored.
    #[must_use]
    pub fn registry(mut self, registry: Arc<CircuitRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Returns the circuit registry.
    #[must_use]
    pub fn get_registry(&self) -> &Arc<CircuitRegistry> {
        &self.registry
    }

    /// Returns the options.
    #[must_use]
    pub fn get_options(&self) -> &GatewayOptions {
        &self.options
    }

    /// Invokes `destination`.
    pub async fn invoke(&self, destination: &str, options: InvokeOptions) -> InvocationResult {
        if let Err(retry_after) = self.registry.admit(destination) {
            return InvocationResult::failure(NormalizedError::circuit_open(destination, retry_after));
        }

        let InvokeOptions {
            body,
            mut headers,
            method,
        } = options;
        let payload = enrich(body.as_ref().filter(|_| method.allows_body()), self.registry.clock());
        payload.stamp_headers(&mut headers);
        let trace_id = payload.trace_id().to_string();
        let request = InvocationRequest::new(destination, payload.into_body(), headers, method);

        tracing::debug!(
            invoke.destination = destination,
            invoke.trace_id = %trace_id,
            invoke.method = method.as_str(),
            "invoking remote function"
        );

        let outcome = match self.transport.call(&request).await {
            Ok(data) => Ok(data),
            Err(failure) => {
                let error = normalize(&failure);
                let chain = self.chain(&trace_id);

                match error.classification() {
                    ErrorClassification::NetworkTransport if self.options.get_manual_transport_fallback() => {
                        chain.recover_transport(&request, error).await
                    }
                    ErrorClassification::Auth => chain.recover_auth(&request, error).await,
                    _ => Err(error),
                }
            }
        };

        self.complete(destination, &trace_id, outcome)
    }

    /// Invokes `destination` with the public credential, bypassing the session and the primary
    /// transport.
    ///
    /// The call is a `POST` through the [`RawTransport`], routed through the development proxy
    /// path when development mode is enabled. It is guarded by and recorded against the same
    /// circuit as [`invoke`][Self::invoke]. Without a configured public credential the call
    /// fails with [`ErrorClassification::Auth`] and nothing is sent.
    pub async fn invoke_anonymous(&self, destination: &str, body: impl Into<Value>) -> InvocationResult {
        if let Err(retry_after) = self.registry.admit(destination) {
            return InvocationResult::failure(NormalizedError::circuit_open(destination, retry_after));
        }

        let Some(credential) = self.options.get_public_credential() else {
            return InvocationResult::failure(NormalizedError::new(
                ErrorClassification::Auth,
                "No public credential configured for anonymous invocation",
            ));
        };

        let body = body.into();
        let payload = enrich(Some(&body), self.registry.clock());
        let mut headers = Headers::new();
        payload.stamp_headers(&mut headers);
        let trace_id = payload.trace_id().to_string();
        let request = InvocationRequest::new(destination, payload.into_body(), headers, Method::Post);

        tracing::debug!(
            invoke.destination = destination,
            invoke.trace_id = %trace_id,
            "invoking remote function anonymously"
        );

        let raw = RawRequest::from_invocation(self.options.function_url(destination), &request, Some(credential));
        let outcome = match self.raw.send(raw).await {
            Ok(response) => decode_response(response).map_err(|failure| normalize(&failure)),
            Err(_) if self.options.get_dev_mode() => {
                Err(NormalizedError::new(ErrorClassification::NetworkTransport, DEV_NETWORK_MESSAGE))
            }
            Err(error) => Err(normalize(&RawFailure::from(error))),
        };

        self.complete(destination, &trace_id, outcome)
    }

    fn chain<'a>(&'a self, trace_id: &'a str) -> RecoveryChain<'a, T, R, S> {
        RecoveryChain {
            transport: &self.transport,
            raw: &self.raw,
            session: &self.session,
            options: &self.options,
            registry: &self.registry,
            trace_id,
        }
    }

    fn complete(&self, destination: &str, trace_id: &str, outcome: Result<Value, NormalizedError>) -> InvocationResult {
        self.registry.record_outcome(destination, outcome.is_ok());

        if let Err(error) = &outcome {
            tracing::event!(
                name: "lifeline.invoke.failed",
                tracing::Level::WARN,
                invoke.destination = destination,
                invoke.trace_id = trace_id,
                invoke.classification = error.classification().as_str(),
                invoke.error = error.message(),
            );
        }

        outcome.into()
    }
}
