// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use serde_json::Value;

use crate::circuit::CircuitRegistry;
use crate::error::{NormalizedError, RawFailure, normalize};
use crate::options::GatewayOptions;
use crate::request::InvocationRequest;
use crate::transport::{FunctionTransport, RawRequest, RawTransport, SessionProvider, decode_response};

/// Recovery attempted after a failed primary call.
///
/// Each step runs at most once per invocation and is skipped once the destination's circuit
/// opens; the last observed error is returned in that case.
#[derive(Debug)]
pub(crate) struct RecoveryChain<'a, T, R, S> {
    pub(crate) transport: &'a T,
    pub(crate) raw: &'a R,
    pub(crate) session: &'a S,
    pub(crate) options: &'a GatewayOptions,
    pub(crate) registry: &'a CircuitRegistry,
    pub(crate) trace_id: &'a str,
}

impl<T, R, S> RecoveryChain<'_, T, R, S>
where
    T: FunctionTransport,
    R: RawTransport,
    S: SessionProvider,
{
    /// Recovers from an authentication failure: session refresh and reissue, then the public
    /// credential.
    pub(crate) async fn recover_auth(&self, request: &InvocationRequest, error: NormalizedError) -> Result<Value, NormalizedError> {
        let destination = request.destination();
        let mut last = error;

        if !self.proceed(destination, "refresh", &last) {
            return Err(last);
        }

        match self.session.refresh_credential().await {
            Ok(credential) => match self.transport.call(&request.with_credential(&credential)).await {
                Ok(data) => {
                    self.recovered(destination, "refresh");
                    return Ok(data);
                }
                Err(failure) => {
                    let error = normalize(&failure);
                    if !error.is_auth() {
                        return Err(error);
                    }
                    last = error;
                }
            },
            Err(error) => {
                tracing::debug!(
                    invoke.destination = destination,
                    invoke.trace_id = self.trace_id,
                    %error,
                    "session refresh failed"
                );
            }
        }

        let Some(credential) = self.options.get_public_credential() else {
            tracing::debug!(
                invoke.destination = destination,
                invoke.trace_id = self.trace_id,
                "no public credential configured, skipping fallback"
            );
            return Err(last);
        };

        if !self.proceed(destination, "public_credential", &last) {
            return Err(last);
        }

        // Development routing does not apply to the public credential fallback.
        let url = self.options.absolute_function_url(destination);
        let data = self.send(RawRequest::from_invocation(url, request, Some(credential))).await?;
        self.recovered(destination, "public_credential");
        Ok(data)
    }

    /// Recovers from a transport failure of the primary call with one raw call using the best
    /// available credential.
    pub(crate) async fn recover_transport(
        &self,
        request: &InvocationRequest,
        error: NormalizedError,
    ) -> Result<Value, NormalizedError> {
        let destination = request.destination();

        if !self.proceed(destination, "manual_transport", &error) {
            return Err(error);
        }

        let credential = self
            .session
            .current_credential()
            .or_else(|| self.options.get_public_credential().cloned());
        let url = self.options.function_url(destination);
        let raw = RawRequest::from_invocation(url, request, credential.as_ref());

        match self.raw.send(raw).await {
            Ok(response) => {
                let data = decode_response(response).map_err(|failure| normalize(&failure))?;
                self.recovered(destination, "manual_transport");
                Ok(data)
            }
            Err(transport_error) => {
                tracing::debug!(
                    invoke.destination = destination,
                    invoke.trace_id = self.trace_id,
                    error = %transport_error,
                    "manual transport fallback failed"
                );
                Err(error)
            }
        }
    }

    async fn send(&self, request: RawRequest) -> Result<Value, NormalizedError> {
        let response = self
            .raw
            .send(request)
            .await
            .map_err(|error| normalize(&RawFailure::from(error)))?;

        decode_response(response).map_err(|failure| normalize(&failure))
    }

    fn proceed(&self, destination: &str, step: &'static str, last: &NormalizedError) -> bool {
        if !self.registry.should_allow(destination) {
            return false;
        }

        tracing::event!(
            name: "lifeline.invoke.recovery",
            tracing::Level::WARN,
            invoke.destination = destination,
            invoke.trace_id = self.trace_id,
            invoke.classification = last.classification().as_str(),
            invoke.recovery.step = step,
        );
        true
    }

    fn recovered(&self, destination: &str, step: &'static str) {
        tracing::event!(
            name: "lifeline.invoke.recovered",
            tracing::Level::INFO,
            invoke.destination = destination,
            invoke.trace_id = self.trace_id,
            invoke.recovery.step = step,
        );
    }
}
