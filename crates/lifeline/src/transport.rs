// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Collaborators the gateway calls out to.
//!
//! The gateway never performs I/O itself. It talks to three collaborators:
//!
//! - [`FunctionTransport`]: the normal call path, typically a platform SDK client that resolves
//!   the function URL and attaches the session credential.
//! - [`RawTransport`]: a bare HTTP primitive used only by the fallbacks; it receives a fully
//!   resolved URL, method, headers and body and returns the raw response.
//! - [`SessionProvider`]: the ambient authentication subsystem.

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use serde_json::{Value, json};

use crate::error::{CredentialError, RawFailure, RawResponse, TransportError};
use crate::request::{Credential, Headers, InvocationRequest, Method};

/// The primary call path to remote functions.
///
/// Implementations report failures that never reached the function as
/// [`RawFailure::Transport`] so the gateway can try its manual fallback.
///
/// # Examples
///
/// ```
/// use lifeline::{FunctionTransport, InvocationRequest, RawFailure};
/// use serde_json::{Value, json};
///
/// struct Echo;
///
/// impl FunctionTransport for Echo {
///     async fn call(&self, request: &InvocationRequest) -> Result<Value, RawFailure> {
///         Ok(json!({ "echo": request.destination() }))
///     }
/// }
/// ```
pub trait FunctionTransport: Send + Sync {
    /// Invokes the function described by `request`.
    fn call(&self, request: &InvocationRequest) -> impl Future<Output = Result<Value, RawFailure>> + Send;
}

impl<T: FunctionTransport> FunctionTransport for Arc<T> {
    fn call(&self, request: &InvocationRequest) -> impl Future<Output = Result<Value, RawFailure>> + Send {
        (**self).call(request)
    }
}

/// A bare HTTP exchange used by the fallback paths.
///
/// Any response that was received, whatever its status, is returned as `Ok`; `Err` means the
/// exchange itself failed.
pub trait RawTransport: Send + Sync {
    /// Sends `request` and returns the raw response.
    fn send(&self, request: RawRequest) -> impl Future<Output = Result<RawResponse, TransportError>> + Send;
}

impl<T: RawTransport> RawTransport for Arc<T> {
    fn send(&self, request: RawRequest) -> impl Future<Output = Result<RawResponse, TransportError>> + Send {
        (**self).send(request)
    }
}

/// Access to the caller's session credential.
pub trait SessionProvider: Send + Sync {
    /// Returns the current session credential, if a session exists.
    fn current_credential(&self) -> Option<Credential>;

    /// Obtains a fresh credential.
    fn refresh_credential(&self) -> impl Future<Output = Result<Credential, CredentialError>> + Send;
}

impl<T: SessionProvider> SessionProvider for Arc<T> {
    fn current_credential(&self) -> Option<Credential> {
        (**self).current_credential()
    }

    fn refresh_credential(&self) -> impl Future<Output = Result<Credential, CredentialError>> + Send {
        (**self).refresh_credential()
    }
}

/// A fully resolved request for a [`RawTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRequest {
    /// Absolute URL, or a relative path in development mode.
    pub url: String,
    /// HTTP method.
    pub method: Method,
    /// Headers in send order.
    pub headers: Headers,
    /// Serialized body, if any.
    pub body: Option<Bytes>,
}

impl RawRequest {
    /// Builds a raw request from an invocation request. `body` is serialized as JSON unless the
    /// method does not carry a body.
    pub(crate) fn from_invocation(url: String, request: &InvocationRequest, credential: Option<&Credential>) -> Self {
        Self {
            url,
            method: request.method(),
            headers: request.raw_headers(credential),
            body: request.body().map(|body| Bytes::from(body.to_string())),
        }
    }

    /// Converts into an [`http::Request`] for transports built on the `http` ecosystem.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL or a header is not valid HTTP.
    pub fn into_http(self) -> Result<http::Request<Bytes>, http::Error> {
        let mut builder = http::Request::builder().method(http::Method::from(self.method)).uri(self.url);
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder.body(self.body.unwrap_or_default())
    }
}

/// Content types returned to callers as a base64 envelope.
const BINARY_CONTENT_TYPES: [&str; 2] = ["application/octet-stream", "application/pdf"];
const BINARY_CONTENT_PREFIXES: [&str; 3] = ["image/", "audio/", "video/"];

fn is_binary(content_type: &str) -> bool {
    let essence = content_type.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
    BINARY_CONTENT_TYPES.contains(&essence.as_str()) || BINARY_CONTENT_PREFIXES.iter().any(|prefix| essence.starts_with(prefix))
}

/// Turns a raw response into the value handed to callers.
///
/// Non-success responses become [`RawFailure::Response`]. Binary bodies are wrapped as
/// `{ "base64": ..., "contentType": ... }`, JSON bodies are parsed, other text is returned as a
/// string and an empty body as `null`.
pub(crate) fn decode_response(response: RawResponse) -> Result<Value, RawFailure> {
    if !response.status().is_success() {
        return Err(RawFailure::Response(response));
    }

    let content_type = response.content_type().map(str::to_string);

    if let Some(content_type) = content_type.as_deref()
        && is_binary(content_type)
    {
        return Ok(json!({
            "base64": STANDARD.encode(response.body()),
            "contentType": content_type,
        }));
    }

    if response.body().is_empty() {
        return Ok(Value::Null);
    }

    let declared_json = content_type.as_deref().is_some_and(|content_type| content_type.contains("json"));
    match serde_json::from_slice::<Value>(response.body()) {
        Ok(value) => Ok(value),
        Err(error) if declared_json => Err(RawFailure::structured(
            Some(response.status()),
            format!("Invalid JSON in function response: {error}"),
            None,
        )),
        Err(_) => Ok(Value::String(response.text().into_owned())),
    }
}
