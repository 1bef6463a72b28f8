// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Failure shapes and their normalization into a single classified error.

use std::borrow::Cow;
use std::time::Duration;

use bytes::Bytes;
use http::StatusCode;
use http::header::CONTENT_TYPE;
use serde::Serialize;
use serde_json::Value;

use crate::request::Headers;

/// Hint appended to transport failures.
pub(crate) const NETWORK_HINT: &str = "(Check for ad blockers or network firewalls)";

const AUTH_PATTERNS: [&str; 4] = ["invalid jwt", "jwt expired", "invalid credential", "credential expired"];

/// Classification of a failed invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClassification {
    /// The credential was expired or invalid.
    Auth,
    /// The request never reliably reached the remote function.
    NetworkTransport,
    /// The destination's circuit is open; no call was attempted.
    CircuitOpen,
    /// The remote function ran and reported a failure.
    RemoteFunctionError,
    /// Anything else.
    Unknown,
}

impl ErrorClassification {
    /// Returns the `snake_case` name of the classification, as used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::NetworkTransport => "network_transport",
            Self::CircuitOpen => "circuit_open",
            Self::RemoteFunctionError => "remote_function_error",
            Self::Unknown => "unknown",
        }
    }

    /// Whether the gateway attempts local recovery for this classification.
    ///
    /// Only authentication and transport failures are recovered; everything else is surfaced to
    /// the caller immediately.
    #[must_use]
    pub const fn is_recoverable(self) -> bool {
        matches!(self, Self::Auth | Self::NetworkTransport)
    }
}

/// The error returned to callers of the gateway: a human-readable message and its
/// classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{message}")]
pub struct NormalizedError {
    message: String,
    classification: ErrorClassification,
}

impl NormalizedError {
    /// Creates an error with an explicit classification.
    #[must_use]
    pub fn new(classification: ErrorClassification, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            classification,
        }
    }

    /// The rejection returned while the circuit of `destination` is open.
    #[must_use]
    pub fn circuit_open(destination: &str, retry_after: Duration) -> Self {
        let seconds = retry_after.as_millis().div_ceil(1000).max(1);
        Self::new(
            ErrorClassification::CircuitOpen,
            format!("'{destination}' is temporarily unavailable after repeated failures; retry in {seconds}s"),
        )
    }

    /// The human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The classification.
    #[must_use]
    pub fn classification(&self) -> ErrorClassification {
        self.classification
    }

    /// Whether this is an authentication failure.
    #[must_use]
    pub fn is_auth(&self) -> bool {
        self.classification == ErrorClassification::Auth
    }
}

/// A raw HTTP response as returned by a [`RawTransport`][crate::RawTransport].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    status: StatusCode,
    headers: Headers,
    body: Bytes,
}

impl RawResponse {
    /// Creates a response.
    #[must_use]
    pub fn new(status: StatusCode, headers: Headers, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    /// Creates a response with a JSON body.
    #[must_use]
    pub fn json(status: StatusCode, body: &Value) -> Self {
        let mut headers = Headers::new();
        headers.insert(CONTENT_TYPE.as_str().to_string(), crate::request::JSON_CONTENT_TYPE.to_string());
        Self::new(status, headers, body.to_string())
    }

    /// The status code.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The response headers.
    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// The raw body.
    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// The `Content-Type` header value, looked up case-insensitively.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(CONTENT_TYPE.as_str()))
            .map(|(_, value)| value.as_str())
    }

    /// The body decoded as UTF-8, replacing invalid sequences.
    #[must_use]
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// Every way a call can fail before it is normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawFailure {
    /// The request never reached the remote function (blocked, DNS failure, refused, timed out).
    Transport {
        /// Description reported by the transport.
        message: String,
    },
    /// A structured error reported by the primary transport.
    Structured {
        /// Status of the underlying response, if one was received.
        status: Option<StatusCode>,
        /// Message reported by the transport.
        message: String,
        /// Unconsumed response body, if any.
        body: Option<String>,
    },
    /// A non-success raw response.
    Response(RawResponse),
}

impl RawFailure {
    /// Creates a transport failure.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport { message: message.into() }
    }

    /// Creates a structured failure.
    #[must_use]
    pub fn structured(status: Option<StatusCode>, message: impl Into<String>, body: Option<String>) -> Self {
        Self::Structured {
            status,
            message: message.into(),
            body,
        }
    }

    /// Whether the request never reached the remote function.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

impl From<TransportError> for RawFailure {
    fn from(error: TransportError) -> Self {
        Self::transport(error.to_string())
    }
}

impl From<RawResponse> for RawFailure {
    fn from(response: RawResponse) -> Self {
        Self::Response(response)
    }
}

/// Turns any failure into a classified, human-readable error.
///
/// # Examples
///
/// ```
/// use http::StatusCode;
/// use lifeline::{ErrorClassification, RawFailure, normalize};
///
/// let failure = RawFailure::structured(
///     Some(StatusCode::INTERNAL_SERVER_ERROR),
///     "Edge function returned a non-2xx status code",
///     Some(r#"{"error":"Insufficient inventory"}"#.to_string()),
/// );
///
/// let error = normalize(&failure);
/// assert_eq!(error.message(), "Insufficient inventory");
/// assert_eq!(error.classification(), ErrorClassification::RemoteFunctionError);
/// ```
#[must_use]
pub fn normalize(failure: &RawFailure) -> NormalizedError {
    match failure {
        RawFailure::Transport { message } => {
            NormalizedError::new(ErrorClassification::NetworkTransport, format!("{message} {NETWORK_HINT}"))
        }
        RawFailure::Structured { status, message, body } => {
            let extracted = body.as_deref().and_then(extract_message);
            let auth = *status == Some(StatusCode::UNAUTHORIZED)
                || is_auth_message(message)
                || extracted.as_deref().is_some_and(is_auth_message);
            let message = extracted.unwrap_or_else(|| message.clone());

            classify(auth, *status, message)
        }
        RawFailure::Response(response) => {
            let message = extract_message(&response.text())
                .unwrap_or_else(|| format!("Function returned {}", response.status().as_u16()));
            let auth = response.status() == StatusCode::UNAUTHORIZED || is_auth_message(&message);

            classify(auth, Some(response.status()), message)
        }
    }
}

fn classify(auth: bool, status: Option<StatusCode>, message: String) -> NormalizedError {
    let classification = if auth {
        ErrorClassification::Auth
    } else if status.is_some_and(|status| !status.is_success()) {
        ErrorClassification::RemoteFunctionError
    } else {
        ErrorClassification::Unknown
    };

    NormalizedError::new(classification, message)
}

/// Whether `message` reads like an expired or invalid credential.
pub(crate) fn is_auth_message(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    AUTH_PATTERNS.iter().any(|pattern| message.contains(pattern))
}

/// Extracts the most specific message from a response body: the JSON `error` field, then the
/// JSON `message` field, then the raw text. Empty bodies yield `None`.
pub(crate) fn extract_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }

    let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(trimmed) else {
        return Some(trimmed.to_string());
    };

    ["error", "message"]
        .iter()
        .find_map(|key| match fields.get(*key) {
            Some(Value::String(text)) if !text.is_empty() => Some(text.clone()),
            Some(Value::Null | Value::Bool(false) | Value::String(_)) | None => None,
            Some(other) => Some(other.to_string()),
        })
        .or_else(|| Some(trimmed.to_string()))
}

/// The session provider could not produce a fresh credential.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("credential refresh failed: {message}")]
pub struct CredentialError {
    message: String,
}

impl CredentialError {
    /// Creates an error with the reason reported by the session provider.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }

    /// The reason reported by the session provider.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A raw transport could not complete the exchange.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    message: Cow<'static, str>,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl TransportError {
    /// Creates an error from a description.
    #[must_use]
    pub fn new(message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an error that wraps the underlying cause.
    #[must_use]
    pub fn from_source(message: impl Into<Cow<'static, str>>, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use rstest::rstest;
    use serde_json::json;
    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(NormalizedError: Send, Sync, std::error::Error);
    assert_impl_all!(TransportError: Send, Sync, std::error::Error);
    assert_impl_all!(RawFailure: Send, Sync, Clone);

    #[rstest]
    #[case("Invalid JWT", true)]
    #[case("jwt expired", true)]
    #[case("The credential expired yesterday", true)]
    #[case("INVALID CREDENTIAL", true)]
    #[case("Insufficient inventory", false)]
    #[case("", false)]
    fn auth_messages(#[case] message: &str, #[case] expected: bool) {
        assert_eq!(is_auth_message(message), expected);
    }

    #[rstest]
    #[case(r#"{"error":"Insufficient inventory","message":"ignored"}"#, Some("Insufficient inventory"))]
    #[case(r#"{"message":"Quote not found"}"#, Some("Quote not found"))]
    #[case(r#"{"error":"","message":"fallback"}"#, Some("fallback"))]
    #[case(r#"{"error":{"code":42}}"#, Some(r#"{"code":42}"#))]
    #[case(r#"{"detail":"x"}"#, Some(r#"{"detail":"x"}"#))]
    #[case("upstream timeout", Some("upstream timeout"))]
    #[case("  ", None)]
    fn message_extraction(#[case] body: &str, #[case] expected: Option<&str>) {
        assert_eq!(extract_message(body).as_deref(), expected);
    }

    #[test]
    fn transport_failure_gets_hint() {
        let error = normalize(&RawFailure::transport("Failed to send a request"));

        assert_eq!(error.classification(), ErrorClassification::NetworkTransport);
        assert!(error.message().starts_with("Failed to send a request"));
        assert!(error.message().ends_with(NETWORK_HINT));
    }

    #[test]
    fn structured_401_is_auth() {
        let error = normalize(&RawFailure::structured(Some(StatusCode::UNAUTHORIZED), "Unauthorized", None));

        assert!(error.is_auth());
        assert_eq!(error.message(), "Unauthorized");
    }

    #[test]
    fn auth_pattern_in_body_is_auth() {
        let error = normalize(&RawFailure::structured(
            Some(StatusCode::BAD_REQUEST),
            "non-2xx",
            Some(json!({ "message": "Invalid JWT" }).to_string()),
        ));

        assert!(error.is_auth());
        assert_eq!(error.message(), "Invalid JWT");
    }

    #[test]
    fn structured_without_status_is_unknown() {
        let error = normalize(&RawFailure::structured(None, "something odd", None));

        assert_eq!(error.classification(), ErrorClassification::Unknown);
        assert_eq!(error.message(), "something odd");
    }

    #[test]
    fn raw_response_with_json_error() {
        let response = RawResponse::json(StatusCode::INTERNAL_SERVER_ERROR, &json!({ "error": "Insufficient inventory" }));
        let error = normalize(&RawFailure::Response(response));

        assert_eq!(error.classification(), ErrorClassification::RemoteFunctionError);
        assert_eq!(error.message(), "Insufficient inventory");
    }

    #[test]
    fn raw_response_with_empty_body() {
        let response = RawResponse::new(StatusCode::BAD_GATEWAY, Headers::new(), Bytes::new());
        let error = normalize(&RawFailure::Response(response));

        assert_eq!(error.message(), "Function returned 502");
        assert_eq!(error.classification(), ErrorClassification::RemoteFunctionError);
    }

    #[test]
    fn raw_401_is_auth() {
        let response = RawResponse::new(StatusCode::UNAUTHORIZED, Headers::new(), "nope");
        assert!(normalize(&RawFailure::Response(response)).is_auth());
    }

    #[test]
    fn circuit_open_message_rounds_up() {
        let error = NormalizedError::circuit_open("send-email", Duration::from_millis(500));

        assert_eq!(error.classification(), ErrorClassification::CircuitOpen);
        assert!(error.message().contains("send-email"));
        assert!(error.message().ends_with("retry in 1s"));
        assert_eq!(error.to_string(), error.message());
    }

    #[test]
    fn recoverable_classifications() {
        assert!(ErrorClassification::Auth.is_recoverable());
        assert!(ErrorClassification::NetworkTransport.is_recoverable());
        assert!(!ErrorClassification::CircuitOpen.is_recoverable());
        assert!(!ErrorClassification::RemoteFunctionError.is_recoverable());
        assert!(!ErrorClassification::Unknown.is_recoverable());
        assert_eq!(ErrorClassification::RemoteFunctionError.as_str(), "remote_function_error");
    }

    #[test]
    fn transport_error_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let error = TransportError::from_source("connection refused", io);

        assert_eq!(error.to_string(), "connection refused");
        assert!(error.source().is_some());
        assert_eq!(RawFailure::from(error), RawFailure::transport("connection refused"));
    }

    #[test]
    fn content_type_lookup_is_case_insensitive() {
        let mut headers = Headers::new();
        headers.insert("content-type".to_string(), "application/pdf".to_string());
        let response = RawResponse::new(StatusCode::OK, headers, Bytes::from_static(b"%PDF"));

        assert_eq!(response.content_type(), Some("application/pdf"));
        assert_eq!(response.text(), "%PDF");
    }
}
