// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};

use http::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Ordered header map exchanged with transports. Names are stored as given by the caller.
pub type Headers = BTreeMap<String, String>;

pub(crate) const JSON_CONTENT_TYPE: &str = "application/json";

/// HTTP method used to invoke a remote function. Defaults to [`Method::Post`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// `GET`; requests with this method never carry a body.
    Get,
    /// `POST`
    #[default]
    Post,
    /// `PUT`
    Put,
    /// `DELETE`
    Delete,
    /// `PATCH`
    Patch,
}

impl Method {
    /// Returns the method name in upper case.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
        }
    }

    /// Whether requests with this method carry a body.
    #[must_use]
    pub const fn allows_body(self) -> bool {
        !matches!(self, Self::Get)
    }
}

impl From<Method> for http::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => Self::GET,
            Method::Post => Self::POST,
            Method::Put => Self::PUT,
            Method::Delete => Self::DELETE,
            Method::Patch => Self::PATCH,
        }
    }
}

/// An access token sent as a bearer credential.
///
/// The value is redacted from `Debug` output so credentials never leak into logs.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(Cow<'static, str>);

impl Credential {
    /// Wraps a token.
    #[must_use]
    pub fn new(token: impl Into<Cow<'static, str>>) -> Self {
        Self(token.into())
    }

    /// Returns the raw token.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Returns the `Authorization` header value for this credential.
    #[must_use]
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl Debug for Credential {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(***)")
    }
}

impl From<&'static str> for Credential {
    fn from(value: &'static str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Credential {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Caller-facing options of a single invocation.
///
/// # Examples
///
/// ```
/// use lifeline::{InvokeOptions, Method};
/// use serde_json::json;
///
/// let options = InvokeOptions::new()
///     .body(json!({ "quote_id": 42 }))
///     .header("x-tenant", "acme")
///     .method(Method::Post);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvokeOptions {
    pub(crate) body: Option<Value>,
    pub(crate) headers: Headers,
    pub(crate) method: Method,
}

impl InvokeOptions {
    /// Creates empty options: no body, no headers, `POST`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the JSON body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Value>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Adds a header. Authorization headers are accepted here but are always stripped
    /// before the request leaves the client; credentials come from the session provider.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Replaces all headers.
    #[must_use]
    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Sets the HTTP method.
    #[must_use]
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }
}

/// A fully prepared call to a remote function, as handed to a
/// [`FunctionTransport`][crate::FunctionTransport].
///
/// Requests are immutable; recovery attempts derive new requests with
/// [`with_credential`][Self::with_credential].
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationRequest {
    destination: String,
    body: Option<Value>,
    headers: Headers,
    method: Method,
}

impl InvocationRequest {
    /// Creates a request. Caller-supplied authorization headers are removed.
    #[must_use]
    pub fn new(destination: impl Into<String>, body: Option<Value>, headers: Headers, method: Method) -> Self {
        Self {
            destination: destination.into(),
            body: if method.allows_body() { body } else { None },
            headers: strip_authorization(headers),
            method,
        }
    }

    /// The name of the remote function.
    #[must_use]
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// The JSON body, if any.
    #[must_use]
    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    /// The request headers.
    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// The HTTP method.
    #[must_use]
    pub fn method(&self) -> Method {
        self.method
    }

    /// Returns a copy of this request that carries `credential` as its bearer token.
    #[must_use]
    pub fn with_credential(&self, credential: &Credential) -> Self {
        let mut request = self.clone();
        request.headers = strip_authorization(request.headers);
        request.headers.insert(AUTHORIZATION.as_str().to_string(), credential.bearer());
        request
    }

    /// The bearer value of the `Authorization` header, if present.
    #[must_use]
    pub fn authorization(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(name, _)| is_authorization(name))
            .map(|(_, value)| value.as_str())
    }

    /// Headers for a raw call: JSON content type and `credential`, then the request's own
    /// headers (which never include authorization).
    pub(crate) fn raw_headers(&self, credential: Option<&Credential>) -> Headers {
        let mut headers = Headers::new();
        headers.insert(CONTENT_TYPE.as_str().to_string(), JSON_CONTENT_TYPE.to_string());
        if let Some(credential) = credential {
            headers.insert(AUTHORIZATION.as_str().to_string(), credential.bearer());
        }

        for (name, value) in strip_authorization(self.headers.clone()) {
            if name.eq_ignore_ascii_case(CONTENT_TYPE.as_str()) {
                headers.remove(CONTENT_TYPE.as_str());
            }
            headers.insert(name, value);
        }

        headers
    }
}

fn is_authorization(name: &str) -> bool {
    name.eq_ignore_ascii_case(AUTHORIZATION.as_str())
}

/// Removes every spelling of the `Authorization` header.
pub(crate) fn strip_authorization(mut headers: Headers) -> Headers {
    headers.retain(|name, _| !is_authorization(name));
    headers
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use serde_json::json;
    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(InvocationRequest: Send, Sync, Clone);
    assert_impl_all!(Credential: Send, Sync, Clone);

    fn headers(pairs: &[(&str, &str)]) -> Headers {
        pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect()
    }

    #[test]
    fn caller_authorization_is_stripped() {
        let request = InvocationRequest::new(
            "send-email",
            Some(json!({})),
            headers(&[("Authorization", "Bearer stale"), ("authorization", "Bearer stale"), ("x-tenant", "acme")]),
            Method::Post,
        );

        assert_eq!(request.headers(), &headers(&[("x-tenant", "acme")]));
        assert_eq!(request.authorization(), None);
    }

    #[test]
    fn with_credential_replaces_authorization() {
        let request = InvocationRequest::new("send-email", None, Headers::new(), Method::Post)
            .with_credential(&Credential::from("first"))
            .with_credential(&Credential::from("second"));

        assert_eq!(request.authorization(), Some("Bearer second"));
        assert_eq!(request.headers().len(), 1);
    }

    #[test]
    fn get_requests_drop_body() {
        let request = InvocationRequest::new("list", Some(json!({"a": 1})), Headers::new(), Method::Get);
        assert_eq!(request.body(), None);
    }

    #[test]
    fn raw_headers_order_defaults_before_caller_headers() {
        let request = InvocationRequest::new(
            "generate-quote-pdf",
            None,
            headers(&[("Content-Type", "application/vnd.custom+json"), ("x-tenant", "acme")]),
            Method::Post,
        );

        let raw = request.raw_headers(Some(&Credential::from("anon")));

        assert_eq!(
            raw,
            headers(&[
                ("Content-Type", "application/vnd.custom+json"),
                ("authorization", "Bearer anon"),
                ("x-tenant", "acme"),
            ])
        );
    }

    #[test]
    fn credential_debug_is_redacted() {
        let credential = Credential::from("super-secret");
        assert_eq!(format!("{credential:?}"), "Credential(***)");
        assert_eq!(credential.bearer(), "Bearer super-secret");
    }

    #[test]
    fn method_conversions() {
        assert_eq!(http::Method::from(Method::Patch), http::Method::PATCH);
        assert_eq!(Method::default(), Method::Post);
        assert_eq!(Method::Delete.as_str(), "DELETE");
        assert_eq!(serde_json::to_value(Method::Get).unwrap(), json!("GET"));
    }
}
