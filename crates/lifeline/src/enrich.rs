// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Trace and idempotency stamping of outbound payloads.

use std::fmt::Write as _;
use std::time::UNIX_EPOCH;

use serde::Serialize;
use serde_json::Value;
use tick::Clock;

use crate::request::Headers;

/// Header carrying the per-call trace identifier.
pub const TRACE_ID_HEADER: &str = "x-trace-id";
/// Header carrying the idempotency key.
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// Body field carrying the per-call trace identifier.
pub const TRACE_ID_FIELD: &str = "traceId";
/// Body field carrying the idempotency key; any non-null caller-supplied value is passed through.
pub const IDEMPOTENCY_KEY_FIELD: &str = "idempotencyKey";

const IDEMPOTENCY_KEY_PREFIX: &str = "idem_";

/// An outbound body stamped with a trace id and an idempotency key.
///
/// Created by [`enrich`].
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedPayload {
    body: Option<Value>,
    trace_id: String,
    idempotency_key: String,
}

impl EnrichedPayload {
    /// The random, 128-bit, lowercase-hex trace identifier of this call.
    #[must_use]
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// The idempotency key of this payload.
    #[must_use]
    pub fn idempotency_key(&self) -> &str {
        &self.idempotency_key
    }

    /// The stamped body. Object bodies carry `traceId` and `idempotencyKey` fields; other
    /// bodies are passed through unchanged.
    #[must_use]
    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    /// Adds the trace and idempotency headers to `headers`.
    pub fn stamp_headers(&self, headers: &mut Headers) {
        headers.insert(TRACE_ID_HEADER.to_string(), self.trace_id.clone());
        headers.insert(IDEMPOTENCY_KEY_HEADER.to_string(), self.idempotency_key.clone());
    }

    /// Consumes the payload and returns the stamped body.
    #[must_use]
    pub fn into_body(self) -> Option<Value> {
        self.body
    }
}

/// Stamps `body` with a fresh trace id and an idempotency key.
///
/// A non-null `idempotencyKey` supplied by the caller is left in the body untouched and becomes
/// the key: a string as is, any other value as its JSON text. Otherwise the key is a
/// deterministic hash of the serialized body: byte-identical bodies always produce the same key,
/// while every call produces a new trace id. `clock` is only read when the body cannot be
/// serialized.
///
/// # Examples
///
/// ```
/// use lifeline::enrich;
/// use serde_json::json;
/// use tick::Clock;
///
/// let clock = Clock::new_frozen();
/// let body = json!({ "to": "ops@example.com", "template": "quote" });
/// let first = enrich(Some(&body), &clock);
/// let second = enrich(Some(&body), &clock);
///
/// assert_eq!(first.idempotency_key(), second.idempotency_key());
/// assert_ne!(first.trace_id(), second.trace_id());
/// assert!(first.idempotency_key().starts_with("idem_"));
/// ```
#[must_use]
pub fn enrich(body: Option<&Value>, clock: &Clock) -> EnrichedPayload {
    let trace_id = trace_id();
    let supplied = supplied_key(body);
    let stamp_key = supplied.is_none();
    let idempotency_key = supplied.unwrap_or_else(|| idempotency_key(body.unwrap_or(&Value::Null), clock));

    let body = body.cloned().map(|body| match body {
        Value::Object(mut fields) => {
            fields.insert(TRACE_ID_FIELD.to_string(), Value::String(trace_id.clone()));
            if stamp_key {
                fields.insert(IDEMPOTENCY_KEY_FIELD.to_string(), Value::String(idempotency_key.clone()));
            }
            Value::Object(fields)
        }
        other => other,
    });

    EnrichedPayload {
        body,
        trace_id,
        idempotency_key,
    }
}

fn supplied_key(body: Option<&Value>) -> Option<String> {
    match body?.get(IDEMPOTENCY_KEY_FIELD)? {
        Value::Null => None,
        Value::String(key) => Some(key.clone()),
        other => Some(other.to_string()),
    }
}

/// Derives the idempotency key of any serializable value.
///
/// Falls back to a key built from the milliseconds since the Unix epoch on `clock` when `value`
/// cannot be serialized; such keys are not stable and only support at-most-once handling by the
/// receiver.
#[must_use]
pub fn idempotency_key<T: Serialize + ?Sized>(value: &T, clock: &Clock) -> String {
    match serde_json::to_string(value) {
        Ok(serialized) => format!("{IDEMPOTENCY_KEY_PREFIX}{}", rolling_hash(&serialized).unsigned_abs()),
        Err(error) => {
            tracing::debug!(%error, "payload not serializable, using timestamp idempotency key");
            let millis = clock.system_time().duration_since(UNIX_EPOCH).map_or(0, |elapsed| elapsed.as_millis());
            format!("{IDEMPOTENCY_KEY_PREFIX}{millis}")
        }
    }
}

/// 32-bit rolling multiplicative hash (`h = h * 31 + unit`) over UTF-16 code units.
fn rolling_hash(text: &str) -> i32 {
    text.encode_utf16()
        .fold(0_i32, |hash, unit| hash.wrapping_mul(31).wrapping_add(i32::from(unit)))
}

/// Generates 16 random bytes as 32 lowercase hex characters.
pub(crate) fn trace_id() -> String {
    let mut bytes = [0_u8; 16];
    if let Err(error) = getrandom::getrandom(&mut bytes) {
        tracing::debug!(%error, "os entropy unavailable, using non-cryptographic trace id");
        bytes.iter_mut().for_each(|byte| *byte = fastrand::u8(..));
    }

    bytes.iter().fold(String::with_capacity(32), |mut hex, byte| {
        _ = write!(hex, "{byte:02x}");
        hex
    })
}
