// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::circuit::{DEFAULT_BASE_COOLDOWN, DEFAULT_FAILURE_THRESHOLD, DEFAULT_MAX_COOLDOWN};
use crate::request::Credential;

/// Path prefix under which the function host serves remote functions.
pub(crate) const FUNCTIONS_PATH: &str = "/functions/v1";

/// Environment variable holding the base URL of the function host.
pub const ENV_FUNCTIONS_URL: &str = "LIFELINE_FUNCTIONS_URL";
/// Environment variable holding the public (anonymous) credential.
pub const ENV_PUBLIC_KEY: &str = "LIFELINE_PUBLIC_KEY";
/// Secondary environment variable for the public credential, consulted when
/// [`ENV_PUBLIC_KEY`] is not set.
pub const ENV_PUBLISHABLE_KEY: &str = "LIFELINE_PUBLISHABLE_KEY";
/// Environment variable enabling development mode (`1` or `true`).
pub const ENV_DEV_MODE: &str = "LIFELINE_DEV_MODE";
/// Environment variable overriding the circuit failure threshold.
pub const ENV_CIRCUIT_FAILURE_THRESHOLD: &str = "LIFELINE_CIRCUIT_FAILURE_THRESHOLD";
/// Environment variable overriding the first cooldown, in milliseconds.
pub const ENV_CIRCUIT_BASE_COOLDOWN_MS: &str = "LIFELINE_CIRCUIT_BASE_COOLDOWN_MS";
/// Environment variable overriding the cooldown ceiling, in milliseconds.
pub const ENV_CIRCUIT_MAX_COOLDOWN_MS: &str = "LIFELINE_CIRCUIT_MAX_COOLDOWN_MS";

/// Configuration of a [`Gateway`][crate::Gateway].
///
/// Options follow the builder convention used across this crate: setters take plain
/// names (`base_url`), getters use the `get_` prefix (`get_base_url`).
///
/// The options can be loaded from the environment with [`GatewayOptions::from_env`] or
/// deserialized from any serde format; missing fields keep their defaults.
///
/// # Examples
///
/// ```
/// use lifeline::GatewayOptions;
///
/// let options = GatewayOptions::new()
///     .base_url("https://project.example.com/")
///     .public_credential("anon-key")
///     .dev_mode(false);
///
/// assert_eq!(
///     options.function_url("send-email"),
///     "https://project.example.com/functions/v1/send-email"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayOptions {
    base_url: String,
    public_credential: Option<Credential>,
    dev_mode: bool,
    manual_transport_fallback: bool,
    circuit: CircuitOptions,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            public_credential: None,
            dev_mode: false,
            manual_transport_fallback: true,
            circuit: CircuitOptions::default(),
        }
    }
}

impl GatewayOptions {
    /// Creates options with an empty base URL, no public credential, production routing
    /// and the default circuit settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads options from the `LIFELINE_*` environment variables.
    ///
    /// Values that are missing or fail to parse keep their defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut options = Self::new();

        if let Some(url) = lookup(ENV_FUNCTIONS_URL) {
            options = options.base_url(url);
        }

        if let Some(key) = lookup(ENV_PUBLIC_KEY).or_else(|| lookup(ENV_PUBLISHABLE_KEY))
            && !key.trim().is_empty()
        {
            options = options.public_credential(key);
        }

        if let Some(value) = lookup(ENV_DEV_MODE) {
            options.dev_mode = matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }

        if let Some(value) = lookup(ENV_CIRCUIT_FAILURE_THRESHOLD)
            && let Ok(parsed) = value.trim().parse::<u32>()
        {
            options.circuit = options.circuit.failure_threshold(parsed);
        }
        if let Some(value) = lookup(ENV_CIRCUIT_BASE_COOLDOWN_MS)
            && let Ok(parsed) = value.trim().parse::<u64>()
        {
            options.circuit = options.circuit.base_cooldown(Duration::from_millis(parsed));
        }
        if let Some(value) = lookup(ENV_CIRCUIT_MAX_COOLDOWN_MS)
            && let Ok(parsed) = value.trim().parse::<u64>()
        {
            options.circuit = options.circuit.max_cooldown(Duration::from_millis(parsed));
        }

        options
    }

    /// Sets the base URL of the function host. Trailing slashes are trimmed.
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    /// Sets the public credential used by the anonymous fallback and anonymous invocations.
    #[must_use]
    pub fn public_credential(mut self, credential: impl Into<Credential>) -> Self {
        self.public_credential = Some(credential.into());
        self
    }

    /// Enables development routing through the relative `/functions/v1/<name>` path so that a
    /// local proxy can forward the call.
    #[must_use]
    pub fn dev_mode(mut self, enabled: bool) -> Self {
        self.dev_mode = enabled;
        self
    }

    /// Enables or disables the raw-transport retry after the primary transport could not
    /// deliver a request. Enabled by default.
    #[must_use]
    pub fn manual_transport_fallback(mut self, enabled: bool) -> Self {
        self.manual_transport_fallback = enabled;
        self
    }

    /// Replaces the circuit breaker settings.
    #[must_use]
    pub fn circuit(mut self, circuit: CircuitOptions) -> Self {
        self.circuit = circuit;
        self
    }

    /// Returns the base URL of the function host without a trailing slash.
    #[must_use]
    pub fn get_base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the configured public credential, if any.
    #[must_use]
    pub fn get_public_credential(&self) -> Option<&Credential> {
        self.public_credential.as_ref()
    }

    /// Returns whether development routing is enabled.
    #[must_use]
    pub fn get_dev_mode(&self) -> bool {
        self.dev_mode
    }

    /// Returns whether the manual transport fallback is enabled.
    #[must_use]
    pub fn get_manual_transport_fallback(&self) -> bool {
        self.manual_transport_fallback
    }

    /// Returns the circuit breaker settings.
    #[must_use]
    pub fn get_circuit(&self) -> &CircuitOptions {
        &self.circuit
    }

    /// Resolves the URL of `destination`, honoring development routing.
    #[must_use]
    pub fn function_url(&self, destination: &str) -> String {
        if self.dev_mode {
            format!("{FUNCTIONS_PATH}/{destination}")
        } else {
            self.absolute_function_url(destination)
        }
    }

    /// Resolves the absolute URL of `destination`, ignoring development routing.
    #[must_use]
    pub fn absolute_function_url(&self, destination: &str) -> String {
        format!("{}{FUNCTIONS_PATH}/{destination}", self.base_url.trim_end_matches('/'))
    }
}

/// Circuit breaker settings shared by every destination of a registry.
///
/// | Parameter | Default | Configured By |
/// |-----------|---------|---------------|
/// | Failure threshold | `3` consecutive failures | [`failure_threshold`][Self::failure_threshold] |
/// | First cooldown | `1s` | [`base_cooldown`][Self::base_cooldown] |
/// | Cooldown ceiling | `30s` | [`max_cooldown`][Self::max_cooldown] |
///
/// Each failure past the threshold doubles the cooldown, up to the ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitOptions {
    #[serde(deserialize_with = "at_least_one")]
    failure_threshold: u32,
    #[serde(with = "millis", rename = "base_cooldown_ms")]
    base_cooldown: Duration,
    #[serde(with = "millis", rename = "max_cooldown_ms")]
    max_cooldown: Duration,
}

impl Default for CircuitOptions {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            base_cooldown: DEFAULT_BASE_COOLDOWN,
            max_cooldown: DEFAULT_MAX_COOLDOWN,
        }
    }
}

impl CircuitOptions {
    /// Sets the number of consecutive failures that opens the circuit. Clamped to at least 1.
    #[must_use]
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Sets the cooldown applied when the circuit first opens.
    #[must_use]
    pub fn base_cooldown(mut self, cooldown: Duration) -> Self {
        self.base_cooldown = cooldown;
        self
    }

    /// Sets the upper bound of the cooldown.
    #[must_use]
    pub fn max_cooldown(mut self, cooldown: Duration) -> Self {
        self.max_cooldown = cooldown;
        self
    }

    /// Returns the failure threshold.
    #[must_use]
    pub fn get_failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    /// Returns the first cooldown.
    #[must_use]
    pub fn get_base_cooldown(&self) -> Duration {
        self.base_cooldown
    }

    /// Returns the cooldown ceiling.
    #[must_use]
    pub fn get_max_cooldown(&self) -> Duration {
        self.max_cooldown
    }

    /// Cooldown for an entry that has accumulated `failure_count` consecutive failures.
    ///
    /// `base * 2^(failure_count - threshold)`, capped at the ceiling.
    pub(crate) fn cooldown_for(&self, failure_count: u32) -> Duration {
        let exponent = failure_count.saturating_sub(self.failure_threshold);
        2_u32
            .checked_pow(exponent)
            .and_then(|factor| self.base_cooldown.checked_mul(factor))
            .map_or(self.max_cooldown, |cooldown| cooldown.min(self.max_cooldown))
    }
}

fn at_least_one<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    u32::deserialize(deserializer).map(|value| value.max(1))
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rstest::rstest;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let options = GatewayOptions::new();

        assert_eq!(options.get_base_url(), "");
        assert!(options.get_public_credential().is_none());
        assert!(!options.get_dev_mode());
        assert!(options.get_manual_transport_fallback());
        assert_eq!(options.get_circuit().get_failure_threshold(), 3);
        assert_eq!(options.get_circuit().get_base_cooldown(), Duration::from_secs(1));
        assert_eq!(options.get_circuit().get_max_cooldown(), Duration::from_secs(30));
    }

    #[test]
    fn urls_follow_dev_mode() {
        let options = GatewayOptions::new().base_url("https://host.example.com//");

        assert_eq!(options.function_url("export-schema"), "https://host.example.com/functions/v1/export-schema");

        let options = options.dev_mode(true);
        assert_eq!(options.function_url("export-schema"), "/functions/v1/export-schema");
        assert_eq!(
            options.absolute_function_url("export-schema"),
            "https://host.example.com/functions/v1/export-schema"
        );
    }

    #[test]
    fn env_overrides() {
        let options = GatewayOptions::from_lookup(lookup(&[
            (ENV_FUNCTIONS_URL, "https://fn.example.com/"),
            (ENV_PUBLISHABLE_KEY, "publishable"),
            (ENV_DEV_MODE, "true"),
            (ENV_CIRCUIT_FAILURE_THRESHOLD, "5"),
            (ENV_CIRCUIT_BASE_COOLDOWN_MS, "250"),
            (ENV_CIRCUIT_MAX_COOLDOWN_MS, "not-a-number"),
        ]));

        assert_eq!(options.get_base_url(), "https://fn.example.com");
        assert_eq!(options.get_public_credential().map(Credential::expose), Some("publishable"));
        assert!(options.get_dev_mode());
        assert_eq!(options.get_circuit().get_failure_threshold(), 5);
        assert_eq!(options.get_circuit().get_base_cooldown(), Duration::from_millis(250));
        assert_eq!(options.get_circuit().get_max_cooldown(), Duration::from_secs(30));
    }

    #[test]
    fn public_key_takes_precedence_over_publishable_key() {
        let options = GatewayOptions::from_lookup(lookup(&[(ENV_PUBLIC_KEY, "anon"), (ENV_PUBLISHABLE_KEY, "publishable")]));

        assert_eq!(options.get_public_credential().map(Credential::expose), Some("anon"));
    }

    #[test]
    fn threshold_is_at_least_one() {
        assert_eq!(CircuitOptions::default().failure_threshold(0).get_failure_threshold(), 1);
    }

    #[rstest]
    #[case(3, Duration::from_secs(1))]
    #[case(4, Duration::from_secs(2))]
    #[case(5, Duration::from_secs(4))]
    #[case(7, Duration::from_secs(16))]
    #[case(8, Duration::from_secs(30))]
    #[case(40, Duration::from_secs(30))]
    #[case(u32::MAX, Duration::from_secs(30))]
    fn cooldown_doubles_up_to_ceiling(#[case] failures: u32, #[case] expected: Duration) {
        assert_eq!(CircuitOptions::default().cooldown_for(failures), expected);
    }

    #[test]
    fn deserializes_with_defaults() {
        let options: GatewayOptions = serde_json::from_str(
            r#"{ "base_url": "https://fn.example.com", "circuit": { "base_cooldown_ms": 500 } }"#,
        )
        .unwrap();

        assert_eq!(options.get_base_url(), "https://fn.example.com");
        assert!(options.get_manual_transport_fallback());
        assert_eq!(options.get_circuit().get_base_cooldown(), Duration::from_millis(500));
        assert_eq!(options.get_circuit().get_failure_threshold(), 3);
    }

    #[test]
    fn deserialized_zero_threshold_is_clamped() {
        let options: GatewayOptions = serde_json::from_str(r#"{ "circuit": { "failure_threshold": 0 } }"#).unwrap();

        assert_eq!(options.get_circuit().get_failure_threshold(), 1);
        assert_eq!(options.get_circuit().cooldown_for(1), Duration::from_secs(1));
    }
}
