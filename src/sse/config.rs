#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::collections::BTreeMap;
use std::time::Duration;

use bon::Builder;
use reqwest::header::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, serde_as};
use url::Url;

use crate::Result;
use crate::error::Error;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_RECONNECT_BASE_DELAY: Duration = Duration::from_millis(1000);
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// HTTP method used to open the stream.
#[non_exhaustive]
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum Method {
    #[default]
    #[serde(alias = "get")]
    Get,
    #[serde(alias = "post")]
    Post,
    #[serde(alias = "put")]
    Put,
    #[serde(alias = "patch")]
    Patch,
    #[serde(alias = "delete")]
    Delete,
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// Parameters of one stream connection.
///
/// Can be built in code or deserialized from JSON using camelCase keys, with
/// durations given in milliseconds:
///
/// ```
/// use sse_client_sdk::sse::StreamConfig;
///
/// let config: StreamConfig = serde_json::from_str(
///     r#"{ "address": "https://example.com/events", "maxReconnectAttempts": 2 }"#,
/// )?;
/// assert!(config.auto_reconnect);
/// assert_eq!(config.max_reconnect_attempts, 2);
/// # Ok::<_, serde_json::Error>(())
/// ```
#[serde_as]
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Builder, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamConfig {
    /// Stream endpoint; must be an `http` or `https` URL
    #[builder(into)]
    pub address: String,
    #[builder(default)]
    #[serde(default)]
    pub method: Method,
    /// Extra request headers
    #[builder(default)]
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Request body, for non-GET methods
    #[builder(into)]
    #[serde(default)]
    pub body: Option<String>,
    /// How long to wait for the response head before the attempt fails
    #[builder(default = DEFAULT_CONNECT_TIMEOUT)]
    #[serde(rename = "connectTimeoutMs", default = "default_connect_timeout")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub connect_timeout: Duration,
    /// Maximum silence between body chunks; `None` waits forever
    #[serde(rename = "readTimeoutMs", default)]
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    pub read_timeout: Option<Duration>,
    /// Log every notification at `debug` rather than `trace`
    #[builder(default)]
    #[serde(default)]
    pub debug: bool,
    #[builder(default = true)]
    #[serde(default = "default_auto_reconnect")]
    pub auto_reconnect: bool,
    /// Delay before the first automatic retry; doubles for every further one
    #[builder(default = DEFAULT_RECONNECT_BASE_DELAY)]
    #[serde(
        rename = "reconnectBaseDelayMs",
        default = "default_reconnect_base_delay"
    )]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub reconnect_base_delay: Duration,
    /// Retry budget; `0` disables automatic retry.
    ///
    /// With `0` a failure moves straight to `error` without a "maximum
    /// attempts reached" event, the same as `auto_reconnect = false`.
    #[builder(default = DEFAULT_MAX_RECONNECT_ATTEMPTS)]
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

const fn default_connect_timeout() -> Duration {
    DEFAULT_CONNECT_TIMEOUT
}

const fn default_auto_reconnect() -> bool {
    true
}

const fn default_reconnect_base_delay() -> Duration {
    DEFAULT_RECONNECT_BASE_DELAY
}

const fn default_max_reconnect_attempts() -> u32 {
    DEFAULT_MAX_RECONNECT_ATTEMPTS
}

impl StreamConfig {
    /// Shorthand for a GET stream on `address` with every other setting at its default.
    #[must_use]
    pub fn new<S: Into<String>>(address: S) -> Self {
        Self::builder().address(address).build()
    }

    /// Check the address and headers before any transport is involved.
    ///
    /// # Errors
    ///
    /// Returns a [`Kind::Validation`](crate::error::Kind::Validation) error when the
    /// address is empty, not a URL, not `http`/`https`, or when a header is malformed.
    pub fn validate(&self) -> Result<()> {
        if self.address.trim().is_empty() {
            return Err(Error::validation("address must not be empty"));
        }

        let url = Url::parse(&self.address).map_err(|e| {
            Error::validation(format!("address {:?} is not a valid URL: {e}", self.address))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::validation(
                "address must start with http:// or https://",
            ));
        }

        for (name, value) in &self.headers {
            HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::validation(format!("header name {name:?}: {e}")))?;
            HeaderValue::from_str(value)
                .map_err(|e| Error::validation(format!("header {name:?} value: {e}")))?;
        }

        Ok(())
    }
}
