//! One-shot message send over HTTP.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::address::ChannelAddress;
use crate::error::{BuoyError, BuoyResult};

/// Hard wait: the relay blocks until a subscriber confirms receipt or the
/// wait expires with a 408.
const WAIT_HEADER: &str = "X-Buoy-Wait";
/// Soft wait: same bound, but an undelivered message is buffered instead of
/// failing.
const SOFT_WAIT_HEADER: &str = "X-Buoy-Soft-Wait";
const DELIVERY_HEADER: &str = "X-Buoy-Delivery";

/// Result of a [`send`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendResult {
    /// Message was accepted but not yet delivered.
    Buffered,
    /// Message was delivered to at least one listener on the channel.
    Delivered,
}

impl SendResult {
    fn from_header(value: &str) -> Self {
        match value {
            "delivered" => Self::Delivered,
            _ => Self::Buffered,
        }
    }
}

/// Message body for a [`send`] call.
///
/// Text and bytes are posted as-is; anything else is JSON-serialized via
/// [`SendBody::json`].
#[derive(Debug, Clone, PartialEq)]
pub enum SendBody {
    Text(String),
    Binary(Vec<u8>),
    Json(Value),
}

impl SendBody {
    /// Serialize any value into a JSON body.
    pub fn json<T: Serialize>(value: &T) -> BuoyResult<Self> {
        Ok(Self::Json(serde_json::to_value(value)?))
    }

    fn into_bytes(self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            Self::Text(text) => Ok(text.into_bytes()),
            Self::Binary(bytes) => Ok(bytes),
            Self::Json(value) => serde_json::to_vec(&value),
        }
    }
}

impl From<&str> for SendBody {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<String> for SendBody {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&[u8]> for SendBody {
    fn from(bytes: &[u8]) -> Self {
        Self::Binary(bytes.to_vec())
    }
}

impl From<Vec<u8>> for SendBody {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(bytes)
    }
}

impl From<Value> for SendBody {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

/// Options for [`send`].
pub struct SendOptions {
    /// The buoy service url, e.g. `https://cb.anchor.link`.
    pub service: String,
    /// The channel to post to, minimum 10 chars, usually a UUID string.
    pub channel: String,
    /// How long the relay may wait for delivery.
    pub timeout: Option<Duration>,
    /// Only succeed on a confirmed delivery. Requires `timeout`.
    pub require_delivery: bool,
    /// HTTP client to use; a default client is created when unset.
    pub client: Option<reqwest::Client>,
}

impl SendOptions {
    pub fn new(service: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            channel: channel.into(),
            timeout: None,
            require_delivery: false,
            client: None,
        }
    }
}

/// Send a message to a buoy channel.
///
/// Posts once, with no retries. Without a timeout the relay accepts the
/// message for buffering; with one it waits up to that long for a listener,
/// and with `require_delivery` additionally fails the send if no listener
/// confirmed within the wait.
///
/// A 2xx response without a delivery header resolves to
/// [`SendResult::Buffered`]; the relay only reports delivery when a wait
/// was requested.
pub async fn send(message: impl Into<SendBody>, options: &SendOptions) -> BuoyResult<SendResult> {
    if options.require_delivery && options.timeout.is_none() {
        return Err(BuoyError::Config(
            "require_delivery can only be used with timeout".into(),
        ));
    }
    let address = ChannelAddress::new(&options.service, options.channel.clone())?;
    let url = address.http_url();
    let body = message.into().into_bytes()?;

    let client = options.client.clone().unwrap_or_default();
    let mut request = client.post(url.as_str()).body(body);
    if let Some(timeout) = options.timeout {
        let header = if options.require_delivery {
            WAIT_HEADER
        } else {
            SOFT_WAIT_HEADER
        };
        request = request.header(header, wait_seconds(timeout).to_string());
    }

    debug!(url = %url, "posting message");
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(match status.as_u16() {
            408 => BuoyError::DeliveryFailed,
            410 => BuoyError::RequestCancelled,
            code => BuoyError::UnexpectedStatus(code),
        });
    }

    let result = response
        .headers()
        .get(DELIVERY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(SendResult::from_header)
        .unwrap_or(SendResult::Buffered);
    debug!(result = ?result, "message accepted");
    Ok(result)
}

/// Wait bound communicated to the relay, in whole seconds rounded up.
fn wait_seconds(timeout: Duration) -> u64 {
    timeout.as_millis().div_ceil(1000) as u64
}
