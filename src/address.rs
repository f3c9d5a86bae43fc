//! Channel addressing and endpoint derivation.

use url::Url;

use crate::error::{BuoyError, BuoyResult};

/// Channel names shorter than this carry too little entropy to act as a
/// private mailbox; they are usually UUID strings.
const MIN_CHANNEL_LEN: usize = 10;

/// A validated service URL and channel name pair.
///
/// The service URL may use either the `http` or `ws` scheme family; the
/// socket and HTTP endpoints are derived from it by normalizing the scheme
/// in the respective direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelAddress {
    service: Url,
    channel: String,
}

impl ChannelAddress {
    /// Validate a service URL and channel name.
    ///
    /// Fails with [`BuoyError::Config`] on an unparseable service URL, an
    /// unsupported scheme, or a channel name shorter than 10 characters.
    pub fn new(service: &str, channel: impl Into<String>) -> BuoyResult<Self> {
        let channel = channel.into();
        if channel.is_empty() {
            return Err(BuoyError::Config("options must include a channel name".into()));
        }
        if channel.len() < MIN_CHANNEL_LEN {
            return Err(BuoyError::Config(format!(
                "channel name must be at least {MIN_CHANNEL_LEN} characters"
            )));
        }
        if service.is_empty() {
            return Err(BuoyError::Config("options must include a service url".into()));
        }
        let service: Url = service
            .parse()
            .map_err(|e| BuoyError::Config(format!("invalid service url: {e}")))?;
        match service.scheme() {
            "http" | "https" | "ws" | "wss" => {}
            other => {
                return Err(BuoyError::Config(format!(
                    "unsupported service url scheme: {other}"
                )));
            }
        }
        Ok(Self { service, channel })
    }

    /// The channel name.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// The service URL as given.
    pub fn service(&self) -> &Url {
        &self.service
    }

    /// WebSocket endpoint for subscribing to the channel,
    /// `<ws|wss>://host/<channel>?v=2`.
    pub fn socket_url(&self) -> Url {
        let mut url = self.endpoint();
        let scheme = match url.scheme() {
            "http" => "ws",
            "https" => "wss",
            other => other,
        }
        .to_string();
        // schemes are validated in new(), conversion within the http/ws
        // families cannot fail
        let _ = url.set_scheme(&scheme);
        url.set_query(Some("v=2"));
        url
    }

    /// HTTP endpoint for posting to the channel, `<http|https>://host/<channel>`.
    pub fn http_url(&self) -> Url {
        let mut url = self.endpoint();
        let scheme = match url.scheme() {
            "ws" => "http",
            "wss" => "https",
            other => other,
        }
        .to_string();
        let _ = url.set_scheme(&scheme);
        url
    }

    /// Service URL with the channel appended to the path.
    fn endpoint(&self) -> Url {
        let mut url = self.service.clone();
        let base = url.path().trim_end_matches('/').to_string();
        url.set_path(&format!("{}/{}", base, self.channel));
        url
    }
}
