//! One-shot message receive.

use std::future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Notify;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

use crate::codec::{Encoding, Payload};
use crate::error::{BuoyError, BuoyResult, ListenerError, MessageError, SocketError};
use crate::listener::{Listener, ListenerConfig, ListenerEvent};
use crate::transport::Transport;

/// Cancels a pending [`receive`] from the outside.
///
/// Clones share the same handle. Cancelling before the receive starts
/// rejects it immediately; cancelling after it settled is a no-op.
#[derive(Debug, Clone, Default)]
pub struct ReceiveCanceler {
    notify: Arc<Notify>,
}

impl ReceiveCanceler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the associated receive with a cancellation error.
    pub fn cancel(&self) {
        self.notify.notify_one();
    }

    async fn cancelled(&self) {
        self.notify.notified().await;
    }
}

/// Options for [`receive`].
pub struct ReceiveOptions {
    /// The buoy service url, e.g. `https://cb.anchor.link`.
    pub service: String,
    /// The channel to listen to, minimum 10 chars, usually a UUID string.
    pub channel: String,
    /// Decoding applied to the incoming message, defaults to text.
    pub encoding: Encoding,
    /// How long to wait before giving up.
    pub timeout: Option<Duration>,
    /// Handle that lets the caller cancel the receive.
    pub cancel: Option<ReceiveCanceler>,
    /// Transport used to dial the relay; defaults to the WebSocket
    /// transport.
    pub transport: Option<Arc<dyn Transport>>,
}

impl ReceiveOptions {
    pub fn new(service: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            channel: channel.into(),
            encoding: Encoding::default(),
            timeout: None,
            cancel: None,
            transport: None,
        }
    }
}

/// Receive a single message from a buoy channel.
///
/// Resolves with the first message, or rejects on the first decode error,
/// on timeout, or on cancellation. Socket errors never settle the receive;
/// the underlying listener reconnects on its own, and the last one seen is
/// attached to a timeout or cancellation as context. The private listener
/// is disconnected once settled.
///
/// Instantiate a [`Listener`] to receive multiple messages over the same
/// channel.
pub async fn receive(options: ReceiveOptions) -> BuoyResult<Payload> {
    let mut config = ListenerConfig::new(options.service, options.channel);
    config.encoding = options.encoding;
    config.auto_connect = false;
    config.transport = options.transport;
    let listener = Listener::new(config)?;

    // subscribe before connecting so the first message cannot slip by
    let mut events = listener.subscribe();
    listener.connect().await;

    let deadline = options.timeout.map(|timeout| Instant::now() + timeout);
    let cancel = options.cancel;
    let mut last_socket_error: Option<SocketError> = None;

    let result = loop {
        tokio::select! {
            biased;
            event = events.recv() => match event {
                Ok(ListenerEvent::Message(payload)) => break Ok(payload),
                Ok(ListenerEvent::Error(ListenerError::Message(error))) => {
                    break Err(BuoyError::Message(error));
                }
                Ok(ListenerEvent::Error(ListenerError::Socket(error))) => {
                    debug!(error = %error, "recoverable socket error");
                    last_socket_error = Some(error);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event stream lagged");
                }
                // the listener owns the sender, so the stream only closes
                // if the listener is torn down underneath us
                Err(RecvError::Closed) => {
                    break Err(BuoyError::Message(MessageError::Cancelled {
                        source: last_socket_error.take(),
                    }));
                }
            },
            _ = sleep_or_never(deadline) => {
                break Err(BuoyError::Message(MessageError::Timeout {
                    source: last_socket_error.take(),
                }));
            }
            _ = cancelled_or_never(cancel.as_ref()) => {
                break Err(BuoyError::Message(MessageError::Cancelled {
                    source: last_socket_error.take(),
                }));
            }
        }
    };

    listener.disconnect().await;
    result
}

async fn sleep_or_never(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => future::pending().await,
    }
}

async fn cancelled_or_never(cancel: Option<&ReceiveCanceler>) {
    match cancel {
        Some(cancel) => cancel.cancelled().await,
        None => future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::Instant;

    use super::*;
    use crate::transport::testing::TestTransport;
    use crate::transport::Frame;

    fn scripted_options(
        transport: TestTransport,
    ) -> ReceiveOptions {
        let mut options = ReceiveOptions::new("http://relay.test", "receive-channel");
        options.transport = Some(Arc::new(transport));
        options
    }

    #[tokio::test(start_paused = true)]
    async fn resolves_with_first_message() {
        let (transport, mut remotes) = TestTransport::pair(false);
        let mut options = scripted_options(transport);
        options.timeout = Some(Duration::from_secs(5));

        let pending = tokio::spawn(receive(options));
        let remote = remotes.recv().await.unwrap();
        remote.to_client.send(Ok(Frame::Text("the payload".into()))).unwrap();

        let payload = pending.await.unwrap().unwrap();
        assert_eq!(payload, Payload::Text("the payload".into()));
        // the private listener was torn down with a normal close
        assert_eq!(remote.closed.await.unwrap(), 1000);
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_on_timeout() {
        let (transport, mut remotes) = TestTransport::pair(false);
        let mut options = scripted_options(transport);
        options.timeout = Some(Duration::from_millis(100));
        let started = Instant::now();

        let pending = tokio::spawn(receive(options));
        let _remote = remotes.recv().await.unwrap();

        let error = pending.await.unwrap().unwrap_err();
        assert!(matches!(
            error,
            BuoyError::Message(MessageError::Timeout { source: None })
        ));
        assert_eq!(started.elapsed(), Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_carries_last_socket_error() {
        let (transport, mut remotes) = TestTransport::pair(false);
        let mut options = scripted_options(transport);
        options.timeout = Some(Duration::from_millis(100));

        let pending = tokio::spawn(receive(options));
        let remote = remotes.recv().await.unwrap();
        remote
            .to_client
            .send(Err(SocketError::new("connection reset")))
            .unwrap();
        // the session reconnects transparently underneath
        let _second = remotes.recv().await.unwrap();

        match pending.await.unwrap().unwrap_err() {
            BuoyError::Message(MessageError::Timeout { source: Some(error) }) => {
                assert_eq!(error.reason, "connection reset");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_on_cancellation() {
        let (transport, mut remotes) = TestTransport::pair(false);
        let mut options = scripted_options(transport);
        let canceler = ReceiveCanceler::new();
        options.cancel = Some(canceler.clone());

        let pending = tokio::spawn(receive(options));
        let _remote = remotes.recv().await.unwrap();
        canceler.cancel();

        assert!(matches!(
            pending.await.unwrap().unwrap_err(),
            BuoyError::Message(MessageError::Cancelled { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_before_start_rejects_immediately() {
        let (transport, _remotes) = TestTransport::pair(false);
        let mut options = scripted_options(transport);
        let canceler = ReceiveCanceler::new();
        options.cancel = Some(canceler.clone());
        canceler.cancel();

        assert!(matches!(
            receive(options).await.unwrap_err(),
            BuoyError::Message(MessageError::Cancelled { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_on_decode_error() {
        let (transport, mut remotes) = TestTransport::pair(false);
        let mut options = scripted_options(transport);
        options.encoding = Encoding::Json;

        let pending = tokio::spawn(receive(options));
        let remote = remotes.recv().await.unwrap();
        remote.to_client.send(Ok(Frame::Text("{bad json".into()))).unwrap();

        assert!(matches!(
            pending.await.unwrap().unwrap_err(),
            BuoyError::Message(MessageError::Decode { .. })
        ));
        assert_eq!(remote.closed.await.unwrap(), 1000);
    }

    #[tokio::test(start_paused = true)]
    async fn message_beats_simultaneous_timeout() {
        let (transport, mut remotes) = TestTransport::pair(false);
        let mut options = scripted_options(transport);
        options.timeout = Some(Duration::from_millis(100));

        let pending = tokio::spawn(receive(options));
        let remote = remotes.recv().await.unwrap();
        // park the message right at the deadline; the event branch is
        // polled first, so the message wins
        tokio::time::advance(Duration::from_millis(100)).await;
        remote.to_client.send(Ok(Frame::Text("late".into()))).unwrap();

        let settled = pending.await.unwrap();
        match settled {
            Ok(payload) => assert_eq!(payload, Payload::Text("late".into())),
            Err(BuoyError::Message(MessageError::Timeout { .. })) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_invalid_configuration() {
        let (transport, _remotes) = TestTransport::pair(false);
        let mut options = scripted_options(transport);
        options.channel = "short".into();
        assert!(matches!(
            receive(options).await.unwrap_err(),
            BuoyError::Config(_)
        ));
    }
}
