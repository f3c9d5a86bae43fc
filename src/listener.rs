//! Event emitting channel listener.

use std::sync::Arc;

use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use url::Url;

use crate::address::ChannelAddress;
use crate::codec::{Encoding, Payload};
use crate::error::{BuoyResult, ListenerError};
use crate::session::{ConnectionState, Session};
use crate::transport::{Transport, WsTransport};

const EVENT_BUFFER: usize = 100;

/// Events emitted by a [`Listener`].
#[derive(Debug, Clone)]
pub enum ListenerEvent {
    /// The socket transitioned to open.
    Connect,
    /// The socket left the open state, or an attempt to reach it failed.
    Disconnect,
    /// A payload was decoded.
    Message(Payload),
    /// A recoverable socket error, or a decode error fatal to one message.
    Error(ListenerError),
}

/// Listener configuration.
pub struct ListenerConfig {
    /// The buoy service url, e.g. `https://cb.anchor.link`.
    pub service: String,
    /// The channel to listen to, minimum 10 chars, usually a UUID string.
    pub channel: String,
    /// Decoding applied to incoming messages, defaults to text.
    pub encoding: Encoding,
    /// Connect as soon as the listener is constructed, defaults to true.
    pub auto_connect: bool,
    /// Transport used to dial the relay; defaults to the WebSocket
    /// transport.
    pub transport: Option<Arc<dyn Transport>>,
}

impl ListenerConfig {
    pub fn new(service: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            channel: channel.into(),
            encoding: Encoding::default(),
            auto_connect: true,
            transport: None,
        }
    }
}

struct SessionHandle {
    active: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// A resilient subscription to one relay channel.
///
/// The listener keeps a logical subscription alive across connection drops,
/// reconnecting with backoff until [`disconnect`](Listener::disconnect) is
/// called. Lifecycle and messages surface on the event stream returned by
/// [`subscribe`](Listener::subscribe); unhandled events are dropped.
///
/// Must be used from within a tokio runtime.
pub struct Listener {
    url: Url,
    encoding: Encoding,
    transport: Arc<dyn Transport>,
    events: broadcast::Sender<ListenerEvent>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    state_rx: watch::Receiver<ConnectionState>,
    session: Mutex<Option<SessionHandle>>,
}

impl Listener {
    /// Validate the configuration and construct the listener, connecting
    /// immediately unless `auto_connect` is false.
    pub fn new(config: ListenerConfig) -> BuoyResult<Self> {
        let address = ChannelAddress::new(&config.service, config.channel)?;
        let url = address.socket_url();
        let transport = config
            .transport
            .unwrap_or_else(|| Arc::new(WsTransport));
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let state_tx = Arc::new(state_tx);

        let session = config.auto_connect.then(|| {
            Self::spawn_session(
                url.clone(),
                config.encoding,
                Arc::clone(&transport),
                events.clone(),
                Arc::clone(&state_tx),
            )
        });

        Ok(Self {
            url,
            encoding: config.encoding,
            transport,
            events,
            state_tx,
            state_rx,
            session: Mutex::new(session),
        })
    }

    /// The derived socket URL this listener subscribes to.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Start the session. No-op if it is already running.
    pub async fn connect(&self) {
        let mut session = self.session.lock().await;
        if session.is_some() {
            return;
        }
        *session = Some(Self::spawn_session(
            self.url.clone(),
            self.encoding,
            Arc::clone(&self.transport),
            self.events.clone(),
            Arc::clone(&self.state_tx),
        ));
    }

    /// Stop the session gracefully. No-op if it is not running.
    ///
    /// An open or connecting socket is closed with code 1000, pending
    /// reconnect timers are cancelled, and no further reconnection happens.
    /// Completes once the session task has wound down.
    pub async fn disconnect(&self) {
        let handle = self.session.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.active.send(false);
            let _ = handle.task.await;
        }
    }

    /// True only while the session is active and the socket is open.
    pub async fn is_connected(&self) -> bool {
        self.session.lock().await.is_some() && self.state() == ConnectionState::Open
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Subscribe to listener events.
    pub fn subscribe(&self) -> broadcast::Receiver<ListenerEvent> {
        self.events.subscribe()
    }

    fn spawn_session(
        url: Url,
        encoding: Encoding,
        transport: Arc<dyn Transport>,
        events: broadcast::Sender<ListenerEvent>,
        state: Arc<watch::Sender<ConnectionState>>,
    ) -> SessionHandle {
        let (active, active_rx) = watch::channel(true);
        let session = Session::new(url, encoding, transport, events, state, active_rx);
        SessionHandle {
            active,
            task: tokio::spawn(session.run()),
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        // sessions left running without an explicit disconnect shut down on
        // their own
        if let Some(handle) = self.session.get_mut().take() {
            let _ = handle.active.send(false);
        }
    }
}
