//! Socket transport seam.
//!
//! The session talks to the relay through the [`Transport`] and [`Conn`]
//! traits rather than a concrete socket type, so tests can inject a
//! scripted transport and the heartbeat watchdog can key off a declared
//! capability instead of probing the connection at runtime.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::error::SocketError;

/// A frame on an established connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Binary data.
    Binary(Vec<u8>),
    /// Text data, handled by the session as its UTF-8 bytes.
    Text(String),
    /// Transport level ping notification, feeds the liveness watchdog.
    Ping,
    /// The peer closed the connection with an optional close code.
    Close(Option<u16>),
}

/// One established physical connection.
///
/// Dropping a connection without calling [`close`](Conn::close) terminates
/// it forcefully, without a close handshake.
#[async_trait]
pub trait Conn: Send {
    /// Next inbound frame; `None` once the connection has ended.
    async fn next_frame(&mut self) -> Option<Result<Frame, SocketError>>;

    /// Send a frame to the peer.
    async fn send(&mut self, frame: Frame) -> Result<(), SocketError>;

    /// Close the connection gracefully with the given close code.
    async fn close(&mut self, code: u16) -> Result<(), SocketError>;

    /// Whether this transport surfaces ping notifications. Gates the
    /// session's liveness watchdog.
    fn ping_capable(&self) -> bool {
        false
    }
}

/// Dials physical connections for a session.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Conn>, SocketError>;
}

/// Production transport over tokio-tungstenite.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsTransport;

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Conn>, SocketError> {
        let (stream, _) = connect_async(url.as_str()).await?;
        Ok(Box::new(WsConn { inner: stream }))
    }
}

struct WsConn {
    inner: WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
}

#[async_trait]
impl Conn for WsConn {
    async fn next_frame(&mut self) -> Option<Result<Frame, SocketError>> {
        loop {
            return match self.inner.next().await? {
                Ok(Message::Binary(bytes)) => Some(Ok(Frame::Binary(bytes.to_vec()))),
                Ok(Message::Text(text)) => Some(Ok(Frame::Text(text.as_str().to_owned()))),
                // tungstenite queues the matching pong itself
                Ok(Message::Ping(_)) => Some(Ok(Frame::Ping)),
                Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => continue,
                Ok(Message::Close(frame)) => {
                    Some(Ok(Frame::Close(frame.map(|f| f.code.into()))))
                }
                Err(e) => Some(Err(e.into())),
            };
        }
    }

    async fn send(&mut self, frame: Frame) -> Result<(), SocketError> {
        let message = match frame {
            Frame::Binary(bytes) => Message::Binary(bytes.into()),
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Ping => Message::Ping(Vec::new().into()),
            Frame::Close(code) => return self.close(code.unwrap_or(1000)).await,
        };
        self.inner.send(message).await.map_err(SocketError::from)
    }

    async fn close(&mut self, code: u16) -> Result<(), SocketError> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: "".into(),
        };
        match self.inner.close(Some(frame)).await {
            Ok(())
            | Err(tungstenite::Error::ConnectionClosed)
            | Err(tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn ping_capable(&self) -> bool {
        true
    }
}

impl From<tungstenite::Error> for SocketError {
    fn from(error: tungstenite::Error) -> Self {
        SocketError::new(error.to_string())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted in-memory transport for session tests.

    use std::sync::atomic::{AtomicU32, Ordering};

    use tokio::sync::{mpsc, oneshot};

    use super::*;

    /// Server side of a scripted connection.
    pub(crate) struct TestRemote {
        /// Frames pushed here arrive at the client.
        pub(crate) to_client: mpsc::UnboundedSender<Result<Frame, SocketError>>,
        /// Frames the client sent (heartbeat acks).
        pub(crate) from_client: mpsc::UnboundedReceiver<Frame>,
        /// Resolves with the close code on a graceful client close; errs if
        /// the client terminated the connection without one.
        pub(crate) closed: oneshot::Receiver<u16>,
    }

    pub(crate) struct TestTransport {
        remotes: mpsc::UnboundedSender<TestRemote>,
        ping_capable: bool,
        /// Number of upcoming dials to refuse.
        pub(crate) fail_dials: AtomicU32,
    }

    impl TestTransport {
        /// A transport plus the stream of server-side connection handles it
        /// produces, one per successful dial.
        pub(crate) fn pair(
            ping_capable: bool,
        ) -> (Self, mpsc::UnboundedReceiver<TestRemote>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (
                Self {
                    remotes: tx,
                    ping_capable,
                    fail_dials: AtomicU32::new(0),
                },
                rx,
            )
        }
    }

    #[async_trait]
    impl Transport for TestTransport {
        async fn connect(&self, _url: &Url) -> Result<Box<dyn Conn>, SocketError> {
            let remaining = self.fail_dials.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_dials.store(remaining - 1, Ordering::SeqCst);
                return Err(SocketError::new("connection refused"));
            }
            let (to_client, client_rx) = mpsc::unbounded_channel();
            let (client_tx, from_client) = mpsc::unbounded_channel();
            let (close_tx, closed) = oneshot::channel();
            let _ = self.remotes.send(TestRemote {
                to_client,
                from_client,
                closed,
            });
            Ok(Box::new(TestConn {
                rx: client_rx,
                tx: client_tx,
                close_tx: Some(close_tx),
                ping_capable: self.ping_capable,
            }))
        }
    }

    struct TestConn {
        rx: mpsc::UnboundedReceiver<Result<Frame, SocketError>>,
        tx: mpsc::UnboundedSender<Frame>,
        close_tx: Option<oneshot::Sender<u16>>,
        ping_capable: bool,
    }

    #[async_trait]
    impl Conn for TestConn {
        async fn next_frame(&mut self) -> Option<Result<Frame, SocketError>> {
            self.rx.recv().await
        }

        async fn send(&mut self, frame: Frame) -> Result<(), SocketError> {
            self.tx
                .send(frame)
                .map_err(|_| SocketError::new("remote gone"))
        }

        async fn close(&mut self, code: u16) -> Result<(), SocketError> {
            if let Some(tx) = self.close_tx.take() {
                let _ = tx.send(code);
            }
            self.rx.close();
            Ok(())
        }

        fn ping_capable(&self) -> bool {
            self.ping_capable
        }
    }
}
