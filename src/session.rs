//! Reconnecting socket session.
//!
//! A session owns one logical channel subscription across any number of
//! physical connections. It runs as a single spawned task driving an
//! explicit state machine: `Idle → Connecting → Open → Closed`, where
//! `Closed` re-enters `Connecting` after a backoff delay for as long as the
//! session is active. Only an explicit disconnect stops it.

use std::future;
use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio::time::{interval_at, sleep, sleep_until, Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

use crate::codec::{self, Encoding};
use crate::error::ListenerError;
use crate::listener::ListenerEvent;
use crate::transport::{Conn, Frame, Transport};

/// Normal closure code sent on graceful teardown.
const NORMAL_CLOSE: u16 = 1000;

/// While open, the physical connection is cycled at this interval so that
/// middleboxes silently dropping idle connections cannot wedge the session.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// The relay pings every 10 seconds; a ping-capable connection that stays
/// silent this long is considered stuck and gets terminated.
const PING_WATCHDOG: Duration = Duration::from_secs(15);

/// Connection state of a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never connected.
    Idle,
    /// A dial is in flight.
    Connecting,
    /// Subscribed and receiving.
    Open,
    /// Connection closed; retrying while the session is active, terminal
    /// otherwise.
    Closed,
}

/// Reconnect delay for the given 0-based retry count, `min((7n)², 5s)`.
///
/// Reaches the 5 second cap after roughly 10 tries.
pub(crate) fn backoff(tries: u32) -> Duration {
    let scaled = u64::from(tries) * 7;
    Duration::from_millis(scaled.saturating_mul(scaled).min(5000))
}

pub(crate) struct Session {
    url: Url,
    encoding: Encoding,
    transport: Arc<dyn Transport>,
    events: broadcast::Sender<ListenerEvent>,
    state: Arc<watch::Sender<ConnectionState>>,
    active: watch::Receiver<bool>,
    retries: u32,
}

impl Session {
    pub(crate) fn new(
        url: Url,
        encoding: Encoding,
        transport: Arc<dyn Transport>,
        events: broadcast::Sender<ListenerEvent>,
        state: Arc<watch::Sender<ConnectionState>>,
        active: watch::Receiver<bool>,
    ) -> Self {
        Self {
            url,
            encoding,
            transport,
            events,
            state,
            active,
            retries: 0,
        }
    }

    /// Dial, pump, and redial until disconnected.
    pub(crate) async fn run(mut self) {
        let mut active = self.active.clone();
        loop {
            if !*active.borrow() {
                break;
            }
            self.set_state(ConnectionState::Connecting);
            debug!(url = %self.url, attempt = self.retries, "connecting");
            let dial = tokio::select! {
                biased;
                _ = active.wait_for(|a| !*a) => None,
                result = self.transport.connect(&self.url) => Some(result),
            };
            match dial {
                None => {
                    // disconnected mid-dial; the attempt never reached open
                    self.emit(ListenerEvent::Disconnect);
                    break;
                }
                Some(Ok(conn)) => {
                    self.retries = 0;
                    self.set_state(ConnectionState::Open);
                    info!(url = %self.url, "connected");
                    self.emit(ListenerEvent::Connect);
                    let shutdown = self.drive(conn, &mut active).await;
                    self.set_state(ConnectionState::Closed);
                    self.emit(ListenerEvent::Disconnect);
                    if shutdown {
                        break;
                    }
                }
                Some(Err(e)) => {
                    warn!(url = %self.url, error = %e, "connection failed");
                    self.emit(ListenerEvent::Error(ListenerError::Socket(e)));
                    self.set_state(ConnectionState::Closed);
                    self.emit(ListenerEvent::Disconnect);
                }
            }
            let delay = backoff(self.retries);
            self.retries += 1;
            if !*active.borrow() {
                break;
            }
            debug!(delay_ms = delay.as_millis() as u64, "reconnecting after backoff");
            tokio::select! {
                biased;
                _ = active.wait_for(|a| !*a) => break,
                _ = sleep(delay) => {}
            }
        }
        self.set_state(ConnectionState::Closed);
    }

    /// Pump one open connection until it ends.
    ///
    /// Returns true when the session was disconnected and must not redial.
    async fn drive(&self, mut conn: Box<dyn Conn>, active: &mut watch::Receiver<bool>) -> bool {
        let mut keepalive = interval_at(Instant::now() + KEEPALIVE_INTERVAL, KEEPALIVE_INTERVAL);
        let ping_capable = conn.ping_capable();
        // armed by the first ping, re-armed by every one after it
        let mut ping_deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                biased;
                _ = async { let _ = active.wait_for(|a| !*a).await; } => {
                    debug!("closing connection");
                    if let Err(e) = conn.close(NORMAL_CLOSE).await {
                        debug!(error = %e, "close failed");
                    }
                    return true;
                }
                frame = conn.next_frame() => match frame {
                    Some(Ok(Frame::Binary(bytes))) => {
                        self.handle_inbound(&mut conn, bytes).await;
                    }
                    Some(Ok(Frame::Text(text))) => {
                        self.handle_inbound(&mut conn, text.into_bytes()).await;
                    }
                    Some(Ok(Frame::Ping)) => {
                        if ping_capable {
                            ping_deadline = Some(Instant::now() + PING_WATCHDOG);
                        }
                    }
                    Some(Ok(Frame::Close(code))) => {
                        debug!(code = ?code, "server closed connection");
                        return false;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "socket error");
                        self.emit(ListenerEvent::Error(ListenerError::Socket(e)));
                        return false;
                    }
                    None => {
                        debug!("connection ended");
                        return false;
                    }
                },
                _ = keepalive.tick() => {
                    debug!("cycling idle connection");
                    if let Err(e) = conn.close(NORMAL_CLOSE).await {
                        debug!(error = %e, "close failed");
                    }
                    return false;
                }
                _ = async move {
                    match ping_deadline {
                        Some(deadline) => sleep_until(deadline).await,
                        None => future::pending().await,
                    }
                }, if ping_capable => {
                    warn!("no ping within watchdog window, terminating connection");
                    // dropped without a close handshake to unstick the socket
                    drop(conn);
                    return false;
                }
            }
        }
    }

    /// Answer heartbeats, decode and publish everything else.
    async fn handle_inbound(&self, conn: &mut Box<dyn Conn>, bytes: Vec<u8>) {
        match codec::classify(&bytes) {
            codec::Inbound::Heartbeat { seq } => {
                debug!(seq, "answering heartbeat");
                if let Err(e) = conn.send(Frame::Binary(codec::heartbeat_ack(seq).to_vec())).await {
                    warn!(error = %e, "failed to answer heartbeat");
                    self.emit(ListenerEvent::Error(ListenerError::Socket(e)));
                }
            }
            codec::Inbound::Payload => match codec::decode(bytes, self.encoding) {
                Ok(payload) => {
                    self.emit(ListenerEvent::Message(payload));
                }
                Err(e) => {
                    warn!(error = %e, "undecodable message");
                    self.emit(ListenerEvent::Error(ListenerError::Message(e)));
                }
            },
        }
    }

    fn emit(&self, event: ListenerEvent) {
        // absent or lagging subscribers are fine
        let _ = self.events.send(event);
    }

    fn set_state(&self, state: ConnectionState) {
        let _ = self.state.send_replace(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_follows_quadratic_curve() {
        for tries in 0..10u32 {
            let expected = ((u64::from(tries) * 7).pow(2)).min(5000);
            assert_eq!(backoff(tries), Duration::from_millis(expected));
        }
        assert_eq!(backoff(0), Duration::ZERO);
        assert_eq!(backoff(1), Duration::from_millis(49));
        assert_eq!(backoff(2), Duration::from_millis(196));
        assert_eq!(backoff(10), Duration::from_millis(4900));
        assert_eq!(backoff(11), Duration::from_millis(5000));
    }

    #[test]
    fn backoff_caps_out() {
        assert_eq!(backoff(12), Duration::from_millis(5000));
        assert_eq!(backoff(1000), Duration::from_millis(5000));
        assert_eq!(backoff(u32::MAX), Duration::from_millis(5000));
    }

    #[test]
    fn backoff_is_non_decreasing() {
        let mut last = Duration::ZERO;
        for tries in 0..20u32 {
            let delay = backoff(tries);
            assert!(delay >= last);
            last = delay;
        }
    }
}
