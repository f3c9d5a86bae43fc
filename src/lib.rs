//! Client for the buoy message relay.
//!
//! The relay bridges two transports onto named channels: listeners hold a
//! WebSocket to receive messages pushed to a channel, and senders post to
//! the same channel over plain HTTP.
//!
//! This crate provides:
//! - [`Listener`]: a resilient channel subscription with automatic
//!   reconnection, in-band heartbeat handling, and an event stream
//! - [`receive`]: one-shot receive of the next message on a channel, with
//!   timeout and external cancellation
//! - [`send`]: one-shot HTTP send with optional delivery confirmation

mod address;
mod codec;
mod error;
mod listener;
mod receive;
mod send;
mod session;
mod transport;

pub use address::ChannelAddress;
pub use codec::{Encoding, Payload};
pub use error::{BuoyError, BuoyResult, ListenerError, MessageError, SocketError};
pub use listener::{Listener, ListenerConfig, ListenerEvent};
pub use receive::{receive, ReceiveCanceler, ReceiveOptions};
pub use send::{send, SendBody, SendOptions, SendResult};
pub use session::ConnectionState;
pub use transport::{Conn, Frame, Transport, WsTransport};
