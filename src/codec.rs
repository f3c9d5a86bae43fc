//! In-band heartbeat framing and payload decoding.
//!
//! The relay may send a 4-byte control frame `[0x42, 0x42, 0x01, seq]` on
//! the socket to probe liveness. It must be answered on the same connection
//! with `[0x42, 0x42, 0x02, seq]` and is never surfaced as a message.
//! Everything else on the wire is a payload, decoded per the configured
//! [`Encoding`].

use serde_json::Value;

use crate::error::MessageError;

const HEARTBEAT_MAGIC: [u8; 3] = [0x42, 0x42, 0x01];
const HEARTBEAT_ACK: [u8; 3] = [0x42, 0x42, 0x02];

/// How incoming payloads are decoded, fixed per listener at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    /// Pass bytes through unchanged.
    Binary,
    /// Decode as UTF-8 text, replacing malformed sequences.
    #[default]
    Text,
    /// Decode as UTF-8 text and parse as JSON.
    Json,
}

/// A decoded message payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Binary(Vec<u8>),
    Text(String),
    Json(Value),
}

/// Classification of a raw inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Inbound {
    /// Heartbeat control frame carrying its sequence tag. Consumed by the
    /// session, never delivered.
    Heartbeat { seq: u8 },
    /// A payload frame, to be decoded in full.
    Payload,
}

/// Recognize a heartbeat control frame by its 3-byte magic prefix.
///
/// Frames too short to carry the sequence tag are payloads.
pub(crate) fn classify(bytes: &[u8]) -> Inbound {
    if bytes.len() >= 4 && bytes[..3] == HEARTBEAT_MAGIC {
        Inbound::Heartbeat { seq: bytes[3] }
    } else {
        Inbound::Payload
    }
}

/// The ack frame answering a heartbeat, echoing its sequence tag.
pub(crate) fn heartbeat_ack(seq: u8) -> [u8; 4] {
    [HEARTBEAT_ACK[0], HEARTBEAT_ACK[1], HEARTBEAT_ACK[2], seq]
}

/// Decode a payload frame per the configured encoding.
///
/// Decode failures are per-message errors; the connection they arrived on
/// stays usable.
pub(crate) fn decode(bytes: Vec<u8>, encoding: Encoding) -> Result<Payload, MessageError> {
    match encoding {
        Encoding::Binary => Ok(Payload::Binary(bytes)),
        Encoding::Text => Ok(Payload::Text(String::from_utf8_lossy(&bytes).into_owned())),
        Encoding::Json => match serde_json::from_slice(&bytes) {
            Ok(value) => Ok(Payload::Json(value)),
            Err(e) => Err(MessageError::Decode {
                reason: format!("unable to decode JSON: {e}"),
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_heartbeat() {
        assert_eq!(
            classify(&[0x42, 0x42, 0x01, 0x07]),
            Inbound::Heartbeat { seq: 0x07 }
        );
    }

    #[test]
    fn heartbeat_ack_echoes_sequence() {
        assert_eq!(heartbeat_ack(0x07), [0x42, 0x42, 0x02, 0x07]);
        assert_eq!(heartbeat_ack(0xff), [0x42, 0x42, 0x02, 0xff]);
    }

    #[test]
    fn short_or_unmagical_frames_are_payloads() {
        assert_eq!(classify(&[0x42, 0x42, 0x01]), Inbound::Payload);
        assert_eq!(classify(&[0x42, 0x42, 0x02, 0x07]), Inbound::Payload);
        assert_eq!(classify(b"hello"), Inbound::Payload);
        assert_eq!(classify(&[]), Inbound::Payload);
    }

    #[test]
    fn decodes_binary_unchanged() {
        let bytes = vec![0x00, 0xff, 0x42];
        assert_eq!(
            decode(bytes.clone(), Encoding::Binary).unwrap(),
            Payload::Binary(bytes)
        );
    }

    #[test]
    fn decodes_text_lossily() {
        assert_eq!(
            decode(b"hello".to_vec(), Encoding::Text).unwrap(),
            Payload::Text("hello".into())
        );
        // malformed UTF-8 must not fail the session
        assert_eq!(
            decode(vec![0x68, 0x69, 0xff], Encoding::Text).unwrap(),
            Payload::Text("hi\u{fffd}".into())
        );
    }

    #[test]
    fn decodes_json() {
        let payload = decode(br#"{"foo": 42}"#.to_vec(), Encoding::Json).unwrap();
        assert_eq!(payload, Payload::Json(serde_json::json!({"foo": 42})));
    }

    #[test]
    fn bad_json_is_a_message_error() {
        let result = decode(b"{bad json".to_vec(), Encoding::Json);
        assert!(matches!(result, Err(MessageError::Decode { .. })));
    }
}
