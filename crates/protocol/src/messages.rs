//! Wire message definitions for termshare.
//!
//! Every message travels inside an [`Envelope`] naming the payload type, with
//! the payload carried as the JSON encoding of the type-specific struct. A
//! frame therefore decodes in two stages: envelope first, payload second.
//! Byte fields serialize as base64 strings so frames stay plain-text JSON.

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};

/// Envelope tag for terminal data messages.
pub const MSG_TYPE_WRITE: &str = "Write";
/// Envelope tag for window dimension messages.
pub const MSG_TYPE_WINSIZE: &str = "WinSize";

/// Outer wrapper identifying a message's type before its payload is decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Type tag, one of the `MSG_TYPE_*` constants.
    #[serde(rename = "Type")]
    pub msg_type: String,
    /// JSON encoding of the type-specific payload.
    #[serde(rename = "Data", with = "base64_bytes")]
    pub data: Vec<u8>,
}

/// Terminal bytes, in either direction: process output toward viewers, or a
/// viewer's keystrokes toward the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermWrite {
    /// Raw terminal bytes.
    #[serde(rename = "Data", with = "base64_bytes")]
    pub data: Vec<u8>,
    /// Number of meaningful bytes in `data`.
    #[serde(rename = "Size")]
    pub size: usize,
}

/// Terminal dimensions. Sent to viewers whenever the authoritative size
/// changes; an inbound `WinSize` from a viewer is a redraw request, not a
/// resize (the shared terminal's size is server-driven).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WinSize {
    /// Terminal width in columns.
    #[serde(rename = "Cols")]
    pub cols: u16,
    /// Terminal height in rows.
    #[serde(rename = "Rows")]
    pub rows: u16,
}

/// Top-level message enum containing all message types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Terminal bytes (output or keystrokes).
    Write(TermWrite),
    /// Window dimension change.
    WinSize(WinSize),
}

impl Message {
    /// Wraps raw terminal bytes in a `Write` message.
    pub fn write(data: &[u8]) -> Self {
        Message::Write(TermWrite {
            data: data.to_vec(),
            size: data.len(),
        })
    }

    /// Builds a `WinSize` message.
    pub fn win_size(cols: u16, rows: u16) -> Self {
        Message::WinSize(WinSize { cols, rows })
    }

    /// The envelope tag this message travels under.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Message::Write(_) => MSG_TYPE_WRITE,
            Message::WinSize(_) => MSG_TYPE_WINSIZE,
        }
    }
}

/// Encodes a message into envelope bytes ready for one transport frame.
///
/// Never fails for well-formed messages; the `Result` only carries serializer
/// failures, which cannot occur for this closed set of types.
pub fn encode(msg: &Message) -> Result<Vec<u8>> {
    let data = match msg {
        Message::Write(write) => serde_json::to_vec(write)?,
        Message::WinSize(size) => serde_json::to_vec(size)?,
    };
    let envelope = Envelope {
        msg_type: msg.type_tag().to_string(),
        data,
    };
    Ok(serde_json::to_vec(&envelope)?)
}

/// Decodes one envelope frame back into a message.
///
/// Fails when the envelope is unparseable, when the type tag is not
/// recognized, or when the payload does not match the tagged type. Callers
/// treat all three as droppable, never as fatal.
pub fn decode(raw: &[u8]) -> Result<Message> {
    let envelope: Envelope = serde_json::from_slice(raw)?;
    match envelope.msg_type.as_str() {
        MSG_TYPE_WRITE => {
            let payload: TermWrite =
                serde_json::from_slice(&envelope.data).map_err(|err| {
                    ProtocolError::InvalidPayload {
                        msg_type: MSG_TYPE_WRITE.to_string(),
                        reason: err.to_string(),
                    }
                })?;
            Ok(Message::Write(payload))
        }
        MSG_TYPE_WINSIZE => {
            let payload: WinSize =
                serde_json::from_slice(&envelope.data).map_err(|err| {
                    ProtocolError::InvalidPayload {
                        msg_type: MSG_TYPE_WINSIZE.to_string(),
                        reason: err.to_string(),
                    }
                })?;
            Ok(Message::WinSize(payload))
        }
        other => Err(ProtocolError::UnknownMessageType {
            msg_type: other.to_string(),
        }),
    }
}

/// Serde adapter carrying byte fields as base64 strings.
mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(encoded.as_bytes()).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

    /// Helper to test roundtrip encoding
    fn roundtrip(msg: Message) {
        let bytes = encode(&msg).expect("encode failed");
        let decoded = decode(&bytes).expect("decode failed");
        assert_eq!(msg, decoded);
    }

    #[test]
    fn test_write_roundtrip() {
        roundtrip(Message::write(b"ls -la\n"));
    }

    #[test]
    fn test_write_empty_roundtrip() {
        roundtrip(Message::write(b""));
    }

    #[test]
    fn test_write_binary_roundtrip() {
        let data: Vec<u8> = (0u8..=255).collect();
        roundtrip(Message::Write(TermWrite {
            size: data.len(),
            data,
        }));
    }

    #[test]
    fn test_write_large_roundtrip() {
        roundtrip(Message::write(&vec![0xAB; 65536]));
    }

    #[test]
    fn test_winsize_roundtrip() {
        roundtrip(Message::win_size(140, 32));
    }

    #[test]
    fn test_winsize_extremes_roundtrip() {
        roundtrip(Message::win_size(u16::MAX, 1));
    }

    #[test]
    fn test_write_helper_sets_size() {
        match Message::write(b"hello") {
            Message::Write(write) => {
                assert_eq!(write.data, b"hello");
                assert_eq!(write.size, 5);
            }
            _ => panic!("expected Write"),
        }
    }

    #[test]
    fn test_type_tags() {
        assert_eq!(Message::write(b"x").type_tag(), "Write");
        assert_eq!(Message::win_size(80, 24).type_tag(), "WinSize");
    }

    #[test]
    fn test_winsize_wire_shape() {
        let bytes = encode(&Message::win_size(100, 40)).unwrap();
        let envelope: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(envelope["Type"], "WinSize");

        let inner = BASE64
            .decode(envelope["Data"].as_str().unwrap())
            .unwrap();
        let payload: serde_json::Value = serde_json::from_slice(&inner).unwrap();
        assert_eq!(payload["Cols"], 100);
        assert_eq!(payload["Rows"], 40);
    }

    #[test]
    fn test_write_wire_shape() {
        let bytes = encode(&Message::write(b"hi")).unwrap();
        let envelope: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(envelope["Type"], "Write");

        let inner = BASE64
            .decode(envelope["Data"].as_str().unwrap())
            .unwrap();
        let payload: serde_json::Value = serde_json::from_slice(&inner).unwrap();
        assert_eq!(payload["Data"], BASE64.encode(b"hi"));
        assert_eq!(payload["Size"], 2);
    }

    #[test]
    fn test_decode_unknown_type() {
        let raw = format!(
            r#"{{"Type":"Ping","Data":"{}"}}"#,
            BASE64.encode(b"{}")
        );
        let err = decode(raw.as_bytes()).unwrap_err();
        match err {
            ProtocolError::UnknownMessageType { msg_type } => {
                assert_eq!(msg_type, "Ping");
            }
            other => panic!("expected UnknownMessageType, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_garbage() {
        let err = decode(b"\x00\x01not json").unwrap_err();
        assert!(matches!(err, ProtocolError::Deserialization(_)));
    }

    #[test]
    fn test_decode_truncated_envelope() {
        let err = decode(br#"{"Type":"Write","Da"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Deserialization(_)));
    }

    #[test]
    fn test_decode_payload_shape_mismatch() {
        // A WinSize payload under a Write tag must not decode.
        let raw = format!(
            r#"{{"Type":"Write","Data":"{}"}}"#,
            BASE64.encode(br#"{"Cols":80,"Rows":24}"#)
        );
        let err = decode(raw.as_bytes()).unwrap_err();
        match err {
            ProtocolError::InvalidPayload { msg_type, .. } => {
                assert_eq!(msg_type, "Write");
            }
            other => panic!("expected InvalidPayload, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_invalid_base64_data() {
        let err = decode(br#"{"Type":"Write","Data":"@@not base64@@"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Deserialization(_)));
    }
}
