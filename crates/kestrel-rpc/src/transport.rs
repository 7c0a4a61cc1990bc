//! Length-prefixed transport codec for JSON-RPC messages.
//!
//! Frame format:
//! ```text
//! +----------------+------------------+
//! |  4 bytes       |  N bytes         |
//! |  (length BE)   |  (JSON payload)  |
//! +----------------+------------------+
//! ```
//!
//! A frame whose payload is not UTF-8 JSON matching a JSON-RPC envelope is
//! decoded as [`Frame::Malformed`] so the stream stays usable. An oversized
//! length prefix cannot be resynchronised and is returned as an error.

use bytes::{Buf, BufMut, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

use crate::protocol::Message;

/// Maximum message size (16 MB)
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Length prefix size in bytes
const LENGTH_PREFIX_SIZE: usize = 4;

/// One decoded frame
#[derive(Debug, Clone)]
pub enum Frame {
    Message(Message),
    /// Payload was framed correctly but could not be parsed
    Malformed { reason: String, len: usize },
}

/// Codec for length-prefixed JSON-RPC messages
#[derive(Debug, Default)]
pub struct JsonRpcCodec {
    current_length: Option<usize>,
}

impl JsonRpcCodec {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for JsonRpcCodec {
    type Item = Frame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.current_length.is_none() {
            if src.len() < LENGTH_PREFIX_SIZE {
                return Ok(None);
            }

            let len = src.get_u32() as usize;

            if len > MAX_MESSAGE_SIZE {
                return Err(CodecError::MessageTooLarge(len));
            }

            self.current_length = Some(len);
        }

        let Some(length) = self.current_length else {
            return Ok(None);
        };

        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }

        let payload = src.split_to(length);
        self.current_length = None;

        Ok(Some(parse_payload(&payload)))
    }
}

fn parse_payload(payload: &[u8]) -> Frame {
    let json_str = match std::str::from_utf8(payload) {
        Ok(s) => s,
        Err(e) => {
            return Frame::Malformed {
                reason: CodecError::Utf8(e).to_string(),
                len: payload.len(),
            };
        }
    };

    match Message::parse(json_str) {
        Ok(message) => Frame::Message(message),
        Err(e) => Frame::Malformed {
            reason: CodecError::Json(e).to_string(),
            len: payload.len(),
        },
    }
}

impl Encoder<Message> for JsonRpcCodec {
    type Error = CodecError;

    // Message size is checked against MAX_MESSAGE_SIZE (fits in u32)
    #[allow(clippy::cast_possible_truncation)]
    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json = serde_json::to_string(&item)?;
        let json_bytes = json.as_bytes();

        if json_bytes.len() > MAX_MESSAGE_SIZE {
            return Err(CodecError::MessageTooLarge(json_bytes.len()));
        }

        dst.reserve(LENGTH_PREFIX_SIZE + json_bytes.len());
        dst.put_u32(json_bytes.len() as u32);
        dst.put_slice(json_bytes);

        Ok(())
    }
}

/// Errors that can occur during codec operations
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("Message too large: {0} bytes (max: {MAX_MESSAGE_SIZE})")]
    MessageTooLarge(usize),
}

#[cfg(test)]
mod tests {
    #![allow(clippy::cast_possible_truncation)] // Test constants bounded to u32

    use super::*;
    use crate::protocol::{Request, Response, RpcError};

    fn expect_message(frame: Frame) -> Message {
        match frame {
            Frame::Message(msg) => msg,
            Frame::Malformed { reason, .. } => panic!("unexpected malformed frame: {reason}"),
        }
    }

    #[test]
    fn test_encode_decode_request() {
        let mut codec = JsonRpcCodec::new();
        let mut buf = BytesMut::new();

        let request = Request::new("query", Some(serde_json::json!({"pluginId": "shop"})), 1.into());
        codec.encode(Message::Request(request), &mut buf).unwrap();

        let decoded = expect_message(codec.decode(&mut buf).unwrap().unwrap());
        let Message::Request(dec) = decoded else {
            panic!("Expected Request");
        };
        assert_eq!(dec.method, "query");
        assert_eq!(dec.id, Some(1.into()));
    }

    #[test]
    fn test_encode_decode_error_response() {
        let mut codec = JsonRpcCodec::new();
        let mut buf = BytesMut::new();

        let response = Response::error(1.into(), RpcError::method_not_found());
        codec.encode(Message::Response(response), &mut buf).unwrap();

        let Message::Response(dec) = expect_message(codec.decode(&mut buf).unwrap().unwrap())
        else {
            panic!("Expected Response");
        };
        assert_eq!(dec.error.unwrap().code, -32601);
    }

    #[test]
    fn test_partial_decode() {
        let mut codec = JsonRpcCodec::new();
        let mut buf = BytesMut::new();

        codec
            .encode(Message::Request(Request::new("ping", None, 1.into())), &mut buf)
            .unwrap();
        let full_buf = buf.clone();

        let mut partial = BytesMut::new();
        partial.extend_from_slice(&full_buf[..2]);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.extend_from_slice(&full_buf[2..6]);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.extend_from_slice(&full_buf[6..]);
        assert!(codec.decode(&mut partial).unwrap().is_some());
    }

    #[test]
    fn test_decode_empty_buffer() {
        let mut codec = JsonRpcCodec::new();
        let mut buf = BytesMut::new();
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_multiple_messages_in_buffer() {
        let mut codec = JsonRpcCodec::new();
        let mut buf = BytesMut::new();

        codec
            .encode(Message::Request(Request::new("first", None, 1.into())), &mut buf)
            .unwrap();
        codec
            .encode(Message::Request(Request::new("second", None, 2.into())), &mut buf)
            .unwrap();

        let first = expect_message(codec.decode(&mut buf).unwrap().unwrap());
        assert_eq!(first.method(), Some("first"));
        let second = expect_message(codec.decode(&mut buf).unwrap().unwrap());
        assert_eq!(second.method(), Some("second"));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_message_too_large() {
        let mut codec = JsonRpcCodec::new();
        let mut buf = BytesMut::new();

        buf.put_u32((MAX_MESSAGE_SIZE + 1) as u32);

        let result = codec.decode(&mut buf);
        assert!(matches!(result, Err(CodecError::MessageTooLarge(_))));
    }

    #[test]
    fn test_invalid_json_is_malformed_frame() {
        let mut codec = JsonRpcCodec::new();
        let mut buf = BytesMut::new();

        let invalid_json = b"not valid json";
        buf.put_u32(invalid_json.len() as u32);
        buf.extend_from_slice(invalid_json);

        let frame = codec.decode(&mut buf).unwrap().unwrap();
        match frame {
            Frame::Malformed { reason, len } => {
                assert!(reason.contains("JSON error"));
                assert_eq!(len, invalid_json.len());
            }
            Frame::Message(_) => panic!("Expected malformed frame"),
        }
    }

    #[test]
    fn test_invalid_utf8_is_malformed_frame() {
        let mut codec = JsonRpcCodec::new();
        let mut buf = BytesMut::new();

        let invalid_utf8 = [0xff, 0xfe, 0x00, 0x01];
        buf.put_u32(invalid_utf8.len() as u32);
        buf.extend_from_slice(&invalid_utf8);

        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert!(matches!(frame, Frame::Malformed { ref reason, .. } if reason.contains("UTF-8")));
    }

    #[test]
    fn test_stream_continues_after_malformed_frame() {
        let mut codec = JsonRpcCodec::new();
        let mut buf = BytesMut::new();

        let garbage = br#"{"hello":"world"}"#;
        buf.put_u32(garbage.len() as u32);
        buf.extend_from_slice(garbage);
        codec
            .encode(Message::Request(Request::new("ping", None, 9.into())), &mut buf)
            .unwrap();

        assert!(matches!(
            codec.decode(&mut buf).unwrap(),
            Some(Frame::Malformed { .. })
        ));
        let next = expect_message(codec.decode(&mut buf).unwrap().unwrap());
        assert_eq!(next.method(), Some("ping"));
    }

    #[test]
    fn test_codec_error_display() {
        let err = CodecError::MessageTooLarge(20_000_000);
        let msg = err.to_string();
        assert!(msg.contains("20000000"));
        assert!(msg.contains("too large"));

        let io_err = io::Error::new(io::ErrorKind::ConnectionReset, "connection reset");
        assert!(CodecError::Io(io_err).to_string().contains("connection reset"));
    }

    #[test]
    fn test_length_prefix_format() {
        let mut codec = JsonRpcCodec::new();
        let mut buf = BytesMut::new();

        codec
            .encode(Message::Request(Request::new("x", None, 1.into())), &mut buf)
            .unwrap();

        let length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        assert_eq!(length, buf.len() - 4);
    }
}
