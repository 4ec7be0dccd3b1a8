//! Queue wire framing.
//!
//! The RPC transport carries each message as
//! `u32 big-endian key length ‖ key bytes ‖ JSON payload`; the key is the
//! execution token. The stream transport carries the same two parts as a
//! field map `{key, value}`. Both must stay byte-compatible with the queue
//! consumers.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::id::ExecutionId;
use crate::message::InvocationMessage;

/// Size of the big-endian key length prefix.
pub const KEY_LENGTH_PREFIX: usize = 4;

/// Stream field holding the execution token.
pub const STREAM_KEY_FIELD: &str = "key";

/// Stream field holding the serialized message.
pub const STREAM_VALUE_FIELD: &str = "value";

/// Errors from encoding or decoding wire payloads.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("message serialization failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("framed payload truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },
    #[error("frame key of {len} bytes exceeds the u32 length prefix")]
    KeyTooLong { len: usize },
    #[error("stream entry is missing field `{field}`")]
    MissingField { field: &'static str },
}

/// A key/payload pair as carried by the RPC transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramedMessage {
    pub key: Bytes,
    pub payload: Bytes,
}

impl FramedMessage {
    /// Frames an invocation message keyed by its execution token.
    ///
    /// # Errors
    ///
    /// Returns `WireError::Json` if the message cannot be serialized.
    pub fn from_message(msg: &InvocationMessage) -> Result<Self, WireError> {
        Ok(Self {
            key: Bytes::copy_from_slice(msg.execution_id().as_str().as_bytes()),
            payload: Bytes::from(msg.encode()?),
        })
    }

    /// Builds a frame from an explicit key and an already-encoded payload.
    #[must_use]
    pub fn new(key: &ExecutionId, payload: Bytes) -> Self {
        Self {
            key: Bytes::copy_from_slice(key.as_str().as_bytes()),
            payload,
        }
    }

    /// Writes the length-prefixed frame.
    ///
    /// # Errors
    ///
    /// Returns `WireError::KeyTooLong` if the key length does not fit a `u32`.
    pub fn encode(&self) -> Result<Bytes, WireError> {
        let key_len =
            u32::try_from(self.key.len()).map_err(|_| WireError::KeyTooLong { len: self.key.len() })?;
        let mut buf = BytesMut::with_capacity(KEY_LENGTH_PREFIX + self.key.len() + self.payload.len());
        buf.put_u32(key_len);
        buf.put_slice(&self.key);
        buf.put_slice(&self.payload);
        Ok(buf.freeze())
    }

    /// Splits a length-prefixed frame without copying.
    ///
    /// # Errors
    ///
    /// Returns `WireError::Truncated` if the frame is shorter than its prefix
    /// claims.
    pub fn decode(mut frame: Bytes) -> Result<Self, WireError> {
        if frame.len() < KEY_LENGTH_PREFIX {
            return Err(WireError::Truncated {
                needed: KEY_LENGTH_PREFIX,
                available: frame.len(),
            });
        }
        let key_len = frame.get_u32() as usize;
        if frame.len() < key_len {
            return Err(WireError::Truncated {
                needed: KEY_LENGTH_PREFIX + key_len,
                available: KEY_LENGTH_PREFIX + frame.len(),
            });
        }
        let key = frame.split_to(key_len);
        Ok(Self {
            key,
            payload: frame,
        })
    }

    /// Parses the payload as an invocation message.
    ///
    /// # Errors
    ///
    /// Returns `WireError::Json` if the payload is not a valid message.
    pub fn message(&self) -> Result<InvocationMessage, WireError> {
        InvocationMessage::decode(&self.payload)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn frame_layout_is_length_key_payload() {
        let frame = FramedMessage::new(&ExecutionId::from("k1"), Bytes::from_static(b"{}"));
        let bytes = frame.encode().unwrap();
        assert_eq!(&bytes[..], &[0, 0, 0, 2, b'k', b'1', b'{', b'}']);
    }

    #[test]
    fn generated_token_frames_with_length_32() {
        let msg = InvocationMessage::new(ExecutionId::generate(), false, "{}");
        let bytes = FramedMessage::from_message(&msg).unwrap().encode().unwrap();
        assert_eq!(&bytes[..4], &32u32.to_be_bytes());
    }

    #[test]
    fn decode_rejects_short_prefix() {
        let err = FramedMessage::decode(Bytes::from_static(&[0, 0])).unwrap_err();
        assert!(matches!(err, WireError::Truncated { needed: 4, available: 2 }));
    }

    #[test]
    fn decode_rejects_key_longer_than_frame() {
        let err = FramedMessage::decode(Bytes::from_static(&[0, 0, 0, 9, b'a'])).unwrap_err();
        assert!(matches!(err, WireError::Truncated { needed: 13, available: 5 }));
    }

    #[test]
    fn decode_accepts_empty_payload() {
        let frame = FramedMessage::decode(Bytes::from_static(&[0, 0, 0, 1, b'a'])).unwrap();
        assert_eq!(&frame.key[..], b"a");
        assert!(frame.payload.is_empty());
    }

    proptest! {
        #[test]
        fn message_survives_framing(
            id in "[0-9a-f]{32}",
            async_execution in any::<bool>(),
            user_data in ".*",
            origin in "[a-z0-9.:]{0,24}",
            action in proptest::option::of("[a-z_]{1,24}"),
        ) {
            let mut msg = InvocationMessage::new(ExecutionId::from(id), async_execution, user_data)
                .with_client_origin(origin);
            if let Some(action) = action {
                msg = msg.with_state_action(action);
            }

            let bytes = FramedMessage::from_message(&msg).unwrap().encode().unwrap();
            let frame = FramedMessage::decode(bytes).unwrap();
            prop_assert_eq!(&frame.key[..], msg.execution_id().as_str().as_bytes());
            prop_assert_eq!(frame.message().unwrap(), msg);
        }
    }
}
