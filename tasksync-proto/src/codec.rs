//! Serialization for hub frames.
//!
//! Frames travel as individual WebSocket binary messages, so no length
//! prefix is needed: one message is exactly one postcard-encoded frame.

use crate::hub::HubFrame;

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// The frame exceeded the configured size limit.
    #[error("frame too large: {size} bytes (max {max})")]
    TooLarge {
        /// Actual size in bytes.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },
}

/// Encodes a [`HubFrame`] into a byte vector using postcard.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the frame cannot be serialized.
pub fn encode(frame: &HubFrame) -> Result<Vec<u8>, CodecError> {
    postcard::to_allocvec(frame).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes a [`HubFrame`] from a byte slice using postcard.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the bytes cannot be deserialized.
pub fn decode(bytes: &[u8]) -> Result<HubFrame, CodecError> {
    postcard::from_bytes(bytes).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes a frame after checking it against a size limit.
///
/// # Errors
///
/// Returns `CodecError::TooLarge` if `bytes` exceeds `max`, otherwise the
/// same errors as [`decode`].
pub fn decode_bounded(bytes: &[u8], max: usize) -> Result<HubFrame, CodecError> {
    if bytes.len() > max {
        return Err(CodecError::TooLarge {
            size: bytes.len(),
            max,
        });
    }
    decode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comment::{Author, CommentDto, ServerId};
    use crate::hub::{HubEvent, HubMethod};
    use crate::task::TaskId;

    #[test]
    fn invoke_survives_encoding() {
        let frame = HubFrame::Invoke {
            invocation_id: 42,
            method: HubMethod::JoinTaskGroup(TaskId::new(8)),
        };
        let bytes = encode(&frame).unwrap();
        assert_eq!(decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn push_with_partial_comment_keeps_missing_replies() {
        let frame = HubFrame::Push {
            task_id: TaskId::new(1),
            event: HubEvent::ReceiveCommentUpdate(CommentDto {
                id: ServerId::new(4),
                task_id: TaskId::new(1),
                content: "edited".to_string(),
                author: Author::new("u1", "Ann"),
                created_at_ms: 1,
                updated_at_ms: Some(2),
                replies: None,
            }),
        };
        let decoded = decode(&encode(&frame).unwrap()).unwrap();
        let HubFrame::Push {
            event: HubEvent::ReceiveCommentUpdate(comment),
            ..
        } = decoded
        else {
            panic!("unexpected frame: {decoded:?}");
        };
        assert!(comment.replies.is_none());
    }

    #[test]
    fn empty_input_is_an_error() {
        assert!(decode(&[]).is_err());
    }

    #[test]
    fn bounded_decode_rejects_oversized() {
        let bytes = encode(&HubFrame::Error {
            reason: "x".repeat(64),
        })
        .unwrap();
        let err = decode_bounded(&bytes, 8).unwrap_err();
        assert!(matches!(err, CodecError::TooLarge { max: 8, .. }));
        assert!(decode_bounded(&bytes, bytes.len()).is_ok());
    }
}
