//! Decoding failures.

use thiserror::Error;

use crate::message::MessageType;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("empty frame")]
    Empty,

    #[error("unknown message type byte 0x{0:02x}")]
    UnknownType(u8),

    #[error("expected a {expected} frame, got {found}")]
    Mismatch {
        expected: MessageType,
        found: MessageType,
    },

    #[error("malformed {kind} body: {source}")]
    Json {
        kind: MessageType,
        #[source]
        source: serde_json::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_frame_type() {
        assert_eq!(
            WireError::UnknownType(0x7f).to_string(),
            "unknown message type byte 0x7f"
        );
        let e = WireError::Mismatch {
            expected: MessageType::Collision,
            found: MessageType::FComposition,
        };
        assert_eq!(e.to_string(), "expected a collision frame, got fcomposition");
    }
}
