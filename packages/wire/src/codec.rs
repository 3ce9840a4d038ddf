//! Binary envelope: one type byte followed by the JSON body of the message
//! struct.
//!
//! ```text
//! +------+---------------------------+
//! | 0x20 | {"source":"p1","search":…} |
//! +------+---------------------------+
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::WireError;
use crate::message::{Message, MessageType, WireMessage};

fn frame<T: Serialize>(kind: MessageType, body: &T) -> Result<Vec<u8>, WireError> {
    let mut out = vec![kind.tag()];
    serde_json::to_writer(&mut out, body).map_err(|source| WireError::Json { kind, source })?;
    Ok(out)
}

fn body<T: DeserializeOwned>(kind: MessageType, bytes: &[u8]) -> Result<T, WireError> {
    serde_json::from_slice(bytes).map_err(|source| WireError::Json { kind, source })
}

/// Read the type byte of a frame without decoding the body.
pub fn peek_type(bytes: &[u8]) -> Result<MessageType, WireError> {
    let tag = *bytes.first().ok_or(WireError::Empty)?;
    MessageType::from_tag(tag).ok_or(WireError::UnknownType(tag))
}

pub fn encode(message: &Message) -> Result<Vec<u8>, WireError> {
    let kind = message.message_type();
    match message {
        Message::Collision(m) => frame(kind, m),
        Message::CollisionResponse(m) => frame(kind, m),
        Message::ConnectServices(m) => frame(kind, m),
        Message::DisconnectServices(m) => frame(kind, m),
        Message::Inhibe(m) => frame(kind, m),
        Message::Forward(m) => frame(kind, m),
        Message::RemovedServices(m) => frame(kind, m),
        Message::FComposition(m) => frame(kind, m),
        Message::BComposition(m) => frame(kind, m),
        Message::InvalidCompositions(m) => frame(kind, m),
        Message::CompositionNotification(m) => frame(kind, m),
        Message::CompositionModification(m) => frame(kind, m),
    }
}

pub fn decode(bytes: &[u8]) -> Result<Message, WireError> {
    let kind = peek_type(bytes)?;
    let rest = &bytes[1..];
    let message = match kind {
        MessageType::Collision => Message::Collision(body(kind, rest)?),
        MessageType::CollisionResponse => Message::CollisionResponse(body(kind, rest)?),
        MessageType::ConnectServices => Message::ConnectServices(body(kind, rest)?),
        MessageType::DisconnectServices => Message::DisconnectServices(body(kind, rest)?),
        MessageType::InhibeCollisions => Message::Inhibe(body(kind, rest)?),
        MessageType::Forward => Message::Forward(body(kind, rest)?),
        MessageType::RemovedServices => Message::RemovedServices(body(kind, rest)?),
        MessageType::FComposition => Message::FComposition(body(kind, rest)?),
        MessageType::BComposition => Message::BComposition(body(kind, rest)?),
        MessageType::InvalidCompositions => Message::InvalidCompositions(body(kind, rest)?),
        MessageType::CompositionNotification => {
            Message::CompositionNotification(body(kind, rest)?)
        }
        MessageType::CompositionModification => {
            Message::CompositionModification(body(kind, rest)?)
        }
    };
    Ok(message)
}

/// Encode a concrete message struct.
pub fn encode_as<T: WireMessage>(message: &T) -> Result<Vec<u8>, WireError> {
    frame(T::TYPE, message)
}

/// Decode a frame that must carry a `T`.
pub fn decode_as<T: WireMessage>(bytes: &[u8]) -> Result<T, WireError> {
    let found = peek_type(bytes)?;
    if found != T::TYPE {
        return Err(WireError::Mismatch {
            expected: T::TYPE,
            found,
        });
    }
    body(found, &bytes[1..])
}
