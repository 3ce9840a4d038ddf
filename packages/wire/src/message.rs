//! The message sum type and its byte-tag registry.

use std::fmt;

use serde::{Deserialize, Serialize};

use svcompose::PeerId;

use crate::collision::{
    CollisionMessage, CollisionResponseMessage, ConnectServicesMessage, DisconnectServicesMessage,
    ForwardMessage, InhibeCollisionsMessage, RemovedServicesMessage,
};
use crate::composition::{
    BCompositionMessage, CompositionModificationMessage, CompositionNotificationMessage,
    FCompositionMessage, InvalidCompositionsMessage,
};

/// Type byte of every message kind.
///
/// | Byte | Message |
/// |------|---------|
/// | `0x10` | Collision |
/// | `0x11` | CollisionResponse |
/// | `0x12` | ConnectServices |
/// | `0x13` | DisconnectServices |
/// | `0x14` | InhibeCollisions |
/// | `0x15` | Forward |
/// | `0x16` | RemovedServices |
/// | `0x20` | FComposition |
/// | `0x21` | BComposition |
/// | `0x22` | InvalidCompositions |
/// | `0x23` | CompositionNotification |
/// | `0x24` | CompositionModification |
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum MessageType {
    Collision = 0x10,
    CollisionResponse = 0x11,
    ConnectServices = 0x12,
    DisconnectServices = 0x13,
    InhibeCollisions = 0x14,
    Forward = 0x15,
    RemovedServices = 0x16,
    FComposition = 0x20,
    BComposition = 0x21,
    InvalidCompositions = 0x22,
    CompositionNotification = 0x23,
    CompositionModification = 0x24,
}

impl MessageType {
    pub const ALL: [MessageType; 12] = [
        MessageType::Collision,
        MessageType::CollisionResponse,
        MessageType::ConnectServices,
        MessageType::DisconnectServices,
        MessageType::InhibeCollisions,
        MessageType::Forward,
        MessageType::RemovedServices,
        MessageType::FComposition,
        MessageType::BComposition,
        MessageType::InvalidCompositions,
        MessageType::CompositionNotification,
        MessageType::CompositionModification,
    ];

    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.tag() == tag)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Collision => "collision",
            MessageType::CollisionResponse => "collision-response",
            MessageType::ConnectServices => "connect-services",
            MessageType::DisconnectServices => "disconnect-services",
            MessageType::InhibeCollisions => "inhibe-collisions",
            MessageType::Forward => "forward",
            MessageType::RemovedServices => "removed-services",
            MessageType::FComposition => "fcomposition",
            MessageType::BComposition => "bcomposition",
            MessageType::InvalidCompositions => "invalid-compositions",
            MessageType::CompositionNotification => "composition-notification",
            MessageType::CompositionModification => "composition-modification",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Any message exchanged between peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "snake_case")]
pub enum Message {
    Collision(CollisionMessage),
    CollisionResponse(CollisionResponseMessage),
    ConnectServices(ConnectServicesMessage),
    DisconnectServices(DisconnectServicesMessage),
    Inhibe(InhibeCollisionsMessage),
    Forward(ForwardMessage),
    RemovedServices(RemovedServicesMessage),
    FComposition(FCompositionMessage),
    BComposition(BCompositionMessage),
    InvalidCompositions(InvalidCompositionsMessage),
    CompositionNotification(CompositionNotificationMessage),
    CompositionModification(CompositionModificationMessage),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Collision(_) => MessageType::Collision,
            Message::CollisionResponse(_) => MessageType::CollisionResponse,
            Message::ConnectServices(_) => MessageType::ConnectServices,
            Message::DisconnectServices(_) => MessageType::DisconnectServices,
            Message::Inhibe(_) => MessageType::InhibeCollisions,
            Message::Forward(_) => MessageType::Forward,
            Message::RemovedServices(_) => MessageType::RemovedServices,
            Message::FComposition(_) => MessageType::FComposition,
            Message::BComposition(_) => MessageType::BComposition,
            Message::InvalidCompositions(_) => MessageType::InvalidCompositions,
            Message::CompositionNotification(_) => MessageType::CompositionNotification,
            Message::CompositionModification(_) => MessageType::CompositionModification,
        }
    }

    /// The peer that sent the message.
    pub fn source(&self) -> &PeerId {
        match self {
            Message::Collision(m) => &m.source,
            Message::CollisionResponse(m) => &m.source,
            Message::ConnectServices(m) => &m.source,
            Message::DisconnectServices(m) => &m.source,
            Message::Inhibe(m) => &m.source,
            Message::Forward(m) => &m.source,
            Message::RemovedServices(m) => &m.source,
            Message::FComposition(m) => &m.source,
            Message::BComposition(m) => &m.source,
            Message::InvalidCompositions(m) => &m.source,
            Message::CompositionNotification(m) => &m.source,
            Message::CompositionModification(m) => &m.source,
        }
    }

    /// True for the messages of the composition search protocols.
    pub fn is_composition(&self) -> bool {
        self.message_type().tag() >= 0x20
    }
}

/// A concrete message struct with a fixed type byte.
pub trait WireMessage: Serialize + for<'de> Deserialize<'de> + Into<Message> {
    const TYPE: MessageType;
}

macro_rules! wire_message {
    ($ty:ident, $variant:ident, $tag:ident) => {
        impl WireMessage for $ty {
            const TYPE: MessageType = MessageType::$tag;
        }

        impl From<$ty> for Message {
            fn from(m: $ty) -> Self {
                Message::$variant(m)
            }
        }
    };
}

wire_message!(CollisionMessage, Collision, Collision);
wire_message!(CollisionResponseMessage, CollisionResponse, CollisionResponse);
wire_message!(ConnectServicesMessage, ConnectServices, ConnectServices);
wire_message!(DisconnectServicesMessage, DisconnectServices, DisconnectServices);
wire_message!(InhibeCollisionsMessage, Inhibe, InhibeCollisions);
wire_message!(ForwardMessage, Forward, Forward);
wire_message!(RemovedServicesMessage, RemovedServices, RemovedServices);
wire_message!(FCompositionMessage, FComposition, FComposition);
wire_message!(BCompositionMessage, BComposition, BComposition);
wire_message!(InvalidCompositionsMessage, InvalidCompositions, InvalidCompositions);
wire_message!(
    CompositionNotificationMessage,
    CompositionNotification,
    CompositionNotification
);
wire_message!(
    CompositionModificationMessage,
    CompositionModification,
    CompositionModification
);

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn tags_are_unique_and_resolvable() {
        let tags: BTreeSet<u8> = MessageType::ALL.iter().map(|t| t.tag()).collect();
        assert_eq!(tags.len(), MessageType::ALL.len());
        for t in MessageType::ALL {
            assert_eq!(MessageType::from_tag(t.tag()), Some(t));
        }
        assert_eq!(MessageType::from_tag(0x00), None);
        assert_eq!(MessageType::from_tag(0x25), None);
    }

    #[test]
    fn variants_report_type_and_source() {
        let m: Message =
            RemovedServicesMessage::new(PeerId::from("p3"), BTreeSet::new()).into();
        assert_eq!(m.message_type(), MessageType::RemovedServices);
        assert_eq!(m.source(), &PeerId::from("p3"));
        assert!(!m.is_composition());
    }
}
