//! Wire messages of the svcompose middleware.
//!
//! Every message carries the peer that sent it and is framed as a single
//! type byte followed by its JSON body (see [`codec`]).
//!
//! # Messages covered
//!
//! | Byte | Type | Protocol |
//! |------|------|----------|
//! | `0x10` | [`CollisionMessage`] | graph construction |
//! | `0x11` | [`CollisionResponseMessage`] | graph construction |
//! | `0x12` | [`ConnectServicesMessage`] | graph construction |
//! | `0x13` | [`DisconnectServicesMessage`] | graph construction |
//! | `0x14` | [`InhibeCollisionsMessage`] | graph construction |
//! | `0x15` | [`ForwardMessage`] | relay |
//! | `0x16` | [`RemovedServicesMessage`] | graph construction |
//! | `0x20` | [`FCompositionMessage`] | forward search |
//! | `0x21` | [`BCompositionMessage`] | backward search |
//! | `0x22` | [`InvalidCompositionsMessage`] | forward search |
//! | `0x23` | [`CompositionNotificationMessage`] | notification |
//! | `0x24` | [`CompositionModificationMessage`] | notification |

pub mod codec;
pub mod collision;
pub mod composition;
pub mod error;
pub mod message;

pub use codec::{decode, decode_as, encode, encode_as, peek_type};
pub use collision::{
    CollisionMessage, CollisionResponseMessage, ConnectServicesMessage, DisconnectServicesMessage,
    ForwardMessage, InhibeCollisionsMessage, RemovedServicesMessage,
};
pub use composition::{
    BCompositionMessage, CompositionModificationMessage, CompositionNotificationMessage,
    FCompositionMessage, InvalidCompositionsMessage, PathMessage,
};
pub use error::WireError;
pub use message::{Message, MessageType, WireMessage};
