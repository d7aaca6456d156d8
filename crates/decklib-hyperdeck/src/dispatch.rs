//! Message classification and routing to body decoders.
//!
//! Routing is a closed table keyed on `(class, label)`. Anything outside it
//! is reported as [`Error::Unhandled`] and discarded; it never reaches the
//! state.

use decklib_core::{Error, Result};

use crate::codec::{
    self, ConnectionInfoUpdate, DeviceInfoUpdate, Message, SlotInfoUpdate,
};
use crate::state::DeviceState;

/// Coarse class of a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageClass {
    /// 500-599: device-initiated notification.
    Asynchronous,
    /// 201-299: reply carrying data.
    Success,
    /// Everything else, including `200 ok` and 1xx failures.
    Unclassified,
}

/// Classify a status code.
pub fn classify(code: u16) -> MessageClass {
    match code {
        500..=599 => MessageClass::Asynchronous,
        201..=299 => MessageClass::Success,
        _ => MessageClass::Unclassified,
    }
}

/// Message kinds that have a decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    DeviceInfo,
    SlotInfo,
    ConnectionInfo,
}

/// Look up the decoder for a class and label.
pub fn resolve(class: MessageClass, label: &str) -> Option<MessageKind> {
    use MessageClass::{Asynchronous, Success};

    match (class, label) {
        (Asynchronous, "connection info") => Some(MessageKind::ConnectionInfo),
        (Asynchronous | Success, "device info") => Some(MessageKind::DeviceInfo),
        (Asynchronous | Success, "slot info") => Some(MessageKind::SlotInfo),
        _ => None,
    }
}

/// A message decoded into a typed update, not yet applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    DeviceInfo(DeviceInfoUpdate),
    SlotInfo(SlotInfoUpdate),
    ConnectionInfo(ConnectionInfoUpdate),
    /// A bare 1xx/2xx reply with no decoder, such as `200 ok`.
    Reply { code: u16, label: String },
}

/// Decode a message without touching any state.
///
/// A bare reply to a command decodes as [`Decoded::Reply`]. Any other
/// message without a decoder is [`Error::Unhandled`].
pub fn decode(message: &Message) -> Result<Decoded> {
    let Some(kind) = resolve(classify(message.code), &message.label) else {
        if message.is_reply() && message.body.is_empty() {
            return Ok(Decoded::Reply {
                code: message.code,
                label: message.label.clone(),
            });
        }
        return Err(Error::Unhandled {
            code: message.code,
            label: message.label.clone(),
        });
    };

    let fields = message.fields()?;
    match kind {
        MessageKind::DeviceInfo => Ok(Decoded::DeviceInfo(codec::parse_device_info(&fields)?)),
        MessageKind::SlotInfo => Ok(Decoded::SlotInfo(codec::parse_slot_info(&fields)?)),
        MessageKind::ConnectionInfo => Ok(Decoded::ConnectionInfo(
            codec::parse_connection_info(&fields),
        )),
    }
}

/// What applying a decoded message changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Identity updated; `new_slots` lists slots created by this message.
    DeviceInfo { new_slots: Vec<u32> },
    /// Identity updated from the greeting.
    ConnectionInfo,
    /// One slot updated.
    SlotInfo { slot_id: u32, total_remaining_secs: u64 },
    /// Nothing to apply.
    Reply { code: u16, label: String },
}

/// Apply a decoded message to the state.
///
/// Callers hold the state lock across this call so the whole message lands
/// at once.
pub fn apply(decoded: Decoded, state: &mut DeviceState) -> Result<Outcome> {
    match decoded {
        Decoded::DeviceInfo(update) => Ok(Outcome::DeviceInfo {
            new_slots: state.apply_device_info(&update),
        }),
        Decoded::ConnectionInfo(update) => {
            state.apply_connection_info(&update);
            Ok(Outcome::ConnectionInfo)
        }
        Decoded::SlotInfo(update) => {
            let slot_id = state.apply_slot_info(&update)?.id;
            Ok(Outcome::SlotInfo {
                slot_id,
                total_remaining_secs: state.total_remaining_secs(),
            })
        }
        Decoded::Reply { code, label } => Ok(Outcome::Reply { code, label }),
    }
}
