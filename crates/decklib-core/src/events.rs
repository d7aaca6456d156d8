//! Asynchronous deck event types.
//!
//! Events are emitted by the protocol client through a
//! `tokio::sync::broadcast` channel as messages are dispatched. Besides
//! state changes they carry the non-fatal reports of the read path
//! (framing errors, unhandled messages, unknown slot references), so
//! applications can observe them without scraping logs.

/// An event emitted by the protocol client.
///
/// Events are delivered on a best-effort basis through a bounded broadcast
/// channel; slow consumers may miss events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeckEvent {
    /// The session entered the running state.
    Connected,

    /// The session reached the closed state.
    Disconnected,

    /// A device info or connection info message updated the device identity.
    DeviceInfoChanged,

    /// A slot info message updated a slot.
    SlotChanged {
        /// Id of the updated slot.
        slot_id: u32,
        /// Total recording time remaining across all slots, in seconds.
        total_remaining_secs: u64,
    },

    /// A synchronous reply without a decoder (for example `200 ok`).
    Response {
        /// Status code of the reply.
        code: u16,
        /// Label of the reply.
        label: String,
    },

    /// A well-framed message whose code range or label has no decoder.
    Unhandled {
        /// Status code of the message.
        code: u16,
        /// Label of the message.
        label: String,
    },

    /// Bytes were skipped because they did not form a message.
    FramingError {
        /// Human-readable description of the problem.
        detail: String,
    },

    /// A well-framed message was skipped because a field value was invalid
    /// (for example a non-numeric `recording time`). No state was changed.
    DecodeError {
        /// Status code of the message.
        code: u16,
        /// Label of the message.
        label: String,
        /// Human-readable description of the problem.
        detail: String,
    },

    /// A slot info message referenced a slot that does not exist.
    UnknownSlot {
        /// The slot id the message referenced.
        slot_id: u32,
    },
}
