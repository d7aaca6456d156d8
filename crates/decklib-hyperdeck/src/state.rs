//! Cached deck state built from device info, connection info and slot info
//! messages.
//!
//! The deck announces slot changes asynchronously, so readers get the cached
//! value without a round trip. All access goes through an
//! `Arc<Mutex<DeviceState>>` in the client; a decoded update is applied
//! under one lock acquisition, so no reader observes half of a message.

use std::collections::BTreeMap;

use decklib_core::{Error, Result};
use tracing::warn;

use crate::codec::{ConnectionInfoUpdate, DeviceInfoUpdate, SlotInfoUpdate};

/// Media status of a slot as reported by `slot info`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SlotStatus {
    /// Nothing reported yet, or a status string this library does not know.
    #[default]
    Unknown,
    Empty,
    Mounting,
    Error,
    Mounted,
}

impl SlotStatus {
    /// Map the protocol's status text. Unrecognised text maps to `Unknown`.
    pub fn from_wire(value: &str) -> Self {
        match value {
            "empty" => SlotStatus::Empty,
            "mounting" => SlotStatus::Mounting,
            "error" => SlotStatus::Error,
            "mounted" => SlotStatus::Mounted,
            _ => SlotStatus::Unknown,
        }
    }

    /// The protocol's text for this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotStatus::Unknown => "unknown",
            SlotStatus::Empty => "empty",
            SlotStatus::Mounting => "mounting",
            SlotStatus::Error => "error",
            SlotStatus::Mounted => "mounted",
        }
    }
}

/// What the deck has told us about itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Protocol version, e.g. `"1.11"`.
    pub protocol_version: Option<String>,
    /// Model name, e.g. `"HyperDeck Studio Mini"`.
    pub model: Option<String>,
    pub unique_id: Option<String>,
    /// Number of media slots; 0 until device info arrives.
    pub slot_count: u32,
    pub software_version: Option<String>,
}

/// One storage slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Slot {
    /// Slot id, 1-based.
    pub id: u32,
    /// Recording time remaining on the media in this slot, in seconds.
    pub recording_time_secs: u64,
    pub status: SlotStatus,
    pub volume_name: Option<String>,
    pub video_format: Option<String>,
    pub blocked: Option<bool>,
}

impl Slot {
    /// A slot with no information reported yet.
    pub fn new(id: u32) -> Self {
        Slot {
            id,
            ..Default::default()
        }
    }
}

/// Complete cached state of the deck.
///
/// Fields are private: the only way to change them is to apply a decoded
/// update, which keeps the slot total consistent with the slots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceState {
    identity: DeviceIdentity,
    slots: BTreeMap<u32, Slot>,
    total_remaining_secs: u64,
}

impl DeviceState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Slots keyed by id.
    pub fn slots(&self) -> &BTreeMap<u32, Slot> {
        &self.slots
    }

    pub fn slot(&self, id: u32) -> Option<&Slot> {
        self.slots.get(&id)
    }

    /// Sum of the recording time remaining across all slots, in seconds.
    pub fn total_remaining_secs(&self) -> u64 {
        self.total_remaining_secs
    }

    /// Apply a decoded `device info` message.
    ///
    /// Returns the ids of slots created by this update, in ascending order.
    /// Slots are created only on the first device info that carries a slot
    /// count; later ones update the identity and create nothing. The slot
    /// count is fixed once slots exist.
    pub fn apply_device_info(&mut self, update: &DeviceInfoUpdate) -> Vec<u32> {
        if let Some(version) = &update.protocol_version {
            self.identity.protocol_version = Some(version.clone());
        }
        if let Some(model) = &update.model {
            self.identity.model = Some(model.clone());
        }
        if let Some(unique_id) = &update.unique_id {
            self.identity.unique_id = Some(unique_id.clone());
        }
        if let Some(software) = &update.software_version {
            self.identity.software_version = Some(software.clone());
        }

        match update.slot_count {
            Some(count) if self.slots.is_empty() => {
                self.identity.slot_count = count;
                self.create_slots(count)
            }
            Some(count) => {
                if count != self.identity.slot_count {
                    warn!(
                        reported = count,
                        slots = self.slots.len(),
                        "Slot count changed after discovery, keeping existing slots"
                    );
                }
                Vec::new()
            }
            None => Vec::new(),
        }
    }

    /// Apply a decoded `connection info` greeting.
    pub fn apply_connection_info(&mut self, update: &ConnectionInfoUpdate) {
        if let Some(version) = &update.protocol_version {
            self.identity.protocol_version = Some(version.clone());
        }
        if let Some(model) = &update.model {
            self.identity.model = Some(model.clone());
        }
    }

    /// Apply a decoded `slot info` message and recompute the total.
    ///
    /// Fails with [`Error::UnknownSlot`] before touching anything if the
    /// slot does not exist.
    pub fn apply_slot_info(&mut self, update: &SlotInfoUpdate) -> Result<&Slot> {
        let slot = self
            .slots
            .get_mut(&update.slot_id)
            .ok_or(Error::UnknownSlot(update.slot_id))?;

        if let Some(status) = update.status {
            slot.status = status;
        }
        if let Some(name) = &update.volume_name {
            slot.volume_name = Some(name.clone());
        }
        if let Some(secs) = update.recording_time_secs {
            slot.recording_time_secs = secs;
        }
        if let Some(format) = &update.video_format {
            slot.video_format = Some(format.clone());
        }
        if let Some(blocked) = update.blocked {
            slot.blocked = Some(blocked);
        }

        self.recompute_total();
        self.slots
            .get(&update.slot_id)
            .ok_or(Error::UnknownSlot(update.slot_id))
    }

    fn create_slots(&mut self, count: u32) -> Vec<u32> {
        let ids: Vec<u32> = (1..=count).collect();
        for id in &ids {
            self.slots.insert(*id, Slot::new(*id));
        }
        self.recompute_total();
        ids
    }

    fn recompute_total(&mut self) {
        self.total_remaining_secs = self
            .slots
            .values()
            .fold(0u64, |acc, slot| acc.saturating_add(slot.recording_time_secs));
    }
}
