//! HyperDeck command encoding and message decoding.
//!
//! The HyperDeck Ethernet protocol exchanges CRLF-terminated ASCII lines
//! over TCP port 9993. Commands flow from client to deck; replies and
//! asynchronous notifications flow back.
//!
//! # Line formats
//!
//! ```text
//! Command:        <command text>\r\n
//! Bare reply:     <code> <label>\r\n
//! Multi-line:     <code> <label>:\r\n
//!                 <key>: <value>\r\n
//!                 ...
//!                 \r\n
//! ```
//!
//! Codes 200-299 answer a command, 500-599 are device-initiated, 100-199
//! report a failed command. Everything in this module is pure parsing; no
//! I/O is performed. Message boundaries are found by [`crate::framer`].

use decklib_core::{Error, Result};

use crate::framer::Frame;
use crate::state::SlotStatus;

/// Line terminator for commands, status lines and body lines.
pub const LINE_TERMINATOR: &str = "\r\n";

/// Trailing status line character announcing a body block.
pub const BODY_MARKER: char = ':';

/// Separator between key and value in a body line.
pub const FIELD_SEPARATOR: &str = ": ";

/// Largest `slot count` accepted from `device info`.
///
/// Every slot costs a record and a `slot info` query; real decks report at
/// most a handful.
pub const MAX_SLOT_COUNT: u32 = 64;

// ---------------------------------------------------------------------------
// Command encoding
// ---------------------------------------------------------------------------

/// Encode a command line for the wire.
///
/// Rejects empty commands and commands containing CR or LF, which would
/// otherwise be read by the deck as several commands.
pub fn encode_command(command: &str) -> Result<Vec<u8>> {
    if command.trim().is_empty() {
        return Err(Error::InvalidParameter("empty command".into()));
    }
    if command.contains(['\r', '\n']) {
        return Err(Error::InvalidParameter(format!(
            "command contains a line break: {command:?}"
        )));
    }
    Ok(format!("{command}{LINE_TERMINATOR}").into_bytes())
}

/// Build a device info query.
///
/// Example output: `"device info"`
pub fn cmd_device_info() -> String {
    "device info".to_string()
}

/// Build a slot info query for one slot.
///
/// Example output: `"slot info: slot id: 2"`
pub fn cmd_slot_info(slot_id: u32) -> String {
    format!("slot info: slot id: {slot_id}")
}

// ---------------------------------------------------------------------------
// Status line
// ---------------------------------------------------------------------------

/// A parsed status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    /// Numeric status code.
    pub code: u16,
    /// Free text after the code, without the body marker.
    pub label: String,
}

/// Parse a status line such as `"204 device info:"` or `"200 ok"`.
///
/// The line must not include the CRLF. A trailing body marker is stripped
/// so the label is exactly the protocol text.
pub fn parse_status_line(line: &str) -> Result<StatusLine> {
    let line = line.strip_suffix(BODY_MARKER).unwrap_or(line);

    let (code, label) = line
        .split_once(' ')
        .ok_or_else(|| Error::Framing(format!("status line has no label: {line:?}")))?;

    let code = code
        .parse::<u16>()
        .map_err(|_| Error::Framing(format!("non-numeric status code: {line:?}")))?;

    if label.is_empty() {
        return Err(Error::Framing(format!("status line has no label: {line:?}")));
    }

    Ok(StatusLine {
        code,
        label: label.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Messages and fields
// ---------------------------------------------------------------------------

/// One complete protocol message: status code, label and raw body lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Numeric status code.
    pub code: u16,
    /// Message kind, e.g. `"slot info"`.
    pub label: String,
    /// Raw `key: value` lines in arrival order (empty for bare replies).
    pub body: Vec<String>,
}

impl Message {
    /// Build a message from a framed chunk by parsing its status line.
    pub fn from_frame(frame: Frame) -> Result<Self> {
        let status = parse_status_line(&frame.status_line)?;
        Ok(Message {
            code: status.code,
            label: status.label,
            body: frame.body,
        })
    }

    /// Split every body line into a `(key, value)` pair.
    ///
    /// Fails on the first line without a separator, so callers never act on
    /// half of a body.
    pub fn fields(&self) -> Result<Vec<(String, String)>> {
        self.body.iter().map(|line| parse_field(line)).collect()
    }

    /// Whether the code is in the asynchronous notification range.
    pub fn is_asynchronous(&self) -> bool {
        (500..=599).contains(&self.code)
    }

    /// Whether the code reports a failed command.
    pub fn is_failure(&self) -> bool {
        (100..=199).contains(&self.code)
    }

    /// Whether this message answers a command (1xx or 2xx).
    pub fn is_reply(&self) -> bool {
        (100..=299).contains(&self.code)
    }
}

/// Split a body line once on the first `": "`.
pub fn parse_field(line: &str) -> Result<(String, String)> {
    line.split_once(FIELD_SEPARATOR)
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| Error::Framing(format!("body line is not `key: value`: {line:?}")))
}

/// Encode a message in wire format.
///
/// The body marker and the terminating blank line are emitted only when the
/// body is non-empty.
pub fn encode_message(message: &Message) -> Vec<u8> {
    let mut out = String::new();
    if message.body.is_empty() {
        out.push_str(&format!("{} {}{LINE_TERMINATOR}", message.code, message.label));
    } else {
        out.push_str(&format!(
            "{} {}{BODY_MARKER}{LINE_TERMINATOR}",
            message.code, message.label
        ));
        for line in &message.body {
            out.push_str(line);
            out.push_str(LINE_TERMINATOR);
        }
        out.push_str(LINE_TERMINATOR);
    }
    out.into_bytes()
}

// ---------------------------------------------------------------------------
// Body decoders
// ---------------------------------------------------------------------------

/// Fields decoded from a `device info` body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfoUpdate {
    pub protocol_version: Option<String>,
    pub model: Option<String>,
    pub unique_id: Option<String>,
    pub slot_count: Option<u32>,
    pub software_version: Option<String>,
}

/// Decode a `device info` body. Unknown keys are ignored.
pub fn parse_device_info(fields: &[(String, String)]) -> Result<DeviceInfoUpdate> {
    let mut update = DeviceInfoUpdate::default();

    for (key, value) in fields {
        match key.as_str() {
            "protocol version" => update.protocol_version = Some(value.clone()),
            "model" => update.model = Some(value.clone()),
            "unique id" => update.unique_id = Some(value.clone()),
            "slot count" => {
                let count = value
                    .parse::<u32>()
                    .map_err(|_| Error::Protocol(format!("invalid slot count: {value}")))?;
                if count > MAX_SLOT_COUNT {
                    return Err(Error::Protocol(format!(
                        "slot count {count} exceeds {MAX_SLOT_COUNT}"
                    )));
                }
                update.slot_count = Some(count);
            }
            "software version" => update.software_version = Some(value.clone()),
            _ => {}
        }
    }

    Ok(update)
}

/// Fields decoded from the `connection info` greeting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionInfoUpdate {
    pub protocol_version: Option<String>,
    pub model: Option<String>,
}

/// Decode a `connection info` body. Unknown keys are ignored.
pub fn parse_connection_info(fields: &[(String, String)]) -> ConnectionInfoUpdate {
    let mut update = ConnectionInfoUpdate::default();
    for (key, value) in fields {
        match key.as_str() {
            "protocol version" => update.protocol_version = Some(value.clone()),
            "model" => update.model = Some(value.clone()),
            _ => {}
        }
    }
    update
}

/// Fields decoded from a `slot info` body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotInfoUpdate {
    /// The slot the update targets.
    pub slot_id: u32,
    pub status: Option<SlotStatus>,
    pub volume_name: Option<String>,
    /// Recording time remaining on this slot, in seconds.
    pub recording_time_secs: Option<u64>,
    pub video_format: Option<String>,
    pub blocked: Option<bool>,
}

/// Decode a `slot info` body.
///
/// `slot id` may appear anywhere in the body; it is located by name before
/// the other fields are read.
pub fn parse_slot_info(fields: &[(String, String)]) -> Result<SlotInfoUpdate> {
    let raw_id = fields
        .iter()
        .find(|(key, _)| key == "slot id")
        .map(|(_, value)| value)
        .ok_or_else(|| Error::Protocol("slot info missing slot id".into()))?;

    let slot_id = raw_id
        .parse::<u32>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| Error::Protocol(format!("invalid slot id: {raw_id}")))?;

    let mut update = SlotInfoUpdate {
        slot_id,
        status: None,
        volume_name: None,
        recording_time_secs: None,
        video_format: None,
        blocked: None,
    };

    for (key, value) in fields {
        match key.as_str() {
            "status" => update.status = Some(SlotStatus::from_wire(value)),
            "volume name" => update.volume_name = Some(value.clone()),
            "recording time" => {
                update.recording_time_secs = Some(
                    value
                        .parse::<u64>()
                        .map_err(|_| Error::Protocol(format!("invalid recording time: {value}")))?,
                );
            }
            "video format" => update.video_format = Some(value.clone()),
            "blocked" => {
                update.blocked = Some(match value.as_str() {
                    "true" => true,
                    "false" => false,
                    other => {
                        return Err(Error::Protocol(format!("invalid blocked flag: {other}")));
                    }
                });
            }
            _ => {
                // Unknown keys (slot name, remaining size, ...) are ignored.
            }
        }
    }

    Ok(update)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    // -- Command encoding ---------------------------------------------------

    #[test]
    fn encode_device_info_query() {
        assert_eq!(
            encode_command(&cmd_device_info()).unwrap(),
            b"device info\r\n"
        );
    }

    #[test]
    fn encode_slot_info_query() {
        assert_eq!(cmd_slot_info(2), "slot info: slot id: 2");
        assert_eq!(
            encode_command(&cmd_slot_info(1)).unwrap(),
            b"slot info: slot id: 1\r\n"
        );
    }

    #[test]
    fn encode_rejects_line_breaks_and_empty() {
        assert!(matches!(
            encode_command("play\r\nstop"),
            Err(Error::InvalidParameter(_))
        ));
        assert!(matches!(encode_command("  "), Err(Error::InvalidParameter(_))));
    }

    // -- Status line ---------------------------------------------------------

    #[test]
    fn status_line_with_marker() {
        let status = parse_status_line("204 device info:").unwrap();
        assert_eq!(status.code, 204);
        assert_eq!(status.label, "device info");
    }

    #[test]
    fn status_line_bare_reply() {
        let status = parse_status_line("200 ok").unwrap();
        assert_eq!(status.code, 200);
        assert_eq!(status.label, "ok");
    }

    #[test]
    fn status_line_label_keeps_inner_spaces() {
        let status = parse_status_line("120 connection rejected").unwrap();
        assert_eq!(status.label, "connection rejected");
    }

    #[test]
    fn status_line_non_numeric_code() {
        assert!(matches!(
            parse_status_line("abc slot info:"),
            Err(Error::Framing(_))
        ));
    }

    #[test]
    fn status_line_without_label() {
        assert!(matches!(parse_status_line("200"), Err(Error::Framing(_))));
        assert!(matches!(parse_status_line("200 "), Err(Error::Framing(_))));
        assert!(matches!(parse_status_line(":"), Err(Error::Framing(_))));
    }

    // -- Fields --------------------------------------------------------------

    #[test]
    fn field_splits_on_first_separator_only() {
        assert_eq!(
            parse_field("volume name: Show: Act 1").unwrap(),
            ("volume name".to_string(), "Show: Act 1".to_string())
        );
    }

    #[test]
    fn field_without_separator_is_framing_error() {
        assert!(matches!(parse_field("garbage"), Err(Error::Framing(_))));
        assert!(matches!(parse_field("key:value"), Err(Error::Framing(_))));
    }

    #[test]
    fn message_fields_fail_as_a_whole() {
        let message = Message {
            code: 202,
            label: "slot info".into(),
            body: vec!["slot id: 1".into(), "broken".into()],
        };
        assert!(message.fields().is_err());
    }

    #[test]
    fn message_code_ranges() {
        let mut message = Message {
            code: 502,
            label: "slot info".into(),
            body: vec![],
        };
        assert!(message.is_asynchronous());
        assert!(!message.is_reply());
        message.code = 105;
        assert!(message.is_failure());
        assert!(message.is_reply());
        assert!(!message.is_asynchronous());
        message.code = 200;
        assert!(message.is_reply());
        assert!(!message.is_failure());
    }

    #[test]
    fn encode_bare_and_multi_line_messages() {
        let bare = Message {
            code: 200,
            label: "ok".into(),
            body: vec![],
        };
        assert_eq!(encode_message(&bare), b"200 ok\r\n");

        let multi = Message {
            code: 502,
            label: "slot info".into(),
            body: vec!["slot id: 1".into()],
        };
        assert_eq!(encode_message(&multi), b"502 slot info:\r\nslot id: 1\r\n\r\n");
    }

    // -- Device info ---------------------------------------------------------

    #[test]
    fn device_info_full() {
        let update = parse_device_info(&fields(&[
            ("protocol version", "1.11"),
            ("model", "HyperDeck Extreme"),
            ("unique id", "7c2e0dffe0f1"),
            ("slot count", "2"),
            ("software version", "8.1"),
            ("interface count", "1"),
        ]))
        .unwrap();

        assert_eq!(update.protocol_version.as_deref(), Some("1.11"));
        assert_eq!(update.model.as_deref(), Some("HyperDeck Extreme"));
        assert_eq!(update.unique_id.as_deref(), Some("7c2e0dffe0f1"));
        assert_eq!(update.slot_count, Some(2));
        assert_eq!(update.software_version.as_deref(), Some("8.1"));
    }

    #[test]
    fn device_info_partial() {
        let update = parse_device_info(&fields(&[("model", "HyperDeck Studio")])).unwrap();
        assert_eq!(update.model.as_deref(), Some("HyperDeck Studio"));
        assert_eq!(update.slot_count, None);
        assert_eq!(update.protocol_version, None);
    }

    #[test]
    fn device_info_bad_slot_count() {
        assert!(matches!(
            parse_device_info(&fields(&[("slot count", "two")])),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn device_info_slot_count_limit() {
        let update = parse_device_info(&fields(&[("slot count", "64")])).unwrap();
        assert_eq!(update.slot_count, Some(MAX_SLOT_COUNT));

        assert!(matches!(
            parse_device_info(&fields(&[("model", "HyperDeck"), ("slot count", "3000000")])),
            Err(Error::Protocol(_))
        ));
        assert!(matches!(
            parse_device_info(&fields(&[("slot count", "65")])),
            Err(Error::Protocol(_))
        ));
    }

    // -- Connection info -----------------------------------------------------

    #[test]
    fn connection_info_reads_version_and_model() {
        let update = parse_connection_info(&fields(&[
            ("protocol version", "1.11"),
            ("model", "HyperDeck Studio Mini"),
        ]));
        assert_eq!(update.protocol_version.as_deref(), Some("1.11"));
        assert_eq!(update.model.as_deref(), Some("HyperDeck Studio Mini"));
    }

    // -- Slot info -----------------------------------------------------------

    #[test]
    fn slot_info_full() {
        let update = parse_slot_info(&fields(&[
            ("slot id", "1"),
            ("status", "mounted"),
            ("volume name", "Media"),
            ("recording time", "3600"),
            ("video format", "1080p30"),
            ("blocked", "false"),
        ]))
        .unwrap();

        assert_eq!(update.slot_id, 1);
        assert_eq!(update.status, Some(SlotStatus::Mounted));
        assert_eq!(update.volume_name.as_deref(), Some("Media"));
        assert_eq!(update.recording_time_secs, Some(3600));
        assert_eq!(update.video_format.as_deref(), Some("1080p30"));
        assert_eq!(update.blocked, Some(false));
    }

    #[test]
    fn slot_info_id_found_in_any_position() {
        let update = parse_slot_info(&fields(&[
            ("status", "empty"),
            ("recording time", "0"),
            ("slot id", "2"),
        ]))
        .unwrap();
        assert_eq!(update.slot_id, 2);
        assert_eq!(update.status, Some(SlotStatus::Empty));
        assert_eq!(update.recording_time_secs, Some(0));
    }

    #[test]
    fn slot_info_missing_or_invalid_id() {
        assert!(parse_slot_info(&fields(&[("status", "empty")])).is_err());
        assert!(parse_slot_info(&fields(&[("slot id", "zero")])).is_err());
        assert!(parse_slot_info(&fields(&[("slot id", "0")])).is_err());
    }

    #[test]
    fn slot_info_bad_values() {
        assert!(
            parse_slot_info(&fields(&[("slot id", "1"), ("recording time", "soon")])).is_err()
        );
        assert!(parse_slot_info(&fields(&[("slot id", "1"), ("blocked", "maybe")])).is_err());
    }
}
