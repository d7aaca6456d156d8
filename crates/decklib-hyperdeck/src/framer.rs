//! Message framing for the deck's inbound byte stream.
//!
//! TCP delivers arbitrary chunks; [`LineFramer`] buffers them and yields
//! one [`Frame`] per protocol message:
//!
//! - a status line not ending in `:` is a complete bare message;
//! - a status line ending in `:` opens a body block, which runs until the
//!   first empty line.
//!
//! A partial message stays buffered until the rest arrives. Garbage is
//! consumed up to the next line boundary and reported, so one bad line
//! never stalls the stream.

use bytes::{Buf, BytesMut};
use decklib_core::{Error, Result};

/// Upper bound on buffered, unframed bytes.
///
/// A body block that never terminates would otherwise grow the buffer
/// without limit. Real messages are a few hundred bytes.
pub const MAX_FRAME_BUF: usize = 64 * 1024;

const CRLF: &[u8] = b"\r\n";
const BLANK_LINE: &[u8] = b"\r\n\r\n";

/// One framed message: its raw status line and raw body lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Status line without the CRLF, body marker included.
    pub status_line: String,
    /// Body lines without CRLFs; empty for bare messages.
    pub body: Vec<String>,
}

/// Result of attempting to frame one message from a byte buffer.
#[derive(Debug, PartialEq, Eq)]
pub enum FrameResult {
    /// A complete message.
    Frame {
        /// The framed message.
        frame: Frame,
        /// Bytes to drop from the front of the buffer.
        consumed: usize,
    },
    /// Unusable bytes up to a line or block boundary.
    Malformed {
        /// Why the bytes were rejected.
        reason: String,
        /// Bytes to drop from the front of the buffer.
        consumed: usize,
    },
    /// More bytes are needed.
    Incomplete,
}

/// Try to frame one message from the start of `buf`.
pub fn decode_frame(buf: &[u8]) -> FrameResult {
    let Some(line_end) = find(buf, CRLF, 0) else {
        return FrameResult::Incomplete;
    };

    let status = &buf[..line_end];
    if status.is_empty() {
        return FrameResult::Malformed {
            reason: "empty status line".into(),
            consumed: line_end + CRLF.len(),
        };
    }

    let (body, consumed) = if status.last() == Some(&b':') {
        // The block ends at the first blank line. A body-less block is the
        // status CRLF immediately followed by the blank CRLF.
        let Some(block_end) = find(buf, BLANK_LINE, line_end) else {
            return FrameResult::Incomplete;
        };
        let consumed = block_end + BLANK_LINE.len();

        if block_end == line_end {
            (Vec::new(), consumed)
        } else {
            let region = &buf[line_end + CRLF.len()..block_end];
            match std::str::from_utf8(region) {
                Ok(text) => (text.split("\r\n").map(str::to_string).collect(), consumed),
                Err(_) => {
                    return FrameResult::Malformed {
                        reason: "body is not valid UTF-8".into(),
                        consumed,
                    };
                }
            }
        }
    } else {
        (Vec::new(), line_end + CRLF.len())
    };

    match std::str::from_utf8(status) {
        Ok(status_line) => FrameResult::Frame {
            frame: Frame {
                status_line: status_line.to_string(),
                body,
            },
            consumed,
        },
        Err(_) => FrameResult::Malformed {
            reason: "status line is not valid UTF-8".into(),
            consumed,
        },
    }
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}

/// Incremental framer over a growing receive buffer.
#[derive(Debug, Default)]
pub struct LineFramer {
    buf: BytesMut,
}

impl LineFramer {
    /// Create an empty framer.
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
        }
    }

    /// Append received bytes.
    ///
    /// If the buffer would exceed [`MAX_FRAME_BUF`] it is discarded and a
    /// framing error is returned; framing restarts with the next bytes fed.
    pub fn feed(&mut self, data: &[u8]) -> Result<()> {
        self.buf.extend_from_slice(data);
        if self.buf.len() > MAX_FRAME_BUF {
            let dropped = self.buf.len();
            self.buf.clear();
            return Err(Error::Framing(format!(
                "frame buffer overflow, discarded {dropped} bytes"
            )));
        }
        Ok(())
    }

    /// Pop the next complete frame.
    ///
    /// Returns `None` when no complete message is buffered, `Some(Err(_))`
    /// for skipped garbage. Callers loop until `None`.
    pub fn next_frame(&mut self) -> Option<Result<Frame>> {
        match decode_frame(&self.buf) {
            FrameResult::Frame { frame, consumed } => {
                self.buf.advance(consumed);
                Some(Ok(frame))
            }
            FrameResult::Malformed { reason, consumed } => {
                self.buf.advance(consumed);
                Some(Err(Error::Framing(reason)))
            }
            FrameResult::Incomplete => None,
        }
    }

    /// Number of bytes waiting for the rest of a message.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Drop any partial message.
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}
