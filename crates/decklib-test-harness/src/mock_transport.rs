//! In-memory mock transport for deterministic testing.
//!
//! [`MockTransport`] implements the [`Transport`] trait over shared state,
//! so a test can keep a clone after handing the transport to a client and
//! then:
//!
//! - push unsolicited deck output at any time ([`push_inbound`](MockTransport::push_inbound)),
//! - script replies to specific commands ([`expect`](MockTransport::expect)),
//! - inspect everything the client wrote ([`sent_lines`](MockTransport::sent_lines)),
//! - simulate the deck hanging up ([`hang_up`](MockTransport::hang_up)).
//!
//! # Example
//!
//! ```
//! use decklib_test_harness::MockTransport;
//!
//! let mock = MockTransport::new();
//! mock.expect(b"device info\r\n", b"204 device info:\r\nslot count: 2\r\n\r\n");
//! mock.push_inbound(b"500 connection info:\r\nprotocol version: 1.11\r\n\r\n");
//! ```

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;

use decklib_core::error::{Error, Result};
use decklib_core::transport::Transport;

/// A scripted reply: when `request` is sent, `response` becomes readable.
#[derive(Debug, Clone)]
struct Expectation {
    request: Vec<u8>,
    response: Vec<u8>,
}

#[derive(Debug)]
struct Inner {
    /// Bytes waiting to be returned by `receive()`.
    inbound: VecDeque<u8>,
    /// Scripted replies, matched in order.
    expectations: VecDeque<Expectation>,
    /// One entry per `send()` call.
    sent_log: Vec<Vec<u8>>,
    /// Cleared by `close()`.
    connected: bool,
    /// Set by `hang_up()`; `receive()` reports `ConnectionLost` once drained.
    peer_closed: bool,
    /// Upper bound on bytes returned per `receive()`, to exercise partial reads.
    max_read: Option<usize>,
}

/// A cloneable in-memory [`Transport`] for testing.
///
/// All clones share the same state. Sends that match the next expectation
/// queue its response for reading; sends made while no expectation is
/// pending are accepted and only recorded. A send that does not match the
/// pending expectation fails with [`Error::Protocol`].
#[derive(Debug, Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<Inner>>,
    readable: Arc<Notify>,
}

impl MockTransport {
    /// Create a new mock transport in the connected state.
    pub fn new() -> Self {
        MockTransport {
            inner: Arc::new(Mutex::new(Inner {
                inbound: VecDeque::new(),
                expectations: VecDeque::new(),
                sent_log: Vec::new(),
                connected: true,
                peer_closed: false,
                max_read: None,
            })),
            readable: Arc::new(Notify::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panicking test thread must not hide the state from the others.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Script a reply: once `request` is sent, `response` becomes readable.
    pub fn expect(&self, request: &[u8], response: &[u8]) {
        self.lock().expectations.push_back(Expectation {
            request: request.to_vec(),
            response: response.to_vec(),
        });
    }

    /// Make `data` readable immediately, as if the deck had sent it unprompted.
    pub fn push_inbound(&self, data: &[u8]) {
        self.lock().inbound.extend(data.iter().copied());
        self.readable.notify_one();
    }

    /// Limit how many bytes a single `receive()` returns.
    pub fn set_max_read(&self, max: usize) {
        self.lock().max_read = Some(max.max(1));
    }

    /// Simulate the deck closing the connection.
    ///
    /// Already-queued bytes are still delivered; after that `receive()`
    /// returns [`Error::ConnectionLost`].
    pub fn hang_up(&self) {
        self.lock().peer_closed = true;
        self.readable.notify_one();
    }

    /// Every `send()` payload so far, in order.
    pub fn sent_data(&self) -> Vec<Vec<u8>> {
        self.lock().sent_log.clone()
    }

    /// Every `send()` payload so far as text, without the trailing CRLF.
    pub fn sent_lines(&self) -> Vec<String> {
        self.lock()
            .sent_log
            .iter()
            .map(|bytes| {
                String::from_utf8_lossy(bytes)
                    .trim_end_matches("\r\n")
                    .to_string()
            })
            .collect()
    }

    /// Number of scripted replies not yet triggered.
    pub fn remaining_expectations(&self) -> usize {
        self.lock().expectations.len()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let mut inner = self.lock();
        if !inner.connected {
            return Err(Error::NotConnected);
        }
        if inner.peer_closed {
            return Err(Error::ConnectionLost);
        }

        inner.sent_log.push(data.to_vec());

        let matched = match inner.expectations.front() {
            Some(expectation) if data != expectation.request.as_slice() => {
                return Err(Error::Protocol(format!(
                    "unexpected send data: expected {:?}, got {:?}",
                    String::from_utf8_lossy(&expectation.request),
                    String::from_utf8_lossy(data)
                )));
            }
            Some(_) => inner.expectations.pop_front(),
            None => None,
        };

        if let Some(expectation) = matched {
            inner.inbound.extend(expectation.response);
            drop(inner);
            self.readable.notify_one();
        }
        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            {
                let mut inner = self.lock();
                if !inner.connected {
                    return Err(Error::NotConnected);
                }
                if !inner.inbound.is_empty() {
                    let limit = inner.max_read.unwrap_or(usize::MAX);
                    let n = inner.inbound.len().min(buf.len()).min(limit);
                    for (slot, byte) in buf.iter_mut().zip(inner.inbound.drain(..n)) {
                        *slot = byte;
                    }
                    return Ok(n);
                }
                if inner.peer_closed {
                    return Err(Error::ConnectionLost);
                }
            }

            if tokio::time::timeout_at(deadline, self.readable.notified())
                .await
                .is_err()
            {
                return Err(Error::Timeout);
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        let mut inner = self.lock();
        inner.connected = false;
        inner.inbound.clear();
        drop(inner);
        self.readable.notify_one();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }
}
