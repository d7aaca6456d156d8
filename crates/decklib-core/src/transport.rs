//! Transport trait for deck communication.
//!
//! The [`Transport`] trait abstracts over the physical link to a deck. The
//! production implementation is the TCP transport in `decklib-transport`;
//! `decklib-test-harness` provides an in-memory mock so the framing and
//! dispatch engine can be tested without hardware.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Asynchronous byte-level transport to a deck.
///
/// Implementations deal only in bytes. Message boundaries, status codes and
/// body decoding are handled by the protocol client that consumes this trait.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send raw bytes to the deck.
    ///
    /// Implementations must not return until every byte has been handed to
    /// the underlying link.
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receive bytes from the deck into the provided buffer.
    ///
    /// Returns the number of bytes read, which may be any part of a line.
    /// Waits up to `timeout`; returns [`Error::Timeout`](crate::error::Error::Timeout)
    /// if nothing arrived, and [`Error::ConnectionLost`](crate::error::Error::ConnectionLost)
    /// once the peer has closed the stream.
    ///
    /// Must be cancel-safe: dropping the future before completion loses no data.
    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Close the transport connection.
    ///
    /// After calling `close()`, subsequent `send()` and `receive()` calls
    /// return [`Error::NotConnected`](crate::error::Error::NotConnected).
    async fn close(&mut self) -> Result<()>;

    /// Check whether the transport is currently connected.
    fn is_connected(&self) -> bool;
}
