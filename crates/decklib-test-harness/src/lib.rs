//! decklib-test-harness: Test utilities and mock transports for decklib.
//!
//! This crate provides [`MockTransport`] for deterministic testing of the
//! framing and dispatch engine without a real deck, and [`MockDeckServer`]
//! for end-to-end tests that go through a real TCP socket.

pub mod mock_tcp;
pub mod mock_transport;

pub use mock_tcp::MockDeckServer;
pub use mock_transport::MockTransport;
