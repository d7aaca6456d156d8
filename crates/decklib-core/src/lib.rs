//! decklib-core: Core traits, types, and error definitions for decklib.
//!
//! This crate holds the pieces shared by every decklib crate: the protocol
//! client, the transports, and the test harness. Applications that only
//! observe a deck (for example a tally display) can depend on these types
//! without pulling in the client itself.
//!
//! # Key types
//!
//! - [`Transport`] -- byte-level communication channel to a deck
//! - [`DeckEvent`] -- asynchronous dispatch results and state change notifications
//! - [`Error`] / [`Result`] -- error handling

pub mod error;
pub mod events;
pub mod transport;

pub use error::{Error, Result};
pub use events::DeckEvent;
pub use transport::Transport;
