//! HyperDeck Ethernet protocol client for decklib.
//!
//! This crate speaks the line-oriented control protocol of Blackmagic
//! HyperDeck disk recorders (TCP port 9993) and keeps a cached model of the
//! deck's identity and storage slots. It provides:
//!
//! - **Framer** ([`framer`]) -- splits the inbound byte stream into bare
//!   status lines and blank-line-terminated body blocks.
//! - **Codec** ([`codec`]) -- status line and `key: value` parsing, typed
//!   body decoders, command encoding.
//! - **Dispatch** ([`dispatch`]) -- classifies status codes and routes each
//!   `(class, label)` pair to its decoder.
//! - **State** ([`state`]) -- device identity, slots and the derived total
//!   recording time remaining.
//! - **HyperDeckClient** ([`client`]) -- session lifecycle, the IO task,
//!   command submission and reply correlation.
//! - **HyperDeckBuilder** ([`builder`]) -- fluent builder for constructing
//!   clients with configurable endpoint and timeouts.
//!
//! # Example
//!
//! ```no_run
//! use decklib_hyperdeck::HyperDeckBuilder;
//!
//! # async fn example() -> decklib_core::Result<()> {
//! let deck = HyperDeckBuilder::new().host("192.168.1.50").build().await?;
//! let mut events = deck.subscribe();
//! while let Ok(event) = events.recv().await {
//!     println!("{:?}: {}s remaining", event, deck.total_remaining_secs().await);
//! }
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod client;
pub mod codec;
pub mod dispatch;
pub mod framer;
pub mod state;

pub use builder::HyperDeckBuilder;
pub use client::{ClientOptions, HyperDeckClient, SessionState};
pub use codec::Message;
pub use state::{DeviceIdentity, DeviceState, Slot, SlotStatus};
