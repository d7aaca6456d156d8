//! Transport implementations for decklib.
//!
//! This crate provides the concrete implementation of the
//! [`Transport`](decklib_core::Transport) trait used to reach real decks:
//!
//! - [`TcpTransport`]: the HyperDeck Ethernet control port (TCP 9993)
//!
//! # Example
//!
//! ```no_run
//! use decklib_transport::TcpTransport;
//! use decklib_core::transport::Transport;
//! use std::time::Duration;
//!
//! # async fn example() -> decklib_core::Result<()> {
//! let mut transport = TcpTransport::connect("192.168.1.50").await?;
//! transport.send(b"device info\r\n").await?;
//!
//! let mut buf = [0u8; 1024];
//! let n = transport.receive(&mut buf, Duration::from_secs(1)).await?;
//! # Ok(())
//! # }
//! ```

pub mod tcp;

pub use tcp::{DEFAULT_PORT, TcpTransport, endpoint};
