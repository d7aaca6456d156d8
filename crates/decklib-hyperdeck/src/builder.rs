//! HyperDeckBuilder -- fluent builder for constructing [`HyperDeckClient`]
//! instances.
//!
//! Separates configuration from construction so that callers can set up
//! the network endpoint, timeouts and startup behaviour before the TCP
//! connection is opened.
//!
//! # Example
//!
//! ```no_run
//! use decklib_hyperdeck::builder::HyperDeckBuilder;
//! use std::time::Duration;
//!
//! # async fn example() -> decklib_core::Result<()> {
//! let deck = HyperDeckBuilder::new()
//!     .host("192.168.1.50")
//!     .command_timeout(Duration::from_secs(1))
//!     .build()
//!     .await?;
//! println!("{:?}", deck.identity().await);
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use decklib_core::error::{Error, Result};
use decklib_core::transport::Transport;
use decklib_transport::DEFAULT_PORT;

use crate::client::{
    ClientOptions, DEFAULT_COMMAND_TIMEOUT, DEFAULT_CONNECT_TIMEOUT, DEFAULT_POLL_INTERVAL,
    HyperDeckClient,
};

/// Fluent builder for [`HyperDeckClient`].
///
/// Only the host is required:
///
/// ```ignore
/// let deck = HyperDeckBuilder::new().host("192.168.1.50").build().await?;
/// ```
pub struct HyperDeckBuilder {
    host: Option<String>,
    port: u16,
    command_timeout: Duration,
    connect_timeout: Duration,
    poll_interval: Duration,
    query_device_info: bool,
}

impl HyperDeckBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        HyperDeckBuilder {
            host: None,
            port: DEFAULT_PORT,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            query_device_info: true,
        }
    }

    /// Set the deck's IP address or hostname.
    pub fn host(mut self, host: &str) -> Self {
        self.host = Some(host.to_string());
        self
    }

    /// Set the control port (default: 9993).
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the command reply timeout (default: 2s).
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Set the TCP connect timeout (default: 5s).
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set how long one transport read may block (default: 100ms).
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Enable or disable the `device info` query sent on startup
    /// (default: true).
    ///
    /// Without it no slots are discovered until the application sends
    /// `device info` itself.
    pub fn query_device_info(mut self, enable: bool) -> Self {
        self.query_device_info = enable;
        self
    }

    fn options(&self) -> ClientOptions {
        ClientOptions {
            command_timeout: self.command_timeout,
            connect_timeout: self.connect_timeout,
            poll_interval: self.poll_interval,
            query_device_info: self.query_device_info,
        }
    }

    /// Connect to the deck over TCP and start the session.
    ///
    /// Requires that [`host()`](Self::host) has been called.
    pub async fn build(self) -> Result<HyperDeckClient> {
        let host = self.host.as_ref().ok_or_else(|| {
            Error::InvalidParameter("host is required: call .host() before .build()".into())
        })?;
        let addr = format!("{}:{}", host, self.port);

        HyperDeckClient::connect(&addr, self.options()).await
    }

    /// Start a session over an already-connected transport.
    ///
    /// This is the primary entry point for testing: pass a
    /// `MockTransport` or any other [`Transport`] implementation.
    pub async fn build_with_transport(self, transport: Box<dyn Transport>) -> Result<HyperDeckClient> {
        HyperDeckClient::from_transport(transport, self.options()).await
    }
}

impl Default for HyperDeckBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::SessionState;
    use crate::state::SlotStatus;
    use decklib_test_harness::{MockDeckServer, MockTransport};

    const GREETING: &[u8] =
        b"500 connection info:\r\nprotocol version: 1.11\r\nmodel: HyperDeck Studio Mini\r\n\r\n";

    #[test]
    fn builder_defaults() {
        let options = HyperDeckBuilder::new().options();
        assert_eq!(options.command_timeout, Duration::from_secs(2));
        assert_eq!(options.connect_timeout, Duration::from_secs(5));
        assert_eq!(options.poll_interval, Duration::from_millis(100));
        assert!(options.query_device_info);
        assert_eq!(HyperDeckBuilder::default().port, 9993);
    }

    #[test]
    fn builder_overrides() {
        let builder = HyperDeckBuilder::new()
            .host("10.0.0.5")
            .port(19993)
            .command_timeout(Duration::from_millis(250))
            .connect_timeout(Duration::from_secs(1))
            .poll_interval(Duration::from_millis(10))
            .query_device_info(false);

        assert_eq!(builder.host.as_deref(), Some("10.0.0.5"));
        assert_eq!(builder.port, 19993);
        let options = builder.options();
        assert_eq!(options.command_timeout, Duration::from_millis(250));
        assert_eq!(options.connect_timeout, Duration::from_secs(1));
        assert_eq!(options.poll_interval, Duration::from_millis(10));
        assert!(!options.query_device_info);
    }

    #[tokio::test]
    async fn build_requires_host() {
        let result = HyperDeckBuilder::new().build().await;
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }

    #[tokio::test]
    async fn build_with_transport_skips_startup_query() {
        let mock = MockTransport::new();
        let deck = HyperDeckBuilder::new()
            .query_device_info(false)
            .build_with_transport(Box::new(mock.clone()))
            .await
            .unwrap();

        assert_eq!(deck.session_state(), SessionState::Running);
        assert!(mock.sent_lines().is_empty());
        deck.close().await.unwrap();
    }

    #[tokio::test]
    async fn tcp_session_end_to_end() {
        let mut server = MockDeckServer::new().await.unwrap();
        server.greeting(GREETING);
        server.expect(
            b"device info\r\n",
            b"204 device info:\r\nprotocol version: 1.11\r\nmodel: HyperDeck Studio Mini\r\nslot count: 2\r\n\r\n",
        );
        server.expect(
            b"slot info: slot id: 1\r\n",
            b"202 slot info:\r\nslot id: 1\r\nstatus: mounted\r\nrecording time: 3600\r\n\r\n",
        );
        server.expect(
            b"slot info: slot id: 2\r\n",
            b"202 slot info:\r\nslot id: 2\r\nstatus: empty\r\nrecording time: 0\r\n\r\n",
        );
        server.linger(Duration::from_millis(500));
        server.start();

        let (host, port) = server.addr().rsplit_once(':').unwrap();
        let deck = HyperDeckBuilder::new()
            .host(host)
            .port(port.parse().unwrap())
            .poll_interval(Duration::from_millis(20))
            .build()
            .await
            .unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let slots = deck.slots().await;
            if slots.len() == 2 && slots[1].status == SlotStatus::Empty {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "slots never filled: {:?}", slots);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let identity = deck.identity().await;
        assert_eq!(identity.protocol_version.as_deref(), Some("1.11"));
        assert_eq!(identity.model.as_deref(), Some("HyperDeck Studio Mini"));
        assert_eq!(deck.slot(1).await.unwrap().status, SlotStatus::Mounted);
        assert_eq!(deck.total_remaining_secs().await, 3600);

        deck.close().await.unwrap();
        server.wait().await.unwrap();
    }

    #[tokio::test]
    async fn server_hang_up_closes_session() {
        let mut server = MockDeckServer::new().await.unwrap();
        server.greeting(GREETING);
        server.start();

        let (host, port) = server.addr().rsplit_once(':').unwrap();
        let deck = HyperDeckBuilder::new()
            .host(host)
            .port(port.parse().unwrap())
            .query_device_info(false)
            .poll_interval(Duration::from_millis(20))
            .build()
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(2), deck.closed())
            .await
            .expect("session did not close after hang-up");
        assert_eq!(deck.session_state(), SessionState::Closed);
        assert_eq!(deck.identity().await.model.as_deref(), Some("HyperDeck Studio Mini"));
        assert!(matches!(
            deck.send_command("play").await,
            Err(Error::SessionClosed)
        ));

        server.wait().await.unwrap();
    }

    #[tokio::test]
    async fn connect_refused_is_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = HyperDeckBuilder::new()
            .host("127.0.0.1")
            .port(port)
            .build()
            .await;
        assert!(matches!(result, Err(Error::Transport(_))));
    }
}
