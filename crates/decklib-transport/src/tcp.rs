//! TCP transport for deck communication.
//!
//! [`TcpTransport`] implements the [`Transport`] trait over a single
//! persistent TCP connection. Decks speaking the HyperDeck Ethernet protocol
//! listen on port [`DEFAULT_PORT`] and greet the client with an asynchronous
//! connection info message as soon as the socket is accepted.
//!
//! Addresses may omit the port (`"deck.local"`, `"192.168.1.50"`, `"::1"`);
//! [`endpoint`] fills in [`DEFAULT_PORT`]. A host name that resolves to
//! several addresses is tried address by address within one timeout.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use decklib_core::error::{Error, Result};
use decklib_core::transport::Transport;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Well-known HyperDeck Ethernet control port.
pub const DEFAULT_PORT: u16 = 9993;

/// Default connection timeout (5 seconds).
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Normalise a deck address to `host:port`, adding [`DEFAULT_PORT`] when
/// the address has no port.
///
/// Bare IPv6 addresses are bracketed (`"::1"` becomes `"[::1]:9993"`).
pub fn endpoint(addr: &str) -> String {
    let addr = addr.trim();
    if addr.parse::<SocketAddr>().is_ok() {
        return addr.to_string();
    }
    if let Ok(ip) = addr.parse::<IpAddr>() {
        return SocketAddr::new(ip, DEFAULT_PORT).to_string();
    }
    if addr.starts_with('[') && addr.ends_with(']') {
        return format!("{}:{}", addr, DEFAULT_PORT);
    }
    match addr.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => addr.to_string(),
        _ => format!("{}:{}", addr, DEFAULT_PORT),
    }
}

/// TCP transport for deck communication.
///
/// The connection is established eagerly via [`connect`](TcpTransport::connect)
/// or [`connect_with_timeout`](TcpTransport::connect_with_timeout).
#[derive(Debug)]
pub struct TcpTransport {
    /// The underlying TCP stream, `None` after `close()` is called.
    stream: Option<TcpStream>,
    /// Normalised `host:port`, kept for log fields.
    addr: String,
    /// The peer address actually connected to.
    peer: SocketAddr,
    /// True while the bytes received so far end on a line terminator.
    at_line_end: bool,
}

impl TcpTransport {
    /// Connect to a deck using the default timeout.
    pub async fn connect(addr: &str) -> Result<Self> {
        Self::connect_with_timeout(addr, DEFAULT_CONNECT_TIMEOUT).await
    }

    /// Connect to a deck, giving up after `timeout`.
    ///
    /// `addr` is `host`, `host:port` or an IP address; the port defaults to
    /// [`DEFAULT_PORT`]. Every resolved address is tried in turn and the
    /// whole attempt, name lookup included, shares `timeout`.
    ///
    /// Returns [`Error::Timeout`] if no handshake completes in time and
    /// [`Error::Transport`] if the deck refuses the connection or the name
    /// does not resolve.
    pub async fn connect_with_timeout(addr: &str, timeout: Duration) -> Result<Self> {
        let addr = endpoint(addr);
        tracing::debug!(
            addr = %addr,
            timeout_ms = timeout.as_millis(),
            "Connecting to deck"
        );

        let (stream, peer) = tokio::time::timeout(timeout, connect_any(&addr))
            .await
            .map_err(|_| {
                tracing::error!(addr = %addr, "TCP connection timed out");
                Error::Timeout
            })??;

        // Commands are a few bytes each; don't let Nagle hold them back.
        if let Err(e) = stream.set_nodelay(true) {
            tracing::warn!(addr = %addr, error = %e, "Failed to set TCP_NODELAY");
        }

        tracing::info!(addr = %addr, peer = %peer, "TCP connection established");

        Ok(Self {
            stream: Some(stream),
            addr,
            peer,
            at_line_end: true,
        })
    }

    /// The normalised `host:port` this transport was opened with.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// The resolved address of the deck.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// True when the last bytes received did not finish a line, i.e. the
    /// deck stopped mid-message.
    pub fn mid_line(&self) -> bool {
        !self.at_line_end
    }
}

/// Resolve `addr` and connect to the first address that accepts.
async fn connect_any(addr: &str) -> Result<(TcpStream, SocketAddr)> {
    let candidates = tokio::net::lookup_host(addr).await.map_err(|e| {
        tracing::error!(addr = %addr, error = %e, "Address lookup failed");
        Error::Transport(format!("cannot resolve {}: {}", addr, e))
    })?;

    let mut last_error = None;
    for candidate in candidates {
        match TcpStream::connect(candidate).await {
            Ok(stream) => return Ok((stream, candidate)),
            Err(e) => {
                tracing::debug!(
                    addr = %addr,
                    candidate = %candidate,
                    error = %e,
                    "Connect attempt failed"
                );
                last_error = Some(e);
            }
        }
    }

    match last_error {
        Some(e) => {
            tracing::error!(addr = %addr, error = %e, "TCP connection failed");
            Err(map_connect_error(e, addr))
        }
        None => Err(Error::Transport(format!("no address for {}", addr))),
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;

        tracing::trace!(addr = %self.addr, bytes = data.len(), "Sending data");

        stream.write_all(data).await.map_err(|e| {
            tracing::error!(addr = %self.addr, error = %e, "Failed to send data");
            map_io_error(e)
        })?;
        stream.flush().await.map_err(|e| {
            tracing::error!(addr = %self.addr, error = %e, "Failed to flush TCP stream");
            map_io_error(e)
        })?;

        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;

        match tokio::time::timeout(timeout, stream.read(buf)).await {
            Ok(Ok(0)) => {
                if self.at_line_end {
                    tracing::info!(addr = %self.addr, "Deck closed connection");
                } else {
                    tracing::warn!(
                        addr = %self.addr,
                        "Deck closed connection mid-line, partial message dropped"
                    );
                }
                Err(Error::ConnectionLost)
            }
            Ok(Ok(n)) => {
                self.at_line_end = buf[n - 1] == b'\n';
                tracing::trace!(addr = %self.addr, bytes = n, "Received data");
                Ok(n)
            }
            Ok(Err(e)) => {
                tracing::error!(addr = %self.addr, error = %e, "Failed to receive data");
                Err(map_io_error(e))
            }
            Err(_) => Err(Error::Timeout),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                tracing::warn!(addr = %self.addr, error = %e, "Failed to shut down TCP stream");
            }
            tracing::debug!(addr = %self.addr, "TCP connection closed");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}

fn map_connect_error(e: std::io::Error, addr: &str) -> Error {
    match e.kind() {
        std::io::ErrorKind::ConnectionRefused => {
            Error::Transport(format!("connection refused: {}", addr))
        }
        _ => Error::Io(e),
    }
}

/// A reset or broken pipe means the deck went away.
fn map_io_error(e: std::io::Error) -> Error {
    match e.kind() {
        std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::NotConnected
        | std::io::ErrorKind::ConnectionAborted
        | std::io::ErrorKind::UnexpectedEof => Error::ConnectionLost,
        _ => Error::Io(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn deck_listener() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        (listener, addr)
    }

    /// Serve one connection that writes `chunks` and then hangs up.
    fn serve_then_hang_up(
        listener: TcpListener,
        chunks: &'static [&'static str],
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            for chunk in chunks {
                stream.write_all(chunk.as_bytes()).await.unwrap();
                stream.flush().await.unwrap();
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
    }

    async fn read_until_lost(transport: &mut TcpTransport) -> Vec<u8> {
        let mut received = Vec::new();
        let mut buf = [0u8; 64];
        loop {
            match transport.receive(&mut buf, Duration::from_secs(2)).await {
                Ok(n) => received.extend_from_slice(&buf[..n]),
                Err(Error::ConnectionLost) => return received,
                Err(e) => panic!("unexpected error: {:?}", e),
            }
        }
    }

    #[test]
    fn endpoint_adds_default_port() {
        assert_eq!(endpoint("deck.local"), "deck.local:9993");
        assert_eq!(endpoint("192.168.1.50"), "192.168.1.50:9993");
        assert_eq!(endpoint("::1"), "[::1]:9993");
        assert_eq!(endpoint("[fe80::1]"), "[fe80::1]:9993");
        assert_eq!(endpoint(" deck.local "), "deck.local:9993");
    }

    #[test]
    fn endpoint_keeps_explicit_port() {
        assert_eq!(endpoint("deck.local:9000"), "deck.local:9000");
        assert_eq!(endpoint("192.168.1.50:9993"), "192.168.1.50:9993");
        assert_eq!(endpoint("[::1]:9000"), "[::1]:9000");
    }

    #[tokio::test]
    async fn command_and_reply_round_trip() {
        let (listener, addr) = deck_listener().await;

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let n = stream.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"device info\r\n");
            stream.write_all(b"200 ok\r\n").await.unwrap();
            stream.flush().await.unwrap();
        });

        let mut transport = TcpTransport::connect(&addr).await.unwrap();
        assert!(transport.is_connected());
        assert_eq!(transport.addr(), addr);
        assert_eq!(transport.peer().to_string(), addr);

        transport.send(b"device info\r\n").await.unwrap();

        let mut buf = [0u8; 64];
        let n = transport
            .receive(&mut buf, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(&buf[..n], b"200 ok\r\n");

        transport.close().await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn host_name_resolves_to_listener() {
        let (listener, _) = deck_listener().await;
        let port = listener.local_addr().unwrap().port();
        let server = serve_then_hang_up(listener, &["500 connection info:\r\n\r\n"]);

        let mut transport = TcpTransport::connect(&format!("localhost:{}", port))
            .await
            .unwrap();
        assert_eq!(transport.peer().port(), port);
        assert_eq!(read_until_lost(&mut transport).await, b"500 connection info:\r\n\r\n");
        assert!(!transport.mid_line());

        server.await.unwrap();
    }

    #[tokio::test]
    async fn connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        match TcpTransport::connect(&addr).await {
            Err(Error::Transport(msg)) => assert!(msg.contains("connection refused"), "{msg}"),
            other => panic!("expected Transport error, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn unresolvable_host_is_transport_error() {
        let result =
            TcpTransport::connect_with_timeout("no-such-deck.invalid", Duration::from_secs(2)).await;
        assert!(
            matches!(result, Err(Error::Transport(_)) | Err(Error::Timeout)),
            "got: {:?}",
            result
        );
    }

    #[tokio::test]
    async fn receive_timeout() {
        let (listener, addr) = deck_listener().await;

        let server = tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let mut transport = TcpTransport::connect(&addr).await.unwrap();
        let mut buf = [0u8; 64];
        let result = transport
            .receive(&mut buf, Duration::from_millis(100))
            .await;
        assert!(matches!(result, Err(Error::Timeout)));

        transport.close().await.unwrap();
        server.abort();
    }

    #[tokio::test]
    async fn clean_hang_up_is_connection_lost() {
        let (listener, addr) = deck_listener().await;
        let server = serve_then_hang_up(listener, &["200 ok\r\n"]);

        let mut transport = TcpTransport::connect(&addr).await.unwrap();
        assert_eq!(read_until_lost(&mut transport).await, b"200 ok\r\n");
        assert!(!transport.mid_line());

        server.await.unwrap();
    }

    #[tokio::test]
    async fn hang_up_mid_message_is_flagged() {
        let (listener, addr) = deck_listener().await;
        let server = serve_then_hang_up(
            listener,
            &["502 slot info:\r\nslot id: 1\r\n", "recording ti"],
        );

        let mut transport = TcpTransport::connect(&addr).await.unwrap();
        let received = read_until_lost(&mut transport).await;
        assert!(received.ends_with(b"recording ti"));
        assert!(transport.mid_line());

        server.await.unwrap();
    }

    #[tokio::test]
    async fn send_and_receive_after_close_return_not_connected() {
        let (listener, addr) = deck_listener().await;

        let server = tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let mut transport = TcpTransport::connect(&addr).await.unwrap();
        transport.close().await.unwrap();
        assert!(!transport.is_connected());

        assert!(matches!(
            transport.send(b"device info\r\n").await,
            Err(Error::NotConnected)
        ));
        let mut buf = [0u8; 64];
        assert!(matches!(
            transport.receive(&mut buf, Duration::from_millis(50)).await,
            Err(Error::NotConnected)
        ));

        // Closing twice is a no-op.
        transport.close().await.unwrap();
        server.abort();
    }
}
