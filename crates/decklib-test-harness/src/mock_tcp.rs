//! Scripted TCP deck for end-to-end testing.
//!
//! [`MockDeckServer`] listens on a random localhost port, accepts a single
//! client, optionally writes a greeting (real decks open with an
//! asynchronous `500 connection info:` message), and then answers scripted
//! commands in order. When the script is exhausted it can either hang up or
//! keep the connection open.
//!
//! # Example
//!
//! ```
//! use decklib_test_harness::MockDeckServer;
//!
//! # async fn example() -> decklib_core::Result<()> {
//! let mut server = MockDeckServer::new().await?;
//! server.greeting(b"500 connection info:\r\nprotocol version: 1.11\r\nmodel: HyperDeck Studio\r\n\r\n");
//! server.expect(b"device info\r\n", b"204 device info:\r\nslot count: 2\r\n\r\n");
//! server.start();
//! let addr = server.addr().to_string();
//! // ... connect a client to `addr` ...
//! # Ok(())
//! # }
//! ```

use std::collections::VecDeque;
use std::time::Duration;

use decklib_core::error::{Error, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
struct TcpExpectation {
    /// The exact bytes the client is expected to send.
    request: Vec<u8>,
    /// The bytes written back once the request has been read.
    response: Vec<u8>,
}

/// A scripted deck reachable over TCP.
pub struct MockDeckServer {
    addr: String,
    /// Held from `new()` until `start()` moves it into the server task.
    listener: Option<TcpListener>,
    greeting: Option<Vec<u8>>,
    expectations: VecDeque<TcpExpectation>,
    /// How long to keep the socket open after the script has run.
    linger: Duration,
    server_handle: Option<JoinHandle<std::result::Result<(), String>>>,
}

impl MockDeckServer {
    /// Bind a new server on a random localhost port.
    ///
    /// The listener is bound immediately, so clients may connect as soon as
    /// this returns; the connection is accepted once [`start`](Self::start)
    /// runs.
    pub async fn new() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| Error::Transport(format!("failed to bind mock deck: {}", e)))?;
        let addr = listener.local_addr().map_err(Error::Io)?.to_string();

        Ok(Self {
            addr,
            listener: Some(listener),
            greeting: None,
            expectations: VecDeque::new(),
            linger: Duration::ZERO,
            server_handle: None,
        })
    }

    /// Bytes written to the client right after the connection is accepted.
    pub fn greeting(&mut self, data: &[u8]) {
        self.greeting = Some(data.to_vec());
    }

    /// Add a scripted command/reply pair. Pairs are consumed in order.
    pub fn expect(&mut self, request: &[u8], response: &[u8]) {
        self.expectations.push_back(TcpExpectation {
            request: request.to_vec(),
            response: response.to_vec(),
        });
    }

    /// Keep the connection open for `linger` after the script completes
    /// (default: hang up immediately).
    pub fn linger(&mut self, linger: Duration) {
        self.linger = linger;
    }

    /// The `host:port` address the server is listening on.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Spawn the server task: accept one client and run the script.
    ///
    /// Calling `start` more than once has no effect.
    pub fn start(&mut self) {
        let Some(listener) = self.listener.take() else {
            return;
        };
        let greeting = self.greeting.take();
        let expectations: Vec<TcpExpectation> = self.expectations.drain(..).collect();
        let linger = self.linger;

        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener
                .accept()
                .await
                .map_err(|e| format!("failed to accept connection: {}", e))?;

            if let Some(greeting) = greeting {
                write_reply(&mut stream, &greeting, "greeting").await?;
            }

            for (i, expectation) in expectations.iter().enumerate() {
                let mut buf = vec![0u8; expectation.request.len()];
                stream.read_exact(&mut buf).await.map_err(|e| {
                    format!(
                        "expectation {}: client went away before sending {:?}: {}",
                        i,
                        String::from_utf8_lossy(&expectation.request),
                        e
                    )
                })?;

                if buf != expectation.request {
                    return Err(format!(
                        "expectation {}: request mismatch: expected {:?}, got {:?}",
                        i,
                        String::from_utf8_lossy(&expectation.request),
                        String::from_utf8_lossy(&buf)
                    ));
                }

                write_reply(&mut stream, &expectation.response, "reply").await?;
            }

            if !linger.is_zero() {
                tokio::time::sleep(linger).await;
            }
            Ok(())
        });

        self.server_handle = Some(handle);
    }

    /// Wait for the server task to finish and report any script violation.
    pub async fn wait(self) -> std::result::Result<(), String> {
        match self.server_handle {
            Some(handle) => handle
                .await
                .map_err(|e| format!("server task panicked: {}", e))?,
            None => Ok(()),
        }
    }
}

async fn write_reply(
    stream: &mut TcpStream,
    data: &[u8],
    what: &str,
) -> std::result::Result<(), String> {
    stream
        .write_all(data)
        .await
        .map_err(|e| format!("{} write error: {}", what, e))?;
    stream
        .flush()
        .await
        .map_err(|e| format!("{} flush error: {}", what, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn greets_then_answers_script() {
        let mut server = MockDeckServer::new().await.unwrap();
        server.greeting(b"500 connection info:\r\n\r\n");
        server.expect(b"device info\r\n", b"200 ok\r\n");
        server.start();

        let mut client = TcpStream::connect(server.addr()).await.unwrap();

        let mut greeting = [0u8; 24];
        client.read_exact(&mut greeting).await.unwrap();
        assert_eq!(&greeting, b"500 connection info:\r\n\r\n");

        client.write_all(b"device info\r\n").await.unwrap();
        let mut reply = [0u8; 8];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"200 ok\r\n");

        server.wait().await.unwrap();
    }

    #[tokio::test]
    async fn reports_mismatched_request() {
        let mut server = MockDeckServer::new().await.unwrap();
        server.expect(b"device info\r\n", b"200 ok\r\n");
        server.start();

        let mut client = TcpStream::connect(server.addr()).await.unwrap();
        client.write_all(b"slot select\r\n").await.unwrap();

        let err = server.wait().await.unwrap_err();
        assert!(err.contains("request mismatch"), "{err}");
    }

    #[tokio::test]
    async fn hangs_up_after_script() {
        let mut server = MockDeckServer::new().await.unwrap();
        server.start();

        let mut client = TcpStream::connect(server.addr()).await.unwrap();
        let mut buf = [0u8; 8];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);

        server.wait().await.unwrap();
    }
}
