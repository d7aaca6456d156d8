//! HyperDeck protocol client.
//!
//! [`HyperDeckClient`] owns one session with a deck. A single background IO
//! task owns the transport: it writes commands in submission order, frames
//! and dispatches everything the deck sends, and keeps the cached
//! [`DeviceState`] current. Callers read snapshots of that state and submit
//! commands through a channel, so writes never interleave.
//!
//! # Lifecycle
//!
//! ```text
//! Connecting --spawn IO task--> Running --close() / transport failure--> Closed
//! ```
//!
//! On entering `Running` the client sends `device info`. The reply creates
//! the slot table and the IO task queries every new slot with
//! `slot info: slot id: N`, in id order. After that the deck pushes slot
//! changes asynchronously.
//!
//! # Reply correlation
//!
//! The deck answers every command with exactly one 1xx or 2xx message, in
//! command order, and interleaves 5xx notifications freely. The IO task
//! keeps one FIFO entry per written command; each 1xx/2xx message completes
//! the oldest entry.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use decklib_core::error::{Error, Result};
use decklib_core::events::DeckEvent;
use decklib_core::transport::Transport;
use decklib_transport::TcpTransport;

use crate::codec::{self, Message};
use crate::dispatch::{self, Outcome};
use crate::framer::LineFramer;
use crate::state::{DeviceIdentity, DeviceState, Slot};

/// Default command timeout (2 seconds).
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

/// Default TCP connect timeout (5 seconds).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default transport poll interval (100 ms).
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Broadcast channel capacity for DeckEvent subscribers.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Capacity of the command channel into the IO task.
const REQUEST_CHANNEL_CAPACITY: usize = 32;

/// Size of a single transport read.
const READ_CHUNK: usize = 1024;

/// Options for a HyperDeck session.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// How long [`HyperDeckClient::send_command`] waits for the reply.
    pub command_timeout: Duration,
    /// TCP connect timeout, used by [`HyperDeckClient::connect`].
    pub connect_timeout: Duration,
    /// How long one transport read may block before the IO task looks at
    /// its command queue again.
    pub poll_interval: Duration,
    /// Send `device info` as soon as the session is running.
    pub query_device_info: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            query_device_info: true,
        }
    }
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Transport open, IO task not yet started.
    Connecting,
    /// IO task running; commands are accepted.
    Running,
    /// Terminal. Commands fail with [`Error::SessionClosed`].
    Closed,
}

/// Reply slot for one written command. `None` when nobody awaits the reply.
type PendingReply = Option<oneshot::Sender<Result<Message>>>;

/// A command submitted to the IO task.
struct CommandRequest {
    /// Command text, for log fields.
    command: String,
    /// Encoded line including CRLF.
    line: Vec<u8>,
    reply: PendingReply,
    /// Completed once the line has been written (or failed to be).
    written: oneshot::Sender<Result<()>>,
}

/// Client for one HyperDeck session.
pub struct HyperDeckClient {
    requests: mpsc::Sender<CommandRequest>,
    state: Arc<Mutex<DeviceState>>,
    session: Arc<watch::Sender<SessionState>>,
    event_tx: broadcast::Sender<DeckEvent>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    options: ClientOptions,
}

impl HyperDeckClient {
    /// Connect to a deck at `addr` (`host` or `host:port`, port 9993 by
    /// default) and start the session.
    pub async fn connect(addr: &str, options: ClientOptions) -> Result<Self> {
        let transport = TcpTransport::connect_with_timeout(addr, options.connect_timeout).await?;
        Self::from_transport(Box::new(transport), options).await
    }

    /// Start a session over an already-open transport.
    pub async fn from_transport(transport: Box<dyn Transport>, options: ClientOptions) -> Result<Self> {
        if !transport.is_connected() {
            return Err(Error::NotConnected);
        }

        let (session_tx, _) = watch::channel(SessionState::Connecting);
        let session = Arc::new(session_tx);
        let state = Arc::new(Mutex::new(DeviceState::new()));
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (request_tx, request_rx) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        let io = IoSession {
            state: Arc::clone(&state),
            event_tx: event_tx.clone(),
            pending: VecDeque::new(),
        };
        let task = tokio::spawn(io_loop(
            transport,
            request_rx,
            io,
            cancel.clone(),
            options.poll_interval,
            Arc::clone(&session),
        ));

        let client = Self {
            requests: request_tx,
            state,
            session,
            event_tx,
            cancel,
            task: Mutex::new(Some(task)),
            options,
        };

        // The IO task may already have failed; Closed is terminal.
        let entered = client.session.send_if_modified(|state| {
            if *state == SessionState::Connecting {
                *state = SessionState::Running;
                true
            } else {
                false
            }
        });
        if entered {
            debug!("HyperDeck session running");
            let _ = client.event_tx.send(DeckEvent::Connected);
        }

        if client.options.query_device_info {
            client.send_command_no_wait(&codec::cmd_device_info()).await?;
        }

        Ok(client)
    }

    // -----------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------

    /// Write a command and return once it is on the wire.
    ///
    /// The reply is still dispatched (a `slot info` reply updates the
    /// state), but nobody waits for it.
    pub async fn send_command_no_wait(&self, command: &str) -> Result<()> {
        self.submit(command, None).await
    }

    /// Write a command and wait for its reply.
    ///
    /// A 1xx reply is returned as [`Error::CommandFailed`]. The reply is
    /// dispatched to the state like any other message before it is returned.
    pub async fn send_command(&self, command: &str) -> Result<Message> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.submit(command, Some(reply_tx)).await?;

        match tokio::time::timeout(self.options.command_timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::ConnectionLost),
            Err(_) => {
                warn!(command = %command, "Timed out waiting for reply");
                Err(Error::Timeout)
            }
        }
    }

    async fn submit(&self, command: &str, reply: PendingReply) -> Result<()> {
        if self.session_state() == SessionState::Closed {
            return Err(Error::SessionClosed);
        }
        let line = codec::encode_command(command)?;

        let (written_tx, written_rx) = oneshot::channel();
        self.requests
            .send(CommandRequest {
                command: command.to_string(),
                line,
                reply,
                written: written_tx,
            })
            .await
            .map_err(|_| Error::SessionClosed)?;

        written_rx.await.map_err(|_| Error::SessionClosed)?
    }

    /// Stop the session: cancel the IO task, wait for it and close the
    /// transport. Calling `close` again is a no-op.
    pub async fn close(&self) -> Result<()> {
        debug!("Closing HyperDeck session");
        self.cancel.cancel();

        // Held across the join so a concurrent caller returns only after
        // the task has finished.
        let mut task = self.task.lock().await;
        let joined = match task.take() {
            Some(handle) => handle
                .await
                .map_err(|e| Error::Transport(format!("IO task failed: {}", e))),
            None => Ok(()),
        };

        self.session.send_replace(SessionState::Closed);
        drop(task);
        joined
    }

    // -----------------------------------------------------------------
    // State snapshots
    // -----------------------------------------------------------------

    /// A copy of the whole cached state.
    pub async fn state(&self) -> DeviceState {
        self.state.lock().await.clone()
    }

    pub async fn identity(&self) -> DeviceIdentity {
        self.state.lock().await.identity().clone()
    }

    /// All slots, in id order.
    pub async fn slots(&self) -> Vec<Slot> {
        self.state.lock().await.slots().values().cloned().collect()
    }

    pub async fn slot(&self, id: u32) -> Option<Slot> {
        self.state.lock().await.slot(id).cloned()
    }

    /// Recording time remaining across all slots, in seconds.
    pub async fn total_remaining_secs(&self) -> u64 {
        self.state.lock().await.total_remaining_secs()
    }

    // -----------------------------------------------------------------
    // Session and events
    // -----------------------------------------------------------------

    pub fn session_state(&self) -> SessionState {
        *self.session.borrow()
    }

    /// A receiver that observes every session state change.
    pub fn watch_session(&self) -> watch::Receiver<SessionState> {
        self.session.subscribe()
    }

    /// Wait until the session is closed, by the caller or by the deck.
    pub async fn closed(&self) {
        let mut rx = self.session.subscribe();
        let _ = rx.wait_for(|state| *state == SessionState::Closed).await;
    }

    /// Subscribe to deck events.
    pub fn subscribe(&self) -> broadcast::Receiver<DeckEvent> {
        self.event_tx.subscribe()
    }
}

// ---------------------------------------------------------------------------
// IO task
// ---------------------------------------------------------------------------

/// State owned by the IO task.
struct IoSession {
    state: Arc<Mutex<DeviceState>>,
    event_tx: broadcast::Sender<DeckEvent>,
    /// One entry per written command, oldest first.
    pending: VecDeque<PendingReply>,
}

/// The IO loop. Runs as a spawned Tokio task.
///
/// Uses `tokio::select! { biased; }` to prioritize:
/// 1. Cancellation
/// 2. Command writes
/// 3. Reading and dispatching deck output
///
/// Any transport failure ends the loop. On exit the transport is closed,
/// outstanding replies are dropped and the session becomes `Closed`.
async fn io_loop(
    mut transport: Box<dyn Transport>,
    mut requests: mpsc::Receiver<CommandRequest>,
    mut io: IoSession,
    cancel: CancellationToken,
    poll_interval: Duration,
    session: Arc<watch::Sender<SessionState>>,
) {
    let mut framer = LineFramer::new();
    let mut buf = [0u8; READ_CHUNK];

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("HyperDeck IO task cancelled");
                break;
            }

            req = requests.recv() => {
                match req {
                    Some(req) => {
                        if let Err(e) = io.write_command(&mut *transport, req).await {
                            error!(error = %e, "Command write failed, closing session");
                            break;
                        }
                    }
                    None => {
                        debug!("Command channel closed, exiting IO task");
                        break;
                    }
                }
            }

            result = transport.receive(&mut buf, poll_interval) => {
                match result {
                    Ok(n) => {
                        if let Err(e) = io.process_bytes(&buf[..n], &mut framer, &mut *transport).await {
                            error!(error = %e, "Slot query failed, closing session");
                            break;
                        }
                    }
                    Err(Error::Timeout) => {}
                    Err(Error::ConnectionLost) => {
                        debug!("Deck closed the connection");
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, "Transport read failed, closing session");
                        break;
                    }
                }
            }
        }
    }

    let outstanding = io.pending.len();
    io.pending.clear();
    if framer.buffered() > 0 {
        trace!(bytes = framer.buffered(), "Discarding partial message");
    }
    if let Err(e) = transport.close().await {
        warn!(error = %e, "Failed to close transport");
    }

    session.send_replace(SessionState::Closed);
    io.emit(DeckEvent::Disconnected);
    debug!(outstanding, "HyperDeck IO task stopped");
}

impl IoSession {
    /// Write one caller command. Only fatal transport errors are returned;
    /// anything else goes back to the caller.
    async fn write_command(
        &mut self,
        transport: &mut dyn Transport,
        request: CommandRequest,
    ) -> Result<()> {
        let CommandRequest {
            command,
            line,
            reply,
            written,
        } = request;

        trace!(command = %command, "Sending command");
        match transport.send(&line).await {
            Ok(()) => {
                self.pending.push_back(reply);
                let _ = written.send(Ok(()));
                Ok(())
            }
            Err(e) if e.is_fatal() => {
                let _ = written.send(Err(Error::ConnectionLost));
                Err(e)
            }
            Err(e) => {
                warn!(command = %command, error = %e, "Command rejected by transport");
                let _ = written.send(Err(e));
                Ok(())
            }
        }
    }

    /// Query each newly created slot, in id order.
    async fn query_slots(&mut self, transport: &mut dyn Transport, ids: &[u32]) -> Result<()> {
        for &slot_id in ids {
            let command = codec::cmd_slot_info(slot_id);
            let sent = match codec::encode_command(&command) {
                Ok(line) => transport.send(&line).await,
                Err(e) => Err(e),
            };
            match sent {
                Ok(()) => {
                    trace!(slot_id, "Slot info query sent");
                    self.pending.push_back(None);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!(slot_id, error = %e, "Slot info query not sent"),
            }
        }
        Ok(())
    }

    /// Feed received bytes and dispatch every complete message.
    async fn process_bytes(
        &mut self,
        data: &[u8],
        framer: &mut LineFramer,
        transport: &mut dyn Transport,
    ) -> Result<()> {
        if let Err(e) = framer.feed(data) {
            self.report(e, None);
        }

        while let Some(frame) = framer.next_frame() {
            match frame.and_then(Message::from_frame) {
                Ok(message) => self.handle_message(message, transport).await?,
                Err(e) => self.report(e, None),
            }
        }
        Ok(())
    }

    async fn handle_message(&mut self, message: Message, transport: &mut dyn Transport) -> Result<()> {
        trace!(
            code = message.code,
            label = %message.label,
            lines = message.body.len(),
            "Message received"
        );

        let outcome = match dispatch::decode(&message) {
            Ok(decoded) => {
                let mut state = self.state.lock().await;
                dispatch::apply(decoded, &mut state)
            }
            Err(e) => Err(e),
        };

        // Completed after the state update, so a caller that awaited this
        // reply already sees its effect.
        if message.is_reply() {
            self.complete_pending(&message);
        }

        match outcome {
            Ok(Outcome::DeviceInfo { new_slots }) => {
                if !new_slots.is_empty() {
                    debug!(slots = new_slots.len(), "Slots discovered");
                    self.query_slots(transport, &new_slots).await?;
                }
                self.emit(DeckEvent::DeviceInfoChanged);
            }
            Ok(Outcome::ConnectionInfo) => {
                debug!("Connection info received");
                self.emit(DeckEvent::DeviceInfoChanged);
            }
            Ok(Outcome::SlotInfo {
                slot_id,
                total_remaining_secs,
            }) => {
                debug!(slot_id, total_remaining_secs, "Slot updated");
                self.emit(DeckEvent::SlotChanged {
                    slot_id,
                    total_remaining_secs,
                });
            }
            Ok(Outcome::Reply { code, label }) => {
                self.emit(DeckEvent::Response { code, label });
            }
            Err(e) => self.report(e, Some(&message)),
        }
        Ok(())
    }

    /// Hand a 1xx/2xx message to the oldest outstanding command.
    fn complete_pending(&mut self, message: &Message) {
        match self.pending.pop_front() {
            Some(Some(reply)) => {
                let result = if message.is_failure() {
                    Err(Error::CommandFailed {
                        code: message.code,
                        label: message.label.clone(),
                    })
                } else {
                    Ok(message.clone())
                };
                // The caller may have timed out already.
                let _ = reply.send(result);
            }
            Some(None) => {}
            None => trace!(code = message.code, "Reply with no command outstanding"),
        }
    }

    /// Log and publish a non-fatal problem with one message.
    ///
    /// `message` is the framed message the problem belongs to, when framing
    /// got that far.
    fn report(&self, error: Error, message: Option<&Message>) {
        let event = match (error, message) {
            (Error::Unhandled { code, label }, _) => {
                debug!(code, label = %label, "Unhandled message discarded");
                DeckEvent::Unhandled { code, label }
            }
            (Error::UnknownSlot(slot_id), _) => {
                warn!(slot_id, "Slot info for unknown slot ignored");
                DeckEvent::UnknownSlot { slot_id }
            }
            (Error::Protocol(detail), Some(message)) => {
                warn!(
                    code = message.code,
                    label = %message.label,
                    detail = %detail,
                    "Skipping message with invalid field"
                );
                DeckEvent::DecodeError {
                    code: message.code,
                    label: message.label.clone(),
                    detail,
                }
            }
            (other, _) => {
                warn!(error = %other, "Skipping malformed message");
                DeckEvent::FramingError {
                    detail: other.to_string(),
                }
            }
        };
        self.emit(event);
    }

    fn emit(&self, event: DeckEvent) {
        // No subscribers is not an error.
        let _ = self.event_tx.send(event);
    }
}
