// decklib test application -- CLI tool for exercising the HyperDeck client
// against a real deck or a scripted mock transport.
//
// Usage:
//   deck-test-app --host 192.168.1.50 info
//   deck-test-app --host 192.168.1.50 slots
//   deck-test-app --host 192.168.1.50 monitor --duration 60
//   deck-test-app --host 192.168.1.50 send "transport info"
//   deck-test-app --mock slots

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use decklib_core::DeckEvent;
use decklib_hyperdeck::{HyperDeckBuilder, HyperDeckClient, SlotStatus};
use decklib_test_harness::MockTransport;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// decklib test application -- talks to a HyperDeck from the command line.
#[derive(Parser)]
#[command(name = "deck-test-app", version, about)]
struct Cli {
    /// Deck IP address or hostname. Required unless --mock is used.
    #[arg(long)]
    host: Option<String>,

    /// Control port.
    #[arg(long, default_value_t = 9993)]
    port: u16,

    /// Command reply timeout in milliseconds.
    #[arg(long, default_value_t = 2000)]
    timeout_ms: u64,

    /// How long to let slot discovery run before printing, in milliseconds.
    #[arg(long, default_value_t = 500)]
    settle_ms: u64,

    /// Use a scripted two-slot mock deck instead of a network connection.
    #[arg(long)]
    mock: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the device identity.
    Info,
    /// Print every slot and the total recording time remaining.
    Slots,
    /// Print deck events as they arrive.
    Monitor {
        /// Seconds to monitor (0 = until the deck hangs up).
        #[arg(long, default_value_t = 0)]
        duration: u64,
    },
    /// Send one raw command and print the reply.
    Send {
        /// Command text, e.g. "transport info".
        command: String,
    },
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

const MOCK_DEVICE_INFO: &[u8] = b"204 device info:\r\n\
protocol version: 1.11\r\n\
model: HyperDeck Studio Mini (mock)\r\n\
unique id: 000000000000\r\n\
slot count: 2\r\n\
software version: 7.0\r\n\
\r\n";

const MOCK_SLOT_1: &[u8] = b"202 slot info:\r\n\
slot id: 1\r\n\
status: mounted\r\n\
volume name: Media\r\n\
recording time: 5400\r\n\
video format: 1080p30\r\n\
\r\n";

const MOCK_SLOT_2: &[u8] = b"202 slot info:\r\n\
slot id: 2\r\n\
status: empty\r\n\
recording time: 0\r\n\
\r\n";

async fn connect(cli: &Cli) -> Result<HyperDeckClient> {
    let builder = HyperDeckBuilder::new()
        .port(cli.port)
        .command_timeout(Duration::from_millis(cli.timeout_ms));

    if cli.mock {
        let mock = MockTransport::new();
        mock.expect(b"device info\r\n", MOCK_DEVICE_INFO);
        mock.expect(b"slot info: slot id: 1\r\n", MOCK_SLOT_1);
        mock.expect(b"slot info: slot id: 2\r\n", MOCK_SLOT_2);
        let deck = builder
            .build_with_transport(Box::new(mock))
            .await
            .context("failed to start session on mock transport")?;
        println!("Connected (mock transport)");
        return Ok(deck);
    }

    let host = cli
        .host
        .as_deref()
        .context("--host is required when not using --mock")?;
    let deck = builder
        .host(host)
        .build()
        .await
        .with_context(|| format!("failed to connect to {}:{}", host, cli.port))?;
    println!("Connected to {}:{}", host, cli.port);
    Ok(deck)
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn cmd_info(deck: &HyperDeckClient) -> Result<()> {
    let identity = deck.identity().await;
    let show = |value: &Option<String>| value.clone().unwrap_or_else(|| "-".to_string());

    println!("Device:");
    println!("  Model:            {}", show(&identity.model));
    println!("  Protocol version: {}", show(&identity.protocol_version));
    println!("  Software version: {}", show(&identity.software_version));
    println!("  Unique id:        {}", show(&identity.unique_id));
    println!("  Slot count:       {}", identity.slot_count);
    Ok(())
}

async fn cmd_slots(deck: &HyperDeckClient) -> Result<()> {
    let slots = deck.slots().await;
    if slots.is_empty() {
        println!("No slots reported (yet).");
        return Ok(());
    }

    println!("{:<6} {:<10} {:<16} {:<10} {:>10}", "Slot", "Status", "Volume", "Format", "Remaining");
    for slot in &slots {
        let status = match slot.status {
            SlotStatus::Unknown => "?",
            other => other.as_str(),
        };
        println!(
            "{:<6} {:<10} {:<16} {:<10} {:>10}",
            slot.id,
            status,
            slot.volume_name.as_deref().unwrap_or("-"),
            slot.video_format.as_deref().unwrap_or("-"),
            format_duration(slot.recording_time_secs),
        );
    }
    println!(
        "Total recording time remaining: {}",
        format_duration(deck.total_remaining_secs().await)
    );
    Ok(())
}

async fn cmd_monitor(deck: &HyperDeckClient, duration_secs: u64) -> Result<()> {
    let mut event_rx = deck.subscribe();

    println!("Monitoring deck events (Ctrl-C to stop)...");

    let deadline = if duration_secs > 0 {
        Some(Instant::now() + Duration::from_secs(duration_secs))
    } else {
        None
    };

    loop {
        let timeout = match deadline {
            Some(dl) => {
                let remaining = dl.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    println!("Monitor duration elapsed.");
                    break;
                }
                remaining
            }
            None => Duration::from_secs(3600),
        };

        match tokio::time::timeout(timeout, event_rx.recv()).await {
            Ok(Ok(DeckEvent::Disconnected)) => {
                println!("Deck disconnected.");
                break;
            }
            Ok(Ok(event)) => {
                println!("[event] {event:?}");
            }
            Ok(Err(tokio::sync::broadcast::error::RecvError::Lagged(n))) => {
                println!("[warning] missed {n} events (consumer too slow)");
            }
            Ok(Err(tokio::sync::broadcast::error::RecvError::Closed)) => {
                println!("Event channel closed.");
                break;
            }
            Err(_) => {
                if deadline.is_some() {
                    println!("Monitor duration elapsed.");
                }
                break;
            }
        }
    }

    Ok(())
}

async fn cmd_send(deck: &HyperDeckClient, command: &str) -> Result<()> {
    let reply = deck
        .send_command(command)
        .await
        .with_context(|| format!("command {:?} failed", command))?;

    println!("{} {}", reply.code, reply.label);
    for line in &reply.body {
        println!("  {}", line);
    }
    Ok(())
}

fn format_duration(secs: u64) -> String {
    format!("{}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let deck = connect(&cli).await?;

    // Let the startup device info and slot queries complete.
    tokio::time::sleep(Duration::from_millis(cli.settle_ms)).await;

    let result = match &cli.command {
        Command::Info => cmd_info(&deck).await,
        Command::Slots => cmd_slots(&deck).await,
        Command::Monitor { duration } => cmd_monitor(&deck, *duration).await,
        Command::Send { command } => cmd_send(&deck, command).await,
    };

    deck.close().await.ok();
    result
}
