//! Integration tests for companion-link.
//!
//! These tests drive the engine end to end over real transports: an
//! in-memory duplex stream standing in for the companion chip, and a UART
//! driver whose completions are raised from a separate "interrupt" task.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use companion_link::config::{EngineConfig, SerialConfig};
use companion_link::handler::{CommandRouter, DispatchOutcome};
use companion_link::protocol::{parse_frame, FrameAssembler};
use companion_link::signal::{fault, UartEvents};
use companion_link::transport::{SerialDriver, StreamTransport, UartTransport};
use companion_link::{Deadline, LinkError, ProtocolEngine, SessionState};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

fn secs(n: u64) -> Deadline {
    Deadline::after(Duration::from_secs(n))
}

/// Commands survive any chunking of the byte stream, in order.
#[test]
fn test_commands_survive_arbitrary_chunking() {
    let commands = [
        ("set_red_led", Some("on")),
        ("reboot", None),
        ("set_led_frequency", Some("12")),
        ("say", Some("hello there")),
    ];

    let mut stream = Vec::new();
    for (i, (name, params)) in commands.iter().enumerate() {
        stream.extend_from_slice(name.as_bytes());
        if let Some(p) = params {
            stream.push(b' ');
            stream.extend_from_slice(p.as_bytes());
        }
        // Mix LF and CRLF endings.
        if i % 2 == 0 {
            stream.push(b'\r');
        }
        stream.push(b'\n');
    }

    for chunk in 1..=stream.len() {
        let mut assembler = FrameAssembler::new();
        let mut seen = Vec::new();

        for piece in stream.chunks(chunk) {
            for frame in assembler.feed(piece) {
                let frame = frame.expect("no overflow expected");
                let raw = parse_frame(&frame, 64).unwrap();
                seen.push((raw.name.to_string(), raw.parameters.map(str::to_string)));
            }
        }

        let expected: Vec<_> = commands
            .iter()
            .map(|(n, p)| (n.to_string(), p.map(str::to_string)))
            .collect();
        assert_eq!(seen, expected, "chunk size {chunk}");
        assert!(assembler.is_empty());
    }
}

/// Oversized frame followed by a valid one yields exactly that one command.
#[test]
fn test_overflow_resynchronizes() {
    let mut assembler = FrameAssembler::with_max_frame_len(32);
    let mut input = vec![b'#'; 100];
    input.extend_from_slice(b"\nreboot\n");

    let mut frames = Vec::new();
    let mut errors = 0;
    for piece in input.chunks(9) {
        for frame in assembler.feed(piece) {
            match frame {
                Ok(f) => frames.push(f),
                Err(e) => {
                    assert_eq!(e.discarded, 100);
                    errors += 1;
                }
            }
        }
    }

    assert_eq!(errors, 1);
    assert_eq!(frames.len(), 1);
    assert_eq!(&frames[0][..], b"reboot");
}

fn led_router() -> CommandRouter {
    let mut router = CommandRouter::new();
    router
        .route("set_led_frequency", |param| {
            param
                .unwrap_or_default()
                .parse::<u16>()
                .map(|_| ())
                .map_err(|e| e.to_string())
        })
        .route("set_red_led", |param| match param {
            Some("on") | Some("off") => Ok(()),
            _ => Err("expected on or off".into()),
        });
    router
}

#[tokio::test]
async fn test_engine_over_duplex_stream() {
    let (host, companion) = tokio::io::duplex(256);

    let chip = tokio::spawn(async move {
        let (read_half, mut write_half) = tokio::io::split(companion);
        let mut lines = BufReader::new(read_half).lines();

        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("AT"));
        write_half.write_all(b"OK\r\n").await.unwrap();

        // One command split across writes, then two in one write.
        write_half.write_all(b"set_red").await.unwrap();
        write_half.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        write_half
            .write_all(b"_led on\r\nset_led_frequency\nself_destruct now\n")
            .await
            .unwrap();

        let telemetry = lines.next_line().await.unwrap();
        // Host closed its end after shutdown.
        let eof = lines.next_line().await.unwrap();
        (telemetry, eof)
    });

    let mut engine = ProtocolEngine::builder(StreamTransport::new(host))
        .init()
        .await
        .unwrap();
    assert_eq!(engine.state(), SessionState::Ready);

    let router = led_router();
    let mut console = Vec::new();
    for _ in 0..3 {
        let cmd = engine.poll_command(secs(5)).await.unwrap();
        console.push(router.dispatch(&cmd).to_string());
        cmd.release();
    }

    assert_eq!(
        console,
        vec![
            "Command received: set_red_led, parameters: on",
            "ERROR: Command 'set_led_frequency' needs a parameter!",
            "ERROR: Unknown command received: self_destruct",
        ]
    );

    engine.publish_telemetry("cpu_temperature", 23.5).await.unwrap();

    let pool = engine.command_pool().clone();
    engine.shutdown().await.unwrap();
    assert_eq!(pool.outstanding(), 0);
    assert_eq!(pool.unreleased_drops(), 0);

    let (telemetry, eof) = chip.await.unwrap();
    assert_eq!(telemetry.as_deref(), Some("cpu_temperature=23.50"));
    assert_eq!(eof, None);
}

#[tokio::test]
async fn test_peer_disconnect_faults_session() {
    let (host, companion) = tokio::io::duplex(64);
    let mut engine = ProtocolEngine::builder(StreamTransport::new(host))
        .handshake(false)
        .init()
        .await
        .unwrap();

    drop(companion);

    let err = engine.poll_command(secs(1)).await.unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(engine.state(), SessionState::Faulted);
    assert!(matches!(
        engine.poll_command(secs(1)).await,
        Err(LinkError::Faulted(SessionState::Faulted))
    ));
}

// ============================================================================
// UART driver with interrupt-style completion
// ============================================================================

#[derive(Default)]
struct Wire {
    events: Option<Arc<UartEvents>>,
    armed: Option<usize>,
    to_host: Vec<u8>,
    from_host: Vec<u8>,
}

impl Wire {
    /// What the receive-complete interrupt does.
    fn rx_interrupt(&mut self, bytes: &[u8]) {
        self.to_host.extend_from_slice(bytes);
        if let (Some(max), Some(events)) = (self.armed, &self.events) {
            events.rx.signal(self.to_host.len().min(max));
        }
    }
}

struct SimUart {
    wire: Arc<Mutex<Wire>>,
}

impl SerialDriver for SimUart {
    fn open(&mut self, config: &SerialConfig, events: Arc<UartEvents>) -> bool {
        assert_eq!(config.baud_rate(), 115_200);
        self.wire.lock().unwrap().events = Some(events);
        true
    }

    fn start_write(&mut self, bytes: &[u8]) -> bool {
        let mut wire = self.wire.lock().unwrap();
        wire.from_host.extend_from_slice(bytes);
        // Transmit completes from the interrupt a little later.
        if let Some(events) = wire.events.clone() {
            let len = bytes.len();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(1)).await;
                events.tx.signal(len);
            });
        }
        true
    }

    fn start_read(&mut self, max_len: usize) -> bool {
        let mut wire = self.wire.lock().unwrap();
        wire.armed = Some(max_len);
        if !wire.to_host.is_empty() {
            if let Some(events) = &wire.events {
                events.rx.signal(wire.to_host.len().min(max_len));
            }
        }
        true
    }

    fn take_received(&mut self, buf: &mut [u8]) -> usize {
        let mut wire = self.wire.lock().unwrap();
        let n = buf.len().min(wire.to_host.len());
        buf[..n].copy_from_slice(&wire.to_host[..n]);
        wire.to_host.drain(..n);
        wire.armed = None;
        n
    }

    fn abort(&mut self) {
        self.wire.lock().unwrap().armed = None;
    }

    fn close(&mut self) -> bool {
        true
    }
}

fn sim_uart() -> (UartTransport<SimUart>, Arc<Mutex<Wire>>) {
    let wire = Arc::new(Mutex::new(Wire::default()));
    let uart = UartTransport::new(SimUart { wire: wire.clone() });
    (uart, wire)
}

/// Companion chip behind the UART: acknowledges the probe, then sends a
/// command byte by byte.
fn spawn_chip(wire: Arc<Mutex<Wire>>) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_millis(1)).await;
            if wire.lock().unwrap().from_host.starts_with(b"AT\n") {
                break;
            }
        }
        wire.lock().unwrap().rx_interrupt(b"OK\n");

        for byte in b"set_led_frequency 4\n" {
            tokio::time::sleep(Duration::from_millis(2)).await;
            wire.lock().unwrap().rx_interrupt(&[*byte]);
        }
    });
}

#[tokio::test(start_paused = true)]
async fn test_engine_over_interrupt_driven_uart() {
    let (uart, wire) = sim_uart();
    spawn_chip(wire.clone());

    let mut engine = ProtocolEngine::builder(uart).init().await.unwrap();
    assert_eq!(engine.state(), SessionState::Ready);

    let cmd = engine.poll_command(secs(1)).await.unwrap();
    let outcome = led_router().dispatch(&cmd);
    cmd.release();
    assert!(matches!(outcome, DispatchOutcome::Handled { .. }));

    engine.publish_telemetry("cpu_temperature", -0.999).await.unwrap();
    assert!(wire
        .lock()
        .unwrap()
        .from_host
        .ends_with(b"cpu_temperature=-1.00\n"));

    engine.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_silent_uart_poll_returns_by_deadline() {
    let (uart, _wire) = sim_uart();
    let config = EngineConfig::builder().handshake(false).build().unwrap();
    let mut engine = ProtocolEngine::builder(uart).config(config).init().await.unwrap();

    let start = tokio::time::Instant::now();
    let err = engine
        .poll_command(Deadline::after(Duration::from_millis(250)))
        .await
        .unwrap_err();

    assert!(matches!(err, LinkError::Timeout));
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(250));
    assert!(elapsed < Duration::from_millis(260));
    assert_eq!(engine.state(), SessionState::Ready);
}

#[tokio::test(start_paused = true)]
async fn test_uart_device_removal_then_recover() {
    let (uart, wire) = sim_uart();
    let config = EngineConfig::builder().handshake(false).build().unwrap();
    let mut engine = ProtocolEngine::builder(uart).config(config).init().await.unwrap();

    let events = wire.lock().unwrap().events.clone().unwrap();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(3)).await;
        events.fault.signal(fault::DEVICE_REMOVED);
    });

    let err = engine.poll_command(secs(1)).await.unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(engine.state(), SessionState::Faulted);

    engine.recover().await.unwrap();
    assert_eq!(engine.state(), SessionState::Ready);

    wire.lock().unwrap().rx_interrupt(b"set_red_led off\n");
    let cmd = engine.poll_command(secs(1)).await.unwrap();
    assert_eq!(cmd.parameters(), Some("off"));
    cmd.release();
}
