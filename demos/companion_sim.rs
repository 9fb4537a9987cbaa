//! Companion simulator - host loop against a simulated companion chip.
//!
//! This example demonstrates:
//! - Building and initializing a [`ProtocolEngine`] with the `AT`/`OK` handshake
//! - Polling commands with a deadline and dispatching them through a
//!   [`CommandRouter`]
//! - Publishing a `cpu_temperature` reading every cycle
//!
//! The companion chip is a task on the other end of an in-memory duplex
//! stream. It plays a short operator script and prints every telemetry line
//! it receives.
//!
//! # Running
//!
//! ```text
//! RUST_LOG=companion_link=debug cargo run --example companion_sim
//! ```

use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use companion_link::handler::CommandRouter;
use companion_link::transport::StreamTransport;
use companion_link::{Deadline, EngineConfig, LinkError, ProtocolEngine};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tracing_subscriber::EnvFilter;

const CYCLES: u32 = 6;

/// Operator console script played by the companion chip.
const SCRIPT: &[&[u8]] = &[
    b"set_red_led on\r\n",
    b"set_led_frequency 4\r\n",
    b"set_red_led\r\n",
    b"open_pod_bay_doors please\r\n",
    b"set_red_led blink\r\n",
    b"set_red_led off\r\n",
];

/// Board state the command handlers drive.
#[derive(Default)]
struct Board {
    red_led: AtomicBool,
    led_frequency: AtomicU16,
}

/// Simulated board sensor.
fn cpu_temperature(cycle: u32) -> f64 {
    38.0 + f64::from(cycle) * 0.735
}

async fn companion_chip(stream: DuplexStream) -> std::io::Result<()> {
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut lines = BufReader::new(read_half).lines();

    if let Some(probe) = lines.next_line().await? {
        println!("[chip] <- {probe}");
        write_half.write_all(b"OK\r\n").await?;
    }

    for line in SCRIPT {
        write_half.write_all(line).await?;
        match lines.next_line().await? {
            Some(telemetry) => println!("[chip] <- {telemetry}"),
            None => return Ok(()),
        }
    }

    // Drain until the host hangs up.
    while let Some(telemetry) = lines.next_line().await? {
        println!("[chip] <- {telemetry}");
    }
    Ok(())
}

fn build_router(board: Arc<Board>) -> CommandRouter {
    let mut router = CommandRouter::new();

    let freq_board = board.clone();
    router.route("set_led_frequency", move |param| {
        let hz = param
            .unwrap_or_default()
            .trim()
            .parse::<u16>()
            .map_err(|e| e.to_string())?;
        freq_board.led_frequency.store(hz, Ordering::Relaxed);
        Ok(())
    });

    router.route("set_red_led", move |param| {
        match param {
            Some(p) if p.starts_with("on") => board.red_led.store(true, Ordering::Relaxed),
            Some(p) if p.starts_with("off") => board.red_led.store(false, Ordering::Relaxed),
            _ => return Err("expected on or off".into()),
        }
        Ok(())
    });

    router
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("companion_link=info")),
        )
        .init();

    let (host, chip) = tokio::io::duplex(512);
    let chip_task = tokio::spawn(companion_chip(chip));

    let config = EngineConfig::builder()
        .handshake_timeout(Duration::from_secs(1))
        .build()?;
    let mut engine = ProtocolEngine::builder(StreamTransport::new(host))
        .config(config)
        .init()
        .await?;

    let board = Arc::new(Board::default());
    let router = build_router(board.clone());

    for cycle in 0..CYCLES {
        match engine
            .poll_command(Deadline::after(Duration::from_millis(500)))
            .await
        {
            Ok(cmd) => {
                println!("[host] {}", router.dispatch(&cmd));
                cmd.release();
            }
            Err(LinkError::Timeout) => println!("[host] no command this cycle"),
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => println!("[host] poll failed: {e}"),
        }

        engine
            .publish_telemetry("cpu_temperature", cpu_temperature(cycle))
            .await?;
    }

    println!(
        "[host] red led {}, led frequency {} Hz",
        if board.red_led.load(Ordering::Relaxed) { "on" } else { "off" },
        board.led_frequency.load(Ordering::Relaxed)
    );
    println!("[host] {:?}", engine.stats());

    engine.shutdown().await?;
    chip_task.await??;
    Ok(())
}
