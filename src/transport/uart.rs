//! UART adapter over an interrupt-driven serial driver.
//!
//! A [`SerialDriver`] only starts transfers and reports pass/fail. Completion
//! arrives later through the shared [`UartEvents`], raised from the driver's
//! interrupt handler. [`UartTransport`] turns that into bounded operations:
//! start the transfer, then cooperatively wait on the completion signal
//! until it fires or the deadline passes. An expired wait aborts the transfer
//! so the next call starts from a clean line.
//!
//! # Example
//!
//! ```ignore
//! let mut uart = UartTransport::new(BoardUart::new());
//! uart.open(&SerialConfig::default()).await?;
//! uart.send(b"AT\n", Deadline::after(Duration::from_millis(100))).await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use super::Transport;
use crate::config::{SerialConfig, DEFAULT_POLL_INTERVAL};
use crate::deadline::{wait_until, Deadline};
use crate::error::{LinkError, Result, TransportError};
use crate::signal::{fault, UartEvents};

/// Raw board UART driver.
///
/// Methods start operations and return immediately; `false` means the
/// driver refused. The driver's interrupt handler reports completion by
/// signalling the [`UartEvents`] passed to [`open`](SerialDriver::open):
/// `tx` with bytes written, `rx` with bytes available, `fault` with a
/// [`fault`] code.
pub trait SerialDriver: Send {
    /// Configure and enable the port.
    fn open(&mut self, config: &SerialConfig, events: Arc<UartEvents>) -> bool;

    /// Start transmitting `bytes`.
    fn start_write(&mut self, bytes: &[u8]) -> bool;

    /// Arm reception of up to `max_len` bytes.
    fn start_read(&mut self, max_len: usize) -> bool;

    /// Copy received bytes into `buf`, returning how many were copied.
    fn take_received(&mut self, buf: &mut [u8]) -> usize;

    /// Cancel any in-flight transfer.
    fn abort(&mut self);

    fn close(&mut self) -> bool;
}

/// [`Transport`] over a [`SerialDriver`].
pub struct UartTransport<D> {
    driver: D,
    events: Arc<UartEvents>,
    poll_interval: Duration,
    open: bool,
}

impl<D: SerialDriver> UartTransport<D> {
    pub fn new(driver: D) -> Self {
        Self::with_poll_interval(driver, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(driver: D, poll_interval: Duration) -> Self {
        Self {
            driver,
            events: Arc::new(UartEvents::new()),
            poll_interval,
            open: false,
        }
    }

    /// Completion signals shared with the driver's interrupt handler.
    pub fn events(&self) -> Arc<UartEvents> {
        self.events.clone()
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    fn ensure_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(TransportError::NotOpen.into())
        }
    }

    /// Turn a raised fault into an error, closing the port on device loss.
    fn fault_error(&mut self, code: usize, op: &str) -> LinkError {
        self.driver.abort();
        match code {
            fault::DEVICE_REMOVED => {
                self.open = false;
                tracing::error!(op, "uart device removed");
                TransportError::Disconnected(format!("device removed during {op}")).into()
            }
            _ => {
                tracing::warn!(op, code, "uart line error");
                let msg = format!("line error (code {code})");
                match op {
                    "send" => TransportError::Send(msg).into(),
                    _ => TransportError::Receive(msg).into(),
                }
            }
        }
    }
}

impl<D: SerialDriver> Transport for UartTransport<D> {
    async fn open(&mut self, config: &SerialConfig) -> Result<()> {
        if self.open {
            return Ok(());
        }
        self.events.reset();
        if !self.driver.open(config, self.events.clone()) {
            return Err(TransportError::Open(format!(
                "driver rejected {} baud {}{}{}",
                config.baud_rate(),
                config.data_bits().bits(),
                config.parity(),
                config.stop_bits().bits()
            ))
            .into());
        }
        self.open = true;
        tracing::debug!(baud = config.baud_rate(), "uart opened");
        Ok(())
    }

    async fn send(&mut self, bytes: &[u8], deadline: Deadline) -> Result<()> {
        self.ensure_open()?;
        if let Some(code) = self.events.fault.try_take() {
            return Err(self.fault_error(code, "send"));
        }

        self.events.tx.reset();
        if !self.driver.start_write(bytes) {
            return Err(TransportError::Send("driver refused write".into()).into());
        }

        let events = self.events.clone();
        let outcome = wait_until(deadline, self.poll_interval, || {
            if let Some(code) = events.fault.try_take() {
                return Some(Err(code));
            }
            events.tx.try_take().map(Ok)
        })
        .await;

        match outcome {
            Ok(Ok(written)) if written >= bytes.len() => Ok(()),
            Ok(Ok(written)) => Err(TransportError::Send(format!(
                "short write: {written} of {} bytes",
                bytes.len()
            ))
            .into()),
            Ok(Err(code)) => Err(self.fault_error(code, "send")),
            Err(_) => {
                self.driver.abort();
                tracing::debug!(len = bytes.len(), "uart send timed out");
                Err(LinkError::Timeout)
            }
        }
    }

    async fn receive(&mut self, buf: &mut [u8], deadline: Deadline) -> Result<usize> {
        self.ensure_open()?;
        if buf.is_empty() {
            return Ok(0);
        }
        if let Some(code) = self.events.fault.try_take() {
            return Err(self.fault_error(code, "receive"));
        }

        self.events.rx.reset();
        if !self.driver.start_read(buf.len()) {
            return Err(TransportError::Receive("driver refused read".into()).into());
        }

        let events = self.events.clone();
        let outcome = wait_until(deadline, self.poll_interval, || {
            if let Some(code) = events.fault.try_take() {
                return Some(Err(code));
            }
            events.rx.try_take().map(Ok)
        })
        .await;

        match outcome {
            Ok(Ok(_)) => Ok(self.driver.take_received(buf)),
            Ok(Err(code)) => Err(self.fault_error(code, "receive")),
            Err(_) => {
                self.driver.abort();
                // Bytes that landed before the abort are still ours.
                match self.driver.take_received(buf) {
                    0 => Err(LinkError::Timeout),
                    n => Ok(n),
                }
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.driver.abort();
        self.open = false;
        self.events.reset();
        if self.driver.close() {
            tracing::debug!("uart closed");
            Ok(())
        } else {
            Err(TransportError::Close("driver refused close".into()).into())
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Line {
        events: Option<Arc<UartEvents>>,
        armed: Option<usize>,
        rx: Vec<u8>,
        tx: Vec<u8>,
        complete_writes: bool,
        aborts: usize,
    }

    /// Driver whose "interrupts" are raised by the test through [`Line`].
    struct FakeUart {
        line: Arc<Mutex<Line>>,
        accept_open: bool,
    }

    impl FakeUart {
        fn new() -> (Self, Arc<Mutex<Line>>) {
            let line = Arc::new(Mutex::new(Line {
                complete_writes: true,
                ..Line::default()
            }));
            (
                Self {
                    line: line.clone(),
                    accept_open: true,
                },
                line,
            )
        }
    }

    impl SerialDriver for FakeUart {
        fn open(&mut self, _config: &SerialConfig, events: Arc<UartEvents>) -> bool {
            self.line.lock().unwrap().events = Some(events);
            self.accept_open
        }

        fn start_write(&mut self, bytes: &[u8]) -> bool {
            let mut line = self.line.lock().unwrap();
            line.tx.extend_from_slice(bytes);
            if line.complete_writes {
                if let Some(events) = &line.events {
                    events.tx.signal(bytes.len());
                }
            }
            true
        }

        fn start_read(&mut self, max_len: usize) -> bool {
            let mut line = self.line.lock().unwrap();
            line.armed = Some(max_len);
            if !line.rx.is_empty() {
                if let Some(events) = &line.events {
                    events.rx.signal(line.rx.len().min(max_len));
                }
            }
            true
        }

        fn take_received(&mut self, buf: &mut [u8]) -> usize {
            let mut line = self.line.lock().unwrap();
            let n = buf.len().min(line.rx.len());
            buf[..n].copy_from_slice(&line.rx[..n]);
            line.rx.drain(..n);
            line.armed = None;
            n
        }

        fn abort(&mut self) {
            let mut line = self.line.lock().unwrap();
            line.armed = None;
            line.aborts += 1;
        }

        fn close(&mut self) -> bool {
            true
        }
    }

    /// Interrupt handler side: bytes arrive on the wire.
    fn deliver(line: &Mutex<Line>, bytes: &[u8]) {
        let mut line = line.lock().unwrap();
        line.rx.extend_from_slice(bytes);
        if let (Some(max), Some(events)) = (line.armed, &line.events) {
            events.rx.signal(line.rx.len().min(max));
        }
    }

    async fn opened() -> (UartTransport<FakeUart>, Arc<Mutex<Line>>) {
        let (driver, line) = FakeUart::new();
        let mut uart = UartTransport::new(driver);
        uart.open(&SerialConfig::default()).await.unwrap();
        (uart, line)
    }

    #[tokio::test]
    async fn test_send_completes_on_tx_signal() {
        let (mut uart, line) = opened().await;

        uart.send(b"AT\n", Deadline::after(Duration::from_millis(10)))
            .await
            .unwrap();

        assert_eq!(line.lock().unwrap().tx, b"AT\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_times_out_and_aborts() {
        let (mut uart, line) = opened().await;
        line.lock().unwrap().complete_writes = false;

        let start = tokio::time::Instant::now();
        let err = uart
            .send(b"x\n", Deadline::after(Duration::from_millis(20)))
            .await
            .unwrap_err();

        assert!(matches!(err, LinkError::Timeout));
        assert!(start.elapsed() < Duration::from_millis(25));
        assert_eq!(line.lock().unwrap().aborts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_from_interrupt_task() {
        let (mut uart, line) = opened().await;

        let isr_line = line.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            deliver(&isr_line, b"reboot\n");
        });

        let mut buf = [0u8; 64];
        let n = uart
            .receive(&mut buf, Deadline::after(Duration::from_millis(100)))
            .await
            .unwrap();
        assert_eq!(&buf[..n], b"reboot\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_idle_times_out() {
        let (mut uart, line) = opened().await;
        let start = tokio::time::Instant::now();

        let mut buf = [0u8; 16];
        let err = uart
            .receive(&mut buf, Deadline::after(Duration::from_millis(30)))
            .await
            .unwrap_err();

        assert!(matches!(err, LinkError::Timeout));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(30));
        assert!(elapsed < Duration::from_millis(35));
        assert_eq!(line.lock().unwrap().aborts, 1);
    }

    #[tokio::test]
    async fn test_receive_respects_buffer_len() {
        let (mut uart, line) = opened().await;
        deliver(&line, b"abcdef");

        let mut buf = [0u8; 4];
        let n = uart
            .receive(&mut buf, Deadline::after(Duration::from_millis(10)))
            .await
            .unwrap();
        assert_eq!(&buf[..n], b"abcd");

        let n = uart
            .receive(&mut buf, Deadline::after(Duration::from_millis(10)))
            .await
            .unwrap();
        assert_eq!(&buf[..n], b"ef");
    }

    #[tokio::test]
    async fn test_device_removed_is_disconnected() {
        let (mut uart, _line) = opened().await;
        uart.events().fault.signal(fault::DEVICE_REMOVED);

        let mut buf = [0u8; 8];
        let err = uart
            .receive(&mut buf, Deadline::after(Duration::from_millis(10)))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            LinkError::Transport(TransportError::Disconnected(_))
        ));
        assert!(err.is_fatal());
        assert!(!uart.is_open());
    }

    #[tokio::test]
    async fn test_line_error_is_recoverable() {
        let (mut uart, _line) = opened().await;
        uart.events().fault.signal(fault::LINE_ERROR);

        let err = uart
            .send(b"x\n", Deadline::after(Duration::from_millis(10)))
            .await
            .unwrap_err();

        assert!(matches!(err, LinkError::Transport(TransportError::Send(_))));
        assert!(!err.is_fatal());
        assert!(uart.is_open());
    }

    #[tokio::test]
    async fn test_operations_require_open() {
        let (driver, _line) = FakeUart::new();
        let mut uart = UartTransport::new(driver);

        let err = uart
            .send(b"x", Deadline::after(Duration::from_millis(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::Transport(TransportError::NotOpen)));
    }

    #[tokio::test]
    async fn test_open_rejected_by_driver() {
        let (mut driver, _line) = FakeUart::new();
        driver.accept_open = false;
        let mut uart = UartTransport::new(driver);

        let err = uart.open(&SerialConfig::default()).await.unwrap_err();
        assert!(matches!(err, LinkError::Transport(TransportError::Open(_))));
        assert!(!uart.is_open());
    }
}
