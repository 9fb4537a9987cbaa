//! Interrupt-to-task completion signals.
//!
//! A [`CompletionSignal`] is the only state an interrupt handler may touch: a
//! fixed-size payload word and a ready flag. The producer writes the payload
//! and then sets the flag with `Release`; the consumer takes the flag with
//! `Acquire` and only then reads the payload. That pairing makes the payload
//! write happen-before the payload read without relying on any ordering of
//! plain shared variables.
//!
//! No allocation, no locks, no loops: every method is safe to call from an
//! interrupt context.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Single-item completion channel carrying one `usize` payload.
#[derive(Debug, Default)]
pub struct CompletionSignal {
    payload: AtomicUsize,
    ready: AtomicBool,
}

impl CompletionSignal {
    pub const fn new() -> Self {
        Self {
            payload: AtomicUsize::new(0),
            ready: AtomicBool::new(false),
        }
    }

    /// Publish a completion (interrupt side).
    ///
    /// A second signal before the first is taken overwrites the payload.
    #[inline]
    pub fn signal(&self, value: usize) {
        self.payload.store(value, Ordering::Relaxed);
        self.ready.store(true, Ordering::Release);
    }

    /// Consume a pending completion (task side).
    #[inline]
    pub fn try_take(&self) -> Option<usize> {
        if self.ready.swap(false, Ordering::Acquire) {
            Some(self.payload.load(Ordering::Relaxed))
        } else {
            None
        }
    }

    /// Whether a completion is pending, without consuming it.
    #[inline]
    pub fn is_set(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Drop any stale completion before starting a new operation.
    #[inline]
    pub fn reset(&self) {
        self.ready.store(false, Ordering::Release);
    }
}

/// Completion signals a UART driver raises from its interrupt handler.
#[derive(Debug, Default)]
pub struct UartEvents {
    /// Receive finished; payload is the number of bytes available.
    pub rx: CompletionSignal,
    /// Transmit finished; payload is the number of bytes sent.
    pub tx: CompletionSignal,
    /// Line or device fault (framing/overrun error, device removed).
    pub fault: CompletionSignal,
}

impl UartEvents {
    pub const fn new() -> Self {
        Self {
            rx: CompletionSignal::new(),
            tx: CompletionSignal::new(),
            fault: CompletionSignal::new(),
        }
    }

    /// Clear all three signals.
    pub fn reset(&self) {
        self.rx.reset();
        self.tx.reset();
        self.fault.reset();
    }
}

/// Fault codes carried in the [`UartEvents::fault`] payload.
pub mod fault {
    /// Parity, framing or overrun error on the line; the transfer was lost.
    pub const LINE_ERROR: usize = 1;
    /// The device is gone.
    pub const DEVICE_REMOVED: usize = 2;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_take_without_signal() {
        let sig = CompletionSignal::new();
        assert!(!sig.is_set());
        assert_eq!(sig.try_take(), None);
    }

    #[test]
    fn test_signal_then_take() {
        let sig = CompletionSignal::new();
        sig.signal(42);
        assert!(sig.is_set());
        assert_eq!(sig.try_take(), Some(42));
        // Consumed exactly once.
        assert_eq!(sig.try_take(), None);
    }

    #[test]
    fn test_second_signal_overwrites_payload() {
        let sig = CompletionSignal::new();
        sig.signal(1);
        sig.signal(2);
        assert_eq!(sig.try_take(), Some(2));
    }

    #[test]
    fn test_reset_discards_pending() {
        let sig = CompletionSignal::new();
        sig.signal(9);
        sig.reset();
        assert_eq!(sig.try_take(), None);
    }

    #[test]
    fn test_uart_events_reset() {
        let events = UartEvents::new();
        events.rx.signal(3);
        events.tx.signal(4);
        events.fault.signal(fault::LINE_ERROR);
        events.reset();
        assert!(!events.rx.is_set());
        assert!(!events.tx.is_set());
        assert!(!events.fault.is_set());
    }

    #[test]
    fn test_payload_visible_across_threads() {
        let sig = Arc::new(CompletionSignal::new());
        let ack = Arc::new(AtomicUsize::new(0));
        let producer = sig.clone();
        let producer_ack = ack.clone();

        let handle = std::thread::spawn(move || {
            for i in 1..=1000 {
                producer.signal(i);
                while producer_ack.load(Ordering::Acquire) != i {
                    std::hint::spin_loop();
                }
            }
        });

        let mut last = 0;
        while last < 1000 {
            if let Some(v) = sig.try_take() {
                assert_eq!(v, last + 1);
                last = v;
                ack.store(v, Ordering::Release);
            }
        }

        handle.join().unwrap();
    }
}
