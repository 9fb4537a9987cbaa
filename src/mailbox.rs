//! Single-slot command hand-off.
//!
//! The [`Mailbox`] moves one [`Command`] at a time from the context that
//! assembles frames to the application loop. Depth is one and the policy is
//! reject-newest: offering while a command is still pending fails, the new
//! command is released back to its pool, and the pending one stays put.
//!
//! The pending flag follows the same release/acquire pairing as
//! [`CompletionSignal`](crate::signal::CompletionSignal): the slot is filled
//! before the flag is set, and the consumer only touches the slot after
//! observing the flag. The flag only changes while the slot lock is held, so
//! it never disagrees with the slot once the lock is released.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::config::DEFAULT_POLL_INTERVAL;
use crate::deadline::{wait_until, Deadline};
use crate::error::{LinkError, Result};
use crate::protocol::Command;

/// Depth-1 mailbox with explicit ownership transfer.
#[derive(Debug)]
pub struct Mailbox {
    slot: Mutex<Option<Command>>,
    pending: AtomicBool,
    closed: AtomicBool,
    rejected: AtomicU64,
    poll_interval: Duration,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::with_poll_interval(DEFAULT_POLL_INTERVAL)
    }

    /// Mailbox whose `take` rechecks every `poll_interval`.
    pub fn with_poll_interval(poll_interval: Duration) -> Self {
        Self {
            slot: Mutex::new(None),
            pending: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            rejected: AtomicU64::new(0),
            poll_interval,
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<Command>> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Hand a command over.
    ///
    /// Returns `false` if a command is already pending or the mailbox is
    /// closed; the offered command is released in that case.
    pub fn offer(&self, command: Command) -> bool {
        let mut slot = self.slot();
        // Checked under the lock so a concurrent `close` cannot miss it.
        if self.is_closed() {
            drop(slot);
            tracing::debug!(name = command.name(), "mailbox closed, command released");
            command.release();
            return false;
        }

        if slot.is_some() {
            drop(slot);
            let rejected = self.rejected.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::warn!(name = command.name(), rejected, "mailbox full, command rejected");
            command.release();
            return false;
        }

        *slot = Some(command);
        self.pending.store(true, Ordering::Release);
        true
    }

    /// Take the pending command without waiting.
    pub fn try_take(&self) -> Option<Command> {
        if !self.pending.load(Ordering::Acquire) {
            return None;
        }
        let mut slot = self.slot();
        let command = slot.take();
        self.pending.store(false, Ordering::Release);
        command
    }

    /// Take the pending command, waiting until `deadline`.
    ///
    /// - [`LinkError::Empty`]: nothing pending and the deadline already passed
    /// - [`LinkError::Timeout`]: waited until the deadline, nothing arrived
    /// - [`LinkError::Closed`]: the mailbox was closed
    pub async fn take(&self, deadline: Deadline) -> Result<Command> {
        if self.is_closed() {
            return Err(LinkError::Closed);
        }
        if let Some(command) = self.try_take() {
            return Ok(command);
        }
        if deadline.expired() {
            return Err(LinkError::Empty);
        }

        wait_until(deadline, self.poll_interval, || {
            if self.is_closed() {
                return Some(Err(LinkError::Closed));
            }
            self.try_take().map(Ok)
        })
        .await
        .map_err(|_| LinkError::Timeout)?
    }

    #[inline]
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Offers rejected because a command was already pending.
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Close the mailbox and release any pending command.
    ///
    /// Returns whether a command was pending.
    pub fn close(&self) -> bool {
        let pending = {
            let mut slot = self.slot();
            self.closed.store(true, Ordering::Release);
            self.pending.store(false, Ordering::Release);
            slot.take()
        };
        match pending {
            Some(command) => {
                tracing::debug!(name = command.name(), "pending command released on close");
                command.release();
                true
            }
            None => false,
        }
    }
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}
