//! Fixed-capacity storage for parsed commands.
//!
//! Every [`Command`] borrows one slot from a [`CommandPool`]. Slots are
//! allocated once, sized to the maximum name and parameter length, and
//! recycled on release, so steady-state parsing never touches the allocator.
//!
//! # Design
//!
//! - `acquire` pops a free slot and copies the command text into it
//! - `Command::release` clears the slot and pushes it back
//! - A command dropped without `release` is reclaimed too, but counted in
//!   [`CommandPool::unreleased_drops`] so a missing release shows up in tests
//!
//! An empty pool is a resource failure ([`LinkError::Resource`]), not a wait.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::command::Command;
use crate::error::{LinkError, Result};

/// Backing storage for one command.
#[derive(Debug, Default)]
pub(crate) struct Slot {
    pub(crate) name: String,
    pub(crate) parameters: String,
}

#[derive(Debug)]
pub(crate) struct PoolShared {
    free: Mutex<Vec<Slot>>,
    capacity: usize,
    unreleased_drops: AtomicU64,
}

impl PoolShared {
    fn free(&self) -> MutexGuard<'_, Vec<Slot>> {
        // A panic while holding the lock cannot leave the Vec half-updated.
        self.free.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn recycle(&self, mut slot: Slot, leaked: bool) {
        if leaked {
            let drops = self.unreleased_drops.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::warn!(name = %slot.name, drops, "command dropped without release");
        }
        slot.name.clear();
        slot.parameters.clear();
        self.free().push(slot);
    }
}

/// A bounded pool of command slots.
///
/// Cloning is cheap and yields a handle to the same pool.
#[derive(Debug, Clone)]
pub struct CommandPool {
    shared: Arc<PoolShared>,
}

impl CommandPool {
    /// Create a pool of `slots` entries, each able to hold a name of
    /// `max_name_len` bytes and parameters of `max_param_len` bytes.
    pub fn new(slots: usize, max_name_len: usize, max_param_len: usize) -> Self {
        let free = (0..slots)
            .map(|_| Slot {
                name: String::with_capacity(max_name_len),
                parameters: String::with_capacity(max_param_len),
            })
            .collect();

        Self {
            shared: Arc::new(PoolShared {
                free: Mutex::new(free),
                capacity: slots,
                unreleased_drops: AtomicU64::new(0),
            }),
        }
    }

    /// Copy a command into a free slot.
    ///
    /// Fails with [`LinkError::Resource`] when every slot is outstanding.
    pub fn acquire(&self, name: &str, parameters: Option<&str>) -> Result<Command> {
        let mut slot = self.shared.free().pop().ok_or_else(|| {
            LinkError::Resource(format!(
                "command pool exhausted ({} slots outstanding)",
                self.shared.capacity
            ))
        })?;

        slot.name.push_str(name);
        if let Some(params) = parameters {
            slot.parameters.push_str(params);
        }

        Ok(Command::leased(slot, parameters.is_some(), self.shared.clone()))
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Slots ready to be acquired.
    pub fn available(&self) -> usize {
        self.shared.free().len()
    }

    /// Slots currently held by commands.
    pub fn outstanding(&self) -> usize {
        self.shared.capacity - self.available()
    }

    /// Commands that were dropped instead of released.
    pub fn unreleased_drops(&self) -> u64 {
        self.shared.unreleased_drops.load(Ordering::Relaxed)
    }
}
