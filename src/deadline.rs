//! Deadlines and the bounded cooperative wait.
//!
//! Every suspension point in the crate takes a [`Deadline`]. Waiting is a
//! poll loop: check the condition, check the deadline, sleep one poll
//! interval, repeat. The deadline is re-checked on every iteration, so a wait
//! can never outlive its deadline by more than one interval.
//!
//! All instants come from `tokio::time`, which lets tests drive waits with a
//! paused clock.

use std::time::Duration;

use tokio::time::Instant;

/// An absolute point in time after which an operation gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline(Instant);

impl Deadline {
    /// Deadline `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Self(Instant::now() + timeout)
    }

    /// Deadline at an absolute instant.
    pub fn at(instant: Instant) -> Self {
        Self(instant)
    }

    /// A deadline that has already passed; turns waits into single polls.
    pub fn immediate() -> Self {
        Self(Instant::now())
    }

    #[inline]
    pub fn instant(&self) -> Instant {
        self.0
    }

    #[inline]
    pub fn expired(&self) -> bool {
        Instant::now() >= self.0
    }

    /// Time left, zero once expired.
    #[inline]
    pub fn remaining(&self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }

    /// The earlier of two deadlines.
    pub fn min(self, other: Deadline) -> Deadline {
        std::cmp::min(self, other)
    }
}

/// The deadline elapsed before the awaited condition held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elapsed;

/// Cooperatively wait until `check` yields a value or `deadline` passes.
///
/// `check` runs at least once, even with an expired deadline. Between checks
/// the task sleeps for `interval` (capped at the time remaining).
pub async fn wait_until<T, F>(
    deadline: Deadline,
    interval: Duration,
    mut check: F,
) -> std::result::Result<T, Elapsed>
where
    F: FnMut() -> Option<T>,
{
    loop {
        if let Some(value) = check() {
            return Ok(value);
        }

        let remaining = deadline.remaining();
        if remaining.is_zero() {
            return Err(Elapsed);
        }

        tokio::time::sleep(interval.min(remaining)).await;
    }
}
