//! Trailing-edge debounce.
//!
//! Holds at most one pending value. A new arrival replaces the pending value
//! and pushes the fire time out to `arrival + window`. The driver (the effect
//! worker) waits until [`Debouncer::deadline`] and then calls
//! [`Debouncer::poll`].

use std::time::{Duration, Instant};

/// Single-slot debouncer.
#[derive(Debug)]
pub struct Debouncer<T> {
    window: Duration,
    pending: Option<(T, Instant)>,
}

impl<T> Debouncer<T> {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: None,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Offer a value that arrived at `now`.
    ///
    /// With a zero window the value is handed straight back. Otherwise it
    /// replaces whatever was pending and `None` is returned.
    pub fn push(&mut self, value: T, now: Instant) -> Option<T> {
        if self.window.is_zero() {
            return Some(value);
        }
        self.pending = Some((value, now + self.window));
        None
    }

    /// When the pending value becomes due, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|(_, fire_at)| *fire_at)
    }

    /// Take the pending value if its quiet period has elapsed by `now`.
    pub fn poll(&mut self, now: Instant) -> Option<T> {
        match self.pending {
            Some((_, fire_at)) if now >= fire_at => self.pending.take().map(|(value, _)| value),
            _ => None,
        }
    }

    /// Take the pending value regardless of its deadline.
    pub fn flush(&mut self) -> Option<T> {
        self.pending.take().map(|(value, _)| value)
    }

    /// Drop the pending value.
    pub fn clear(&mut self) {
        self.pending = None;
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}
