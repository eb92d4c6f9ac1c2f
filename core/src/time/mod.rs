//! Monotonic time sources shared by all CPU timing.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::Timestamp;

#[cfg_attr(unix, path = "unix.rs")]
#[cfg_attr(windows, path = "windows.rs")]
mod platform;

pub use platform::*;

/// Current monotonic time in nanoseconds.
pub fn now() -> Timestamp {
    platform::timestamp_now()
}

/// A monotonic microsecond source.
pub trait Clock: Send + Sync {
    fn microseconds(&self) -> f64;
}

/// The platform's monotonic clock, measured from the moment it was created.
pub struct MonotonicClock {
    origin: Timestamp,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self { origin: now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn microseconds(&self) -> f64 {
        now().saturating_sub(self.origin) as f64 / 1000.
    }
}

/// A clock that only moves when told to.
///
/// Useful to drive a timeline from recorded timestamps or to get
/// reproducible durations.
#[derive(Default)]
pub struct ManualClock {
    bits: AtomicU64,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            bits: AtomicU64::new(start.to_bits()),
        }
    }

    pub fn set(&self, microseconds: f64) {
        self.bits.store(microseconds.to_bits(), Ordering::Release);
    }

    pub fn advance(&self, microseconds: f64) {
        let mut current = self.bits.load(Ordering::Acquire);
        loop {
            let next = (f64::from_bits(current) + microseconds).to_bits();
            match self
                .bits
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }
}

impl Clock for ManualClock {
    fn microseconds(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }
}
