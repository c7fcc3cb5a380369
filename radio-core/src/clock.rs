//! Time sources
//!
//! Everything that paces audio asks a `TimeSource` for the time and for
//! sleeps, so tests can run the pacing logic against a clock that only moves
//! when told to.

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Granularity of every pacing wait
pub const TICK: Duration = Duration::from_millis(1);

pub trait TimeSource: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
    fn sleep(&self, duration: Duration);
}

/// Wall-clock time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Shared handle to the wall clock
pub fn system_clock() -> Arc<dyn TimeSource> {
    Arc::new(SystemClock)
}

/// A clock that only advances when something sleeps on it or it is advanced
/// explicitly.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    slept: AtomicBool,
    sleeps: AtomicU64,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
            slept: AtomicBool::new(false),
            sleeps: AtomicU64::new(0),
        }
    }

    pub fn advance(&self, delta: TimeDelta) {
        *self.now.lock() += delta;
    }

    pub fn set(&self, time: DateTime<Utc>) {
        *self.now.lock() = time;
    }

    /// Whether anyone has slept on this clock since creation or the last reset
    pub fn has_slept(&self) -> bool {
        self.slept.load(Ordering::SeqCst)
    }

    pub fn sleep_count(&self) -> u64 {
        self.sleeps.load(Ordering::SeqCst)
    }

    pub fn reset_slept(&self) {
        self.slept.store(false, Ordering::SeqCst);
    }
}

impl TimeSource for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }

    fn sleep(&self, duration: Duration) {
        self.slept.store(true, Ordering::SeqCst);
        self.sleeps.fetch_add(1, Ordering::SeqCst);
        let delta = TimeDelta::from_std(duration).unwrap_or(TimeDelta::milliseconds(1));
        *self.now.lock() += delta;
    }
}

/// Block until `clock.now() + lead` has reached `instant`.
pub fn sleep_until(clock: &dyn TimeSource, instant: DateTime<Utc>, lead: TimeDelta) {
    while clock.now() + lead < instant {
        clock.sleep(TICK);
    }
}
