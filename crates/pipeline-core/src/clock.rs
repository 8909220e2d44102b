//! Monotone time source injected into the pipeline and its filters.
//!
//! Grounded on `original_source/src/lib_utils/sysclock.hpp`'s
//! `SystemClock(clockSpeed)` (constructed once by `Pipeline` and shared,
//! `spec.md` §4.A): `now()` returns an exact fraction of seconds elapsed
//! since construction, scaled by a speed factor; a speed of `0.0` freezes
//! time and makes `sleep` return immediately.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

use crate::fraction::Fraction;

/// Ticks per second used for presentation/decoding timestamps
/// throughout the pipeline (spec.md §3). 180 000 is divisible by common
/// frame rates (24, 25, 30, 50, 60) and audio rates (44100, 48000 share
/// factors with it closely enough for the original's use), which is why
/// the upstream format settled on it.
pub const CLOCK_RATE: i64 = 180_000;

/// A monotone time source. `now()` must never decrease for a given
/// instance; `sleep` must respect `speed() == 0.0` by returning
/// immediately (a frozen virtual clock never advances, so there is
/// nothing to wait for).
pub trait Clock: Send + Sync {
    fn now(&self) -> Fraction;
    fn sleep(&self, duration: Fraction);
    fn speed(&self) -> f64;

    /// Convenience: `now()` expressed in `CLOCK_RATE` ticks.
    fn now_ticks(&self) -> i64 {
        self.now().to_ticks(CLOCK_RATE)
    }
}

/// Wall-clock time, optionally accelerated or decelerated by `speed`.
pub struct SystemClock {
    origin: Instant,
    speed: f64,
}

impl SystemClock {
    pub fn new(speed: f64) -> Self {
        Self {
            origin: Instant::now(),
            speed,
        }
    }

    pub fn real_time() -> Self {
        Self::new(1.0)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Fraction {
        let elapsed = self.origin.elapsed();
        let scaled_nanos = (elapsed.as_nanos() as f64 * self.speed) as i64;
        Fraction::new(scaled_nanos, 1_000_000_000)
    }

    fn sleep(&self, duration: Fraction) {
        if self.speed <= 0.0 || duration.num <= 0 {
            return;
        }
        let real_secs = duration.as_f64() / self.speed;
        if real_secs > 0.0 {
            std::thread::sleep(Duration::from_secs_f64(real_secs));
        }
    }

    fn speed(&self) -> f64 {
        self.speed
    }
}

/// A manually advanced clock for deterministic tests: `sleep` advances
/// time instead of blocking the thread, and a speed of `0.0` freezes it
/// entirely (matching spec.md §4.A).
pub struct VirtualClock {
    now_ticks: AtomicI64,
    speed: f64,
}

impl VirtualClock {
    pub fn new(speed: f64) -> Self {
        Self {
            now_ticks: AtomicI64::new(0),
            speed,
        }
    }

    pub fn frozen() -> Self {
        Self::new(0.0)
    }

    /// Test/driver hook: advance the virtual clock by `duration`.
    pub fn advance(&self, duration: Fraction) {
        let ticks = duration.to_ticks(CLOCK_RATE);
        self.now_ticks.fetch_add(ticks.max(0), Ordering::SeqCst);
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> Fraction {
        Fraction::new(self.now_ticks.load(Ordering::SeqCst), CLOCK_RATE)
    }

    fn sleep(&self, duration: Fraction) {
        if self.speed == 0.0 {
            return;
        }
        self.advance(duration);
    }

    fn speed(&self) -> f64 {
        self.speed
    }
}
