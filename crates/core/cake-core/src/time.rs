//! 高精度单调时钟
//!
//! 提供纳秒级时间戳；调度器的所有时间比较都基于有符号差值，
//! 绝不直接比较原始时间戳。

use std::cell::Cell;
use std::rc::Rc;

/// Nanoseconds per second.
pub const NSEC_PER_SEC: u64 = 1_000_000_000;
/// Nanoseconds per microsecond.
pub const NSEC_PER_USEC: u64 = 1_000;

/// Convert microseconds (configuration units) to nanoseconds (engine units).
#[inline]
pub fn us_to_ns(us: u32) -> u64 {
    u64::from(us) * NSEC_PER_USEC
}

/// Signed difference between two monotonic timestamps.
#[inline]
pub fn tdiff(a: u64, b: u64) -> i64 {
    a.wrapping_sub(b) as i64
}

/// True when `a` is strictly after `b` under wraparound arithmetic.
#[inline]
pub fn time_after(a: u64, b: u64) -> bool {
    tdiff(a, b) > 0
}

/// True when `a` is strictly before `b`.
#[inline]
pub fn time_before(a: u64, b: u64) -> bool {
    time_after(b, a)
}

/// True when `a` is at or after `b`.
#[inline]
pub fn time_after_eq(a: u64, b: u64) -> bool {
    tdiff(a, b) >= 0
}

/// Source of monotonic nanosecond timestamps.
///
/// The engine is generic over this so tests and the simulator can drive
/// virtual time while production uses the OS monotonic clock.
pub trait Clock {
    /// Current monotonic time in nanoseconds.
    fn now_ns(&self) -> u64;
}

/// 操作系统单调时钟（生产环境）
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now_ns(&self) -> u64 {
        timestamp_ns()
    }
}

/// 高精度时间戳（纳秒）
pub fn timestamp_ns() -> u64 {
    #[cfg(unix)]
    {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        unsafe {
            libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
        }
        (ts.tv_sec as u64) * NSEC_PER_SEC + (ts.tv_nsec as u64)
    }
    #[cfg(not(unix))]
    {
        use std::time::Instant;
        static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
        let start = START.get_or_init(Instant::now);
        start.elapsed().as_nanos() as u64
    }
}

/// 手动推进的时钟，用于测试和确定性仿真
///
/// Clones share the underlying time so a test can hold one handle while the
/// engine owns another.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<u64>>,
}

impl ManualClock {
    /// Clock starting at the given timestamp.
    pub fn new(start_ns: u64) -> Self {
        Self {
            now: Rc::new(Cell::new(start_ns)),
        }
    }

    /// Jump to an absolute time. Going backwards is a caller bug but is not
    /// checked; the engine assumes monotonicity.
    pub fn set(&self, ns: u64) {
        self.now.set(ns);
    }

    /// Advance by a delta.
    pub fn advance(&self, delta_ns: u64) {
        self.now.set(self.now.get().wrapping_add(delta_ns));
    }
}

impl Clock for ManualClock {
    fn now_ns(&self) -> u64 {
        self.now.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_clock_advances() {
        let clock = MonotonicClock;
        let a = clock.now_ns();
        let b = clock.now_ns();
        assert!(b >= a);
    }

    #[test]
    fn test_manual_clock_shared_handles() {
        let clock = ManualClock::new(1_000);
        let engine_view = clock.clone();
        clock.advance(500);
        assert_eq!(engine_view.now_ns(), 1_500);
        clock.set(10_000);
        assert_eq!(engine_view.now_ns(), 10_000);
    }

    #[test]
    fn test_signed_comparisons() {
        assert!(time_after(10, 5));
        assert!(!time_after(5, 5));
        assert!(time_after_eq(5, 5));
        assert!(time_before(5, 10));

        // wraparound: a slightly "negative" timestamp is before a small one
        let a = u64::MAX - 10;
        let b = 10;
        assert!(time_after(b, a));
        assert!(time_before(a, b));
    }

    #[test]
    fn test_us_conversion() {
        assert_eq!(us_to_ns(5_000), 5_000_000);
        assert_eq!(us_to_ns(100_000), 100_000_000);
    }
}
