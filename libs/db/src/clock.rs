//! Logical timestamps.
//!
//! Mutations against one element must carry strictly increasing timestamps: the
//! sorted store resolves identical cell coordinates newest-wins, so two writes in
//! the same millisecond would silently collapse. [`LogicalClock`] hands out
//! `max(wall_clock_millis, last + 1)`, which keeps timestamps comparable with wall
//! time across processes while never repeating inside one process.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch, or a logical tick derived from them.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub const MAX: Timestamp = Timestamp(u64::MAX);

    /// Wall-clock now, in milliseconds.
    pub fn now() -> Self {
        Timestamp(wall_clock_millis())
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Timestamp {
    fn from(value: u64) -> Self {
        Timestamp(value)
    }
}

fn wall_clock_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Source of mutation timestamps, injected into the graph.
pub trait Clock: Send + Sync {
    /// Next timestamp. Successive calls on one clock never return the same value.
    fn now(&self) -> Timestamp;
}

/// Strictly increasing clock that tracks wall time when it can.
#[derive(Debug, Default)]
pub struct LogicalClock {
    last: AtomicU64,
}

impl LogicalClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start above `floor`, e.g. the newest timestamp already persisted.
    pub fn starting_after(floor: Timestamp) -> Self {
        Self {
            last: AtomicU64::new(floor.0),
        }
    }
}

impl Clock for LogicalClock {
    fn now(&self) -> Timestamp {
        let wall = wall_clock_millis();
        let mut current = self.last.load(Ordering::Acquire);
        loop {
            let next = wall.max(current.saturating_add(1));
            match self.last.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Timestamp(next),
                Err(observed) => current = observed,
            }
        }
    }
}

/// Deterministic clock for tests: starts at `start` and advances by `step`.
#[derive(Debug)]
pub struct ManualClock {
    next: AtomicU64,
    step: u64,
}

impl ManualClock {
    pub fn new(start: u64, step: u64) -> Self {
        Self {
            next: AtomicU64::new(start),
            step: step.max(1),
        }
    }

    /// Value the next call to `now()` will return.
    pub fn peek(&self) -> Timestamp {
        Timestamp(self.next.load(Ordering::Acquire))
    }

    /// Jump forward so the next tick is at least `to`.
    pub fn advance_to(&self, to: u64) {
        self.next.fetch_max(to, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.next.fetch_add(self.step, Ordering::AcqRel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_logical_clock_strictly_increasing() {
        let clock = LogicalClock::new();
        let mut previous = clock.now();
        for _ in 0..10_000 {
            let next = clock.now();
            assert!(next > previous);
            previous = next;
        }
    }

    #[test]
    fn test_logical_clock_tracks_wall_time() {
        let clock = LogicalClock::new();
        let before = Timestamp::now();
        assert!(clock.now() >= before);
    }

    #[test]
    fn test_logical_clock_starting_after_future_floor() {
        let floor = Timestamp(Timestamp::now().0 + 1_000_000);
        let clock = LogicalClock::starting_after(floor);
        assert_eq!(clock.now(), Timestamp(floor.0 + 1));
    }

    #[test]
    fn test_logical_clock_concurrent_ticks_unique() {
        let clock = Arc::new(LogicalClock::new());
        let mut handles = vec![];
        for _ in 0..8 {
            let clock = clock.clone();
            handles.push(thread::spawn(move || {
                (0..1000).map(|_| clock.now()).collect::<Vec<_>>()
            }));
        }
        let mut seen = HashSet::new();
        for handle in handles {
            for ts in handle.join().expect("thread should complete") {
                assert!(seen.insert(ts), "duplicate tick {}", ts);
            }
        }
        assert_eq!(seen.len(), 8000);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(100, 10);
        assert_eq!(clock.now(), Timestamp(100));
        assert_eq!(clock.now(), Timestamp(110));
        assert_eq!(clock.peek(), Timestamp(120));
        clock.advance_to(500);
        assert_eq!(clock.now(), Timestamp(500));
        clock.advance_to(10);
        assert_eq!(clock.now(), Timestamp(510));
    }
}
