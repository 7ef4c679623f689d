use std::sync::atomic::{AtomicU64, Ordering};

/// Source of logical time units used for entry timestamps and the
/// failure-removal age check. `now` must be monotonically non-decreasing
/// across calls for a given node.
pub trait LogicalClock: Send + Sync {
    fn now(&self) -> u64;
}

/// Manually advanced clock for simulated clusters and tests. All nodes of a
/// simulation typically share one instance; the driver advances it once per
/// round.
#[derive(Debug, Default)]
pub struct SimClock {
    ticks: AtomicU64,
}

impl SimClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, units: u64) {
        self.ticks.fetch_add(units, Ordering::SeqCst);
    }
}

impl LogicalClock for SimClock {
    fn now(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_is_monotonic() {
        let clock = SimClock::new();
        assert_eq!(clock.now(), 0);
        clock.advance(3);
        clock.advance(1);
        assert_eq!(clock.now(), 4);
    }
}
