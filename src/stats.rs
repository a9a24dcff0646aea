//! Traffic accounting and the stats sink callback. Grounded in the
//! teacher's `state::ProxyMetrics`: plain `AtomicU64` counters updated from
//! the hot path, drained periodically.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Host-supplied callback receiving cumulative byte counters. Called at
/// roughly one-second intervals by the supervisor's stats task, the same
/// cadence the teacher's heartbeat task reports `ProxyMetrics` on.
///
/// `bytes_in` is tunnel → host (data written to the TUN device),
/// `bytes_out` is host → tunnel. Synthetic packets (SYN-ACK, ICMP echo
/// reply) are not counted in either direction.
pub type StatsSink = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// A stats sink that does nothing, for callers that don't need accounting.
pub fn no_sink() -> StatsSink {
    Arc::new(|_, _| {})
}

/// Cumulative byte counters shared across all flows and sessions.
#[derive(Default)]
pub struct Counters {
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_in(&self, n: u64) {
        self.bytes_in.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_out(&self, n: u64) {
        self.bytes_out.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> (u64, u64) {
        (
            self.bytes_in.load(Ordering::Relaxed),
            self.bytes_out.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_independently() {
        let counters = Counters::new();
        counters.add_in(100);
        counters.add_out(50);
        counters.add_in(20);
        assert_eq!(counters.snapshot(), (120, 50));
    }
}
