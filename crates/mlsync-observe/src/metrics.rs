use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.inc_by(1);
    }

    pub fn inc_by(&self, value: u64) {
        self.0.fetch_add(value, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct DurationAgg {
    count: AtomicU64,
    total_ns: AtomicU64,
    max_ns: AtomicU64,
}

impl DurationAgg {
    pub fn record(&self, dur: Duration) {
        let ns = dur.as_nanos().min(u64::MAX as u128) as u64;
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_ns.fetch_add(ns, Ordering::Relaxed);

        let mut prev = self.max_ns.load(Ordering::Relaxed);
        while ns > prev {
            match self
                .max_ns
                .compare_exchange_weak(prev, ns, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(next) => prev = next,
            }
        }
    }

    pub fn snapshot(&self) -> DurationAggSnapshot {
        DurationAggSnapshot {
            count: self.count.load(Ordering::Relaxed),
            total_ns: self.total_ns.load(Ordering::Relaxed),
            max_ns: self.max_ns.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DurationAggSnapshot {
    pub count: u64,
    pub total_ns: u64,
    pub max_ns: u64,
}

impl DurationAggSnapshot {
    pub fn avg_ns(&self) -> u64 {
        if self.count == 0 {
            0
        } else {
            self.total_ns / self.count
        }
    }
}

pub struct ScopedTimer<'a> {
    start: Instant,
    agg: &'a DurationAgg,
}

impl<'a> ScopedTimer<'a> {
    pub fn new(agg: &'a DurationAgg) -> Self {
        Self {
            start: Instant::now(),
            agg,
        }
    }
}

impl Drop for ScopedTimer<'_> {
    fn drop(&mut self) {
        self.agg.record(self.start.elapsed());
    }
}

/// Outcome counters and per-call latency for one kind of storage operation
/// (delete, move, copy).
#[derive(Debug, Default)]
pub struct OpStats {
    pub attempted: Counter,
    pub succeeded: Counter,
    pub failed: Counter,
    pub latency: DurationAgg,
}

impl OpStats {
    pub fn snapshot(&self, wall: Duration) -> OpStatsSnapshot {
        OpStatsSnapshot {
            attempted: self.attempted.get(),
            succeeded: self.succeeded.get(),
            failed: self.failed.get(),
            latency: self.latency.snapshot(),
            wall,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpStatsSnapshot {
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub latency: DurationAggSnapshot,
    pub wall: Duration,
}

impl OpStatsSnapshot {
    /// Succeeded operations per wall-clock second; 0 when nothing ran.
    pub fn files_per_sec(&self) -> f64 {
        let secs = self.wall.as_secs_f64();
        if secs <= 0.0 {
            0.0
        } else {
            self.succeeded as f64 / secs
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_agg_tracks_max_and_avg() {
        let agg = DurationAgg::default();
        agg.record(Duration::from_nanos(10));
        agg.record(Duration::from_nanos(30));
        let snap = agg.snapshot();
        assert_eq!(snap.count, 2);
        assert_eq!(snap.max_ns, 30);
        assert_eq!(snap.avg_ns(), 20);
    }

    #[test]
    fn op_stats_rate() {
        let stats = OpStats::default();
        stats.attempted.inc_by(5);
        stats.succeeded.inc_by(4);
        stats.failed.inc();
        let snap = stats.snapshot(Duration::from_secs(2));
        assert_eq!(snap.attempted, 5);
        assert_eq!(snap.failed, 1);
        assert!((snap.files_per_sec() - 2.0).abs() < 1e-9);
        assert_eq!(OpStats::default().snapshot(Duration::ZERO).files_per_sec(), 0.0);
    }
}
