pub mod histogram;

use std::sync::atomic::{AtomicI64, Ordering};

use dashmap::DashMap;

use self::histogram::{Histogram, NUM_BUCKETS};

/// Counters bumped on reported-state transitions of a read stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamCounter {
    /// STUCK or LAGGING.
    StuckOrLagging,
    /// STUCK or STUCK_WHILE_FAILING_TAIL_QUERY.
    Stuck,
    /// LAGGING only.
    Lagging,
    /// STUCK_WHILE_FAILING_TAIL_QUERY only.
    StuckFailingTailQuery,
}

const COUNTER_COUNT: usize = 4;

const ALL_COUNTERS: [StreamCounter; COUNTER_COUNT] = [
    StreamCounter::StuckOrLagging,
    StreamCounter::Stuck,
    StreamCounter::Lagging,
    StreamCounter::StuckFailingTailQuery,
];

impl StreamCounter {
    pub fn all() -> impl Iterator<Item = StreamCounter> {
        ALL_COUNTERS.into_iter()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StreamCounter::StuckOrLagging => "read_streams_stuck_or_lagging",
            StreamCounter::Stuck => "read_streams_stuck",
            StreamCounter::Lagging => "read_streams_lagging",
            StreamCounter::StuckFailingTailQuery => "read_streams_stuck_failing_tail_query",
        }
    }

    fn index(self) -> usize {
        match self {
            StreamCounter::StuckOrLagging => 0,
            StreamCounter::Stuck => 1,
            StreamCounter::Lagging => 2,
            StreamCounter::StuckFailingTailQuery => 3,
        }
    }
}

/// Per-tag latency histograms contributed each tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamHistogram {
    /// Microseconds the reader has been continuously stuck.
    TimeStuck,
    /// Estimated timestamp lag behind the tail, in microseconds.
    TimeLag,
}

/// One set of the four stream-state counters.
#[derive(Debug, Default)]
pub struct CounterSet {
    counts: [AtomicI64; COUNTER_COUNT],
}

impl CounterSet {
    fn add(&self, counter: StreamCounter, delta: i64) {
        self.counts[counter.index()].fetch_add(delta, Ordering::Relaxed);
    }

    pub fn get(&self, counter: StreamCounter) -> i64 {
        self.counts[counter.index()].load(Ordering::Relaxed)
    }
}

/// Histograms kept per monitoring tag.
#[derive(Debug, Default)]
pub struct HistogramSet {
    time_stuck: Histogram,
    time_lag: Histogram,
}

impl HistogramSet {
    fn histogram(&self, which: StreamHistogram) -> &Histogram {
        match which {
            StreamHistogram::TimeStuck => &self.time_stuck,
            StreamHistogram::TimeLag => &self.time_lag,
        }
    }
}

/// Process-wide statistics sink for reader-flow health tracing.
///
/// The normal counter family is partitioned by monitoring tag (plus an
/// untagged aggregate); the ignoring-overload family is untagged. All
/// operations are atomic and safe for concurrent use.
#[derive(Debug, Default)]
pub struct Stats {
    totals: CounterSet,
    ignoring_overload: CounterSet,
    tagged: DashMap<String, CounterSet>,
    tagged_histograms: DashMap<String, HistogramSet>,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bumps a normal-family counter: the aggregate once, plus one entry
    /// per monitoring tag.
    pub fn tagged_add(&self, tags: &[String], counter: StreamCounter, delta: i64) {
        self.totals.add(counter, delta);
        for tag in tags {
            self.tagged
                .entry(tag.clone())
                .or_default()
                .add(counter, delta);
        }
    }

    /// Bumps an ignoring-overload-family counter.
    pub fn ignoring_overload_add(&self, counter: StreamCounter, delta: i64) {
        self.ignoring_overload.add(counter, delta);
    }

    /// Records a per-tag histogram value in microseconds.
    pub fn histogram_add(&self, tags: &[String], which: StreamHistogram, value_us: u64) {
        for tag in tags {
            self.tagged_histograms
                .entry(tag.clone())
                .or_default()
                .histogram(which)
                .record(value_us);
        }
    }

    /// Normal-family aggregate value.
    pub fn total(&self, counter: StreamCounter) -> i64 {
        self.totals.get(counter)
    }

    /// Ignoring-overload-family value.
    pub fn ignoring_overload(&self, counter: StreamCounter) -> i64 {
        self.ignoring_overload.get(counter)
    }

    /// Normal-family value for one monitoring tag (zero if never bumped).
    pub fn tagged(&self, tag: &str, counter: StreamCounter) -> i64 {
        self.tagged.get(tag).map_or(0, |set| set.get(counter))
    }

    /// Snapshot of one tag's histogram buckets (zeros if never recorded).
    pub fn histogram_snapshot(&self, tag: &str, which: StreamHistogram) -> [u64; NUM_BUCKETS] {
        self.tagged_histograms
            .get(tag)
            .map_or([0; NUM_BUCKETS], |set| set.histogram(which).snapshot())
    }

    /// Number of values recorded into one tag's histogram.
    pub fn histogram_count(&self, tag: &str, which: StreamHistogram) -> u64 {
        self.tagged_histograms
            .get(tag)
            .map_or(0, |set| set.histogram(which).count())
    }
}
