use std::sync::atomic::{AtomicU64, Ordering};

/// Number of histogram buckets.
pub const NUM_BUCKETS: usize = 10;

/// Histogram bucket boundaries in microseconds.
/// 10 buckets: <1ms, 1ms-10ms, 10ms-100ms, 100ms-1s, 1s-10s,
/// 10s-1m, 1m-10m, 10m-1h, 1h-10h, 10h+.
const BOUNDARIES: [u64; 9] = [
    1_000,          // 1 millisecond
    10_000,         // 10 milliseconds
    100_000,        // 100 milliseconds
    1_000_000,      // 1 second
    10_000_000,     // 10 seconds
    60_000_000,     // 1 minute
    600_000_000,    // 10 minutes
    3_600_000_000,  // 1 hour
    36_000_000_000, // 10 hours
];

/// Exponential histogram for stuck/lag durations.
/// All operations are atomic and safe for concurrent use.
pub struct Histogram {
    buckets: [AtomicU64; NUM_BUCKETS],
}

impl Histogram {
    /// Creates a new histogram with all buckets at zero.
    pub fn new() -> Self {
        Self {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    /// Records a value (in microseconds) to the appropriate bucket.
    pub fn record(&self, value_us: u64) {
        let idx = bucket_index(value_us);
        if let Some(bucket) = self.buckets.get(idx) {
            bucket.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Returns the current bucket counts as a snapshot.
    pub fn snapshot(&self) -> [u64; NUM_BUCKETS] {
        let mut result = [0u64; NUM_BUCKETS];
        for (slot, bucket) in result.iter_mut().zip(self.buckets.iter()) {
            *slot = bucket.load(Ordering::Relaxed);
        }
        result
    }

    /// Total number of recorded values.
    pub fn count(&self) -> u64 {
        self.buckets
            .iter()
            .map(|b| b.load(Ordering::Relaxed))
            .sum()
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Histogram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Histogram")
            .field("buckets", &self.snapshot())
            .finish()
    }
}

/// Returns the bucket index for a given value in microseconds.
fn bucket_index(value_us: u64) -> usize {
    // Linear scan is fine for 9 boundaries.
    for (i, &boundary) in BOUNDARIES.iter().enumerate() {
        if value_us < boundary {
            return i;
        }
    }
    9 // +inf bucket
}
