use std::collections::VecDeque;

/// One group of lag samples: the lag observed when the group opened, a
/// signed correction accumulated while tracking was paused, and a TTL in
/// ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LagBucket {
    pub time_lag_ms: i64,
    pub time_lag_correction_ms: i64,
    pub ttl: u32,
}

/// TTL assigned to a freshly opened bucket.
pub fn initial_ttl(group_size: usize, num_groups: usize) -> u32 {
    ((group_size * num_groups) as f64 * 1.25).ceil() as u32
}

/// Bounded FIFO of lag buckets, oldest first.
///
/// Pushing into a full record evicts the oldest bucket; `age` expires
/// buckets whose TTL ran out while no new groups were being opened.
#[derive(Debug)]
pub struct LagRecord {
    buckets: VecDeque<LagBucket>,
    capacity: usize,
}

impl LagRecord {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buckets: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.buckets.len() >= self.capacity
    }

    pub fn front(&self) -> Option<&LagBucket> {
        self.buckets.front()
    }

    pub fn back(&self) -> Option<&LagBucket> {
        self.buckets.back()
    }

    pub fn back_mut(&mut self) -> Option<&mut LagBucket> {
        self.buckets.back_mut()
    }

    /// Appends a bucket, evicting the oldest when at capacity.
    pub fn push(&mut self, bucket: LagBucket) {
        if self.is_full() {
            self.buckets.pop_front();
        }
        self.buckets.push_back(bucket);
    }

    /// Decrements every live TTL, then evicts expired buckets from the
    /// front.
    pub fn age(&mut self) {
        for bucket in &mut self.buckets {
            bucket.ttl = bucket.ttl.saturating_sub(1);
        }
        while self.buckets.front().is_some_and(|b| b.ttl == 0) {
            self.buckets.pop_front();
        }
    }

    /// Resizes the record, keeping the newest buckets.
    pub fn set_capacity(&mut self, capacity: usize) {
        let capacity = capacity.max(1);
        while self.buckets.len() > capacity {
            self.buckets.pop_front();
        }
        self.capacity = capacity;
    }

    /// Sum of the correction terms across all live buckets.
    pub fn correction_total_ms(&self) -> i64 {
        self.buckets.iter().map(|b| b.time_lag_correction_ms).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LagBucket> {
        self.buckets.iter()
    }

    /// Debug rendering, oldest first.
    pub fn pretty(&self) -> String {
        let entries: Vec<String> = self
            .buckets
            .iter()
            .map(|b| {
                format!(
                    "[ts_lag={},ts_lag_cor={},ttl={}]",
                    b.time_lag_ms, b.time_lag_correction_ms, b.ttl
                )
            })
            .collect();
        entries.join(",")
    }
}
