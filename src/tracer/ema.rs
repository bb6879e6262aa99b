use std::time::{Duration, SystemTime};

/// Smoothing window shared by both delivery-speed averages.
const WINDOW: Duration = Duration::from_secs(60);

/// Exponential moving average weighted by the wall-clock gap between
/// samples: `alpha = 1 - exp(-dt / window)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MovingAverage {
    value: f64,
}

impl MovingAverage {
    pub fn update(&mut self, sample: f64, elapsed: Duration) {
        let alpha = 1.0 - (-elapsed.as_secs_f64() / WINDOW.as_secs_f64()).exp();
        self.value = (1.0 - alpha) * self.value + alpha * sample;

        let max_value = i64::MAX as f64;
        if self.value > max_value {
            self.value = max_value;
        }
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn rounded(&self) -> i64 {
        self.value.round() as i64
    }
}

/// Delivery-speed estimator over the stream's cumulative counters.
///
/// Callers feed cumulative delivered bytes/records; the estimator derives
/// per-period deltas itself. The first observation contributes nothing
/// because its elapsed time is zero.
#[derive(Debug, Default)]
pub struct SpeedEstimator {
    records: MovingAverage,
    bytes: MovingAverage,
    last_records: u64,
    last_bytes: u64,
    last_update: Option<SystemTime>,
}

impl SpeedEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one observation of the cumulative counters into both averages.
    pub fn observe(&mut self, now: SystemTime, bytes_delivered: u64, records_delivered: u64) {
        let elapsed = self
            .last_update
            .and_then(|last| now.duration_since(last).ok())
            .unwrap_or(Duration::ZERO);

        let record_delta = records_delivered.saturating_sub(self.last_records);
        let byte_delta = bytes_delivered.saturating_sub(self.last_bytes);

        self.records.update(record_delta as f64, elapsed);
        self.bytes.update(byte_delta as f64, elapsed);

        self.last_records = records_delivered;
        self.last_bytes = bytes_delivered;
        self.last_update = Some(now);
    }

    /// Smoothed records delivered per period, clamped to i64.
    pub fn records_per_period(&self) -> i64 {
        self.records.rounded()
    }

    /// Smoothed bytes delivered per period, clamped to i64.
    pub fn bytes_per_period(&self) -> i64 {
        self.bytes.rounded()
    }
}
