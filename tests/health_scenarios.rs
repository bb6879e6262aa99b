use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use readflow::clock::{ManualTimeSource, TimeSource};
use readflow::config::{Settings, Updateable};
use readflow::overload::OverloadFlag;
use readflow::sample::MemorySampleSink;
use readflow::sequencer::{
    PostError, SequencerClient, TailAttributes, TailQueryCompletion, TailQueryRequest,
    TailQueryResponse, TailQueryStatus,
};
use readflow::stats::{Stats, StreamCounter, StreamHistogram};
use readflow::stream::ReadStreamView;
use readflow::tracer::{HealthState, ReaderFlowTracer, TracerEnv};
use readflow::types::{LogId, Lsn, ReadStreamId, LSN_MAX};

const TICK: Duration = Duration::from_secs(1);

/// Scriptable read stream with interior mutability.
struct FakeStream {
    next_lsn_to_deliver: AtomicU64,
    until_lsn: AtomicU64,
    last_released: AtomicU64,
    last_in_record_ts_ms: AtomicI64,
    accumulated_byte_offset: Mutex<Option<u64>>,
    num_bytes_delivered: AtomicU64,
    num_records_delivered: AtomicU64,
    redelivery_timer_active: AtomicBool,
    window_update_pending: AtomicBool,
    tags: Vec<String>,
}

impl Default for FakeStream {
    fn default() -> Self {
        Self {
            next_lsn_to_deliver: AtomicU64::new(50),
            until_lsn: AtomicU64::new(LSN_MAX),
            last_released: AtomicU64::new(49),
            last_in_record_ts_ms: AtomicI64::new(1_000_000),
            accumulated_byte_offset: Mutex::new(Some(10_000)),
            num_bytes_delivered: AtomicU64::new(10_000),
            num_records_delivered: AtomicU64::new(100),
            redelivery_timer_active: AtomicBool::new(false),
            window_update_pending: AtomicBool::new(false),
            tags: vec!["analytics".to_string()],
        }
    }
}

impl FakeStream {
    fn set_next_lsn(&self, lsn: Lsn) {
        self.next_lsn_to_deliver.store(lsn, Ordering::Relaxed);
    }

    fn set_until_lsn(&self, lsn: Lsn) {
        self.until_lsn.store(lsn, Ordering::Relaxed);
    }

    fn set_last_released(&self, lsn: Lsn) {
        self.last_released.store(lsn, Ordering::Relaxed);
    }

    fn set_last_in_record_ts_ms(&self, ts: i64) {
        self.last_in_record_ts_ms.store(ts, Ordering::Relaxed);
    }

    fn set_window_update_pending(&self, pending: bool) {
        self.window_update_pending.store(pending, Ordering::Relaxed);
    }

    fn set_redelivery_timer_active(&self, active: bool) {
        self.redelivery_timer_active.store(active, Ordering::Relaxed);
    }
}

impl ReadStreamView for FakeStream {
    fn log_id(&self) -> LogId {
        LogId(1)
    }

    fn log_group_name(&self) -> String {
        "/payments".to_string()
    }

    fn read_stream_id(&self) -> ReadStreamId {
        ReadStreamId(7)
    }

    fn client_session_id(&self) -> String {
        "session-1".to_string()
    }

    fn start_lsn(&self) -> Lsn {
        1
    }

    fn until_lsn(&self) -> Lsn {
        self.until_lsn.load(Ordering::Relaxed)
    }

    fn next_lsn_to_deliver(&self) -> Lsn {
        self.next_lsn_to_deliver.load(Ordering::Relaxed)
    }

    fn trim_point(&self) -> Lsn {
        0
    }

    fn last_released(&self) -> Lsn {
        self.last_released.load(Ordering::Relaxed)
    }

    fn read_set_size(&self) -> usize {
        3
    }

    fn last_in_record_ts_ms(&self) -> i64 {
        self.last_in_record_ts_ms.load(Ordering::Relaxed)
    }

    fn accumulated_byte_offset(&self) -> Option<u64> {
        *self.accumulated_byte_offset.lock()
    }

    fn num_bytes_delivered(&self) -> u64 {
        self.num_bytes_delivered.load(Ordering::Relaxed)
    }

    fn num_records_delivered(&self) -> u64 {
        self.num_records_delivered.load(Ordering::Relaxed)
    }

    fn redelivery_timer_active(&self) -> bool {
        self.redelivery_timer_active.load(Ordering::Relaxed)
    }

    fn window_update_pending(&self) -> bool {
        self.window_update_pending.load(Ordering::Relaxed)
    }

    fn monitoring_tags(&self) -> Vec<String> {
        self.tags.clone()
    }

    fn epoch_metadata(&self) -> String {
        "epoch=5".to_string()
    }

    fn unavailable_shards(&self) -> String {
        String::new()
    }

    fn scd_down_shards(&self) -> Option<String> {
        None
    }

    fn scd_slow_shards(&self) -> Option<String> {
        None
    }

    fn storage_set_health(&self) -> String {
        "all_healthy".to_string()
    }

    fn sender_state(&self) -> String {
        "idle".to_string()
    }

    fn grace_counters(&self) -> String {
        String::new()
    }

    fn shard_status_version(&self) -> u64 {
        12
    }

    fn waiting_for_node(&self) -> String {
        "N3:S0".to_string()
    }

    fn reading_mode(&self) -> String {
        "rebuilding=false".to_string()
    }
}

/// Sequencer fake that captures completions for manual delivery.
#[derive(Default)]
struct FakeSequencer {
    pending: Mutex<Vec<(TailQueryRequest, TailQueryCompletion)>>,
    posts: AtomicU64,
    fail_posts: AtomicBool,
    auto_response: Mutex<Option<TailQueryResponse>>,
}

impl FakeSequencer {
    fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    fn post_count(&self) -> u64 {
        self.posts.load(Ordering::Relaxed)
    }

    fn take_pending(&self) -> Vec<(TailQueryRequest, TailQueryCompletion)> {
        std::mem::take(&mut self.pending.lock())
    }

    fn complete_all(&self, response: &TailQueryResponse) {
        for (_, completion) in self.take_pending() {
            completion(response.clone());
        }
    }
}

impl SequencerClient for FakeSequencer {
    fn post_tail_query(
        &self,
        request: TailQueryRequest,
        completion: TailQueryCompletion,
    ) -> Result<(), PostError> {
        if self.fail_posts.load(Ordering::Relaxed) {
            return Err(PostError::QueueFull);
        }
        self.posts.fetch_add(1, Ordering::Relaxed);

        let auto = self.auto_response.lock().clone();
        if let Some(response) = auto {
            completion(response);
        } else {
            self.pending.lock().push((request, completion));
        }
        Ok(())
    }
}

struct Harness {
    env: TracerEnv,
    stream: Arc<FakeStream>,
    // Keeps the trait-object Arc alive; the tracer only holds a Weak.
    stream_dyn: Arc<dyn ReadStreamView>,
    sequencer: Arc<FakeSequencer>,
    samples: Arc<MemorySampleSink>,
    stats: Arc<Stats>,
    overload: Arc<OverloadFlag>,
    time: Arc<ManualTimeSource>,
    settings: Arc<Updateable<Settings>>,
}

impl Harness {
    fn new(settings: Settings) -> Self {
        let stream = Arc::new(FakeStream::default());
        let stream_dyn: Arc<dyn ReadStreamView> = Arc::clone(&stream) as Arc<dyn ReadStreamView>;
        let sequencer = Arc::new(FakeSequencer::default());
        let samples = Arc::new(MemorySampleSink::new());
        let stats = Arc::new(Stats::new());
        let overload = Arc::new(OverloadFlag::new());
        let time = Arc::new(ManualTimeSource::new(UNIX_EPOCH + Duration::from_secs(10_000)));
        let settings = Updateable::new(settings);

        let env = TracerEnv {
            settings: Arc::clone(&settings),
            stats: Arc::clone(&stats),
            samples: Arc::clone(&samples) as Arc<dyn readflow::sample::SampleSink>,
            sequencer: Arc::clone(&sequencer) as Arc<dyn SequencerClient>,
            overload: Arc::clone(&overload) as Arc<dyn readflow::overload::OverloadDetector>,
            time: Arc::clone(&time) as Arc<dyn readflow::clock::TimeSource>,
        };

        Self {
            env,
            stream,
            stream_dyn,
            sequencer,
            samples,
            stats,
            overload,
            time,
            settings,
        }
    }

    fn tracer(&self) -> ReaderFlowTracer {
        ReaderFlowTracer::new(
            self.env.clone(),
            Arc::downgrade(&self.stream_dyn),
            /*push_samples=*/ true,
            /*ignore_overload=*/ false,
        )
    }

    fn now(&self) -> SystemTime {
        self.time.now()
    }

    fn now_ms(&self) -> i64 {
        self.now()
            .duration_since(UNIX_EPOCH)
            .expect("post-epoch clock")
            .as_millis() as i64
    }

    /// One tick of the primary tracer followed by the given completion,
    /// then one tick period of simulated time.
    fn step(&self, tracer: &ReaderFlowTracer, response: &TailQueryResponse) {
        tracer.tick_now();
        self.sequencer.complete_all(response);
        self.time.advance(TICK);
    }

    fn assert_counters_zero(&self) {
        for counter in StreamCounter::all() {
            assert_eq!(self.stats.total(counter), 0, "total {}", counter.as_str());
            assert_eq!(
                self.stats.ignoring_overload(counter),
                0,
                "ignoring_overload {}",
                counter.as_str(),
            );
            assert_eq!(
                self.stats.tagged("analytics", counter),
                0,
                "tagged {}",
                counter.as_str(),
            );
        }
    }
}

fn scenario_settings() -> Settings {
    Settings {
        tracer_period: TICK,
        stuck_threshold: Duration::from_secs(60),
        ..Settings::default()
    }
}

fn ok_response(tail_lsn: Lsn, tail_ts_ms: i64, byte_offset: Option<u64>) -> TailQueryResponse {
    TailQueryResponse {
        status: TailQueryStatus::Ok,
        next_lsn: tail_lsn + 1,
        attributes: Some(TailAttributes {
            last_released_real_lsn: tail_lsn,
            last_timestamp_ms: tail_ts_ms,
            byte_offset,
        }),
    }
}

fn failed_response() -> TailQueryResponse {
    TailQueryResponse {
        status: TailQueryStatus::Failed,
        next_lsn: 0,
        attributes: None,
    }
}

// --- End-to-end scenarios ---

#[test]
fn test_s1_consumer_at_tail_stays_healthy() {
    let h = Harness::new(scenario_settings());
    let tracer = h.tracer();

    // Consumer keeps next_lsn_to_deliver one past the tail; zero time lag.
    let last_delivered_ts = h.stream.last_in_record_ts_ms.load(Ordering::Relaxed);
    for _ in 0..120 {
        let tail = h.stream.next_lsn_to_deliver() - 1;
        h.step(&tracer, &ok_response(tail, last_delivered_ts, Some(10_000)));
        assert_eq!(tracer.last_reported_state(), HealthState::Healthy);
    }

    h.assert_counters_zero();
    assert_eq!(h.samples.len(), 120);

    let (weight, sample) = h.samples.last().expect("sample published");
    assert!((weight - 1.0).abs() < f64::EPSILON);
    assert_eq!(sample.string("state"), Some("healthy"));
    assert_eq!(sample.int("timestamp_lagged"), Some(0));
    assert_eq!(sample.int("bytes_lagged"), Some(0));
}

#[test]
fn test_s2_stuck_by_position_after_dwell() {
    let h = Harness::new(scenario_settings());
    let tracer = h.tracer();

    // The tail is ahead of the reader and the reader never advances.
    let response = ok_response(100, 1_500_000, None);

    for second in 0..60 {
        h.step(&tracer, &response);
        if second < 59 {
            assert_eq!(
                tracer.last_reported_state(),
                HealthState::Healthy,
                "t={second}",
            );
        }
    }

    // The 61st tick happens at t=60: the dwell threshold is met.
    h.step(&tracer, &response);
    assert_eq!(tracer.last_reported_state(), HealthState::Stuck);
    assert_eq!(h.stats.total(StreamCounter::Stuck), 1);
    assert_eq!(h.stats.total(StreamCounter::StuckOrLagging), 1);
    assert_eq!(h.stats.tagged("analytics", StreamCounter::Stuck), 1);
    assert_eq!(h.stats.total(StreamCounter::StuckFailingTailQuery), 0);

    // The consumer advances past the tail: healthy within one tick.
    h.stream.set_next_lsn(101);
    h.step(&tracer, &response);
    assert_eq!(tracer.last_reported_state(), HealthState::Healthy);
    assert_eq!(h.stats.total(StreamCounter::Stuck), 0);
    assert_eq!(h.stats.total(StreamCounter::StuckOrLagging), 0);
}

#[test]
fn test_s3_stuck_while_failing_tail_query() {
    let h = Harness::new(scenario_settings());
    let tracer = h.tracer();

    // Reader is at the estimated tail and every tail query fails.
    h.stream.set_next_lsn(50);
    h.stream.set_last_released(50);

    for _ in 0..=60 {
        h.step(&tracer, &failed_response());
    }
    assert_eq!(
        tracer.last_reported_state(),
        HealthState::StuckWhileFailingTailQuery,
    );
    assert_eq!(h.stats.total(StreamCounter::Stuck), 1);
    assert_eq!(h.stats.total(StreamCounter::StuckFailingTailQuery), 1);
    // This state is not part of the stuck-or-lagging union.
    assert_eq!(h.stats.total(StreamCounter::StuckOrLagging), 0);

    for _ in 0..59 {
        h.step(&tracer, &failed_response());
        assert_eq!(
            tracer.last_reported_state(),
            HealthState::StuckWhileFailingTailQuery,
        );
    }

    // First success shows the reader at the tail: healthy within one tick.
    h.step(&tracer, &ok_response(49, 1_000_000, None));
    assert_eq!(tracer.last_reported_state(), HealthState::Healthy);
    h.assert_counters_zero();
}

#[test]
fn test_s4_growing_lag_reports_lagging() {
    let h = Harness::new(scenario_settings());
    let tracer = h.tracer();

    // Tail position far ahead but within a moving-tail read (until=MAX);
    // the time lag grows by 500ms per tick.
    let base_ts = h.stream.last_in_record_ts_ms.load(Ordering::Relaxed);
    let mut lagged_tick = None;
    for tick in 0..16 {
        let lag_ms = 500 * (tick + 1);
        h.step(&tracer, &ok_response(1_000, base_ts + lag_ms, None));
        if tracer.last_reported_state() == HealthState::Lagging && lagged_tick.is_none() {
            lagged_tick = Some(tick);
        }
    }

    let lagged_tick = lagged_tick.expect("lagging should be reported");
    // Needs a full lag record: not before the third sample group opens.
    assert!(lagged_tick >= 8, "lagged_tick={lagged_tick}");
    assert_eq!(tracer.last_reported_state(), HealthState::Lagging);
    assert_eq!(h.stats.total(StreamCounter::Lagging), 1);
    assert_eq!(h.stats.total(StreamCounter::StuckOrLagging), 1);
    assert_eq!(h.stats.total(StreamCounter::StuckFailingTailQuery), 0);
}

#[test]
fn test_s5_overload_gates_primary_but_not_shadow() {
    let h = Harness::new(scenario_settings());
    let tracer = h.tracer();
    let shadow = tracer.shadow().expect("primary owns a shadow");

    h.overload.set(true);

    // Stuck-inducing responses: tail far ahead, reader never advances.
    let response = ok_response(100, 2_000_000, None);
    for _ in 0..=61 {
        tracer.tick_now();
        shadow.tick_now();
        h.sequencer.complete_all(&response);
        h.time.advance(TICK);
    }

    assert_eq!(tracer.last_reported_state(), HealthState::Healthy);
    assert_eq!(shadow.last_reported_state(), HealthState::Stuck);

    // Only the ignoring-overload family moved.
    assert_eq!(h.stats.ignoring_overload(StreamCounter::Stuck), 1);
    assert_eq!(h.stats.ignoring_overload(StreamCounter::StuckOrLagging), 1);
    assert_eq!(h.stats.total(StreamCounter::Stuck), 0);
    assert_eq!(h.stats.tagged("analytics", StreamCounter::Stuck), 0);
}

#[test]
fn test_s6_back_pressure_exempts_both_tracers() {
    let h = Harness::new(scenario_settings());
    let tracer = h.tracer();
    let shadow = tracer.shadow().expect("primary owns a shadow");

    h.stream.set_window_update_pending(true);
    tracer.on_window_update_pending();

    let base_ts = h.stream.last_in_record_ts_ms.load(Ordering::Relaxed);
    for tick in 0..120 {
        let response = ok_response(1_000, base_ts + 500 * (tick + 1), None);
        tracer.tick_now();
        shadow.tick_now();
        h.sequencer.complete_all(&response);
        h.time.advance(TICK);
    }

    assert_eq!(tracer.last_reported_state(), HealthState::Healthy);
    assert_eq!(shadow.last_reported_state(), HealthState::Healthy);
    h.assert_counters_zero();
}

// --- Invariants ---

#[test]
fn test_counter_conservation_on_drop() {
    let h = Harness::new(scenario_settings());
    let tracer = h.tracer();
    let shadow = tracer.shadow().expect("primary owns a shadow");

    // Drive both tracers into a stuck state.
    let response = ok_response(100, 2_000_000, None);
    for _ in 0..=61 {
        tracer.tick_now();
        shadow.tick_now();
        h.sequencer.complete_all(&response);
        h.time.advance(TICK);
    }
    assert_eq!(h.stats.total(StreamCounter::Stuck), 1);
    assert_eq!(h.stats.ignoring_overload(StreamCounter::Stuck), 1);

    drop(shadow);
    drop(tracer);
    h.assert_counters_zero();
}

#[test]
fn test_single_flight_tail_queries() {
    let h = Harness::new(scenario_settings());
    let tracer = h.tracer();

    tracer.tick_now();
    assert!(tracer.tail_query_in_flight());
    assert_eq!(h.sequencer.pending_count(), 1);

    // Further ticks do not post while the first query is outstanding.
    tracer.tick_now();
    tracer.tick_now();
    assert_eq!(h.sequencer.post_count(), 1);
    assert_eq!(h.sequencer.pending_count(), 1);

    h.sequencer.complete_all(&ok_response(49, 1_000_000, None));
    assert!(!tracer.tail_query_in_flight());

    tracer.tick_now();
    assert_eq!(h.sequencer.post_count(), 2);
}

#[test]
fn test_completion_after_destruction_is_noop() {
    let h = Harness::new(scenario_settings());
    let tracer = h.tracer();

    tracer.tick_now();
    let mut pending = h.sequencer.take_pending();
    assert_eq!(pending.len(), 1);
    let (_, completion) = pending.pop().expect("one captured completion");

    drop(tracer);

    // The weak back-reference is dead; the late response must be dropped.
    completion(ok_response(100, 2_000_000, None));
    h.assert_counters_zero();
    assert!(h.samples.is_empty());
}

#[test]
fn test_fixed_until_never_reports_lagging() {
    let h = Harness::new(scenario_settings());
    h.stream.set_until_lsn(1_000); // finite target, not a moving tail
    let tracer = h.tracer();

    let base_ts = h.stream.last_in_record_ts_ms.load(Ordering::Relaxed);
    for tick in 0..40 {
        h.step(&tracer, &ok_response(500, base_ts + 500 * (tick + 1), None));
        assert_ne!(tracer.last_reported_state(), HealthState::Lagging);
    }
    assert_eq!(h.stats.total(StreamCounter::Lagging), 0);
}

#[test]
fn test_lag_within_one_tick_clears_lagging() {
    let h = Harness::new(scenario_settings());
    let tracer = h.tracer();

    // Grow the lag until LAGGING is reported.
    let base_ts = h.stream.last_in_record_ts_ms.load(Ordering::Relaxed);
    for tick in 0..16 {
        h.step(&tracer, &ok_response(1_000, base_ts + 500 * (tick + 1), None));
    }
    assert_eq!(tracer.last_reported_state(), HealthState::Lagging);

    // One sample within a tick period of the tail clears it, regardless of
    // the accumulated history.
    h.step(&tracer, &ok_response(1_000, base_ts + 800, None));
    assert_ne!(tracer.last_reported_state(), HealthState::Lagging);
    assert_eq!(h.stats.total(StreamCounter::Lagging), 0);
}

#[test]
fn test_lag_record_bounded_by_num_groups() {
    let h = Harness::new(scenario_settings());
    let tracer = h.tracer();

    let base_ts = h.stream.last_in_record_ts_ms.load(Ordering::Relaxed);
    for tick in 0..100 {
        h.step(&tracer, &ok_response(1_000, base_ts + 500 * (tick + 1), None));

        let buckets = tracer.lag_record_pretty().matches("[ts_lag=").count();
        assert!(buckets <= 3, "tick={tick} buckets={buckets}");
    }
}

#[test]
fn test_tracking_gate_corrections_cancel_paused_lag() {
    let h = Harness::new(scenario_settings());
    let tracer = h.tracer();

    // Constant 5s lag: numerator stays zero, reader stays healthy.
    let base_ts = h.stream.last_in_record_ts_ms.load(Ordering::Relaxed);
    for _ in 0..9 {
        h.step(&tracer, &ok_response(1_000, base_ts + 5_000, None));
    }
    assert_eq!(tracer.last_reported_state(), HealthState::Healthy);

    // Pause tracking; the lag grows to 9s while paused.
    h.stream.set_window_update_pending(true);
    tracer.on_window_update_pending();
    for _ in 0..2 {
        h.step(&tracer, &ok_response(1_000, base_ts + 9_000, None));
    }

    // Resume tracking: the growth during the pause is corrected away.
    h.stream.set_window_update_pending(false);
    tracer.on_window_update_sent();
    for _ in 0..2 {
        h.step(&tracer, &ok_response(1_000, base_ts + 9_000, None));
        assert_eq!(tracer.last_reported_state(), HealthState::Healthy);
    }
}

#[test]
fn test_lag_jump_while_tracked_reports_lagging() {
    // Control for the correction test: the same lag jump without a
    // tracking pause is real lag growth.
    let h = Harness::new(scenario_settings());
    let tracer = h.tracer();

    let base_ts = h.stream.last_in_record_ts_ms.load(Ordering::Relaxed);
    for _ in 0..9 {
        h.step(&tracer, &ok_response(1_000, base_ts + 5_000, None));
    }
    assert_eq!(tracer.last_reported_state(), HealthState::Healthy);

    for _ in 0..2 {
        h.step(&tracer, &ok_response(1_000, base_ts + 9_000, None));
    }
    assert_eq!(tracer.last_reported_state(), HealthState::Lagging);
}

#[test]
fn test_redelivery_timer_pauses_tracking() {
    let h = Harness::new(scenario_settings());
    let tracer = h.tracer();

    h.stream.set_redelivery_timer_active(true);
    tracer.on_redelivery_timer_active();

    let response = ok_response(100, 2_000_000, None);
    for _ in 0..120 {
        h.step(&tracer, &response);
    }
    assert_eq!(tracer.last_reported_state(), HealthState::Healthy);

    // Once the timer deactivates, the stuck dwell starts from scratch.
    h.stream.set_redelivery_timer_active(false);
    tracer.on_redelivery_timer_inactive();
    for _ in 0..=60 {
        h.step(&tracer, &response);
    }
    assert_eq!(tracer.last_reported_state(), HealthState::Stuck);
}

#[test]
fn test_missing_attributes_treated_as_failure() {
    let h = Harness::new(scenario_settings());
    let tracer = h.tracer();

    h.stream.set_next_lsn(50);
    h.stream.set_last_released(50);

    let response = TailQueryResponse {
        status: TailQueryStatus::Ok,
        next_lsn: 100,
        attributes: None,
    };
    for _ in 0..=60 {
        h.step(&tracer, &response);
    }

    assert_eq!(
        tracer.last_reported_state(),
        HealthState::StuckWhileFailingTailQuery,
    );
    // No tail info was ever latched from the attribute-less responses.
    assert_eq!(tracer.last_tail_info_pretty(), "NONE");
}

#[test]
fn test_failed_post_runs_completion_path_inline() {
    let h = Harness::new(scenario_settings());
    let tracer = h.tracer();

    h.stream.set_next_lsn(50);
    h.stream.set_last_released(50);
    h.sequencer.fail_posts.store(true, Ordering::Relaxed);

    for _ in 0..=60 {
        tracer.tick_now();
        h.time.advance(TICK);
    }

    // The NoBuffers path still drove the state machine every tick.
    assert!(!tracer.tail_query_in_flight());
    assert_eq!(
        tracer.last_reported_state(),
        HealthState::StuckWhileFailingTailQuery,
    );
}

#[test]
fn test_settings_reload_resizes_lag_record() {
    let h = Harness::new(scenario_settings());
    let tracer = h.tracer();

    let base_ts = h.stream.last_in_record_ts_ms.load(Ordering::Relaxed);
    for tick in 0..20 {
        h.step(&tracer, &ok_response(1_000, base_ts + 500 * (tick + 1), None));
    }
    assert_eq!(tracer.lag_record_pretty().matches("[ts_lag=").count(), 3);

    let mut settings = scenario_settings();
    settings.lagging_metric_num_sample_groups = 5;
    h.settings.set(settings).expect("settings update");
    tracer.on_settings_updated();

    for tick in 20..60 {
        h.step(&tracer, &ok_response(1_000, base_ts + 500 * (tick + 1), None));
    }
    assert_eq!(tracer.lag_record_pretty().matches("[ts_lag=").count(), 5);
}

#[test]
fn test_unhealthy_weight_applied_when_stuck() {
    let mut settings = scenario_settings();
    settings.unhealthy_publish_weight = 7.5;
    let h = Harness::new(settings);
    let tracer = h.tracer();

    let response = ok_response(100, 2_000_000, None);
    for _ in 0..=61 {
        h.step(&tracer, &response);
    }
    assert_eq!(tracer.last_reported_state(), HealthState::Stuck);

    let (weight, sample) = h.samples.last().expect("sample published");
    assert!((weight - 7.5).abs() < f64::EPSILON);
    assert_eq!(sample.string("state"), Some("stuck"));
    // Stuck readers report which node they are blocked on.
    assert_eq!(sample.string("waiting_for_node"), Some("N3:S0"));
}

#[test]
fn test_unhealthy_weight_applied_when_tag_threshold_exceeded() {
    let mut settings = scenario_settings();
    settings.unhealthy_publish_weight = 5.0;
    settings
        .max_acceptable_time_lag_per_tag
        .insert("analytics".to_string(), Duration::from_secs(1));
    let h = Harness::new(settings);
    let tracer = h.tracer();

    // Constant 5s lag: healthy, but above the analytics threshold.
    let base_ts = h.stream.last_in_record_ts_ms.load(Ordering::Relaxed);
    h.step(&tracer, &ok_response(1_000, base_ts + 5_000, None));

    assert_eq!(tracer.last_reported_state(), HealthState::Healthy);
    let (weight, sample) = h.samples.last().expect("sample published");
    assert!((weight - 5.0).abs() < f64::EPSILON);
    assert_eq!(sample.int("timestamp_lagged"), Some(5_000));
    // Healthy readers leave the blocking-node field empty.
    assert_eq!(sample.string("waiting_for_node"), Some(""));
}

#[test]
fn test_sample_carries_stream_snapshot_fields() {
    let h = Harness::new(scenario_settings());
    let tracer = h.tracer();

    h.step(&tracer, &ok_response(49, 1_000_000, Some(14_096)));

    let (_, sample) = h.samples.last().expect("sample published");
    assert_eq!(sample.string("log_id"), Some("1"));
    assert_eq!(sample.string("log_group_name"), Some("/payments"));
    assert_eq!(sample.string("read_stream_id"), Some("7"));
    assert_eq!(sample.string("csid"), Some("session-1"));
    assert_eq!(sample.string("from_lsn"), Some("1"));
    assert_eq!(sample.string("until_lsn"), Some("LSN_MAX"));
    assert_eq!(sample.string("reader_pointer"), Some("50"));
    assert_eq!(sample.string("epoch_metadata"), Some("epoch=5"));
    assert_eq!(sample.string("storage_set_health_status"), Some("all_healthy"));
    assert_eq!(sample.int("readset_size"), Some(3));
    assert_eq!(sample.int("shard_status_version"), Some(12));
    assert_eq!(sample.int("in_overloaded_worker"), Some(0));
    assert_eq!(sample.string("reading_mode"), Some("rebuilding=false"));
    assert!(sample.get("monitoring_tags").is_some());
    // Reader at tail: both lag estimates are zero.
    assert_eq!(sample.int("bytes_lagged"), Some(0));
    assert_eq!(sample.int("timestamp_lagged"), Some(0));
}

#[test]
fn test_byte_lag_derived_from_offsets() {
    let h = Harness::new(scenario_settings());
    let tracer = h.tracer();

    // Tail ahead with byte offset 14096 against 10000 delivered.
    h.step(&tracer, &ok_response(100, h.now_ms(), Some(14_096)));

    let (_, sample) = h.samples.last().expect("sample published");
    assert_eq!(sample.int("bytes_lagged"), Some(4_096));
}

#[test]
fn test_histograms_bumped_per_tick() {
    let h = Harness::new(scenario_settings());
    let tracer = h.tracer();

    let base_ts = h.stream.last_in_record_ts_ms.load(Ordering::Relaxed);
    for tick in 0..10 {
        h.step(&tracer, &ok_response(1_000, base_ts + 500 * (tick + 1), None));
    }

    assert_eq!(
        h.stats.histogram_count("analytics", StreamHistogram::TimeStuck),
        10,
    );
    assert_eq!(
        h.stats.histogram_count("analytics", StreamHistogram::TimeLag),
        10,
    );
}

#[test]
fn test_shadow_does_not_publish_samples() {
    let h = Harness::new(scenario_settings());
    let tracer = h.tracer();
    let shadow = tracer.shadow().expect("primary owns a shadow");
    assert!(shadow.shadow().is_none(), "shadow pairing is single-level");

    let response = ok_response(100, 2_000_000, None);
    shadow.tick_now();
    h.sequencer.complete_all(&response);

    assert!(h.samples.is_empty());
}

#[tokio::test]
async fn test_started_tracer_ticks_on_its_own() {
    let mut settings = scenario_settings();
    settings.tracer_period = Duration::from_millis(20);
    let h = Harness::new(settings);

    // Let the fake respond inline so the single-flight gate reopens.
    *h.sequencer.auto_response.lock() = Some(ok_response(49, 1_000_000, None));

    let tracer = h.tracer();
    tracer.start();

    tokio::time::sleep(Duration::from_millis(200)).await;
    let posts = h.sequencer.post_count();
    // Primary and shadow each tick several times in 200ms.
    assert!(posts >= 4, "posts={posts}");

    drop(tracer);
    tokio::time::sleep(Duration::from_millis(100)).await;
    let after_drop = h.sequencer.post_count();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.sequencer.post_count(), after_drop);
}

#[tokio::test]
async fn test_zero_period_disables_timer() {
    let mut settings = scenario_settings();
    settings.tracer_period = Duration::ZERO;
    let h = Harness::new(settings);

    *h.sequencer.auto_response.lock() = Some(ok_response(49, 1_000_000, None));

    let tracer = h.tracer();
    tracer.start();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.sequencer.post_count(), 0);

    // Enabling the period through a settings update arms the timer.
    let mut enabled = scenario_settings();
    enabled.tracer_period = Duration::from_millis(20);
    h.settings.set(enabled).expect("settings update");
    tracer.on_settings_updated();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(h.sequencer.post_count() >= 2);
}
