pub mod ema;
pub mod lag;
mod timer;

use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use tracing::warn;

use crate::clock::TimeSource;
use crate::config::{Settings, Updateable};
use crate::overload::OverloadDetector;
use crate::sample::{SampleSink, TraceSample};
use crate::sequencer::{
    SequencerClient, TailQueryCompletion, TailQueryFlags, TailQueryRequest, TailQueryResponse,
    TailQueryStatus,
};
use crate::stats::{Stats, StreamCounter, StreamHistogram};
use crate::stream::ReadStreamView;
use crate::types::{lsn_to_string, Lsn, LSN_INVALID, LSN_MAX};

use self::ema::SpeedEstimator;
use self::lag::{initial_ttl, LagBucket, LagRecord};
use self::timer::TickTimer;

/// Minimum spacing between repeated failure warnings from one tracer.
const FAILURE_LOG_INTERVAL: Duration = Duration::from_secs(10);

/// Reported health of a read stream's consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Lagging,
    Stuck,
    StuckWhileFailingTailQuery,
}

impl HealthState {
    pub fn as_str(self) -> &'static str {
        match self {
            HealthState::Healthy => "healthy",
            HealthState::Lagging => "lagging",
            HealthState::Stuck => "stuck",
            HealthState::StuckWhileFailingTailQuery => "stuck_while_failing_tail_query",
        }
    }

    /// Coarse label folding both stuck variants together.
    pub fn coarse_str(self) -> &'static str {
        match self {
            HealthState::Healthy => "healthy",
            HealthState::Lagging => "lagging",
            HealthState::Stuck | HealthState::StuckWhileFailingTailQuery => "stuck",
        }
    }
}

/// Latched snapshot of the log tail from the last successful tail query.
#[derive(Debug, Clone, Copy)]
pub struct TailInfo {
    pub byte_offset: Option<u64>,
    pub timestamp_ms: i64,
    pub lsn_approx: Lsn,
}

impl TailInfo {
    pub fn pretty(&self) -> String {
        let byte_offset = self
            .byte_offset
            .map_or_else(|| "invalid".to_string(), |o| o.to_string());
        format!(
            "byte_offset={},ts={},lsn={}",
            byte_offset,
            self.timestamp_ms,
            lsn_to_string(self.lsn_approx),
        )
    }
}

/// Process-scoped collaborators handed to every tracer.
#[derive(Clone)]
pub struct TracerEnv {
    pub settings: Arc<Updateable<Settings>>,
    pub stats: Arc<Stats>,
    pub samples: Arc<dyn SampleSink>,
    pub sequencer: Arc<dyn SequencerClient>,
    pub overload: Arc<dyn OverloadDetector>,
    pub time: Arc<dyn TimeSource>,
}

#[derive(Debug, Clone, Copy)]
struct TracerParams {
    tracer_period: Duration,
    push_samples: bool,
    ignore_overload: bool,
}

/// Per-stream health tracer.
///
/// One instance per read stream; a primary tracer additionally owns a
/// shadow configured with `ignore_overload = true` feeding the untagged
/// counter family. Dropping the last handle settles all counters by
/// forcing a transition to healthy.
#[derive(Clone)]
pub struct ReaderFlowTracer {
    core: Arc<Mutex<TracerCore>>,
}

impl ReaderFlowTracer {
    pub fn new(
        env: TracerEnv,
        stream: Weak<dyn ReadStreamView>,
        push_samples: bool,
        ignore_overload: bool,
    ) -> Self {
        let settings = env.settings.get();
        let (monitoring_tags, next_lsn) = match stream.upgrade() {
            Some(s) => (s.monitoring_tags(), s.next_lsn_to_deliver()),
            None => (Vec::new(), LSN_INVALID),
        };

        let shadow = (!ignore_overload).then(|| {
            ReaderFlowTracer::new(
                env.clone(),
                stream.clone(),
                /*push_samples=*/ false,
                /*ignore_overload=*/ true,
            )
        });

        let params = TracerParams {
            tracer_period: settings.tracer_period,
            push_samples,
            ignore_overload,
        };
        let lag_record = LagRecord::new(settings.num_sample_groups());

        let core = Arc::new_cyclic(|weak: &Weak<Mutex<TracerCore>>| {
            Mutex::new(TracerCore {
                self_ref: weak.clone(),
                env,
                stream,
                params,
                monitoring_tags,
                speed: SpeedEstimator::new(),
                lag_record,
                sample_counter: 0,
                tail_info: None,
                last_tail_query_status: TailQueryStatus::Ok,
                tail_query_in_flight: false,
                last_next_lsn_to_deliver: next_lsn,
                first_stuck_at: None,
                first_lagging_at: None,
                last_reported_state: HealthState::Healthy,
                should_track: true,
                started: false,
                timer: TickTimer::new(),
                last_tail_warn: None,
                last_lag_warn: None,
                shadow,
            })
        });

        Self { core }
    }

    /// Activates the periodic tick task; the first tick fires immediately
    /// so an initial sample is published. A zero tracer period leaves the
    /// timer off. Must be called inside a tokio runtime.
    pub fn start(&self) {
        let mut core = self.core.lock();
        core.started = true;
        if let Some(shadow) = &core.shadow {
            shadow.start();
        }
        core.apply_timer_state(true);
    }

    /// Re-reads settings: tick period, lag-record capacity. Propagates to
    /// the shadow.
    pub fn on_settings_updated(&self) {
        self.core.lock().on_settings_updated();
    }

    pub fn on_redelivery_timer_active(&self) {
        self.owner_event();
    }

    pub fn on_redelivery_timer_inactive(&self) {
        self.owner_event();
    }

    pub fn on_window_update_pending(&self) {
        self.owner_event();
    }

    pub fn on_window_update_sent(&self) {
        self.owner_event();
    }

    /// Runs one tick synchronously. Timer-driven operation calls this on
    /// the configured period; embedders and tests may drive it directly.
    pub fn tick_now(&self) {
        run_tick(&self.core, false);
    }

    pub fn last_reported_state(&self) -> HealthState {
        self.core.lock().last_reported_state
    }

    /// Coarse healthy/stuck/lagging label of the reported state.
    pub fn last_reported_state_pretty(&self) -> &'static str {
        self.core.lock().last_reported_state.coarse_str()
    }

    /// Debug rendering of the latched tail info.
    pub fn last_tail_info_pretty(&self) -> String {
        self.core
            .lock()
            .tail_info
            .map_or_else(|| "NONE".to_string(), |info| info.pretty())
    }

    /// Debug rendering of the lag record, oldest bucket first.
    pub fn lag_record_pretty(&self) -> String {
        self.core.lock().lag_record.pretty()
    }

    /// Current timestamp-lag estimate, when derivable.
    pub fn time_lag(&self) -> Option<Duration> {
        let core = self.core.lock();
        let stream = core.stream.upgrade()?;
        core.estimate_time_lag_ms(&stream)
            .map(|ms| Duration::from_millis(ms.max(0) as u64))
    }

    /// Handle to the paired ignore-overload tracer, if this is a primary.
    pub fn shadow(&self) -> Option<ReaderFlowTracer> {
        self.core.lock().shadow.clone()
    }

    /// Whether a tail query is currently outstanding.
    pub fn tail_query_in_flight(&self) -> bool {
        self.core.lock().tail_query_in_flight
    }

    fn owner_event(&self) {
        let mut core = self.core.lock();
        core.update_should_track();
        if let Some(shadow) = &core.shadow {
            shadow.owner_event();
        }
    }
}

pub(crate) struct TracerCore {
    self_ref: Weak<Mutex<TracerCore>>,
    env: TracerEnv,
    stream: Weak<dyn ReadStreamView>,
    params: TracerParams,
    monitoring_tags: Vec<String>,

    speed: SpeedEstimator,
    lag_record: LagRecord,
    sample_counter: u64,

    tail_info: Option<TailInfo>,
    last_tail_query_status: TailQueryStatus,
    tail_query_in_flight: bool,

    last_next_lsn_to_deliver: Lsn,
    first_stuck_at: Option<SystemTime>,
    first_lagging_at: Option<SystemTime>,
    last_reported_state: HealthState,
    should_track: bool,

    started: bool,
    timer: TickTimer,

    last_tail_warn: Option<SystemTime>,
    last_lag_warn: Option<SystemTime>,

    shadow: Option<ReaderFlowTracer>,
}

impl Drop for TracerCore {
    fn drop(&mut self) {
        // Settle counters before the bookkeeping disappears.
        self.maybe_bump_stats(true);
    }
}

/// One tick: post a tail query, refresh the tracking gate, re-derive the
/// reported state. Downstream estimator updates run in the query's
/// completion.
pub(crate) fn run_tick(core_arc: &Arc<Mutex<TracerCore>>, rearm: bool) {
    let post = {
        let mut core = core_arc.lock();
        if rearm {
            core.timer.clear();
        }
        let post = core.prepare_tail_query();
        core.update_should_track();
        core.maybe_bump_stats(false);
        if rearm {
            core.apply_timer_state(false);
        }
        post
    };

    if let Some((sequencer, request, completion)) = post {
        if sequencer.post_tail_query(request, completion).is_err() {
            // Could not even enqueue the request; run the completion path
            // inline so this tick's downstream updates still happen.
            apply_tail_response(
                core_arc,
                TailQueryResponse {
                    status: TailQueryStatus::NoBuffers,
                    next_lsn: LSN_INVALID,
                    attributes: None,
                },
            );
        }
    }
}

fn apply_tail_response(core_arc: &Arc<Mutex<TracerCore>>, response: TailQueryResponse) {
    let mut core = core_arc.lock();
    core.tail_query_in_flight = false;
    core.on_tail_query_response(response);
}

impl TracerCore {
    fn on_settings_updated(&mut self) {
        let settings = self.env.settings.get();
        self.params.tracer_period = settings.tracer_period;
        self.apply_timer_state(true);

        let capacity = settings.num_sample_groups();
        if capacity != self.lag_record.capacity() {
            self.lag_record.set_capacity(capacity);
        }

        if let Some(shadow) = &self.shadow {
            shadow.on_settings_updated();
        }
    }

    fn apply_timer_state(&mut self, immediate: bool) {
        if !self.started {
            return;
        }

        if self.params.tracer_period.is_zero() {
            self.timer.cancel();
        } else if !self.timer.is_active() {
            let delay = if immediate {
                Duration::ZERO
            } else {
                self.params.tracer_period
            };
            self.timer.activate(delay, self.self_ref.clone());
        }
    }

    /// Builds this tick's tail query, unless one is still outstanding.
    fn prepare_tail_query(
        &mut self,
    ) -> Option<(Arc<dyn SequencerClient>, TailQueryRequest, TailQueryCompletion)> {
        if self.tail_query_in_flight {
            return None;
        }
        let stream = self.stream.upgrade()?;
        let settings = self.env.settings.get();

        let request = TailQueryRequest {
            log_id: stream.log_id(),
            flags: TailQueryFlags {
                include_tail_attributes: true,
                skip_remote_preemption_check: settings.skip_remote_preemption_checks,
            },
            timeout: self.params.tracer_period,
        };

        self.tail_query_in_flight = true;

        let weak = self.self_ref.clone();
        let completion: TailQueryCompletion = Box::new(move |response| {
            if let Some(core) = weak.upgrade() {
                apply_tail_response(&core, response);
            }
        });

        Some((Arc::clone(&self.env.sequencer), request, completion))
    }

    fn on_tail_query_response(&mut self, response: TailQueryResponse) {
        let Some(stream) = self.stream.upgrade() else {
            return;
        };

        // A success that carries no attributes tells us nothing about the
        // tail; fold it into the failure path.
        let status = if response.status.is_ok() && response.attributes.is_none() {
            TailQueryStatus::MissingAttributes
        } else {
            response.status
        };
        self.last_tail_query_status = status;

        match (status, response.attributes) {
            (TailQueryStatus::Ok, Some(attrs)) => {
                let lsn_approx = if attrs.last_released_real_lsn != LSN_INVALID {
                    attrs.last_released_real_lsn
                } else {
                    response.next_lsn.saturating_sub(1)
                };
                self.tail_info = Some(TailInfo {
                    byte_offset: attrs.byte_offset,
                    timestamp_ms: attrs.last_timestamp_ms,
                    lsn_approx,
                });
                self.update_time_stuck(&stream, lsn_approx, status);
            }
            _ => {
                self.warn_tail_failure(&stream, status);
                self.update_time_stuck(&stream, LSN_INVALID, status);
            }
        }

        self.update_time_lagging(&stream, status);
        if status.is_ok() {
            self.publish_sample(&stream);
        }
        self.bump_histograms(&stream);
    }

    /// Samples the stuck condition. A reader that delivered anything since
    /// the previous observation is unstuck for this tick regardless of its
    /// position relative to the tail.
    fn update_time_stuck(
        &mut self,
        stream: &Arc<dyn ReadStreamView>,
        tail_lsn: Lsn,
        status: TailQueryStatus,
    ) {
        let next = stream.next_lsn_to_deliver();
        let advanced = self.last_next_lsn_to_deliver != next;
        if advanced {
            self.last_next_lsn_to_deliver = next;
            self.first_stuck_at = None;
            self.maybe_bump_stats(false);
        }

        let is_stuck = !advanced
            && self.should_track
            && (!status.is_ok() || next <= tail_lsn.min(stream.until_lsn()));

        if !is_stuck {
            self.first_stuck_at = None;
        } else if self.first_stuck_at.is_none() {
            self.first_stuck_at = Some(self.env.time.now());
        }
        self.maybe_bump_stats(false);
    }

    /// Feeds this tick's lag sample into the slope estimator and refreshes
    /// the lagging dwell timer.
    fn update_time_lagging(&mut self, stream: &Arc<dyn ReadStreamView>, status: TailQueryStatus) {
        let settings = self.env.settings.get();

        let cur_lag_ms = if status.is_ok() {
            match self.estimate_time_lag_ms(stream) {
                Some(lag) => lag,
                None => {
                    self.warn_missing_lag(stream);
                    return;
                }
            }
        } else if let Some(back) = self.lag_record.back() {
            // Tail info is stale; repeat the most recent recorded lag.
            back.time_lag_ms
        } else {
            self.warn_missing_lag(stream);
            return;
        };

        self.lag_record.age();

        if !self.should_track {
            self.first_lagging_at = None;
            self.maybe_bump_stats(false);
            return;
        }

        let group_size = settings.sample_group_size();
        let num_groups = settings.num_sample_groups();

        let counter = self.sample_counter;
        self.sample_counter += 1;
        if counter % group_size as u64 == 0 {
            self.lag_record.push(LagBucket {
                time_lag_ms: cur_lag_ms,
                time_lag_correction_ms: 0,
                ttl: initial_ttl(group_size, num_groups),
            });
        }

        let phase = (self.sample_counter % group_size as u64) as usize;
        let period_ms = self.params.tracer_period.as_millis() as i64;
        let window_ms = period_ms * (group_size * (num_groups - 1) + phase) as i64;

        let lag0 = self.lag_record.front().map_or(0, |b| b.time_lag_ms);
        let correction = self.lag_record.correction_total_ms();

        let catching_up = cur_lag_ms <= period_ms
            || !self.lag_record.is_full()
            || (cur_lag_ms - lag0 - correction) as f64
                <= settings.lagging_slope_threshold * window_ms as f64;

        if catching_up {
            self.first_lagging_at = None;
        } else if self.first_lagging_at.is_none() {
            self.first_lagging_at = Some(self.env.time.now());
        }
        self.maybe_bump_stats(false);
    }

    /// Recomputes the tracking gate; transitions feed the lag-correction
    /// terms so paused intervals cancel out of the slope estimate.
    fn update_should_track(&mut self) {
        let was_tracked = self.should_track;

        let overloaded = !self.params.ignore_overload && self.env.overload.overloaded();
        let (redelivery_active, window_pending) = match self.stream.upgrade() {
            Some(s) => (s.redelivery_timer_active(), s.window_update_pending()),
            None => (false, false),
        };

        // A consumer that fails to drain its buffer stalls the window; that
        // stall is the consumer's fault, not the log system's.
        self.should_track = !overloaded && !redelivery_active && !window_pending;

        if was_tracked != self.should_track {
            if let Some(stream) = self.stream.upgrade() {
                if let Some(lag) = self.estimate_time_lag_ms(&stream) {
                    if let Some(back) = self.lag_record.back_mut() {
                        if was_tracked {
                            back.time_lag_correction_ms -= lag;
                        } else {
                            back.time_lag_correction_ms += lag;
                        }
                    }
                }
            }
        }
    }

    /// Re-derives the reported state and bumps counters on a transition.
    fn maybe_bump_stats(&mut self, force_healthy: bool) {
        let state = if force_healthy {
            HealthState::Healthy
        } else {
            self.classify()
        };

        if state != self.last_reported_state {
            update_counters_for_state(
                &self.env.stats,
                self.last_reported_state,
                self.params.ignore_overload,
                &self.monitoring_tags,
                -1,
            );
            update_counters_for_state(
                &self.env.stats,
                state,
                self.params.ignore_overload,
                &self.monitoring_tags,
                1,
            );
            self.last_reported_state = state;
        }
    }

    fn classify(&self) -> HealthState {
        let Some(stream) = self.stream.upgrade() else {
            return HealthState::Healthy;
        };
        let now = self.env.time.now();
        let settings = self.env.settings.get();

        let stuck_past_threshold = self.first_stuck_at.is_some_and(|since| {
            now.duration_since(since)
                .is_ok_and(|dwell| dwell >= settings.stuck_threshold)
        });

        if stuck_past_threshold {
            if !self.last_tail_query_status.is_ok()
                && stream.next_lsn_to_deliver() >= self.estimate_tail_lsn(&stream)
            {
                HealthState::StuckWhileFailingTailQuery
            } else {
                HealthState::Stuck
            }
        } else if self.first_lagging_at.is_some() && stream.until_lsn() == LSN_MAX {
            // A fixed until target is not chasing a moving tail.
            HealthState::Lagging
        } else {
            HealthState::Healthy
        }
    }

    /// Timestamp lag behind the tail in milliseconds. A reader at or past
    /// the tail reports zero; absent tail info or an undelivered stream
    /// yields no estimate.
    fn estimate_time_lag_ms(&self, stream: &Arc<dyn ReadStreamView>) -> Option<i64> {
        let info = self.tail_info?;
        if info.lsn_approx < stream.next_lsn_to_deliver() {
            return Some(0);
        }
        let last_delivered_ts = stream.last_in_record_ts_ms();
        if last_delivered_ts > 0 {
            Some((info.timestamp_ms - last_delivered_ts).max(0))
        } else {
            None
        }
    }

    /// Byte lag behind the tail, when both offsets are tracked.
    fn estimate_byte_lag(&self, stream: &Arc<dyn ReadStreamView>) -> Option<i64> {
        let info = self.tail_info?;
        if info.lsn_approx < stream.next_lsn_to_deliver() {
            return Some(0);
        }
        let tail_offset = info.byte_offset?;
        let delivered_offset = stream.accumulated_byte_offset()?;
        Some((tail_offset as i64 - delivered_offset as i64).max(0))
    }

    fn estimate_tail_lsn(&self, stream: &Arc<dyn ReadStreamView>) -> Lsn {
        let last_released = stream.last_released();
        self.tail_info
            .map_or(last_released, |info| info.lsn_approx.max(last_released))
    }

    fn reader_is_stuck(&self) -> bool {
        matches!(
            self.last_reported_state,
            HealthState::Stuck | HealthState::StuckWhileFailingTailQuery
        )
    }

    /// Unhealthy readers publish samples at the configured weight: any
    /// non-healthy state, or a time lag above a matching per-tag ceiling.
    fn reader_is_unhealthy(&self, stream: &Arc<dyn ReadStreamView>) -> bool {
        if self.last_reported_state != HealthState::Healthy {
            return true;
        }

        let Some(lag_ms) = self.estimate_time_lag_ms(stream) else {
            return false;
        };
        let lag = Duration::from_millis(lag_ms.max(0) as u64);

        let settings = self.env.settings.get();
        self.monitoring_tags.iter().any(|tag| {
            settings
                .max_acceptable_time_lag_per_tag
                .get(tag)
                .is_some_and(|max| lag > *max)
        })
    }

    fn publish_sample(&mut self, stream: &Arc<dyn ReadStreamView>) {
        if !self.params.push_samples {
            return;
        }

        let now = self.env.time.now();
        self.speed.observe(
            now,
            stream.num_bytes_delivered(),
            stream.num_records_delivered(),
        );

        let weight = if self.reader_is_unhealthy(stream) {
            self.env.settings.get().unhealthy_publish_weight
        } else {
            1.0
        };

        let samples = Arc::clone(&self.env.samples);
        samples.publish(weight, &mut || self.build_sample(stream, now));
    }

    fn build_sample(&self, stream: &Arc<dyn ReadStreamView>, now: SystemTime) -> TraceSample {
        let mut sample = TraceSample::new();
        sample.add_string("log_id", stream.log_id().to_string());
        sample.add_string("log_group_name", stream.log_group_name());
        sample.add_string("read_stream_id", stream.read_stream_id().to_string());
        sample.add_string("csid", stream.client_session_id());
        sample.add_string("from_lsn", lsn_to_string(stream.start_lsn()));
        sample.add_string("until_lsn", lsn_to_string(stream.until_lsn()));
        sample.add_string("epoch_metadata", stream.epoch_metadata());
        sample.add_string("reader_pointer", lsn_to_string(stream.next_lsn_to_deliver()));
        sample.add_string("unavailable_shards", stream.unavailable_shards());
        if let Some(down) = stream.scd_down_shards() {
            sample.add_string("scd_down_shards", down);
        }
        if let Some(slow) = stream.scd_slow_shards() {
            sample.add_string("scd_slow_shards", slow);
        }
        sample.add_string("storage_set_health_status", stream.storage_set_health());
        sample.add_string("trim_point", lsn_to_string(stream.trim_point()));
        sample.add_int("readset_size", stream.read_set_size() as i64);
        if let Some(byte_lag) = self.estimate_byte_lag(stream) {
            sample.add_int("bytes_lagged", byte_lag);
        }
        if let Some(time_lag) = self.estimate_time_lag_ms(stream) {
            sample.add_int("timestamp_lagged", time_lag);
        }
        sample.add_int("time_stuck", ms_since(now, self.first_stuck_at));
        sample.add_int("time_lagging", ms_since(now, self.first_lagging_at));
        sample.add_int("reading_speed_bytes", self.speed.bytes_per_period());
        sample.add_int("reading_speed_records", self.speed.records_per_period());
        sample.add_string("sender_state", stream.sender_state());
        sample.add_string("grace_counters", stream.grace_counters());
        sample.add_int("shard_status_version", stream.shard_status_version() as i64);
        sample.add_int(
            "in_overloaded_worker",
            i64::from(self.env.overload.overloaded()),
        );
        sample.add_string(
            "waiting_for_node",
            if self.reader_is_stuck() {
                stream.waiting_for_node()
            } else {
                String::new()
            },
        );
        sample.add_string("reading_mode", stream.reading_mode());
        sample.add_string("state", self.last_reported_state.as_str());
        sample.add_set(
            "monitoring_tags",
            self.monitoring_tags.iter().cloned().collect(),
        );
        sample
    }

    fn bump_histograms(&self, stream: &Arc<dyn ReadStreamView>) {
        let now = self.env.time.now();

        let time_stuck_us = us_since(now, self.first_stuck_at);
        self.env
            .stats
            .histogram_add(&self.monitoring_tags, StreamHistogram::TimeStuck, time_stuck_us);

        if let Some(lag_ms) = self.estimate_time_lag_ms(stream) {
            self.env.stats.histogram_add(
                &self.monitoring_tags,
                StreamHistogram::TimeLag,
                (lag_ms.max(0) as u64).saturating_mul(1_000),
            );
        }
    }

    fn warn_tail_failure(&mut self, stream: &Arc<dyn ReadStreamView>, status: TailQueryStatus) {
        if !rate_limit_due(&mut self.last_tail_warn, self.env.time.now()) {
            return;
        }

        if status == TailQueryStatus::MissingAttributes {
            warn!(
                log_id = %stream.log_id(),
                read_stream_id = %stream.read_stream_id(),
                "tail query succeeded but returned no tail attributes",
            );
        } else {
            warn!(
                log_id = %stream.log_id(),
                read_stream_id = %stream.read_stream_id(),
                status = status.as_str(),
                "tail query failed",
            );
        }
    }

    fn warn_missing_lag(&mut self, stream: &Arc<dyn ReadStreamView>) {
        if !rate_limit_due(&mut self.last_lag_warn, self.env.time.now()) {
            return;
        }

        warn!(
            log_id = %stream.log_id(),
            read_stream_id = %stream.read_stream_id(),
            "no timestamp lag estimate available yet",
        );
    }
}

/// Applies one counter delta for a reported state across the family
/// selected by the tracer's ignore-overload flag.
fn update_counters_for_state(
    stats: &Stats,
    state: HealthState,
    ignoring_overload: bool,
    tags: &[String],
    delta: i64,
) {
    let bump = |counter: StreamCounter| {
        if ignoring_overload {
            stats.ignoring_overload_add(counter, delta);
        } else {
            stats.tagged_add(tags, counter, delta);
        }
    };

    match state {
        HealthState::Healthy => {}
        HealthState::Lagging => {
            bump(StreamCounter::StuckOrLagging);
            bump(StreamCounter::Lagging);
        }
        HealthState::Stuck => {
            bump(StreamCounter::StuckOrLagging);
            bump(StreamCounter::Stuck);
        }
        HealthState::StuckWhileFailingTailQuery => {
            bump(StreamCounter::Stuck);
            bump(StreamCounter::StuckFailingTailQuery);
        }
    }
}

fn ms_since(now: SystemTime, since: Option<SystemTime>) -> i64 {
    since
        .and_then(|t| now.duration_since(t).ok())
        .map_or(0, |d| d.as_millis() as i64)
}

fn us_since(now: SystemTime, since: Option<SystemTime>) -> u64 {
    since
        .and_then(|t| now.duration_since(t).ok())
        .map_or(0, |d| d.as_micros() as u64)
}

fn rate_limit_due(last: &mut Option<SystemTime>, now: SystemTime) -> bool {
    let due = last.map_or(true, |t| {
        now.duration_since(t)
            .is_ok_and(|gap| gap >= FAILURE_LOG_INTERVAL)
    });
    if due {
        *last = Some(now);
    }
    due
}
