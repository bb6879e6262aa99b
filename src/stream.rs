use crate::types::{LogId, Lsn, ReadStreamId};

/// Read-only snapshot surface of the read stream that owns a tracer.
///
/// All getters are cheap and may be called several times per tick. The
/// tracer holds this behind a `Weak` reference so it never prolongs the
/// stream's lifetime.
pub trait ReadStreamView: Send + Sync {
    fn log_id(&self) -> LogId;
    fn log_group_name(&self) -> String;
    fn read_stream_id(&self) -> ReadStreamId;
    fn client_session_id(&self) -> String;

    /// First position of the read range.
    fn start_lsn(&self) -> Lsn;
    /// Last position of the read range; `LSN_MAX` means "follow the tail".
    fn until_lsn(&self) -> Lsn;
    /// Next position the stream will hand to the consumer.
    fn next_lsn_to_deliver(&self) -> Lsn;
    fn trim_point(&self) -> Lsn;
    /// Highest position the stream has seen released by the sequencer.
    fn last_released(&self) -> Lsn;

    /// Number of storage shards in the current read set.
    fn read_set_size(&self) -> usize;
    /// Timestamp of the last delivered record (ms since epoch), zero when
    /// nothing has been delivered yet.
    fn last_in_record_ts_ms(&self) -> i64;
    /// Cumulative byte offset at the last delivered record, when tracked.
    fn accumulated_byte_offset(&self) -> Option<u64>;
    /// Cumulative bytes handed to the consumer.
    fn num_bytes_delivered(&self) -> u64;
    /// Cumulative records handed to the consumer.
    fn num_records_delivered(&self) -> u64;

    /// Whether the redelivery backoff timer is currently active.
    fn redelivery_timer_active(&self) -> bool;
    /// Whether a window update to the storage nodes is still pending.
    fn window_update_pending(&self) -> bool;

    fn monitoring_tags(&self) -> Vec<String>;

    // Pretty-printed snapshots carried verbatim into trace samples.
    fn epoch_metadata(&self) -> String;
    fn unavailable_shards(&self) -> String;
    /// Shards considered down in single-copy-delivery mode, when active.
    fn scd_down_shards(&self) -> Option<String>;
    /// Shards considered slow in single-copy-delivery mode, when active.
    fn scd_slow_shards(&self) -> Option<String>;
    fn storage_set_health(&self) -> String;
    fn sender_state(&self) -> String;
    fn grace_counters(&self) -> String;
    fn shard_status_version(&self) -> u64;
    /// Node the stream is currently blocked on, empty when none.
    fn waiting_for_node(&self) -> String;
    fn reading_mode(&self) -> String;
}
