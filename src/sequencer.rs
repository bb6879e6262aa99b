use std::time::Duration;

use thiserror::Error;

use crate::types::{LogId, Lsn};

/// Options attached to a tail-attributes query.
#[derive(Debug, Clone, Copy, Default)]
pub struct TailQueryFlags {
    /// Ask the sequencer to include tail attributes in the response.
    pub include_tail_attributes: bool,
    /// Skip the remote preemption check on the sequencer side.
    pub skip_remote_preemption_check: bool,
}

/// Snapshot of a log's tail as reported by its sequencer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TailAttributes {
    /// Last released real position, or `LSN_INVALID` when unknown.
    pub last_released_real_lsn: Lsn,
    /// Timestamp of the tail record, milliseconds since epoch.
    pub last_timestamp_ms: i64,
    /// Cumulative byte offset at the tail, when the log tracks offsets.
    pub byte_offset: Option<u64>,
}

/// Terminal status of one tail query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailQueryStatus {
    Ok,
    /// No response within the query timeout.
    Timeout,
    /// The request could not be enqueued.
    NoBuffers,
    /// The query succeeded but the sequencer attached no tail attributes.
    MissingAttributes,
    /// Sequencer-side failure.
    Failed,
}

impl TailQueryStatus {
    pub fn is_ok(self) -> bool {
        matches!(self, TailQueryStatus::Ok)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TailQueryStatus::Ok => "ok",
            TailQueryStatus::Timeout => "timeout",
            TailQueryStatus::NoBuffers => "no_buffers",
            TailQueryStatus::MissingAttributes => "missing_attributes",
            TailQueryStatus::Failed => "failed",
        }
    }
}

/// Synchronous failure to enqueue a tail query.
#[derive(Debug, Error)]
pub enum PostError {
    #[error("request queue full")]
    QueueFull,
    #[error("worker shutting down")]
    ShuttingDown,
}

/// One tail-attributes request.
#[derive(Debug, Clone)]
pub struct TailQueryRequest {
    pub log_id: LogId,
    pub flags: TailQueryFlags,
    pub timeout: Duration,
}

/// Completion payload of a tail query.
#[derive(Debug, Clone)]
pub struct TailQueryResponse {
    pub status: TailQueryStatus,
    /// Sequencer's next position to issue; tail is approximately one less.
    pub next_lsn: Lsn,
    pub attributes: Option<TailAttributes>,
}

/// Callback delivering a tail-query response on the requesting worker.
pub type TailQueryCompletion = Box<dyn FnOnce(TailQueryResponse) + Send>;

/// Asynchronous access to a log's sequencer.
///
/// On `Ok` the completion will be invoked exactly once, serialized with
/// the requesting stream's other events.
pub trait SequencerClient: Send + Sync {
    fn post_tail_query(
        &self,
        request: TailQueryRequest,
        completion: TailQueryCompletion,
    ) -> Result<(), PostError>;
}
