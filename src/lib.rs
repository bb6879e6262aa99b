//! Client-side health tracing for consumers of a replicated, ordered log.
//!
//! Each active read stream owns a [`tracer::ReaderFlowTracer`] that
//! periodically queries the log's sequencer for tail attributes,
//! classifies the consumer as healthy, lagging, or stuck, publishes
//! weighted trace samples, and keeps aggregate counters and per-tag
//! latency histograms up to date. A secondary component,
//! [`publisher::NodesConfigPublisher`], reconciles the two sources of
//! cluster nodes configuration.
//!
//! The log protocol, record delivery, and sample transport are out of
//! scope: they appear only as the narrow traits in [`stream`],
//! [`sequencer`], and [`sample`].

pub mod clock;
pub mod config;
pub mod overload;
pub mod publisher;
pub mod sample;
pub mod sequencer;
pub mod stats;
pub mod stream;
pub mod tracer;
pub mod types;
