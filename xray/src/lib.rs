#![warn(missing_docs)]
//! AWS X-Ray daemon client for Rust.
//!
//! Builds and emits segment and subsegment documents describing the work an
//! application does while serving a request, correlated across process
//! boundaries by a trace id carried in an HTTP header or RPC metadata.
//!
//! The crate-level [`Recorder`] is the usual entry point: [`open_segment`]
//! starts a trace (or continues one inherited from upstream), and
//! [`open_subsegment`] nests instrumentation beneath whatever is currently
//! open on the calling thread. Both return RAII guards that close (and, if
//! sampled, flush) their segment or subsegment when dropped.

use std::time::Duration;

mod annotation;
mod attributes;
mod context;
mod emitter;
mod epoch;
mod error;
mod hexbytes;
mod recorder;
mod registry;
mod sampler;
mod segment;
mod segment_id;
mod subsegment;
mod trace_id;

pub use crate::{
    annotation::AnnotationValue,
    attributes::{
        Cause, Exception, Http, Remote, RemoteRequest, RemoteResponse, Request, Response,
        Service, Severity, StackFrame,
    },
    context::{SamplingDecision, TraceContext, HTTP_HEADER_NAME},
    emitter::Emitter,
    epoch::Seconds,
    error::{Error, Result},
    recorder::{Current, OpenSegment, OpenSubsegment, Recorder},
    registry::SegmentRegistry,
    sampler::Sampler,
    segment::{Parent, Segment},
    segment_id::SegmentId,
    subsegment::Subsegment,
    trace_id::TraceId,
};

use lazy_static::lazy_static;

lazy_static! {
    static ref DEFAULT_RECORDER: Recorder = Recorder::default();
}

/// Begins a new segment on the process-wide default [`Recorder`].
///
/// `context` carries whatever trace information was recovered from an
/// inbound request — [`TraceContext::none`] if this call is the start of a
/// new trace.
pub fn open_segment(
    name: impl Into<String>,
    context: TraceContext,
) -> OpenSegment {
    DEFAULT_RECORDER.open_segment(name, context)
}

/// Opens a subsegment nested under whatever trace is active on the calling
/// thread, via the process-wide default [`Recorder`]. Returns `None` if no
/// segment is open.
pub fn open_subsegment(name: impl Into<String>) -> Option<OpenSubsegment> {
    DEFAULT_RECORDER.open_subsegment(name)
}

/// Opens a subsegment as a child of the segment registered under
/// `trace_id`, via the process-wide default [`Recorder`].
pub fn resume_subsegment(
    trace_id: &str,
    name: impl Into<String>,
) -> Option<OpenSubsegment> {
    DEFAULT_RECORDER.resume_subsegment(trace_id, name)
}

/// The segment open on the calling thread, via the process-wide default
/// [`Recorder`], if any.
pub fn current_segment() -> Option<Segment> {
    DEFAULT_RECORDER.current_segment()
}

/// The innermost subsegment open on the calling thread, via the
/// process-wide default [`Recorder`], if any.
pub fn current_subsegment() -> Option<Subsegment> {
    DEFAULT_RECORDER.current_subsegment()
}

/// Replaces the sampler consulted by the process-wide default [`Recorder`]
/// for segments opened without an upstream sampling decision.
pub fn set_sampler(sampler: Sampler) {
    DEFAULT_RECORDER.set_sampler(sampler);
}

/// Changes how long the process-wide default [`Recorder`]'s registry
/// retains segments looked up by trace id.
pub fn set_segment_cache_duration(ttl: Duration) {
    DEFAULT_RECORDER.set_segment_cache_duration(ttl);
}

/// Repoints the process-wide default [`Recorder`]'s emitter at a different
/// daemon address, overriding whatever `XRAY_DAEMON_HOST`/`XRAY_DAEMON_PORT`
/// resolved at startup.
pub fn set_daemon_host_and_port(
    host: &str,
    port: &str,
) {
    DEFAULT_RECORDER.set_daemon_host_and_port(host, port);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_segment_and_subsegment_compose_through_the_default_recorder() {
        let segment = open_segment("checkout", TraceContext::none());
        assert!(current_segment().is_some());
        let sub = open_subsegment("charge-card");
        assert!(sub.is_some());
        drop(sub);
        drop(segment);
        assert!(current_segment().is_none());
    }
}
