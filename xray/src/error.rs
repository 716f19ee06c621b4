use thiserror::Error;

/// Errors produced by the trace data model and its runtime machinery.
///
/// None of these abort a handler: annotation and registry errors are
/// returned to the caller, emission errors bubble up from the `Close` that
/// triggered them, and a missing registry entry causes the outbound call to
/// proceed untraced rather than fail.
#[derive(Debug, Error)]
pub enum Error {
    /// An annotation value was not a bool, number, string, or
    /// string-convertible type.
    #[error("annotation value for key `{key}` must be a bool, number, or string")]
    InvalidAnnotationValue {
        /// The annotation key that was rejected.
        key: String,
    },
    /// A segment's serialized body exceeded the UDP datagram budget.
    #[error("segment `{segment_id}` serialized to {size} bytes, exceeding the 64KiB datagram budget")]
    SegmentTooLarge {
        /// The segment id that failed to serialize.
        segment_id: String,
        /// The size, in bytes, of the offending packet.
        size: usize,
    },
    /// The UDP socket to the daemon could not be dialed or written to.
    #[error("failed to send segment to the xray daemon: {0}")]
    EmitterTransport(#[from] std::io::Error),
    /// JSON encoding of a segment or subsegment failed.
    #[error("failed to encode segment: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Convenience alias for results returned by this crate.
pub type Result<T> = std::result::Result<T, Error>;
