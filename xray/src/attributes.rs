//! Attribute types attached to segments and subsegments: the local and
//! remote HTTP blocks, service metadata, and the error-cause chain.

use serde_derive::{Deserialize, Serialize};

/// Information about the original HTTP request/response cycle for a
/// segment (the request an inbound handler is serving).
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct Http {
    /// Information about the incoming request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<Request>,
    /// Information about the response once it has been sent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Response>,
}

/// Information about an incoming HTTP/HTTPS request.
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct Request {
    /// The request method, e.g. `GET`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// The full URL of the request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// The IP address of the requester.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<String>,
    /// The requester's user agent string.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Set when `client_ip` was read from an `X-Forwarded-For` header and
    /// is therefore not reliable, as it could have been forged.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x_forwarded_for: Option<bool>,
}

impl Request {
    /// Builds request attributes for an inbound HTTP request.
    ///
    /// `client_ip` is resolved per the crate's client-ip invariant: the
    /// first comma-separated token of `forwarded_for` if present, else the
    /// host portion of `peer_addr`.
    pub fn inbound(
        method: impl Into<String>,
        url: impl Into<String>,
        user_agent: Option<String>,
        forwarded_for: Option<&str>,
        peer_addr: &str,
    ) -> Self {
        let (client_ip, from_forwarded_for) = resolve_client_ip(forwarded_for, peer_addr);
        Request {
            method: Some(method.into()),
            url: Some(url.into()),
            client_ip: Some(client_ip),
            user_agent,
            x_forwarded_for: if from_forwarded_for { Some(true) } else { None },
        }
    }
}

/// Resolves a request's client IP per the crate's invariant: the first
/// comma-separated token of an `X-Forwarded-For` header if present,
/// otherwise the host portion of the peer address.
pub fn resolve_client_ip(
    forwarded_for: Option<&str>,
    peer_addr: &str,
) -> (String, bool) {
    if let Some(header) = forwarded_for {
        if let Some(first) = header.split(',').next() {
            let trimmed = first.trim();
            if !trimmed.is_empty() {
                return (trimmed.to_owned(), true);
            }
        }
    }
    let host = peer_addr.rsplit_once(':').map(|(host, _)| host).unwrap_or(peer_addr);
    (host.to_owned(), false)
}

/// Information about the response to an incoming request.
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct Response {
    /// The HTTP status of the response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// The length of the response body in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_length: Option<u64>,
}

/// Information about an outgoing (subsegment) HTTP/HTTPS call.
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct Remote {
    /// Information about the outgoing request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<RemoteRequest>,
    /// Information about the response once it was received.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<RemoteResponse>,
}

/// Details of an outgoing request.
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct RemoteRequest {
    /// The request method, e.g. `GET`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// The full URL of the request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Whether the downstream call is to another traced service.
    pub traced: bool,
}

/// Details of a received response.
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct RemoteResponse {
    /// The HTTP status of the response.
    pub status: u16,
    /// The length of the response body in bytes, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_length: Option<u64>,
}

/// An object with information about the application that recorded a
/// segment.
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct Service {
    /// A string identifying the version of the application that served the
    /// request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// The cause of a fault or error recorded on a segment or subsegment.
///
/// `Name` is used to point at an exception already recorded elsewhere in
/// the trace (the dedup path in `Segment::add_error`); `Description` is the
/// normal case of one or more freshly recorded exceptions.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum Cause {
    /// A 16-character exception id pointing at an exception recorded
    /// elsewhere.
    Name(String),
    /// A full description of the exceptions that occurred.
    Description {
        /// The working directory at the time the exception occurred.
        working_directory: String,
        /// Paths to libraries or modules in use at the time.
        #[serde(skip_serializing_if = "Vec::is_empty")]
        paths: Vec<String>,
        /// The exceptions that occurred, outermost first.
        exceptions: Vec<Exception>,
    },
}

/// A single exception recorded as part of a cause.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Exception {
    /// A 16 hex digit id for the exception, unique within the trace.
    pub id: String,
    /// The exception message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// The exception type.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// Stack frames, outermost first.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stack: Vec<StackFrame>,
}

impl Exception {
    /// Builds an exception record from any `std::error::Error`.
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        Exception {
            id: crate::segment_id::SegmentId::new().to_string(),
            message: Some(err.to_string()),
            kind: None,
            stack: Vec::new(),
        }
    }
}

/// Classifies an error recorded on a subsegment as a client error or a
/// server fault, replacing the stringly-typed `"error"`/`"fault"` tags an
/// untyped caller might otherwise pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// A client error: the downstream call returned a 4XX status.
    Error,
    /// A server fault: the downstream call returned a 5XX status.
    Fault,
}

impl Severity {
    /// Classifies an HTTP response status code, returning `None` for
    /// statuses outside the 4XX/5XX ranges.
    pub fn from_http_status(status: u16) -> Option<Self> {
        match status {
            400..=499 => Some(Severity::Error),
            500..=599 => Some(Severity::Fault),
            _ => None,
        }
    }
}

/// A single stack frame within an exception's stack trace.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct StackFrame {
    /// The relative path to the file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// The line number within the file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    /// The function or method name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}
