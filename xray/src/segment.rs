use crate::{
    annotation::AnnotationValue,
    attributes::{Cause, Exception, Http, Service},
    context::{SamplingDecision, TraceContext},
    emitter::Emitter,
    epoch::Seconds,
    error::{Error, Result},
    sampler::Sampler,
    segment_id::SegmentId,
    subsegment::Subsegment,
    trace_id::TraceId,
};
use serde_derive::Serialize;
use std::{
    collections::HashMap,
    ops::Not,
    sync::{Arc, RwLock},
};

/// The root of a trace's operation tree: describes the unit of work done by
/// one service handling one request.
///
/// Cheap to clone — every clone is a handle onto the same underlying,
/// lock-guarded document. Subsegments hold a non-owning [`std::sync::Weak`]
/// back-link to this document rather than a strong reference, so a long
/// chain of subsegments cannot keep a closed segment's memory alive.
#[derive(Clone)]
pub struct Segment {
    pub(crate) inner: Arc<SegmentInner>,
}

pub(crate) struct SegmentInner {
    pub(crate) data: RwLock<SegmentData>,
    sampler: Arc<Sampler>,
    emitter: Arc<Emitter>,
}

pub(crate) struct SegmentData {
    id: SegmentId,
    trace_id: TraceId,
    parent_id: Option<SegmentId>,
    name: String,
    start_time: Seconds,
    end_time: Option<Seconds>,
    in_progress: bool,
    traced: bool,
    fault: bool,
    error: bool,
    throttle: bool,
    user: Option<String>,
    cause: Option<Cause>,
    last_exception: Option<(String, String)>,
    http: Option<Http>,
    service: Option<Service>,
    annotations: Option<HashMap<String, AnnotationValue>>,
    metadata: Option<HashMap<String, serde_json::Value>>,
    pub(crate) counter: i64,
    subsegments: Vec<Subsegment>,
    flushed: bool,
}

impl Segment {
    /// Begins a new segment named `name`.
    ///
    /// `inherited` carries whatever trace context the caller recovered from
    /// an inbound request; an empty [`TraceContext::none`] starts a brand
    /// new trace. The sampling decision is resolved as follows: an
    /// upstream-supplied decision is honored verbatim, otherwise `sampler`
    /// is consulted.
    pub fn open(
        name: impl Into<String>,
        inherited: TraceContext,
        sampler: Arc<Sampler>,
        emitter: Arc<Emitter>,
    ) -> Self {
        let start_time = Seconds::now();

        let trace_id = if inherited.root.is_empty() {
            TraceId::new_at(start_time)
        } else {
            TraceId::rendered(inherited.root)
        };

        let parent_id = if inherited.parent.is_empty() {
            None
        } else {
            Some(SegmentId::rendered(inherited.parent))
        };

        let traced = match inherited.sampled {
            SamplingDecision::Sampled => true,
            SamplingDecision::NotSampled => false,
            SamplingDecision::Unspecified => sampler.is_sampled(),
        };

        let name = truncate_name(name.into());

        Segment {
            inner: Arc::new(SegmentInner {
                data: RwLock::new(SegmentData {
                    id: SegmentId::new(),
                    trace_id,
                    parent_id,
                    name,
                    start_time,
                    end_time: None,
                    in_progress: true,
                    traced,
                    fault: false,
                    error: false,
                    throttle: false,
                    user: None,
                    cause: None,
                    last_exception: None,
                    http: None,
                    service: None,
                    annotations: None,
                    metadata: None,
                    counter: 0,
                    subsegments: Vec::new(),
                    flushed: false,
                }),
                sampler,
                emitter,
            }),
        }
    }

    /// This segment's unique id.
    pub fn id(&self) -> SegmentId {
        self.read().id.clone()
    }

    /// The trace id this segment, and every subsegment beneath it, shares.
    pub fn trace_id(&self) -> TraceId {
        self.read().trace_id.clone()
    }

    /// Whether this segment's sampling decision keeps it (and its
    /// subsegments) recorded.
    pub fn is_traced(&self) -> bool {
        self.read().traced
    }

    /// The inherited trace context to hand to a subsegment opened elsewhere
    /// from this segment's id (e.g. across an RPC boundary).
    pub fn context(&self) -> TraceContext {
        let data = self.read();
        TraceContext {
            root: data.trace_id.to_string(),
            parent: data.id.to_string(),
            sampled: if data.traced {
                SamplingDecision::Sampled
            } else {
                SamplingDecision::NotSampled
            },
        }
    }

    /// Attaches a queryable key/value annotation. Rejects non-finite float
    /// values, since the wire format cannot encode them.
    pub fn add_annotation(
        &self,
        key: impl Into<String>,
        value: impl Into<AnnotationValue>,
    ) -> Result<()> {
        let key = key.into();
        let value = value.into();
        if !value.validate() {
            return Err(Error::InvalidAnnotationValue { key });
        }
        self.write()
            .annotations
            .get_or_insert_with(HashMap::new)
            .insert(key, value);
        Ok(())
    }

    /// Attaches a non-queryable key/value metadata entry. `value` is
    /// serialized with serde, so any `Serialize` type is accepted.
    pub fn add_metadata(
        &self,
        key: impl Into<String>,
        value: impl serde::Serialize,
    ) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.write()
            .metadata
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value);
        Ok(())
    }

    /// Records the HTTP attributes of the request this segment represents.
    pub fn add_http_attribute(
        &self,
        http: Http,
    ) {
        self.write().http = Some(http);
    }

    /// Records the application version that served this request.
    pub fn add_service_version(
        &self,
        version: impl Into<String>,
    ) {
        self.write().service = Some(Service {
            version: Some(version.into()),
        });
    }

    /// Identifies the user who made the request this segment represents.
    pub fn add_user(
        &self,
        user: impl Into<String>,
    ) {
        self.write().user = Some(user.into());
    }

    /// Marks this segment as a server fault (the response was a 5XX).
    pub fn add_fault(&self) {
        self.write().fault = true;
    }

    /// Marks this segment as a client error (the response was a 4XX).
    pub fn add_error(&self) {
        self.write().error = true;
    }

    /// Marks this segment as throttled (the response was a 429).
    pub fn add_throttle(&self) {
        self.write().throttle = true;
    }

    /// Records an exception, marking the segment as a fault.
    ///
    /// If the error's message is identical to the one most recently
    /// recorded, the new occurrence is folded into a reference to the
    /// existing exception record rather than duplicated.
    pub fn add_exception(
        &self,
        err: &(dyn std::error::Error + 'static),
    ) {
        self.add_fault();

        let mut data = self.write();
        let message = err.to_string();

        if let Some((last_message, last_id)) = data.last_exception.take() {
            if last_message == message {
                data.cause = Some(Cause::Name(last_id));
                return;
            }
        }

        let exception = Exception::from_error(err);
        let exception_id = exception.id.clone();

        match &mut data.cause {
            Some(Cause::Description { exceptions, .. }) => exceptions.push(exception),
            _ => {
                data.cause = Some(Cause::Description {
                    working_directory: current_dir(),
                    paths: Vec::new(),
                    exceptions: vec![exception],
                });
            }
        }
        data.last_exception = Some((message, exception_id));
    }

    /// Opens a new subsegment as a child of this segment.
    pub fn open_subsegment(
        &self,
        name: impl Into<String>,
    ) -> Subsegment {
        let child = Subsegment::new(name, Arc::downgrade(&self.inner));
        let mut data = self.write();
        data.counter += 1;
        data.subsegments.push(child.clone());
        child
    }

    /// Decrements the count of open subsegments. If the segment has already
    /// been closed and no subsegments remain open, flushes it.
    pub fn decrement_counter(&self) -> Result<()> {
        let (counter, ended) = {
            let mut data = self.write();
            data.counter -= 1;
            (data.counter, data.end_time.is_some())
        };
        if counter <= 0 && ended {
            self.flush()
        } else {
            Ok(())
        }
    }

    /// Closes the segment, recording its end time. If no subsegments are
    /// still open, flushes it to the daemon immediately; otherwise the last
    /// subsegment to close triggers the flush via `decrement_counter`.
    pub fn close(&self) -> Result<()> {
        let counter = {
            let mut data = self.write();
            if data.end_time.is_none() {
                data.end_time = Some(Seconds::now());
            }
            data.in_progress = false;
            data.counter
        };
        if counter <= 0 {
            self.flush()
        } else {
            Ok(())
        }
    }

    /// Serializes and sends the segment document to the daemon, provided
    /// the segment was sampled. A no-op for an unsampled segment.
    ///
    /// Idempotent: a segment is emitted at most once no matter how many
    /// times `flush` (directly, or via `close`/`decrement_counter`) ends up
    /// being called on it — a repeat call, including one caused by `Close`
    /// running twice (e.g. a caller closes a segment manually and its RAII
    /// guard closes it again on drop), is a no-op.
    pub fn flush(&self) -> Result<()> {
        let mut data = self.write();
        if data.flushed {
            return Ok(());
        }
        data.flushed = true;
        if !data.traced {
            return Ok(());
        }
        let doc = SegmentDoc::from(&*data);
        self.inner.emitter.send(&doc).map_err(|err| match err {
            Error::SegmentTooLarge { size, .. } => Error::SegmentTooLarge {
                segment_id: data.id.to_string(),
                size,
            },
            other => other,
        })
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, SegmentData> {
        self.inner.data.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, SegmentData> {
        self.inner.data.write().unwrap_or_else(|e| e.into_inner())
    }
}

pub(crate) fn current_dir() -> String {
    std::env::current_dir()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Truncates `name` to at most 200 bytes (invariant 7), walking back to the
/// nearest char boundary so a name containing multi-byte UTF-8 characters
/// is never sliced mid-character.
pub(crate) fn truncate_name(mut name: String) -> String {
    if name.len() > 200 {
        let mut idx = 200;
        while !name.is_char_boundary(idx) {
            idx -= 1;
        }
        name.truncate(idx);
    }
    name
}

#[derive(Serialize)]
struct SegmentDoc<'a> {
    trace_id: &'a TraceId,
    id: &'a SegmentId,
    name: &'a str,
    start_time: Seconds,
    #[serde(skip_serializing_if = "Option::is_none")]
    end_time: Option<Seconds>,
    #[serde(skip_serializing_if = "Not::not")]
    in_progress: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_id: Option<&'a SegmentId>,
    #[serde(skip_serializing_if = "Not::not")]
    fault: bool,
    #[serde(skip_serializing_if = "Not::not")]
    error: bool,
    #[serde(skip_serializing_if = "Not::not")]
    throttle: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cause: Option<&'a Cause>,
    #[serde(skip_serializing_if = "Option::is_none")]
    http: Option<&'a Http>,
    #[serde(skip_serializing_if = "Option::is_none")]
    service: Option<&'a Service>,
    #[serde(skip_serializing_if = "Option::is_none")]
    annotations: Option<&'a HashMap<String, AnnotationValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<&'a HashMap<String, serde_json::Value>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    subsegments: &'a [Subsegment],
}

impl<'a> From<&'a SegmentData> for SegmentDoc<'a> {
    fn from(data: &'a SegmentData) -> Self {
        SegmentDoc {
            trace_id: &data.trace_id,
            id: &data.id,
            name: &data.name,
            start_time: data.start_time,
            end_time: data.end_time,
            in_progress: data.in_progress,
            parent_id: data.parent_id.as_ref(),
            fault: data.fault,
            error: data.error,
            throttle: data.throttle,
            user: data.user.as_deref(),
            cause: data.cause.as_ref(),
            http: data.http.as_ref(),
            service: data.service.as_ref(),
            annotations: data.annotations.as_ref(),
            metadata: data.metadata.as_ref(),
            subsegments: &data.subsegments,
        }
    }
}

pub(crate) mod sealed {
    pub trait Sealed {}
}

/// A tree node that can have subsegments opened beneath it: a `Segment` or
/// a `Subsegment`.
pub trait Parent: sealed::Sealed {
    /// Opens a new subsegment as a child of this node.
    fn open_subsegment(
        &self,
        name: impl Into<String>,
    ) -> Subsegment;
}

impl sealed::Sealed for Segment {}

impl Parent for Segment {
    fn open_subsegment(
        &self,
        name: impl Into<String>,
    ) -> Subsegment {
        Segment::open_subsegment(self, name)
    }
}
