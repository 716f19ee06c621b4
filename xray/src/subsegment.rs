use crate::{
    annotation::AnnotationValue,
    attributes::{Cause, Exception, Remote, Severity},
    epoch::Seconds,
    error::Result,
    segment::{sealed, Parent, Segment, SegmentInner},
    segment_id::SegmentId,
};
use serde_derive::Serialize;
use std::{
    collections::HashMap,
    ops::Not,
    sync::{Arc, RwLock, Weak},
};

/// A subsegment records one internal operation (a downstream call, a
/// database query, a block of custom instrumentation) nested beneath a
/// [`Segment`] or another `Subsegment`.
///
/// Holds a non-owning [`Weak`] reference to the segment at the root of its
/// tree: closing a subsegment needs to decrement the root's open-subsegment
/// counter, but must not keep the root alive on its own.
#[derive(Clone)]
pub struct Subsegment {
    pub(crate) inner: Arc<SubsegmentInner>,
}

pub(crate) struct SubsegmentInner {
    pub(crate) data: RwLock<SubsegmentData>,
    pub(crate) root: Weak<SegmentInner>,
}

pub(crate) struct SubsegmentData {
    id: SegmentId,
    name: String,
    start_time: Seconds,
    end_time: Option<Seconds>,
    in_progress: bool,
    fault: bool,
    error: bool,
    throttle: bool,
    namespace: Option<String>,
    precursor_ids: Vec<String>,
    cause: Option<Cause>,
    last_exception: Option<(String, String)>,
    remote: Option<Remote>,
    annotations: Option<HashMap<String, AnnotationValue>>,
    metadata: Option<HashMap<String, serde_json::Value>>,
    subsegments: Vec<Subsegment>,
}

impl Subsegment {
    pub(crate) fn new(
        name: impl Into<String>,
        root: Weak<SegmentInner>,
    ) -> Self {
        let name = crate::segment::truncate_name(name.into());
        Subsegment {
            inner: Arc::new(SubsegmentInner {
                data: RwLock::new(SubsegmentData {
                    id: SegmentId::new(),
                    name,
                    start_time: Seconds::now(),
                    end_time: None,
                    in_progress: true,
                    fault: false,
                    error: false,
                    throttle: false,
                    namespace: None,
                    precursor_ids: Vec::new(),
                    cause: None,
                    last_exception: None,
                    remote: None,
                    annotations: None,
                    metadata: None,
                    subsegments: Vec::new(),
                }),
                root,
            }),
        }
    }

    /// This subsegment's unique id.
    pub fn id(&self) -> SegmentId {
        self.read().id.clone()
    }

    /// Attaches a queryable key/value annotation.
    pub fn add_annotation(
        &self,
        key: impl Into<String>,
        value: impl Into<AnnotationValue>,
    ) -> Result<()> {
        let key = key.into();
        let value = value.into();
        if !value.validate() {
            return Err(crate::error::Error::InvalidAnnotationValue { key });
        }
        self.write()
            .annotations
            .get_or_insert_with(HashMap::new)
            .insert(key, value);
        Ok(())
    }

    /// Attaches a non-queryable key/value metadata entry.
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

    /// Marks this subsegment as a call to another traced service. Until the
    /// downstream service uploads a segment whose `parent_id` matches this
    /// subsegment's id, the trace is considered broken.
    pub fn add_remote(&self) {
        self.write().namespace = Some("remote".into());
    }

    /// Records details of the outgoing request/response this subsegment
    /// represents.
    pub fn add_remote_data(
        &self,
        remote: Remote,
    ) {
        self.write().remote = Some(remote);
    }

    /// Records the id of a sibling subsegment that completed before this
    /// one began, preserving ordering information.
    pub fn add_precursor_id(
        &self,
        id: impl Into<String>,
    ) {
        self.write().precursor_ids.push(id.into());
    }

    /// Marks this subsegment as a server fault.
    pub fn add_fault(&self) {
        self.write().fault = true;
    }

    /// Marks this subsegment as throttled (a 429 response).
    pub fn add_throttle(&self) {
        self.write().throttle = true;
    }

    /// Records an error against this subsegment. A [`Severity::Fault`]
    /// simply sets the fault flag; a [`Severity::Error`] sets the error
    /// flag and additionally records the exception, applying the same
    /// duplicate-collapsing rule as [`Segment::add_exception`].
    pub fn add_error(
        &self,
        err: &(dyn std::error::Error + 'static),
        severity: Severity,
    ) {
        if let Severity::Fault = severity {
            self.add_fault();
            return;
        }

        let mut data = self.write();
        data.error = true;

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
                    working_directory: crate::segment::current_dir(),
                    paths: Vec::new(),
                    exceptions: vec![exception],
                });
            }
        }
        data.last_exception = Some((message, exception_id));
    }

    /// Closes the subsegment, optionally recording a terminal error, and
    /// decrements the open-subsegment counter on the root segment. If that
    /// decrement brings the root to zero open subsegments and the root is
    /// already closed, this triggers the root's flush.
    pub fn close(
        &self,
        err: Option<(&(dyn std::error::Error + 'static), Severity)>,
    ) -> Result<()> {
        {
            let mut data = self.write();
            if data.end_time.is_none() {
                data.end_time = Some(Seconds::now());
            }
            data.in_progress = false;
        }

        if let Some((err, severity)) = err {
            self.add_error(err, severity);
        }

        match self.inner.root.upgrade() {
            Some(root) => Segment { inner: root }.decrement_counter(),
            None => Ok(()),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, SubsegmentData> {
        self.inner.data.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, SubsegmentData> {
        self.inner.data.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl sealed::Sealed for Subsegment {}

impl Parent for Subsegment {
    fn open_subsegment(
        &self,
        name: impl Into<String>,
    ) -> Subsegment {
        let child = Subsegment::new(name, self.inner.root.clone());

        if let Some(root) = self.inner.root.upgrade() {
            root.data
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .counter += 1;
        }

        self.write().subsegments.push(child.clone());
        child
    }
}

#[derive(Serialize)]
pub(crate) struct SubsegmentDoc<'a> {
    id: &'a SegmentId,
    name: &'a str,
    start_time: Seconds,
    #[serde(skip_serializing_if = "Option::is_none")]
    end_time: Option<Seconds>,
    #[serde(skip_serializing_if = "Not::not")]
    in_progress: bool,
    #[serde(skip_serializing_if = "Not::not")]
    fault: bool,
    #[serde(skip_serializing_if = "Not::not")]
    error: bool,
    #[serde(skip_serializing_if = "Not::not")]
    throttle: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    precursor_ids: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    cause: Option<&'a Cause>,
    #[serde(skip_serializing_if = "Option::is_none")]
    http: Option<&'a Remote>,
    #[serde(skip_serializing_if = "Option::is_none")]
    annotations: Option<&'a HashMap<String, AnnotationValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<&'a HashMap<String, serde_json::Value>>,
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    subsegments: &'a [Subsegment],
}

impl<'a> From<&'a SubsegmentData> for SubsegmentDoc<'a> {
    fn from(data: &'a SubsegmentData) -> Self {
        SubsegmentDoc {
            id: &data.id,
            name: &data.name,
            start_time: data.start_time,
            end_time: data.end_time,
            in_progress: data.in_progress,
            fault: data.fault,
            error: data.error,
            throttle: data.throttle,
            namespace: data.namespace.as_deref(),
            precursor_ids: &data.precursor_ids,
            cause: data.cause.as_ref(),
            http: data.remote.as_ref(),
            annotations: data.annotations.as_ref(),
            metadata: data.metadata.as_ref(),
            kind: "subsegment",
            subsegments: &data.subsegments,
        }
    }
}

impl serde::Serialize for Subsegment {
    fn serialize<S>(
        &self,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let data = self.read();
        SubsegmentDoc::from(&*data).serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{context::TraceContext, emitter::Emitter, sampler::Sampler};
    use std::fmt;

    #[derive(Debug)]
    struct Boom;
    impl fmt::Display for Boom {
        fn fmt(
            &self,
            f: &mut fmt::Formatter<'_>,
        ) -> fmt::Result {
            write!(f, "boom")
        }
    }
    impl std::error::Error for Boom {}

    fn segment() -> Segment {
        Segment::open(
            "checkout",
            TraceContext::none(),
            Arc::new(Sampler::new(10, 0.0)),
            Arc::new(Emitter::new("127.0.0.1", "2000")),
        )
    }

    #[test]
    fn multibyte_names_are_truncated_on_a_char_boundary() {
        let segment = segment();
        let child = segment.open_subsegment("é".repeat(150));
        let name = child.read().name.clone();
        assert!(name.len() <= 200);
        assert!(name.is_char_boundary(name.len()));
    }

    #[test]
    fn opening_a_subsegment_increments_the_root_counter() {
        let segment = segment();
        let _child = segment.open_subsegment("db-query");
        assert_eq!(segment.read().counter, 1);
    }

    #[test]
    fn nested_subsegments_still_increment_the_root_counter() {
        let segment = segment();
        let child = segment.open_subsegment("outer");
        let _grandchild = Parent::open_subsegment(&child, "inner");
        assert_eq!(segment.read().counter, 2);
    }

    #[test]
    fn closing_decrements_the_root_and_can_trigger_flush() {
        let segment = segment();
        let child = segment.open_subsegment("db-query");
        segment.close().unwrap();
        assert!(child.close(None).is_ok());
        assert_eq!(segment.read().counter, 0);
    }

    #[test]
    fn fault_severity_sets_fault_without_recording_an_exception() {
        let segment = segment();
        let child = segment.open_subsegment("db-query");
        child.add_error(&Boom, Severity::Fault);
        assert!(child.read().fault);
        assert!(child.read().cause.is_none());
    }

    #[test]
    fn error_severity_records_the_exception() {
        let segment = segment();
        let child = segment.open_subsegment("db-query");
        child.add_error(&Boom, Severity::Error);
        assert!(child.read().error);
        assert!(child.read().cause.is_some());
    }
}
