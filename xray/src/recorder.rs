use crate::{
    context::TraceContext,
    emitter::Emitter,
    registry::SegmentRegistry,
    sampler::Sampler,
    segment::{Parent, Segment},
    subsegment::Subsegment,
};
use std::{
    marker::PhantomData,
    mem,
    sync::{Arc, RwLock},
    time::Duration,
};
use thread_local_object::ThreadLocal;

/// The trace state active on the current thread: the segment it belongs to,
/// and, if execution is nested inside one, the innermost open subsegment.
#[derive(Clone, Default)]
struct Context {
    segment: Option<Segment>,
    subsegment: Option<Subsegment>,
}

struct Inner {
    current: ThreadLocal<Context>,
    sampler: RwLock<Arc<Sampler>>,
    emitter: Arc<Emitter>,
    registry: SegmentRegistry,
}

/// A restore guard for the thread-local trace context: on drop, puts back
/// whatever context was active before it was set.
///
/// Deliberately `!Send`, since thread-local state only makes sense on the
/// thread it was captured from.
pub struct Current {
    recorder: Recorder,
    prev: Option<Context>,
    _p: PhantomData<*const ()>,
}

unsafe impl Sync for Current {}

impl Drop for Current {
    fn drop(&mut self) {
        match self.prev.take() {
            Some(prev) => {
                self.recorder.inner.current.set(prev);
            }
            None => {
                self.recorder.inner.current.remove();
            }
        }
    }
}

/// A segment opened through a [`Recorder`]. Closes (and, if sampled,
/// flushes) the segment when dropped.
pub struct OpenSegment {
    current: Current,
    state: Option<Segment>,
}

impl OpenSegment {
    /// The segment this guard is holding open.
    pub fn segment(&self) -> &Segment {
        self.state.as_ref().expect("segment dropped before its guard")
    }
}

impl Drop for OpenSegment {
    fn drop(&mut self) {
        if let Some(segment) = mem::replace(&mut self.state, None) {
            if let Err(err) = segment.close() {
                log::debug!("error closing segment: {}", err);
            }
        }
    }
}

/// A subsegment opened through a [`Recorder`]. Closes it (and decrements
/// its root segment's open-subsegment counter) when dropped.
pub struct OpenSubsegment {
    current: Current,
    state: Option<Subsegment>,
}

impl OpenSubsegment {
    /// The subsegment this guard is holding open.
    pub fn subsegment(&self) -> &Subsegment {
        self.state
            .as_ref()
            .expect("subsegment dropped before its guard")
    }
}

impl Drop for OpenSubsegment {
    fn drop(&mut self) {
        if let Some(subsegment) = mem::replace(&mut self.state, None) {
            if let Err(err) = subsegment.close(None) {
                log::debug!("error closing subsegment: {}", err);
            }
        }
    }
}

/// Coordinates segment and subsegment lifecycle for a process: tracks the
/// currently-open trace per thread, resolves sampling decisions through a
/// shared [`Sampler`], registers segments for cross-process lookup in a
/// [`SegmentRegistry`], and emits finished documents through a shared
/// [`Emitter`].
///
/// Holds no process-global state of its own — an application wires up its
/// own `Recorder` (or uses the crate-level default) and threads it through
/// explicitly, rather than relying on implicit global mutation.
#[derive(Clone)]
pub struct Recorder {
    inner: Arc<Inner>,
}

impl Default for Recorder {
    fn default() -> Self {
        Recorder {
            inner: Arc::new(Inner {
                current: ThreadLocal::new(),
                sampler: RwLock::new(Arc::new(Sampler::default())),
                emitter: Arc::new(Emitter::default()),
                registry: SegmentRegistry::default(),
            }),
        }
    }
}

impl Recorder {
    /// Builds a recorder from explicit components, rather than the
    /// environment-driven defaults.
    pub fn new(
        sampler: Sampler,
        emitter: Emitter,
        registry: SegmentRegistry,
    ) -> Self {
        Recorder {
            inner: Arc::new(Inner {
                current: ThreadLocal::new(),
                sampler: RwLock::new(Arc::new(sampler)),
                emitter: Arc::new(emitter),
                registry,
            }),
        }
    }

    /// Replaces the sampler consulted for segments opened from this point
    /// forward without an upstream sampling decision. Segments already open
    /// keep whichever sampler decided them.
    pub fn set_sampler(
        &self,
        sampler: Sampler,
    ) {
        *self.inner.sampler.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(sampler);
    }

    /// Changes how long the registry retains segments looked up by trace id.
    pub fn set_segment_cache_duration(
        &self,
        ttl: Duration,
    ) {
        self.inner.registry.set_segment_cache_duration(ttl);
    }

    /// Repoints the emitter at a different daemon address.
    pub fn set_daemon_host_and_port(
        &self,
        host: &str,
        port: &str,
    ) {
        self.inner.emitter.set_daemon_host_and_port(host, port);
    }

    fn set(
        &self,
        ctx: Context,
    ) -> Current {
        Current {
            recorder: self.clone(),
            prev: self.inner.current.set(ctx),
            _p: PhantomData,
        }
    }

    fn current(&self) -> Option<Context> {
        self.inner.current.get_cloned()
    }

    /// Begins a new segment, inheriting `context` (the result of decoding an
    /// inbound `X-Amzn-Trace-Id` header or RPC metadata, or
    /// [`TraceContext::none`] to start a fresh trace). Registers the segment
    /// so a downstream call can recover it by trace id.
    pub fn open_segment(
        &self,
        name: impl Into<String>,
        context: TraceContext,
    ) -> OpenSegment {
        let sampler = Arc::clone(&self.inner.sampler.read().unwrap_or_else(|e| e.into_inner()));
        let segment = Segment::open(name, context, sampler, Arc::clone(&self.inner.emitter));
        self.inner.registry.put(&segment.trace_id(), segment.clone());

        let current = self.set(Context {
            segment: Some(segment.clone()),
            subsegment: None,
        });

        OpenSegment {
            current,
            state: Some(segment),
        }
    }

    /// Opens a subsegment nested under whatever trace is active on this
    /// thread (the innermost open subsegment if there is one, otherwise the
    /// thread's current segment). Returns `None` if no trace is active.
    pub fn open_subsegment(
        &self,
        name: impl Into<String>,
    ) -> Option<OpenSubsegment> {
        let active = self.current()?;

        let subsegment = match &active.subsegment {
            Some(parent) => parent.open_subsegment(name),
            None => active.segment.as_ref()?.open_subsegment(name),
        };

        let current = self.set(Context {
            segment: active.segment,
            subsegment: Some(subsegment.clone()),
        });

        Some(OpenSubsegment {
            current,
            state: Some(subsegment),
        })
    }

    /// Opens a subsegment as a child of the segment registered under
    /// `trace_id`, recovering it from the registry rather than from this
    /// thread's own context. Used when a subsegment is opened on a
    /// different thread (or after an RPC hop) than the one that opened its
    /// segment.
    pub fn resume_subsegment(
        &self,
        trace_id: &str,
        name: impl Into<String>,
    ) -> Option<OpenSubsegment> {
        let segment = self.inner.registry.get(trace_id)?;
        let subsegment = segment.open_subsegment(name);

        let current = self.set(Context {
            segment: Some(segment),
            subsegment: Some(subsegment.clone()),
        });

        Some(OpenSubsegment {
            current,
            state: Some(subsegment),
        })
    }

    /// The segment active on this thread, if any.
    pub fn current_segment(&self) -> Option<Segment> {
        self.current()?.segment
    }

    /// The innermost open subsegment on this thread, if any.
    pub fn current_subsegment(&self) -> Option<Subsegment> {
        self.current()?.subsegment
    }
}
