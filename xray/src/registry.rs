use crate::{segment::Segment, trace_id::TraceId};
use dashmap::DashMap;
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, RwLock,
    },
    thread,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

const DEFAULT_TTL: Duration = Duration::from_secs(10 * 60);
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

struct Entry {
    segment: Segment,
    expires_at: AtomicU64,
}

/// A process-local, concurrently accessed map from trace id to the live
/// `Segment` object recording it.
///
/// Exists so a subsegment opened from an RPC-carried trace id (rather than
/// an in-process parent handle) can recover the segment it belongs to.
/// Entries are evicted a configurable duration after their last access; a
/// background thread sweeps expired entries so the map does not grow
/// unbounded across a long-running process.
pub struct SegmentRegistry {
    entries: Arc<DashMap<String, Entry>>,
    ttl: Arc<RwLock<Duration>>,
    sweeper: Option<thread::JoinHandle<()>>,
}

impl std::fmt::Debug for SegmentRegistry {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("SegmentRegistry")
            .field("len", &self.entries.len())
            .finish()
    }
}

impl Default for SegmentRegistry {
    /// A registry with the default 10-minute entry lifetime and a 30-second
    /// background sweep.
    fn default() -> Self {
        SegmentRegistry::new(DEFAULT_TTL)
    }
}

impl SegmentRegistry {
    /// Creates a registry whose entries expire `ttl` after their last
    /// access, swept in the background every 30 seconds.
    pub fn new(ttl: Duration) -> Self {
        let entries: Arc<DashMap<String, Entry>> = Arc::new(DashMap::new());
        let ttl = Arc::new(RwLock::new(ttl));

        let sweep_entries = Arc::clone(&entries);
        let sweeper = thread::Builder::new()
            .name("xray-registry-sweep".into())
            .spawn(move || loop {
                thread::sleep(SWEEP_INTERVAL);
                let now = now_secs();
                sweep_entries.retain(|_, entry| entry.expires_at.load(Ordering::Relaxed) > now);
            })
            .ok();

        SegmentRegistry {
            entries,
            ttl,
            sweeper,
        }
    }

    /// Changes the TTL applied to entries inserted from this point forward
    /// (existing entries keep the expiry they were given at insertion).
    pub fn set_segment_cache_duration(
        &self,
        ttl: Duration,
    ) {
        *self.ttl.write().unwrap_or_else(|e| e.into_inner()) = ttl;
    }

    /// Registers `segment` under `trace_id`, refreshing its expiry.
    pub fn put(
        &self,
        trace_id: &TraceId,
        segment: Segment,
    ) {
        let ttl = *self.ttl.read().unwrap_or_else(|e| e.into_inner());
        let expires_at = now_secs() + ttl.as_secs();
        self.entries.insert(
            trace_id.to_string(),
            Entry {
                segment,
                expires_at: AtomicU64::new(expires_at),
            },
        );
    }

    /// Looks up the segment registered for `trace_id`, returning `None` if
    /// it is absent or has expired. A successful lookup refreshes the
    /// entry's expiry.
    pub fn get(
        &self,
        trace_id: &str,
    ) -> Option<Segment> {
        let entry = self.entries.get(trace_id)?;
        if entry.expires_at.load(Ordering::Relaxed) <= now_secs() {
            return None;
        }
        let ttl = *self.ttl.read().unwrap_or_else(|e| e.into_inner());
        entry
            .expires_at
            .store(now_secs() + ttl.as_secs(), Ordering::Relaxed);
        Some(entry.segment.clone())
    }

    /// Removes the entry for `trace_id`, if present.
    pub fn remove(
        &self,
        trace_id: &str,
    ) {
        self.entries.remove(trace_id);
    }

    /// The number of live entries, ignoring expiry (an upper bound between
    /// sweeps).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry holds no entries, ignoring expiry.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Drop for SegmentRegistry {
    fn drop(&mut self) {
        // the sweep thread holds only a cloned Arc to the map and loops
        // forever; it is intentionally leaked rather than joined, since the
        // registry is typically a process-lifetime singleton.
        let _ = self.sweeper.take();
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
