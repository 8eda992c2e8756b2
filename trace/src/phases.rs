use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Accumulated phase durations for one request.
///
/// The concurrent backend calls spawned for a single fan-out all record into
/// the request's trace, so the counters are atomic. Durations only ever
/// grow; a phase entered several times (one HTTP round trip per chosen
/// backend, say) accumulates.
#[derive(Debug, Default)]
pub struct Trace {
    limiter_ns: AtomicU64,
    marshal_ns: AtomicU64,
    http_call_ns: AtomicU64,
    read_body_ns: AtomicU64,
    unmarshal_ns: AtomicU64,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record time spent waiting for a limiter slot since `start`.
    pub fn add_limiter(&self, start: Instant) {
        Self::add(&self.limiter_ns, start)
    }

    /// Record time spent building the outgoing request since `start`.
    pub fn add_marshal(&self, start: Instant) {
        Self::add(&self.marshal_ns, start)
    }

    /// Record time spent in the HTTP round trip since `start`.
    pub fn add_http_call(&self, start: Instant) {
        Self::add(&self.http_call_ns, start)
    }

    /// Record time spent reading the response body since `start`.
    pub fn add_read_body(&self, start: Instant) {
        Self::add(&self.read_body_ns, start)
    }

    /// Record time spent decoding the response body since `start`.
    pub fn add_unmarshal(&self, start: Instant) {
        Self::add(&self.unmarshal_ns, start)
    }

    fn add(field: &AtomicU64, start: Instant) {
        let elapsed = start.elapsed().as_nanos().min(u64::MAX as u128) as u64;
        field.fetch_add(elapsed, Ordering::Relaxed);
    }

    /// Snapshot the accumulated durations for emission by the handler layer.
    pub fn report(&self) -> TraceReport {
        TraceReport {
            limiter: Duration::from_nanos(self.limiter_ns.load(Ordering::Relaxed)),
            marshal: Duration::from_nanos(self.marshal_ns.load(Ordering::Relaxed)),
            http_call: Duration::from_nanos(self.http_call_ns.load(Ordering::Relaxed)),
            read_body: Duration::from_nanos(self.read_body_ns.load(Ordering::Relaxed)),
            unmarshal: Duration::from_nanos(self.unmarshal_ns.load(Ordering::Relaxed)),
        }
    }
}

/// A point-in-time snapshot of a [`Trace`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraceReport {
    pub limiter: Duration,
    pub marshal: Duration,
    pub http_call: Duration,
    pub read_body: Duration,
    pub unmarshal: Duration,
}
