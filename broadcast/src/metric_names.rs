//! Metric keys emitted by the dispatcher.
//!
//! Kept in one place so dashboards and alerts have a single source of truth
//! for spelling.

/// Fan-out requests served, labelled by surface.
///
/// Labels:
/// - `surface`: "find", "render", "info", "probe"
pub const REQUESTS_TOTAL: &str = "broadcast_requests_total";

/// Fan-outs that hit the per-surface deadline before every backend answered.
pub const TIMEOUTS_TOTAL: &str = "broadcast_timeouts_total";

/// Single-flight query cache hits, labelled by surface.
pub const QUERY_CACHE_HITS_TOTAL: &str = "broadcast_query_cache_hits_total";

/// Single-flight query cache misses (leader elections), labelled by surface.
pub const QUERY_CACHE_MISSES_TOTAL: &str = "broadcast_query_cache_misses_total";

// --- label keys ---

pub const LABEL_SURFACE: &str = "surface";
