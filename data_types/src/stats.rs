use std::sync::Arc;

/// Counters accumulated while serving one request, merged across backends
/// and surfaced to the handler layer for emission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stats {
    pub find_requests: u64,
    pub render_requests: u64,
    pub info_requests: u64,
    pub timeouts: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Backends that answered.
    pub servers: Vec<Arc<str>>,
    /// Backends that failed or never answered.
    pub failed_servers: Vec<Arc<str>>,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&mut self, other: &Self) {
        self.find_requests += other.find_requests;
        self.render_requests += other.render_requests;
        self.info_requests += other.info_requests;
        self.timeouts += other.timeouts;
        self.cache_hits += other.cache_hits;
        self.cache_misses += other.cache_misses;
        self.servers.extend(other.servers.iter().cloned());
        self.failed_servers
            .extend(other.failed_servers.iter().cloned());
    }
}
