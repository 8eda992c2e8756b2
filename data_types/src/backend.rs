use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use protocol::{MultiFetchRequest, MultiGlobRequest, MultiMetricsInfoRequest};
use trace::RequestContext;

use crate::{Errors, ServerFetchResponse, ServerFindResponse, ServerInfoResponse};

/// Deadlines per query surface. Find also bounds info lookups and probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub find: Duration,
    pub render: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            find: Duration::from_secs(2),
            render: Duration::from_secs(10),
        }
    }
}

/// The capability set every queryable store exposes.
///
/// Implemented by the HTTP client for a single remote store and by the
/// fan-out dispatcher itself, which is what allows groups to nest and the
/// request splitter to resolve globs through the group it splits for.
#[async_trait]
pub trait Backend: Debug + Send + Sync + 'static {
    /// Stable identity; for a remote store, its address.
    fn name(&self) -> &str;

    /// Per-request metric cap a store declares; 0 means unlimited.
    fn max_metrics_per_request(&self) -> usize {
        0
    }

    /// Routing hint: whether any of the given targets was recently observed
    /// on this backend. Never load-bearing for correctness.
    fn contains(&self, targets: &[String]) -> bool {
        let _ = targets;
        false
    }

    /// Resolve glob patterns to matches.
    async fn find(
        &self,
        ctx: &RequestContext,
        request: MultiGlobRequest,
    ) -> Result<ServerFindResponse, Errors>;

    /// Retrieve raw samples.
    async fn fetch(
        &self,
        ctx: &RequestContext,
        request: MultiFetchRequest,
    ) -> Result<ServerFetchResponse, Errors>;

    /// Retrieve storage metadata, keyed by backend address.
    async fn info(
        &self,
        ctx: &RequestContext,
        request: MultiMetricsInfoRequest,
    ) -> Result<ServerInfoResponse, Errors>;

    /// Discover the top-level domains this backend answers for.
    async fn probe_tlds(&self, ctx: &RequestContext) -> Result<Vec<String>, Errors>;
}
