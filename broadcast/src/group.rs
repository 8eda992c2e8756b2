use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cache::{Lookup, PathCache, QueryCache};
use data_types::{
    Backend, Error, Errors, ServerFetchResponse, ServerFindResponse, ServerInfoResponse, Timeouts,
};
use futures::stream::{FuturesUnordered, StreamExt};
use limiter::ServerLimiter;
use prost::Message;
use protocol::{FetchRequest, MultiFetchRequest, MultiGlobRequest, MultiMetricsInfoRequest};
use tokio::sync::mpsc;
use trace::RequestContext;
use tracing::{debug, error, warn};

use crate::metric_names::{
    LABEL_SURFACE, QUERY_CACHE_HITS_TOTAL, QUERY_CACHE_MISSES_TOTAL, REQUESTS_TOTAL,
    TIMEOUTS_TOTAL,
};

const FIND_CACHE_SIZE: u64 = 64 << 20;
const FIND_CACHE_TTL: Duration = Duration::from_secs(5);
const FETCH_CACHE_SIZE: u64 = 256 << 20;
const FETCH_CACHE_TTL: Duration = Duration::from_secs(1);
const INFO_CACHE_SIZE: u64 = 64 << 20;
const INFO_CACHE_TTL: Duration = Duration::from_secs(5);
const PROBE_CACHE_SIZE: u64 = 64 << 20;
const PROBE_CACHE_TTL: Duration = Duration::from_secs(10);

/// Fan-out dispatcher over a set of backends.
///
/// See the crate docs for the overall shape. All state is shareable; the
/// per-surface single-flight caches make concurrent identical requests
/// collapse onto one leader fan-out.
#[derive(Debug)]
pub struct BroadcastGroup {
    group_name: Arc<str>,
    clients: Vec<Arc<dyn Backend>>,
    servers: Vec<Arc<str>>,
    limiter: ServerLimiter,
    path_cache: PathCache<Arc<dyn Backend>>,
    timeouts: Timeouts,

    find_cache: QueryCache<ServerFindResponse>,
    fetch_cache: QueryCache<ServerFetchResponse>,
    info_cache: QueryCache<ServerInfoResponse>,
    probe_cache: QueryCache<Vec<String>>,
}

impl BroadcastGroup {
    /// Build a group with its own routing cache and limiter.
    pub fn new(
        group_name: impl Into<Arc<str>>,
        clients: Vec<Arc<dyn Backend>>,
        expire_delay: Duration,
        concurrency_limit: usize,
        timeouts: Timeouts,
    ) -> Result<Self, Errors> {
        let servers: Vec<Arc<str>> = clients.iter().map(|c| Arc::from(c.name())).collect();
        let limiter = ServerLimiter::new(servers.iter().map(|s| s.to_string()), concurrency_limit);
        let path_cache = PathCache::new(expire_delay);

        Self::with_parts(group_name, clients, path_cache, limiter, timeouts)
    }

    /// Build a group around an existing routing cache and limiter, e.g. when
    /// nesting groups that should share both.
    pub fn with_parts(
        group_name: impl Into<Arc<str>>,
        clients: Vec<Arc<dyn Backend>>,
        path_cache: PathCache<Arc<dyn Backend>>,
        limiter: ServerLimiter,
        timeouts: Timeouts,
    ) -> Result<Self, Errors> {
        if clients.is_empty() {
            return Err(Errors::fatal("no servers specified"));
        }

        let group_name = group_name.into();
        let servers: Vec<Arc<str>> = clients.iter().map(|c| Arc::from(c.name())).collect();
        debug!(group = %group_name, clients = ?servers, "created broadcast group");

        Ok(Self {
            group_name,
            clients,
            servers,
            limiter,
            path_cache,
            timeouts,
            find_cache: QueryCache::new(FIND_CACHE_SIZE, FIND_CACHE_TTL),
            fetch_cache: QueryCache::new(FETCH_CACHE_SIZE, FETCH_CACHE_TTL),
            info_cache: QueryCache::new(INFO_CACHE_SIZE, INFO_CACHE_TTL),
            probe_cache: QueryCache::new(PROBE_CACHE_SIZE, PROBE_CACHE_TTL),
        })
    }

    pub fn group_name(&self) -> &str {
        &self.group_name
    }

    /// Names of every backend in this group.
    pub fn servers(&self) -> &[Arc<str>] {
        &self.servers
    }

    pub fn path_cache(&self) -> &PathCache<Arc<dyn Backend>> {
        &self.path_cache
    }

    /// Backends worth asking for the given metric names.
    ///
    /// The first dot-delimited segment of each name is looked up in the
    /// routing cache; the union of the hits is the selection. No hit for any
    /// name widens the fan-out to every backend, so the hint can be stale or
    /// missing without affecting the answer.
    fn choose_servers(&self, requests: &[String]) -> Vec<Arc<dyn Backend>> {
        let mut chosen: Vec<Arc<dyn Backend>> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for request in requests {
            let prefix = match request.find('.') {
                Some(idx) if idx > 0 => &request[..idx],
                _ => request.as_str(),
            };
            let Some(clients) = self.path_cache.get(prefix) else {
                continue;
            };
            for client in clients {
                if seen.insert(client.name().to_owned()) {
                    chosen.push(client);
                }
            }
        }

        if chosen.is_empty() {
            return self.clients.clone();
        }
        chosen
    }

    /// Retrieve raw samples from every backend that may hold them.
    pub async fn fetch(
        &self,
        ctx: &RequestContext,
        request: MultiFetchRequest,
    ) -> Result<ServerFetchResponse, Errors> {
        let request_names: Vec<String> =
            request.metrics.iter().map(|m| m.name.clone()).collect();
        debug!(group = %self.group_name, request = ?request_names, "fetch");
        metrics::counter!(REQUESTS_TOTAL, LABEL_SURFACE => "render").increment(1);

        let key = fetch_request_key(&self.group_name, &request);
        let item = self.fetch_cache.get_query_item(&key);
        match item.fetch_or_lock(ctx).await {
            Lookup::Hit(cached) => {
                debug!(group = %self.group_name, "cache hit");
                metrics::counter!(QUERY_CACHE_HITS_TOTAL, LABEL_SURFACE => "render").increment(1);
                let mut response = (*cached).clone();
                response.stats.cache_hits += 1;
                return Ok(response);
            }
            Lookup::TimedOut | Lookup::Aborted => return Err(Errors::fatal("timeout")),
            Lookup::Leader => {}
        }
        metrics::counter!(QUERY_CACHE_MISSES_TOTAL, LABEL_SURFACE => "render").increment(1);
        let abort = item.abort_guard();

        let ctx = ctx.child_with_timeout(self.timeouts.render);
        let clients = self.choose_servers(&request_names);
        let client_names: Vec<Arc<str>> = clients.iter().map(|c| Arc::from(c.name())).collect();

        let (tx, rx) = mpsc::channel(clients.len());
        let producers: FuturesUnordered<_> = clients
            .iter()
            .map(|client| {
                self.single_fetch(ctx.clone(), Arc::clone(client), request.clone(), tx.clone())
            })
            .collect();
        drop(tx);

        let (mut result, errors) = gather(
            &ctx,
            &self.group_name,
            "render",
            client_names,
            producers,
            rx,
            ServerFetchResponse::default(),
        )
        .await;

        if result.response.metrics.is_empty() {
            error!(group = %self.group_name, "failed to get any response");
            let mut errors = errors;
            errors.add(Error::request(format!(
                "failed to get any response from backend group: {}",
                self.group_name
            )));
            return Err(errors);
        }

        debug!(
            group = %self.group_name,
            clients_count = self.clients.len(),
            have_errors = !errors.is_empty(),
            metrics = result.response.metrics.len(),
            "got some responses"
        );

        result.errors = errors;
        let size = result.response.encoded_len() as u64;
        item.store_and_unlock(result.clone(), size);
        drop(abort);

        Ok(result)
    }

    /// One backend's share of a fetch fan-out: take a limiter slot, split
    /// the request if the backend caps metrics per request, and forward
    /// every response individually to the gather channel.
    async fn single_fetch(
        &self,
        ctx: RequestContext,
        client: Arc<dyn Backend>,
        request: MultiFetchRequest,
        tx: mpsc::Sender<ServerFetchResponse>,
    ) {
        let name: Arc<str> = Arc::from(client.name());
        debug!(max_conns = self.limiter.capacity(), backend = %name, "waiting for slot");

        let _permit = match self.limiter.enter(&ctx, &name).await {
            Ok(permit) => permit,
            Err(_) => {
                debug!(backend = %name, "timeout waiting for a slot");
                let mut response = ServerFetchResponse::new(Arc::clone(&name));
                response.errors.add(Error::Limiter);
                response.stats.failed_servers.push(name);
                let _ = tx.send(response).await;
                return;
            }
        };

        for request in self.split_requests(&ctx, client.as_ref(), request).await {
            let response = match client.fetch(&ctx, request).await {
                Ok(response) => response,
                Err(errors) => {
                    let mut response = ServerFetchResponse::new(Arc::clone(&name));
                    response.errors = errors;
                    response.stats.failed_servers.push(Arc::clone(&name));
                    response
                }
            };
            if tx.send(response).await.is_err() {
                // gather loop is gone; deadline already fired
                return;
            }
        }
    }

    /// Break a request into chunks a capped backend will accept.
    ///
    /// Uncapped backends get the request unchanged. For the rest, every
    /// requested pattern is resolved through this group's own find to
    /// concrete leaves, which are packed into chunks of at most the cap,
    /// each inheriting the original window and filters.
    async fn split_requests(
        &self,
        ctx: &RequestContext,
        client: &dyn Backend,
        request: MultiFetchRequest,
    ) -> Vec<MultiFetchRequest> {
        let cap = client.max_metrics_per_request();
        if cap == 0 {
            return vec![request];
        }
        debug!(group = %self.group_name, backend = client.name(), cap, "splitting request");

        let mut requests = Vec::new();
        for metric in &request.metrics {
            let found = match self
                .find(
                    ctx,
                    MultiGlobRequest {
                        metrics: vec![metric.name.clone()],
                    },
                )
                .await
            {
                Ok(found) => found,
                Err(_) => continue,
            };

            let mut chunk = MultiFetchRequest::default();
            for glob in found.response.metrics {
                for matched in glob.matches {
                    if !matched.is_leaf {
                        continue;
                    }
                    chunk.metrics.push(FetchRequest {
                        name: matched.path,
                        start_time: metric.start_time,
                        stop_time: metric.stop_time,
                        path_expression: metric.path_expression.clone(),
                        filter_functions: metric.filter_functions.clone(),
                    });
                    if chunk.metrics.len() == cap {
                        requests.push(std::mem::take(&mut chunk));
                    }
                }
            }
            if !chunk.metrics.is_empty() {
                requests.push(chunk);
            }
        }

        requests
    }

    /// Resolve glob patterns across the group.
    pub async fn find(
        &self,
        ctx: &RequestContext,
        request: MultiGlobRequest,
    ) -> Result<ServerFindResponse, Errors> {
        debug!(group = %self.group_name, request = ?request.metrics, "find");
        metrics::counter!(REQUESTS_TOTAL, LABEL_SURFACE => "find").increment(1);

        let key = find_request_key(&self.group_name, &request);
        let item = self.find_cache.get_query_item(&key);
        match item.fetch_or_lock(ctx).await {
            Lookup::Hit(cached) => {
                debug!(group = %self.group_name, "cache hit");
                metrics::counter!(QUERY_CACHE_HITS_TOTAL, LABEL_SURFACE => "find").increment(1);
                let mut response = (*cached).clone();
                response.stats.cache_hits += 1;
                return Ok(response);
            }
            Lookup::TimedOut | Lookup::Aborted => return Err(Errors::fatal("timeout")),
            Lookup::Leader => {}
        }
        metrics::counter!(QUERY_CACHE_MISSES_TOTAL, LABEL_SURFACE => "find").increment(1);
        let abort = item.abort_guard();

        let ctx = ctx.child_with_timeout(self.timeouts.find);
        let clients = self.choose_servers(&request.metrics);
        let client_names: Vec<Arc<str>> = clients.iter().map(|c| Arc::from(c.name())).collect();

        let (tx, rx) = mpsc::channel(clients.len());
        let producers: FuturesUnordered<_> = clients
            .iter()
            .map(|client| {
                self.single_find(ctx.clone(), Arc::clone(client), request.clone(), tx.clone())
            })
            .collect();
        drop(tx);

        let (mut result, errors) = gather(
            &ctx,
            &self.group_name,
            "find",
            client_names,
            producers,
            rx,
            ServerFindResponse::default(),
        )
        .await;

        if result.is_empty() {
            let mut errors = errors;
            errors.add(Error::request(format!(
                "failed to fetch response from the server {}",
                self.group_name
            )));
            return Err(errors);
        }

        result.errors = errors;
        let size = result.response.encoded_len() as u64;
        item.store_and_unlock(result.clone(), size);
        drop(abort);

        Ok(result)
    }

    async fn single_find(
        &self,
        ctx: RequestContext,
        client: Arc<dyn Backend>,
        request: MultiGlobRequest,
        tx: mpsc::Sender<ServerFindResponse>,
    ) {
        let name: Arc<str> = Arc::from(client.name());

        let _permit = match self.limiter.enter(&ctx, &name).await {
            Ok(permit) => permit,
            Err(_) => {
                debug!(backend = %name, "timeout waiting for a slot");
                let mut response = ServerFindResponse::new(Arc::clone(&name));
                response.errors.add(Error::Limiter);
                response.stats.failed_servers.push(name);
                let _ = tx.send(response).await;
                return;
            }
        };

        let response = match client.find(&ctx, request).await {
            Ok(response) => response,
            Err(errors) => {
                let mut response = ServerFindResponse::new(Arc::clone(&name));
                response.errors = errors;
                response.stats.failed_servers.push(Arc::clone(&name));
                response
            }
        };
        let _ = tx.send(response).await;
    }

    /// Retrieve storage metadata across the group, keyed by backend address.
    pub async fn info(
        &self,
        ctx: &RequestContext,
        request: MultiMetricsInfoRequest,
    ) -> Result<ServerInfoResponse, Errors> {
        debug!(group = %self.group_name, request = ?request.names, "info");
        metrics::counter!(REQUESTS_TOTAL, LABEL_SURFACE => "info").increment(1);

        let key = info_request_key(&self.group_name, &request);
        let item = self.info_cache.get_query_item(&key);
        match item.fetch_or_lock(ctx).await {
            Lookup::Hit(cached) => {
                metrics::counter!(QUERY_CACHE_HITS_TOTAL, LABEL_SURFACE => "info").increment(1);
                let mut response = (*cached).clone();
                response.stats.cache_hits += 1;
                return Ok(response);
            }
            Lookup::TimedOut | Lookup::Aborted => return Err(Errors::fatal("timeout")),
            Lookup::Leader => {}
        }
        metrics::counter!(QUERY_CACHE_MISSES_TOTAL, LABEL_SURFACE => "info").increment(1);
        let abort = item.abort_guard();

        let ctx = ctx.child_with_timeout(self.timeouts.find);
        let clients = self.choose_servers(&request.names);
        let client_names: Vec<Arc<str>> = clients.iter().map(|c| Arc::from(c.name())).collect();

        let (tx, rx) = mpsc::channel(clients.len());
        let producers: FuturesUnordered<_> = clients
            .iter()
            .map(|client| {
                self.single_info(ctx.clone(), Arc::clone(client), request.clone(), tx.clone())
            })
            .collect();
        drop(tx);

        let (mut result, errors) = gather(
            &ctx,
            &self.group_name,
            "info",
            client_names,
            producers,
            rx,
            ServerInfoResponse::default(),
        )
        .await;

        if result.is_empty() {
            let mut errors = errors;
            errors.add(Error::request(format!(
                "failed to get any response from backend group: {}",
                self.group_name
            )));
            return Err(errors);
        }

        result.errors = errors;
        let size = result.response.encoded_len() as u64;
        item.store_and_unlock(result.clone(), size);
        drop(abort);

        Ok(result)
    }

    async fn single_info(
        &self,
        ctx: RequestContext,
        client: Arc<dyn Backend>,
        request: MultiMetricsInfoRequest,
        tx: mpsc::Sender<ServerInfoResponse>,
    ) {
        let name: Arc<str> = Arc::from(client.name());

        let _permit = match self.limiter.enter(&ctx, &name).await {
            Ok(permit) => permit,
            Err(_) => {
                debug!(backend = %name, "timeout waiting for a slot");
                let mut response = ServerInfoResponse::new(Arc::clone(&name));
                response.errors.add(Error::Limiter);
                response.stats.failed_servers.push(name);
                let _ = tx.send(response).await;
                return;
            }
        };

        let response = match client.info(&ctx, request).await {
            Ok(response) => response,
            Err(errors) => {
                let mut response = ServerInfoResponse::new(Arc::clone(&name));
                response.errors = errors;
                response.stats.failed_servers.push(Arc::clone(&name));
                response
            }
        };
        let _ = tx.send(response).await;
    }

    /// Scan every backend for its top-level domains and refresh the routing
    /// cache from the answers.
    ///
    /// Individual backend failures are collected but do not abort the scan;
    /// the call only fails when nothing was discovered at all.
    pub async fn probe_tlds(&self, ctx: &RequestContext) -> Result<Vec<String>, Errors> {
        debug!(group = %self.group_name, "probing top-level domains");
        metrics::counter!(REQUESTS_TOTAL, LABEL_SURFACE => "probe").increment(1);

        let item = self.probe_cache.get_query_item("*");
        match item.fetch_or_lock(ctx).await {
            Lookup::Hit(cached) => {
                metrics::counter!(QUERY_CACHE_HITS_TOTAL, LABEL_SURFACE => "probe").increment(1);
                return Ok((*cached).clone());
            }
            Lookup::TimedOut | Lookup::Aborted => return Err(Errors::fatal("timeout")),
            Lookup::Leader => {}
        }
        metrics::counter!(QUERY_CACHE_MISSES_TOTAL, LABEL_SURFACE => "probe").increment(1);
        let abort = item.abort_guard();

        let ctx = ctx.child_with_timeout(self.timeouts.find);

        let (tx, mut rx) = mpsc::channel(self.clients.len());
        let mut producers: FuturesUnordered<_> = self
            .clients
            .iter()
            .map(|client| {
                let ctx = ctx.clone();
                let client = Arc::clone(client);
                let tx = tx.clone();
                async move {
                    let tlds = client.probe_tlds(&ctx).await;
                    let _ = tx.send((client, tlds)).await;
                }
            })
            .collect();
        drop(tx);

        let mut errors = Errors::new();
        let mut answered: HashSet<Arc<str>> = HashSet::new();
        let mut tlds: Vec<String> = Vec::new();
        let mut routing: HashMap<String, Vec<Arc<dyn Backend>>> = HashMap::new();

        loop {
            tokio::select! {
                _ = producers.next(), if !producers.is_empty() => {}
                received = rx.recv() => match received {
                    Some((client, result)) => {
                        answered.insert(Arc::from(client.name()));
                        match result {
                            Ok(discovered) => {
                                for tld in discovered {
                                    if !tlds.contains(&tld) {
                                        tlds.push(tld.clone());
                                    }
                                    routing.entry(tld).or_default().push(Arc::clone(&client));
                                }
                            }
                            Err(e) => errors.merge(e),
                        }
                    }
                    None => break,
                },
                _ = ctx.done() => {
                    let unanswered: Vec<Arc<str>> = self
                        .servers
                        .iter()
                        .filter(|s| !answered.contains(*s))
                        .cloned()
                        .collect();
                    warn!(group = %self.group_name, no_answers_from = ?unanswered, "timeout waiting for more responses");
                    metrics::counter!(TIMEOUTS_TOTAL).increment(1);
                    errors.add(Error::timeout(unanswered));
                    break;
                }
            }
        }
        drop(producers);

        tlds.sort();
        let size = tlds.iter().map(|tld| tld.len() as u64).sum();
        item.store_and_unlock(tlds.clone(), size);
        drop(abort);

        for (tld, backends) in routing {
            self.path_cache.set(tld, backends);
        }

        if tlds.is_empty() && !errors.is_empty() {
            return Err(errors);
        }
        if !errors.is_empty() {
            warn!(group = %self.group_name, %errors, "probe finished with degraded backends");
        }

        Ok(tlds)
    }
}

#[async_trait]
impl Backend for BroadcastGroup {
    fn name(&self) -> &str {
        &self.group_name
    }

    fn contains(&self, targets: &[String]) -> bool {
        self.clients.iter().any(|client| client.contains(targets))
    }

    async fn find(
        &self,
        ctx: &RequestContext,
        request: MultiGlobRequest,
    ) -> Result<ServerFindResponse, Errors> {
        Self::find(self, ctx, request).await
    }

    async fn fetch(
        &self,
        ctx: &RequestContext,
        request: MultiFetchRequest,
    ) -> Result<ServerFetchResponse, Errors> {
        Self::fetch(self, ctx, request).await
    }

    async fn info(
        &self,
        ctx: &RequestContext,
        request: MultiMetricsInfoRequest,
    ) -> Result<ServerInfoResponse, Errors> {
        Self::info(self, ctx, request).await
    }

    async fn probe_tlds(&self, ctx: &RequestContext) -> Result<Vec<String>, Errors> {
        Self::probe_tlds(self, ctx).await
    }
}

/// What the generic gather loop needs to know about a response envelope.
trait Envelope {
    fn server(&self) -> Arc<str>;
    fn take_errors(&mut self) -> Errors;
    fn merge_into(self, aggregate: &mut Self);
    fn bump_timeouts(aggregate: &mut Self);
}

macro_rules! impl_envelope {
    ($($ty:ty),+) => {
        $(impl Envelope for $ty {
            fn server(&self) -> Arc<str> {
                Arc::clone(&self.server)
            }

            fn take_errors(&mut self) -> Errors {
                std::mem::take(&mut self.errors)
            }

            fn merge_into(self, aggregate: &mut Self) {
                aggregate.merge(self)
            }

            fn bump_timeouts(aggregate: &mut Self) {
                aggregate.stats.timeouts += 1;
            }
        })+
    };
}

impl_envelope!(ServerFetchResponse, ServerFindResponse, ServerInfoResponse);

/// Consume responses until every producer finished and the channel drained,
/// or the deadline fires. On deadline the merged-so-far aggregate is
/// returned together with a timeout error naming the silent backends.
async fn gather<R, F>(
    ctx: &RequestContext,
    group_name: &str,
    surface: &'static str,
    client_names: Vec<Arc<str>>,
    mut producers: FuturesUnordered<F>,
    mut rx: mpsc::Receiver<R>,
    mut aggregate: R,
) -> (R, Errors)
where
    R: Envelope,
    F: std::future::Future<Output = ()>,
{
    let mut errors = Errors::new();
    let mut answered: HashSet<Arc<str>> = HashSet::new();

    loop {
        tokio::select! {
            _ = producers.next(), if !producers.is_empty() => {}
            received = rx.recv() => match received {
                Some(mut response) => {
                    answered.insert(response.server());
                    errors.merge(response.take_errors());
                    response.merge_into(&mut aggregate);
                }
                None => break,
            },
            _ = ctx.done() => {
                let unanswered: Vec<Arc<str>> = client_names
                    .iter()
                    .filter(|name| !answered.contains(*name))
                    .cloned()
                    .collect();
                warn!(
                    group = %group_name,
                    surface,
                    no_answers_from = ?unanswered,
                    "timeout waiting for more responses"
                );
                metrics::counter!(TIMEOUTS_TOTAL).increment(1);
                errors.add(Error::timeout(unanswered));
                R::bump_timeouts(&mut aggregate);
                break;
            }
        }
    }
    // cancels whatever is still in flight past the deadline
    drop(producers);

    (aggregate, errors)
}

fn fetch_request_key(prefix: &str, request: &MultiFetchRequest) -> String {
    use std::fmt::Write;

    let mut key = format!("prefix={prefix}");
    for metric in &request.metrics {
        write!(
            key,
            "&{}&start={}&stop={}\n",
            metric.name, metric.start_time, metric.stop_time
        )
        .expect("writing to a String cannot fail");
    }
    key
}

fn find_request_key(prefix: &str, request: &MultiGlobRequest) -> String {
    format!("prefix={prefix}&{}", request.metrics.join("&"))
}

fn info_request_key(prefix: &str, request: &MultiMetricsInfoRequest) -> String {
    format!("prefix={prefix}&{}", request.names.join("&"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct NamedBackend(String);

    #[async_trait]
    impl Backend for NamedBackend {
        fn name(&self) -> &str {
            &self.0
        }

        async fn find(
            &self,
            _: &RequestContext,
            _: MultiGlobRequest,
        ) -> Result<ServerFindResponse, Errors> {
            unreachable!("routing tests never dispatch")
        }

        async fn fetch(
            &self,
            _: &RequestContext,
            _: MultiFetchRequest,
        ) -> Result<ServerFetchResponse, Errors> {
            unreachable!("routing tests never dispatch")
        }

        async fn info(
            &self,
            _: &RequestContext,
            _: MultiMetricsInfoRequest,
        ) -> Result<ServerInfoResponse, Errors> {
            unreachable!("routing tests never dispatch")
        }

        async fn probe_tlds(&self, _: &RequestContext) -> Result<Vec<String>, Errors> {
            unreachable!("routing tests never dispatch")
        }
    }

    fn group_of(names: &[&str]) -> BroadcastGroup {
        let clients: Vec<Arc<dyn Backend>> = names
            .iter()
            .map(|name| Arc::new(NamedBackend((*name).to_owned())) as Arc<dyn Backend>)
            .collect();
        BroadcastGroup::new(
            "test-group",
            clients,
            Duration::from_secs(60),
            0,
            Timeouts::default(),
        )
        .unwrap()
    }

    #[test]
    fn empty_group_is_a_fatal_error() {
        let result = BroadcastGroup::new(
            "empty",
            Vec::new(),
            Duration::from_secs(60),
            0,
            Timeouts::default(),
        );
        let errors = result.unwrap_err();
        assert!(errors.have_fatal());
    }

    #[tokio::test]
    async fn choose_servers_falls_back_to_all() {
        let group = group_of(&["b1", "b2", "b3"]);
        let chosen = group.choose_servers(&["a.x".to_owned()]);
        assert_eq!(chosen.len(), 3);
    }

    #[tokio::test]
    async fn choose_servers_unions_hints_without_duplicates() {
        let group = group_of(&["b1", "b2", "b3"]);
        group
            .path_cache
            .set("a", vec![Arc::clone(&group.clients[0])]);
        group.path_cache.set(
            "b",
            vec![Arc::clone(&group.clients[0]), Arc::clone(&group.clients[1])],
        );

        let chosen = group.choose_servers(&["a.x".to_owned(), "b.y".to_owned()]);
        let names: Vec<&str> = chosen.iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["b1", "b2"]);
    }

    #[tokio::test]
    async fn choose_servers_treats_dotless_names_as_their_own_prefix() {
        let group = group_of(&["b1", "b2"]);
        group
            .path_cache
            .set("carbon", vec![Arc::clone(&group.clients[1])]);

        let chosen = group.choose_servers(&["carbon".to_owned()]);
        let names: Vec<&str> = chosen.iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["b2"]);
    }

    #[test]
    fn fetch_keys_are_deterministic() {
        let request = MultiFetchRequest {
            metrics: vec![
                FetchRequest {
                    name: "a.x".to_owned(),
                    start_time: 100,
                    stop_time: 200,
                    ..Default::default()
                },
                FetchRequest {
                    name: "a.y".to_owned(),
                    start_time: 100,
                    stop_time: 200,
                    ..Default::default()
                },
            ],
        };

        assert_eq!(
            fetch_request_key("g", &request),
            "prefix=g&a.x&start=100&stop=200\n&a.y&start=100&stop=200\n"
        );
    }

    #[test]
    fn find_and_info_keys_join_names() {
        let find = MultiGlobRequest {
            metrics: vec!["a.*".to_owned(), "b.*".to_owned()],
        };
        assert_eq!(find_request_key("g", &find), "prefix=g&a.*&b.*");

        let info = MultiMetricsInfoRequest {
            names: vec!["a.x".to_owned()],
        };
        assert_eq!(info_request_key("g", &info), "prefix=g&a.x");
    }
}
