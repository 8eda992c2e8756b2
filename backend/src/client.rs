use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use cache::ExpiringSet;
use data_types::{
    Backend, Error, Errors, ServerFetchResponse, ServerFindResponse, ServerInfoResponse, Stats,
};
use limiter::Limiter;
use prost::Message;
use protocol::{
    decode_info_body, ContentType, InfoBody, MultiFetchRequest, MultiFetchResponse,
    MultiGlobRequest, MultiGlobResponse, MultiMetricsInfoRequest, ZipperInfoResponse,
};
use trace::{RequestContext, REQUEST_ID_HEADER};
use tracing::debug;
use url::Url;

/// Deadline for one TLD probe, independent of how patient the prober is.
const PROBE_DEADLINE: Duration = Duration::from_secs(5);

const DEFAULT_PATH_CACHE_EXPIRY: Duration = Duration::from_secs(600);

/// Configuration for a single [`HttpBackend`].
///
/// Only the address and the shared HTTP client are required.
#[derive(Debug, Clone)]
pub struct HttpBackendConfig {
    /// `address[:port]` or a full URL. A missing scheme defaults to http.
    pub address: String,
    /// The client shared across all backends of a process; pool discipline
    /// is the client's.
    pub client: reqwest::Client,
    /// Per-call budget overriding wider caller deadlines. `None` leaves the
    /// caller's deadline in charge.
    pub timeout: Option<Duration>,
    /// Concurrent in-flight requests toward this store; 0 is unlimited.
    pub concurrency_limit: usize,
    /// TTL for learned leaf paths.
    pub path_cache_expiry: Duration,
    /// Largest number of metrics this store accepts in one request; 0 is
    /// unlimited.
    pub max_metrics_per_request: usize,
}

impl HttpBackendConfig {
    pub fn new(address: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            address: address.into(),
            client,
            timeout: None,
            concurrency_limit: 0,
            path_cache_expiry: DEFAULT_PATH_CACHE_EXPIRY,
            max_metrics_per_request: 0,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }

    pub fn with_path_cache_expiry(mut self, expiry: Duration) -> Self {
        self.path_cache_expiry = expiry;
        self
    }

    pub fn with_max_metrics_per_request(mut self, max: usize) -> Self {
        self.max_metrics_per_request = max;
        self
    }
}

/// One remote store reachable over HTTP.
#[derive(Debug)]
pub struct HttpBackend {
    address: Arc<str>,
    base: Url,
    client: reqwest::Client,
    timeout: Option<Duration>,
    limiter: Limiter,
    paths: ExpiringSet<String>,
    max_metrics_per_request: usize,
}

impl HttpBackend {
    pub fn new(config: HttpBackendConfig) -> Result<Self, Errors> {
        let raw = if config.address.contains("://") {
            config.address.clone()
        } else {
            format!("http://{}", config.address)
        };

        let base = Url::parse(&raw)
            .map_err(|e| Errors::fatal(format!("invalid backend address '{}': {e}", raw)))?;
        let host = base
            .host_str()
            .ok_or_else(|| Errors::fatal(format!("backend address '{}' has no host", raw)))?;
        let address: Arc<str> = match base.port() {
            Some(port) => Arc::from(format!("{host}:{port}")),
            None => Arc::from(host),
        };

        Ok(Self {
            address,
            base,
            client: config.client,
            timeout: config.timeout.filter(|t| !t.is_zero()),
            limiter: Limiter::new(config.concurrency_limit),
            paths: ExpiringSet::new(config.path_cache_expiry),
            max_metrics_per_request: config.max_metrics_per_request,
        })
    }

    fn endpoint(&self, path: &str, params: &[(&str, String)]) -> Url {
        let mut url = self.base.clone();
        url.set_path(path);
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
        }
        url
    }

    /// Issue one call under the backend's discipline: wrap the context with
    /// the backend timeout, take a limiter slot, record trace phases, and
    /// always consume the body before looking at the status code.
    async fn call(&self, ctx: &RequestContext, url: Url) -> Result<(String, Bytes), Error> {
        let ctx = match self.timeout {
            Some(timeout) => ctx.child_with_timeout(timeout),
            None => ctx.clone(),
        };

        let t0 = Instant::now();
        let _permit = self.limiter.enter(&ctx).await.map_err(|_| Error::Limiter)?;
        ctx.trace().add_limiter(t0);
        debug!(backend = %self.address, request_id = %ctx.id(), url = %url, "got slot, sending request");

        let t1 = Instant::now();
        let request = self
            .client
            .get(url)
            .header(REQUEST_ID_HEADER, ctx.id().to_string());
        ctx.trace().add_marshal(t1);

        let t2 = Instant::now();
        let response = tokio::select! {
            _ = ctx.done() => return Err(Error::timeout(vec![Arc::clone(&self.address)])),
            response = request.send() => {
                response.map_err(|e| Error::request(e.to_string()))?
            }
        };
        ctx.trace().add_http_call(t2);

        let status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_owned();

        let t3 = Instant::now();
        let body = tokio::select! {
            _ = ctx.done() => return Err(Error::timeout(vec![Arc::clone(&self.address)])),
            body = response.bytes() => {
                body.map_err(|e| Error::request(e.to_string()))?
            }
        };
        ctx.trace().add_read_body(t3);

        if !status.is_success() {
            return Err(Error::Http {
                code: status.as_u16(),
            });
        }

        Ok((content_type, body))
    }

    fn decode_body<M: Message + Default>(content_type: &str, body: &[u8]) -> Result<M, Error> {
        ensure_protobuf(content_type)?;
        M::decode(body).map_err(|e| Error::decode(format!("protobuf unmarshal failed: {e}")))
    }

    fn base_stats(&self) -> Stats {
        Stats {
            servers: vec![Arc::clone(&self.address)],
            ..Default::default()
        }
    }
}

fn ensure_protobuf(content_type: &str) -> Result<(), Error> {
    match ContentType::parse(content_type) {
        ContentType::Protobuf => Ok(()),
        ContentType::Json
        | ContentType::Pickle
        | ContentType::Msgpack
        | ContentType::CarbonV3 => Err(Error::decode(format!(
            "content type '{content_type}' not implemented"
        ))),
        ContentType::Unknown => Err(Error::decode(format!(
            "unknown content type '{content_type}'"
        ))),
    }
}

#[async_trait]
impl Backend for HttpBackend {
    fn name(&self) -> &str {
        &self.address
    }

    fn max_metrics_per_request(&self) -> usize {
        self.max_metrics_per_request
    }

    fn contains(&self, targets: &[String]) -> bool {
        targets.iter().any(|target| self.paths.contains(target))
    }

    async fn find(
        &self,
        ctx: &RequestContext,
        request: MultiGlobRequest,
    ) -> Result<ServerFindResponse, Errors> {
        let t0 = Instant::now();
        let mut params = vec![("format", "protobuf".to_owned())];
        for metric in &request.metrics {
            params.push(("query", metric.clone()));
        }
        let url = self.endpoint("/metrics/find", &params);
        ctx.trace().add_marshal(t0);

        let (content_type, body) = self.call(ctx, url).await?;

        let t1 = Instant::now();
        let response: MultiGlobResponse = Self::decode_body(&content_type, &body)?;
        ctx.trace().add_unmarshal(t1);

        if response.metrics.iter().all(|glob| glob.matches.is_empty()) {
            return Err(Error::NotFound.into());
        }

        for glob in &response.metrics {
            for matched in &glob.matches {
                if matched.is_leaf {
                    self.paths.insert(matched.path.clone());
                }
            }
        }

        let mut stats = self.base_stats();
        stats.find_requests = 1;

        Ok(ServerFindResponse {
            server: Arc::clone(&self.address),
            response,
            stats,
            errors: Errors::new(),
        })
    }

    async fn fetch(
        &self,
        ctx: &RequestContext,
        request: MultiFetchRequest,
    ) -> Result<ServerFetchResponse, Errors> {
        // every metric of one request shares the window by construction
        let Some(first) = request.metrics.first() else {
            return Err(Error::request("empty fetch request").into());
        };

        let t0 = Instant::now();
        let mut params = vec![
            ("format", "protobuf".to_owned()),
            ("from", first.start_time.to_string()),
            ("until", first.stop_time.to_string()),
        ];
        for metric in &request.metrics {
            params.push(("target", metric.name.clone()));
        }
        let url = self.endpoint("/render", &params);
        ctx.trace().add_marshal(t0);

        let (content_type, body) = self.call(ctx, url).await?;

        let t1 = Instant::now();
        let response: MultiFetchResponse = Self::decode_body(&content_type, &body)?;
        ctx.trace().add_unmarshal(t1);

        if response.metrics.is_empty() {
            return Err(Error::NotFound.into());
        }

        // names in a render answer carry samples, so they are leaves
        for metric in &response.metrics {
            self.paths.insert(metric.name.clone());
        }

        let mut stats = self.base_stats();
        stats.render_requests = 1;

        Ok(ServerFetchResponse {
            server: Arc::clone(&self.address),
            response,
            stats,
            errors: Errors::new(),
        })
    }

    async fn info(
        &self,
        ctx: &RequestContext,
        request: MultiMetricsInfoRequest,
    ) -> Result<ServerInfoResponse, Errors> {
        let t0 = Instant::now();
        let mut params = vec![("format", "protobuf".to_owned())];
        for name in &request.names {
            params.push(("target", name.clone()));
        }
        let url = self.endpoint("/info", &params);
        ctx.trace().add_marshal(t0);

        let (content_type, body) = self.call(ctx, url).await?;

        let t1 = Instant::now();
        ensure_protobuf(&content_type)?;
        let info = match decode_info_body(&body)
            .map_err(|e| Error::decode(format!("protobuf unmarshal failed: {e}")))?
        {
            InfoBody::Single(single) => {
                let mut response = ZipperInfoResponse::default();
                response.info.insert(self.address.to_string(), single);
                response
            }
            InfoBody::Multi(multi) => multi,
        };
        ctx.trace().add_unmarshal(t1);

        if info.info.is_empty() {
            return Err(Error::NotFound.into());
        }

        let mut stats = self.base_stats();
        stats.info_requests = 1;

        Ok(ServerInfoResponse {
            server: Arc::clone(&self.address),
            response: info,
            stats,
            errors: Errors::new(),
        })
    }

    async fn probe_tlds(&self, ctx: &RequestContext) -> Result<Vec<String>, Errors> {
        let probe_ctx = ctx.child_with_timeout(PROBE_DEADLINE);
        let response = self
            .find(
                &probe_ctx,
                MultiGlobRequest {
                    metrics: vec!["*".to_owned()],
                },
            )
            .await?;

        Ok(response
            .response
            .metrics
            .into_iter()
            .flat_map(|glob| glob.matches)
            .map(|matched| matched.path)
            .collect())
    }
}
