use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use broadcast::{BroadcastGroup, Prober};
use data_types::{
    Backend, Error, Errors, ServerFetchResponse, ServerFindResponse, ServerInfoResponse, Stats,
    Timeouts,
};
use protocol::{
    FetchRequest, FetchResponse, GlobMatch, GlobMatches, InfoResponse, MultiFetchRequest,
    MultiFetchResponse, MultiGlobRequest, MultiGlobResponse, MultiMetricsInfoRequest,
    ZipperInfoResponse,
};
use trace::RequestContext;

#[derive(Debug, Clone)]
enum FetchBehavior {
    /// Answer every requested name with one defined sample.
    Echo,
    /// Answer with a canned response, whatever was asked.
    Fixed(MultiFetchResponse),
    Fail(Error),
}

#[derive(Debug)]
struct MockBackend {
    name: Arc<str>,
    delay: Option<Duration>,
    fetch_behavior: FetchBehavior,
    find_matches: Vec<(String, bool)>,
    tlds: Vec<String>,
    info: Option<InfoResponse>,
    max_metrics: usize,

    fetch_calls: AtomicUsize,
    find_calls: AtomicUsize,
    probe_calls: AtomicUsize,
    fetch_requests: Mutex<Vec<Vec<String>>>,
}

impl MockBackend {
    fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            delay: None,
            fetch_behavior: FetchBehavior::Echo,
            find_matches: Vec::new(),
            tlds: Vec::new(),
            info: None,
            max_metrics: 0,
            fetch_calls: AtomicUsize::new(0),
            find_calls: AtomicUsize::new(0),
            probe_calls: AtomicUsize::new(0),
            fetch_requests: Mutex::new(Vec::new()),
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn with_fetch(mut self, behavior: FetchBehavior) -> Self {
        self.fetch_behavior = behavior;
        self
    }

    fn with_find_matches(mut self, matches: &[(&str, bool)]) -> Self {
        self.find_matches = matches
            .iter()
            .map(|(path, leaf)| ((*path).to_owned(), *leaf))
            .collect();
        self
    }

    fn with_tlds(mut self, tlds: &[&str]) -> Self {
        self.tlds = tlds.iter().map(|t| (*t).to_owned()).collect();
        self
    }

    fn with_info(mut self, info: InfoResponse) -> Self {
        self.info = Some(info);
        self
    }

    fn with_max_metrics(mut self, max: usize) -> Self {
        self.max_metrics = max;
        self
    }

    fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    fn probe_calls(&self) -> usize {
        self.probe_calls.load(Ordering::SeqCst)
    }

    fn fetch_request_sizes(&self) -> Vec<usize> {
        self.fetch_requests
            .lock()
            .unwrap()
            .iter()
            .map(|names| names.len())
            .collect()
    }

    async fn maybe_delay(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn base_stats(&self) -> Stats {
        Stats {
            servers: vec![Arc::clone(&self.name)],
            ..Default::default()
        }
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn max_metrics_per_request(&self) -> usize {
        self.max_metrics
    }

    async fn find(
        &self,
        _ctx: &RequestContext,
        request: MultiGlobRequest,
    ) -> Result<ServerFindResponse, Errors> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        self.maybe_delay().await;

        if self.find_matches.is_empty() {
            return Err(Error::NotFound.into());
        }

        let metrics = request
            .metrics
            .iter()
            .map(|pattern| GlobMatches {
                name: pattern.clone(),
                matches: self
                    .find_matches
                    .iter()
                    .map(|(path, is_leaf)| GlobMatch {
                        path: path.clone(),
                        is_leaf: *is_leaf,
                    })
                    .collect(),
            })
            .collect();

        let mut stats = self.base_stats();
        stats.find_requests = 1;

        Ok(ServerFindResponse {
            server: Arc::clone(&self.name),
            response: MultiGlobResponse { metrics },
            stats,
            errors: Errors::new(),
        })
    }

    async fn fetch(
        &self,
        _ctx: &RequestContext,
        request: MultiFetchRequest,
    ) -> Result<ServerFetchResponse, Errors> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.fetch_requests
            .lock()
            .unwrap()
            .push(request.metrics.iter().map(|m| m.name.clone()).collect());
        self.maybe_delay().await;

        let response = match &self.fetch_behavior {
            FetchBehavior::Fail(error) => return Err(error.clone().into()),
            FetchBehavior::Fixed(response) => response.clone(),
            FetchBehavior::Echo => MultiFetchResponse {
                metrics: request
                    .metrics
                    .iter()
                    .map(|m| FetchResponse {
                        name: m.name.clone(),
                        start_time: m.start_time,
                        stop_time: m.stop_time,
                        step_time: 60,
                        values: vec![1.0],
                        is_absent: vec![false],
                    })
                    .collect(),
            },
        };

        let mut stats = self.base_stats();
        stats.render_requests = 1;

        Ok(ServerFetchResponse {
            server: Arc::clone(&self.name),
            response,
            stats,
            errors: Errors::new(),
        })
    }

    async fn info(
        &self,
        _ctx: &RequestContext,
        _request: MultiMetricsInfoRequest,
    ) -> Result<ServerInfoResponse, Errors> {
        self.maybe_delay().await;

        let Some(info) = &self.info else {
            return Err(Error::NotFound.into());
        };

        let mut response = ZipperInfoResponse::default();
        response.info.insert(self.name.to_string(), info.clone());

        let mut stats = self.base_stats();
        stats.info_requests = 1;

        Ok(ServerInfoResponse {
            server: Arc::clone(&self.name),
            response,
            stats,
            errors: Errors::new(),
        })
    }

    async fn probe_tlds(&self, _ctx: &RequestContext) -> Result<Vec<String>, Errors> {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        self.maybe_delay().await;

        if self.tlds.is_empty() {
            return Err(Error::NotFound.into());
        }
        Ok(self.tlds.clone())
    }
}

fn group(clients: &[Arc<MockBackend>], timeouts: Timeouts) -> BroadcastGroup {
    let clients: Vec<Arc<dyn Backend>> = clients
        .iter()
        .map(|c| Arc::clone(c) as Arc<dyn Backend>)
        .collect();
    BroadcastGroup::new("zipper", clients, Duration::from_secs(600), 0, timeouts).unwrap()
}

fn fetch_request(names: &[&str]) -> MultiFetchRequest {
    MultiFetchRequest {
        metrics: names
            .iter()
            .map(|name| FetchRequest {
                name: (*name).to_owned(),
                start_time: 1510913280,
                stop_time: 1510913880,
                path_expression: (*name).to_owned(),
                filter_functions: vec![],
            })
            .collect(),
    }
}

#[tokio::test]
async fn single_backend_fetch_preserves_samples() {
    let series = MultiFetchResponse {
        metrics: vec![FetchResponse {
            name: "foo.bar".to_owned(),
            start_time: 1510913280,
            stop_time: 1510913880,
            step_time: 60,
            values: vec![0.0, 1510913759.0, 1510913818.0],
            is_absent: vec![true, false, false],
        }],
    };
    let b1 = Arc::new(MockBackend::new("b1").with_fetch(FetchBehavior::Fixed(series.clone())));
    let group = group(&[Arc::clone(&b1)], Timeouts::default());

    let response = group
        .fetch(&RequestContext::new(), fetch_request(&["foo.bar"]))
        .await
        .unwrap();

    assert_eq!(response.response, series);
    assert!(response.errors.is_empty());
    assert_eq!(response.stats.render_requests, 1);
    // position 0 is absent: the handler renders it as null
    assert!(response.response.metrics[0].is_absent[0]);
}

#[tokio::test]
async fn find_unions_matches_and_leaf_flags() {
    let b1 =
        Arc::new(MockBackend::new("b1").with_find_matches(&[("foo.b", false), ("foo.bat", true)]));
    let b2 =
        Arc::new(MockBackend::new("b2").with_find_matches(&[("foo.b", true), ("foo.bar", true)]));
    let group = group(&[b1, b2], Timeouts::default());

    let response = group
        .find(
            &RequestContext::new(),
            MultiGlobRequest {
                metrics: vec!["foo.b*".to_owned()],
            },
        )
        .await
        .unwrap();

    let matches = &response.response.metrics[0].matches;
    assert_eq!(matches.len(), 3);
    // any backend reporting leaf wins
    assert!(matches.iter().any(|m| m.path == "foo.b" && m.is_leaf));
}

#[tokio::test(start_paused = true)]
async fn partial_failure_returns_data_and_error_bag() {
    let timeouts = Timeouts {
        find: Duration::from_secs(2),
        render: Duration::from_millis(200),
    };
    let b1 = Arc::new(MockBackend::new("b1"));
    let b2 = Arc::new(MockBackend::new("b2").with_delay(Duration::from_secs(10)));
    let b3 = Arc::new(MockBackend::new("b3").with_fetch(FetchBehavior::Fail(Error::Http {
        code: 500,
    })));
    let group = group(&[b1, Arc::clone(&b2), b3], timeouts);

    let response = group
        .fetch(&RequestContext::new(), fetch_request(&["a.x"]))
        .await
        .unwrap();

    // the fast backend's data made it
    assert_eq!(response.response.metrics[0].name, "a.x");
    assert_eq!(response.stats.timeouts, 1);

    // the bag records who failed and how
    let errors = response.errors.errors();
    assert!(errors.contains(&Error::Http { code: 500 }));
    assert!(errors.iter().any(|e| matches!(
        e,
        Error::Timeout { servers } if servers.len() == 1 && servers[0].as_ref() == "b2"
    )));
    assert!(!response.errors.have_fatal());
}

#[tokio::test(start_paused = true)]
async fn identical_concurrent_fetches_coalesce() {
    let b1 = Arc::new(MockBackend::new("b1").with_delay(Duration::from_millis(100)));
    let group = group(&[Arc::clone(&b1)], Timeouts::default());
    let ctx = RequestContext::new();

    let (first, second) = tokio::join!(
        group.fetch(&ctx, fetch_request(&["a.x"])),
        group.fetch(&ctx, fetch_request(&["a.x"])),
    );

    let first = first.unwrap();
    let second = second.unwrap();

    assert_eq!(b1.fetch_calls(), 1);
    assert_eq!(first.response, second.response);
}

#[tokio::test(start_paused = true)]
async fn different_requests_do_not_coalesce() {
    let b1 = Arc::new(MockBackend::new("b1"));
    let group = group(&[Arc::clone(&b1)], Timeouts::default());
    let ctx = RequestContext::new();

    let (first, second) = tokio::join!(
        group.fetch(&ctx, fetch_request(&["a.x"])),
        group.fetch(&ctx, fetch_request(&["a.y"])),
    );

    first.unwrap();
    second.unwrap();
    assert_eq!(b1.fetch_calls(), 2);
}

#[tokio::test]
async fn discovered_tlds_route_fetches_and_unknown_tlds_fan_out() {
    let b1 = Arc::new(MockBackend::new("b1").with_tlds(&["a"]));
    let b2 = Arc::new(MockBackend::new("b2").with_tlds(&["b"]));
    let group = group(&[Arc::clone(&b1), Arc::clone(&b2)], Timeouts::default());

    let tlds = group.probe_tlds(&RequestContext::new()).await.unwrap();
    assert_eq!(tlds, vec!["a".to_owned(), "b".to_owned()]);

    // known TLD: only the owning backend is asked
    group
        .fetch(&RequestContext::new(), fetch_request(&["a.x"]))
        .await
        .unwrap();
    assert_eq!(b1.fetch_calls(), 1);
    assert_eq!(b2.fetch_calls(), 0);

    // unknown TLD: everyone is asked
    group
        .fetch(&RequestContext::new(), fetch_request(&["c.y"]))
        .await
        .unwrap();
    assert_eq!(b1.fetch_calls(), 2);
    assert_eq!(b2.fetch_calls(), 1);
}

#[tokio::test]
async fn routing_hints_never_change_the_merged_result() {
    // b1 holds the data, b2 does not
    let backends = || {
        (
            Arc::new(MockBackend::new("b1")),
            Arc::new(MockBackend::new("b2").with_fetch(FetchBehavior::Fail(Error::NotFound))),
        )
    };
    let request = || fetch_request(&["a.x"]);

    // no routing hints: full fan-out
    let (b1, b2) = backends();
    let cold = group(&[b1, b2], Timeouts::default());
    let cold_response = cold.fetch(&RequestContext::new(), request()).await.unwrap();

    // exact hint: only the owning backend is asked
    let (b1, b2) = backends();
    let exact = group(&[Arc::clone(&b1), b2], Timeouts::default());
    exact.path_cache().set("a", vec![b1 as Arc<dyn Backend>]);
    let exact_response = exact.fetch(&RequestContext::new(), request()).await.unwrap();

    // stale hint: still lists a backend without the data
    let (b1, b2) = backends();
    let stale = group(&[Arc::clone(&b1), Arc::clone(&b2)], Timeouts::default());
    stale.path_cache().set(
        "a",
        vec![b1 as Arc<dyn Backend>, b2 as Arc<dyn Backend>],
    );
    let stale_response = stale.fetch(&RequestContext::new(), request()).await.unwrap();

    assert_eq!(cold_response.response, exact_response.response);
    assert_eq!(cold_response.response, stale_response.response);
}

#[tokio::test]
async fn probe_results_are_cached() {
    let b1 = Arc::new(MockBackend::new("b1").with_tlds(&["a"]));
    let group = group(&[Arc::clone(&b1)], Timeouts::default());

    group.probe_tlds(&RequestContext::new()).await.unwrap();
    group.probe_tlds(&RequestContext::new()).await.unwrap();

    assert_eq!(b1.probe_calls(), 1);
}

#[tokio::test]
async fn probe_tolerates_individual_backend_failures() {
    let b1 = Arc::new(MockBackend::new("b1").with_tlds(&["a"]));
    let b2 = Arc::new(MockBackend::new("b2")); // no TLDs: probe fails
    let group = group(&[b1, b2], Timeouts::default());

    let tlds = group.probe_tlds(&RequestContext::new()).await.unwrap();
    assert_eq!(tlds, vec!["a".to_owned()]);
}

#[tokio::test]
async fn capped_backend_gets_split_requests() {
    let b1 = Arc::new(
        MockBackend::new("b1").with_max_metrics(2).with_find_matches(&[
            ("a.b1", true),
            ("a.b2", true),
            ("a.dir", false),
            ("a.b3", true),
            ("a.b4", true),
            ("a.b5", true),
        ]),
    );
    let group = group(&[Arc::clone(&b1)], Timeouts::default());

    let response = group
        .fetch(&RequestContext::new(), fetch_request(&["a.*"]))
        .await
        .unwrap();

    // five leaves, cap of two: three requests carrying 2, 2 and 1 metrics
    assert_eq!(b1.fetch_request_sizes(), vec![2, 2, 1]);
    assert_eq!(response.response.metrics.len(), 5);
    assert!(response
        .response
        .metrics
        .iter()
        .all(|m| m.name.starts_with("a.b")));
}

#[tokio::test]
async fn empty_fan_out_fails_with_the_full_bag() {
    let b1 = Arc::new(MockBackend::new("b1").with_fetch(FetchBehavior::Fail(Error::NotFound)));
    let b2 = Arc::new(MockBackend::new("b2").with_fetch(FetchBehavior::Fail(Error::Http {
        code: 503,
    })));
    let group = group(&[b1, b2], Timeouts::default());

    let errors = group
        .fetch(&RequestContext::new(), fetch_request(&["a.x"]))
        .await
        .unwrap_err();

    assert!(errors.errors().contains(&Error::NotFound));
    assert!(errors.errors().contains(&Error::Http { code: 503 }));
    assert!(errors
        .errors()
        .iter()
        .any(|e| matches!(e, Error::Request { message } if message.contains("zipper"))));
}

#[tokio::test]
async fn info_is_keyed_by_backend_and_unioned() {
    let info = |aggregation: &str| InfoResponse {
        name: "a.x".to_owned(),
        aggregation_method: aggregation.to_owned(),
        ..Default::default()
    };
    let b1 = Arc::new(MockBackend::new("b1:8080").with_info(info("average")));
    let b2 = Arc::new(MockBackend::new("b2:8080").with_info(info("max")));
    let group = group(&[b1, b2], Timeouts::default());

    let response = group
        .info(
            &RequestContext::new(),
            MultiMetricsInfoRequest {
                names: vec!["a.x".to_owned()],
            },
        )
        .await
        .unwrap();

    assert_eq!(response.response.info.len(), 2);
    assert_eq!(response.response.info["b1:8080"].aggregation_method, "average");
    assert_eq!(response.response.info["b2:8080"].aggregation_method, "max");
}

#[tokio::test]
async fn groups_nest() {
    let b1 = Arc::new(MockBackend::new("b1"));
    let inner = Arc::new(group(&[Arc::clone(&b1)], Timeouts::default()));
    let outer = BroadcastGroup::new(
        "outer",
        vec![inner as Arc<dyn Backend>],
        Duration::from_secs(600),
        0,
        Timeouts::default(),
    )
    .unwrap();

    let response = outer
        .fetch(&RequestContext::new(), fetch_request(&["a.x"]))
        .await
        .unwrap();

    assert_eq!(response.response.metrics[0].name, "a.x");
    assert_eq!(b1.fetch_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn prober_refreshes_routing_on_a_schedule() {
    let b1 = Arc::new(MockBackend::new("b1").with_tlds(&["a"]));
    let group = Arc::new(group(&[Arc::clone(&b1)], Timeouts::default()));

    let prober = Prober::start(Arc::clone(&group), Duration::from_secs(300));

    for _ in 0..100 {
        if b1.probe_calls() == 1 {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(b1.probe_calls(), 1);
    assert!(group.path_cache().get("a").is_some());

    tokio::time::advance(Duration::from_secs(300)).await;
    for _ in 0..100 {
        if b1.probe_calls() == 2 {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(b1.probe_calls(), 2);

    prober.join().await;
}
