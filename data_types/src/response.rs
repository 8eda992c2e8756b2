use std::sync::Arc;

use protocol::{
    FetchResponse, GlobMatches, MultiFetchResponse, MultiGlobResponse, ZipperInfoResponse,
};

use crate::{Errors, Stats};

/// Envelope for one backend's answer to a render call, and the aggregate a
/// gather loop folds every answer into.
///
/// Merge is associative and, on semantically equivalent inputs, order
/// independent: a defined point always beats an absent one, and when two
/// backends disagree on a defined point the later arrival wins (gather order
/// is non-deterministic, so callers must not depend on tie winners).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerFetchResponse {
    pub server: Arc<str>,
    pub response: MultiFetchResponse,
    pub stats: Stats,
    pub errors: Errors,
}

impl ServerFetchResponse {
    pub fn new(server: Arc<str>) -> Self {
        Self {
            server,
            ..Default::default()
        }
    }

    pub fn merge(&mut self, other: Self) {
        self.stats.merge(&other.stats);
        self.errors.merge(other.errors);

        for metric in other.response.metrics {
            merge_fetch_metric(&mut self.response.metrics, metric);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.response.metrics.is_empty()
    }
}

fn merge_fetch_metric(metrics: &mut Vec<FetchResponse>, incoming: FetchResponse) {
    match metrics.iter_mut().find(|m| m.name == incoming.name) {
        None => metrics.push(incoming),
        Some(current) => merge_fetch_values(current, incoming),
    }
}

/// Fold `incoming`'s points into `current`, aligning on start time and step.
///
/// Series with a different step cannot be aligned and are dropped; indices
/// outside the current window are dropped too. Both only arise when
/// backends answer inconsistently for one request.
fn merge_fetch_values(current: &mut FetchResponse, incoming: FetchResponse) {
    if current.step_time != incoming.step_time || current.step_time == 0 {
        return;
    }

    let window = current.values.len().min(current.is_absent.len());
    let offset = (incoming.start_time - current.start_time) / current.step_time;
    for (i, (value, absent)) in incoming
        .values
        .iter()
        .zip(incoming.is_absent.iter())
        .enumerate()
    {
        if *absent {
            continue;
        }
        let Ok(index) = usize::try_from(i as i64 + offset) else {
            continue;
        };
        if index >= window {
            continue;
        }
        current.values[index] = *value;
        current.is_absent[index] = false;
    }
}

/// Envelope for one backend's answer to a find call.
///
/// Merge unions matches on path; a path is a leaf if any backend reports it
/// as one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerFindResponse {
    pub server: Arc<str>,
    pub response: MultiGlobResponse,
    pub stats: Stats,
    pub errors: Errors,
}

impl ServerFindResponse {
    pub fn new(server: Arc<str>) -> Self {
        Self {
            server,
            ..Default::default()
        }
    }

    pub fn merge(&mut self, other: Self) {
        self.stats.merge(&other.stats);
        self.errors.merge(other.errors);

        for glob in other.response.metrics {
            merge_glob(&mut self.response.metrics, glob);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.response
            .metrics
            .iter()
            .all(|glob| glob.matches.is_empty())
    }
}

fn merge_glob(metrics: &mut Vec<GlobMatches>, incoming: GlobMatches) {
    let Some(current) = metrics.iter_mut().find(|g| g.name == incoming.name) else {
        metrics.push(incoming);
        return;
    };

    for matched in incoming.matches {
        match current.matches.iter_mut().find(|m| m.path == matched.path) {
            None => current.matches.push(matched),
            Some(existing) => existing.is_leaf |= matched.is_leaf,
        }
    }
}

/// Envelope for one backend's answer to an info call.
///
/// The response map is keyed by backend address, so keys are disjoint by
/// construction and merge is a plain map union.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerInfoResponse {
    pub server: Arc<str>,
    pub response: ZipperInfoResponse,
    pub stats: Stats,
    pub errors: Errors,
}

impl ServerInfoResponse {
    pub fn new(server: Arc<str>) -> Self {
        Self {
            server,
            ..Default::default()
        }
    }

    pub fn merge(&mut self, other: Self) {
        self.stats.merge(&other.stats);
        self.errors.merge(other.errors);
        self.response.info.extend(other.response.info);
    }

    pub fn is_empty(&self) -> bool {
        self.response.info.is_empty()
    }
}
