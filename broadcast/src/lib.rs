//! The fan-out dispatcher.
//!
//! A [`BroadcastGroup`] fronts a fleet of backends: it picks the backends
//! likely to hold the requested metrics, scatters the request to them under
//! a per-surface deadline, gathers and merges whatever comes back, and
//! deduplicates identical in-flight requests through a single-flight cache.
//! Partial answers win over no answer: deadline expiry returns what merged
//! so far together with a diagnostic naming the silent backends.
//!
//! A group implements the same capability trait as a single backend, so
//! groups nest.

#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

mod group;
pub mod metric_names;
mod prober;

pub use group::BroadcastGroup;
pub use prober::{Prober, DEFAULT_PROBE_INTERVAL};
