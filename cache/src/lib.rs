//! Caching for the fan-out path: TTL'd maps for routing hints and learned
//! paths, and the single-flight [`QueryCache`] that collapses concurrent
//! identical requests onto one leader.

#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

mod expire;
mod path;
mod query;

pub use expire::{ExpiringMap, ExpiringSet};
pub use path::PathCache;
pub use query::{AbortGuard, Lookup, QueryCache, QueryItem};
