//! HTTP client for one remote time-series store.
//!
//! A [`HttpBackend`] owns everything needed to talk to a single store:
//! request encoding, the call discipline (timeout wrap, limiter slot, trace
//! phases, full body consumption), content-negotiated decoding, and the
//! learned-paths cache that feeds routing hints back to the dispatcher.

#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

mod client;
mod connection;

pub use client::{HttpBackend, HttpBackendConfig};
pub use connection::build_http_client;
