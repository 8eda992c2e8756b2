//! Shared types at the seam between the fan-out dispatcher and its
//! backends: the capability trait every backend implements, the response
//! envelopes with their associative merge rules, the per-request counters
//! and the merged error bag.

#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

mod backend;
mod error;
mod response;
mod stats;

pub use backend::{Backend, Timeouts};
pub use error::{Error, Errors, HttpClass};
pub use response::{ServerFetchResponse, ServerFindResponse, ServerInfoResponse};
pub use stats::Stats;
