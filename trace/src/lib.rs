//! Request-scoped observability and cancellation plumbing.
//!
//! Every client request owns one [`Trace`] that accumulates how long each
//! phase of the request spent (limiter wait, marshalling, the HTTP round
//! trip, body read, unmarshalling) and one [`RequestContext`] that carries
//! the request id, the cancellation signal and the effective deadline down
//! through the fan-out.

#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

mod ctx;
mod phases;

pub use ctx::{RequestContext, REQUEST_ID_HEADER};
pub use phases::{Trace, TraceReport};
