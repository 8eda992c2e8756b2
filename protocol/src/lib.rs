//! Protobuf messages and content-type negotiation for the carbon wire
//! protocol.
//!
//! Backends answer `/metrics/find`, `/render` and `/info` with
//! length-implicit protobuf bodies. The message definitions here are
//! hand-derived with [`prost`] rather than generated from `.proto` files so
//! the crate builds without a protoc toolchain.

#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use std::collections::HashMap;

use prost::Message;

mod content_type;

pub use content_type::ContentType;

/// A single entry in the metric namespace returned by a find call.
///
/// A leaf is a stored series; a non-leaf is a directory node.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GlobMatch {
    #[prost(string, tag = "1")]
    pub path: ::prost::alloc::string::String,
    #[prost(bool, tag = "2")]
    pub is_leaf: bool,
}

/// All matches for one queried glob.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GlobMatches {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(message, repeated, tag = "2")]
    pub matches: ::prost::alloc::vec::Vec<GlobMatch>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MultiGlobRequest {
    #[prost(string, repeated, tag = "1")]
    pub metrics: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MultiGlobResponse {
    #[prost(message, repeated, tag = "1")]
    pub metrics: ::prost::alloc::vec::Vec<GlobMatches>,
}

/// One requested series (or pattern) within a render call.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FetchRequest {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(int64, tag = "2")]
    pub start_time: i64,
    #[prost(int64, tag = "3")]
    pub stop_time: i64,
    #[prost(string, tag = "4")]
    pub path_expression: ::prost::alloc::string::String,
    #[prost(string, repeated, tag = "5")]
    pub filter_functions: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MultiFetchRequest {
    #[prost(message, repeated, tag = "1")]
    pub metrics: ::prost::alloc::vec::Vec<FetchRequest>,
}

/// Raw samples for one series.
///
/// `values` and `is_absent` are parallel: position `i` carries a defined
/// sample iff `!is_absent[i]`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FetchResponse {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(int64, tag = "2")]
    pub start_time: i64,
    #[prost(int64, tag = "3")]
    pub stop_time: i64,
    #[prost(int64, tag = "4")]
    pub step_time: i64,
    #[prost(double, repeated, tag = "5")]
    pub values: ::prost::alloc::vec::Vec<f64>,
    #[prost(bool, repeated, tag = "6")]
    pub is_absent: ::prost::alloc::vec::Vec<bool>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MultiFetchResponse {
    #[prost(message, repeated, tag = "1")]
    pub metrics: ::prost::alloc::vec::Vec<FetchResponse>,
}

/// One whisper-style retention level.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct Retention {
    #[prost(int32, tag = "1")]
    pub seconds_per_point: i32,
    #[prost(int32, tag = "2")]
    pub number_of_points: i32,
}

/// Storage metadata for one metric on one backend.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InfoResponse {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub aggregation_method: ::prost::alloc::string::String,
    #[prost(int32, tag = "3")]
    pub max_retention: i32,
    #[prost(float, tag = "4")]
    pub x_files_factor: f32,
    #[prost(message, repeated, tag = "5")]
    pub retentions: ::prost::alloc::vec::Vec<Retention>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MultiMetricsInfoRequest {
    #[prost(string, repeated, tag = "1")]
    pub names: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}

/// Info responses across backends, keyed by backend address.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ZipperInfoResponse {
    #[prost(map = "string, message", tag = "1")]
    pub info: HashMap<::prost::alloc::string::String, InfoResponse>,
}

/// The two body shapes an `/info` endpoint may answer with.
#[derive(Debug, Clone, PartialEq)]
pub enum InfoBody {
    /// A bare [`InfoResponse`]; the caller keys it under the backend address.
    Single(InfoResponse),
    /// Already keyed by backend address.
    Multi(ZipperInfoResponse),
}

/// Decode an `/info` body, discriminating between the single-info and
/// multi-info shapes.
///
/// Both shapes start with a length-delimited field 1, so the discrimination
/// is a preliminary decode: a non-empty keyed map wins, then a single info
/// with a non-empty name, then an empty multi response.
pub fn decode_info_body(body: &[u8]) -> Result<InfoBody, prost::DecodeError> {
    if let Ok(multi) = ZipperInfoResponse::decode(body) {
        if !multi.info.is_empty() {
            return Ok(InfoBody::Multi(multi));
        }
    }

    let single = InfoResponse::decode(body)?;
    if single.name.is_empty() {
        Ok(InfoBody::Multi(ZipperInfoResponse::default()))
    } else {
        Ok(InfoBody::Single(single))
    }
}
