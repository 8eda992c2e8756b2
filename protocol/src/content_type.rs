//! Content types a backend may answer with.

/// The body encodings advertised by Graphite-compatible stores.
///
/// Only [`ContentType::Protobuf`] is implemented by the decoders; the other
/// known types are reserved and surface as decode errors until someone needs
/// them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Protobuf,
    Json,
    Pickle,
    Msgpack,
    CarbonV3,
    Unknown,
}

impl ContentType {
    /// Parse a `Content-Type` header value.
    ///
    /// Matching is exact, as the stores send bare media types without
    /// parameters.
    pub fn parse(header: &str) -> Self {
        match header {
            "application/x-protobuf" => Self::Protobuf,
            "application/json" => Self::Json,
            "application/pickle" => Self::Pickle,
            "application/x-msgpack" => Self::Msgpack,
            "application/x-carbonapi-v3-pb" => Self::CarbonV3,
            _ => Self::Unknown,
        }
    }

    /// The media type to use when issuing requests.
    pub fn protobuf_media_type() -> &'static str {
        "application/x-protobuf"
    }
}
