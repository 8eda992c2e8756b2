use std::fmt;
use std::sync::Arc;

use snafu::Snafu;

/// Class of a non-2xx backend status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpClass {
    Client,
    Server,
    Unknown,
}

impl HttpClass {
    pub fn of(code: u16) -> Self {
        match code / 100 {
            4 => Self::Client,
            5 => Self::Server,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for HttpClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client => write!(f, "client"),
            Self::Server => write!(f, "server"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A single failure observed while serving a request.
///
/// Everything except [`Error::Fatal`] is non-fatal: it degrades the answer
/// but never turns a partial result into a failure on its own.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
pub enum Error {
    #[snafu(display("metrics not found"))]
    NotFound,

    #[snafu(display("timeout while waiting for responses, no answer from {servers:?}"))]
    Timeout { servers: Vec<Arc<str>> },

    #[snafu(display("HTTP {} error {}", HttpClass::of(*code), code))]
    Http { code: u16 },

    #[snafu(display("decode failed: {message}"))]
    Decode { message: String },

    #[snafu(display("request failed: {message}"))]
    Request { message: String },

    #[snafu(display("deadline exceeded while waiting for a limiter slot"))]
    Limiter,

    #[snafu(display("{message}"))]
    Fatal { message: String },
}

impl Error {
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    pub fn request(message: impl Into<String>) -> Self {
        Self::Request {
            message: message.into(),
        }
    }

    pub fn timeout(servers: Vec<Arc<str>>) -> Self {
        Self::Timeout { servers }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }

    /// The status class for [`Error::Http`], `None` otherwise.
    pub fn http_class(&self) -> Option<HttpClass> {
        match self {
            Self::Http { code } => Some(HttpClass::of(*code)),
            _ => None,
        }
    }
}

/// Every failure collected across a fan-out.
///
/// The bag is carried next to whatever data merged: a request only fails
/// outright when nothing merged at all, or when some backend reported a
/// fatal error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Errors {
    errors: Vec<Error>,
    have_fatal: bool,
}

impl Errors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(Error::fatal(message));
        errors
    }

    pub fn add(&mut self, error: Error) {
        self.have_fatal |= error.is_fatal();
        self.errors.push(error);
    }

    pub fn merge(&mut self, other: Self) {
        self.have_fatal |= other.have_fatal;
        self.errors.extend(other.errors);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn have_fatal(&self) -> bool {
        self.have_fatal
    }

    pub fn errors(&self) -> &[Error] {
        &self.errors
    }
}

impl From<Error> for Errors {
    fn from(error: Error) -> Self {
        let mut errors = Self::new();
        errors.add(error);
        errors
    }
}

impl fmt::Display for Errors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for error in &self.errors {
            if !first {
                write!(f, "; ")?;
            }
            write!(f, "{error}")?;
            first = false;
        }
        Ok(())
    }
}

impl std::error::Error for Errors {}
