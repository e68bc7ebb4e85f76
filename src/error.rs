use std::{fmt, io};

/// Crate wide error type.
///
/// Mirrors the shape of a typical hand rolled client error: a flat,
/// non_exhaustive enum with manual [`Display`] built off of [`fmt::Debug`]
/// formatting of the inner cause, plus [`From`] impls at every fallible
/// boundary.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// target url failed to parse or used an unsupported scheme.
    InvalidUri(String),
    /// host name failed to resolve to any address.
    Resolve(String),
    /// reading or parsing the run configuration failed.
    Config(String),
    /// an upload file referenced by a request template could not be read.
    UploadFile(io::Error),
    /// a TLS client config could not be constructed.
    Tls(String),
    /// connecting to a target timed out.
    ConnectTimeout,
    /// writing a request timed out.
    WriteTimeout,
    /// reading a response timed out.
    ReadTimeout,
    /// the peer closed the connection.
    ConnectionClosed,
    /// the response could not be parsed as a well formed HTTP/1.x message.
    Parse(httparse::Error),
    /// generic I/O failure, typically from the underlying socket.
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::UploadFile(e) | Self::Io(e) => Some(e),
            Self::Parse(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::TimedOut => Self::ReadTimeout,
            io::ErrorKind::UnexpectedEof | io::ErrorKind::ConnectionReset => Self::ConnectionClosed,
            _ => Self::Io(e),
        }
    }
}

impl From<httparse::Error> for Error {
    fn from(e: httparse::Error) -> Self {
        Self::Parse(e)
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Config(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Config(e.to_string())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
