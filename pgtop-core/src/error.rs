//! Error types shared across collectors and the resolver.
//!
//! Matches the teacher's idiom: a plain enum with a hand-written `Display`
//! and `std::error::Error` impl per failure domain, no `thiserror`.

use std::fmt;

/// Failure collecting a single `/proc`-derived sample.
#[derive(Debug)]
pub enum CollectError {
    /// The entity (process, partition) disappeared mid-collection.
    Gone(String),
    /// I/O error reading a `/proc` or `/sys` file.
    Io(std::io::Error),
    /// A line did not match the expected format.
    Parse(String),
}

impl fmt::Display for CollectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectError::Gone(what) => write!(f, "{what} disappeared during collection"),
            CollectError::Io(e) => write!(f, "I/O error: {e}"),
            CollectError::Parse(msg) => write!(f, "parse error: {msg}"),
        }
    }
}

impl std::error::Error for CollectError {}

impl From<std::io::Error> for CollectError {
    fn from(e: std::io::Error) -> Self {
        CollectError::Io(e)
    }
}

/// Failure talking to a PostgreSQL backend.
#[derive(Debug)]
pub enum PgCollectError {
    /// The connection is gone; caller should reconnect on the next tick.
    Connection(postgres::Error),
    /// A query returned rows that did not match the expected shape.
    UnexpectedShape(String),
}

impl fmt::Display for PgCollectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PgCollectError::Connection(e) => write!(f, "connection error: {e}"),
            PgCollectError::UnexpectedShape(msg) => write!(f, "unexpected result shape: {msg}"),
        }
    }
}

impl std::error::Error for PgCollectError {}

impl From<postgres::Error> for PgCollectError {
    fn from(e: postgres::Error) -> Self {
        PgCollectError::Connection(e)
    }
}

/// Failure discovering or connecting to a cluster.
#[derive(Debug)]
pub enum ResolveError {
    Io(std::io::Error),
    NoEndpoint(String),
    Connect(postgres::Error),
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveError::Io(e) => write!(f, "I/O error: {e}"),
            ResolveError::NoEndpoint(name) => {
                write!(f, "no reachable endpoint for cluster '{name}'")
            }
            ResolveError::Connect(e) => write!(f, "connect error: {e}"),
        }
    }
}

impl std::error::Error for ResolveError {}

impl From<std::io::Error> for ResolveError {
    fn from(e: std::io::Error) -> Self {
        ResolveError::Io(e)
    }
}

impl From<postgres::Error> for ResolveError {
    fn from(e: postgres::Error) -> Self {
        ResolveError::Connect(e)
    }
}

/// Fatal startup failure, mapped to a process exit code by the `pgtop` binary.
#[derive(Debug)]
pub enum StartupError {
    Config(String),
    BadOutputMode(String),
    UnsupportedPlatform,
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartupError::Config(msg) => write!(f, "config error: {msg}"),
            StartupError::BadOutputMode(mode) => write!(f, "unknown output mode '{mode}'"),
            StartupError::UnsupportedPlatform => {
                write!(f, "pgtop only supports Linux hosts")
            }
        }
    }
}

impl std::error::Error for StartupError {}

/// Confirms the TLS backend the `postgres` driver stack needs at runtime is
/// actually usable on this host, surfaced as exit code 254 (spec.md §6)
/// when it isn't — the closest Rust-native equivalent of the original's
/// "is the SQL driver module importable" startup check.
pub fn check_sql_driver() -> Result<(), StartupError> {
    native_tls::TlsConnector::new()
        .map(|_| ())
        .map_err(|e| StartupError::Config(format!("SQL driver unavailable: {e}")))
}
