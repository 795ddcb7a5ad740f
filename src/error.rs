//! Error handling for audictl.
//!
//! Provides a single error type that pairs a category ([`ErrorKind`]) with
//! the underlying error, so callers can branch on what went wrong without
//! losing the original message.
//!
//! # Error Categories
//!
//! * Turning a query into a track ([`ErrorKind::Resolution`])
//! * Talking to a search or stream provider ([`ErrorKind::Provider`])
//! * Launching the media player ([`ErrorKind::Spawn`])
//! * Stopping the media player in time ([`ErrorKind::ShutdownTimeout`])
//! * Starts abandoned because playback was stopped ([`ErrorKind::Cancelled`])
//! * Malformed requests, I/O and internal failures
//!
//! An empty queue is not an error: see [`crate::session::Advance`].
//!
//! # Example
//!
//! ```rust
//! use audictl::error::{Error, ErrorKind, Result};
//!
//! fn lookup(query: &str) -> Result<()> {
//!     if query.is_empty() {
//!         return Err(Error::invalid_argument("missing query"));
//!     }
//!     Ok(())
//! }
//! ```

#![allow(clippy::enum_glob_use)]

use std::fmt;
use thiserror::Error;

/// Main error type combining error kind and details.
#[derive(Debug)]
pub struct Error {
    /// Classification of the error
    pub kind: ErrorKind,

    /// Details of the underlying error
    pub error: Box<dyn std::error::Error + Send + Sync>,
}

impl Error {
    /// Attempts to downcast the underlying error to a concrete type.
    ///
    /// # Example
    /// ```
    /// use std::io;
    /// # use audictl::error::Error;
    ///
    /// let io_error = io::Error::new(io::ErrorKind::Other, "oh no!");
    /// let error = Error::from(io_error);
    ///
    /// if let Some(io_err) = error.downcast::<io::Error>() {
    ///     println!("IO error kind: {:?}", io_err.kind());
    /// }
    /// ```
    #[must_use]
    pub fn downcast<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        self.error.downcast_ref::<E>()
    }
}

/// Standard result type for audictl operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories.
#[expect(clippy::module_name_repetitions)]
#[derive(Clone, Copy, Debug, Eq, Error, Hash, Ord, PartialEq, PartialOrd)]
pub enum ErrorKind {
    /// A query could not be turned into a track.
    ///
    /// Not retried; surfaced verbatim to the caller.
    #[error("could not resolve track")]
    Resolution,

    /// A search, metadata or stream lookup failed downstream.
    #[error("provider error")]
    Provider,

    /// The external media player could not be launched.
    #[error("failed to start player")]
    Spawn,

    /// The media player did not exit within the stop deadline.
    ///
    /// Playback state is already cleared when this is returned.
    #[error("timed out waiting for player to exit")]
    ShutdownTimeout,

    /// A track was still being started when playback was stopped.
    #[error("operation was cancelled")]
    Cancelled,

    /// The caller supplied a malformed or missing argument.
    #[error("invalid argument specified")]
    InvalidArgument,

    /// An I/O operation failed.
    #[error("input/output error")]
    Io,

    /// Data could not be encoded or decoded.
    #[error("invalid data")]
    InvalidData,

    #[error("internal error")]
    Internal,
}

impl Error {
    /// Creates a new error with specified kind and details.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use audictl::error::{Error, ErrorKind};
    /// let err = Error::new(ErrorKind::Provider, "search failed");
    /// assert_eq!(err.kind, ErrorKind::Provider);
    /// ```
    pub fn new<E>(kind: ErrorKind, error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind,
            error: error.into(),
        }
    }

    /// Creates an error for queries that did not yield a track.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use audictl::error::{Error, ErrorKind};
    /// let err = Error::resolution("no results found");
    /// assert_eq!(err.kind, ErrorKind::Resolution);
    /// ```
    pub fn resolution<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Resolution, error)
    }

    /// Creates an error for failed provider lookups.
    ///
    /// Use when a search, metadata request or stream resolution failed for
    /// reasons outside of this process, e.g. `yt-dlp` exiting with an error
    /// or an HTTP request being rejected.
    pub fn provider<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Provider, error)
    }

    /// Creates an error for a media player that could not be launched.
    pub fn spawn<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Spawn, error)
    }

    /// Creates an error for a stop that did not complete in time.
    pub fn shutdown_timeout<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::ShutdownTimeout, error)
    }

    pub fn cancelled<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Cancelled, error)
    }

    /// Creates an error for invalid arguments.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use audictl::error::{Error, ErrorKind};
    /// let err = Error::invalid_argument("missing query");
    /// assert_eq!(err.kind, ErrorKind::InvalidArgument);
    /// ```
    pub fn invalid_argument<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::InvalidArgument, error)
    }

    pub fn invalid_data<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::InvalidData, error)
    }

    pub fn internal<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Internal, error)
    }

    /// Whether this error is only a warning about a slow shutdown.
    ///
    /// Callers may treat it as success: the session is already idle.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.kind == ErrorKind::ShutdownTimeout
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.error.as_ref())
    }
}

/// Formats as `<kind>: <details>`.
impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = self.kind.to_string();
        let error = self.error.to_string();
        if error.is_empty() || kind == error {
            write!(fmt, "{kind}")
        } else {
            write!(fmt, "{kind}: {error}")
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind::*;
        match err.kind() {
            InvalidData | InvalidInput | UnexpectedEof => Self::new(ErrorKind::InvalidData, err),
            _ => Self::new(ErrorKind::Io, err),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            return Self::internal(err);
        }
        Self::provider(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::invalid_data(err)
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::invalid_data(err)
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Self::invalid_argument(e)
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        Self::shutdown_timeout(e)
    }
}

impl<T> From<std::sync::PoisonError<std::sync::MutexGuard<'_, T>>> for Error {
    fn from(e: std::sync::PoisonError<std::sync::MutexGuard<'_, T>>) -> Self {
        Self::internal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_details() {
        let err = Error::resolution("no results for 'foo'");
        assert_eq!(
            err.to_string(),
            "could not resolve track: no results for 'foo'"
        );
    }

    #[test]
    fn io_errors_keep_their_source() {
        let err = Error::from(std::io::Error::new(std::io::ErrorKind::NotFound, "mpv"));
        assert_eq!(err.kind, ErrorKind::Io);
        assert!(err.downcast::<std::io::Error>().is_some());
    }

    #[tokio::test]
    async fn elapsed_maps_to_shutdown_timeout() {
        let elapsed = tokio::time::timeout(std::time::Duration::ZERO, std::future::pending::<()>())
            .await
            .unwrap_err();
        assert!(Error::from(elapsed).is_timeout());
    }
}
