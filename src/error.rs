//! Error handling for cadenza.
//!
//! All fallible operations return [`Result`], whose error combines an
//! [`ErrorKind`] with the boxed underlying error. The kinds mirror the
//! credential lifecycle and resource boundaries:
//!
//! * Login: [`MissingVerifier`](ErrorKind::MissingVerifier),
//!   [`ExchangeFailed`](ErrorKind::ExchangeFailed)
//! * Refresh: [`NoRefreshToken`](ErrorKind::NoRefreshToken),
//!   [`RefreshFailed`](ErrorKind::RefreshFailed)
//! * Vending: [`NotAuthenticated`](ErrorKind::NotAuthenticated)
//! * Resources: [`Http`](ErrorKind::Http) with the offending status
//!
//! plus a handful of ambient kinds for transport, parsing and storage
//! failures.
//!
//! # Example
//!
//! ```rust
//! use cadenza::error::{Error, ErrorKind, Result};
//!
//! fn token(stored: Option<&str>) -> Result<String> {
//!     stored
//!         .map(ToOwned::to_owned)
//!         .ok_or_else(|| Error::not_authenticated("no access token stored"))
//! }
//!
//! assert_eq!(token(None).unwrap_err().kind, ErrorKind::NotAuthenticated);
//! ```

use std::fmt;

use reqwest::StatusCode;
use thiserror::Error;

/// Main error type combining error kind and details.
#[derive(Debug)]
pub struct Error {
    /// Classification of the error
    pub kind: ErrorKind,

    /// Details of the underlying error
    pub error: Box<dyn std::error::Error + Send + Sync>,
}

/// Standard result type for cadenza operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories.
///
/// The first group belongs to the credential lifecycle and is never
/// swallowed by the library: callers of the token vending and exchange
/// functions always see them unchanged.
#[expect(clippy::module_name_repetitions)]
#[derive(Clone, Copy, Debug, Eq, Error, Hash, PartialEq)]
pub enum ErrorKind {
    /// The PKCE verifier was not found when the authorization code returned.
    #[error("code verifier not found")]
    MissingVerifier,

    /// The authorization code could not be exchanged for tokens.
    #[error("failed to exchange code for token")]
    ExchangeFailed,

    /// No refresh token is stored.
    #[error("no refresh token available")]
    NoRefreshToken,

    /// The refresh token could not be exchanged for a new access token.
    #[error("failed to refresh access token")]
    RefreshFailed,

    /// No access token or expiry is stored.
    #[error("not authenticated")]
    NotAuthenticated,

    /// A resource request returned a non-success status.
    #[error("HTTP error {0}")]
    Http(StatusCode),

    /// HTTP Mapping: 400 Bad Request
    #[error("invalid argument specified")]
    InvalidArgument,

    /// A response or stored value could not be parsed.
    #[error("invalid data")]
    InvalidData,

    /// The remote service could not be reached.
    #[error("service unavailable")]
    Unavailable,

    /// HTTP Mapping: 504 Gateway Timeout
    #[error("operation timed out")]
    DeadlineExceeded,

    /// The credential store could not be read or written.
    #[error("storage error")]
    Storage,

    /// HTTP Mapping: 500 Internal Server Error
    #[error("internal error")]
    Internal,
}

impl ErrorKind {
    /// Whether this kind belongs to the credential lifecycle.
    #[must_use]
    pub fn is_credential(self) -> bool {
        matches!(
            self,
            Self::MissingVerifier
                | Self::ExchangeFailed
                | Self::NoRefreshToken
                | Self::RefreshFailed
                | Self::NotAuthenticated
        )
    }
}

impl Error {
    /// Creates a new error with specified kind and details.
    ///
    /// # Examples
    ///
    /// ```rust
    /// let err = Error::new(ErrorKind::Storage, "session file is read-only");
    /// assert_eq!(err.kind, ErrorKind::Storage);
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

    /// Attempts to downcast the underlying error to a concrete type.
    #[must_use]
    pub fn downcast<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        self.error.downcast_ref::<E>()
    }

    pub fn missing_verifier<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::MissingVerifier, error)
    }

    pub fn exchange_failed<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::ExchangeFailed, error)
    }

    pub fn no_refresh_token<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::NoRefreshToken, error)
    }

    pub fn refresh_failed<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::RefreshFailed, error)
    }

    pub fn not_authenticated<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::NotAuthenticated, error)
    }

    /// Creates an error for a non-success response status.
    ///
    /// The `url` is kept as the error detail so that log lines show which
    /// request failed.
    pub fn http<E>(status: StatusCode, error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Http(status), error)
    }

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

    pub fn unavailable<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Unavailable, error)
    }

    pub fn deadline_exceeded<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::DeadlineExceeded, error)
    }

    pub fn storage<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Storage, error)
    }

    pub fn internal<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Internal, error)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.error.source()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}: ", self.kind)?;
        self.error.fmt(fmt)
    }
}

/// Converts I/O errors from the file-backed credential store.
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind::*;
        match err.kind() {
            TimedOut => Self::deadline_exceeded(err),
            InvalidInput | InvalidData | UnexpectedEof => Self::invalid_data(err),
            _ => Self::storage(err),
        }
    }
}

/// Converts HTTP client errors into appropriate error kinds.
///
/// Status errors keep their status code so that they surface as
/// [`ErrorKind::Http`].
impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::http(status, err);
        }

        if err.is_body() || err.is_decode() {
            return Self::invalid_data(err);
        }

        if err.is_builder() {
            return Self::internal(err);
        }

        if err.is_connect() || err.is_redirect() || err.is_request() {
            return Self::unavailable(err);
        }

        if err.is_timeout() {
            return Self::deadline_exceeded(err);
        }

        Self::unavailable(err)
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

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Self::storage(err)
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Self::invalid_argument(e.to_string())
    }
}

impl From<reqwest::header::InvalidHeaderValue> for Error {
    fn from(e: reqwest::header::InvalidHeaderValue) -> Self {
        Self::internal(e.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Self::storage(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_kind() {
        let err = Error::http(StatusCode::NOT_FOUND, "https://api.example/v1/me");
        assert_eq!(
            err.to_string(),
            "HTTP error 404 Not Found: https://api.example/v1/me"
        );
    }

    #[test]
    fn credential_kinds() {
        assert!(ErrorKind::RefreshFailed.is_credential());
        assert!(ErrorKind::NotAuthenticated.is_credential());
        assert!(!ErrorKind::Http(StatusCode::UNAUTHORIZED).is_credential());
        assert!(!ErrorKind::Storage.is_credential());
    }

    #[test]
    fn io_errors_map_to_storage() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into();
        assert_eq!(err.kind, ErrorKind::Storage);
    }
}
