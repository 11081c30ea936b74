//! Error types for the proxy.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

/// Result type for proxy operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for proxy operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Authentication failed: missing/invalid token or unresolvable roles.
    #[error("authentication failed: {0}")]
    Unauthorized(String),

    /// Request targets an endpoint that is blocked in safe mode.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Request uses a method other than GET or POST.
    #[error("method not allowed: {0}")]
    MethodNotAllowed(String),

    /// A `query` or `match[]` value (or the form carrying it) is unusable.
    #[error("bad query: {0}")]
    BadQuery(String),

    /// The rewrite stage ran without an effective ACL in the request context.
    #[error("ACL is not set in the request context")]
    AclNotSet,

    /// Failed to reach or proxy to the upstream backend.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// The HTTP status this error translates to at the boundary.
    pub fn status(&self) -> StatusCode {
        match self {
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Error::BadQuery(_) => StatusCode::BAD_REQUEST,
            Error::AclNotSet => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Upstream(_) => StatusCode::BAD_GATEWAY,
            Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();

        if matches!(self, Error::MethodNotAllowed(_)) {
            return (status, [(header::ALLOW, "GET, POST")], self.to_string()).into_response();
        }

        (status, self.to_string()).into_response()
    }
}

impl From<promgate_acl::Error> for Error {
    fn from(e: promgate_acl::Error) -> Self {
        use promgate_acl::Error as Acl;

        match &e {
            // Unparsable queries are the client's fault.
            Acl::BadQuery { .. } => Error::BadQuery(e.to_string()),
            // Authorization could not be determined from the presented roles.
            Acl::NoMatchingRoles
            | Acl::RuleWithSpaces(_)
            | Acl::EmptyRule(_)
            | Acl::InvalidRegex { .. } => Error::Unauthorized(e.to_string()),
            // Registry load problems and filter-compile failures during a
            // request are internal invariant violations.
            _ => Error::Internal(e.to_string()),
        }
    }
}

impl From<jsonwebtoken::errors::Error> for Error {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        Error::Unauthorized(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Upstream(e.to_string())
    }
}
