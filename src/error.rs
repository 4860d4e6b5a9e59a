//! Error types shared by the auth, api and query layers

use thiserror::Error;

/// Authority or client identity is missing or malformed.
///
/// Raised while assembling [`crate::auth::AuthorityConfig`], before any
/// network attempt is made.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("missing required setting '{0}'")]
    MissingField(&'static str),

    #[error("setting '{field}' is not a valid URL: {reason}")]
    InvalidUrl { field: &'static str, reason: String },

    #[error("no scopes declared")]
    EmptyScopes,
}

/// Failure to obtain an access token.
///
/// Cloneable so that every caller waiting on a shared interactive sign-in
/// receives the same outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Silent acquisition failed for a reason other than missing consent.
    #[error("silent token acquisition failed: {0}")]
    SilentFailed(String),

    /// Stored credentials are insufficient; an interactive sign-in is needed.
    /// Consumed by the broker, never returned from `get_access_token`.
    #[error("interactive sign-in required")]
    InteractiveRequired { claims: Option<String> },

    #[error("sign-in was cancelled")]
    UserCancelled,

    #[error("identity provider rejected the request: {0}")]
    ProviderRejected(String),

    #[error("identity provider unreachable: {0}")]
    Network(String),
}

/// Failure of an authenticated API call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("API rejected the access token")]
    Unauthorized,

    #[error("network failure: {0}")]
    Network(String),

    #[error("malformed API response: {0}")]
    MalformedResponse(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error(transparent)]
    Auth(#[from] AuthError),
}

/// The selected date cannot be turned into a query window.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("no date selected")]
    NoDateSelected,

    #[error("date {0} is outside the supported calendar range")]
    OutOfRange(chrono::NaiveDate),
}
