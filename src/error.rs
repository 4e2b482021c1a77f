/// Error type returned by this crate.
///
/// Only configuration problems are reported through this type. Network
/// failures, throttling and unexpected HTTP statuses are folded into the
/// returned [`crate::ApiResponse`] instead.
#[derive(Debug, thiserror::Error)]
pub enum ApiClientError {
    /// Host could not be used as a base URL.
    #[error("invalid host '{host}': {reason}")]
    InvalidHost { host: String, reason: String },
    /// Request path was not an absolute path.
    #[error("invalid path '{0}': path needs to start with a forward-slash")]
    InvalidPath(String),
    /// HTTP verb is not one of GET, POST, PUT, PATCH or DELETE.
    #[error("unsupported http method '{0}'")]
    InvalidMethod(String),
    /// Header name or value rejected by the HTTP layer.
    #[error("invalid header '{name}': {reason}")]
    InvalidHeader { name: String, reason: String },
    /// Cookie name or value cannot be sent in a `Cookie` header.
    #[error("invalid cookie '{name}': {reason}")]
    InvalidCookie { name: String, reason: String },
    /// Cookie signer failed to produce a token.
    #[error("cookie signing failed: {0}")]
    Signing(#[from] SigningError),
    /// Required environment variable is missing or empty.
    #[error("missing {0} environment variable")]
    MissingEnv(&'static str),
    /// Environment variable is set but cannot be parsed.
    #[error("invalid {name} environment variable: {reason}")]
    InvalidEnv { name: &'static str, reason: String },
    /// Default HTTP transport could not be constructed.
    #[error("http client construction failed: {0}")]
    ClientBuild(reqwest::Error),
}

/// Error raised by a [`crate::CookieSigner`].
#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    #[error("signing key must not be empty")]
    EmptyKey,
    #[error("cookie payload must be a JSON object")]
    PayloadNotObject,
    #[error("payload serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("{0}")]
    Other(String),
}
