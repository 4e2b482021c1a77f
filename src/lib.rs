//! `simple-api-client` is a resilient async HTTP client meant to sit under
//! service-specific API clients.
//!
//! [`ApiClient`] wraps one API host and offers:
//! - verb methods ([`ApiClient::get`], [`ApiClient::post`], [`ApiClient::put`],
//!   [`ApiClient::patch`], [`ApiClient::delete`], [`ApiClient::send`])
//! - persistent headers, Basic/Bearer auth and (signed) cookies
//! - retries with exponential backoff and `Retry-After` aware rate limiting
//! - an [`ApiResponse`] for every call, even when the upstream reply is
//!   malformed or never arrives
//!
//! Only configuration mistakes surface as [`ApiClientError`].

mod client;
mod decode;
mod error;
mod logger;
mod options;
mod rate_limit;
mod response;
mod retry;
mod signing;
mod state;
mod transport;
mod types;

pub use client::ApiClient;
pub use error::{ApiClientError, SigningError};
pub use logger::{LogEvent, LogLevel, Logger, TracingLogger};
pub use options::ClientOptions;
pub use rate_limit::{RateLimitAssessment, RateLimitPolicy};
pub use response::{ApiResponse, ResponseData, NO_RESPONSE_STATUS};
pub use retry::{AttemptOutcome, RetryCause, RetryMachine, RetryPolicy, RetryState};
pub use signing::{CookieSigner, HmacCookieSigner};
pub use state::PersistentState;
pub use transport::{
    RawResponse, ReqwestTransport, Transport, TransportError, TransportErrorKind,
    TransportRequest,
};
pub use types::{Body, Expect, Method, RequestOptions};

pub type Result<T> = std::result::Result<T, ApiClientError>;
