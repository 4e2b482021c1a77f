use std::{fmt, time::Duration};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, CONTENT_TYPE};

use crate::{ApiClientError, Body, Method, Result};

/// Fully formed request handed to a [`Transport`] for a single attempt.
#[derive(Clone, Debug)]
pub struct TransportRequest {
    pub method: Method,
    /// Host plus path, without the query string.
    pub url: String,
    pub headers: HeaderMap,
    pub query: Vec<(String, String)>,
    pub body: Option<Body>,
    pub timeout: Duration,
}

/// Response as received from the wire, before normalization.
#[derive(Clone, Debug, Default)]
pub struct RawResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
    }
}

/// Failure class of a transport error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    Timeout,
    Connect,
    Request,
    Body,
    /// The request could not be built; retrying cannot help.
    Builder,
    Other,
}

impl TransportErrorKind {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Builder)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Connect => "connect",
            Self::Request => "request",
            Self::Body => "body",
            Self::Builder => "builder",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Timeout => "request timed out",
            Self::Connect => "connection failed",
            Self::Request => "request failed",
            Self::Body => "response body could not be read",
            Self::Builder => "request could not be built",
            Self::Other => "transport error",
        };
        f.write_str(text)
    }
}

/// No response was received for an attempt.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            TransportErrorKind::Timeout
        } else if err.is_connect() {
            TransportErrorKind::Connect
        } else if err.is_builder() {
            TransportErrorKind::Builder
        } else if err.is_body() || err.is_decode() {
            TransportErrorKind::Body
        } else if err.is_request() {
            TransportErrorKind::Request
        } else {
            TransportErrorKind::Other
        };
        Self::new(kind, err.to_string())
    }
}

/// Sends one attempt of a request. Implementations must not retry.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: TransportRequest)
        -> std::result::Result<RawResponse, TransportError>;
}

/// Default transport backed by `reqwest`.
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(ApiClientError::ClientBuild)?;
        Ok(Self { http })
    }

    /// Wraps an existing `reqwest` client, e.g. one with custom TLS settings.
    pub fn from_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        request: TransportRequest,
    ) -> std::result::Result<RawResponse, TransportError> {
        let mut builder = self
            .http
            .request(request.method.into(), &request.url)
            .headers(request.headers)
            .timeout(request.timeout);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }

        builder = match request.body {
            Some(Body::Json(value)) => builder.json(&value),
            Some(Body::Bytes(bytes)) => builder.body(bytes),
            Some(Body::Form(fields)) => builder.form(&fields),
            None => builder,
        };

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();

        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{TransportError, TransportErrorKind};

    #[test]
    fn only_builder_failures_are_final() {
        assert!(TransportErrorKind::Timeout.is_retryable());
        assert!(TransportErrorKind::Connect.is_retryable());
        assert!(TransportErrorKind::Other.is_retryable());
        assert!(!TransportErrorKind::Builder.is_retryable());
    }

    #[test]
    fn display_names_failure_class() {
        let err = TransportError::new(TransportErrorKind::Connect, "refused");
        assert_eq!(err.to_string(), "connection failed: refused");
    }

    #[tokio::test]
    async fn reqwest_connect_error_maps_to_connect_kind() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let address = listener.local_addr().expect("addr");
        drop(listener);

        let err = reqwest::Client::new()
            .get(format!("http://{address}/"))
            .send()
            .await
            .expect_err("nothing listens on a dropped port");
        let mapped = TransportError::from(err);
        assert_eq!(mapped.kind, TransportErrorKind::Connect);
    }
}
