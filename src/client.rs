use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    sync::Arc,
    time::Duration,
};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{
    header::{self, HeaderMap, HeaderValue},
    Url,
};
use tokio::time::sleep;

use crate::{
    decode::{normalize_failure, normalize_response},
    logger::{LogEvent, LogLevel, Logger},
    rate_limit::RateLimitPolicy,
    retry::{AttemptOutcome, RetryCause, RetryMachine, RetryPolicy, RetryState},
    signing::{CookieSigner, HmacCookieSigner},
    state::{parse_header, PersistentState},
    transport::{ReqwestTransport, Transport, TransportRequest},
    ApiClientError, ApiResponse, Body, ClientOptions, Expect, Method, RequestOptions, Result,
};

/// Base client for a single remote API host.
///
/// Service-specific clients are expected to hold an `ApiClient` and expose
/// their own methods that delegate to the verb methods here.
#[derive(Clone)]
pub struct ApiClient {
    host: String,
    transport: Arc<dyn Transport>,
    logger: Arc<dyn Logger>,
    signer: Arc<dyn CookieSigner>,
    options: ClientOptions,
    state: PersistentState,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let headers: Vec<&str> = self.state.headers().keys().map(|name| name.as_str()).collect();
        let cookies: Vec<&str> = self.state.cookies().keys().map(String::as_str).collect();
        f.debug_struct("ApiClient")
            .field("host", &self.host)
            .field("headers", &headers)
            .field("cookies", &cookies)
            .field("values", &"<redacted>")
            .field("options", &self.options)
            .finish()
    }
}

impl ApiClient {
    /// Creates a client for `host`, e.g. `https://api.example.com`.
    ///
    /// The host must not carry a path, query or fragment; request paths are
    /// appended to it verbatim.
    pub fn new(host: impl AsRef<str>, logger: Arc<dyn Logger>) -> Result<Self> {
        Ok(Self {
            host: normalize_host(host.as_ref())?,
            transport: Arc::new(ReqwestTransport::new()?),
            logger,
            signer: Arc::new(HmacCookieSigner),
            options: ClientOptions::default(),
            state: PersistentState::default(),
        })
    }

    /// Creates a client from environment variables.
    ///
    /// Reads:
    /// - `API_CLIENT_HOST`: base host (required)
    /// - `API_CLIENT_BEARER_TOKEN`: optional bearer token
    /// - everything [`ClientOptions::from_env`] reads
    pub fn from_env(logger: Arc<dyn Logger>) -> Result<Self> {
        let host = std::env::var("API_CLIENT_HOST")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .ok_or(ApiClientError::MissingEnv("API_CLIENT_HOST"))?;
        let mut client = Self::new(host.trim(), logger)?.with_options(ClientOptions::from_env()?);
        if let Some(token) = std::env::var("API_CLIENT_BEARER_TOKEN")
            .ok()
            .filter(|value| !value.trim().is_empty())
        {
            client.add_bearer_auth(&token)?;
        }
        Ok(client)
    }

    /// Applies client options such as timeout and retry behavior.
    pub fn with_options(mut self, opts: ClientOptions) -> Self {
        self.options = opts;
        self
    }

    /// Replaces the HTTP transport.
    pub fn with_transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Arc::new(transport);
        self
    }

    /// Replaces the signer used by [`ApiClient::add_signed_cookie`].
    pub fn with_signer(mut self, signer: impl CookieSigner + 'static) -> Self {
        self.signer = Arc::new(signer);
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn headers(&self) -> &HeaderMap {
        self.state.headers()
    }

    pub fn cookies(&self) -> &BTreeMap<String, String> {
        self.state.cookies()
    }

    /// Sets a header sent with every following request until removed.
    pub fn add_header(&mut self, name: &str, value: &str) -> Result<()> {
        self.state.insert_header(name, value)
    }

    pub fn remove_header(&mut self, name: &str) {
        self.state.remove_header(name);
    }

    pub fn clear_headers(&mut self) {
        self.state.clear_headers();
    }

    /// Sets `Authorization: Basic base64(username:password)`.
    pub fn add_basic_auth(&mut self, username: &str, password: &str) -> Result<()> {
        let encoded = STANDARD.encode(format!("{username}:{password}"));
        self.state
            .insert_header(header::AUTHORIZATION.as_str(), &format!("Basic {encoded}"))
    }

    /// Sets `Authorization: Bearer <token>`.
    ///
    /// If the token already carries the `Bearer ` prefix it is kept as is.
    pub fn add_bearer_auth(&mut self, token: &str) -> Result<()> {
        let authorization = normalize_bearer_authorization(token);
        self.state
            .insert_header(header::AUTHORIZATION.as_str(), &authorization)
    }

    pub fn add_cookie(&mut self, name: &str, value: &str) -> Result<()> {
        self.state.insert_cookie(name, value)
    }

    pub fn remove_cookie(&mut self, name: &str) {
        self.state.remove_cookie(name);
    }

    /// Signs `payload` with `signing_key` and stores the token as cookie `name`.
    ///
    /// `key_id` is embedded in the token so the receiver knows which key
    /// verifies it.
    pub fn add_signed_cookie(
        &mut self,
        name: &str,
        payload: &serde_json::Value,
        key_id: &str,
        signing_key: &str,
    ) -> Result<()> {
        let token = self.signer.sign(payload, key_id, signing_key)?;
        self.state.insert_cookie(name, &token)
    }

    pub fn clear_cookies(&mut self) {
        self.state.clear_cookies();
    }

    /// Sends a GET request expecting JSON.
    pub async fn get(&self, path: &str) -> Result<ApiResponse> {
        self.send(Method::Get, path, RequestOptions::new()).await
    }

    /// Sends a GET request whose successful body is returned as raw bytes.
    pub async fn get_binary(&self, path: &str) -> Result<ApiResponse> {
        self.send(Method::Get, path, RequestOptions::new().expect_binary())
            .await
    }

    pub async fn post(&self, path: &str, body: impl Into<Body>) -> Result<ApiResponse> {
        self.send(Method::Post, path, RequestOptions::new().body(body))
            .await
    }

    pub async fn put(&self, path: &str, body: impl Into<Body>) -> Result<ApiResponse> {
        self.send(Method::Put, path, RequestOptions::new().body(body))
            .await
    }

    pub async fn patch(&self, path: &str, body: impl Into<Body>) -> Result<ApiResponse> {
        self.send(Method::Patch, path, RequestOptions::new().body(body))
            .await
    }

    pub async fn delete(&self, path: &str) -> Result<ApiResponse> {
        self.send(Method::Delete, path, RequestOptions::new()).await
    }

    /// Sends a request with per-call overrides.
    ///
    /// The error side only carries configuration problems (bad path, bad
    /// header). HTTP failures, throttling and network errors come back as an
    /// [`ApiResponse`] with an error message.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        request: RequestOptions,
    ) -> Result<ApiResponse> {
        let url = self.full_url(path)?;
        let headers = self.compose_headers(&request)?;
        let timeout = request.timeout.unwrap_or_else(|| self.options.timeout());
        let expect = request.expect;
        let policy = self.retry_policy(&request);

        let transport_request = TransportRequest {
            method,
            url,
            headers,
            query: request.query,
            body: request.body,
            timeout,
        };

        Ok(self.send_with_retry(transport_request, policy, expect).await)
    }

    async fn send_with_retry(
        &self,
        request: TransportRequest,
        policy: RetryPolicy,
        expect: Expect,
    ) -> ApiResponse {
        let mut machine = RetryMachine::new(policy);
        loop {
            let attempt = machine.attempt();
            self.log(
                LogEvent::new(LogLevel::Debug, format!("{}: {}", request.method, request.url))
                    .with("attempt", attempt + 1)
                    .with("timeout_ms", duration_ms(request.timeout)),
            );

            let outcome = self.transport.send(request.clone()).await;

            match machine.observe(&outcome).clone() {
                RetryState::RetryWait { wait, cause, .. } => {
                    self.log_backoff(&request, &outcome, attempt, machine.max_retries(), wait, cause);
                    sleep(wait).await;
                    machine.resume();
                }
                RetryState::Exhausted { attempts, cause } => {
                    let prefix = exhaustion_message(attempts, cause);
                    let response = match outcome {
                        Ok(raw) => normalize_response(raw, expect),
                        Err(err) => normalize_failure(&err),
                    }
                    .annotate_failure(&prefix);
                    self.log_failure(&request, &response, attempts);
                    return response;
                }
                RetryState::Success | RetryState::NonRetryable => {
                    let response = match outcome {
                        Ok(raw) => normalize_response(raw, expect),
                        Err(err) => normalize_failure(&err),
                    };
                    if response.error().is_some() && !response.is_success() {
                        self.log_failure(&request, &response, attempt + 1);
                    } else {
                        self.log_response(&request, &response);
                    }
                    return response;
                }
                // observe() never leaves the machine in Attempting
                RetryState::Attempting { .. } => machine.resume(),
            }
        }
    }

    fn retry_policy(&self, request: &RequestOptions) -> RetryPolicy {
        let retry_on_status: BTreeSet<u16> = request
            .retry_on_status
            .as_ref()
            .unwrap_or(&self.options.retry_on_status)
            .iter()
            .copied()
            .collect();
        RetryPolicy {
            max_retries: request.max_retries.unwrap_or(self.options.max_retries),
            base_backoff: request
                .retry_backoff
                .unwrap_or_else(|| self.options.retry_backoff()),
            max_backoff: self.options.max_backoff(),
            retry_on_status,
            rate_limit: RateLimitPolicy::new(
                Duration::from_millis(self.options.rate_limit_wait_ms),
                Duration::from_millis(self.options.max_rate_limit_wait_ms),
            ),
        }
    }

    fn full_url(&self, path: &str) -> Result<String> {
        if !path.starts_with('/') {
            return Err(ApiClientError::InvalidPath(path.to_owned()));
        }
        Ok(format!("{}{}", self.host, path))
    }

    /// Persistent headers, then defaults, then per-call overrides.
    fn compose_headers(&self, request: &RequestOptions) -> Result<HeaderMap> {
        let mut headers = self.state.headers().clone();

        if request.expect == Expect::Binary || !headers.contains_key(header::ACCEPT) {
            headers.insert(
                header::ACCEPT,
                HeaderValue::from_static(request.expect.accept()),
            );
        }
        if let Some(body) = &request.body {
            if !headers.contains_key(header::CONTENT_TYPE) {
                headers.insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static(body.content_type()),
                );
            }
        }
        if let Some(cookie) = self.state.cookie_header() {
            headers.insert(header::COOKIE, cookie);
        }

        for (name, value) in &request.headers {
            let (name, value) = parse_header(name, value)?;
            headers.insert(name, value);
        }
        Ok(headers)
    }

    fn log(&self, event: LogEvent) {
        self.logger.log(event);
    }

    fn log_backoff(
        &self,
        request: &TransportRequest,
        outcome: &AttemptOutcome,
        attempt: usize,
        max_retries: usize,
        wait: Duration,
        cause: RetryCause,
    ) {
        let message = match cause {
            RetryCause::RateLimited => "rate limited, waiting before retry",
            RetryCause::Status(_) | RetryCause::Transport(_) => {
                "retryable failure, waiting before retry"
            }
        };
        let mut event = LogEvent::new(LogLevel::Warn, message)
            .with("method", request.method.as_str())
            .with("url", request.url.as_str())
            .with("attempt", attempt + 1)
            .with("max_retries", max_retries)
            .with("wait_ms", duration_ms(wait))
            .with("cause", cause.as_str());
        event = match outcome {
            Ok(raw) => event.with("status", raw.status),
            Err(err) => event
                .with("error", err.to_string())
                .with("error_kind", err.kind.as_str()),
        };
        self.log(event);
    }

    fn log_failure(&self, request: &TransportRequest, response: &ApiResponse, attempts: usize) {
        self.log(
            LogEvent::new(LogLevel::Error, "request failed")
                .with("method", request.method.as_str())
                .with("url", request.url.as_str())
                .with("attempts", attempts)
                .with("status", response.status_code())
                .with("error", response.error().unwrap_or_default()),
        );
    }

    fn log_response(&self, request: &TransportRequest, response: &ApiResponse) {
        let level = if response.recovered() || response.error().is_some() {
            LogLevel::Warn
        } else {
            LogLevel::Debug
        };
        let mut event = LogEvent::new(level, response.to_string())
            .with("method", request.method.as_str())
            .with("url", request.url.as_str())
            .with("status", response.status_code());
        if response.recovered() {
            event = event.with("recovered", true);
        }
        if let Some(error) = response.error() {
            event = event.with("error", error);
        }
        self.log(event);
    }
}

fn normalize_host(host: &str) -> Result<String> {
    let invalid = |reason: &str| ApiClientError::InvalidHost {
        host: host.to_owned(),
        reason: reason.to_owned(),
    };
    let url = Url::parse(host.trim()).map_err(|err| invalid(&err.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("scheme must be http or https"));
    }
    let Some(name) = url.host_str() else {
        return Err(invalid("missing host name"));
    };
    if url.path() != "/" && !url.path().is_empty() {
        return Err(invalid("no path should be specified on the host"));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(invalid("no query or fragment should be specified on the host"));
    }

    let mut authority = String::new();
    if !url.username().is_empty() {
        authority.push_str(url.username());
        if let Some(password) = url.password() {
            authority.push(':');
            authority.push_str(password);
        }
        authority.push('@');
    }
    authority.push_str(name);
    if let Some(port) = url.port() {
        authority.push_str(&format!(":{port}"));
    }
    Ok(format!("{}://{}", url.scheme(), authority))
}

fn normalize_bearer_authorization(token: &str) -> String {
    let trimmed = token.trim();
    let prefix = trimmed.get(..7);
    if prefix.is_some_and(|value| value.eq_ignore_ascii_case("bearer ")) {
        trimmed.to_owned()
    } else {
        format!("Bearer {trimmed}")
    }
}

fn exhaustion_message(attempts: usize, cause: RetryCause) -> String {
    let plural = if attempts == 1 { "attempt" } else { "attempts" };
    match cause {
        RetryCause::RateLimited => {
            format!("rate limit exceeded: retries exhausted after {attempts} {plural}")
        }
        RetryCause::Status(_) | RetryCause::Transport(_) => {
            format!("retries exhausted after {attempts} {plural}")
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
