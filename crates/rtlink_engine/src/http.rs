//! HTTP fallback path.
//!
//! The actual HTTP client is abstracted via [`HttpClient`] to allow different
//! implementations (reqwest, hyper, a browser bridge, ...). [`ApiClient`]
//! builds the API requests the coordinator needs on top of it and reports
//! failures on the event bus.

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult, RequestFailureKind};
use crate::events::{ErrorReport, EventBus, Notification};
use async_trait::async_trait;
use parking_lot::Mutex;
use rtlink_protocol::{parse_http_date, JoinParams, PullResponse, RoomsResponse};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET.
    Get,
    /// POST.
    Post,
}

impl Method {
    /// Returns the method name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

/// An HTTP request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    /// Method.
    pub method: Method,
    /// Absolute URL without query string.
    pub url: String,
    /// Request headers.
    pub headers: Vec<(String, String)>,
    /// Query parameters, in order.
    pub query: Vec<(String, String)>,
    /// Request body.
    pub body: Option<String>,
}

impl HttpRequest {
    /// Returns the first header named `name`, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Returns every query value named `name`.
    pub fn query_values(&self, name: &str) -> Vec<&str> {
        self.query
            .iter()
            .filter(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
            .collect()
    }
}

/// An HTTP response.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response headers.
    pub headers: Vec<(String, String)>,
    /// Response body.
    pub body: String,
}

impl HttpResponse {
    /// A response with a JSON body.
    pub fn json(status: u16, body: &Value) -> Self {
        Self {
            status,
            headers: vec![("Content-Type".into(), "application/json".into())],
            body: body.to_string(),
        }
    }

    /// Adds a header.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Returns the first header named `name`, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Failure of an HTTP request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HttpError {
    /// No response was received.
    #[error("network error: {0}")]
    Network(String),

    /// The request timed out.
    #[error("request timed out")]
    Timeout,

    /// Non-2xx response.
    #[error("http status {status}")]
    Status {
        /// Status code.
        status: u16,
        /// Response body.
        body: String,
        /// Response headers.
        headers: Vec<(String, String)>,
    },
}

impl HttpError {
    fn kind(&self) -> RequestFailureKind {
        match self {
            HttpError::Network(_) => RequestFailureKind::Network,
            HttpError::Timeout => RequestFailureKind::Timeout,
            HttpError::Status { status, .. } => RequestFailureKind::Status(*status),
        }
    }
}

/// HTTP client abstraction.
///
/// Implementations return non-2xx responses either as `Ok` or as
/// [`HttpError::Status`]; [`ApiClient`] treats both the same way.
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    /// Sends a request.
    async fn request(&self, request: HttpRequest) -> Result<HttpResponse, HttpError>;
}

/// Where and as whom API requests are made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiEndpoint {
    host: Option<String>,
    namespace: String,
    token: Option<String>,
    token_header: String,
}

impl ApiEndpoint {
    /// Takes the API settings out of a configuration.
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            host: config.api_host.clone(),
            namespace: config.api_namespace.clone(),
            token: config.api_token.clone(),
            token_header: config.token_header.clone(),
        }
    }

    /// Builds `host/namespace/path`, collapsing duplicate slashes except
    /// directly after a scheme colon.
    ///
    /// Returns `None` when the host or the namespace is missing.
    pub fn build_url(&self, path: &str) -> Option<String> {
        let host = self.host.as_deref().filter(|h| !h.is_empty())?;
        if self.namespace.is_empty() {
            return None;
        }
        let raw = format!("{host}/{}/{path}", self.namespace);

        let mut url = String::with_capacity(raw.len());
        let mut previous: Option<char> = None;
        let mut before_previous: Option<char> = None;
        for c in raw.chars() {
            if c == '/' && previous == Some('/') && before_previous.is_some_and(|p| p != ':') {
                continue;
            }
            url.push(c);
            before_previous = previous;
            previous = Some(c);
        }
        Some(url)
    }

    /// Returns the token.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }
}

/// API requests of the coordinator.
pub struct ApiClient<H: HttpClient> {
    http: H,
    bus: Arc<EventBus>,
}

impl<H: HttpClient> ApiClient<H> {
    /// Path of the room credentials endpoint.
    pub const ROOMS_PATH: &'static str = "users/node/credentials";
    /// Path of the pull endpoint.
    pub const PULL_PATH: &'static str = "pull";

    /// Creates an API client reporting failures on `bus`.
    pub fn new(http: H, bus: Arc<EventBus>) -> Self {
        Self { http, bus }
    }

    /// Issues an API request.
    ///
    /// Failures are reported as an `error` notification and returned as
    /// [`ClientError::RequestFailed`].
    pub async fn request(
        &self,
        endpoint: &ApiEndpoint,
        path: &str,
        method: Method,
        query: Vec<(String, String)>,
        body: Option<String>,
    ) -> ClientResult<HttpResponse> {
        let url = endpoint.build_url(path);
        let (Some(url), Some(token)) = (url, endpoint.token()) else {
            return Err(ClientError::request(
                path,
                RequestFailureKind::NoEndpoint,
                "no url or token",
            ));
        };

        let request = HttpRequest {
            method,
            url: url.clone(),
            headers: vec![
                ("Content-Type".into(), "application/json".into()),
                ("Cache-Control".into(), "max-age=0".into()),
                (endpoint.token_header.clone(), token.to_string()),
            ],
            query,
            body,
        };

        let failure = match self.http.request(request).await {
            Ok(response) if response.is_success() => return Ok(response),
            Ok(response) => HttpError::Status {
                status: response.status,
                body: response.body,
                headers: response.headers,
            },
            Err(err) => err,
        };

        debug!(path, error = %failure, "api request failed");
        self.report(path, method, &url, &failure);
        Err(ClientError::request(path, failure.kind(), failure.to_string()))
    }

    /// Fetches the rooms granted by `params`.
    ///
    /// Also returns the server clock from the `Date` header.
    pub async fn fetch_rooms(
        &self,
        endpoint: &ApiEndpoint,
        params: &JoinParams,
    ) -> ClientResult<(RoomsResponse, Option<i64>)> {
        let body = serde_json::to_string(params).map_err(|e| ClientError::Protocol(e.to_string()))?;
        let response = self
            .request(endpoint, Self::ROOMS_PATH, Method::Post, Vec::new(), Some(body))
            .await?;
        let server_time = response.header("date").and_then(parse_http_date);
        Ok((RoomsResponse::decode(&response.body)?, server_time))
    }

    /// Fetches events newer than `since` for `rooms`.
    pub async fn fetch_pull_events(
        &self,
        endpoint: &ApiEndpoint,
        rooms: &[String],
        since: Option<i64>,
        enhanced: bool,
    ) -> ClientResult<PullResponse> {
        let mut query: Vec<(String, String)> = rooms
            .iter()
            .map(|room| ("rooms[]".to_string(), room.clone()))
            .collect();
        if let Some(since) = since {
            query.push(("since".into(), since.to_string()));
        }
        query.push(("enhanced".into(), enhanced.to_string()));

        let response = self
            .request(endpoint, Self::PULL_PATH, Method::Get, query, None)
            .await?;
        Ok(PullResponse::decode(&response.body)?)
    }

    fn report(&self, path: &str, method: Method, url: &str, failure: &HttpError) {
        let (status, body) = match failure {
            HttpError::Status { status, body, .. } => (
                Some(*status),
                serde_json::from_str(body).unwrap_or(Value::Null),
            ),
            _ => (None, Value::Null),
        };
        self.bus.trigger(&Notification::Error(ErrorReport {
            path: path.to_string(),
            method: method.as_str().to_string(),
            url: Some(url.to_string()),
            status,
            body,
        }));
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

type Scripted = Result<HttpResponse, HttpError>;

#[derive(Default)]
struct MockHttpState {
    queued: HashMap<String, VecDeque<Scripted>>,
    responses: HashMap<String, Scripted>,
    requests: Vec<HttpRequest>,
    latency: Duration,
}

/// A scriptable HTTP client for testing.
///
/// Responses are keyed by API path and matched against the end of the
/// request URL.
#[derive(Clone, Default)]
pub struct MockHttpClient {
    state: Arc<Mutex<MockHttpState>>,
}

impl MockHttpClient {
    /// Creates a client with no scripted responses.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the response for every request to `path`.
    pub fn respond(&self, path: &str, response: Scripted) {
        self.state.lock().responses.insert(path.to_string(), response);
    }

    /// Queues a one-shot response, used before the default one.
    pub fn push_response(&self, path: &str, response: Scripted) {
        self.state
            .lock()
            .queued
            .entry(path.to_string())
            .or_default()
            .push_back(response);
    }

    /// Delays every response.
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = latency;
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.state.lock().requests.clone()
    }

    /// Number of requests to `path`.
    pub fn request_count(&self, path: &str) -> usize {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|request| request.url.ends_with(path))
            .count()
    }

    fn next_response(&self, request: &HttpRequest) -> Scripted {
        let mut state = self.state.lock();
        state.requests.push(request.clone());

        let path = state
            .responses
            .keys()
            .chain(state.queued.keys())
            .find(|path| request.url.ends_with(path.as_str()))
            .cloned();
        let Some(path) = path else {
            return Err(HttpError::Status {
                status: 404,
                body: String::new(),
                headers: Vec::new(),
            });
        };
        if let Some(response) = state.queued.get_mut(&path).and_then(VecDeque::pop_front) {
            return response;
        }
        state.responses.get(&path).cloned().unwrap_or(Err(HttpError::Status {
            status: 404,
            body: String::new(),
            headers: Vec::new(),
        }))
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn request(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        let latency = self.state.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.next_response(&request)
    }
}
