//! Network transport contract and implementations
//!
//! The retry executor only ever talks to a `Transport`. Two implementations
//! ship with the crate:
//! - `HttpTransport`: real HTTP via reqwest
//! - `ScriptedTransport`: in-memory scripted responses for tests and benches

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::cancel::CancellationToken;
use crate::error::RequestError;
use crate::request::Response;

/// What the transport actually sends: the descriptor with its URL resolved
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

/// Sends one HTTP request.
///
/// Implementations return `Ok` for every HTTP status the server answers with
/// and `Err` only when no response was obtained (`NetworkFailure`, `Timeout`,
/// or `Cancelled` when they observe the token).
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        request: &TransportRequest,
        token: &CancellationToken,
    ) -> Result<Response, RequestError>;
}

/// reqwest-backed transport
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    client_timeout: Option<Duration>,
}

impl HttpTransport {
    /// Build a transport with its own connection pool.
    ///
    /// Timeouts are enforced by the retry executor, not by the client.
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("kawaraban/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            client_timeout: None,
        })
    }

    /// Use a caller-built client.
    ///
    /// `client_timeout` is the timeout `client` was built with, if any; it is
    /// what a client-side timeout error reports.
    pub fn with_client(client: reqwest::Client, client_timeout: Option<Duration>) -> Self {
        Self {
            client,
            client_timeout,
        }
    }

    fn build(&self, request: &TransportRequest) -> Result<reqwest::RequestBuilder, RequestError> {
        let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| RequestError::ValidationFailure(format!("invalid method: {}", e)))?;

        let mut headers = reqwest::header::HeaderMap::new();
        for (name, value) in request.headers.iter() {
            let name = reqwest::header::HeaderName::from_bytes(name.as_str().as_bytes())
                .map_err(|e| RequestError::ValidationFailure(format!("invalid header: {}", e)))?;
            let value = reqwest::header::HeaderValue::from_bytes(value.as_bytes())
                .map_err(|e| RequestError::ValidationFailure(format!("invalid header: {}", e)))?;
            headers.append(name, value);
        }

        let mut builder = self.client.request(method, &request.url).headers(headers);
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        Ok(builder)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        request: &TransportRequest,
        token: &CancellationToken,
    ) -> Result<Response, RequestError> {
        let builder = self.build(request)?;
        let map_error = |err: reqwest::Error| map_reqwest_error(err, self.client_timeout);

        let exchange = async {
            let response = builder.send().await.map_err(map_error)?;
            let status = response.status().as_u16();

            let mut headers = HeaderMap::new();
            for (name, value) in response.headers() {
                // Skip anything the http 1.x types refuse rather than failing the call
                if let (Ok(name), Ok(value)) = (
                    http::HeaderName::from_bytes(name.as_str().as_bytes()),
                    http::HeaderValue::from_bytes(value.as_bytes()),
                ) {
                    headers.append(name, value);
                }
            }

            let body = response.bytes().await.map_err(map_error)?;
            Ok(Response {
                status,
                headers,
                body,
            })
        };

        tokio::select! {
            result = exchange => result,
            _ = token.cancelled() => Err(RequestError::Cancelled),
        }
    }
}

fn map_reqwest_error(err: reqwest::Error, client_timeout: Option<Duration>) -> RequestError {
    if err.is_timeout() {
        match client_timeout {
            Some(timeout) => RequestError::Timeout(timeout),
            // Only the connect phase can time out on a client without a timeout
            None => RequestError::NetworkFailure(format!("connection timed out: {}", err)),
        }
    } else if err.is_decode() {
        RequestError::ParseFailure(err.to_string())
    } else if err.is_builder() {
        RequestError::ValidationFailure(err.to_string())
    } else {
        RequestError::NetworkFailure(err.to_string())
    }
}

/// One scripted transport outcome
#[derive(Debug, Clone)]
pub enum Scripted {
    Respond(Response),
    Fail(RequestError),
}

/// A request the scripted transport received, with the (tokio) time it arrived
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub request: TransportRequest,
    pub at: Instant,
}

#[derive(Debug)]
struct ScriptedState {
    queued: HashMap<String, VecDeque<Scripted>>,
    fallback: Scripted,
    delay: Duration,
    calls: Vec<RecordedCall>,
}

/// In-memory transport with scripted outcomes, keyed by URL path.
///
/// Queued outcomes for a path are consumed in order; once a path's queue is
/// empty the fallback outcome (200 with an empty body unless changed) is
/// returned. Honors cancellation during its simulated delay.
#[derive(Debug, Clone)]
pub struct ScriptedTransport {
    state: Arc<Mutex<ScriptedState>>,
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ScriptedState {
                queued: HashMap::new(),
                fallback: Scripted::Respond(Response::new(200, Bytes::new())),
                delay: Duration::ZERO,
                calls: Vec::new(),
            })),
        }
    }

    /// Queue a response for the next call to `path`
    pub fn push_response(&self, path: &str, response: Response) {
        self.push(path, Scripted::Respond(response));
    }

    /// Queue a failure for the next call to `path`
    pub fn push_error(&self, path: &str, error: RequestError) {
        self.push(path, Scripted::Fail(error));
    }

    fn push(&self, path: &str, outcome: Scripted) {
        self.state
            .lock()
            .queued
            .entry(path.to_string())
            .or_default()
            .push_back(outcome);
    }

    /// Outcome returned when nothing is queued for a path
    pub fn set_fallback(&self, outcome: Scripted) {
        self.state.lock().fallback = outcome;
    }

    /// Simulated network latency applied to every call
    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().delay = delay;
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().calls.len()
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().calls.clone()
    }

    /// Calls whose URL path equals `path`
    pub fn calls_to(&self, path: &str) -> Vec<RecordedCall> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| url_path(&call.request.url) == path)
            .cloned()
            .collect()
    }
}

fn url_path(url: &str) -> String {
    url.parse::<http::Uri>()
        .map(|uri| uri.path().to_string())
        .unwrap_or_else(|_| url.to_string())
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(
        &self,
        request: &TransportRequest,
        token: &CancellationToken,
    ) -> Result<Response, RequestError> {
        let path = url_path(&request.url);
        let (outcome, delay) = {
            let mut state = self.state.lock();
            state.calls.push(RecordedCall {
                request: request.clone(),
                at: Instant::now(),
            });
            let queued = state
                .queued
                .get_mut(&path)
                .and_then(|queue| queue.pop_front());
            let outcome = queued.unwrap_or_else(|| state.fallback.clone());
            (outcome, state.delay)
        };

        if !delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = token.cancelled() => return Err(RequestError::Cancelled),
            }
        }

        match outcome {
            Scripted::Respond(response) => Ok(response),
            Scripted::Fail(error) => Err(error),
        }
    }
}
