//! Request descriptors, fingerprints and responses
//!
//! - `RequestDescriptor`: immutable description of one call, built by the caller
//! - `RequestFingerprint`: SHA-256 over method + URL + body, the cache and dedup key
//! - `Response`: status, headers and body returned by the transport

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use url::Url;
use uuid::Uuid;

use crate::cancel::CancellationToken;
use crate::error::RequestError;
use crate::retry::RetryPolicy;

/// Identifier of a single request (or queued operation)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for RequestId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Whether a request may be answered from (and stored in) the response cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Idempotent reads (GET/HEAD) use the cache
    #[default]
    Default,
    /// Always go to the network and never store the result
    Bypass,
}

/// Immutable description of one call.
///
/// Built with the consuming `with_*` methods; never mutated once handed to
/// the orchestrator.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    id: RequestId,
    method: Method,
    url: String,
    headers: HeaderMap,
    body: Option<Bytes>,
    retry: Option<RetryPolicy>,
    timeout: Option<Duration>,
    cancel_token: Option<CancellationToken>,
    cache_mode: CacheMode,
}

impl RequestDescriptor {
    /// Describe a call to `url`, either absolute or relative to the configured base URL
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            id: RequestId::new(),
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
            retry: None,
            timeout: None,
            cancel_token: None,
            cache_mode: CacheMode::Default,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::PUT, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    pub fn with_id(mut self, id: RequestId) -> Self {
        self.id = id;
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize `value` as the JSON body and set the content type
    pub fn with_json<T: Serialize + ?Sized>(self, value: &T) -> Result<Self, RequestError> {
        let body = serde_json::to_vec(value)
            .map_err(|e| RequestError::ValidationFailure(format!("unserializable body: {}", e)))?;
        Ok(self
            .with_header(
                http::header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            )
            .with_body(body))
    }

    /// Override the orchestrator's default retry policy for this call
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Per-attempt timeout for this call
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Use a caller-owned token so the caller can abort the call directly
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = Some(token);
        self
    }

    pub fn with_cache_mode(mut self, mode: CacheMode) -> Self {
        self.cache_mode = mode;
        self
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn retry(&self) -> Option<&RetryPolicy> {
        self.retry.as_ref()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn cancel_token(&self) -> Option<&CancellationToken> {
        self.cancel_token.as_ref()
    }

    pub fn cache_mode(&self) -> CacheMode {
        self.cache_mode
    }

    /// Whether the call is an idempotent read the response cache may answer
    pub fn is_cacheable(&self) -> bool {
        self.cache_mode == CacheMode::Default
            && (self.method == Method::GET || self.method == Method::HEAD)
    }
}

/// Deterministic identity of a request: hex SHA-256 of method, URL and body.
///
/// Headers and the request id are deliberately not part of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestFingerprint(String);

impl RequestFingerprint {
    pub fn compute(method: &Method, url: &str, body: Option<&[u8]>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(method.as_str().as_bytes());
        hasher.update(b"\n");
        hasher.update(url.as_bytes());
        hasher.update(b"\n");
        if let Some(body) = body {
            hasher.update(body);
        }
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short form is enough to correlate log lines
        write!(f, "{}", &self.0[..self.0.len().min(12)])
    }
}

/// Resolve `target` against `base_url` and validate the result.
///
/// Targets carrying a scheme are used as-is; relative targets are appended
/// to the base URL's path. The result must be http(s) with a host.
pub fn resolve_url(base_url: &str, target: &str) -> Result<String, RequestError> {
    let target = target.trim();
    if target.is_empty() {
        return Err(RequestError::ValidationFailure(
            "request URL cannot be empty".to_string(),
        ));
    }

    let resolved = match Url::parse(target) {
        Ok(absolute) => absolute,
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let mut base = Url::parse(base_url).map_err(|e| {
                RequestError::ValidationFailure(format!("invalid base URL '{}': {}", base_url, e))
            })?;
            // Url::join replaces the last path segment unless the base is a directory
            if !base.path().ends_with('/') {
                let directory = format!("{}/", base.path());
                base.set_path(&directory);
            }
            base.join(target.trim_start_matches('/')).map_err(|e| {
                RequestError::ValidationFailure(format!("invalid URL '{}': {}", target, e))
            })?
        }
        Err(e) => {
            return Err(RequestError::ValidationFailure(format!(
                "invalid URL '{}': {}",
                target, e
            )))
        }
    };

    if !matches!(resolved.scheme(), "http" | "https") {
        return Err(RequestError::ValidationFailure(format!(
            "URL '{}' must use http or https",
            resolved
        )));
    }
    if resolved.host_str().map_or(true, str::is_empty) {
        return Err(RequestError::ValidationFailure(format!(
            "URL '{}' has no host",
            resolved
        )));
    }

    Ok(resolved.into())
}

/// Circuit breaker key for a resolved URL: host plus path, query dropped
pub fn endpoint_key(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => {
            let host = parsed.host_str().unwrap_or("");
            match parsed.port() {
                Some(port) => format!("{}:{}{}", host, port, parsed.path()),
                None => format!("{}{}", host, parsed.path()),
            }
        }
        Err(_) => url.split('?').next().unwrap_or(url).to_string(),
    }
}

/// Response returned by the transport for any HTTP status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decode the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, RequestError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Body as UTF-8 text (lossy)
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
