//! Private JSON/HTTP client for backend REST communication
//!
//! This crate provides the minimal transport the SDK needs: joining paths onto
//! the backend base URL, attaching query parameters and JSON bodies, injecting
//! the auth token header, and normalizing every failure into a [`ClientError`].

mod error;

pub use error::{ClientError, ErrorKind, DEFAULT_ERROR_MESSAGE};

use std::sync::{Arc, RwLock};
use std::time::Duration;

use reqwest::header::{ACCEPT_LANGUAGE, AUTHORIZATION};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Configuration for [`HttpClient`]
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Per-request timeout (does not apply to streamed bodies)
    /// Default: 30 seconds
    pub request_timeout: Duration,

    /// TCP connect timeout shared by every request, streams included
    /// Default: 10 seconds
    pub connect_timeout: Duration,

    /// Value of the `Accept-Language` header
    /// Default: "en-US"
    pub lang: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            lang: "en-US".to_string(),
        }
    }
}

/// Method, query, headers and body of a single request
#[derive(Debug, Clone)]
pub struct SendOptions {
    pub method: Method,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            method: Method::GET,
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }
}

impl SendOptions {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            ..Default::default()
        }
    }

    pub fn get() -> Self {
        Self::new(Method::GET)
    }

    pub fn post() -> Self {
        Self::new(Method::POST)
    }

    pub fn patch() -> Self {
        Self::new(Method::PATCH)
    }

    pub fn delete() -> Self {
        Self::new(Method::DELETE)
    }

    /// Append a query parameter
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Append a header; an explicit `Authorization` header overrides the stored token
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Set an already encoded JSON body
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Encode `body` as the JSON request body
    pub fn with_json<T: Serialize + ?Sized>(self, body: &T) -> Result<Self, ClientError> {
        let value = serde_json::to_value(body).map_err(|e| ClientError {
            kind: ErrorKind::Request,
            url: String::new(),
            status: 0,
            message: e.to_string(),
            response: Value::Object(Default::default()),
        })?;
        Ok(self.with_body(value))
    }
}

/// A minimal JSON client for the backend REST API
///
/// Cloning is cheap: clones share the connection pool and the auth token.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: reqwest::Client,
    base_url: String,
    config: HttpClientConfig,
    auth_token: Arc<RwLock<Option<String>>>,
}

impl HttpClient {
    /// Create a client for `base_url` with default configuration
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        Self::with_config(base_url, HttpClientConfig::default())
    }

    /// Create a client for `base_url` with custom configuration
    pub fn with_config(
        base_url: impl Into<String>,
        config: HttpClientConfig,
    ) -> Result<Self, ClientError> {
        let base_url = base_url.into();

        // No global timeout here: it would also cut long-lived event streams.
        let inner = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| ClientError::from_transport(&base_url, &e))?;

        Ok(Self {
            inner,
            base_url,
            config,
            auth_token: Arc::new(RwLock::new(None)),
        })
    }

    /// The backend base URL as configured
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }

    /// The underlying reqwest client, shared with streaming transports
    pub fn inner(&self) -> &reqwest::Client {
        &self.inner
    }

    /// Store the token sent as the `Authorization` header
    pub fn set_auth_token(&self, token: impl Into<String>) {
        if let Ok(mut guard) = self.auth_token.write() {
            *guard = Some(token.into());
        }
    }

    /// Forget the stored token
    pub fn clear_auth_token(&self) {
        if let Ok(mut guard) = self.auth_token.write() {
            *guard = None;
        }
    }

    pub fn auth_token(&self) -> Option<String> {
        self.auth_token.read().ok().and_then(|guard| guard.clone())
    }

    /// Join `path` onto the base URL with exactly one `/` between them
    pub fn build_url(&self, path: &str) -> String {
        build_url(&self.base_url, path)
    }

    /// Send a request and return the decoded JSON body
    ///
    /// Empty or non-JSON success bodies decode to `{}`. Any 4xx/5xx status is
    /// returned as a [`ClientError`] of kind [`ErrorKind::Server`].
    pub async fn send(&self, path: &str, options: SendOptions) -> Result<Value, ClientError> {
        let url = self.build_url(path);

        let mut request = self
            .inner
            .request(options.method.clone(), &url)
            .timeout(self.config.request_timeout)
            .header(ACCEPT_LANGUAGE, self.config.lang.as_str());

        if !options.query.is_empty() {
            request = request.query(&options.query);
        }

        let has_auth_header = options
            .headers
            .iter()
            .any(|(key, _)| key.eq_ignore_ascii_case(AUTHORIZATION.as_str()));
        if !has_auth_header {
            if let Some(token) = self.auth_token() {
                request = request.header(AUTHORIZATION, token);
            }
        }

        for (key, value) in &options.headers {
            request = request.header(key.as_str(), value.as_str());
        }

        if let Some(body) = &options.body {
            request = request.json(body);
        }

        tracing::debug!("{} {}", options.method, url);

        let response = request
            .send()
            .await
            .map_err(|e| ClientError::from_transport(&url, &e))?;

        let status = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ClientError::from_transport(&url, &e))?;
        let body = decode_body(&bytes);

        if status >= 400 {
            tracing::debug!("{} {} failed with status {}", options.method, url, status);
            return Err(ClientError::from_response(&url, status, body));
        }

        Ok(body)
    }

    /// Send a request and deserialize the JSON body into `T`
    pub async fn send_json<T: DeserializeOwned>(
        &self,
        path: &str,
        options: SendOptions,
    ) -> Result<T, ClientError> {
        let body = self.send(path, options).await?;
        serde_json::from_value(body).map_err(|e| ClientError::decode(&self.build_url(path), 200, &e))
    }
}

fn build_url(base_url: &str, path: &str) -> String {
    let mut url = base_url.to_string();

    if path.is_empty() {
        return url;
    }

    if !url.ends_with('/') {
        url.push('/');
    }
    url.push_str(path.strip_prefix('/').unwrap_or(path));
    url
}

fn decode_body(bytes: &[u8]) -> Value {
    if bytes.is_empty() {
        return Value::Object(Default::default());
    }

    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Null) | Err(_) => Value::Object(Default::default()),
        Ok(value) => value,
    }
}
