use http_client::{HttpClient, HttpClientConfig};
use realtime::{Realtime, RealtimeBuilder, RealtimeConfig};

use crate::error::Result;
use crate::record::RecordService;

/// Entry point of the SDK: one HTTP client plus the realtime service that
/// shares its connection pool and auth token.
#[derive(Debug)]
pub struct PocketBase {
    http: HttpClient,
    realtime: Realtime,
}

impl PocketBase {
    /// Create a client for `base_url` with default configuration.
    ///
    /// Must be called inside a tokio runtime, which hosts the realtime
    /// background task.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_config(
            base_url,
            HttpClientConfig::default(),
            RealtimeConfig::default(),
        )
    }

    pub fn with_config(
        base_url: impl Into<String>,
        http_config: HttpClientConfig,
        realtime_config: RealtimeConfig,
    ) -> Result<Self> {
        let http = HttpClient::with_config(base_url, http_config)?;
        let realtime = RealtimeBuilder::from_http_client(&http)
            .with_config(realtime_config)
            .build()?;

        tracing::debug!("PocketBase client created for {}", http.base_url());
        Ok(Self { http, realtime })
    }

    /// Assemble a client from separately configured parts
    pub fn from_parts(http: HttpClient, realtime: Realtime) -> Self {
        Self { http, realtime }
    }

    pub fn base_url(&self) -> &str {
        self.http.base_url()
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    pub fn realtime(&self) -> &Realtime {
        &self.realtime
    }

    /// Record operations for the collection with the given id or name
    pub fn collection(&self, id_or_name: &str) -> RecordService<'_> {
        RecordService::new(self, id_or_name)
    }

    /// Token sent with REST and subscription requests
    pub fn set_auth_token(&self, token: impl Into<String>) {
        self.http.set_auth_token(token);
    }

    pub fn clear_auth_token(&self) {
        self.http.clear_auth_token();
    }

    pub fn auth_token(&self) -> Option<String> {
        self.http.auth_token()
    }
}
