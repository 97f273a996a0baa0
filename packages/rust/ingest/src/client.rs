//! Authenticated HTTP client bound to one connection.
//!
//! Every response status is classified before the body is touched:
//! 401 is an authentication failure, 404 is a recoverable not-found, any
//! other non-2xx status is a network error.

use std::time::{Duration, Instant};

use lakeflow_shared::{Connection, Credentials, HttpSettings, LakeflowError, Result};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

/// Runtime HTTP settings derived from the `[http]` config section.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout: Duration,
    /// Minimum delay between two requests of one client.
    pub rate_limit: Duration,
    pub user_agent: String,
}

impl From<&HttpSettings> for HttpConfig {
    fn from(settings: &HttpSettings) -> Self {
        Self {
            timeout: Duration::from_secs(settings.timeout_secs),
            rate_limit: Duration::from_millis(settings.rate_limit_ms),
            user_agent: settings.user_agent.clone(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self::from(&HttpSettings::default())
    }
}

/// A successful response body together with the URL that produced it.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub url: Url,
    pub body: Vec<u8>,
}

impl ApiResponse {
    /// Decode the body, reporting the request URL on failure.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| LakeflowError::decode(self.url.as_str(), e))
    }
}

/// HTTP client for one connection's API.
pub struct ApiClient {
    http: Client,
    endpoint: Url,
    credentials: Credentials,
    rate_limit: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl ApiClient {
    pub fn new(connection: &Connection, config: &HttpConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.timeout)
            .build()
            .map_err(|e| LakeflowError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            endpoint: connection.endpoint.clone(),
            credentials: connection.credentials.clone(),
            rate_limit: config.rate_limit,
            last_request: Mutex::new(None),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Resolve `path` against the endpoint and append `query`.
    pub fn url_for(&self, path: &str, query: &[(String, String)]) -> Result<Url> {
        let mut url = self
            .endpoint
            .join(path.trim_start_matches('/'))
            .map_err(|e| LakeflowError::validation(format!("invalid request path `{path}`: {e}")))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query.iter());
        }
        Ok(url)
    }

    /// GET `path` with `query`, returning the body of a 2xx response.
    pub async fn get(&self, path: &str, query: &[(String, String)]) -> Result<ApiResponse> {
        let url = self.url_for(path, query)?;
        self.throttle().await;
        debug!(%url, "GET");

        let request = match &self.credentials {
            Credentials::None => self.http.get(url.clone()),
            Credentials::Basic { username, password } => {
                self.http.get(url.clone()).basic_auth(username, Some(password))
            }
            Credentials::Token(token) => self.http.get(url.clone()).bearer_auth(token),
        };

        let response = request
            .send()
            .await
            .map_err(|e| LakeflowError::Network(format!("{url}: {e}")))?;
        classify_status(response.status(), &url)?;

        let body = response
            .bytes()
            .await
            .map_err(|e| LakeflowError::Network(format!("{url}: body read failed: {e}")))?;

        Ok(ApiResponse {
            url,
            body: body.to_vec(),
        })
    }

    /// GET and decode a JSON body.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(String, String)],
    ) -> Result<T> {
        self.get(path, query).await?.json()
    }

    async fn throttle(&self) {
        if self.rate_limit.is_zero() {
            return;
        }
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.rate_limit {
                tokio::time::sleep(self.rate_limit - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// Map an HTTP status onto the error taxonomy.
pub fn classify_status(status: StatusCode, url: &Url) -> Result<()> {
    match status {
        s if s.is_success() => Ok(()),
        StatusCode::UNAUTHORIZED => Err(LakeflowError::Authentication {
            url: url.to_string(),
        }),
        StatusCode::NOT_FOUND => Err(LakeflowError::NotFound {
            url: url.to_string(),
        }),
        s => Err(LakeflowError::Network(format!("{url}: HTTP {s}"))),
    }
}
