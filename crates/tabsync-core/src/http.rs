//! HTTP transport for views backed by a JSON REST endpoint.

use anyhow::{Context, Result};
use reqwest::{header, Client, Response};
use serde_json::Value;
use tracing::debug;

use crate::config::{AppConfig, ViewEntry};
use crate::error::FetchError;
use crate::views::{FetchFuture, Fetcher};

/// Shared HTTP client for every view of one backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpClient {
    /// No client-level timeout is set; the retry executor times each attempt.
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let client = Self::new(&config.base_url)?;
        Ok(match &config.token {
            Some(token) => client.with_token(token.clone()),
            None => client,
        })
    }

    /// Same connection pool, different bearer token.
    pub fn with_token(&self, token: String) -> Self {
        Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            token: Some(token),
        }
    }

    pub fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// Fetcher for the endpoint of one configured view.
    pub fn for_view(&self, entry: &ViewEntry) -> HttpFetcher {
        HttpFetcher {
            client: self.clone(),
            url: self.url(&entry.path),
        }
    }

    pub async fn get_json(&self, url: &str) -> Result<Value, FetchError> {
        let mut request = self
            .client
            .get(url)
            .header(header::ACCEPT, "application/json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        debug!(url = url, "GET");
        let response = request.send().await.map_err(transport_error)?;
        let response = check_response(response).await?;
        response
            .json::<Value>()
            .await
            .map_err(|e| FetchError::malformed(format!("invalid JSON from {}: {}", url, e)))
    }
}

/// Check if response is successful, returning an error with body if not.
async fn check_response(response: Response) -> Result<Response, FetchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(FetchError::from_status(status.as_u16(), &body))
}

fn transport_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::timeout(e.to_string())
    } else if e.is_decode() {
        FetchError::malformed(e.to_string())
    } else {
        FetchError::network(e.to_string())
    }
}

#[derive(Clone)]
pub struct HttpFetcher {
    client: HttpClient,
    url: String,
}

impl HttpFetcher {
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self) -> FetchFuture {
        let client = self.client.clone();
        let url = self.url.clone();
        Box::pin(async move { client.get_json(&url).await })
    }
}
