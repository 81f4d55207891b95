//! HTTP client for the external email-processing service.
use std::time::Duration;

use serde_json::Value;

use crate::config::BackendConfig;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Connection refused, DNS failure or timeout.
    #[error("cannot reach {url}: {source}")]
    Unreachable { url: String, source: reqwest::Error },
    #[error("{url} returned {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("invalid response from {url}: {source}")]
    Decode { url: String, source: reqwest::Error },
}

impl BackendError {
    pub fn is_unreachable(&self) -> bool {
        matches!(self, BackendError::Unreachable { .. })
    }
}

#[derive(Clone)]
pub struct BackendClient {
    client: reqwest::Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(config: &BackendConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    #[cfg(test)]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub async fn get_json(&self, path: &str) -> Result<Value, BackendError> {
        let url = self.url(path);
        let request = self.client.get(&url);
        self.send(url, request).await
    }

    pub async fn post_json(&self, path: &str, body: Option<&Value>) -> Result<Value, BackendError> {
        let url = self.url(path);
        let mut request = self.client.post(&url);
        if let Some(body) = body {
            request = request.json(body);
        }
        self.send(url, request).await
    }

    async fn send(
        &self,
        url: String,
        request: reqwest::RequestBuilder,
    ) -> Result<Value, BackendError> {
        tracing::debug!(%url, "backend request");
        let resp = match request.send().await {
            Ok(resp) => resp,
            Err(e) => return Err(BackendError::Unreachable { url, source: e }),
        };

        let status = resp.status();
        if !status.is_success() {
            return Err(BackendError::Status { url, status });
        }

        resp.json::<Value>()
            .await
            .map_err(|e| BackendError::Decode { url, source: e })
    }
}
