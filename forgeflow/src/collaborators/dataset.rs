//! Dataset download with per-URL retries and fallback mirrors.

use crate::errors::DatasetError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// A completed download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetDownload {
    /// Mirror the file came from.
    pub url: String,
    /// Bytes written.
    pub bytes: u64,
    /// Requests made across all mirrors.
    pub attempts: u32,
}

/// Fetches the dataset served by generated apps.
#[async_trait]
pub trait DatasetSource: Send + Sync {
    /// Downloads the first reachable URL in `urls` to `dest`.
    async fn download(&self, urls: &[String], dest: &Path) -> Result<DatasetDownload, DatasetError>;
}

/// Downloads over HTTP.
///
/// An HTTP error status is retried against the same URL; a connection or
/// body error moves straight on to the next mirror.
#[derive(Debug, Clone)]
pub struct HttpDatasetSource {
    http: reqwest::Client,
    retries: u32,
    retry_delay: Duration,
    request_timeout: Duration,
}

impl Default for HttpDatasetSource {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpDatasetSource {
    /// Three attempts per URL, two seconds apart.
    #[must_use]
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            retries: 3,
            retry_delay: Duration::from_secs(2),
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Sets attempts per URL and the pause between them.
    #[must_use]
    pub fn with_retries(mut self, retries: u32, delay: Duration) -> Self {
        self.retries = retries.max(1);
        self.retry_delay = delay;
        self
    }

    /// Uses `client` for requests.
    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

enum Attempt {
    Done(Vec<u8>),
    Retry(String),
    NextMirror(String),
}

impl HttpDatasetSource {
    async fn fetch_once(&self, url: &str) -> Attempt {
        let response = match self.http.get(url).timeout(self.request_timeout).send().await {
            Ok(r) => r,
            Err(e) => return Attempt::NextMirror(e.to_string()),
        };
        let status = response.status();
        if !status.is_success() {
            return Attempt::Retry(format!("HTTP {status}"));
        }
        match response.bytes().await {
            Ok(body) => Attempt::Done(body.to_vec()),
            Err(e) => Attempt::NextMirror(e.to_string()),
        }
    }
}

#[async_trait]
impl DatasetSource for HttpDatasetSource {
    async fn download(&self, urls: &[String], dest: &Path) -> Result<DatasetDownload, DatasetError> {
        let mut attempts = 0;
        let mut last_error = "no dataset URLs configured".to_string();

        for url in urls {
            for attempt in 1..=self.retries {
                attempts += 1;
                match self.fetch_once(url).await {
                    Attempt::Done(body) => {
                        if let Some(parent) = dest.parent() {
                            std::fs::create_dir_all(parent).map_err(|e| DatasetError {
                                message: format!("cannot create {}: {e}", parent.display()),
                            })?;
                        }
                        std::fs::write(dest, &body).map_err(|e| DatasetError {
                            message: format!("cannot write {}: {e}", dest.display()),
                        })?;
                        info!(url = %url, path = %dest.display(), bytes = body.len(), "Dataset downloaded");
                        return Ok(DatasetDownload {
                            url: url.clone(),
                            bytes: body.len() as u64,
                            attempts,
                        });
                    }
                    Attempt::Retry(reason) => {
                        warn!(url = %url, attempt, retries = self.retries, reason = %reason, "Dataset download failed");
                        last_error = format!("{url}: {reason}");
                        if attempt < self.retries {
                            tokio::time::sleep(self.retry_delay).await;
                        }
                    }
                    Attempt::NextMirror(reason) => {
                        warn!(url = %url, reason = %reason, "Dataset mirror unreachable");
                        last_error = format!("{url}: {reason}");
                        break;
                    }
                }
            }
        }

        Err(DatasetError {
            message: format!("all dataset URLs failed; last error: {last_error}"),
        })
    }
}
