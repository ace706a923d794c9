use crate::models::DownloadSettings;
use camino::Utf8Path;
use std::io::Cursor;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DownloadError {
    /// The server answered with an error status. Retried.
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    /// The request never produced a response. Not retried.
    #[error("Request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to extract archive from {url}: {source}")]
    Extract {
        url: String,
        #[source]
        source: zip::result::ZipError,
    },
}

impl DownloadError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Status { .. })
    }
}

/// Attempt count and doubling backoff for downloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_delay: Duration,
}

impl RetryPolicy {
    /// Delays slept between consecutive attempts.
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        let initial = self.initial_delay;
        (0..self.attempts.saturating_sub(1)).map(move |n| initial * 2u32.pow(n))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&DownloadSettings::default())
    }
}

impl From<&DownloadSettings> for RetryPolicy {
    fn from(settings: &DownloadSettings) -> Self {
        Self {
            attempts: settings.attempts.max(1),
            initial_delay: Duration::from_secs(settings.initial_delay_secs),
        }
    }
}

/// Run `attempt` until it succeeds, sleeping per `policy` after retryable errors.
///
/// The last error is returned once attempts are exhausted; errors that are
/// not retryable are returned immediately.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: RetryPolicy,
    what: &str,
    mut attempt: F,
) -> Result<T, DownloadError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DownloadError>>,
{
    let mut delays = policy.delays();

    loop {
        let error = match attempt().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_retryable() => error,
            Err(error) => return Err(error),
        };

        let Some(delay) = delays.next() else {
            return Err(error);
        };

        tracing::warn!("{}; waiting {} seconds", error, delay.as_secs());
        tokio::time::sleep(delay).await;
        tracing::info!("Retrying: {}", what);
    }
}

/// Source of response bodies.
#[allow(async_fn_in_trait)]
pub trait Fetch {
    async fn get(&self, url: &str) -> Result<Vec<u8>, DownloadError>;
}

/// Fetches over HTTP(S).
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Fetch for HttpFetcher {
    async fn get(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
        let transport = |source| DownloadError::Transport {
            url: url.to_string(),
            source,
        };

        let response = self.client.get(url).send().await.map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let bytes = response.bytes().await.map_err(transport)?;
        Ok(bytes.to_vec())
    }
}

/// Downloads source archives with retry and unpacks them in memory.
#[derive(Debug, Clone)]
pub struct Downloader<F> {
    fetcher: F,
    policy: RetryPolicy,
}

impl<F: Fetch> Downloader<F> {
    pub fn new(fetcher: F, policy: RetryPolicy) -> Self {
        Self { fetcher, policy }
    }

    pub async fn download(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
        tracing::info!("Downloading: {}", url);
        retry_with_backoff(self.policy, url, || self.fetcher.get(url)).await
    }

    /// Download the zip at `url` and extract it below `destination`.
    pub async fn download_and_extract(
        &self,
        url: &str,
        destination: &Utf8Path,
    ) -> Result<(), DownloadError> {
        let body = self.download(url).await?;
        extract_zip(body, destination).map_err(|source| DownloadError::Extract {
            url: url.to_string(),
            source,
        })?;
        tracing::info!("Extracted {} into {}", url, destination);
        Ok(())
    }
}

/// Extract a zip archive held in memory.
pub fn extract_zip(body: Vec<u8>, destination: &Utf8Path) -> Result<(), zip::result::ZipError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(body))?;
    archive.extract(destination)
}
