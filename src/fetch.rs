//! HTTP retrieval of the thread page and of post images.
//!
//! No retries happen here; a failed request is reported once and the caller
//! decides what to do with it.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;
use tracing::debug;

/// Failure to retrieve a URL.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("{url} returned non-image content type {content_type}")]
    NotAnImage { url: String, content_type: String },
}

/// Failure to download a single post image.
#[derive(Debug, Error)]
#[error("failed to download image: {0}")]
pub struct MediaFetchError(#[from] pub FetchError);

/// An image downloaded for attachment to a media group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedImage {
    pub url: String,
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Source of the raw thread document.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Fetch the document at `url` as text.
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

/// Source of post image bytes.
#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn download(&self, url: &str) -> Result<DownloadedImage, MediaFetchError>;
}

/// reqwest-backed fetcher for both pages and images.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Build a fetcher with the given request timeout and user agent.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()?;
        Ok(Self { client })
    }

    /// Wrap an existing client.
    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| transport(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl DocumentSource for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        debug!(url = %url, "Fetching thread page");
        let response = self.get(url).await?;
        response.text().await.map_err(|e| transport(url, e))
    }
}

#[async_trait]
impl ImageSource for HttpFetcher {
    async fn download(&self, url: &str) -> Result<DownloadedImage, MediaFetchError> {
        debug!(url = %url, "Downloading image");
        let response = self.get(url).await?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string);
        if let Some(ct) = content_type.as_deref() {
            if !ct.to_ascii_lowercase().starts_with("image/") {
                return Err(FetchError::NotAnImage {
                    url: url.to_string(),
                    content_type: ct.to_string(),
                }
                .into());
            }
        }

        let bytes = response.bytes().await.map_err(|e| transport(url, e))?;
        Ok(DownloadedImage {
            url: url.to_string(),
            file_name: file_name_from_url(url),
            content_type,
            bytes: bytes.to_vec(),
        })
    }
}

fn transport(url: &str, source: reqwest::Error) -> FetchError {
    FetchError::Transport {
        url: url.to_string(),
        source: source.without_url(),
    }
}

/// Last path segment of the URL, or `image` when there is none.
fn file_name_from_url(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segments| segments.next_back().map(ToString::to_string))
        })
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "image".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_from_url() {
        assert_eq!(
            file_name_from_url("https://img.example.com/a/b/photo.jpg?size=large"),
            "photo.jpg"
        );
        assert_eq!(file_name_from_url("https://img.example.com/"), "image");
        assert_eq!(file_name_from_url("not a url"), "image");
    }
}
