use async_trait::async_trait;
use thiserror::Error;

use crate::fetch::DownloadedImage;

/// How the text payload of a message is interpreted by the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageFormat {
    #[default]
    Plain,
    /// Telegram MarkdownV2.
    Markdown,
    Html,
}

/// Failure to deliver a message.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("{method} request failed: {source}")]
    Transport {
        method: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{method} rejected with HTTP {status}: {description}")]
    Rejected {
        method: &'static str,
        status: u16,
        description: String,
    },
    #[error("failed to encode {method} payload: {source}")]
    Encode {
        method: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Outbound messaging capability.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Send a text message to `destination`.
    async fn send_text(
        &self,
        destination: &str,
        text: &str,
        format: MessageFormat,
    ) -> Result<(), NotifyError>;

    /// Send `items` as one grouped attachment sharing `caption`.
    async fn send_media_group(
        &self,
        destination: &str,
        items: &[DownloadedImage],
        caption: &str,
    ) -> Result<(), NotifyError>;
}
