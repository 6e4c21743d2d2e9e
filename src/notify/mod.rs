//! Turning posts into outbound messages.

mod render;
mod telegram;
mod traits;

use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{info, warn};

use crate::fetch::{DownloadedImage, ImageSource};
use crate::forum::Post;

pub use render::{media_caption, render_message};
pub use telegram::TelegramTransport;
pub use traits::{MessageFormat, MessageTransport, NotifyError};

/// What happened to a post's images during [`Notifier::notify`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotifyReport {
    pub images_sent: usize,
    pub images_failed: usize,
}

/// Sends a post's media group and text message to one destination.
#[derive(Clone)]
pub struct Notifier {
    transport: Arc<dyn MessageTransport>,
    images: Arc<dyn ImageSource>,
    destination: String,
    format: MessageFormat,
}

impl Notifier {
    #[must_use]
    pub fn new(
        transport: Arc<dyn MessageTransport>,
        images: Arc<dyn ImageSource>,
        destination: impl Into<String>,
        format: MessageFormat,
    ) -> Self {
        Self {
            transport,
            images,
            destination: destination.into(),
            format,
        }
    }

    /// Deliver `post`: its images as one media group (when any download), then its text.
    ///
    /// The text message is attempted even when the media group fails.
    ///
    /// # Errors
    ///
    /// Returns the text send error, or the media group error when only that
    /// failed. In the second case the text has already been delivered.
    pub async fn notify(&self, post: &Post) -> Result<NotifyReport, NotifyError> {
        let mut report = NotifyReport::default();
        let mut media_error = None;

        if !post.images.is_empty() {
            let downloaded = self.download_images(post).await;
            report.images_failed = post.images.len() - downloaded.len();

            if downloaded.is_empty() {
                warn!(post_id = %post.id, "All image downloads failed, sending text only");
            } else {
                let caption = media_caption(post);
                match self
                    .transport
                    .send_media_group(&self.destination, &downloaded, &caption)
                    .await
                {
                    Ok(()) => report.images_sent = downloaded.len(),
                    Err(e) => {
                        warn!(post_id = %post.id, "Failed to send media group: {e}");
                        media_error = Some(e);
                    }
                }
            }
        }

        let text = render_message(post, self.format);
        self.transport
            .send_text(&self.destination, &text, self.format)
            .await?;

        if let Some(e) = media_error {
            return Err(e);
        }

        info!(
            post_id = %post.id,
            images_sent = report.images_sent,
            images_failed = report.images_failed,
            "Post delivered"
        );
        Ok(report)
    }

    /// Download all images concurrently, keeping page order and dropping failures.
    async fn download_images(&self, post: &Post) -> Vec<DownloadedImage> {
        let results = join_all(post.images.iter().map(|url| self.images.download(url))).await;

        results
            .into_iter()
            .zip(&post.images)
            .filter_map(|(result, url)| match result {
                Ok(image) => Some(image),
                Err(e) => {
                    warn!(post_id = %post.id, url = %url, "Skipping image: {e}");
                    None
                }
            })
            .collect()
    }
}
