//! Fetch, extract, deduplicate and dispatch.
//!
//! A run must not overlap with another run against the same checkpoint.
//! Deployments that may start several processes need an external lock.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::checkpoint::{CheckpointError, CheckpointStore, FileCheckpointStore};
use crate::config::Config;
use crate::fetch::{DocumentSource, FetchError, HttpFetcher};
use crate::forum::{Extractor, ImageFilter, MarkupClasses, PostId, Selectors};
use crate::notify::{Notifier, TelegramTransport};

/// What to do with the checkpoint when a post's notification fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckpointPolicy {
    /// Record the post as handled anyway; the notification may be lost.
    #[default]
    AdvanceOnFailure,
    /// Keep the checkpoint and stop the run; the post is retried next run.
    ///
    /// A retry repeats the whole post. When only the media group failed, the
    /// text message was already delivered and is sent again.
    HoldOnFailure,
}

/// Errors that abort a run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to fetch thread page: {0}")]
    Fetch(#[from] FetchError),
    #[error("checkpoint unavailable: {0}")]
    Checkpoint(#[from] CheckpointError),
}

/// Outcome of one [`Pipeline::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Posts found on the page.
    pub extracted: usize,
    /// New posts for which the checkpoint was advanced.
    pub dispatched: usize,
    /// New posts whose notification failed.
    pub notify_failures: usize,
    /// No checkpoint existed, so nothing was dispatched.
    pub baseline_only: bool,
    /// The run stopped early under [`CheckpointPolicy::HoldOnFailure`].
    pub halted: bool,
}

/// Outcome of [`Pipeline::seed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeedOutcome {
    Seeded(PostId),
    AlreadySeeded(PostId),
    NoPosts,
}

pub struct Pipeline {
    page_url: String,
    source: Arc<dyn DocumentSource>,
    extractor: Extractor,
    checkpoint: Arc<dyn CheckpointStore>,
    notifier: Notifier,
    policy: CheckpointPolicy,
}

impl Pipeline {
    #[must_use]
    pub fn new(
        page_url: impl Into<String>,
        source: Arc<dyn DocumentSource>,
        extractor: Extractor,
        checkpoint: Arc<dyn CheckpointStore>,
        notifier: Notifier,
    ) -> Self {
        Self {
            page_url: page_url.into(),
            source,
            extractor,
            checkpoint,
            notifier,
            policy: CheckpointPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: CheckpointPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Wire the HTTP fetcher, file checkpoint and Telegram transport from `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client cannot be built or the markup
    /// classes or base URL are invalid.
    pub fn from_config(config: &Config) -> Result<Self> {
        let fetcher = Arc::new(
            HttpFetcher::new(config.http_timeout, &config.user_agent)
                .context("Failed to build HTTP client")?,
        );

        let classes = MarkupClasses {
            container: config.post_container_class.clone(),
            content: config.post_content_class.clone(),
            controls: config.post_controls_class.clone(),
            quote_block: config.quote_block_class.clone(),
            permalink: config.permalink_class.clone(),
        };
        let selectors = Selectors::compile(&classes).context("Invalid markup classes")?;
        let extractor = Extractor::new(
            selectors,
            &config.base_url,
            ImageFilter::new(&config.excluded_image_hosts),
        )
        .context("Invalid base URL")?;

        let telegram_http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .context("Failed to build Telegram HTTP client")?;
        let transport = TelegramTransport::new(
            telegram_http,
            &config.telegram_api_url,
            &config.telegram_bot_token,
        )
        .with_link_preview_disabled(config.disable_link_preview);

        let notifier = Notifier::new(
            Arc::new(transport),
            fetcher.clone(),
            config.telegram_chat_id.clone(),
            config.message_format,
        );

        Ok(Self::new(
            config.thread_url.clone(),
            fetcher,
            extractor,
            Arc::new(FileCheckpointStore::new(&config.checkpoint_path)),
            notifier,
        )
        .with_policy(config.checkpoint_policy))
    }

    /// Dispatch every post newer than the checkpoint, in page order.
    ///
    /// The checkpoint is re-read before each post. Without a checkpoint
    /// nothing is dispatched and nothing is written.
    ///
    /// # Errors
    ///
    /// Returns an error if the page cannot be fetched or the checkpoint
    /// cannot be read or written. Notification failures are not errors.
    pub async fn run(&self) -> Result<RunReport, PipelineError> {
        let document = self.source.fetch(&self.page_url).await?;
        let posts = self.extractor.extract(&document);

        let mut report = RunReport {
            extracted: posts.len(),
            ..RunReport::default()
        };

        for post in &posts {
            let Some(checkpoint) = self.checkpoint.read().await? else {
                if !report.baseline_only {
                    warn!(
                        "No checkpoint stored; nothing will be dispatched until one is seeded \
                         (run `forum-post-relay seed` or write a post number to the checkpoint file)"
                    );
                }
                report.baseline_only = true;
                continue;
            };

            if post.id <= checkpoint {
                continue;
            }

            info!(post_id = %post.id, checkpoint = %checkpoint, "New post found");
            if let Err(e) = self.notifier.notify(post).await {
                report.notify_failures += 1;
                error!(post_id = %post.id, "Failed to notify post: {e}");
                if self.policy == CheckpointPolicy::HoldOnFailure {
                    warn!(post_id = %post.id, "Holding checkpoint; post will be retried next run");
                    report.halted = true;
                    break;
                }
            }

            self.checkpoint.write(&post.id).await?;
            report.dispatched += 1;
            debug!(post_id = %post.id, "Checkpoint advanced");
        }

        Ok(report)
    }

    /// Write the highest post number on the page to an absent checkpoint.
    ///
    /// An existing checkpoint is never overwritten and nothing is dispatched.
    ///
    /// # Errors
    ///
    /// Returns an error if the page cannot be fetched or the checkpoint
    /// cannot be read or written.
    pub async fn seed(&self) -> Result<SeedOutcome, PipelineError> {
        if let Some(existing) = self.checkpoint.read().await? {
            info!(checkpoint = %existing, "Checkpoint already present, not seeding");
            return Ok(SeedOutcome::AlreadySeeded(existing));
        }

        let document = self.source.fetch(&self.page_url).await?;
        let Some(latest) = self
            .extractor
            .extract(&document)
            .into_iter()
            .map(|post| post.id)
            .max()
        else {
            warn!("No posts found on page, checkpoint not seeded");
            return Ok(SeedOutcome::NoPosts);
        };

        self.checkpoint.write(&latest).await?;
        info!(checkpoint = %latest, "Checkpoint seeded");
        Ok(SeedOutcome::Seeded(latest))
    }
}

/// Run the pipeline forever, one run at a time, sleeping `interval` between runs.
pub async fn poll_loop(pipeline: &Pipeline, interval: Duration) {
    loop {
        match pipeline.run().await {
            Ok(report) if report.dispatched > 0 => {
                info!(
                    dispatched = report.dispatched,
                    notify_failures = report.notify_failures,
                    "Dispatched new posts"
                );
            }
            Ok(report) => debug!(extracted = report.extracted, "No new posts"),
            Err(e) => error!("Run failed: {e}"),
        }

        tokio::time::sleep(interval).await;
    }
}
