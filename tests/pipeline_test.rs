//! Dispatch pipeline behaviour with in-memory collaborators.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use forum_post_relay::checkpoint::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
use forum_post_relay::fetch::{
    DocumentSource, DownloadedImage, FetchError, ImageSource, MediaFetchError,
};
use forum_post_relay::forum::{Extractor, ImageFilter, MarkupClasses, PostId, Selectors};
use forum_post_relay::notify::{MessageFormat, MessageTransport, Notifier, NotifyError};
use forum_post_relay::pipeline::{CheckpointPolicy, Pipeline, PipelineError, SeedOutcome};
use tempfile::TempDir;

struct StaticPage(Option<String>);

#[async_trait]
impl DocumentSource for StaticPage {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        self.0.clone().ok_or_else(|| FetchError::Status {
            url: url.to_string(),
            status: 503,
        })
    }
}

struct StubImages {
    fail: bool,
}

#[async_trait]
impl ImageSource for StubImages {
    async fn download(&self, url: &str) -> Result<DownloadedImage, MediaFetchError> {
        if self.fail {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: 404,
            }
            .into());
        }
        Ok(DownloadedImage {
            url: url.to_string(),
            file_name: "image.jpg".to_string(),
            content_type: Some("image/jpeg".to_string()),
            bytes: vec![0xFF, 0xD8, 0xFF],
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Sent {
    Text(String),
    Media { caption: String, count: usize },
}

#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<Sent>>,
    fail_text: bool,
    fail_media: bool,
}

impl RecordingTransport {
    fn failing() -> Self {
        Self {
            fail_text: true,
            ..Self::default()
        }
    }

    fn failing_media() -> Self {
        Self {
            fail_media: true,
            ..Self::default()
        }
    }

    fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    fn texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Text(text) => Some(text),
                Sent::Media { .. } => None,
            })
            .collect()
    }
}

#[async_trait]
impl MessageTransport for RecordingTransport {
    async fn send_text(
        &self,
        _destination: &str,
        text: &str,
        _format: MessageFormat,
    ) -> Result<(), NotifyError> {
        if self.fail_text {
            return Err(NotifyError::Rejected {
                method: "sendMessage",
                status: 400,
                description: "Bad Request: chat not found".to_string(),
            });
        }
        self.sent.lock().unwrap().push(Sent::Text(text.to_string()));
        Ok(())
    }

    async fn send_media_group(
        &self,
        _destination: &str,
        items: &[DownloadedImage],
        caption: &str,
    ) -> Result<(), NotifyError> {
        if self.fail_media {
            return Err(NotifyError::Rejected {
                method: "sendMediaGroup",
                status: 400,
                description: "Bad Request: wrong file identifier".to_string(),
            });
        }
        self.sent.lock().unwrap().push(Sent::Media {
            caption: caption.to_string(),
            count: items.len(),
        });
        Ok(())
    }
}

fn id(s: &str) -> PostId {
    s.parse().unwrap()
}

fn post(id: &str, content: &str) -> String {
    format!(
        r#"<li class="postcontainer">
             <span class="nodecontrols"><a class="postcounter" href="showthread.php?p={id}">#{id}</a></span>
             <div class="postrow">{content}</div>
           </li>"#
    )
}

fn page(posts: &[String]) -> String {
    format!("<html><body><ol>{}</ol></body></html>", posts.concat())
}

fn simple_page(ids: &[&str]) -> String {
    let posts: Vec<String> = ids
        .iter()
        .map(|id| post(id, &format!("post number {id}")))
        .collect();
    page(&posts)
}

fn extractor() -> Extractor {
    Extractor::new(
        Selectors::compile(&MarkupClasses::default()).unwrap(),
        "https://forum.example.com/",
        ImageFilter::default(),
    )
    .unwrap()
}

fn pipeline(
    html: Option<String>,
    checkpoint: Arc<dyn CheckpointStore>,
    transport: Arc<RecordingTransport>,
    images_fail: bool,
) -> Pipeline {
    let notifier = Notifier::new(
        transport,
        Arc::new(StubImages { fail: images_fail }),
        "42",
        MessageFormat::Plain,
    );
    Pipeline::new(
        "https://forum.example.com/threads/1-deals/page9",
        Arc::new(StaticPage(html)),
        extractor(),
        checkpoint,
        notifier,
    )
}

#[tokio::test]
async fn test_rerun_with_unchanged_page_dispatches_nothing() {
    let store = Arc::new(MemoryCheckpointStore::new(Some(id("5"))));
    let transport = Arc::new(RecordingTransport::default());
    let pipeline = pipeline(Some(simple_page(&["5", "7", "9"])), store.clone(), transport.clone(), false);

    let first = pipeline.run().await.unwrap();
    assert_eq!(first.dispatched, 2);

    let second = pipeline.run().await.unwrap();
    assert_eq!(second.dispatched, 0);
    assert_eq!(second.extracted, 3);
    assert_eq!(transport.texts().len(), 2);
    assert_eq!(store.get().await, Some(id("9")));
}

#[tokio::test]
async fn test_new_posts_dispatched_in_page_order() {
    let store = Arc::new(MemoryCheckpointStore::new(Some(id("100"))));
    let transport = Arc::new(RecordingTransport::default());
    let pipeline = pipeline(
        Some(simple_page(&["100", "101", "102", "103"])),
        store.clone(),
        transport.clone(),
        false,
    );

    let report = pipeline.run().await.unwrap();

    assert_eq!(report.dispatched, 3);
    let texts = transport.texts();
    assert!(texts[0].starts_with("ID: 101"));
    assert!(texts[1].starts_with("ID: 102"));
    assert!(texts[2].starts_with("ID: 103"));
    assert_eq!(store.get().await, Some(id("103")));
}

#[tokio::test]
async fn test_out_of_order_page_rechecks_checkpoint_per_post() {
    let store = Arc::new(MemoryCheckpointStore::new(Some(id("8"))));
    let transport = Arc::new(RecordingTransport::default());
    let pipeline = pipeline(Some(simple_page(&["9", "7", "11"])), store.clone(), transport.clone(), false);

    let report = pipeline.run().await.unwrap();

    assert_eq!(report.dispatched, 2);
    let texts = transport.texts();
    assert_eq!(texts.len(), 2);
    assert!(texts[0].starts_with("ID: 9\n"));
    assert!(texts[1].starts_with("ID: 11\n"));
    assert_eq!(store.get().await, Some(id("11")));
}

#[tokio::test]
async fn test_post_below_advanced_checkpoint_is_skipped() {
    // 9 is above the stored 8 but below 10, which is written first.
    let store = Arc::new(MemoryCheckpointStore::new(Some(id("8"))));
    let transport = Arc::new(RecordingTransport::default());
    let pipeline = pipeline(Some(simple_page(&["10", "9", "11"])), store.clone(), transport.clone(), false);

    let report = pipeline.run().await.unwrap();

    assert_eq!(report.dispatched, 2);
    let texts = transport.texts();
    assert_eq!(texts.len(), 2);
    assert!(texts[0].starts_with("ID: 10\n"));
    assert!(texts[1].starts_with("ID: 11\n"));
    assert_eq!(store.get().await, Some(id("11")));
}

#[tokio::test]
async fn test_post_equal_to_checkpoint_is_not_dispatched() {
    let store = Arc::new(MemoryCheckpointStore::new(Some(id("9"))));
    let transport = Arc::new(RecordingTransport::default());
    let pipeline = pipeline(Some(simple_page(&["8", "9", "10"])), store.clone(), transport.clone(), false);

    let report = pipeline.run().await.unwrap();

    assert_eq!(report.dispatched, 1);
    assert_eq!(transport.texts().len(), 1);
    assert!(transport.texts()[0].starts_with("ID: 10"));
}

#[tokio::test]
async fn test_ids_compare_numerically() {
    let store = Arc::new(MemoryCheckpointStore::new(Some(id("99"))));
    let transport = Arc::new(RecordingTransport::default());
    let pipeline = pipeline(Some(simple_page(&["98", "100"])), store.clone(), transport.clone(), false);

    let report = pipeline.run().await.unwrap();

    assert_eq!(report.dispatched, 1);
    assert_eq!(store.get().await, Some(id("100")));
}

#[tokio::test]
async fn test_missing_checkpoint_dispatches_nothing() {
    let store = Arc::new(MemoryCheckpointStore::new(None));
    let transport = Arc::new(RecordingTransport::default());
    let pipeline = pipeline(Some(simple_page(&["5", "7", "9"])), store.clone(), transport.clone(), false);

    let report = pipeline.run().await.unwrap();

    assert_eq!(report.dispatched, 0);
    assert!(report.baseline_only);
    assert!(transport.sent().is_empty());
    assert_eq!(store.get().await, None);
}

#[tokio::test]
async fn test_failed_image_downloads_still_send_text_and_advance() {
    let store = Arc::new(MemoryCheckpointStore::new(Some(id("10"))));
    let transport = Arc::new(RecordingTransport::default());
    let html = page(&[post(
        "11",
        r#"Two photos <img src="https://img.example.com/a.jpg"/><img src="https://img.example.com/b.jpg"/>"#,
    )]);
    let pipeline = pipeline(Some(html), store.clone(), transport.clone(), true);

    let report = pipeline.run().await.unwrap();

    assert_eq!(report.dispatched, 1);
    assert_eq!(report.notify_failures, 0);
    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert!(matches!(&sent[0], Sent::Text(text) if text.starts_with("ID: 11")));
    assert_eq!(store.get().await, Some(id("11")));
}

#[tokio::test]
async fn test_hold_policy_resends_text_after_media_failure() {
    let store = Arc::new(MemoryCheckpointStore::new(Some(id("10"))));
    let transport = Arc::new(RecordingTransport::failing_media());
    let html = page(&[post("11", r#"Photo <img src="https://img.example.com/a.jpg"/>"#)]);
    let pipeline = pipeline(Some(html), store.clone(), transport.clone(), false)
        .with_policy(CheckpointPolicy::HoldOnFailure);

    let first = pipeline.run().await.unwrap();
    assert!(first.halted);
    assert_eq!(transport.texts().len(), 1);
    assert_eq!(store.get().await, Some(id("10")));

    // The text went out, but the post is retried whole.
    let second = pipeline.run().await.unwrap();
    assert!(second.halted);
    assert_eq!(transport.texts().len(), 2);
    assert_eq!(store.get().await, Some(id("10")));
}

#[tokio::test]
async fn test_media_group_sent_before_text() {
    let store = Arc::new(MemoryCheckpointStore::new(Some(id("10"))));
    let transport = Arc::new(RecordingTransport::default());
    let html = page(&[post(
        "11",
        r#"<img src="https://img.example.com/a.jpg"/><img src="/attachment.php?id=3"/>"#,
    )]);
    let pipeline = pipeline(Some(html), store, transport.clone(), false);

    pipeline.run().await.unwrap();

    let sent = transport.sent();
    assert_eq!(
        sent[0],
        Sent::Media {
            caption: "ID: 11".to_string(),
            count: 2
        }
    );
    assert!(matches!(&sent[1], Sent::Text(_)));
}

#[tokio::test]
async fn test_fetch_failure_leaves_checkpoint_untouched() {
    let store = Arc::new(MemoryCheckpointStore::new(Some(id("10"))));
    let transport = Arc::new(RecordingTransport::default());
    let pipeline = pipeline(None, store.clone(), transport.clone(), false);

    let err = pipeline.run().await.unwrap_err();

    assert!(matches!(err, PipelineError::Fetch(_)));
    assert_eq!(store.get().await, Some(id("10")));
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn test_notify_failure_advances_checkpoint_by_default() {
    let store = Arc::new(MemoryCheckpointStore::new(Some(id("5"))));
    let transport = Arc::new(RecordingTransport::failing());
    let pipeline = pipeline(Some(simple_page(&["6", "7"])), store.clone(), transport, false);

    let report = pipeline.run().await.unwrap();

    assert_eq!(report.notify_failures, 2);
    assert_eq!(report.dispatched, 2);
    assert!(!report.halted);
    assert_eq!(store.get().await, Some(id("7")));
}

#[tokio::test]
async fn test_hold_policy_keeps_checkpoint_on_failure() {
    let store = Arc::new(MemoryCheckpointStore::new(Some(id("5"))));
    let transport = Arc::new(RecordingTransport::failing());
    let pipeline = pipeline(Some(simple_page(&["6", "7"])), store.clone(), transport, false)
        .with_policy(CheckpointPolicy::HoldOnFailure);

    let report = pipeline.run().await.unwrap();

    assert_eq!(report.notify_failures, 1);
    assert_eq!(report.dispatched, 0);
    assert!(report.halted);
    assert_eq!(store.get().await, Some(id("5")));
}

#[tokio::test]
async fn test_corrupt_checkpoint_aborts_run() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("last_id.txt");
    std::fs::write(&path, "not a number").unwrap();
    let transport = Arc::new(RecordingTransport::default());
    let pipeline = pipeline(
        Some(simple_page(&["5", "7"])),
        Arc::new(FileCheckpointStore::new(&path)),
        transport.clone(),
        false,
    );

    let err = pipeline.run().await.unwrap_err();

    assert!(matches!(err, PipelineError::Checkpoint(_)));
    assert!(transport.sent().is_empty());
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "not a number");
}

#[tokio::test]
async fn test_seed_writes_latest_id_once() {
    let store = Arc::new(MemoryCheckpointStore::new(None));
    let transport = Arc::new(RecordingTransport::default());
    let pipeline = pipeline(Some(simple_page(&["5", "9", "7"])), store.clone(), transport.clone(), false);

    assert_eq!(pipeline.seed().await.unwrap(), SeedOutcome::Seeded(id("9")));
    assert_eq!(store.get().await, Some(id("9")));

    assert_eq!(pipeline.seed().await.unwrap(), SeedOutcome::AlreadySeeded(id("9")));
    assert!(transport.sent().is_empty());

    let report = pipeline.run().await.unwrap();
    assert_eq!(report.dispatched, 0);
}

#[tokio::test]
async fn test_seed_without_posts() {
    let store = Arc::new(MemoryCheckpointStore::new(None));
    let transport = Arc::new(RecordingTransport::default());
    let pipeline = pipeline(Some(page(&[])), store.clone(), transport, false);

    assert_eq!(pipeline.seed().await.unwrap(), SeedOutcome::NoPosts);
    assert_eq!(store.get().await, None);
}
