//! End-to-end pipeline tests against a real SQLite catalog and a filesystem
//! object store, with the network stubbed out.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tempfile::TempDir;

use mediakeep::harvest::backfill::{BackfillCrawler, ChannelHistorySource};
use mediakeep::harvest::extract::extract_references;
use mediakeep::harvest::ingest::{IngestOutcome, MediaFetcher, MediaIngestor, MessageContext};
use mediakeep::harvest::transform::TransformConfig;
use mediakeep::harvest::{handle_message, PipelineCounts};
use mediakeep::models::{MediaKind, MediaRecord};
use mediakeep::repository::{run_migrations, AsyncSqlitePool, FailedUrlRepository, MediaRepository};
use mediakeep::storage::{FsStore, ObjectStore};

/// Serves canned bytes per URL and counts fetches. URLs with no canned
/// response fail, standing in for a dead CDN link.
struct StubFetcher {
    responses: HashMap<String, Vec<u8>>,
    calls: AtomicUsize,
}

impl StubFetcher {
    fn new(responses: HashMap<String, Vec<u8>>) -> Self {
        Self {
            responses,
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaFetcher for StubFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("404 for {url}"))
    }
}

struct Harness {
    _dir: TempDir,
    fetcher: Arc<StubFetcher>,
    store: Arc<FsStore>,
    media: MediaRepository,
    failed: FailedUrlRepository,
    ingestor: MediaIngestor,
}

async fn harness(responses: HashMap<String, Vec<u8>>) -> Harness {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("catalog.db");
    let db_url = db_path.to_string_lossy().to_string();
    run_migrations(&db_url).await.unwrap();

    let pool = AsyncSqlitePool::new(&db_url);
    let media = MediaRepository::new(pool.clone());
    let failed = FailedUrlRepository::new(pool);
    let store = Arc::new(FsStore::new(dir.path().join("objects")));
    let fetcher = Arc::new(StubFetcher::new(responses));

    let ingestor = MediaIngestor::new(
        fetcher.clone(),
        store.clone(),
        media.clone(),
        failed.clone(),
        TransformConfig::default(),
    );

    Harness {
        _dir: dir,
        fetcher,
        store,
        media,
        failed,
        ingestor,
    }
}

fn png_bytes() -> Vec<u8> {
    use image::{ImageFormat, RgbImage};
    let img = RgbImage::from_pixel(64, 48, image::Rgb([10, 200, 50]));
    let mut out = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

fn message_json(json: &str) -> mediakeep::discord::Message {
    serde_json::from_str(json).unwrap()
}

fn watched(channels: &[&str]) -> HashSet<String> {
    channels.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_attachment_stored_then_deduplicated() {
    let png = png_bytes();
    let h = harness(HashMap::from([
        ("https://cdn.test/a.png".to_string(), png.clone()),
        ("https://cdn.test/b.png".to_string(), png.clone()),
    ]))
    .await;

    let message = message_json(
        r#"{
            "id": "100",
            "channel_id": "c1",
            "content": "look",
            "attachments": [
                {"url": "https://cdn.test/a.png", "filename": "a.png",
                 "content_type": "image/png", "size": 64}
            ]
        }"#,
    );

    let counts = handle_message(&h.ingestor, &watched(&["c1"]), &message).await;
    assert_eq!(counts.stored, 1);
    assert_eq!(counts.total(), 1);

    let records = h.media.list_for_message("100").await.unwrap();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.kind, MediaKind::Image);
    assert!(record.storage_key.starts_with("c1/100_"));
    assert!(record.storage_key.ends_with("_a.png"));
    assert_eq!(record.text_content.as_deref(), Some("look"));
    assert!(record.available);
    assert!(record.content_hash.is_some());

    // Object and thumbnail both landed in the store
    assert_eq!(h.store.get(&record.storage_key).await.unwrap(), png);
    let thumb_key = record.thumbnail_key.as_ref().unwrap();
    let thumb = h.store.get(thumb_key).await.unwrap();
    assert_eq!(&thumb[..2], &[0xFF, 0xD8]);

    // Same bytes behind a different URL in a different message: duplicate,
    // nothing new cataloged.
    let second = message_json(
        r#"{
            "id": "101",
            "channel_id": "c1",
            "attachments": [
                {"url": "https://cdn.test/b.png", "filename": "b.png",
                 "content_type": "image/png", "size": 64}
            ]
        }"#,
    );
    let counts = handle_message(&h.ingestor, &watched(&["c1"]), &second).await;
    assert_eq!(counts.duplicates, 1);
    assert_eq!(counts.stored, 0);
    assert_eq!(h.media.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_repeated_failures_poison_the_url() {
    let h = harness(HashMap::new()).await;

    let reference = &extract_references(&message_json(
        r#"{
            "id": "200",
            "channel_id": "c1",
            "attachments": [
                {"url": "https://cdn.test/dead.png", "filename": "dead.png",
                 "content_type": "image/png", "size": 1}
            ]
        }"#,
    ))[0];
    let ctx = MessageContext {
        channel_id: "c1".into(),
        message_id: "200".into(),
        text_content: None,
        timestamp: None,
    };

    for attempt in 1..=3 {
        assert_eq!(
            h.ingestor.ingest(reference, &ctx).await,
            IngestOutcome::Failed
        );
        assert_eq!(
            h.failed.attempts("https://cdn.test/dead.png").await.unwrap(),
            attempt
        );
    }

    // Threshold reached: no further fetch attempts are made
    assert_eq!(
        h.ingestor.ingest(reference, &ctx).await,
        IngestOutcome::SkippedPoison
    );
    assert_eq!(h.fetcher.calls(), 3);
    assert_eq!(h.media.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_forwarded_media_keeps_snapshot_text() {
    let png = png_bytes();
    let h = harness(HashMap::from([(
        "https://cdn.test/fwd.png".to_string(),
        png,
    )]))
    .await;

    let message = message_json(
        r#"{
            "id": "300",
            "channel_id": "c1",
            "content": "check this forward",
            "message_snapshots": [
                {"message": {
                    "content": "the original caption",
                    "attachments": [
                        {"url": "https://cdn.test/fwd.png", "filename": "pic.png",
                         "content_type": "image/png", "size": 9}
                    ]
                }}
            ]
        }"#,
    );

    let counts = handle_message(&h.ingestor, &watched(&["c1"]), &message).await;
    assert_eq!(counts.stored, 1);

    let records = h.media.list_for_message("300").await.unwrap();
    assert_eq!(records[0].text_content.as_deref(), Some("the original caption"));
    assert!(records[0].storage_key.ends_with("_forward_pic.png"));
}

#[tokio::test]
async fn test_unwatched_channel_is_ignored() {
    let h = harness(HashMap::new()).await;

    let message = message_json(
        r#"{
            "id": "400",
            "channel_id": "other",
            "attachments": [
                {"url": "https://cdn.test/x.png", "filename": "x.png",
                 "content_type": "image/png", "size": 1}
            ]
        }"#,
    );

    let counts = handle_message(&h.ingestor, &watched(&["c1"]), &message).await;
    assert_eq!(counts, PipelineCounts::default());
    assert_eq!(h.fetcher.calls(), 0);
}

#[tokio::test]
async fn test_video_attachment_cataloged_without_tools() {
    // Bytes that no probe can parse still get stored as-is
    let h = harness(HashMap::from([(
        "https://cdn.test/clip.mp4".to_string(),
        b"not really mpeg4".to_vec(),
    )]))
    .await;

    let message = message_json(
        r#"{
            "id": "500",
            "channel_id": "c1",
            "attachments": [
                {"url": "https://cdn.test/clip.mp4", "filename": "clip.mp4",
                 "content_type": "video/mp4", "size": 16}
            ]
        }"#,
    );

    let counts = handle_message(&h.ingestor, &watched(&["c1"]), &message).await;
    assert_eq!(counts.stored, 1);

    let records = h.media.list_for_message("500").await.unwrap();
    assert_eq!(records[0].kind, MediaKind::Video);
    assert_eq!(records[0].duration_seconds, None);
    // Thumbnail extraction cannot work on garbage bytes
    assert_eq!(records[0].thumbnail_key, None);
    assert_eq!(
        h.store.get(&records[0].storage_key).await.unwrap(),
        b"not really mpeg4"
    );
}

#[tokio::test]
async fn test_constraint_collisions_resolve_as_duplicates() {
    use mediakeep::repository::InsertOutcome;

    let h = harness(HashMap::new()).await;

    let record = MediaRecord::new(
        MediaKind::Image,
        "c1/700_aaaa0000_a.png".to_string(),
        None,
        "samehash".to_string(),
        "c1".to_string(),
        "700".to_string(),
        None,
        None,
        None,
    );
    assert_eq!(h.media.insert(&record).await.unwrap(), InsertOutcome::Inserted);

    // Same content hash under a different key: the unique index resolves
    // the race, not an error
    let hash_twin = MediaRecord::new(
        MediaKind::Image,
        "c1/701_bbbb1111_b.png".to_string(),
        None,
        "samehash".to_string(),
        "c1".to_string(),
        "701".to_string(),
        None,
        None,
        None,
    );
    assert_eq!(
        h.media.insert(&hash_twin).await.unwrap(),
        InsertOutcome::DuplicateRace
    );

    // Same storage key, different hash: a retried reference converges on
    // one object
    let key_twin = MediaRecord::new(
        MediaKind::Image,
        "c1/700_aaaa0000_a.png".to_string(),
        None,
        "differenthash".to_string(),
        "c1".to_string(),
        "700".to_string(),
        None,
        None,
        None,
    );
    assert_eq!(
        h.media.insert(&key_twin).await.unwrap(),
        InsertOutcome::DuplicateRace
    );

    assert_eq!(h.media.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_list_grouped_pages_by_message() {
    let png = png_bytes();
    let h = harness(HashMap::from([
        ("https://cdn.test/g1.png".to_string(), png.clone()),
        ("https://cdn.test/g2.mp4".to_string(), b"clip-bytes".to_vec()),
    ]))
    .await;

    for (id, json) in [
        (
            "800",
            r#"{
                "id": "800",
                "channel_id": "c1",
                "content": "first post",
                "attachments": [
                    {"url": "https://cdn.test/g1.png", "filename": "g1.png",
                     "content_type": "image/png", "size": 3}
                ]
            }"#,
        ),
        (
            "801",
            r#"{
                "id": "801",
                "channel_id": "c1",
                "attachments": [
                    {"url": "https://cdn.test/g2.mp4", "filename": "g2.mp4",
                     "content_type": "video/mp4", "size": 3}
                ]
            }"#,
        ),
    ] {
        let counts = handle_message(&h.ingestor, &watched(&["c1"]), &message_json(json)).await;
        assert_eq!(counts.stored, 1, "message {id} should store one item");
    }

    let groups = h.media.list_grouped(10, 0).await.unwrap();
    assert_eq!(groups.len(), 2);
    // Most recently ingested message first
    assert_eq!(groups[0].source_message_id, "801");
    assert_eq!(groups[1].source_message_id, "800");
    assert_eq!(groups[1].text_content.as_deref(), Some("first post"));
    assert_eq!(groups[0].media.len(), 1);

    let page = h.media.list_grouped(1, 1).await.unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].source_message_id, "800");
}

/// Records which channels are asked for history, in call order.
struct OrderRecordingHistory {
    calls: Arc<std::sync::Mutex<Vec<String>>>,
}

#[async_trait]
impl ChannelHistorySource for OrderRecordingHistory {
    async fn fetch_page(
        &self,
        channel_id: &str,
        _limit: u8,
        _before: Option<u64>,
    ) -> Result<Vec<mediakeep::discord::Message>> {
        self.calls.lock().unwrap().push(channel_id.to_string());
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn test_backfill_visits_channels_in_configured_order() {
    let h = harness(HashMap::new()).await;

    // Deliberately not in lexicographic order
    let configured = vec!["zulu".to_string(), "alpha".to_string(), "mike".to_string()];
    let calls = Arc::new(std::sync::Mutex::new(Vec::new()));

    let crawler = BackfillCrawler::new(
        h.ingestor.clone(),
        OrderRecordingHistory {
            calls: calls.clone(),
        },
        configured.clone(),
        100,
        10,
    );
    crawler.run().await;

    assert_eq!(*calls.lock().unwrap(), configured);
}

#[tokio::test]
async fn test_delete_media_removes_object_and_record() {
    let png = png_bytes();
    let h = harness(HashMap::from([(
        "https://cdn.test/gone.png".to_string(),
        png,
    )]))
    .await;

    let message = message_json(
        r#"{
            "id": "600",
            "channel_id": "c1",
            "attachments": [
                {"url": "https://cdn.test/gone.png", "filename": "gone.png",
                 "content_type": "image/png", "size": 5}
            ]
        }"#,
    );
    handle_message(&h.ingestor, &watched(&["c1"]), &message).await;

    let record = h.media.list_for_message("600").await.unwrap().remove(0);
    let deleted = h.ingestor.delete_media(&record.id).await.unwrap().unwrap();
    assert_eq!(deleted.id, record.id);

    assert_eq!(h.media.count().await.unwrap(), 0);
    assert!(h.store.get(&record.storage_key).await.is_err());
    assert!(h.ingestor.delete_media(&record.id).await.unwrap().is_none());
}
