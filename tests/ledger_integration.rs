//! Integration tests for the ledger, its persistence and the upload relay
//!
//! These run against the public API with real sled and blob directories
//! under a temporary directory.

use permapost::{
    extract_tags, remove_tag_markers, BlobStore, Clock, ContentType, EventBus, LedgerError,
    LedgerEvent, LedgerService, LedgerStore, Relay, StorageError,
};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Clock that ticks one second per call
struct TickingClock(AtomicI64);

impl Clock for TickingClock {
    fn now(&self) -> i64 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }
}

fn clock() -> Arc<dyn Clock> {
    Arc::new(TickingClock(AtomicI64::new(1_700_000_000)))
}

fn tags(list: &[&str]) -> Vec<String> {
    list.iter().map(|t| t.to_string()).collect()
}

fn open_service(dir: &TempDir) -> LedgerService {
    let store = LedgerStore::open(dir.path().join("ledger.sled")).unwrap();
    LedgerService::open(store, Arc::new(EventBus::new()))
        .unwrap()
        .with_clock(clock())
}

/// Tags ["tech","chain"], ["tech","ai"], ["chain"] in order
#[tokio::test]
async fn test_tag_scenario() {
    let service = LedgerService::in_memory(Arc::new(EventBus::new())).with_clock(clock());
    for post_tags in [&["tech", "chain"][..], &["tech", "ai"], &["chain"]] {
        service
            .create_post("alice", "bafkreiref", ContentType::Text, &tags(post_tags))
            .await
            .unwrap();
    }

    let tech: Vec<u64> = service
        .get_posts_by_tag("tech")
        .await
        .iter()
        .map(|p| p.id)
        .collect();
    assert_eq!(tech, vec![1, 2]);

    let top = service.get_top_tags(2).await.unwrap();
    let pairs: Vec<(&str, usize)> = top.iter().map(|t| (t.tag.as_str(), t.count)).collect();
    assert_eq!(pairs, vec![("tech", 2), ("chain", 2)]);

    assert_eq!(service.get_all_tags().await, tags(&["tech", "chain", "ai"]));
    assert_eq!(service.get_top_tags(100).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_total_and_bounds() {
    let service = LedgerService::in_memory(Arc::new(EventBus::new()));
    for _ in 0..5 {
        service
            .create_post("bob", "ref", ContentType::Image, &[])
            .await
            .unwrap();
    }

    let total = service.total_posts().await;
    assert_eq!(total, 5);
    for id in 1..=total {
        assert_eq!(service.get_post(id).await.unwrap().id, id);
    }
    assert_eq!(service.get_post(0).await, Err(LedgerError::NotFound(0)));
    assert_eq!(service.get_post(6).await, Err(LedgerError::NotFound(6)));

    let latest: Vec<u64> = service
        .get_latest(50)
        .await
        .unwrap()
        .iter()
        .map(|p| p.id)
        .collect();
    assert_eq!(latest, vec![5, 4, 3, 2, 1]);

    assert!(matches!(
        service.get_range(4, 2).await,
        Err(LedgerError::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn test_rejections() {
    let service = LedgerService::in_memory(Arc::new(EventBus::new()));

    let cases: Vec<(&str, Vec<String>, LedgerError)> = vec![
        ("", vec![], LedgerError::InvalidReference),
        ("h", vec!["x".to_string(); 11], LedgerError::TooManyTags(11)),
        ("h", tags(&[""]), LedgerError::EmptyTag(0)),
        ("h", vec!["a".repeat(51)], LedgerError::TagTooLong("a".repeat(51))),
    ];
    for (content_ref, post_tags, expected) in cases {
        match service
            .create_post("carol", content_ref, ContentType::Text, &post_tags)
            .await
        {
            Err(StorageError::Ledger(e)) => assert_eq!(e, expected),
            other => panic!("expected {:?}, got {:?}", expected, other),
        }
    }
    assert_eq!(service.total_posts().await, 0);
}

#[tokio::test]
async fn test_reopen_restores_state() {
    let temp_dir = TempDir::new().unwrap();

    {
        let service = open_service(&temp_dir);
        service
            .create_post("alice", "r1", ContentType::Text, &tags(&["rust", "区块链"]))
            .await
            .unwrap();
        service
            .create_post("bob", "r2", ContentType::Video, &tags(&["rust"]))
            .await
            .unwrap();
        service.flush().await.unwrap();
    }

    let service = open_service(&temp_dir);
    assert_eq!(service.total_posts().await, 2);
    assert_eq!(service.get_all_tags().await, tags(&["rust", "区块链"]));
    assert_eq!(service.get_post_count_by_tag("rust").await, 2);
    assert_eq!(service.get_post_count_by_publisher("bob").await, 1);
    assert_eq!(service.get_post(2).await.unwrap().content_type, ContentType::Video);

    let next = service
        .create_post("carol", "r3", ContentType::Text, &[])
        .await
        .unwrap();
    assert_eq!(next.id, 3);
}

#[tokio::test]
async fn test_relay_to_ledger_flow() {
    let temp_dir = TempDir::new().unwrap();
    let blobs = Arc::new(BlobStore::new(temp_dir.path().join("content")).await.unwrap());
    let relay = Relay::new(blobs, "https://ipfs.io/ipfs", clock());
    let service = LedgerService::in_memory(Arc::new(EventBus::new())).with_clock(clock());
    let mut events = service.events().subscribe();

    let text = "Shipping #rust on #web3 today #rust";
    let upload = relay.upload_text(text).await.unwrap();
    assert_eq!(upload.tags, extract_tags(text));

    let post = service
        .create_post("alice", &upload.hash, ContentType::Text, &upload.tags)
        .await
        .unwrap();
    assert_eq!(post.tags, tags(&["rust", "web3"]));

    let stored = relay.get_content(&post.content_ref).await.unwrap();
    assert_eq!(stored.content, text);
    assert!(extract_tags(&remove_tag_markers(&stored.content)).is_empty());

    let mut created = 0;
    while let Ok(event) = events.try_recv() {
        if let LedgerEvent::PostCreated { post: announced } = event {
            assert_eq!(announced, post);
            created += 1;
        }
    }
    assert_eq!(created, 1);

    let hits = relay
        .search_content("WEB3", &service.content_refs().await)
        .await;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].hash, upload.hash);
}

#[tokio::test]
async fn test_text_with_too_many_tags_is_rejected_by_ledger() {
    let temp_dir = TempDir::new().unwrap();
    let blobs = Arc::new(BlobStore::new(temp_dir.path()).await.unwrap());
    let relay = Relay::new(blobs, "https://ipfs.io/ipfs", clock());
    let service = LedgerService::in_memory(Arc::new(EventBus::new()));

    let text: String = (0..12).map(|i| format!("#t{} ", i)).collect();
    let upload = relay.upload_text(&text).await.unwrap();
    assert_eq!(upload.tags.len(), 12);

    let err = service
        .create_post("alice", &upload.hash, ContentType::Text, &upload.tags)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Ledger(LedgerError::TooManyTags(12))));
}
