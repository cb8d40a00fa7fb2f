//! Integration tests for the upload engine against an HTTP endpoint
//!
//! Run with: cargo test --test upload_test

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{CollectingSink, test_settings};
use mediarelay::download::metadata::MediaMetadata;
use mediarelay::download::pipeline::{FetchedMedia, MediaPipeline};
use mediarelay::download::request::MediaKind;
use mediarelay::download::session::SessionRegistry;
use mediarelay::download::upload::{HttpDeliveryTransport, UploadEngine};

fn video(dir: &std::path::Path) -> FetchedMedia {
    let path = dir.join("clip.mp4");
    std::fs::write(&path, vec![3u8; 300_000]).unwrap();
    let thumb = dir.join("clip.thumb.jpg");
    std::fs::write(&thumb, vec![4u8; 3_000]).unwrap();
    FetchedMedia {
        session: 40,
        title: "clip".into(),
        path,
        kind: MediaKind::Video,
        metadata: Some(MediaMetadata {
            duration_secs: 42,
            width: 1920,
            height: 1080,
        }),
        thumbnail: Some(thumb),
    }
}

#[tokio::test]
async fn test_upload_video_multipart() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let media = video(dir.path());
    let transport = HttpDeliveryTransport::new(Url::parse(&format!("{}/upload", server.uri())).unwrap()).unwrap();
    let registry = SessionRegistry::new();
    let engine = UploadEngine::new(Arc::new(transport), registry.clone(), Duration::from_millis(5), 4);
    let sink = CollectingSink::default();

    assert!(engine.upload(&media, &CancellationToken::new(), &sink).await);
    assert!(!registry.has_transfer(40));

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let body = String::from_utf8_lossy(&requests[0].body);
    assert!(body.contains("name=\"kind\""));
    assert!(body.contains("video"));
    assert!(body.contains("name=\"duration\""));
    assert!(body.contains("1920"));
    assert!(body.contains("name=\"thumbnail\""));
    assert!(body.contains("filename=\"clip.mp4\""));
    assert!(requests[0].body.len() > 300_000);

    for pair in sink.percents().windows(2) {
        assert!(pair[1] >= pair[0] + 4);
    }
}

#[tokio::test]
async fn test_upload_rejected_by_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let doc = dir.path().join("notes.txt");
    std::fs::write(&doc, "hello").unwrap();
    let media = FetchedMedia {
        session: 41,
        title: "notes".into(),
        path: doc,
        kind: MediaKind::Document,
        metadata: None,
        thumbnail: None,
    };

    let transport = HttpDeliveryTransport::new(Url::parse(&server.uri()).unwrap()).unwrap();
    let engine = UploadEngine::new(Arc::new(transport), SessionRegistry::new(), Duration::from_millis(5), 4);

    assert!(!engine.upload(&media, &CancellationToken::new(), &CollectingSink::default()).await);
}

#[tokio::test]
async fn test_deliver_skips_cancelled_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let media = video(dir.path());
    let registry = SessionRegistry::new();
    let transport = HttpDeliveryTransport::new(Url::parse(&server.uri()).unwrap()).unwrap();
    let pipeline = MediaPipeline::new(
        registry.clone(),
        Arc::new(test_settings(dir.path())),
        Arc::new(CollectingSink::default()),
    )
    .unwrap()
    .with_transport(Arc::new(transport));

    registry.open_session(media.session);
    assert!(registry.cancel(media.session));

    assert!(!pipeline.deliver(&media).await);
    assert!(registry.is_cancelled(media.session));
    assert!(server.received_requests().await.unwrap().is_empty());
    assert!(media.path.exists());
}
