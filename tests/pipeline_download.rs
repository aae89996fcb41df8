//! End-to-end runs of the built-in stages against a mock HTTP server
//!
//! These tests verify that a validation, normalization and download pipeline:
//! - Emits survivors in input order with their local paths set
//! - Retries transient HTTP failures and leaves no temp files behind
//! - Stops pulling items as soon as a download failure aborts the run
//! - Streams survivors to a channel sink while the run is in progress

mod common;

use common::{item_with_file, leftover_temp_files, serve_file, serve_status, test_config};
use futures::stream;
use scrape_toolkit::pipeline::stages::{BYTES_DOWNLOADED, DOWNLOADS_FAILED, DOWNLOADS_SUCCEEDED};
use scrape_toolkit::pipeline::{
    DownloadStage, FnStage, NormalizeNameStage, OnFailure, PipelineContext, ValidationStage,
};
use scrape_toolkit::{
    ContentType, PipelineError, PipelineOrchestrator, PipelineStage, RunState, ScrapedItem,
};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn stages(download: DownloadStage) -> Vec<Box<dyn PipelineStage>> {
    vec![
        Box::new(ValidationStage::new()),
        Box::new(NormalizeNameStage),
        Box::new(download),
    ]
}

#[tokio::test]
async fn test_full_pipeline_downloads_and_preserves_order() {
    let server = MockServer::start().await;
    serve_file(&server, "/files/first.jpg", b"first image").await;
    serve_file(&server, "/files/third.jpg", b"third").await;
    serve_status(&server, "/files/gone.jpg", 404).await;

    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path());
    let download = DownloadStage::from_config(&config, ContentType::Image).unwrap();
    let mut orchestrator = PipelineOrchestrator::new(stages(download));

    let items = vec![
        item_with_file(&server, "gallery", "  First   Photo ", "/files/first.jpg"),
        ScrapedItem::new("gallery", "   "),
        item_with_file(&server, "gallery", "Missing", "/files/gone.jpg"),
        ScrapedItem::new("gallery", "No file here"),
        item_with_file(&server, "gallery", "Third", "/files/third.jpg"),
    ];
    let run = orchestrator.execute(stream::iter(items)).await;

    assert!(run.is_completed(), "run failed: {:?}", run.error);
    assert_eq!(run.stats.total, 5);
    assert_eq!(run.stats.dropped, 1);
    assert_eq!(run.stats.emitted, 4);

    let names: Vec<&str> = run.items.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(names, vec!["First Photo", "Missing", "No file here", "Third"]);

    let images = temp_dir.path().join("gallery").join("images");
    assert_eq!(run.items[0].local_path, Some(images.join("first.jpg")));
    assert_eq!(
        std::fs::read(images.join("first.jpg")).unwrap(),
        b"first image"
    );
    assert_eq!(run.items[0].metadata_str("clean_name"), Some("first photo"));

    assert_eq!(run.items[1].local_path, None);
    assert_eq!(run.items[1].metadata_str("download_error"), Some("status 404"));
    assert!(!images.join("gone.jpg").exists());

    assert_eq!(run.items[2].local_path, None);
    assert_eq!(run.items[3].local_path, Some(images.join("third.jpg")));

    assert_eq!(run.context.counter(DOWNLOADS_SUCCEEDED), 2);
    assert_eq!(run.context.counter(DOWNLOADS_FAILED), 1);
    assert_eq!(run.context.counter(BYTES_DOWNLOADED), 16);
    assert!(leftover_temp_files(temp_dir.path()).is_empty());
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky.bin"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    serve_file(&server, "/flaky.bin", b"eventually").await;

    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path());
    let download = DownloadStage::from_config(&config, ContentType::Archive).unwrap();
    let mut orchestrator = PipelineOrchestrator::new(stages(download));

    let run = orchestrator
        .execute_iter(vec![item_with_file(&server, "mirror", "Flaky", "/flaky.bin")])
        .await;

    assert!(run.is_completed());
    let item = &run.items[0];
    assert_eq!(
        item.get_metadata("download_attempts"),
        Some(&serde_json::json!(3))
    );
    let local = item.local_path.as_ref().unwrap();
    assert_eq!(std::fs::read(local).unwrap(), b"eventually");
    assert!(local.starts_with(temp_dir.path().join("mirror").join("archives")));
    assert!(leftover_temp_files(temp_dir.path()).is_empty());
}

#[tokio::test]
async fn test_abort_on_download_failure_stops_pulling_items() {
    let server = MockServer::start().await;
    serve_file(&server, "/ok.txt", b"fine").await;
    serve_status(&server, "/forbidden.txt", 403).await;
    Mock::given(method("GET"))
        .and(path("/never.txt"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path());
    let download = DownloadStage::from_config(&config, ContentType::Document)
        .unwrap()
        .with_on_failure(OnFailure::Abort);
    let mut orchestrator = PipelineOrchestrator::new(stages(download));

    let items = vec![
        item_with_file(&server, "docs", "Ok", "/ok.txt"),
        item_with_file(&server, "docs", "Forbidden", "/forbidden.txt"),
        item_with_file(&server, "docs", "Never", "/never.txt"),
    ];
    let run = orchestrator.execute_iter(items).await;

    assert_eq!(run.state, RunState::Aborted);
    assert!(matches!(
        run.error,
        Some(PipelineError::Aborted { ref stage, .. }) if stage == "download"
    ));
    assert_eq!(run.items.len(), 1);
    assert_eq!(run.items[0].name, "Ok");
    assert_eq!(run.stats.total, 2);
    assert!(temp_dir.path().join("docs/documents/ok.txt").exists());
    assert!(!temp_dir.path().join("docs/documents/never.txt").exists());
}

#[tokio::test]
async fn test_channel_sink_receives_items_during_run() {
    let server = MockServer::start().await;
    for i in 0..5 {
        serve_file(&server, &format!("/img/{i}.png"), format!("png {i}").as_bytes()).await;
    }

    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path());
    let download = DownloadStage::from_config(&config, ContentType::Image).unwrap();
    let mut orchestrator = PipelineOrchestrator::new(stages(download));

    let (mut tx, mut rx) = tokio::sync::mpsc::channel::<ScrapedItem>(1);
    let consumer = tokio::spawn(async move {
        let mut names = Vec::new();
        while let Some(item) = rx.recv().await {
            assert!(item.local_path.as_ref().is_some_and(|p| p.exists()));
            names.push(item.name);
        }
        names
    });

    let items: Vec<ScrapedItem> = (0..5)
        .map(|i| item_with_file(&server, "feed", &format!("Image {i}"), &format!("/img/{i}.png")))
        .collect();
    let mut ctx = orchestrator.new_context();
    let stats = orchestrator
        .run(stream::iter(items), &mut ctx, &mut tx)
        .await
        .unwrap();
    drop(tx);

    assert_eq!(stats.emitted, 5);
    let names = consumer.await.unwrap();
    assert_eq!(
        names,
        vec!["Image 0", "Image 1", "Image 2", "Image 3", "Image 4"]
    );
}

#[tokio::test]
async fn test_cancellation_inside_download_ends_run_as_cancelled() {
    let server = MockServer::start().await;
    serve_file(&server, "/one.bin", b"1").await;
    Mock::given(method("GET"))
        .and(path("/two.bin"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path());
    let download = DownloadStage::from_config(&config, ContentType::Other).unwrap();
    let mut orchestrator = PipelineOrchestrator::new(vec![
        Box::new(FnStage::new(
            "stop_button",
            |item: ScrapedItem, ctx: &mut PipelineContext| {
                if item.name == "Two" {
                    ctx.cancellation().cancel();
                }
                Ok(item)
            },
        )),
        Box::new(download),
    ]);

    let items = vec![
        item_with_file(&server, "bin", "One", "/one.bin"),
        item_with_file(&server, "bin", "Two", "/two.bin"),
    ];
    let run = orchestrator.execute_iter(items).await;

    assert_eq!(run.state, RunState::Aborted);
    assert_eq!(run.error, Some(PipelineError::Cancelled));
    assert_eq!(run.items.len(), 1);
    assert_eq!(run.items[0].name, "One");
}
