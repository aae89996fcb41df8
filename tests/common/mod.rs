//! Shared helpers for scrape-toolkit integration tests

#![allow(dead_code)]

use scrape_toolkit::config::{Config, DownloadConfig, PathLayout, StorageConfig};
use scrape_toolkit::retry::RetryPolicy;
use scrape_toolkit::ScrapedItem;
use std::path::Path;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Config rooted at `root` with fast retries (3 attempts, 5ms base delay)
pub fn test_config(root: &Path) -> Config {
    Config {
        download: DownloadConfig {
            timeout: Duration::from_secs(5),
            retry: RetryPolicy::new(3, Duration::from_millis(5), 2.0, Duration::from_millis(20))
                .unwrap(),
            ..Default::default()
        },
        storage: StorageConfig {
            root: root.to_path_buf(),
            layout: PathLayout::SourceThenType,
            max_segment_len: 100,
        },
        ..Default::default()
    }
}

/// Serve `body` at `route` for every GET
pub async fn serve_file(server: &MockServer, route: &str, body: &[u8]) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()))
        .mount(server)
        .await;
}

/// Respond to `route` with `status` every time
pub async fn serve_status(server: &MockServer, route: &str, status: u16) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}

/// Item from `source` whose file lives at `route` on `server`
pub fn item_with_file(server: &MockServer, source: &str, name: &str, route: &str) -> ScrapedItem {
    ScrapedItem::new(source, name)
        .with_metadata("download_url", format!("{}{}", server.uri(), route))
}

/// Every file under `dir` whose name marks it as an in-progress download
pub fn leftover_temp_files(dir: &Path) -> Vec<std::path::PathBuf> {
    let mut found = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let Ok(entries) = std::fs::read_dir(&current) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else if path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(scrape_toolkit::download::TEMP_SUFFIX))
            {
                found.push(path);
            }
        }
    }
    found
}
