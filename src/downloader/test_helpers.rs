//! Shared test helpers for creating BunkrDownloader instances against a mock site.

use crate::config::{Config, RetryConfig};
use crate::downloader::BunkrDownloader;
use crate::resolver::cipher::encrypt_for_tests;
use crate::types::{Event, IndexedEvent, JobStatus};
use std::time::Duration;
use tempfile::tempdir;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub(crate) const TIMESTAMP: i64 = 1_700_003_600;

/// Config pointing every endpoint at `server`, with fast retries and no disk floor
pub(crate) fn test_config(server: &MockServer, root: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.download.download_dir = root.join("downloads");
    config.download.session_log = Some(root.join("session.log"));
    config.network.api_endpoint = format!("{}/api/vs", server.uri());
    config.network.status_page = format!("{}/status", server.uri());
    config.network.fallback_domain = "localhost".to_string();
    config.network.request_timeout = Duration::from_secs(5);
    config.network.download_timeout = Duration::from_secs(5);
    config.retry = RetryConfig {
        max_attempts: 1,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        backoff_multiplier: 2.0,
        jitter: false,
    };
    config.maintenance.backoff_delays = vec![Duration::from_millis(10)];
    config.disk_space.min_free_space = 0;
    config
}

/// Helper to create a test BunkrDownloader instance.
/// Returns the downloader and the tempdir (which must be kept alive).
pub(crate) async fn create_test_downloader(
    server: &MockServer,
) -> (BunkrDownloader, tempfile::TempDir) {
    let temp_dir = tempdir().unwrap();
    let config = test_config(server, temp_dir.path());
    let downloader = BunkrDownloader::new(config).await.unwrap();
    (downloader, temp_dir)
}

/// Same as [`create_test_downloader`] with a config tweak applied first
pub(crate) async fn create_test_downloader_with(
    server: &MockServer,
    tweak: impl FnOnce(&mut Config),
) -> (BunkrDownloader, tempfile::TempDir) {
    let temp_dir = tempdir().unwrap();
    let mut config = test_config(server, temp_dir.path());
    tweak(&mut config);
    let downloader = BunkrDownloader::new(config).await.unwrap();
    (downloader, temp_dir)
}

/// Mount an item page, its API payload and the file body; returns the item URL
pub(crate) async fn mount_item(
    server: &MockServer,
    id: &str,
    filename: &str,
    body: Vec<u8>,
    expected_downloads: Option<u64>,
) -> String {
    Mock::given(method("GET"))
        .and(path(format!("/f/{}", id)))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            r#"<html><body><h1>{}</h1><script>const slug = "{}";</script></body></html>"#,
            filename, id
        )))
        .mount(server)
        .await;

    let direct = format!("{}/files/{}", server.uri(), filename);
    Mock::given(method("POST"))
        .and(path("/api/vs"))
        .and(body_json(serde_json::json!({ "slug": id })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "encrypted": true,
            "timestamp": TIMESTAMP,
            "url": encrypt_for_tests(&direct, TIMESTAMP),
        })))
        .mount(server)
        .await;

    let file = Mock::given(method("GET"))
        .and(path(format!("/files/{}", filename)))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body));
    match expected_downloads {
        Some(n) => file.expect(n).mount(server).await,
        None => file.mount(server).await,
    }

    format!("{}/f/{}", server.uri(), id)
}

/// Mount a single-page album listing the given item ids
pub(crate) async fn mount_album(server: &MockServer, id: &str, title: &str, items: &[&str]) -> String {
    let links: String = items
        .iter()
        .map(|item| format!(r#"<a href="/f/{}">{}</a>"#, item, item))
        .collect();
    Mock::given(method("GET"))
        .and(path(format!("/a/{}", id)))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            "<html><body><h1>{}</h1><div>{}</div></body></html>",
            title, links
        )))
        .mount(server)
        .await;
    format!("{}/a/{}", server.uri(), id)
}

/// Statuses in log order
pub(crate) fn statuses(events: &[IndexedEvent]) -> Vec<JobStatus> {
    events
        .iter()
        .filter_map(|e| match &e.event {
            Event::Status { status, .. } => Some(*status),
            _ => None,
        })
        .collect()
}

/// Titles of `log` events in log order
pub(crate) fn log_titles(events: &[IndexedEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match &e.event {
            Event::Log { event, .. } => Some(event.clone()),
            _ => None,
        })
        .collect()
}
