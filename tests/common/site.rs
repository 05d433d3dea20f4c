//! Mock Bunkr site: album listings, item pages, the link API and file hosts

use bunkr_dl::Config;
use bunkr_dl::config::RetryConfig;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Status page row markup for one server
pub fn status_row(server: &str, label: &str) -> String {
    format!(
        r#"<div class="flex items-center gap-4 py-4 border-b border-soft last:border-b-0"><p>{}</p><span>{}</span></div>"#,
        server, label
    )
}

/// Config pointing every endpoint at `server`, with fast retries and no disk floor
pub fn site_config(server: &MockServer, root: &Path) -> Config {
    let mut config = Config::default();
    config.download.download_dir = root.join("downloads");
    config.download.session_log = Some(root.join("session.log"));
    config.network.api_endpoint = format!("{}/api/vs", server.uri());
    config.network.status_page = format!("{}/status", server.uri());
    config.network.fallback_domain = "localhost".to_string();
    config.network.request_timeout = Duration::from_secs(5);
    config.network.download_timeout = Duration::from_secs(5);
    config.retry = RetryConfig {
        max_attempts: 0,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        backoff_multiplier: 2.0,
        jitter: false,
    };
    config.maintenance.backoff_delays = vec![Duration::from_millis(10)];
    config.disk_space.min_free_space = 0;
    config
}

/// Mount an item page and its link API answer pointing at `direct_url`
///
/// The API answers with an unencrypted payload so the direct URL is used
/// verbatim.
pub async fn mount_item_page(server: &MockServer, id: &str, filename: &str, direct_url: &str) -> String {
    Mock::given(method("GET"))
        .and(path(format!("/f/{}", id)))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            r#"<html><body><h1>{}</h1><script>const slug = "{}";</script></body></html>"#,
            filename, id
        )))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/vs"))
        .and(body_json(serde_json::json!({ "slug": id })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "encrypted": false,
            "timestamp": 0,
            "url": direct_url,
        })))
        .mount(server)
        .await;

    format!("{}/f/{}", server.uri(), id)
}

/// Mount an item whose file is served by `server`, expected `downloads` times
pub async fn mount_item(
    server: &MockServer,
    id: &str,
    filename: &str,
    body: Vec<u8>,
    downloads: u64,
) -> String {
    let direct = format!("{}/files/{}", server.uri(), filename);
    let url = mount_item_page(server, id, filename, &direct).await;

    Mock::given(method("GET"))
        .and(path(format!("/files/{}", filename)))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .expect(downloads)
        .mount(server)
        .await;

    url
}

/// Mount an album split over pages; every page but the last links to the next
pub async fn mount_album_pages(server: &MockServer, id: &str, title: &str, pages: &[&[&str]]) -> String {
    for (i, items) in pages.iter().enumerate() {
        let page = i + 1;
        let links: String = items
            .iter()
            .map(|item| format!(r#"<a href="/f/{}">{}</a>"#, item, item))
            .collect();
        let next = if page < pages.len() {
            format!(r#"<a href="/a/{}?page={}">Next</a>"#, id, page + 1)
        } else {
            String::new()
        };

        Mock::given(method("GET"))
            .and(path(format!("/a/{}", id)))
            .and(query_param("page", page.to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!(
                "<html><body><h1>{}</h1><div>{}</div><nav>{}</nav></body></html>",
                title, links, next
            )))
            .expect(1)
            .mount(server)
            .await;
    }
    format!("{}/a/{}", server.uri(), id)
}

/// Mount the status page with the given rows
pub async fn mount_status_page(server: &MockServer, rows: &[(&str, &str)]) {
    let body: String = rows
        .iter()
        .map(|(server, label)| status_row(server, label))
        .collect();
    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

/// How the raw file host answers one connection
#[derive(Clone, Copy, Debug)]
pub enum FileReply {
    /// Announce the full length but send only this many bytes, then hang up
    Truncated(usize),
    /// Send the whole file, or the requested range with 206
    Full,
}

/// A file host that replays scripted replies, one per connection
///
/// Built on a raw socket so it can announce more bytes than it sends.
pub struct FlakyFileHost {
    /// Direct URL of the hosted file
    pub url: String,
    connections: Arc<AtomicUsize>,
}

impl FlakyFileHost {
    /// Serve `content` as `filename`; connections beyond the script get `Full`
    pub async fn start(filename: &str, content: Vec<u8>, script: Vec<FileReply>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));

        let counter = connections.clone();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let reply = script.get(n).copied().unwrap_or(FileReply::Full);

                let mut request = vec![0u8; 8192];
                let read = socket.read(&mut request).await.unwrap_or(0);
                let request = String::from_utf8_lossy(&request[..read]).to_lowercase();
                let range_start = request
                    .lines()
                    .find_map(|line| line.strip_prefix("range: bytes="))
                    .and_then(|range| range.trim_end_matches('-').trim().parse::<usize>().ok())
                    .filter(|start| *start < content.len());

                let (head, body) = match (reply, range_start) {
                    (FileReply::Truncated(sent), _) => (
                        format!(
                            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nContent-Type: application/octet-stream\r\n\r\n",
                            content.len()
                        ),
                        content[..sent.min(content.len())].to_vec(),
                    ),
                    (FileReply::Full, Some(start)) => (
                        format!(
                            "HTTP/1.1 206 Partial Content\r\nContent-Length: {}\r\nContent-Range: bytes {}-{}/{}\r\nConnection: close\r\n\r\n",
                            content.len() - start,
                            start,
                            content.len() - 1,
                            content.len()
                        ),
                        content[start..].to_vec(),
                    ),
                    (FileReply::Full, None) => (
                        format!(
                            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                            content.len()
                        ),
                        content.clone(),
                    ),
                };

                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(&body).await;
                let _ = socket.flush().await;
            }
        });

        Self {
            url: format!("http://{}/{}", addr, filename),
            connections,
        }
    }

    /// Connections accepted so far
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

/// Deterministic file content
pub fn content(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
