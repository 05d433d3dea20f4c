use super::cipher::encrypt_for_tests;
use super::*;
use std::time::Duration;
use wiremock::matchers::{body_json, header_regex, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TIMESTAMP: i64 = 1_700_003_600;

fn network_for(server: &MockServer) -> NetworkConfig {
    NetworkConfig {
        api_endpoint: format!("{}/api/vs", server.uri()),
        status_page: format!("{}/status", server.uri()),
        fallback_domain: "localhost".to_string(),
        request_timeout: Duration::from_secs(5),
        ..NetworkConfig::default()
    }
}

fn no_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 0,
        jitter: false,
        ..RetryConfig::default()
    }
}

fn resolver_for(server: &MockServer) -> LinkResolver {
    LinkResolver::new(reqwest::Client::new(), network_for(server), no_retry())
}

fn album_page(title: &str, items: &[&str], next_page: Option<usize>) -> String {
    let links: String = items
        .iter()
        .map(|item| format!(r#"<a class="grid-item" href="{}">{}</a>"#, item, item))
        .collect();
    let pagination = next_page
        .map(|n| format!(r#"<nav><a href="?page={}">Next</a></nav>"#, n))
        .unwrap_or_default();
    format!(
        "<html><body><h1>{}</h1><div>{}</div>{}</body></html>",
        title, links, pagination
    )
}

fn item_page(filename: &str, slug: &str) -> String {
    format!(
        r#"<html><body><h1>{}</h1><script>const slug = "{}";</script></body></html>"#,
        filename, slug
    )
}

async fn mount_item(server: &MockServer, id: &str, filename: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/f/{}", id)))
        .respond_with(ResponseTemplate::new(200).set_body_string(item_page(filename, id)))
        .mount(server)
        .await;

    let direct = format!("https://cdn12.bunkr.ru/{}", filename);
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
}

#[test]
fn classify_album_and_item_urls() {
    assert_eq!(
        classify_url("https://bunkr.cr/a/AbC123").unwrap(),
        UrlKind::Album {
            id: "AbC123".into()
        }
    );
    for kind in ["f", "i", "v"] {
        assert_eq!(
            classify_url(&format!("https://bunkr.si/{}/xyz", kind)).unwrap(),
            UrlKind::Item { id: "xyz".into() }
        );
    }
}

#[test]
fn classify_rejects_unknown_paths() {
    for url in ["https://bunkr.cr/x/abc", "https://bunkr.cr/", "not a url", "https://bunkr.cr/a"] {
        assert!(
            matches!(
                classify_url(url),
                Err(Error::Resolution(ResolutionError::UnsupportedUrl { .. }))
            ),
            "{url} should be unsupported"
        );
    }
}

#[test]
fn subdomain_is_lowercased_first_label() {
    assert_eq!(
        subdomain_of("https://CDN12.bunkr.ru/file.mp4").as_deref(),
        Some("cdn12")
    );
    assert_eq!(subdomain_of("nope"), None);
}

#[test]
fn album_page_parsing_finds_items_and_next_link() {
    let base = Url::parse("https://bunkr.cr/a/alb?page=1").unwrap();
    let html = album_page("My Album", &["/f/one", "/v/two?x=1", "/about"], Some(2));
    let page = parse_album_page(&html, &base, 1);

    assert_eq!(page.title.as_deref(), Some("My Album"));
    assert_eq!(
        page.item_urls,
        vec!["https://bunkr.cr/f/one", "https://bunkr.cr/v/two"]
    );
    assert!(page.has_next);

    let last = parse_album_page(&album_page("My Album", &["/f/one"], None), &base, 1);
    assert!(!last.has_next);
}

#[test]
fn item_page_parsing_extracts_slug_and_name() {
    let page = parse_item_page(&item_page("holiday photo.jpg", "Ab-c_9"));
    assert_eq!(page.slug.as_deref(), Some("Ab-c_9"));
    assert_eq!(page.filename.as_deref(), Some("holiday photo.jpg"));

    let bare = parse_item_page("<html><body>nothing here</body></html>");
    assert_eq!(bare, ItemPage::default());
}

#[tokio::test]
async fn album_pagination_collects_each_item_once() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/a/alb1"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(album_page(
            "Summer: Trip",
            &["/f/aaa", "/f/bbb"],
            Some(2),
        )))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/a/alb1"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(album_page(
            "Summer: Trip",
            &["/f/bbb", "/f/ccc"],
            Some(3),
        )))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/a/alb1"))
        .and(query_param("page", "3"))
        .respond_with(ResponseTemplate::new(200).set_body_string(album_page(
            "Summer: Trip",
            &["/f/ddd"],
            None,
        )))
        .expect(1)
        .mount(&server)
        .await;

    for (id, name) in [("aaa", "a.jpg"), ("bbb", "b.jpg"), ("ccc", "c.mp4"), ("ddd", "d.zip")] {
        mount_item(&server, id, name).await;
    }

    let resolver = resolver_for(&server);
    let resolved = resolver
        .resolve(&format!("{}/a/alb1", server.uri()))
        .await
        .unwrap();

    assert_eq!(resolved.album_name.as_deref(), Some("Summer: Trip"));
    assert_eq!(resolved.album_id.as_deref(), Some("alb1"));
    assert_eq!(resolved.pages_fetched, 3);

    let names: Vec<&str> = resolved
        .descriptors
        .iter()
        .map(|d| d.filename.as_str())
        .collect();
    assert_eq!(names, vec!["a.jpg", "b.jpg", "c.mp4", "d.zip"]);

    let first = &resolved.descriptors[0];
    assert_eq!(first.resolved_url, "https://cdn12.bunkr.ru/a.jpg");
    assert_eq!(first.subdomain, "cdn12");
    assert!(resolved.unresolved.is_empty());
}

#[tokio::test]
async fn pagination_stops_when_a_page_adds_nothing_new() {
    let server = MockServer::start().await;

    // Page 2 repeats page 1 and still advertises page 3
    Mock::given(method("GET"))
        .and(path("/a/loop"))
        .and(query_param("page", "1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(album_page("Loop", &["/f/aaa"], Some(2))),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/a/loop"))
        .and(query_param("page", "2"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(album_page("Loop", &["/f/aaa"], Some(3))),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/a/loop"))
        .and(query_param("page", "3"))
        .respond_with(ResponseTemplate::new(200).set_body_string(album_page("Loop", &[], None)))
        .expect(0)
        .mount(&server)
        .await;
    mount_item(&server, "aaa", "a.jpg").await;

    let resolved = resolver_for(&server)
        .resolve(&format!("{}/a/loop", server.uri()))
        .await
        .unwrap();

    assert_eq!(resolved.pages_fetched, 2);
    assert_eq!(resolved.descriptors.len(), 1);
}

#[tokio::test]
async fn broken_album_item_is_skipped() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/a/mixed"))
        .respond_with(ResponseTemplate::new(200).set_body_string(album_page(
            "Mixed",
            &["/f/good", "/f/bad"],
            None,
        )))
        .mount(&server)
        .await;
    mount_item(&server, "good", "good.jpg").await;

    Mock::given(method("GET"))
        .and(path("/f/bad"))
        .respond_with(ResponseTemplate::new(200).set_body_string(item_page("bad.jpg", "bad")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/vs"))
        .and(body_json(serde_json::json!({ "slug": "bad" })))
        .respond_with(ResponseTemplate::new(200).set_body_string("{\"oops\": true}"))
        .mount(&server)
        .await;

    let resolved = resolver_for(&server)
        .resolve(&format!("{}/a/mixed", server.uri()))
        .await
        .unwrap();

    assert_eq!(resolved.descriptors.len(), 1);
    assert_eq!(resolved.descriptors[0].filename, "good.jpg");
    assert_eq!(resolved.unresolved.len(), 1);
    assert!(resolved.unresolved[0].url.ends_with("/f/bad"));
}

#[tokio::test]
async fn single_item_falls_back_to_url_segment_for_slug_and_name() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v/Xy-9"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html><body></body></html>"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/vs"))
        .and(body_json(serde_json::json!({ "slug": "Xy-9" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "encrypted": true,
            "timestamp": TIMESTAMP,
            "url": encrypt_for_tests("https://media-files7.bunkr.ru/clip%20one.mp4", TIMESTAMP),
        })))
        .mount(&server)
        .await;

    let resolved = resolver_for(&server)
        .resolve(&format!("{}/v/Xy-9", server.uri()))
        .await
        .unwrap();

    assert!(resolved.album_name.is_none());
    let descriptor = &resolved.descriptors[0];
    assert_eq!(descriptor.filename, "clip one.mp4");
    assert_eq!(descriptor.subdomain, "media-files7");
}

#[tokio::test]
async fn invalid_slug_is_a_resolution_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/f/bad.slug"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
        .mount(&server)
        .await;

    let result = resolver_for(&server)
        .resolve(&format!("{}/f/bad.slug", server.uri()))
        .await;

    assert!(matches!(
        result,
        Err(Error::Resolution(ResolutionError::InvalidSlug { .. }))
    ));
}

#[tokio::test]
async fn forbidden_page_retries_once_on_fallback_domain() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/f/aaa"))
        .and(header_regex("host", "^127\\.0\\.0\\.1"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/f/aaa"))
        .and(header_regex("host", "^localhost"))
        .respond_with(ResponseTemplate::new(200).set_body_string(item_page("a.jpg", "aaa")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/vs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "encrypted": false,
            "url": "https://cdn4.bunkr.ru/a.jpg",
        })))
        .mount(&server)
        .await;

    let url = format!("{}/f/aaa", server.uri());
    let resolved = resolver_for(&server).resolve(&url).await.unwrap();

    assert_eq!(resolved.descriptors[0].resolved_url, "https://cdn4.bunkr.ru/a.jpg");
    assert_eq!(resolved.descriptors[0].source_url, url);
}

#[tokio::test]
async fn not_found_page_fails_without_fallback() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/a/gone"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let result = resolver_for(&server)
        .resolve(&format!("{}/a/gone", server.uri()))
        .await;

    assert!(matches!(
        result,
        Err(Error::Resolution(ResolutionError::PageFetch { .. }))
    ));
}

fn descriptor_named(id: &str, filename: &str) -> DownloadDescriptor {
    DownloadDescriptor {
        source_url: format!("https://bunkr.cr/f/{}", id),
        resolved_url: format!("https://cdn12.bunkr.ru/{}", filename),
        filename: filename.to_string(),
        subdomain: "cdn12".to_string(),
        expected_size: None,
    }
}

#[test]
fn repeated_filenames_are_numbered_in_listing_order() {
    let mut descriptors = vec![
        descriptor_named("a", "photo.jpg"),
        descriptor_named("b", "PHOTO.jpg"),
        descriptor_named("c", "photo (2).jpg"),
        descriptor_named("d", "clip.mp4"),
        descriptor_named("e", "photo.jpg"),
    ];
    make_filenames_unique(&mut descriptors);

    let names: Vec<&str> = descriptors.iter().map(|d| d.filename.as_str()).collect();
    assert_eq!(
        names,
        vec!["photo.jpg", "PHOTO (3).jpg", "photo (2).jpg", "clip.mp4", "photo (4).jpg"]
    );
}

#[tokio::test]
async fn album_items_sharing_a_name_get_distinct_filenames() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/a/dup"))
        .respond_with(ResponseTemplate::new(200).set_body_string(album_page(
            "Dup",
            &["/f/one", "/f/two"],
            None,
        )))
        .mount(&server)
        .await;
    mount_item(&server, "one", "photo.jpg").await;
    mount_item(&server, "two", "photo.jpg").await;

    let resolved = resolver_for(&server)
        .resolve(&format!("{}/a/dup", server.uri()))
        .await
        .unwrap();

    let names: Vec<&str> = resolved
        .descriptors
        .iter()
        .map(|d| d.filename.as_str())
        .collect();
    assert_eq!(names, vec!["photo.jpg", "photo (2).jpg"]);
    assert!(resolved.descriptors[1].source_url.ends_with("/f/two"));
}

#[tokio::test]
async fn failed_later_album_page_is_recorded() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/a/half"))
        .and(query_param("page", "1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(album_page("Half", &["/f/aaa"], Some(2))),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/a/half"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;
    mount_item(&server, "aaa", "a.jpg").await;

    let resolved = resolver_for(&server)
        .resolve(&format!("{}/a/half", server.uri()))
        .await
        .unwrap();

    assert_eq!(resolved.pages_fetched, 1);
    assert_eq!(resolved.descriptors.len(), 1);
    assert_eq!(resolved.failed_pages.len(), 1);
    assert!(resolved.failed_pages[0].url.ends_with("/a/half?page=2"));
    assert!(resolved.failed_pages[0].reason.contains("500"));
}
