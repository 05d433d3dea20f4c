//! URL resolution: album pagination, item pages and link decryption
//!
//! A job URL is either an album (`/a/<id>`) or a single item (`/f/`, `/i/`,
//! `/v/`). Albums are walked page by page until the listing runs out; every
//! item page is then turned into a [`DownloadDescriptor`] by extracting the
//! media slug, asking the API for the encrypted link and decrypting it with
//! the configured [`UrlCipher`].

pub mod cipher;

use crate::config::{MAX_FILENAME_BYTES, NetworkConfig, RetryConfig};
use crate::error::{Error, ResolutionError, Result};
use crate::retry::download_with_retry;
use crate::types::DownloadDescriptor;
use crate::utils::{numbered_filename, safe_filename};
use cipher::{EncryptedPayload, UrlCipher, XorTimestampCipher};
use futures::StreamExt;
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::sync::{Arc, LazyLock};
use url::Url;

/// Upper bound on album pages fetched for one album
pub const MAX_ALBUM_PAGES: usize = 500;

/// Item pages resolved concurrently within one album
const ITEM_RESOLVE_CONCURRENCY: usize = 4;

static MEDIA_SLUG_REGEX: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"const\s+slug\s*=\s*"([a-zA-Z0-9_-]+)""#).ok());

static VALID_SLUG_REGEX: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_-]+$").ok());

/// What a job URL points at
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UrlKind {
    /// An album listing (`/a/<id>`)
    Album {
        /// Album identifier from the path
        id: String,
    },
    /// A single file page (`/f/`, `/i/` or `/v/`)
    Item {
        /// Item identifier from the path
        id: String,
    },
}

/// Classify a URL by its first path segment
pub fn classify_url(url: &str) -> Result<UrlKind> {
    let unsupported = |reason: &str| {
        Error::Resolution(ResolutionError::UnsupportedUrl {
            url: url.to_string(),
            reason: reason.to_string(),
        })
    };

    let parsed = Url::parse(url).map_err(|e| unsupported(&e.to_string()))?;
    let mut segments = parsed
        .path_segments()
        .ok_or_else(|| unsupported("URL has no path"))?
        .filter(|s| !s.is_empty());

    let kind = segments
        .next()
        .ok_or_else(|| unsupported("URL has no path"))?;
    let id = segments
        .next()
        .ok_or_else(|| unsupported("URL has no identifier"))?
        .to_string();

    match kind {
        "a" => Ok(UrlKind::Album { id }),
        "f" | "i" | "v" => Ok(UrlKind::Item { id }),
        other => Err(unsupported(&format!("unknown URL type '/{}/'", other))),
    }
}

/// Lowercased first DNS label of a URL's host (`cdn12` for `https://CDN12.bunkr.ru/x`)
pub fn subdomain_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    host.split('.')
        .next()
        .filter(|label| !label.is_empty())
        .map(|label| label.to_ascii_lowercase())
}

/// Item that could not be resolved and was left out of an album
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnresolvedItem {
    /// Item page URL
    pub url: String,
    /// Why it was skipped
    pub reason: String,
}

/// Result of resolving one job URL
#[derive(Clone, Debug, Default)]
pub struct ResolvedUrl {
    /// Album heading, when the URL is an album
    pub album_name: Option<String>,
    /// Album identifier, when the URL is an album
    pub album_id: Option<String>,
    /// Downloadable items in listing order
    pub descriptors: Vec<DownloadDescriptor>,
    /// Album items that were skipped because they could not be resolved
    pub unresolved: Vec<UnresolvedItem>,
    /// Album pages after the first that could not be fetched; the listing
    /// ends at the first such page
    pub failed_pages: Vec<UnresolvedItem>,
    /// Number of album pages fetched
    pub pages_fetched: usize,
}

/// Parsed album listing page
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AlbumPage {
    /// Album heading (first `<h1>`)
    pub title: Option<String>,
    /// Absolute item page URLs in page order
    pub item_urls: Vec<String>,
    /// Whether the page links to `page + 1`
    pub has_next: bool,
}

/// Parsed item page
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ItemPage {
    /// Filename printed on the page
    pub filename: Option<String>,
    /// Media slug from the page scripts
    pub slug: Option<String>,
}

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

fn element_text(element: scraper::ElementRef<'_>) -> Option<String> {
    let text = element.text().collect::<String>();
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    (!text.is_empty()).then_some(text)
}

/// Extract item links, heading and pagination from an album page
pub fn parse_album_page(html: &str, page_url: &Url, page: usize) -> AlbumPage {
    let document = Html::parse_document(html);
    let mut result = AlbumPage::default();

    if let Some(h1) = selector("h1") {
        result.title = document.select(&h1).next().and_then(element_text);
    }

    let Some(anchors) = selector("a[href]") else {
        return result;
    };
    let next_marker = format!("page={}", page + 1);

    for element in document.select(&anchors) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let Ok(absolute) = page_url.join(href) else {
            continue;
        };

        let path = absolute.path();
        if path.starts_with("/f/") || path.starts_with("/i/") || path.starts_with("/v/") {
            let mut item = absolute.clone();
            item.set_query(None);
            item.set_fragment(None);
            result.item_urls.push(item.to_string());
        } else if absolute.query().is_some_and(|q| {
            q.split('&').any(|pair| pair == next_marker)
        }) {
            result.has_next = true;
        }
    }

    result
}

/// Extract the filename and media slug from an item page
pub fn parse_item_page(html: &str) -> ItemPage {
    let slug = MEDIA_SLUG_REGEX
        .as_ref()
        .and_then(|re| re.captures(html))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string());

    let document = Html::parse_document(html);
    let filename = selector("h1")
        .and_then(|h1| document.select(&h1).next().and_then(element_text))
        .or_else(|| {
            selector(r#"meta[property="og:title"]"#).and_then(|meta| {
                document
                    .select(&meta)
                    .next()
                    .and_then(|e| e.value().attr("content"))
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty())
            })
        });

    ItemPage { filename, slug }
}

fn is_valid_slug(slug: &str) -> bool {
    VALID_SLUG_REGEX
        .as_ref()
        .is_some_and(|re| re.is_match(slug))
}

/// Last path segment of a URL, percent-decoded
fn last_segment(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.rfind(|s| !s.is_empty())?;
    let decoded = urlencoding::decode(segment).ok()?;
    Some(decoded.into_owned())
}

/// Replace the host of `url` with `domain`
fn with_domain(url: &str, domain: &str) -> Option<String> {
    let mut parsed = Url::parse(url).ok()?;
    parsed.set_host(Some(domain)).ok()?;
    Some(parsed.to_string())
}

/// Number repeated filenames (`photo.jpg`, `photo (2).jpg`, ...) so every
/// descriptor of an album has its own destination
///
/// Comparison ignores ASCII case to stay safe on case-insensitive volumes.
/// Numbering follows listing order, so re-runs map items to the same files.
pub fn make_filenames_unique(descriptors: &mut [DownloadDescriptor]) {
    let mut taken: HashSet<String> = descriptors
        .iter()
        .map(|d| d.filename.to_ascii_lowercase())
        .collect();
    let mut seen = HashSet::new();

    for descriptor in descriptors.iter_mut() {
        if seen.insert(descriptor.filename.to_ascii_lowercase()) {
            continue;
        }

        let mut n = 2;
        let renamed = loop {
            let candidate = numbered_filename(&descriptor.filename, n, MAX_FILENAME_BYTES);
            if taken.insert(candidate.to_ascii_lowercase()) {
                break candidate;
            }
            n += 1;
        };
        tracing::debug!(
            url = %descriptor.source_url,
            from = %descriptor.filename,
            to = %renamed,
            "Renamed duplicate filename"
        );
        seen.insert(renamed.to_ascii_lowercase());
        descriptor.filename = renamed;
    }
}

/// Resolves job URLs into download descriptors
pub struct LinkResolver {
    client: reqwest::Client,
    network: NetworkConfig,
    retry: RetryConfig,
    cipher: Arc<dyn UrlCipher>,
}

impl LinkResolver {
    /// Create a resolver using the current link cipher
    pub fn new(client: reqwest::Client, network: NetworkConfig, retry: RetryConfig) -> Self {
        Self::with_cipher(client, network, retry, Arc::new(XorTimestampCipher))
    }

    /// Create a resolver with a specific cipher implementation
    pub fn with_cipher(
        client: reqwest::Client,
        network: NetworkConfig,
        retry: RetryConfig,
        cipher: Arc<dyn UrlCipher>,
    ) -> Self {
        Self {
            client,
            network,
            retry,
            cipher,
        }
    }

    /// Resolve one job URL
    ///
    /// Fails only when the URL cannot be classified or its first page cannot
    /// be fetched. Album items that fail individually end up in
    /// [`ResolvedUrl::unresolved`].
    pub async fn resolve(&self, url: &str) -> Result<ResolvedUrl> {
        match classify_url(url)? {
            UrlKind::Album { id } => self.resolve_album(url, id).await,
            UrlKind::Item { .. } => {
                let descriptor = self.resolve_item(url).await?;
                Ok(ResolvedUrl {
                    descriptors: vec![descriptor],
                    ..Default::default()
                })
            }
        }
    }

    async fn resolve_album(&self, url: &str, album_id: String) -> Result<ResolvedUrl> {
        let mut base = Url::parse(url).map_err(|e| {
            Error::Resolution(ResolutionError::UnsupportedUrl {
                url: url.to_string(),
                reason: e.to_string(),
            })
        })?;
        base.set_query(None);
        base.set_fragment(None);

        let mut seen = HashSet::new();
        let mut item_urls = Vec::new();
        let mut album_name = None;
        let mut pages_fetched = 0;
        let mut failed_pages = Vec::new();

        for page in 1..=MAX_ALBUM_PAGES {
            let mut page_url = base.clone();
            page_url.set_query(Some(&format!("page={}", page)));

            let (html, final_url) = match self.fetch_page(page_url.as_str()).await {
                Ok(fetched) => fetched,
                // Later pages failing just end the listing
                Err(e) if page > 1 => {
                    tracing::warn!(url = %page_url, error = %e, "Album page fetch failed, stopping pagination");
                    failed_pages.push(UnresolvedItem {
                        url: page_url.to_string(),
                        reason: e.to_string(),
                    });
                    break;
                }
                Err(e) => return Err(e),
            };
            pages_fetched += 1;

            let final_url = Url::parse(&final_url).unwrap_or(page_url);
            let parsed = parse_album_page(&html, &final_url, page);
            if album_name.is_none() {
                album_name = parsed.title;
            }

            let mut new_items = 0;
            for item in parsed.item_urls {
                let identifier = last_segment(&item).unwrap_or_else(|| item.clone());
                if seen.insert(identifier) {
                    item_urls.push(item);
                    new_items += 1;
                }
            }

            tracing::debug!(page, new_items, total = item_urls.len(), "Album page parsed");

            if new_items == 0 || !parsed.has_next {
                break;
            }
        }

        tracing::info!(
            album_id = %album_id,
            items = item_urls.len(),
            pages = pages_fetched,
            "Album listing collected"
        );

        let results: Vec<(String, Result<DownloadDescriptor>)> = futures::stream::iter(item_urls)
            .map(|item_url| async move {
                let result = self.resolve_item(&item_url).await;
                (item_url, result)
            })
            .buffered(ITEM_RESOLVE_CONCURRENCY)
            .collect()
            .await;

        let mut resolved = ResolvedUrl {
            album_name,
            album_id: Some(album_id),
            failed_pages,
            pages_fetched,
            ..Default::default()
        };

        for (item_url, result) in results {
            match result {
                Ok(descriptor) => resolved.descriptors.push(descriptor),
                Err(e) => {
                    tracing::warn!(url = %item_url, error = %e, "Skipping unresolvable album item");
                    resolved.unresolved.push(UnresolvedItem {
                        url: item_url,
                        reason: e.to_string(),
                    });
                }
            }
        }

        make_filenames_unique(&mut resolved.descriptors);
        Ok(resolved)
    }

    /// Resolve a single item page into a descriptor
    pub async fn resolve_item(&self, url: &str) -> Result<DownloadDescriptor> {
        let (html, _) = self.fetch_page(url).await?;
        let page = parse_item_page(&html);

        let slug = page
            .slug
            .or_else(|| last_segment(url))
            .filter(|slug| is_valid_slug(slug))
            .ok_or_else(|| {
                Error::Resolution(ResolutionError::InvalidSlug {
                    url: url.to_string(),
                })
            })?;

        let payload = self.fetch_payload(url, &slug).await?;
        let resolved_url = self.cipher.decrypt(&payload).map_err(|e| {
            Error::Resolution(ResolutionError::Decryption {
                url: url.to_string(),
                reason: e.to_string(),
            })
        })?;

        let subdomain = subdomain_of(&resolved_url).ok_or_else(|| {
            Error::Resolution(ResolutionError::Decryption {
                url: url.to_string(),
                reason: format!("decrypted link '{}' has no host", resolved_url),
            })
        })?;

        let raw_name = page
            .filename
            .or_else(|| last_segment(&resolved_url))
            .unwrap_or_else(|| slug.clone());
        let mut filename = safe_filename(&raw_name);
        if filename.is_empty() {
            filename = slug;
        }

        tracing::debug!(url, resolved_url = %resolved_url, filename = %filename, "Item resolved");

        Ok(DownloadDescriptor {
            source_url: url.to_string(),
            resolved_url,
            filename,
            subdomain,
            expected_size: None,
        })
    }

    async fn fetch_payload(&self, url: &str, slug: &str) -> Result<EncryptedPayload> {
        let decryption = |reason: String| {
            Error::Resolution(ResolutionError::Decryption {
                url: url.to_string(),
                reason,
            })
        };

        let response = self
            .client
            .post(&self.network.api_endpoint)
            .header(reqwest::header::USER_AGENT, &self.network.user_agent)
            .timeout(self.network.request_timeout)
            .json(&serde_json::json!({ "slug": slug }))
            .send()
            .await
            .map_err(|e| decryption(e.to_string()))?;

        if !response.status().is_success() {
            return Err(decryption(format!("API returned HTTP {}", response.status().as_u16())));
        }

        response
            .json::<EncryptedPayload>()
            .await
            .map_err(|e| decryption(format!("malformed payload: {}", e)))
    }

    /// Fetch a page, retrying transient failures and falling back to the
    /// configured domain once after a 403
    ///
    /// Returns the body and the URL that produced it.
    async fn fetch_page(&self, url: &str) -> Result<(String, String)> {
        match self.fetch_with_retry(url).await {
            Ok(body) => Ok((body, url.to_string())),
            Err(Error::HttpStatus { status: 403, .. }) => {
                let Some(fallback) = with_domain(url, &self.network.fallback_domain) else {
                    return Err(page_fetch_error(url, "HTTP 403".to_string()));
                };
                tracing::warn!(url, fallback = %fallback, "Blocked with 403, retrying on fallback domain");
                self.fetch_with_retry(&fallback)
                    .await
                    .map(|body| (body, fallback.clone()))
                    .map_err(|e| page_fetch_error(&fallback, e.to_string()))
            }
            Err(e) => Err(page_fetch_error(url, e.to_string())),
        }
    }

    async fn fetch_with_retry(&self, url: &str) -> Result<String> {
        download_with_retry(&self.retry, || self.fetch_once(url)).await
    }

    async fn fetch_once(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, &self.network.user_agent)
            .timeout(self.network.request_timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        Ok(response.text().await?)
    }
}

fn page_fetch_error(url: &str, reason: String) -> Error {
    Error::Resolution(ResolutionError::PageFetch {
        url: url.to_string(),
        reason,
    })
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
