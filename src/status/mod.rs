//! Per-subdomain operational status, cached and fetched single-flight
//!
//! The status page lists every edge server with a short status label. A
//! lookup for a subdomain hits the cache while the entry is younger than the
//! policy TTL. On a miss, exactly one fetch runs per subdomain; concurrent
//! callers await the same shared future. The map lock is only held while
//! the map itself is touched, never across the fetch.

use crate::error::{Error, Result};
use crate::types::{ServerStatus, SubdomainStatus};
use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use scraper::{Html, Selector};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One row of the status page
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusEntry {
    /// Lowercased server name
    pub subdomain: String,
    /// Classified status
    pub status: ServerStatus,
    /// Label as printed
    pub raw_status: String,
}

/// Source of status page snapshots
#[async_trait]
pub trait StatusSource: Send + Sync {
    /// Fetch every server listed on the status page
    async fn fetch(&self) -> Result<Vec<StatusEntry>>;
}

/// Fetches and parses the HTML status page
pub struct HttpStatusSource {
    client: reqwest::Client,
    url: String,
    user_agent: String,
    timeout: Duration,
}

impl HttpStatusSource {
    /// Create a source for the given status page
    pub fn new(
        client: reqwest::Client,
        url: impl Into<String>,
        user_agent: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            url: url.into(),
            user_agent: user_agent.into(),
            timeout,
        }
    }
}

#[async_trait]
impl StatusSource for HttpStatusSource {
    async fn fetch(&self) -> Result<Vec<StatusEntry>> {
        let response = self
            .client
            .get(&self.url)
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .timeout(self.timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::HttpStatus {
                status: response.status().as_u16(),
                url: self.url.clone(),
            });
        }

        let html = response.text().await?;
        let entries = parse_status_page(&html);
        if entries.is_empty() {
            return Err(Error::Other(format!(
                "status page {} lists no servers",
                self.url
            )));
        }
        Ok(entries)
    }
}

/// Classify a status label
pub fn classify_status_label(label: &str) -> ServerStatus {
    if label.trim().eq_ignore_ascii_case("operational") {
        ServerStatus::Operational
    } else if label.to_lowercase().contains("maintenance") {
        ServerStatus::Maintenance
    } else {
        ServerStatus::Offline
    }
}

/// Parse server rows out of the status page
///
/// A row is any element holding both a `<p>` (server name) and a `<span>`
/// (status label); the innermost such element wins so nested wrappers are
/// not counted twice.
pub fn parse_status_page(html: &str) -> Vec<StatusEntry> {
    let document = Html::parse_document(html);
    let (Ok(rows), Ok(name), Ok(label)) = (
        Selector::parse("div"),
        Selector::parse("p"),
        Selector::parse("span"),
    ) else {
        return Vec::new();
    };

    let mut entries: Vec<StatusEntry> = Vec::new();
    for row in document.select(&rows) {
        // Skip wrappers that contain other rows
        if row
            .select(&rows)
            .any(|inner| inner.select(&name).next().is_some() && inner.select(&label).next().is_some())
        {
            continue;
        }

        let (Some(name_el), Some(label_el)) = (row.select(&name).next(), row.select(&label).next())
        else {
            continue;
        };

        let subdomain = name_el.text().collect::<String>().trim().to_lowercase();
        let raw_status = label_el.text().collect::<String>().trim().to_string();
        if subdomain.is_empty() || raw_status.is_empty() {
            continue;
        }
        if entries.iter().any(|e| e.subdomain == subdomain) {
            continue;
        }

        entries.push(StatusEntry {
            status: classify_status_label(&raw_status),
            subdomain,
            raw_status,
        });
    }
    entries
}

/// Per-lookup knobs, set per job
#[derive(Clone, Copy, Debug)]
pub struct StatusPolicy {
    /// When false, every subdomain reports operational without network I/O
    pub enabled: bool,
    /// Maximum age of a cached entry
    pub ttl: Duration,
}

impl Default for StatusPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(60),
        }
    }
}

type PendingLookup = Shared<BoxFuture<'static, SubdomainStatus>>;

enum Slot {
    Ready {
        status: SubdomainStatus,
        fetched_at: Instant,
    },
    Pending(PendingLookup),
}

type Slots = Arc<Mutex<HashMap<String, Slot>>>;

/// Process-wide status cache
pub struct StatusCache {
    source: Arc<dyn StatusSource>,
    slots: Slots,
}

impl StatusCache {
    /// Create a cache backed by `source`
    pub fn new(source: Arc<dyn StatusSource>) -> Self {
        Self {
            source,
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Status of `subdomain`, fetching the status page at most once per stale key
    ///
    /// Fetch failures and unlisted subdomains yield [`ServerStatus::Unknown`],
    /// which is never cached.
    pub async fn get_status(&self, subdomain: &str, policy: &StatusPolicy) -> SubdomainStatus {
        let key = subdomain.to_ascii_lowercase();
        if !policy.enabled {
            return SubdomainStatus::synthetic(&key, ServerStatus::Operational);
        }

        let lookup = {
            let mut slots = self.slots.lock();
            match slots.get(&key) {
                Some(Slot::Ready { status, fetched_at }) if fetched_at.elapsed() < policy.ttl => {
                    tracing::debug!(subdomain = %key, "Status cache hit");
                    return status.clone();
                }
                Some(Slot::Pending(pending)) => pending.clone(),
                _ => {
                    let lookup = Self::fetch_into(self.source.clone(), self.slots.clone(), key.clone())
                        .boxed()
                        .shared();
                    slots.insert(key.clone(), Slot::Pending(lookup.clone()));
                    lookup
                }
            }
        };

        lookup.await
    }

    async fn fetch_into(source: Arc<dyn StatusSource>, slots: Slots, key: String) -> SubdomainStatus {
        tracing::debug!(subdomain = %key, "Fetching status page");

        let entries = match source.fetch().await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(subdomain = %key, error = %e, "Status page fetch failed");
                slots.lock().remove(&key);
                return SubdomainStatus::synthetic(&key, ServerStatus::Unknown);
            }
        };

        let now = Utc::now();
        let fetched_at = Instant::now();
        let mut result = None;
        let mut slots = slots.lock();

        for entry in entries {
            let status = SubdomainStatus {
                subdomain: entry.subdomain.clone(),
                status: entry.status,
                raw_status: Some(entry.raw_status),
                checked_at: now,
            };
            if entry.subdomain == key {
                result = Some(status.clone());
            } else if matches!(slots.get(&entry.subdomain), Some(Slot::Pending(_))) {
                // Another lookup owns that key
                continue;
            }
            slots.insert(entry.subdomain, Slot::Ready { status, fetched_at });
        }

        match result {
            Some(status) => status,
            None => {
                slots.remove(&key);
                SubdomainStatus::synthetic(&key, ServerStatus::Unknown)
            }
        }
    }

    /// Currently cached (ready) entries, sorted by subdomain
    pub fn snapshot(&self) -> Vec<SubdomainStatus> {
        let slots = self.slots.lock();
        let mut statuses: Vec<SubdomainStatus> = slots
            .values()
            .filter_map(|slot| match slot {
                Slot::Ready { status, .. } => Some(status.clone()),
                Slot::Pending(_) => None,
            })
            .collect();
        statuses.sort_by(|a, b| a.subdomain.cmp(&b.subdomain));
        statuses
    }
}
