//! Chunked, resumable file writer
//!
//! Bodies are streamed into `<final>.part` and only renamed to the final
//! name after a flush and fsync. An interrupted stream leaves the `.part`
//! file behind; the next attempt resumes it with a `Range` request.

use crate::config::NetworkConfig;
use crate::error::{Error, Result};
use crate::types::{DownloadDescriptor, WriteOutcome};
use crate::utils::{
    UNKNOWN_SIZE_BASELINE, chunk_size_for, get_available_space, nearest_existing_ancestor,
};
use reqwest::StatusCode;
use reqwest::header::{CONNECTION, CONTENT_LENGTH, RANGE, REFERER, USER_AGENT};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

/// Progress callback: `(bytes_written, total_bytes)`
///
/// `bytes_written` never decreases within one [`ChunkedWriter::write`] call.
/// Across calls it can restart at 0, after a rejected `Range` discards the
/// partial file. `total_bytes` may go from `None` to `Some` mid-stream once a
/// HEAD request supplies the length.
pub type ProgressFn<'a> = &'a (dyn Fn(u64, Option<u64>) + Send + Sync);

/// Suffix of in-flight files
pub const PART_SUFFIX: &str = ".part";

/// Path of the in-flight file for `final_path`
pub fn part_path_for(final_path: &Path) -> PathBuf {
    let mut name = final_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(PART_SUFFIX);
    final_path.with_file_name(name)
}

/// Fail with [`Error::InsufficientSpace`] when the volume holding `path` has
/// less than `min_free` bytes available
pub fn check_disk_space(path: &Path, min_free: u64) -> Result<u64> {
    let volume = nearest_existing_ancestor(path);
    let available = get_available_space(&volume)
        .map_err(|e| Error::DiskSpaceCheckFailed(format!("{}: {}", volume.display(), e)))?;

    if available < min_free {
        return Err(Error::InsufficientSpace {
            required: min_free,
            available,
        });
    }
    Ok(available)
}

/// Monotone completion estimate for a single file
///
/// With a known total this is plain `bytes / total`. Without one, the
/// estimate blends a linear ramp against a 50 MB baseline with a log curve
/// and stays below 100 until the download actually finishes.
#[derive(Clone, Debug, Default)]
pub struct ProgressEstimator {
    estimate: f64,
}

impl ProgressEstimator {
    /// Next percentage for `bytes` written; never lower than the previous one
    pub fn update(&mut self, bytes: u64, total: Option<u64>) -> f64 {
        let next = match total {
            Some(total) if total > 0 => (bytes as f64 / total as f64 * 100.0).min(100.0),
            _ => {
                if bytes == 0 {
                    return self.estimate;
                }
                let linear = bytes as f64 / UNKNOWN_SIZE_BASELINE as f64 * 100.0;
                let log_scaled = ((bytes + 1) as f64).log10() * 20.0;
                linear.max(log_scaled).min(99.0)
            }
        };
        self.estimate = self.estimate.max(next);
        self.estimate
    }

    /// Current estimate
    pub fn current(&self) -> f64 {
        self.estimate
    }
}

/// Streams download bodies to disk
pub struct ChunkedWriter {
    client: reqwest::Client,
    network: NetworkConfig,
}

fn fs_error(path: &Path, e: std::io::Error) -> Error {
    Error::Filesystem {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}

impl ChunkedWriter {
    /// Create a writer using the given client and network settings
    pub fn new(client: reqwest::Client, network: NetworkConfig) -> Self {
        Self { client, network }
    }

    /// Download `descriptor` into `destination`
    ///
    /// Returns `Skipped` without any request when the final file is already
    /// present (with the expected size, when one is known). Stream
    /// interruptions and cancellation return `Partial` and keep the `.part`
    /// file; HTTP and connection errors are returned as errors for the retry
    /// controller to classify.
    pub async fn write(
        &self,
        descriptor: &DownloadDescriptor,
        destination: &Path,
        on_progress: ProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> Result<WriteOutcome> {
        let final_path = destination.join(&descriptor.filename);
        let part_path = part_path_for(&final_path);

        if let Ok(meta) = tokio::fs::metadata(&final_path).await
            && meta.is_file()
            && descriptor.expected_size.is_none_or(|size| size == meta.len())
        {
            tracing::debug!(path = %final_path.display(), "File already complete, skipping");
            return Ok(WriteOutcome::Skipped);
        }

        tokio::fs::create_dir_all(destination)
            .await
            .map_err(|e| fs_error(destination, e))?;

        let existing = tokio::fs::metadata(&part_path)
            .await
            .map(|m| m.len())
            .unwrap_or(0);

        if cancel.is_cancelled() {
            return Ok(WriteOutcome::Partial { bytes: existing });
        }

        let mut request = self
            .client
            .get(&descriptor.resolved_url)
            .header(USER_AGENT, &self.network.user_agent)
            .header(REFERER, &self.network.download_referer)
            .header(CONNECTION, "keep-alive");
        if existing > 0 {
            request = request.header(RANGE, format!("bytes={}-", existing));
        }

        let response = tokio::select! {
            _ = cancel.cancelled() => return Ok(WriteOutcome::Partial { bytes: existing }),
            sent = tokio::time::timeout(self.network.download_timeout, request.send()) => match sent {
                Ok(sent) => sent?,
                Err(_) => {
                    return Err(Error::Io(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        format!("no response from {} within {:?}", descriptor.resolved_url, self.network.download_timeout),
                    )));
                }
            },
        };

        let status = response.status();
        if status == StatusCode::RANGE_NOT_SATISFIABLE && existing > 0 {
            // Stale partial file; start over on the next attempt
            tracing::debug!(path = %part_path.display(), "Range rejected, discarding partial file");
            tokio::fs::remove_file(&part_path)
                .await
                .map_err(|e| fs_error(&part_path, e))?;
            return Ok(WriteOutcome::Partial { bytes: 0 });
        }
        if !status.is_success() {
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                url: descriptor.resolved_url.clone(),
            });
        }

        let resumed = existing > 0 && status == StatusCode::PARTIAL_CONTENT;
        let body_length = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|len| *len > 0);

        let start = if resumed { existing } else { 0 };
        let mut written = start;
        let mut total = body_length
            .map(|len| len + start)
            .or(descriptor.expected_size);

        let opened = if resumed {
            tracing::debug!(path = %part_path.display(), offset = existing, "Resuming partial file");
            tokio::fs::OpenOptions::new()
                .append(true)
                .open(&part_path)
                .await
        } else {
            tokio::fs::File::create(&part_path).await
        };
        let mut file = opened.map_err(|e| fs_error(&part_path, e))?;

        // Ask for the length on the side; the body keeps streaming meanwhile
        let mut head_length = if total.is_none() {
            tracing::debug!(url = %descriptor.resolved_url, "Server did not provide a content length");
            Some(Box::pin(self.head_content_length(&descriptor.resolved_url)))
        } else {
            None
        };

        let mut chunk_size = chunk_size_for(total);
        let mut buffer: Vec<u8> = Vec::with_capacity(chunk_size);
        let mut response = response;
        on_progress(written, total);

        let interrupted = loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break true,
                answered = async {
                    match head_length.as_mut() {
                        Some(lookup) => lookup.await,
                        None => std::future::pending().await,
                    }
                }, if head_length.is_some() => {
                    head_length = None;
                    if let Some(length) = answered {
                        tracing::debug!(url = %descriptor.resolved_url, length, "Content length taken from HEAD");
                        total = Some(length);
                        chunk_size = chunk_size_for(total);
                        on_progress(written, total);
                    }
                    continue;
                }
                next = tokio::time::timeout(self.network.download_timeout, response.chunk()) => next,
            };

            match next {
                Ok(Ok(Some(bytes))) => {
                    buffer.extend_from_slice(&bytes);
                    if buffer.len() >= chunk_size {
                        file.write_all(&buffer)
                            .await
                            .map_err(|e| fs_error(&part_path, e))?;
                        written += buffer.len() as u64;
                        buffer.clear();
                        on_progress(written, total);
                    }
                }
                Ok(Ok(None)) => break false,
                Ok(Err(e)) => {
                    tracing::debug!(url = %descriptor.resolved_url, error = %e, "Body stream interrupted");
                    break true;
                }
                Err(_) => {
                    tracing::debug!(url = %descriptor.resolved_url, "Body read timed out");
                    break true;
                }
            }
        };

        if !buffer.is_empty() {
            file.write_all(&buffer)
                .await
                .map_err(|e| fs_error(&part_path, e))?;
            written += buffer.len() as u64;
            on_progress(written, total);
        }
        file.flush().await.map_err(|e| fs_error(&part_path, e))?;
        file.sync_all().await.map_err(|e| fs_error(&part_path, e))?;
        drop(file);

        let short = body_length.is_some_and(|len| written < start + len);
        if interrupted || short {
            tracing::debug!(
                path = %part_path.display(),
                bytes = written,
                expected = ?total,
                "Partial download kept"
            );
            return Ok(WriteOutcome::Partial { bytes: written });
        }

        tokio::fs::rename(&part_path, &final_path)
            .await
            .map_err(|e| fs_error(&final_path, e))?;

        Ok(WriteOutcome::Complete { bytes: written })
    }

    /// Length announced by a HEAD request, if the server answers in time
    async fn head_content_length(&self, url: &str) -> Option<u64> {
        let response = self
            .client
            .head(url)
            .header(USER_AGENT, &self.network.user_agent)
            .header(REFERER, &self.network.download_referer)
            .timeout(self.network.request_timeout)
            .send()
            .await
            .and_then(|r| r.error_for_status());

        match response {
            Ok(response) => response
                .headers()
                .get(CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|len| *len > 0),
            Err(e) => {
                tracing::debug!(url, error = %e, "HEAD request for content length failed");
                None
            }
        }
    }
}
