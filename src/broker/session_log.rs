//! Line-oriented log of problematic URLs and outages

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Append-only session log shared by all jobs
///
/// Plain lines hold a URL that could not be downloaded; maintenance
/// entries use the `[MAINTENANCE] timestamp | subdomain | status | url`
/// format.
pub struct SessionLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl SessionLog {
    /// Session log at `path` (created on first write)
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Location of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Format a maintenance entry
    pub fn maintenance_line(
        timestamp: DateTime<Utc>,
        subdomain: &str,
        status: &str,
        url: &str,
    ) -> String {
        format!(
            "[MAINTENANCE] {} | {} | {} | {}",
            timestamp.format("%Y-%m-%d %H:%M:%S"),
            subdomain,
            status,
            url
        )
    }

    /// Record a URL that could not be downloaded
    pub async fn log_url(&self, url: &str) -> Result<()> {
        self.append(url).await
    }

    /// Record a maintenance event
    pub async fn log_maintenance(&self, subdomain: &str, status: &str, url: &str) -> Result<()> {
        self.append(&Self::maintenance_line(Utc::now(), subdomain, status, url))
            .await
    }

    async fn append(&self, line: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.fs_error(e))?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| self.fs_error(e))?;

        file.write_all(format!("{}\n", line).as_bytes())
            .await
            .map_err(|e| self.fs_error(e))?;
        file.flush().await.map_err(|e| self.fs_error(e))?;
        Ok(())
    }

    fn fs_error(&self, e: std::io::Error) -> Error {
        Error::Filesystem {
            path: self.path.clone(),
            reason: e.to_string(),
        }
    }
}
