//! Shutdown coordination.

use crate::error::Result;
use std::sync::atomic::Ordering;
use std::time::Duration;

use super::BunkrDownloader;

/// How long shutdown waits for running jobs to settle
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

impl BunkrDownloader {
    /// Gracefully shut down the downloader
    ///
    /// This method performs a graceful shutdown sequence:
    /// 1. Stops accepting new jobs
    /// 2. Cancels every running job (writes stop at the next chunk boundary
    ///    and keep their `.part` files)
    /// 3. Waits for the jobs to record their terminal status, up to 30 seconds
    /// 4. Stops the background reaper
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        self.registry.accepting_new.store(false, Ordering::SeqCst);
        tracing::info!("Stopped accepting new jobs");

        {
            let jobs = self.registry.jobs.read();
            for (job_id, entry) in jobs.iter() {
                if !entry.info.status.is_terminal() {
                    tracing::debug!(job_id = %job_id, "Signaling cancellation");
                    entry.cancel.cancel();
                }
            }
        }

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.wait_for_active_jobs()).await {
            Ok(()) => tracing::info!("All jobs settled"),
            Err(_) => {
                tracing::warn!("Timeout waiting for jobs to settle, proceeding with shutdown")
            }
        }

        // Also stops the reaper
        self.registry.shutdown.cancel();

        tracing::info!("Graceful shutdown complete");
        Ok(())
    }

    /// Wait until no registered job is pending or running
    async fn wait_for_active_jobs(&self) {
        while self.has_active_jobs() {
            tracing::debug!("Waiting for active jobs to settle");
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}
