//! Background services - event log reaper.

use super::BunkrDownloader;

impl BunkrDownloader {
    /// Start the task that drops finished jobs once their grace period ends
    ///
    /// Removes the job's event log and its registry entry together, so a
    /// reaped job is reported as not found everywhere.
    pub(crate) fn start_reaper(&self) {
        let broker = self.broker.clone();
        let jobs = self.registry.jobs.clone();
        let shutdown = self.registry.shutdown.clone();
        let grace = self.config.broker.grace_period;
        let interval = self.config.broker.reap_interval;

        tracing::debug!(
            grace_secs = grace.as_secs(),
            interval_secs = interval.as_secs(),
            "Event log reaper started"
        );

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::debug!("Event log reaper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let reaped = broker.reap_expired(grace);
                        if !reaped.is_empty() {
                            let mut jobs = jobs.write();
                            for job_id in &reaped {
                                jobs.remove(job_id);
                            }
                            tracing::info!(count = reaped.len(), "Reaped finished jobs");
                        }
                    }
                }
            }
        });
    }
}
