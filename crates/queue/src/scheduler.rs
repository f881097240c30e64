//! Scheduled jobs for periodic maintenance tasks.

#![allow(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use atrium_common::MaintenanceConfig;
use atrium_core::AttachmentService;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval between attachment purges (default: 1 hour).
    pub attachment_purge_interval: Duration,
    /// Attachments purged per run.
    pub attachment_purge_batch_size: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from(&MaintenanceConfig::default())
    }
}

impl From<&MaintenanceConfig> for SchedulerConfig {
    fn from(config: &MaintenanceConfig) -> Self {
        Self {
            attachment_purge_interval: Duration::from_secs(
                config.attachment_purge_interval_secs.max(1),
            ),
            attachment_purge_batch_size: config.attachment_purge_batch_size.max(1),
        }
    }
}

/// Job executor trait for scheduled jobs.
#[async_trait::async_trait]
pub trait JobExecutor: Send + Sync {
    /// Remove stored files of attachments whose message was deleted.
    async fn purge_deleted_attachments(
        &self,
        limit: u64,
    ) -> Result<u64, Box<dyn std::error::Error + Send + Sync>>;
}

/// Jobs backed by the messaging services.
#[derive(Clone)]
pub struct MaintenanceJobs {
    attachments: AttachmentService,
}

impl MaintenanceJobs {
    #[must_use]
    pub const fn new(attachments: AttachmentService) -> Self {
        Self { attachments }
    }
}

#[async_trait::async_trait]
impl JobExecutor for MaintenanceJobs {
    async fn purge_deleted_attachments(
        &self,
        limit: u64,
    ) -> Result<u64, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self.attachments.purge_deleted(limit).await?)
    }
}

/// Run the scheduler with the given configuration and executor.
pub fn run_scheduler<E: JobExecutor + 'static>(
    config: SchedulerConfig,
    executor: Arc<E>,
) -> JoinHandle<()> {
    let purge_interval = config.attachment_purge_interval;
    let batch_size = config.attachment_purge_batch_size;

    tokio::spawn(async move {
        let mut interval = interval(purge_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match executor.purge_deleted_attachments(batch_size).await {
                Ok(count) => {
                    if count > 0 {
                        tracing::info!(count, "Purged deleted attachments");
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to purge deleted attachments");
                }
            }
        }
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Default)]
    struct CountingExecutor {
        runs: AtomicU64,
        last_limit: AtomicU64,
    }

    #[async_trait::async_trait]
    impl JobExecutor for CountingExecutor {
        async fn purge_deleted_attachments(
            &self,
            limit: u64,
        ) -> Result<u64, Box<dyn std::error::Error + Send + Sync>> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            self.last_limit.store(limit, Ordering::SeqCst);
            if limit == 0 {
                return Err("empty batch".into());
            }
            Ok(0)
        }
    }

    #[test]
    fn test_scheduler_config_default() {
        let config = SchedulerConfig::default();
        assert_eq!(config.attachment_purge_interval, Duration::from_secs(3600));
        assert_eq!(config.attachment_purge_batch_size, 100);
    }

    #[test]
    fn test_scheduler_config_rejects_zero() {
        let config = SchedulerConfig::from(&MaintenanceConfig {
            attachment_purge_interval_secs: 0,
            attachment_purge_batch_size: 0,
        });
        assert_eq!(config.attachment_purge_interval, Duration::from_secs(1));
        assert_eq!(config.attachment_purge_batch_size, 1);
    }

    #[tokio::test]
    async fn test_scheduler_runs_purge_immediately_and_repeats() {
        let executor = Arc::new(CountingExecutor::default());
        let handle = run_scheduler(
            SchedulerConfig {
                attachment_purge_interval: Duration::from_millis(20),
                attachment_purge_batch_size: 25,
            },
            executor.clone(),
        );

        tokio::time::sleep(Duration::from_millis(70)).await;
        handle.abort();

        assert!(executor.runs.load(Ordering::SeqCst) >= 2);
        assert_eq!(executor.last_limit.load(Ordering::SeqCst), 25);
    }
}
