//! Background work for atrium.
//!
//! This crate provides the pieces that run beside the HTTP server:
//!
//! - **Pub/Sub**: Redis fan-out of realtime envelopes across server instances
//! - **Scheduler**: Periodic maintenance such as purging deleted attachments

pub mod pubsub;
pub mod scheduler;

pub use pubsub::{PubSubSseBridge, RedisPubSub};
pub use scheduler::{JobExecutor, MaintenanceJobs, SchedulerConfig, run_scheduler};
