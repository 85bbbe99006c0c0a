pub mod backfill;
pub mod retry_queue;
pub mod scheduler;
pub mod snapshot;

pub use backfill::{run_backfill_once, spawn_backfill};
pub use retry_queue::{MarkAction, PendingDelivery, RetryQueue, BACKOFF_SECS, MAX_RETRIES};
pub use scheduler::{Scheduler, SchedulerConfig};
pub use snapshot::write_snapshot;
