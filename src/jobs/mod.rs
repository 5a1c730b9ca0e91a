//! Background job system: registry, event fan-out, execution, and scheduling
//!
//! All job state lives in the in-memory [`JobStore`]; every mutation goes
//! through the store so the [`JobEventBus`] observes it. The [`JobExecutor`]
//! runs at most one job at a time against the sync pipeline, and the
//! [`SyncScheduler`] re-enqueues enabled sync targets on a timer.

pub mod event_bus;
pub mod executor;
pub mod scheduler;
pub mod store;

pub use event_bus::{BusMessage, JobEvent, JobEventBus, Subscription};
pub use executor::JobExecutor;
pub use scheduler::{SchedulerStatus, SyncScheduler, TargetCounts};
pub use store::{
    ContentInfo, EnqueueOutcome, Job, JobError, JobKind, JobStatus, JobStore, SyncStats,
    TransitionFields,
};
