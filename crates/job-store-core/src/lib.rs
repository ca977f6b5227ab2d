//! Pure domain types, port traits, and gate logic for the concurrency-aware
//! job scheduler store. Zero sqlx — `job-store-postgres` is the only crate
//! that knows how any of this is persisted.

pub mod catalog;
pub mod error;
pub mod executing;
pub mod filters;
pub mod ports;
pub mod queue_state;
pub mod state;
pub mod types;

pub use catalog::{ConcurrencyCatalog, ConcurrencyDescriptor, ConcurrencyKind};
pub use error::JobStoreError;
pub use executing::{effective_exclusions, job_allowed, ExecutingTable, LocalCounts};
pub use filters::{AcquisitionFilter, FilterBus};
pub use queue_state::{QueueStateContext, QueueStateEventKind, QueueStateHandler};
pub use state::TriggerState;
pub use types::{
    ExecutingEntry, FiredTrigger, FiredTriggerState, JobDetail, JobKey, JobTypeName,
    SchedulerInstanceId, Trigger, TriggerKey,
};
