//! Port traits for external collaborators (§6 "Consumed from
//! collaborators"). Storage ports are implemented by `job-store-postgres`;
//! these narrower ones are implemented by the surrounding application.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{JobDetail, JobTypeName};

/// Resolves job-type strings to runtime types. May fail with a
/// persistence-layer error; a failure is isolated to the one trigger
/// being processed (§7).
#[async_trait]
pub trait TypeLoader: Send + Sync {
    async fn resolve(&self, job_type: &JobTypeName) -> anyhow::Result<()>;
}

/// Wakes the dispatcher. The core always passes
/// [`crate::types::sentinel_past_timestamp`] to force immediate
/// re-evaluation (§6, §9).
#[async_trait]
pub trait SchedulerSignaler: Send + Sync {
    async fn signal_scheduling_change_immediately(&self, candidate_next_fire_time: DateTime<Utc>);
}

/// One-shot read of thread-pool size, cached by the caller after the
/// first read (§6).
pub trait SchedulerFactory: Send + Sync {
    fn thread_pool_size(&self) -> u32;
}

/// Reads `Quartz.LimitedConcurrencyOverrides` — an ordered mapping
/// `{ typeShortName: int }` (§6).
pub trait SettingsProvider: Send + Sync {
    fn limited_concurrency_overrides(&self) -> HashMap<String, u32>;
}

/// Builds a descriptive `(name, description)` tuple from a job detail for
/// display in queue-state events (§6).
pub trait JobFactory: Send + Sync {
    fn describe(&self, job_detail: &JobDetail) -> (String, String);
}

/// In-process settings provider reading overrides from a pre-parsed map —
/// e.g. deserialized from `QUARTZ_LIMITED_CONCURRENCY_OVERRIDES` JSON by
/// the caller. Kept trivial on purpose: the catalog never needs to know
/// whether the map came from an env var, a file, or a test fixture.
pub struct StaticSettingsProvider(pub HashMap<String, u32>);

impl SettingsProvider for StaticSettingsProvider {
    fn limited_concurrency_overrides(&self) -> HashMap<String, u32> {
        self.0.clone()
    }
}
