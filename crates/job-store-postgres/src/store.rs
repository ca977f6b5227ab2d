//! The job store facade: wires the catalog, filter bus, executing table,
//! and pool together behind the public query surface (§6 "Exposed to
//! collaborators").

use std::sync::Arc;

use job_store_core::catalog::ConcurrencyCatalog;
use job_store_core::executing::{effective_exclusions, ExecutingTable};
use job_store_core::filters::{AcquisitionFilter, FilterBus};
use job_store_core::ports::{JobFactory, SchedulerFactory, SchedulerSignaler, SettingsProvider, TypeLoader};
use job_store_core::queue_state::{ExecutingSnapshotEntry, QueueStateHandler};
use job_store_core::types::{JobTypeName, Trigger};

use crate::acquisition::{AcquireRequest, AcquisitionEngine};
use crate::delegate;
use crate::error::PersistenceError;
use crate::firing::{FiringEngine, FiredBundle, TriggerClock};
use crate::publisher::Publisher;

/// Constructor bundle, analogous to the base workflow engine's
/// `(pool, definitions)` pair: everything the store needs that isn't
/// learned at runtime.
pub struct JobStoreConfig {
    pub scheduler_instance_id: String,
    pub catalog: ConcurrencyCatalog,
    pub filters: Vec<Arc<dyn AcquisitionFilter>>,
}

pub struct JobStore {
    pool: sqlx::PgPool,
    scheduler_instance_id: String,
    catalog: ConcurrencyCatalog,
    filter_bus: FilterBus,
    executing: ExecutingTable,
    type_loader: Arc<dyn TypeLoader>,
    clock: Arc<dyn TriggerClock>,
    signaler: Arc<dyn SchedulerSignaler>,
    scheduler_factory: Arc<dyn SchedulerFactory>,
    job_factory: Arc<dyn JobFactory>,
    handler: Arc<dyn QueueStateHandler>,
}

#[allow(clippy::too_many_arguments)]
impl JobStore {
    pub fn new(
        pool: sqlx::PgPool,
        mut config: JobStoreConfig,
        settings: &dyn SettingsProvider,
        type_loader: Arc<dyn TypeLoader>,
        clock: Arc<dyn TriggerClock>,
        signaler: Arc<dyn SchedulerSignaler>,
        scheduler_factory: Arc<dyn SchedulerFactory>,
        job_factory: Arc<dyn JobFactory>,
        handler: Arc<dyn QueueStateHandler>,
    ) -> Self {
        config.catalog.apply_overrides(&settings.limited_concurrency_overrides());
        let (filter_bus, _changed_rx) = FilterBus::new(config.filters);

        Self {
            pool,
            scheduler_instance_id: config.scheduler_instance_id,
            catalog: config.catalog,
            filter_bus,
            executing: ExecutingTable::new(),
            type_loader,
            clock,
            signaler,
            scheduler_factory,
            job_factory,
            handler,
        }
    }

    fn publisher(&self) -> Publisher<'_> {
        Publisher {
            pool: &self.pool,
            catalog: &self.catalog,
            filters: &self.filter_bus,
            executing: &self.executing,
            scheduler_factory: self.scheduler_factory.as_ref(),
            job_factory: self.job_factory.as_ref(),
            handler: self.handler.as_ref(),
        }
    }

    fn acquisition_engine(&self) -> AcquisitionEngine<'_> {
        AcquisitionEngine {
            pool: &self.pool,
            catalog: &self.catalog,
            filters: &self.filter_bus,
            executing: &self.executing,
            type_loader: self.type_loader.as_ref(),
            scheduler_instance_id: &self.scheduler_instance_id,
        }
    }

    /// `AcquireNextTriggers` (§4.5), publishing an "added" event once the
    /// batch is durable.
    pub async fn acquire_next_triggers(
        &self,
        request: AcquireRequest,
    ) -> Result<Vec<Trigger>, PersistenceError> {
        let acquired = self.acquisition_engine().acquire_next_triggers(request).await?;
        if !acquired.is_empty() {
            self.publisher()
                .publish(job_store_core::queue_state::QueueStateEventKind::Added)
                .await;
        }
        Ok(acquired)
    }

    /// `TriggersFired(batch)` (§4.6).
    pub async fn triggers_fired(
        &self,
        acquired: &[Trigger],
    ) -> Result<Vec<Option<FiredBundle>>, PersistenceError> {
        let publisher = self.publisher();
        let engine = FiringEngine {
            pool: &self.pool,
            catalog: &self.catalog,
            executing: &self.executing,
            type_loader: self.type_loader.as_ref(),
            clock: self.clock.as_ref(),
            signaler: self.signaler.as_ref(),
            publisher: &publisher,
        };
        engine
            .triggers_fired(acquired, &self.scheduler_instance_id)
            .await
    }

    /// `TriggeredJobComplete` (§4.6).
    pub async fn triggered_job_complete(
        &self,
        job_key: &job_store_core::types::JobKey,
        job_type: &JobTypeName,
    ) -> Result<(), PersistenceError> {
        let publisher = self.publisher();
        let engine = FiringEngine {
            pool: &self.pool,
            catalog: &self.catalog,
            executing: &self.executing,
            type_loader: self.type_loader.as_ref(),
            clock: self.clock.as_ref(),
            signaler: self.signaler.as_ref(),
            publisher: &publisher,
        };
        engine.triggered_job_complete(job_key, job_type).await
    }

    /// Registering a new trigger signals the dispatcher so it can
    /// re-evaluate immediately rather than waiting for its next poll (§4.2).
    pub async fn notify_trigger_stored(&self) {
        self.signaler
            .signal_scheduling_change_immediately(job_store_core::types::sentinel_past_timestamp())
            .await;
    }

    pub async fn get_waiting_triggers_count(&self) -> Result<i64, PersistenceError> {
        let excluded = self.excluded_types().await;
        delegate::select_waiting_trigger_count(&self.pool, &excluded).await
    }

    pub async fn get_blocked_triggers_count(&self) -> Result<i64, PersistenceError> {
        let excluded = self.excluded_types().await;
        delegate::select_blocked_trigger_count(&self.pool, &excluded).await
    }

    pub async fn get_total_waiting_triggers_count(&self) -> Result<i64, PersistenceError> {
        let excluded = self.excluded_types().await;
        delegate::select_total_waiting_trigger_count(&self.pool, &excluded).await
    }

    pub async fn get_job_counts(
        &self,
    ) -> Result<std::collections::HashMap<JobTypeName, i64>, PersistenceError> {
        let excluded = self.excluded_types().await;
        delegate::select_job_type_counts(&self.pool, &excluded).await
    }

    /// `getJobs(maxCount, offset)` (§6): executing entries first (sorted
    /// by start time), then queued entries, each flagged `blocked` if its
    /// job type is filtered out or limit-exhausted right now.
    pub async fn get_jobs(&self, max_count: i64, offset: i64) -> Result<JobsPage, PersistenceError> {
        let executing = self
            .executing
            .snapshot()
            .await
            .iter()
            .map(|entry| {
                let (_, description) = self.job_factory.describe(&entry.job_detail);
                ExecutingSnapshotEntry::from_entry(entry, description)
            })
            .collect();

        let blocked_types = effective_exclusions(&self.catalog, &self.executing, &self.filter_bus).await;
        let queued = delegate::select_jobs_page(&self.pool, max_count, offset)
            .await?
            .into_iter()
            .map(|(trigger, job_type)| {
                let blocked = blocked_types.contains(&job_type)
                    || matches!(
                        trigger.state,
                        job_store_core::state::TriggerState::Blocked
                            | job_store_core::state::TriggerState::PausedBlocked
                    );
                QueuedJobEntry { trigger, blocked }
            })
            .collect();

        Ok(JobsPage { executing, queued })
    }

    /// The full C1+C2+C3 exclusion snapshot (§4.4): filter-bus exclusions
    /// plus any type whose `Limit`/`DisallowGroup` cap is presently
    /// saturated, so the counting queries answer "what's dispatchable"
    /// rather than "what isn't filtered".
    async fn excluded_types(&self) -> Vec<JobTypeName> {
        effective_exclusions(&self.catalog, &self.executing, &self.filter_bus)
            .await
            .into_iter()
            .collect()
    }

    pub fn catalog(&self) -> &ConcurrencyCatalog {
        &self.catalog
    }

    pub fn executing(&self) -> &ExecutingTable {
        &self.executing
    }
}

/// One queued (not-yet-executing) row of `getJobs`, flagged `blocked` if
/// its job type is filtered out or limit-exhausted right now (§6).
pub struct QueuedJobEntry {
    pub trigger: Trigger,
    pub blocked: bool,
}

/// `getJobs(maxCount, offset)`'s result shape: executing entries first
/// (sorted by start time), then the requested page of queued entries (§6).
pub struct JobsPage {
    pub executing: Vec<ExecutingSnapshotEntry>,
    pub queued: Vec<QueuedJobEntry>,
}
