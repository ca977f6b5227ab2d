//! Queue-state publisher (C7) — assembles a [`QueueStateContext`] snapshot
//! and dispatches it to the configured [`QueueStateHandler`] (§4.7).

use job_store_core::catalog::ConcurrencyCatalog;
use job_store_core::executing::{effective_exclusions, ExecutingTable};
use job_store_core::filters::FilterBus;
use job_store_core::ports::{JobFactory, SchedulerFactory};
use job_store_core::queue_state::{ExecutingSnapshotEntry, QueueStateContext, QueueStateEventKind, QueueStateHandler};
use job_store_core::types::JobTypeName;

use crate::delegate;
use crate::error::PersistenceError;

pub struct Publisher<'a> {
    pub pool: &'a sqlx::PgPool,
    pub catalog: &'a ConcurrencyCatalog,
    pub filters: &'a FilterBus,
    pub executing: &'a ExecutingTable,
    pub scheduler_factory: &'a dyn SchedulerFactory,
    pub job_factory: &'a dyn JobFactory,
    pub handler: &'a dyn QueueStateHandler,
}

impl<'a> Publisher<'a> {
    /// Build the snapshot (§4.7: "brief mutex acquisition, then release
    /// before touching the database").
    async fn build_context(&self) -> Result<QueueStateContext, PersistenceError> {
        let executing_entries = self.executing.snapshot().await;

        let excluded: Vec<JobTypeName> =
            effective_exclusions(self.catalog, self.executing, self.filters).await.into_iter().collect();
        let waiting = delegate::select_waiting_trigger_count(self.pool, &excluded).await?;
        let blocked = delegate::select_blocked_trigger_count(self.pool, &excluded).await?;
        let total = waiting + blocked + executing_entries.len() as i64;

        let currently_executing = executing_entries
            .iter()
            .map(|entry| {
                let (_, description) = self.job_factory.describe(&entry.job_detail);
                ExecutingSnapshotEntry::from_entry(entry, description)
            })
            .collect();

        Ok(QueueStateContext {
            thread_count: self.scheduler_factory.thread_pool_size(),
            waiting_triggers_count: waiting,
            blocked_triggers_count: blocked,
            total_triggers_count: total,
            currently_executing,
        })
    }

    /// Build and dispatch one event. §7: "publication errors are logged
    /// and swallowed — they never fail the operation that triggered them."
    pub async fn publish(&self, kind: QueueStateEventKind) {
        match self.build_context().await {
            Ok(ctx) => {
                debug_assert!(
                    ctx.is_internally_consistent(),
                    "queue-state snapshot violated total == waiting + blocked + executing"
                );
                ctx.dispatch(kind, self.handler);
            }
            Err(err) => {
                tracing::warn!(error = %err, ?kind, "failed to build queue-state snapshot, dropping event");
            }
        }
    }
}
