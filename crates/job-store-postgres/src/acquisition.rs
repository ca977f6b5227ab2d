//! Acquisition engine (C5) — override of "acquire next trigger" (§4.5).

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, warn};

use job_store_core::catalog::ConcurrencyCatalog;
use job_store_core::executing::{effective_exclusions, job_allowed, ExecutingTable, LocalCounts};
use job_store_core::filters::FilterBus;
use job_store_core::state::TriggerState;
use job_store_core::types::{FiredTrigger, FiredTriggerState, JobTypeName, Trigger};
use job_store_core::ports::TypeLoader;

use crate::delegate;
use crate::error::PersistenceError;
use crate::sqlx_types::new_fire_instance_id;

/// §4.5 step 2: "Retry loop up to three iterations."
const MAX_ACQUIRE_RETRIES: u32 = 3;

/// Inputs mirroring the base store's `AcquireNextTriggers(noLaterThan,
/// maxCount, timeWindow)`.
pub struct AcquireRequest {
    pub no_later_than: DateTime<Utc>,
    pub max_count: i64,
    pub time_window: chrono::Duration,
}

pub struct AcquisitionEngine<'a> {
    pub pool: &'a PgPool,
    pub catalog: &'a ConcurrencyCatalog,
    pub filters: &'a FilterBus,
    pub executing: &'a ExecutingTable,
    pub type_loader: &'a dyn TypeLoader,
    pub scheduler_instance_id: &'a str,
}

impl<'a> AcquisitionEngine<'a> {
    /// Build the filter snapshot used for this acquisition round (§4.5
    /// step 1).
    async fn build_exclusion_snapshot(&self) -> HashSet<JobTypeName> {
        effective_exclusions(self.catalog, self.executing, self.filters).await
    }

    /// §4.5: the full retry loop. Returns the ordered list of acquired
    /// triggers (possibly empty).
    pub async fn acquire_next_triggers(
        &self,
        request: AcquireRequest,
    ) -> Result<Vec<Trigger>, PersistenceError> {
        let excluded = self.build_exclusion_snapshot().await;
        let excluded_vec: Vec<JobTypeName> = excluded.into_iter().collect();

        let mut acquired = Vec::new();
        for attempt in 0..MAX_ACQUIRE_RETRIES {
            let mut tx = self.pool.begin().await?;
            delegate::lock_trigger_access(&mut *tx).await?;

            let due_by = request.no_later_than + request.time_window;
            let candidates =
                delegate::select_triggers_to_acquire(&mut *tx, due_by, &excluded_vec, request.max_count)
                    .await?;

            let mut locals = LocalCounts::new();
            let mut batch_end: Option<DateTime<Utc>> = None;

            for candidate in candidates {
                // Re-retrieve: may have raced and be gone (§7 "race losses").
                let Some(trigger) = delegate::retrieve_trigger(&mut *tx, &candidate.key).await?
                else {
                    continue;
                };
                if trigger.state != TriggerState::Waiting {
                    continue;
                }

                let job_detail = match delegate::retrieve_job_detail(&mut *tx, &trigger.job_key).await? {
                    Some(detail) => detail,
                    None => continue,
                };

                if self.type_loader.resolve(&job_detail.job_type).await.is_err() {
                    warn!(trigger = %trigger.key, "type resolution failed, transitioning to ERROR");
                    delegate::store_trigger_state(
                        &mut *tx,
                        &trigger.key,
                        TriggerState::Error.as_str(),
                        trigger.next_fire_time,
                    )
                    .await?;
                    continue;
                }

                if !job_allowed(
                    self.catalog,
                    self.executing,
                    &mut locals,
                    &job_detail.job_type,
                    &trigger.job_key,
                )
                .await
                {
                    continue;
                }

                let Some(next_fire_time) = trigger.next_fire_time else {
                    continue;
                };
                if let Some(end) = batch_end {
                    if next_fire_time > end {
                        break;
                    }
                }

                let fire_instance_id = new_fire_instance_id(self.scheduler_instance_id);
                let cas_ok = delegate::cas_acquire(
                    &mut *tx,
                    &trigger.key,
                    next_fire_time,
                    &fire_instance_id,
                )
                .await?;
                if !cas_ok {
                    continue; // lost the race; silent skip (§7)
                }

                delegate::insert_fired_trigger(
                    &mut *tx,
                    &FiredTrigger {
                        fire_instance_id: fire_instance_id.clone(),
                        scheduler_instance_id: self.scheduler_instance_id.to_string(),
                        trigger_key: trigger.key.clone(),
                        job_key: trigger.job_key.clone(),
                        state: FiredTriggerState::Acquired,
                        start_time: Utc::now(),
                    },
                )
                .await?;

                if batch_end.is_none() {
                    batch_end = Some(next_fire_time.max(Utc::now()) + request.time_window);
                }

                let mut acquired_trigger = trigger;
                acquired_trigger.state = TriggerState::Acquired;
                acquired_trigger.fire_instance_id = Some(fire_instance_id);
                acquired.push(acquired_trigger);
            }

            tx.commit().await?;

            if !acquired.is_empty() || attempt + 1 >= MAX_ACQUIRE_RETRIES {
                break;
            }
            debug!(attempt, "acquisition round found nothing, retrying");
            tokio::time::sleep(Duration::from_millis(0)).await;
        }

        Ok(acquired)
    }
}
