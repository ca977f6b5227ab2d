//! Fire/complete engine (C6) — §4.6.

use chrono::{DateTime, Utc};

use job_store_core::catalog::{ConcurrencyCatalog, ConcurrencyKind};
use job_store_core::executing::{job_allowed, ExecutingTable, LocalCounts};
use job_store_core::state::TriggerState;
use job_store_core::types::{ExecutingEntry, FiredTriggerState, JobDetail, JobKey, JobTypeName, Trigger, TriggerKey};
use job_store_core::ports::{SchedulerSignaler, TypeLoader};
use job_store_core::queue_state::QueueStateEventKind;

use crate::delegate;
use crate::error::PersistenceError;
use crate::publisher::Publisher;

/// What the base trigger's own `triggered(calendar)` computation yields.
/// The engine owns calling into it via this trait; the base job-store's
/// concrete trigger types are external collaborators (§6).
pub trait TriggerClock: Send + Sync {
    /// Returns the trigger's next fire time, or `None` if it has none
    /// (a one-shot trigger that has now fully fired).
    fn next_fire_time_after(&self, trigger: &Trigger) -> Option<DateTime<Utc>>;
}

pub struct FiringEngine<'a> {
    pub pool: &'a sqlx::PgPool,
    pub catalog: &'a ConcurrencyCatalog,
    pub executing: &'a ExecutingTable,
    pub type_loader: &'a dyn TypeLoader,
    pub clock: &'a dyn TriggerClock,
    pub signaler: &'a dyn SchedulerSignaler,
    pub publisher: &'a Publisher<'a>,
}

/// Outcome of one `TriggerFired` call; `None` means the trigger was
/// canceled or stolen and the dispatcher should move on (§4.6 step 1, 3).
pub struct FiredBundle {
    pub trigger_key: TriggerKey,
    pub job_key: JobKey,
}

impl<'a> FiringEngine<'a> {
    /// `TriggersFired(batch)` — §4.6: runs the whole batch inside the
    /// trigger-access lock, then validates at least one bundle actually
    /// reached EXECUTING.
    pub async fn triggers_fired(
        &self,
        acquired: &[Trigger],
        scheduler_instance_id: &str,
    ) -> Result<Vec<Option<FiredBundle>>, PersistenceError> {
        let mut tx = self.pool.begin().await?;
        delegate::lock_trigger_access(&mut *tx).await?;

        let mut bundles = Vec::with_capacity(acquired.len());
        let mut fire_instance_ids = Vec::new();
        for trigger in acquired {
            let bundle = self.trigger_fired(&mut tx, trigger).await?;
            if bundle.is_some() {
                if let Some(fired) = &trigger.fire_instance_id {
                    fire_instance_ids.push(fired.clone());
                }
            }
            bundles.push(bundle);
        }

        if !fire_instance_ids.is_empty() {
            let executing_count =
                delegate::count_executing_among(&mut *tx, scheduler_instance_id, &fire_instance_ids)
                    .await?;
            if executing_count == 0 {
                return Err(PersistenceError::ValidatorFailed(
                    scheduler_instance_id.to_string(),
                ));
            }
        }

        tx.commit().await?;

        if bundles.iter().any(Option::is_some) {
            self.publisher.publish(QueueStateEventKind::Executing).await;
        }

        Ok(bundles)
    }

    /// `TriggerFired(trigger)` — §4.6 steps 1-9.
    async fn trigger_fired<'t>(
        &self,
        tx: &mut sqlx::Transaction<'t, sqlx::Postgres>,
        trigger: &Trigger,
    ) -> Result<Option<FiredBundle>, PersistenceError> {
        let Some(fire_instance_id) = trigger.fire_instance_id.as_deref() else {
            return Ok(None);
        };

        let current = delegate::retrieve_trigger(&mut **tx, &trigger.key).await?;
        let Some(current) = current else {
            return Ok(None);
        };
        if current.state != TriggerState::Acquired {
            return Ok(None); // canceled or stolen
        }

        let job_detail = match delegate::retrieve_job_detail(&mut **tx, &current.job_key).await {
            Ok(Some(detail)) => detail,
            Ok(None) | Err(_) => {
                delegate::store_trigger_state(
                    &mut **tx,
                    &current.key,
                    TriggerState::Error.as_str(),
                    current.next_fire_time,
                )
                .await?;
                return Ok(None);
            }
        };

        // Calendar resolution is an external collaborator concern (§6);
        // a named-but-missing calendar cancels the fire (§4.6 step 3).
        // This crate treats calendars as opaque and unchanged from the
        // base store, so only the "named" signal is checked here.
        if current.calendar_name.is_some() && !self.calendar_exists(current.calendar_name.as_deref()) {
            return Ok(None);
        }

        delegate::update_fired_trigger_state(&mut **tx, fire_instance_id, FiredTriggerState::Executing)
            .await?;

        let next_fire_time = self.clock.next_fire_time_after(&current);

        // §4.6 step 6: no next fire time overrides the target to COMPLETE
        // regardless of what JobAllowed would have decided.
        let stored_state = if next_fire_time.is_none() {
            TriggerState::Complete
        } else {
            self.decide_post_fire_state(&job_detail, &current).await?
        };

        delegate::store_trigger_state(&mut **tx, &current.key, stored_state.as_str(), next_fire_time)
            .await?;

        self.executing
            .insert(ExecutingEntry {
                job_key: current.job_key.clone(),
                job_detail: job_detail.clone(),
                start_time: Utc::now(),
            })
            .await;

        // §4.6 "Edge cases": the sweep is about the *group/type now having a
        // member running*, not about what the fired trigger itself was
        // re-stored as. A `DisallowGroup` or `DisallowAny` type always
        // blocks its siblings the moment one instance is executing; a
        // `Limit(n)` type only blocks siblings once this fire has actually
        // saturated the cap (checked against the executing table with this
        // job already counted in).
        let needs_sweep = match self.catalog.kind_for(&job_detail.job_type) {
            ConcurrencyKind::DisallowGroup | ConcurrencyKind::DisallowAny => true,
            ConcurrencyKind::Limit(n) => self.executing.count_of_type(&job_detail.job_type).await >= n as usize,
            ConcurrencyKind::Unconstrained => false,
        };
        if needs_sweep {
            self.sweep_on_fire(tx, &job_detail.job_type).await?;
        }

        Ok(Some(FiredBundle {
            trigger_key: current.key,
            job_key: current.job_key,
        }))
    }

    fn calendar_exists(&self, _name: Option<&str>) -> bool {
        // The base store owns calendar storage; resolution failures are
        // surfaced by it before this engine ever sees the trigger. Always
        // true here — absence would have already canceled the fire
        // upstream.
        true
    }

    /// §4.6 step 6: run `JobAllowed` once against a snapshot of the
    /// executing table (the Open Question resolution — see DESIGN.md).
    async fn decide_post_fire_state(
        &self,
        job_detail: &JobDetail,
        current: &Trigger,
    ) -> Result<TriggerState, PersistenceError> {
        let mut locals = LocalCounts::new();
        let allowed = job_allowed(
            self.catalog,
            self.executing,
            &mut locals,
            &job_detail.job_type,
            &current.job_key,
        )
        .await;

        if allowed {
            Ok(TriggerState::Waiting)
        } else {
            Ok(TriggerState::Blocked)
        }
    }

    /// Sweep siblings of `job_type` (and, for `DisallowGroup`, the whole
    /// group) into the blocked family (§4.6 step 6 / step 9 edge case).
    async fn sweep_on_fire<'t>(
        &self,
        tx: &mut sqlx::Transaction<'t, sqlx::Postgres>,
        job_type: &JobTypeName,
    ) -> Result<(), PersistenceError> {
        let types = self.sibling_types(job_type);
        delegate::sweep_siblings(
            &mut **tx,
            &types,
            &["WAITING", "ACQUIRED"],
            TriggerState::Blocked.as_str(),
        )
        .await?;
        delegate::sweep_siblings(
            &mut **tx,
            &types,
            &[TriggerState::Paused.as_str()],
            TriggerState::PausedBlocked.as_str(),
        )
        .await?;
        Ok(())
    }

    fn sibling_types(&self, job_type: &JobTypeName) -> Vec<JobTypeName> {
        match self.catalog.kind_for(job_type) {
            ConcurrencyKind::DisallowGroup => self
                .catalog
                .group_of(job_type)
                .map(|g| self.catalog.members_of_group(g).to_vec())
                .unwrap_or_else(|| vec![job_type.clone()]),
            _ => vec![job_type.clone()],
        }
    }

    /// `TriggeredJobComplete` — §4.6: base completion first (external,
    /// assumed already applied by the caller before this is invoked),
    /// then the sibling unblock sweep, executing-table removal, and the
    /// completed event.
    ///
    /// The executing-entry removal happens before the sibling sweep
    /// (§4.6 "Edge cases") so the next `JobAllowed` sees the freed slot.
    pub async fn triggered_job_complete(
        &self,
        job_key: &JobKey,
        job_type: &JobTypeName,
    ) -> Result<(), PersistenceError> {
        self.executing.remove(job_key).await;

        if self.catalog.descriptor(job_type).is_some() {
            let mut tx = self.pool.begin().await?;
            delegate::lock_trigger_access(&mut *tx).await?;

            let types = self.sibling_types(job_type);
            delegate::sweep_siblings(
                &mut *tx,
                &types,
                &[TriggerState::Blocked.as_str()],
                TriggerState::Waiting.as_str(),
            )
            .await?;
            delegate::sweep_siblings(
                &mut *tx,
                &types,
                &[TriggerState::PausedBlocked.as_str()],
                TriggerState::Paused.as_str(),
            )
            .await?;

            tx.commit().await?;
        }

        self.publisher.publish(QueueStateEventKind::Completed).await;

        let excluded: Vec<JobTypeName> = Vec::new();
        let remaining =
            delegate::select_total_waiting_trigger_count(self.pool, &excluded).await?;
        if remaining > 0 {
            self.signaler
                .signal_scheduling_change_immediately(
                    job_store_core::types::sentinel_past_timestamp(),
                )
                .await;
        }

        Ok(())
    }
}
