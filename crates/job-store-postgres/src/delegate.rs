//! Filtered delegate (C4).
//!
//! Extends the base persistence-layer interface with SQL that accepts
//! exclusion sets and per-type limits. All queries are runtime-checked
//! (`sqlx::query`/`sqlx::query_as`, not the `!`-macro forms) because the
//! scheduler tables are created by the base store's own migrations, not
//! visible to `cargo check` in this crate.
//!
//! SQL translation rules (§4.4):
//! - `excluded` => `AND job_type <> ALL($n)`.
//! - `limits` is not pushed into SQL at all — the caller (the acquisition
//!   engine) enforces the running count via gating; the DB has no notion
//!   of "how many are currently executing".
//! - Rows come back in next-fire-time order, ascending, with trigger key
//!   as the stable tie-break.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::{PgExecutor, Row};

use job_store_core::types::{FiredTrigger, FiredTriggerState, JobDetail, JobKey, JobTypeName, Trigger, TriggerKey};

use crate::error::PersistenceError;
use crate::sqlx_types::{FiredTriggerRow, JobDetailRow, TriggerRow};

fn excluded_as_strings(excluded: &[JobTypeName]) -> Vec<String> {
    excluded.iter().map(|t| t.0.clone()).collect()
}

/// Up to `max_count` WAITING triggers due no later than `no_later_than`,
/// excluding the given job types, ordered next-fire-time ascending then
/// by (trigger_group, trigger_name) as the stable tie-break (§5).
pub async fn select_triggers_to_acquire<'c, E>(
    executor: E,
    no_later_than: DateTime<Utc>,
    excluded: &[JobTypeName],
    max_count: i64,
) -> Result<Vec<Trigger>, PersistenceError>
where
    E: PgExecutor<'c>,
{
    let excluded_names = excluded_as_strings(excluded);
    let rows = sqlx::query_as::<_, TriggerRow>(
        r#"
        SELECT t.trigger_group, t.trigger_name, t.job_group, t.job_name,
               t.next_fire_time, t.prev_fire_time, t.trigger_state,
               t.fire_instance_id, t.calendar_name
        FROM quartz.triggers t
        JOIN quartz.job_details j
          ON j.job_group = t.job_group AND j.job_name = t.job_name
        WHERE t.trigger_state = 'WAITING'
          AND t.next_fire_time <= $1
          AND j.job_type <> ALL($2)
        ORDER BY t.next_fire_time ASC, t.trigger_group ASC, t.trigger_name ASC
        LIMIT $3
        "#,
    )
    .bind(no_later_than)
    .bind(&excluded_names)
    .bind(max_count)
    .fetch_all(executor)
    .await?;

    rows.into_iter()
        .map(|row| {
            Trigger::try_from(row)
                .map_err(|e| PersistenceError::Database(sqlx::Error::Decode(Box::new(e))))
        })
        .collect()
}

pub async fn retrieve_trigger<'c, E>(
    executor: E,
    key: &TriggerKey,
) -> Result<Option<Trigger>, PersistenceError>
where
    E: PgExecutor<'c>,
{
    let row = sqlx::query_as::<_, TriggerRow>(
        r#"
        SELECT trigger_group, trigger_name, job_group, job_name,
               next_fire_time, prev_fire_time, trigger_state,
               fire_instance_id, calendar_name
        FROM quartz.triggers
        WHERE trigger_group = $1 AND trigger_name = $2
        "#,
    )
    .bind(&key.group)
    .bind(&key.name)
    .fetch_optional(executor)
    .await?;

    row.map(Trigger::try_from)
        .transpose()
        .map_err(|e| PersistenceError::Database(sqlx::Error::Decode(Box::new(e))))
}

pub async fn retrieve_job_detail<'c, E>(
    executor: E,
    key: &JobKey,
) -> Result<Option<JobDetail>, PersistenceError>
where
    E: PgExecutor<'c>,
{
    let row = sqlx::query_as::<_, JobDetailRow>(
        r#"
        SELECT job_group, job_name, job_type, data_map, durable, requests_recovery
        FROM quartz.job_details
        WHERE job_group = $1 AND job_name = $2
        "#,
    )
    .bind(&key.group)
    .bind(&key.name)
    .fetch_optional(executor)
    .await?;

    Ok(row.map(JobDetail::from))
}

/// CAS the trigger from WAITING to ACQUIRED, fenced on its stored
/// next-fire-time (§4.5 step 2c). Returns `false` on zero rows updated —
/// the race-loss/disappearing-trigger case is a silent skip (§7).
pub async fn cas_acquire<'c, E>(
    executor: E,
    key: &TriggerKey,
    fenced_next_fire_time: DateTime<Utc>,
    fire_instance_id: &str,
) -> Result<bool, PersistenceError>
where
    E: PgExecutor<'c>,
{
    let result = sqlx::query(
        r#"
        UPDATE quartz.triggers
        SET trigger_state = 'ACQUIRED', fire_instance_id = $1
        WHERE trigger_group = $2 AND trigger_name = $3
          AND trigger_state = 'WAITING'
          AND next_fire_time = $4
        "#,
    )
    .bind(fire_instance_id)
    .bind(&key.group)
    .bind(&key.name)
    .bind(fenced_next_fire_time)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn insert_fired_trigger<'c, E>(
    executor: E,
    fired: &FiredTrigger,
) -> Result<(), PersistenceError>
where
    E: PgExecutor<'c>,
{
    sqlx::query(
        r#"
        INSERT INTO quartz.fired_triggers
            (fire_instance_id, scheduler_instance_id, trigger_group, trigger_name,
             job_group, job_name, state, start_time)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(&fired.fire_instance_id)
    .bind(&fired.scheduler_instance_id)
    .bind(&fired.trigger_key.group)
    .bind(&fired.trigger_key.name)
    .bind(&fired.job_key.group)
    .bind(&fired.job_key.name)
    .bind(fired.state.as_str())
    .bind(fired.start_time)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn retrieve_fired_trigger<'c, E>(
    executor: E,
    fire_instance_id: &str,
) -> Result<Option<FiredTrigger>, PersistenceError>
where
    E: PgExecutor<'c>,
{
    let row = sqlx::query_as::<_, FiredTriggerRow>(
        r#"
        SELECT fire_instance_id, scheduler_instance_id, trigger_group, trigger_name,
               job_group, job_name, state, start_time
        FROM quartz.fired_triggers
        WHERE fire_instance_id = $1
        "#,
    )
    .bind(fire_instance_id)
    .fetch_optional(executor)
    .await?;

    row.map(FiredTrigger::try_from)
        .transpose()
        .map_err(|e: String| PersistenceError::Database(sqlx::Error::Decode(anyhow::anyhow!(e).into())))
}

pub async fn update_fired_trigger_state<'c, E>(
    executor: E,
    fire_instance_id: &str,
    state: FiredTriggerState,
) -> Result<(), PersistenceError>
where
    E: PgExecutor<'c>,
{
    sqlx::query("UPDATE quartz.fired_triggers SET state = $1 WHERE fire_instance_id = $2")
        .bind(state.as_str())
        .bind(fire_instance_id)
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn delete_fired_trigger<'c, E>(
    executor: E,
    fire_instance_id: &str,
) -> Result<(), PersistenceError>
where
    E: PgExecutor<'c>,
{
    sqlx::query("DELETE FROM quartz.fired_triggers WHERE fire_instance_id = $1")
        .bind(fire_instance_id)
        .execute(executor)
        .await?;
    Ok(())
}

/// Count of fired-trigger rows in state EXECUTING for this scheduler
/// instance whose fire_instance_id is in `candidates` — used by the
/// batch validator (§4.6).
pub async fn count_executing_among<'c, E>(
    executor: E,
    scheduler_instance_id: &str,
    candidates: &[String],
) -> Result<i64, PersistenceError>
where
    E: PgExecutor<'c>,
{
    let row = sqlx::query(
        r#"
        SELECT COUNT(*) AS n
        FROM quartz.fired_triggers
        WHERE scheduler_instance_id = $1
          AND state = 'EXECUTING'
          AND fire_instance_id = ANY($2)
        "#,
    )
    .bind(scheduler_instance_id)
    .bind(candidates)
    .fetch_one(executor)
    .await?;
    Ok(row.get::<i64, _>("n"))
}

/// Store a trigger's state unconditionally (the "force" case — §4.6 step
/// 7 — used once `JobAllowed` has already decided the target state).
pub async fn store_trigger_state<'c, E>(
    executor: E,
    key: &TriggerKey,
    state: &str,
    next_fire_time: Option<DateTime<Utc>>,
) -> Result<(), PersistenceError>
where
    E: PgExecutor<'c>,
{
    sqlx::query(
        r#"
        UPDATE quartz.triggers
        SET trigger_state = $1, next_fire_time = $2, prev_fire_time = next_fire_time
        WHERE trigger_group = $3 AND trigger_name = $4
        "#,
    )
    .bind(state)
    .bind(next_fire_time)
    .bind(&key.group)
    .bind(&key.name)
    .execute(executor)
    .await?;
    Ok(())
}

/// Sweep siblings of `job_type` (optionally scoped further to group
/// members) from any of `from_states` into `to_state` (§4.6 step 6,
/// §3 invariant 6). Returns the number of rows touched.
pub async fn sweep_siblings<'c, E>(
    executor: E,
    job_types: &[JobTypeName],
    from_states: &[&str],
    to_state: &str,
) -> Result<u64, PersistenceError>
where
    E: PgExecutor<'c>,
{
    let type_names = excluded_as_strings(job_types);
    let result = sqlx::query(
        r#"
        UPDATE quartz.triggers t
        SET trigger_state = $1
        FROM quartz.job_details j
        WHERE j.job_group = t.job_group AND j.job_name = t.job_name
          AND j.job_type = ANY($2)
          AND t.trigger_state = ANY($3)
        "#,
    )
    .bind(to_state)
    .bind(&type_names)
    .bind(from_states)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}

/// Dispatchable waiting-trigger count (§4.4 "so the queue-state snapshot
/// reflects dispatchable work, not nominal work") — `excluded` must be the
/// full C1+C2+C3 exclusion snapshot, not just the filter-bus set, or
/// cap-saturated types would still count as waiting here.
///
/// These status queries run outside the trigger-access transaction — they
/// take the pool directly rather than a generic executor.
pub async fn select_waiting_trigger_count(
    pool: &sqlx::PgPool,
    excluded: &[JobTypeName],
) -> Result<i64, PersistenceError> {
    let excluded_names = excluded_as_strings(excluded);
    let row = sqlx::query(
        r#"
        SELECT COUNT(*) AS n
        FROM quartz.triggers t
        JOIN quartz.job_details j ON j.job_group = t.job_group AND j.job_name = t.job_name
        WHERE t.trigger_state = 'WAITING' AND j.job_type <> ALL($1)
        "#,
    )
    .bind(&excluded_names)
    .fetch_one(pool)
    .await?;
    Ok(row.get::<i64, _>("n"))
}

/// `SelectBlockedTriggerCount` — a trigger is "blocked" relative to its
/// type's current cap (§4.4), so this counts both the literal BLOCKED/
/// PAUSED_BLOCKED rows and WAITING rows whose type is presently excluded
/// (soft-blocked: cap-saturated or filtered, but not yet swept). `excluded`
/// must be the same snapshot passed to `select_waiting_trigger_count` so
/// the two counts partition the non-executing rows without overlap.
pub async fn select_blocked_trigger_count(
    pool: &sqlx::PgPool,
    excluded: &[JobTypeName],
) -> Result<i64, PersistenceError> {
    let excluded_names = excluded_as_strings(excluded);
    let row = sqlx::query(
        r#"
        SELECT COUNT(*) AS n
        FROM quartz.triggers t
        JOIN quartz.job_details j ON j.job_group = t.job_group AND j.job_name = t.job_name
        WHERE t.trigger_state IN ('BLOCKED', 'PAUSED_BLOCKED')
           OR (t.trigger_state = 'WAITING' AND j.job_type = ANY($1))
        "#,
    )
    .bind(&excluded_names)
    .fetch_one(pool)
    .await?;
    Ok(row.get::<i64, _>("n"))
}

pub async fn select_total_waiting_trigger_count(
    pool: &sqlx::PgPool,
    excluded: &[JobTypeName],
) -> Result<i64, PersistenceError> {
    let waiting = select_waiting_trigger_count(pool, excluded).await?;
    let blocked = select_blocked_trigger_count(pool, excluded).await?;
    Ok(waiting + blocked)
}

/// `SelectJobTypeCounts` — waiting-or-blocked counts grouped by job type,
/// filtered the same way as the other counting queries.
pub async fn select_job_type_counts(
    pool: &sqlx::PgPool,
    excluded: &[JobTypeName],
) -> Result<HashMap<JobTypeName, i64>, PersistenceError> {
    let excluded_names = excluded_as_strings(excluded);
    let rows = sqlx::query(
        r#"
        SELECT j.job_type, COUNT(*) AS n
        FROM quartz.triggers t
        JOIN quartz.job_details j ON j.job_group = t.job_group AND j.job_name = t.job_name
        WHERE t.trigger_state IN ('WAITING', 'BLOCKED', 'PAUSED_BLOCKED')
          AND j.job_type <> ALL($1)
        GROUP BY j.job_type
        "#,
    )
    .bind(&excluded_names)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| (JobTypeName(row.get::<String, _>("job_type")), row.get::<i64, _>("n")))
        .collect())
}

/// Paged listing of queued (non-executing) triggers, next-fire-time
/// ascending, for `getJobs` (§6, SPEC_FULL.md §C.1). Each row is paired
/// with its job type, so the caller can compute the live "blocked" flag
/// without a second round-trip.
pub async fn select_jobs_page(
    pool: &sqlx::PgPool,
    max_count: i64,
    offset: i64,
) -> Result<Vec<(Trigger, JobTypeName)>, PersistenceError> {
    #[derive(sqlx::FromRow)]
    struct Row {
        trigger_group: String,
        trigger_name: String,
        job_group: String,
        job_name: String,
        next_fire_time: Option<DateTime<Utc>>,
        prev_fire_time: Option<DateTime<Utc>>,
        trigger_state: String,
        fire_instance_id: Option<String>,
        calendar_name: Option<String>,
        job_type: String,
    }

    let rows = sqlx::query_as::<_, Row>(
        r#"
        SELECT t.trigger_group, t.trigger_name, t.job_group, t.job_name,
               t.next_fire_time, t.prev_fire_time, t.trigger_state,
               t.fire_instance_id, t.calendar_name, j.job_type
        FROM quartz.triggers t
        JOIN quartz.job_details j ON j.job_group = t.job_group AND j.job_name = t.job_name
        WHERE t.trigger_state NOT IN ('ACQUIRED', 'EXECUTING')
        ORDER BY t.next_fire_time ASC NULLS LAST, t.trigger_group ASC, t.trigger_name ASC
        LIMIT $1 OFFSET $2
        "#,
    )
    .bind(max_count)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| {
            let trigger_row = TriggerRow {
                trigger_group: row.trigger_group,
                trigger_name: row.trigger_name,
                job_group: row.job_group,
                job_name: row.job_name,
                next_fire_time: row.next_fire_time,
                prev_fire_time: row.prev_fire_time,
                trigger_state: row.trigger_state,
                fire_instance_id: row.fire_instance_id,
                calendar_name: row.calendar_name,
            };
            let job_type = JobTypeName(row.job_type);
            Trigger::try_from(trigger_row)
                .map(|trigger| (trigger, job_type))
                .map_err(|e| PersistenceError::Database(sqlx::Error::Decode(Box::new(e))))
        })
        .collect()
}

/// Acquires the named advisory lock row for the duration of the caller's
/// transaction — the "non-managed transaction" `LockTriggerAccess` (§5).
pub const TRIGGER_ACCESS_LOCK_NAME: &str = "TRIGGER_ACCESS";

pub async fn lock_trigger_access<'c, E>(executor: E) -> Result<(), PersistenceError>
where
    E: PgExecutor<'c>,
{
    sqlx::query("SELECT 1 FROM quartz.scheduler_locks WHERE lock_name = $1 FOR UPDATE")
        .bind(TRIGGER_ACCESS_LOCK_NAME)
        .fetch_one(executor)
        .await?;
    Ok(())
}
