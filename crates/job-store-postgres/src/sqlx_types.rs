//! SQLx row types for the job store Postgres adapter.
//!
//! Each row struct derives `sqlx::FromRow` and converts into the pure
//! `job-store-core` types. This isolates sqlx dependencies here, keeping
//! `job-store-core` free of them: the state enums carry no `sqlx::Type`
//! derive, and are decoded via plain `String` columns then converted.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use job_store_core::state::TriggerState;
use job_store_core::types::{
    FiredTrigger, FiredTriggerState, JobDetail, JobKey, JobTypeName, Trigger, TriggerKey,
};

#[derive(Debug, Clone, FromRow)]
pub struct TriggerRow {
    pub trigger_group: String,
    pub trigger_name: String,
    pub job_group: String,
    pub job_name: String,
    pub next_fire_time: Option<DateTime<Utc>>,
    pub prev_fire_time: Option<DateTime<Utc>>,
    pub trigger_state: String,
    pub fire_instance_id: Option<String>,
    pub calendar_name: Option<String>,
}

impl TryFrom<TriggerRow> for Trigger {
    type Error = job_store_core::state::UnknownTriggerState;

    fn try_from(row: TriggerRow) -> Result<Self, Self::Error> {
        Ok(Trigger {
            key: TriggerKey::new(row.trigger_group, row.trigger_name),
            job_key: JobKey::new(row.job_group, row.job_name),
            next_fire_time: row.next_fire_time,
            previous_fire_time: row.prev_fire_time,
            state: TriggerState::from_str(&row.trigger_state)?,
            fire_instance_id: row.fire_instance_id,
            calendar_name: row.calendar_name,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct JobDetailRow {
    pub job_group: String,
    pub job_name: String,
    pub job_type: String,
    pub data_map: Option<serde_json::Value>,
    pub durable: bool,
    pub requests_recovery: bool,
}

impl From<JobDetailRow> for JobDetail {
    fn from(row: JobDetailRow) -> Self {
        let data_map = match row.data_map {
            Some(serde_json::Value::Object(map)) => {
                map.into_iter().collect::<HashMap<String, serde_json::Value>>()
            }
            _ => HashMap::new(),
        };
        JobDetail {
            key: JobKey::new(row.job_group, row.job_name),
            job_type: JobTypeName(row.job_type),
            data_map,
            durable: row.durable,
            requests_recovery: row.requests_recovery,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct FiredTriggerRow {
    pub fire_instance_id: String,
    pub scheduler_instance_id: String,
    pub trigger_group: String,
    pub trigger_name: String,
    pub job_group: String,
    pub job_name: String,
    pub state: String,
    pub start_time: DateTime<Utc>,
}

impl TryFrom<FiredTriggerRow> for FiredTrigger {
    type Error = String;

    fn try_from(row: FiredTriggerRow) -> Result<Self, Self::Error> {
        let state = match row.state.as_str() {
            "ACQUIRED" => FiredTriggerState::Acquired,
            "EXECUTING" => FiredTriggerState::Executing,
            other => return Err(format!("unknown fired-trigger state: {other}")),
        };
        Ok(FiredTrigger {
            fire_instance_id: row.fire_instance_id,
            scheduler_instance_id: row.scheduler_instance_id,
            trigger_key: TriggerKey::new(row.trigger_group, row.trigger_name),
            job_key: JobKey::new(row.job_group, row.job_name),
            state,
            start_time: row.start_time,
        })
    }
}

/// Scheduler-instance-stamped fire-instance-id, a fresh random suffix per
/// acquisition so two schedulers never collide (§3).
pub fn new_fire_instance_id(scheduler_instance_id: &str) -> String {
    format!("{scheduler_instance_id}-{}", Uuid::new_v4())
}
