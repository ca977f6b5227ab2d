//! Durable entity shapes, identified by (group, name) per spec.md §3.
//!
//! These are plain data — no sqlx here. `job-store-postgres` owns the
//! `FromRow` mapping and converts into these types at the boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::state::TriggerState;

/// (group, name) identity shared by triggers and job details.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TriggerKey {
    pub group: String,
    pub name: String,
}

impl TriggerKey {
    pub fn new(group: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for TriggerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.group, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobKey {
    pub group: String,
    pub name: String,
}

impl JobKey {
    pub fn new(group: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for JobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.group, self.name)
    }
}

/// Fully qualified job type identifier — resolved to a runtime type by the
/// external type-load helper (§6). The catalog and gate logic only ever
/// compare these as opaque strings plus whatever the catalog has on file
/// for them; they never need to instantiate the type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobTypeName(pub String);

impl std::fmt::Display for JobTypeName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for JobTypeName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for JobTypeName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A durable trigger row. Lifecycle: created by the base store's
/// `StoreTrigger`; mutated by state transitions only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    pub key: TriggerKey,
    pub job_key: JobKey,
    pub next_fire_time: Option<DateTime<Utc>>,
    pub previous_fire_time: Option<DateTime<Utc>>,
    pub state: TriggerState,
    pub fire_instance_id: Option<String>,
    pub calendar_name: Option<String>,
}

/// Job detail row, owned by the base store; the core only reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDetail {
    pub key: JobKey,
    pub job_type: JobTypeName,
    pub data_map: HashMap<String, serde_json::Value>,
    pub durable: bool,
    pub requests_recovery: bool,
}

/// In-flight firing record. Created at acquisition, deleted at completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FiredTrigger {
    pub fire_instance_id: String,
    pub scheduler_instance_id: String,
    pub trigger_key: TriggerKey,
    pub job_key: JobKey,
    pub state: FiredTriggerState,
    pub start_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FiredTriggerState {
    Acquired,
    Executing,
}

impl FiredTriggerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Acquired => "ACQUIRED",
            Self::Executing => "EXECUTING",
        }
    }
}

/// An executing entry, mirroring §3's in-memory "Executing table".
#[derive(Debug, Clone)]
pub struct ExecutingEntry {
    pub job_key: JobKey,
    pub job_detail: JobDetail,
    pub start_time: DateTime<Utc>,
}

/// Sentinel far-past timestamp the base signaler interprets as "wake
/// immediately and re-check". §9: "preserve it exactly."
pub fn sentinel_past_timestamp() -> DateTime<Utc> {
    "1982-06-28T00:00:00Z".parse().expect("valid sentinel literal")
}

/// Opaque scheduler instance identity, stamped on fired-trigger rows so
/// §3 invariant 5 ("the executing table mirrors exactly the fired-trigger
/// rows in state EXECUTING for this scheduler instance") can be checked.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SchedulerInstanceId(pub String);

impl std::fmt::Display for SchedulerInstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_is_far_in_the_past() {
        let sentinel = sentinel_past_timestamp();
        assert!(sentinel < DateTime::parse_from_rfc3339("2000-01-01T00:00:00Z").unwrap());
    }

    #[test]
    fn trigger_key_display_matches_group_dot_name() {
        let key = TriggerKey::new("imports", "anidb-sync");
        assert_eq!(key.to_string(), "imports.anidb-sync");
    }
}
