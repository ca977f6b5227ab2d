//! Queue-state publisher (C7) — event shapes and the trait collaborators
//! implement to receive them. The engines in `job-store-postgres` build
//! the snapshot and call through this trait; publication failures are
//! logged and swallowed by the caller (§7 "Event-publication errors").

use serde::Serialize;

use crate::types::ExecutingEntry;

#[derive(Debug, Clone, Serialize)]
pub struct ExecutingSnapshotEntry {
    pub job_group: String,
    pub job_name: String,
    pub description: String,
    pub start_time: chrono::DateTime<chrono::Utc>,
}

impl ExecutingSnapshotEntry {
    pub fn from_entry(entry: &ExecutingEntry, description: String) -> Self {
        Self {
            job_group: entry.job_key.group.clone(),
            job_name: entry.job_key.name.clone(),
            description,
            start_time: entry.start_time,
        }
    }
}

/// Carried by every queue-state event (§6).
#[derive(Debug, Clone, Serialize)]
pub struct QueueStateContext {
    pub thread_count: u32,
    pub waiting_triggers_count: i64,
    pub blocked_triggers_count: i64,
    pub total_triggers_count: i64,
    pub currently_executing: Vec<ExecutingSnapshotEntry>,
}

impl QueueStateContext {
    /// §8: `total == waiting + blocked + executing` at every event.
    pub fn is_internally_consistent(&self) -> bool {
        self.total_triggers_count
            == self.waiting_triggers_count
                + self.blocked_triggers_count
                + self.currently_executing.len() as i64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStateEventKind {
    Added,
    Executing,
    Completed,
}

/// Collaborator-facing handler. One method per event kind rather than a
/// single tagged-union callback, mirroring how the base signaler and the
/// job factory are separate narrow ports (§6).
pub trait QueueStateHandler: Send + Sync {
    fn on_added(&self, ctx: &QueueStateContext);
    fn on_executing(&self, ctx: &QueueStateContext);
    fn on_completed(&self, ctx: &QueueStateContext);
}

impl QueueStateContext {
    pub fn dispatch(&self, kind: QueueStateEventKind, handler: &dyn QueueStateHandler) {
        match kind {
            QueueStateEventKind::Added => handler.on_added(self),
            QueueStateEventKind::Executing => handler.on_executing(self),
            QueueStateEventKind::Completed => handler.on_completed(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consistency_check_catches_mismatch() {
        let ctx = QueueStateContext {
            thread_count: 4,
            waiting_triggers_count: 2,
            blocked_triggers_count: 1,
            total_triggers_count: 10,
            currently_executing: vec![],
        };
        assert!(!ctx.is_internally_consistent());
    }

    #[test]
    fn consistency_check_passes_when_sums_match() {
        let ctx = QueueStateContext {
            thread_count: 4,
            waiting_triggers_count: 2,
            blocked_triggers_count: 1,
            total_triggers_count: 3,
            currently_executing: vec![],
        };
        assert!(ctx.is_internally_consistent());
    }
}
