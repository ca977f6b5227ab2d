//! Executing-jobs table (C3) and the `JobAllowed` gate (§4.5).
//!
//! A plain map guarded by one mutex (§4.3, §9: "do not replace with
//! lock-free structures — the correctness argument rests on atomic
//! read-modify-write of the map together with the `localCounts` it
//! feeds"). All reads and writes occur under the mutex; it is never held
//! across a suspension point — callers snapshot what they need and drop
//! the guard before awaiting anything.

use std::collections::{HashMap, HashSet};

use tokio::sync::Mutex;

use crate::catalog::{ConcurrencyCatalog, ConcurrencyKind};
use crate::filters::FilterBus;
use crate::types::{ExecutingEntry, JobKey, JobTypeName};

#[derive(Default)]
pub struct ExecutingTable {
    inner: Mutex<HashMap<JobKey, ExecutingEntry>>,
}

impl ExecutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, entry: ExecutingEntry) {
        self.inner.lock().await.insert(entry.job_key.clone(), entry);
    }

    pub async fn remove(&self, job_key: &JobKey) -> Option<ExecutingEntry> {
        self.inner.lock().await.remove(job_key)
    }

    /// Ordered snapshot by start time ascending (§4.7).
    pub async fn snapshot(&self) -> Vec<ExecutingEntry> {
        let guard = self.inner.lock().await;
        let mut entries: Vec<_> = guard.values().cloned().collect();
        entries.sort_by_key(|e| e.start_time);
        entries
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Count of currently executing entries whose job type is `job_type`.
    pub async fn count_of_type(&self, job_type: &JobTypeName) -> usize {
        self.inner
            .lock()
            .await
            .values()
            .filter(|e| &e.job_detail.job_type == job_type)
            .count()
    }

    /// Whether any currently executing entry's job type is in `types`.
    pub async fn any_of_types(&self, types: &[JobTypeName]) -> bool {
        let guard = self.inner.lock().await;
        guard
            .values()
            .any(|e| types.contains(&e.job_detail.job_type))
    }

    /// Whether any currently executing entry has exactly this job key
    /// (disallow-concurrent-execution is a singleton per job-key, not
    /// per type — §4.5).
    pub async fn has_job_key(&self, job_key: &JobKey) -> bool {
        self.inner.lock().await.contains_key(job_key)
    }
}

/// Local, in-batch counters fed alongside the executing table while
/// acquiring (§4.5): keyed by job-key name for disallow-concurrent,
/// group name for disallow-group, type name for numeric limits.
#[derive(Debug, Default)]
pub struct LocalCounts {
    by_job_key_name: HashMap<String, u32>,
    by_group: HashMap<String, u32>,
    by_type_name: HashMap<String, u32>,
}

impl LocalCounts {
    pub fn new() -> Self {
        Self::default()
    }
}

/// First-match gate rules from §4.5. `catalog` and `executing` never
/// mutate; `locals` accumulates within one acquisition batch (or, on the
/// fire path, is built fresh from the executing table and consulted once
/// — see the Open Question resolution in SPEC_FULL.md §C.4).
pub async fn job_allowed(
    catalog: &ConcurrencyCatalog,
    executing: &ExecutingTable,
    locals: &mut LocalCounts,
    job_type: &JobTypeName,
    job_key: &JobKey,
) -> bool {
    match catalog.kind_for(job_type) {
        ConcurrencyKind::DisallowAny => {
            let job_key_name = job_key.to_string();
            if executing.has_job_key(job_key).await
                || locals.by_job_key_name.get(&job_key_name).copied().unwrap_or(0) >= 1
            {
                false
            } else {
                *locals.by_job_key_name.entry(job_key_name).or_insert(0) += 1;
                true
            }
        }
        ConcurrencyKind::DisallowGroup => {
            let Some(group) = catalog.group_of(job_type) else {
                return true;
            };
            let members = catalog.members_of_group(group);
            if executing.any_of_types(members).await || locals.by_group.contains_key(group) {
                false
            } else {
                locals.by_group.insert(group.to_string(), 1);
                true
            }
        }
        ConcurrencyKind::Limit(n) => {
            let running = executing.count_of_type(job_type).await as u32;
            let local = locals.by_type_name.get(&job_type.0).copied().unwrap_or(0);
            if running + local < n {
                *locals.by_type_name.entry(job_type.0.clone()).or_insert(0) += 1;
                true
            } else {
                false
            }
        }
        ConcurrencyKind::Unconstrained => true,
    }
}

/// The set of job types that currently cannot acquire or be listed as
/// available, combining the filter bus's exclusions with any `Limit` or
/// `DisallowGroup` type whose capacity is presently exhausted (§4.5 step
/// 1). Shared between the acquisition engine's filter snapshot and
/// `getJobs`'s per-row "blocked" flag (§6) so both answer the same
/// question the same way.
pub async fn effective_exclusions(
    catalog: &ConcurrencyCatalog,
    executing: &ExecutingTable,
    filters: &FilterBus,
) -> HashSet<JobTypeName> {
    let mut excluded = filters.excluded_types();

    for job_type in catalog.all_job_types() {
        match catalog.kind_for(job_type) {
            ConcurrencyKind::Limit(n) => {
                let running = executing.count_of_type(job_type).await as u32;
                if n.saturating_sub(running) == 0 {
                    excluded.insert(job_type.clone());
                }
            }
            ConcurrencyKind::DisallowGroup => {
                if let Some(group) = catalog.group_of(job_type) {
                    let members = catalog.members_of_group(group);
                    if executing.any_of_types(members).await {
                        excluded.insert(job_type.clone());
                    }
                }
            }
            _ => {}
        }
    }

    excluded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ConcurrencyDescriptor;
    use crate::types::JobDetail;
    use chrono::Utc;
    use std::collections::HashMap as StdHashMap;

    fn job_detail(job_key: &JobKey, job_type: &JobTypeName) -> JobDetail {
        JobDetail {
            key: job_key.clone(),
            job_type: job_type.clone(),
            data_map: StdHashMap::new(),
            durable: false,
            requests_recovery: false,
        }
    }

    #[tokio::test]
    async fn limit_gate_accepts_up_to_cap_then_rejects() {
        let mut catalog = ConcurrencyCatalog::new();
        let job_type = JobTypeName::from("AniDbSyncJob");
        catalog.register(job_type.clone(), ConcurrencyDescriptor::limit(2));
        let executing = ExecutingTable::new();
        let mut locals = LocalCounts::new();

        for i in 0..2 {
            let job_key = JobKey::new("default", format!("sync-{i}"));
            assert!(job_allowed(&catalog, &executing, &mut locals, &job_type, &job_key).await);
        }
        let third = JobKey::new("default", "sync-3");
        assert!(!job_allowed(&catalog, &executing, &mut locals, &job_type, &third).await);
    }

    #[tokio::test]
    async fn limit_counts_already_executing_plus_local() {
        let mut catalog = ConcurrencyCatalog::new();
        let job_type = JobTypeName::from("AniDbSyncJob");
        catalog.register(job_type.clone(), ConcurrencyDescriptor::limit(2));
        let executing = ExecutingTable::new();
        let running_key = JobKey::new("default", "already-running");
        executing
            .insert(ExecutingEntry {
                job_key: running_key.clone(),
                job_detail: job_detail(&running_key, &job_type),
                start_time: Utc::now(),
            })
            .await;

        let mut locals = LocalCounts::new();
        let candidate = JobKey::new("default", "candidate");
        assert!(job_allowed(&catalog, &executing, &mut locals, &job_type, &candidate).await);

        let second_candidate = JobKey::new("default", "candidate-2");
        assert!(!job_allowed(&catalog, &executing, &mut locals, &job_type, &second_candidate).await);
    }

    #[tokio::test]
    async fn disallow_group_rejects_second_member_even_if_different_type() {
        let mut catalog = ConcurrencyCatalog::new();
        let a = JobTypeName::from("ImportA");
        let b = JobTypeName::from("ImportB");
        catalog.register(a.clone(), ConcurrencyDescriptor::group("import"));
        catalog.register(b.clone(), ConcurrencyDescriptor::group("import"));
        let executing = ExecutingTable::new();
        let mut locals = LocalCounts::new();

        let key_a = JobKey::new("default", "a");
        assert!(job_allowed(&catalog, &executing, &mut locals, &a, &key_a).await);

        let key_b = JobKey::new("default", "b");
        assert!(!job_allowed(&catalog, &executing, &mut locals, &b, &key_b).await);
    }

    #[tokio::test]
    async fn disallow_any_rejects_same_job_key_concurrently() {
        let mut catalog = ConcurrencyCatalog::new();
        let job_type = JobTypeName::from("SingletonImport");
        catalog.register(job_type.clone(), ConcurrencyDescriptor::disallow_any());
        let executing = ExecutingTable::new();
        let mut locals = LocalCounts::new();

        let key = JobKey::new("default", "only-one");
        assert!(job_allowed(&catalog, &executing, &mut locals, &job_type, &key).await);
        // Same batch, same key again -> rejected by local counter.
        assert!(!job_allowed(&catalog, &executing, &mut locals, &job_type, &key).await);
    }

    #[tokio::test]
    async fn unconstrained_type_always_allowed() {
        let catalog = ConcurrencyCatalog::new();
        let executing = ExecutingTable::new();
        let mut locals = LocalCounts::new();
        let job_type = JobTypeName::from("NoRulesJob");
        for i in 0..50 {
            let key = JobKey::new("default", format!("job-{i}"));
            assert!(job_allowed(&catalog, &executing, &mut locals, &job_type, &key).await);
        }
    }

    #[tokio::test]
    async fn effective_exclusions_includes_exhausted_limit_type() {
        let mut catalog = ConcurrencyCatalog::new();
        let job_type = JobTypeName::from("AniDbSyncJob");
        catalog.register(job_type.clone(), ConcurrencyDescriptor::limit(1));
        let executing = ExecutingTable::new();
        let running_key = JobKey::new("default", "running");
        executing
            .insert(ExecutingEntry {
                job_key: running_key.clone(),
                job_detail: job_detail(&running_key, &job_type),
                start_time: Utc::now(),
            })
            .await;
        let (filters, _rx) = FilterBus::new(vec![]);

        let excluded = effective_exclusions(&catalog, &executing, &filters).await;
        assert!(excluded.contains(&job_type));
    }

    #[tokio::test]
    async fn effective_exclusions_omits_type_under_cap() {
        let mut catalog = ConcurrencyCatalog::new();
        let job_type = JobTypeName::from("AniDbSyncJob");
        catalog.register(job_type.clone(), ConcurrencyDescriptor::limit(2));
        let executing = ExecutingTable::new();
        let (filters, _rx) = FilterBus::new(vec![]);

        let excluded = effective_exclusions(&catalog, &executing, &filters).await;
        assert!(!excluded.contains(&job_type));
    }
}
