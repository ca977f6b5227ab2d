//! Concurrency catalog (C1).
//!
//! Built once at construction from an explicit registration step — the
//! systems-language equivalent of the source's attribute-driven reflection
//! (§9: "prefer the explicit registry — it removes a class of
//! mystery-behavior bugs and makes the catalog auditable").

use std::collections::HashMap;

use crate::types::JobTypeName;

/// Declarative per-type concurrency metadata, the equivalent of the
/// source's `LimitConcurrency` / `DisallowConcurrencyGroup` /
/// `DisallowConcurrentExecution` attributes.
#[derive(Debug, Clone)]
pub struct ConcurrencyDescriptor {
    /// Equivalent to a singleton per job-key; read directly at decision
    /// time rather than cached (§4.1).
    pub disallow_concurrent_execution: bool,
    pub group: Option<String>,
    pub max_concurrent_jobs: Option<u32>,
    /// Upper bound a configuration override cannot exceed.
    pub max_allowed_concurrent_jobs: Option<u32>,
}

impl ConcurrencyDescriptor {
    pub fn unconstrained() -> Self {
        Self {
            disallow_concurrent_execution: false,
            group: None,
            max_concurrent_jobs: None,
            max_allowed_concurrent_jobs: None,
        }
    }

    pub fn disallow_any() -> Self {
        Self {
            disallow_concurrent_execution: true,
            ..Self::unconstrained()
        }
    }

    pub fn group(name: impl Into<String>) -> Self {
        Self {
            group: Some(name.into()),
            ..Self::unconstrained()
        }
    }

    pub fn limit(max: u32) -> Self {
        Self {
            max_concurrent_jobs: Some(max),
            ..Self::unconstrained()
        }
    }

    pub fn with_max_allowed(mut self, max_allowed: u32) -> Self {
        self.max_allowed_concurrent_jobs = Some(max_allowed);
        self
    }
}

/// The resolved rule the gate logic actually consults — descriptor plus
/// configuration overrides already folded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcurrencyKind {
    DisallowAny,
    DisallowGroup,
    Limit(u32),
    Unconstrained,
}

/// Registry mapping job type -> concurrency rules, built once at startup
/// and read-only afterward (§5 "Shared resources").
#[derive(Debug, Default)]
pub struct ConcurrencyCatalog {
    descriptors: HashMap<JobTypeName, ConcurrencyDescriptor>,
    /// group name -> member types, uniqueness by type (§3).
    groups: HashMap<String, Vec<JobTypeName>>,
}

impl ConcurrencyCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a concrete job type's metadata. Called once per type that
    /// implements the job interface and is not abstract (§4.1).
    pub fn register(&mut self, job_type: JobTypeName, descriptor: ConcurrencyDescriptor) {
        if let Some(group) = &descriptor.group {
            let members = self.groups.entry(group.clone()).or_default();
            if !members.contains(&job_type) {
                members.push(job_type.clone());
            }
        }
        self.descriptors.insert(job_type, descriptor);
    }

    /// Apply `{ typeShortName -> override limit }` from the settings
    /// provider (§6). For each override, if the type declares
    /// `max_allowed`, the effective limit is `min(override, max_allowed)`.
    pub fn apply_overrides(&mut self, overrides: &HashMap<String, u32>) {
        for (type_name, override_limit) in overrides {
            let key = JobTypeName(type_name.clone());
            if let Some(descriptor) = self.descriptors.get_mut(&key) {
                let effective = match descriptor.max_allowed_concurrent_jobs {
                    Some(max_allowed) => (*override_limit).min(max_allowed),
                    None => *override_limit,
                };
                descriptor.max_concurrent_jobs = Some(effective);
            }
        }
    }

    pub fn descriptor(&self, job_type: &JobTypeName) -> Option<&ConcurrencyDescriptor> {
        self.descriptors.get(job_type)
    }

    /// Report the effective concurrency kind for a job type, first match
    /// in the order the gate logic (§4.5 `JobAllowed`) applies them:
    /// disallow-any, then disallow-group, then numeric limit, else
    /// unconstrained.
    pub fn kind_for(&self, job_type: &JobTypeName) -> ConcurrencyKind {
        match self.descriptors.get(job_type) {
            Some(d) if d.disallow_concurrent_execution => ConcurrencyKind::DisallowAny,
            Some(d) if d.group.is_some() => ConcurrencyKind::DisallowGroup,
            Some(d) => match d.max_concurrent_jobs {
                Some(n) => ConcurrencyKind::Limit(n),
                None => ConcurrencyKind::Unconstrained,
            },
            None => ConcurrencyKind::Unconstrained,
        }
    }

    pub fn group_of(&self, job_type: &JobTypeName) -> Option<&str> {
        self.descriptors
            .get(job_type)
            .and_then(|d| d.group.as_deref())
    }

    /// Given a group name, report its member types.
    pub fn members_of_group(&self, group: &str) -> &[JobTypeName] {
        self.groups
            .get(group)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn limit(&self, job_type: &JobTypeName) -> Option<u32> {
        self.descriptors
            .get(job_type)
            .and_then(|d| d.max_concurrent_jobs)
    }

    pub fn all_job_types(&self) -> impl Iterator<Item = &JobTypeName> {
        self.descriptors.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_is_capped_by_max_allowed() {
        let mut catalog = ConcurrencyCatalog::new();
        let anidb_sync = JobTypeName::from("AniDbSyncJob");
        catalog.register(
            anidb_sync.clone(),
            ConcurrencyDescriptor::limit(2).with_max_allowed(4),
        );

        let mut overrides = HashMap::new();
        overrides.insert("AniDbSyncJob".to_string(), 10);
        catalog.apply_overrides(&overrides);

        assert_eq!(catalog.limit(&anidb_sync), Some(4));
    }

    #[test]
    fn override_without_max_allowed_is_unbounded() {
        let mut catalog = ConcurrencyCatalog::new();
        let job = JobTypeName::from("ImportJob");
        catalog.register(job.clone(), ConcurrencyDescriptor::limit(1));

        let mut overrides = HashMap::new();
        overrides.insert("ImportJob".to_string(), 9);
        catalog.apply_overrides(&overrides);

        assert_eq!(catalog.limit(&job), Some(9));
    }

    #[test]
    fn group_membership_is_deduplicated() {
        let mut catalog = ConcurrencyCatalog::new();
        let a = JobTypeName::from("HasherJob");
        let b = JobTypeName::from("MoverJob");
        catalog.register(a.clone(), ConcurrencyDescriptor::group("fs-io"));
        catalog.register(b.clone(), ConcurrencyDescriptor::group("fs-io"));
        // re-registering the same type must not duplicate the group entry
        catalog.register(a.clone(), ConcurrencyDescriptor::group("fs-io"));

        let members = catalog.members_of_group("fs-io");
        assert_eq!(members.len(), 2);
        assert!(members.contains(&a));
        assert!(members.contains(&b));
    }

    #[test]
    fn kind_priority_is_disallow_any_then_group_then_limit() {
        let mut catalog = ConcurrencyCatalog::new();
        let singleton = JobTypeName::from("SingletonJob");
        catalog.register(singleton.clone(), ConcurrencyDescriptor::disallow_any());
        assert_eq!(catalog.kind_for(&singleton), ConcurrencyKind::DisallowAny);

        let grouped = JobTypeName::from("GroupedJob");
        catalog.register(grouped.clone(), ConcurrencyDescriptor::group("g"));
        assert_eq!(catalog.kind_for(&grouped), ConcurrencyKind::DisallowGroup);

        let limited = JobTypeName::from("LimitedJob");
        catalog.register(limited.clone(), ConcurrencyDescriptor::limit(3));
        assert_eq!(catalog.kind_for(&limited), ConcurrencyKind::Limit(3));

        let free = JobTypeName::from("FreeJob");
        assert_eq!(catalog.kind_for(&free), ConcurrencyKind::Unconstrained);
    }
}
