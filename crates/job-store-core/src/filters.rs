//! Acquisition filter bus (C2).
//!
//! A fixed list of pluggable predicates, each cheap to poll synchronously
//! every acquisition round, producing a set of job types currently
//! ineligible (e.g. a rate-limited remote service the job type talks to).

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::watch;

use crate::types::JobTypeName;

/// A single acquisition filter. Implementors are responsible for their own
/// internal thread-safety; `state_changed` may fire from any thread (§5).
pub trait AcquisitionFilter: Send + Sync {
    /// Job types currently ineligible. Must be cheap — polled every round.
    fn types_to_exclude(&self) -> HashSet<JobTypeName>;

    /// A human-readable name for logging.
    fn name(&self) -> &str;
}

/// Bus of registered filters plus a change-notification channel the
/// dispatcher can watch to re-check immediately (§4.2, §6 — the core
/// passes the sentinel past timestamp to `signal_scheduling_change`).
pub struct FilterBus {
    filters: Vec<Arc<dyn AcquisitionFilter>>,
    changed_tx: watch::Sender<()>,
}

impl FilterBus {
    pub fn new(filters: Vec<Arc<dyn AcquisitionFilter>>) -> (Self, watch::Receiver<()>) {
        let (tx, rx) = watch::channel(());
        (
            Self {
                filters,
                changed_tx: tx,
            },
            rx,
        )
    }

    /// Union of every registered filter's current exclusions.
    pub fn excluded_types(&self) -> HashSet<JobTypeName> {
        let mut excluded = HashSet::new();
        for filter in &self.filters {
            excluded.extend(filter.types_to_exclude());
        }
        excluded
    }

    /// Call when any filter's answer is known to have changed — wakes
    /// anyone watching the receiver returned from `new`.
    pub fn notify_changed(&self) {
        let _ = self.changed_tx.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct StaticFilter {
        excluded: Mutex<HashSet<JobTypeName>>,
    }

    impl AcquisitionFilter for StaticFilter {
        fn types_to_exclude(&self) -> HashSet<JobTypeName> {
            self.excluded.lock().unwrap().clone()
        }

        fn name(&self) -> &str {
            "static"
        }
    }

    #[test]
    fn union_of_filter_exclusions() {
        let a = Arc::new(StaticFilter {
            excluded: Mutex::new(HashSet::from([JobTypeName::from("A")])),
        });
        let b = Arc::new(StaticFilter {
            excluded: Mutex::new(HashSet::from([JobTypeName::from("B")])),
        });
        let (bus, _rx) = FilterBus::new(vec![a, b]);

        let excluded = bus.excluded_types();
        assert!(excluded.contains(&JobTypeName::from("A")));
        assert!(excluded.contains(&JobTypeName::from("B")));
        assert_eq!(excluded.len(), 2);
    }

    #[tokio::test]
    async fn notify_changed_wakes_watcher() {
        let (bus, mut rx) = FilterBus::new(vec![]);
        let initial = *rx.borrow_and_update();
        bus.notify_changed();
        rx.changed().await.unwrap();
        let _ = initial; // unit value, just proving the channel fired
    }
}
