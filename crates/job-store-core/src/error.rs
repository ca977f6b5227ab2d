//! Error types for the job store core.
//!
//! Granular, per-concern enums rather than one global error — the
//! persistence layer (`job-store-postgres`) wraps these and adds its own
//! `#[from] sqlx::Error` variant.

use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum JobStoreError {
    #[error("unknown job type: {0}")]
    UnknownJobType(String),

    #[error("job type resolution failed for trigger {trigger}: {source}")]
    TypeResolution {
        trigger: TriggerKey,
        #[source]
        source: anyhow::Error,
    },

    #[error("no fired-trigger record for instance {0}")]
    MissingFiredTrigger(Uuid),

    #[error("invalid state transition for trigger {trigger}: {from} -> {to}")]
    InvalidTransition {
        trigger: TriggerKey,
        from: String,
        to: String,
    },

    #[error("persistence error: {0}")]
    Persistence(#[source] anyhow::Error),
}

use crate::types::TriggerKey;
