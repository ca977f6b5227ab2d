//! §7 error taxonomy: "all database exceptions wrap into a single
//! `PersistenceError` with the originating cause; the operation aborts
//! and the transaction rolls back."

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("job store error: {0}")]
    JobStore(#[from] job_store_core::JobStoreError),

    #[error("validator failure: fired batch produced no EXECUTING row for instance {0}")]
    ValidatorFailed(String),
}
