//! Postgres-backed filtered delegate, acquisition engine, and fire/complete
//! engine for the job scheduler store (C4-C7).

pub mod acquisition;
pub mod config;
pub mod delegate;
pub mod error;
pub mod firing;
pub mod publisher;
pub mod sqlx_types;
pub mod store;

pub use error::PersistenceError;
pub use store::{JobStore, JobStoreConfig, JobsPage, QueuedJobEntry};
