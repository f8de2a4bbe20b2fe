//! Migration workflow
//!
//! Lifecycle of a schema change from request to completion: who may act on
//! it, which transitions are legal, and how the execution agent and the
//! auto-run sweep drive it forward.

pub mod actions;
pub mod engine;
pub mod models;
pub mod pg_store;
pub mod policy;
pub mod requests;
pub mod scheduler;
pub mod store;
pub mod transition;

pub use engine::{BulkResult, MetaRequestView, MigrationView, NoInspection, StagedMigration, WorkflowEngine};
pub use models::{Cluster, MetaRequest, Migration, RunProgress, RunType, WorkflowAction};
pub use pg_store::PgStore;
pub use store::{MemoryStore, MigrationRepository};
