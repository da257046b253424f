//! Service layer
//!
//! Reconciliation, background jobs and the read-only query surface.
//! Services orchestrate the provider, database and cache.

mod jobs;
mod query;
mod reconciler;

pub use jobs::{BroomJob, Job, JobState, ScheduledJob, Scheduler, SyncJob, Trigger};
pub use query::QueryService;
pub use reconciler::{
    AppliedBatch, BatchOp, CycleReport, Diff, ReconcileSettings, Reconciler, compute_diff,
};
