//! Processing jobs: the status graph, its audit trail, storage, and the upload intake.

mod activity;
mod domain;
mod intake;
mod lifecycle;
mod repository;

pub use activity::{
    ActivityCategory, ActivityEvent, ActivityFeed, ActivitySink, Severity, ACTIVITY_CAPACITY,
};
pub use domain::{
    split_drop_name, AuditAction, AuditEntry, ForwardingState, Job, JobId, JobOrigin, JobStatus,
};
pub use intake::{IntakeError, IntakeService, UploadReceipt, UploadRequest};
pub use lifecycle::{
    edge_exists, JobLifecycle, JobRequest, LifecycleError, TransitionOutcome, SYSTEM_ACTOR,
};
pub use repository::{InMemoryJobRepository, JobRepository, RepositoryError};
