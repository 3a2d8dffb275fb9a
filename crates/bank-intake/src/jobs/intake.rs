use super::domain::{Job, JobId, JobOrigin, JobStatus};
use super::lifecycle::{JobLifecycle, JobRequest, LifecycleError, TransitionOutcome};
use crate::ingest::RemoteDrop;
use crate::routing::{DepartmentDefinition, Priority, RoutingCode, RoutingError};
use crate::statements::DecoderRegistry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

const DEFAULT_UPLOADER: &str = "api_user";

/// A file submitted by a person together with the routing it should follow.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadRequest {
    pub department: String,
    pub process: String,
    pub file_type: String,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub uploaded_by: Option<String>,
    pub original_filename: String,
    pub file_bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadReceipt {
    pub job_id: JobId,
    pub routing_code: String,
    pub status: JobStatus,
    pub requires_approval: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("{0}")]
    BadInput(String),
    #[error(transparent)]
    InvalidRouting(RoutingError),
    #[error("job {0} not found")]
    NotFound(JobId),
    #[error("{0}")]
    Conflict(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<LifecycleError> for IntakeError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::Routing(routing) => Self::InvalidRouting(routing),
            LifecycleError::NotFound(id) => Self::NotFound(id),
            LifecycleError::Repository(repository) => Self::Internal(repository.to_string()),
        }
    }
}

/// Entry point for uploads: opens the job, parks the file in the drop under the job's
/// name, and either queues it or holds it for approval.
#[derive(Clone)]
pub struct IntakeService {
    lifecycle: JobLifecycle,
    drop: Arc<dyn RemoteDrop>,
    registry: Arc<DecoderRegistry>,
}

impl IntakeService {
    pub fn new(
        lifecycle: JobLifecycle,
        drop: Arc<dyn RemoteDrop>,
        registry: Arc<DecoderRegistry>,
    ) -> Self {
        Self {
            lifecycle,
            drop,
            registry,
        }
    }

    pub fn lifecycle(&self) -> &JobLifecycle {
        &self.lifecycle
    }

    pub fn submit(&self, request: UploadRequest) -> Result<UploadReceipt, IntakeError> {
        let routing_code = self
            .lifecycle
            .catalog()
            .build_routing_code(&request.department, &request.process, &request.file_type)
            .map_err(IntakeError::InvalidRouting)?;

        let filename = request.original_filename.trim();
        if filename.is_empty() {
            return Err(IntakeError::BadInput("original_filename is required".to_string()));
        }
        if filename.contains(['/', '\\']) || filename.starts_with('.') {
            return Err(IntakeError::BadInput(format!(
                "original_filename '{filename}' must be a plain file name"
            )));
        }
        // The loop only picks up names a decoder claims, so anything else would sit
        // queued in the drop forever.
        let decoder = self.registry.claim(filename).ok_or_else(|| {
            IntakeError::BadInput(format!(
                "original_filename '{filename}' has no recognised bank statement extension"
            ))
        })?;
        let claimed = decoder.file_type().routing_token();
        if !claimed.eq_ignore_ascii_case(&routing_code.file_type) {
            return Err(IntakeError::BadInput(format!(
                "original_filename '{filename}' looks like {claimed}, but the routing code is {routing_code}"
            )));
        }
        if request.file_bytes.is_empty() {
            return Err(IntakeError::BadInput("file content is empty".to_string()));
        }

        let actor = request
            .uploaded_by
            .as_deref()
            .map(str::trim)
            .filter(|actor| !actor.is_empty())
            .unwrap_or(DEFAULT_UPLOADER)
            .to_string();

        let job = self.lifecycle.create_job(JobRequest {
            routing_code,
            original_filename: filename.to_string(),
            file_size: request.file_bytes.len() as u64,
            priority: request.priority,
            origin: JobOrigin::Upload,
            actor: actor.clone(),
        })?;
        let job_id = job.id().clone();

        if let Some(notes) = request.notes.as_deref().map(str::trim) {
            if !notes.is_empty() {
                self.lifecycle.append_note(&job_id, notes, &actor)?;
            }
        }

        self.lifecycle.validate_job(&job_id)?;

        let deposit = self
            .drop
            .connect()
            .and_then(|mut session| session.deposit(&job.drop_name(), &request.file_bytes));
        if let Err(err) = deposit {
            error!(job_id = %job_id, error = %err, "could not deposit upload into drop");
            self.lifecycle
                .fail_processing(&job_id, &format!("deposit failed: {err}"))?;
            return Err(IntakeError::Internal(format!(
                "could not store {filename} for processing"
            )));
        }

        if job.requires_approval() {
            self.lifecycle.request_approval(&job_id)?;
        } else {
            self.lifecycle.queue_job(&job_id)?;
        }

        let job = self.lifecycle.job(&job_id)?;
        info!(
            job_id = %job_id,
            routing_code = %job.routing_code(),
            status = %job.status(),
            "upload accepted"
        );
        Ok(UploadReceipt {
            job_id,
            routing_code: job.routing_code().to_string(),
            status: job.status(),
            requires_approval: job.requires_approval(),
        })
    }

    pub fn job(&self, id: &JobId) -> Result<Job, IntakeError> {
        Ok(self.lifecycle.job(id)?)
    }

    /// Newest first.
    pub fn jobs(&self) -> Result<Vec<Job>, IntakeError> {
        Ok(self.lifecycle.jobs()?)
    }

    pub fn approve(&self, id: &JobId, approver: &str) -> Result<Job, IntakeError> {
        let approver = approver.trim();
        if approver.is_empty() {
            return Err(IntakeError::BadInput("approver is required".to_string()));
        }
        match self.lifecycle.approve(id, approver)? {
            TransitionOutcome::Applied { .. } => Ok(self.lifecycle.job(id)?),
            TransitionOutcome::Unchanged { status } => {
                Err(IntakeError::Conflict(format!("job {id} is already {status}")))
            }
            TransitionOutcome::Rejected { reason, .. } => {
                Err(IntakeError::Conflict(format!("job {id} cannot be approved: {reason}")))
            }
        }
    }

    pub fn departments(&self) -> &[DepartmentDefinition] {
        self.lifecycle.catalog().departments()
    }

    pub fn routing_codes(&self) -> Vec<RoutingCode> {
        self.lifecycle.catalog().routing_codes()
    }
}
