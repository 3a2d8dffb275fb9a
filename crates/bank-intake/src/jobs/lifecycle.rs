use super::activity::{ActivityCategory, ActivityEvent, ActivitySink, Severity};
use super::domain::{AuditAction, ForwardingState, Job, JobId, JobOrigin, JobStatus, NewJob};
use super::repository::{JobRepository, RepositoryError};
use crate::routing::{Priority, RoutingCatalog, RoutingCode, RoutingError};
use crate::statements::ProcessingSummary;
use std::sync::Arc;
use tracing::{debug, info};

/// Actor recorded for transitions the system performs on its own.
pub const SYSTEM_ACTOR: &str = "system";

/// Result of asking for a status change. Refusals are recorded on the job, never raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied { from: JobStatus, to: JobStatus },
    /// The job already sits in the requested terminal state.
    Unchanged { status: JobStatus },
    Rejected {
        from: JobStatus,
        to: JobStatus,
        reason: String,
    },
}

impl TransitionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Routing(#[from] RoutingError),
    #[error("job {0} not found")]
    NotFound(JobId),
    #[error(transparent)]
    Repository(RepositoryError),
}

impl From<RepositoryError> for LifecycleError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(id) => Self::NotFound(id),
            other => Self::Repository(other),
        }
    }
}

/// Input for [`JobLifecycle::create_job`].
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub routing_code: RoutingCode,
    pub original_filename: String,
    pub file_size: u64,
    /// Falls back to the department default.
    pub priority: Option<Priority>,
    pub origin: JobOrigin,
    pub actor: String,
}

/// Whether the status graph has an edge `from -> to`. Approval rules are checked separately.
pub fn edge_exists(from: JobStatus, to: JobStatus) -> bool {
    use JobStatus::*;

    matches!(
        (from, to),
        (Uploaded, Validated | Queued | Processing | RequiresApproval)
            | (Validated, Queued | Processing | RequiresApproval | Failed)
            | (RequiresApproval, Queued | Failed)
            | (Queued, Processing | Failed)
            | (Processing, Completed | Failed)
    )
}

#[derive(Debug, Clone)]
enum Effect {
    None,
    Approve,
    Complete(Option<ProcessingSummary>),
    Fail(String),
}

#[derive(Debug, Clone)]
struct Step {
    to: JobStatus,
    action: AuditAction,
    detail: String,
    actor: String,
    effect: Effect,
}

impl Step {
    fn new(to: JobStatus, action: AuditAction, detail: impl Into<String>) -> Self {
        Self {
            to,
            action,
            detail: detail.into(),
            actor: SYSTEM_ACTOR.to_string(),
            effect: Effect::None,
        }
    }

    fn by(mut self, actor: &str) -> Self {
        self.actor = actor.to_string();
        self
    }

    fn with(mut self, effect: Effect) -> Self {
        self.effect = effect;
        self
    }

    fn check(&self, job: &Job) -> Result<(), String> {
        let from = job.status();
        let approving = matches!(self.effect, Effect::Approve);

        if !edge_exists(from, self.to) {
            return Err(format!("no transition from {from} to {}", self.to));
        }
        if self.to == JobStatus::RequiresApproval && !job.requires_approval() {
            return Err("job does not require approval".to_string());
        }
        if approving && from != JobStatus::RequiresApproval {
            return Err("job is not awaiting approval".to_string());
        }
        if from == JobStatus::RequiresApproval && !approving && self.to != JobStatus::Failed {
            return Err("job must be approved before it is released".to_string());
        }
        if matches!(self.to, JobStatus::Queued | JobStatus::Processing)
            && job.requires_approval()
            && job.approved_by().is_none()
            && !approving
        {
            return Err("job requires approval before it is released".to_string());
        }
        Ok(())
    }

    fn apply(&self, job: &mut Job) -> TransitionOutcome {
        let from = job.status();

        if from.is_terminal() && from == self.to {
            job.record(
                AuditAction::RejectedTransition,
                format!("{from} -> {} ignored, job already {from}", self.to),
                &self.actor,
            );
            return TransitionOutcome::Unchanged { status: from };
        }

        if let Err(reason) = self.check(job) {
            job.record(
                AuditAction::RejectedTransition,
                format!("{from} -> {} rejected: {reason}", self.to),
                &self.actor,
            );
            return TransitionOutcome::Rejected {
                from,
                to: self.to,
                reason,
            };
        }

        job.set_status(self.to);
        match &self.effect {
            Effect::None | Effect::Complete(None) => {}
            Effect::Approve => job.set_approved_by(&self.actor),
            Effect::Complete(Some(summary)) => job.set_summary(*summary),
            Effect::Fail(message) => job.set_error(message.clone()),
        }
        job.record(self.action, self.detail.clone(), &self.actor);

        TransitionOutcome::Applied { from, to: self.to }
    }
}

/// The only writer of jobs: checks every status change against the graph and the approval
/// gate, appends the audit entry, and reports activity.
#[derive(Clone)]
pub struct JobLifecycle {
    repository: Arc<dyn JobRepository>,
    catalog: Arc<RoutingCatalog>,
    activity: Arc<dyn ActivitySink>,
}

impl JobLifecycle {
    pub fn new(
        repository: Arc<dyn JobRepository>,
        catalog: Arc<RoutingCatalog>,
        activity: Arc<dyn ActivitySink>,
    ) -> Self {
        Self {
            repository,
            catalog,
            activity,
        }
    }

    pub fn catalog(&self) -> &RoutingCatalog {
        &self.catalog
    }

    pub fn create_job(&self, request: JobRequest) -> Result<Job, LifecycleError> {
        let code = self.catalog.build_routing_code(
            &request.routing_code.department,
            &request.routing_code.process,
            &request.routing_code.file_type,
        )?;
        let department = self.catalog.require_department(&code.department)?;

        let job = Job::open(NewJob {
            routing_code: code,
            original_filename: request.original_filename,
            file_size: request.file_size,
            uploaded_by: request.actor,
            priority: request.priority.unwrap_or(department.default_priority),
            requires_approval: department.requires_approval,
            origin: request.origin,
        });
        let job = self.repository.insert(job)?;

        info!(
            job_id = %job.id(),
            routing_code = %job.routing_code(),
            priority = %job.priority(),
            requires_approval = job.requires_approval(),
            "job created"
        );
        self.activity.emit(ActivityEvent::new(
            ActivityCategory::Upload,
            Severity::Info,
            format!(
                "{} received for {} ({} bytes)",
                job.original_filename(),
                job.routing_code(),
                job.file_size()
            ),
        ));
        Ok(job)
    }

    pub fn validate_job(&self, id: &JobId) -> Result<TransitionOutcome, LifecycleError> {
        self.transition(
            id,
            Step::new(
                JobStatus::Validated,
                AuditAction::Validated,
                "routing code and file accepted",
            ),
        )
    }

    pub fn queue_job(&self, id: &JobId) -> Result<TransitionOutcome, LifecycleError> {
        self.transition(
            id,
            Step::new(JobStatus::Queued, AuditAction::Queued, "queued for processing"),
        )
    }

    pub fn request_approval(&self, id: &JobId) -> Result<TransitionOutcome, LifecycleError> {
        self.transition(
            id,
            Step::new(
                JobStatus::RequiresApproval,
                AuditAction::ApprovalRequested,
                "department requires approval before processing",
            ),
        )
    }

    pub fn approve(&self, id: &JobId, approver: &str) -> Result<TransitionOutcome, LifecycleError> {
        self.transition(
            id,
            Step::new(
                JobStatus::Queued,
                AuditAction::Approved,
                format!("approved by {approver}"),
            )
            .by(approver)
            .with(Effect::Approve),
        )
    }

    pub fn start_processing(&self, id: &JobId) -> Result<TransitionOutcome, LifecycleError> {
        self.transition(
            id,
            Step::new(
                JobStatus::Processing,
                AuditAction::ProcessingStarted,
                "processing started",
            ),
        )
    }

    pub fn complete_processing(
        &self,
        id: &JobId,
        summary: Option<ProcessingSummary>,
    ) -> Result<TransitionOutcome, LifecycleError> {
        let detail = match &summary {
            Some(summary) => format!(
                "processed {} statements, {} transactions, total {}",
                summary.statements, summary.transactions, summary.total_amount
            ),
            None => "processing completed".to_string(),
        };
        self.transition(
            id,
            Step::new(JobStatus::Completed, AuditAction::ProcessingCompleted, detail)
                .with(Effect::Complete(summary)),
        )
    }

    pub fn fail_processing(
        &self,
        id: &JobId,
        reason: &str,
    ) -> Result<TransitionOutcome, LifecycleError> {
        self.transition(
            id,
            Step::new(
                JobStatus::Failed,
                AuditAction::ProcessingFailed,
                format!("processing failed: {reason}"),
            )
            .with(Effect::Fail(reason.to_string())),
        )
    }

    /// Records how the hand-off to the downstream system went. Not a status change.
    pub fn record_forwarding(
        &self,
        id: &JobId,
        state: ForwardingState,
        detail: &str,
    ) -> Result<Job, LifecycleError> {
        let job = self.repository.apply(id, &mut |job| {
            job.set_forwarding(state);
            job.record(
                AuditAction::ForwardingRecorded,
                format!("forwarding {}: {detail}", state.label()),
                SYSTEM_ACTOR,
            );
        })?;
        debug!(job_id = %id, forwarding = state.label(), "forwarding recorded");
        Ok(job)
    }

    pub fn append_note(&self, id: &JobId, text: &str, actor: &str) -> Result<Job, LifecycleError> {
        let job = self.repository.apply(id, &mut |job| {
            job.push_note(text);
            job.record(AuditAction::NoteAdded, text, actor);
        })?;
        Ok(job)
    }

    pub fn job(&self, id: &JobId) -> Result<Job, LifecycleError> {
        self.find(id)?
            .ok_or_else(|| LifecycleError::NotFound(id.clone()))
    }

    pub fn find(&self, id: &JobId) -> Result<Option<Job>, LifecycleError> {
        Ok(self.repository.fetch(id)?)
    }

    /// Snapshots, newest first by creation time. Equal timestamps keep the later insert first.
    pub fn jobs(&self) -> Result<Vec<Job>, LifecycleError> {
        let mut jobs = self.repository.list()?;
        jobs.reverse();
        jobs.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        Ok(jobs)
    }

    fn transition(&self, id: &JobId, step: Step) -> Result<TransitionOutcome, LifecycleError> {
        let mut outcome = None;
        let job = self.repository.apply(id, &mut |job| {
            outcome = Some(step.apply(job));
        })?;
        let outcome = outcome.ok_or_else(|| LifecycleError::NotFound(id.clone()))?;

        self.report(&job, &step, &outcome);
        Ok(outcome)
    }

    fn report(&self, job: &Job, step: &Step, outcome: &TransitionOutcome) {
        let event = match outcome {
            TransitionOutcome::Applied { from, to } => {
                info!(job_id = %job.id(), %from, %to, actor = %step.actor, "job transition");
                let category = match step.action {
                    AuditAction::ApprovalRequested | AuditAction::Approved => {
                        ActivityCategory::Approval
                    }
                    AuditAction::ProcessingStarted
                    | AuditAction::ProcessingCompleted
                    | AuditAction::ProcessingFailed => ActivityCategory::Processing,
                    _ => ActivityCategory::Lifecycle,
                };
                let severity = match to {
                    JobStatus::Completed => Severity::Success,
                    JobStatus::Failed => Severity::Error,
                    _ => Severity::Info,
                };
                ActivityEvent::new(
                    category,
                    severity,
                    format!("{} {}: {}", job.original_filename(), to, step.detail),
                )
            }
            TransitionOutcome::Unchanged { status } => ActivityEvent::new(
                ActivityCategory::Lifecycle,
                Severity::Warning,
                format!("{} already {status}", job.original_filename()),
            ),
            TransitionOutcome::Rejected { from, to, reason } => ActivityEvent::new(
                ActivityCategory::Lifecycle,
                Severity::Warning,
                format!(
                    "{} {from} -> {to} rejected: {reason}",
                    job.original_filename()
                ),
            ),
        };
        self.activity.emit(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::activity::ActivityFeed;
    use crate::jobs::repository::InMemoryJobRepository;
    use rstest::rstest;

    fn lifecycle() -> (JobLifecycle, Arc<ActivityFeed>) {
        let feed = Arc::new(ActivityFeed::new());
        let lifecycle = JobLifecycle::new(
            Arc::new(InMemoryJobRepository::new()),
            Arc::new(RoutingCatalog::standard()),
            feed.clone(),
        );
        (lifecycle, feed)
    }

    fn request(department: &str, process: &str, file_type: &str) -> JobRequest {
        JobRequest {
            routing_code: RoutingCode::new(department, process, file_type),
            original_filename: "statement.mt940".to_string(),
            file_size: 128,
            priority: None,
            origin: JobOrigin::Upload,
            actor: "tester".to_string(),
        }
    }

    fn rejected_count(job: &Job) -> usize {
        job.audit_trail()
            .iter()
            .filter(|entry| entry.action == AuditAction::RejectedTransition)
            .count()
    }

    #[rstest]
    #[case(JobStatus::Uploaded, JobStatus::Validated, true)]
    #[case(JobStatus::Uploaded, JobStatus::Failed, false)]
    #[case(JobStatus::Validated, JobStatus::Failed, true)]
    #[case(JobStatus::RequiresApproval, JobStatus::Processing, false)]
    #[case(JobStatus::Queued, JobStatus::Completed, false)]
    #[case(JobStatus::Processing, JobStatus::Completed, true)]
    #[case(JobStatus::Completed, JobStatus::Failed, false)]
    #[case(JobStatus::Failed, JobStatus::Queued, false)]
    fn status_graph(#[case] from: JobStatus, #[case] to: JobStatus, #[case] expected: bool) {
        assert_eq!(edge_exists(from, to), expected);
    }

    #[test]
    fn create_uses_department_defaults() {
        let (lifecycle, feed) = lifecycle();
        let job = lifecycle
            .create_job(request("treasury", "cashflow", "mt940"))
            .expect("creates");
        assert_eq!(job.routing_code().to_string(), "TREASURY-CASHFLOW-MT940");
        assert_eq!(job.priority(), Priority::Critical);
        assert!(job.requires_approval());
        assert_eq!(feed.recent().len(), 1);
    }

    #[test]
    fn create_rejects_unknown_process() {
        let (lifecycle, _) = lifecycle();
        let err = lifecycle
            .create_job(request("HR", "TRADING", "CSV"))
            .expect_err("rejects");
        assert!(matches!(
            err,
            LifecycleError::Routing(RoutingError::UnknownProcess { .. })
        ));
    }

    #[test]
    fn approval_gate_blocks_release_until_approved() {
        let (lifecycle, _) = lifecycle();
        let job = lifecycle
            .create_job(request("FINANCE", "PAYMENT", "MT940"))
            .expect("creates");
        let id = job.id().clone();

        assert!(lifecycle.validate_job(&id).expect("validates").is_applied());
        assert!(matches!(
            lifecycle.queue_job(&id).expect("answers"),
            TransitionOutcome::Rejected { .. }
        ));
        assert!(lifecycle.request_approval(&id).expect("requests").is_applied());
        assert!(matches!(
            lifecycle.start_processing(&id).expect("answers"),
            TransitionOutcome::Rejected { .. }
        ));
        assert!(matches!(
            lifecycle.queue_job(&id).expect("answers"),
            TransitionOutcome::Rejected { .. }
        ));
        assert_eq!(
            lifecycle.approve(&id, "controller").expect("approves"),
            TransitionOutcome::Applied {
                from: JobStatus::RequiresApproval,
                to: JobStatus::Queued
            }
        );
        assert!(lifecycle.start_processing(&id).expect("starts").is_applied());

        let job = lifecycle.job(&id).expect("present");
        assert_eq!(job.status(), JobStatus::Processing);
        assert_eq!(job.approved_by(), Some("controller"));
        assert_eq!(rejected_count(&job), 3);
    }

    #[test]
    fn approval_state_requires_approval_department() {
        let (lifecycle, _) = lifecycle();
        let job = lifecycle
            .create_job(request("HR", "PAYROLL", "CSV"))
            .expect("creates");
        let outcome = lifecycle.request_approval(job.id()).expect("answers");
        assert!(matches!(outcome, TransitionOutcome::Rejected { .. }));
        assert!(matches!(
            lifecycle.approve(job.id(), "boss").expect("answers"),
            TransitionOutcome::Rejected { .. }
        ));
        assert_eq!(
            lifecycle.job(job.id()).expect("present").status(),
            JobStatus::Uploaded
        );
    }

    #[test]
    fn terminal_replay_is_unchanged_with_one_audit_entry() {
        let (lifecycle, _) = lifecycle();
        let job = lifecycle
            .create_job(request("HR", "PAYROLL", "CSV"))
            .expect("creates");
        let id = job.id().clone();
        lifecycle.start_processing(&id).expect("starts");
        lifecycle.complete_processing(&id, None).expect("completes");
        let before = lifecycle.job(&id).expect("present").audit_trail().len();

        assert_eq!(
            lifecycle.complete_processing(&id, None).expect("answers"),
            TransitionOutcome::Unchanged {
                status: JobStatus::Completed
            }
        );
        let job = lifecycle.job(&id).expect("present");
        assert_eq!(job.audit_trail().len(), before + 1);
        assert_eq!(rejected_count(&job), 1);
        assert_eq!(job.status(), JobStatus::Completed);
    }

    #[test]
    fn leaving_terminal_state_is_rejected_once() {
        let (lifecycle, _) = lifecycle();
        let job = lifecycle
            .create_job(request("HR", "PAYROLL", "CSV"))
            .expect("creates");
        let id = job.id().clone();
        lifecycle.validate_job(&id).expect("validates");
        lifecycle.fail_processing(&id, "bad file").expect("fails");

        let outcome = lifecycle.start_processing(&id).expect("answers");
        assert!(matches!(outcome, TransitionOutcome::Rejected { .. }));
        let job = lifecycle.job(&id).expect("present");
        assert_eq!(job.status(), JobStatus::Failed);
        assert_eq!(job.error_message(), Some("bad file"));
        assert_eq!(rejected_count(&job), 1);
    }

    #[test]
    fn notes_and_forwarding_are_audited() {
        let (lifecycle, _) = lifecycle();
        let job = lifecycle
            .create_job(request("OPERATIONS", "RECONCILE", "CSV"))
            .expect("creates");
        let job = lifecycle
            .append_note(job.id(), "month end", "tester")
            .expect("notes");
        let job = lifecycle
            .record_forwarding(job.id(), ForwardingState::Delivered, "ack 7")
            .expect("records");

        assert_eq!(job.notes(), ["month end".to_string()]);
        assert_eq!(job.forwarding(), ForwardingState::Delivered);
        let actions: Vec<AuditAction> = job.audit_trail().iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            [
                AuditAction::Created,
                AuditAction::NoteAdded,
                AuditAction::ForwardingRecorded
            ]
        );
    }

    #[test]
    fn jobs_are_listed_newest_first() {
        let (lifecycle, _) = lifecycle();
        let first = lifecycle
            .create_job(request("HR", "PAYROLL", "CSV"))
            .expect("creates");
        let second = lifecycle
            .create_job(request("HR", "BENEFITS", "CSV"))
            .expect("creates");
        let ids: Vec<JobId> = lifecycle
            .jobs()
            .expect("lists")
            .iter()
            .map(|job| job.id().clone())
            .collect();
        assert_eq!(ids, [second.id().clone(), first.id().clone()]);
        assert!(matches!(
            lifecycle.job(&JobId::from("nope")),
            Err(LifecycleError::NotFound(_))
        ));
    }

    #[test]
    fn listing_follows_creation_time_not_insert_order() {
        let open = |name: &str| {
            Job::open(NewJob {
                routing_code: RoutingCode::new("HR", "BENEFITS", "CSV"),
                original_filename: name.to_string(),
                file_size: 1,
                uploaded_by: "tester".to_string(),
                priority: Priority::Low,
                requires_approval: false,
                origin: JobOrigin::Upload,
            })
        };
        let older = open("older.csv");
        std::thread::sleep(std::time::Duration::from_millis(5));
        let newer = open("newer.csv");

        let repository = Arc::new(InMemoryJobRepository::new());
        repository.insert(newer).expect("inserts");
        repository.insert(older).expect("inserts");
        let lifecycle = JobLifecycle::new(
            repository,
            Arc::new(RoutingCatalog::standard()),
            Arc::new(ActivityFeed::new()),
        );

        let names: Vec<String> = lifecycle
            .jobs()
            .expect("lists")
            .iter()
            .map(|job| job.original_filename().to_string())
            .collect();
        assert_eq!(names, ["newer.csv", "older.csv"]);
    }
}
