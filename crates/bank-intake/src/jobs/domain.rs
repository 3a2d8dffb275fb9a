use crate::routing::{Priority, RoutingCode};
use crate::statements::ProcessingSummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// UUID v4 job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Uploaded,
    Validated,
    Queued,
    Processing,
    Completed,
    Failed,
    RequiresApproval,
}

impl JobStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Uploaded => "UPLOADED",
            Self::Validated => "VALIDATED",
            Self::Queued => "QUEUED",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::RequiresApproval => "REQUIRES_APPROVAL",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Not yet released for processing.
    pub const fn is_held(self) -> bool {
        matches!(
            self,
            Self::Uploaded | Self::Validated | Self::RequiresApproval
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// How the file reached the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOrigin {
    Upload,
    Drop,
}

/// Outcome of handing the decoded file to the downstream system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForwardingState {
    NotAttempted,
    Delivered,
    Failed,
}

impl ForwardingState {
    pub const fn label(self) -> &'static str {
        match self {
            Self::NotAttempted => "not_attempted",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditAction {
    #[serde(rename = "job_created")]
    Created,
    #[serde(rename = "validated")]
    Validated,
    #[serde(rename = "queued")]
    Queued,
    #[serde(rename = "approval_requested")]
    ApprovalRequested,
    #[serde(rename = "approved")]
    Approved,
    #[serde(rename = "processing_started")]
    ProcessingStarted,
    #[serde(rename = "processing_completed")]
    ProcessingCompleted,
    #[serde(rename = "processing_failed")]
    ProcessingFailed,
    #[serde(rename = "forwarding_recorded")]
    ForwardingRecorded,
    #[serde(rename = "note_added")]
    NoteAdded,
    #[serde(rename = "rejected-transition")]
    RejectedTransition,
}

impl AuditAction {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Created => "job_created",
            Self::Validated => "validated",
            Self::Queued => "queued",
            Self::ApprovalRequested => "approval_requested",
            Self::Approved => "approved",
            Self::ProcessingStarted => "processing_started",
            Self::ProcessingCompleted => "processing_completed",
            Self::ProcessingFailed => "processing_failed",
            Self::ForwardingRecorded => "forwarding_recorded",
            Self::NoteAdded => "note_added",
            Self::RejectedTransition => "rejected-transition",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    pub detail: String,
    pub actor: String,
}

/// A file moving through the routing lifecycle. Only the lifecycle engine can change it,
/// and every change leaves an audit entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    id: JobId,
    routing_code: RoutingCode,
    original_filename: String,
    file_size: u64,
    created_at: DateTime<Utc>,
    uploaded_by: String,
    status: JobStatus,
    priority: Priority,
    requires_approval: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    approved_by: Option<String>,
    origin: JobOrigin,
    forwarding: ForwardingState,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
    notes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ProcessingSummary>,
    audit_trail: Vec<AuditEntry>,
}

/// Everything needed to open a job; the lifecycle fills in the rest.
#[derive(Debug, Clone)]
pub(crate) struct NewJob {
    pub(crate) routing_code: RoutingCode,
    pub(crate) original_filename: String,
    pub(crate) file_size: u64,
    pub(crate) uploaded_by: String,
    pub(crate) priority: Priority,
    pub(crate) requires_approval: bool,
    pub(crate) origin: JobOrigin,
}

impl Job {
    pub(crate) fn open(new: NewJob) -> Self {
        let created_at = Utc::now();
        let detail = format!("job created with routing {}", new.routing_code);
        let mut job = Self {
            id: JobId::generate(),
            routing_code: new.routing_code,
            original_filename: new.original_filename,
            file_size: new.file_size,
            created_at,
            uploaded_by: new.uploaded_by.clone(),
            status: JobStatus::Uploaded,
            priority: new.priority,
            requires_approval: new.requires_approval,
            approved_by: None,
            origin: new.origin,
            forwarding: ForwardingState::NotAttempted,
            error_message: None,
            notes: Vec::new(),
            summary: None,
            audit_trail: Vec::new(),
        };
        job.record(AuditAction::Created, detail, &new.uploaded_by);
        job
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn routing_code(&self) -> &RoutingCode {
        &self.routing_code
    }

    pub fn original_filename(&self) -> &str {
        &self.original_filename
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn uploaded_by(&self) -> &str {
        &self.uploaded_by
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn requires_approval(&self) -> bool {
        self.requires_approval
    }

    pub fn approved_by(&self) -> Option<&str> {
        self.approved_by.as_deref()
    }

    pub fn origin(&self) -> JobOrigin {
        self.origin
    }

    pub fn forwarding(&self) -> ForwardingState {
        self.forwarding
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn notes(&self) -> &[String] {
        &self.notes
    }

    pub fn summary(&self) -> Option<&ProcessingSummary> {
        self.summary.as_ref()
    }

    pub fn audit_trail(&self) -> &[AuditEntry] {
        &self.audit_trail
    }

    /// Name under which an uploaded file waits in the drop.
    pub fn drop_name(&self) -> String {
        format!("{}__{}", self.id, self.original_filename)
    }

    /// Appends an audit entry stamped no earlier than the previous one.
    pub(crate) fn record(&mut self, action: AuditAction, detail: impl Into<String>, actor: &str) {
        let now = Utc::now();
        let timestamp = self
            .audit_trail
            .last()
            .map_or(now, |last| last.timestamp.max(now));
        self.audit_trail.push(AuditEntry {
            timestamp,
            action,
            detail: detail.into(),
            actor: actor.to_string(),
        });
    }

    pub(crate) fn set_status(&mut self, status: JobStatus) {
        self.status = status;
    }

    pub(crate) fn set_approved_by(&mut self, approver: &str) {
        self.approved_by = Some(approver.to_string());
    }

    pub(crate) fn set_error(&mut self, message: impl Into<String>) {
        self.error_message = Some(message.into());
    }

    pub(crate) fn set_summary(&mut self, summary: ProcessingSummary) {
        self.summary = Some(summary);
    }

    pub(crate) fn set_forwarding(&mut self, state: ForwardingState) {
        self.forwarding = state;
    }

    pub(crate) fn push_note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }
}

/// Parses `<job-id>__<filename>` drop names back into their parts.
pub fn split_drop_name(name: &str) -> Option<(JobId, &str)> {
    let (prefix, filename) = name.split_once("__")?;
    uuid::Uuid::parse_str(prefix).ok()?;
    if filename.is_empty() {
        return None;
    }
    Some((JobId(prefix.to_string()), filename))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Job {
        Job::open(NewJob {
            routing_code: RoutingCode::new("HR", "PAYROLL", "CSV"),
            original_filename: "payroll.csv".to_string(),
            file_size: 42,
            uploaded_by: "tester".to_string(),
            priority: Priority::Normal,
            requires_approval: false,
            origin: JobOrigin::Upload,
        })
    }

    #[test]
    fn new_job_starts_uploaded_with_creation_entry() {
        let job = sample();
        assert_eq!(job.status(), JobStatus::Uploaded);
        assert_eq!(job.forwarding(), ForwardingState::NotAttempted);
        assert_eq!(job.audit_trail().len(), 1);
        assert_eq!(job.audit_trail()[0].action, AuditAction::Created);
        assert_eq!(job.audit_trail()[0].actor, "tester");
    }

    #[test]
    fn audit_timestamps_never_go_backwards() {
        let mut job = sample();
        for index in 0..20 {
            job.record(AuditAction::NoteAdded, format!("note {index}"), "tester");
        }
        assert!(job
            .audit_trail()
            .windows(2)
            .all(|pair| pair[0].timestamp <= pair[1].timestamp));
    }

    #[test]
    fn drop_names_round_trip_through_prefix() {
        let job = sample();
        let name = job.drop_name();
        let (id, filename) = split_drop_name(&name).expect("prefixed");
        assert_eq!(&id, job.id());
        assert_eq!(filename, "payroll.csv");
        assert!(split_drop_name("plain__file.csv").is_none());
        assert!(split_drop_name("statement.mt940").is_none());
    }

    #[test]
    fn status_serializes_in_screaming_case() {
        let json = serde_json::to_string(&JobStatus::RequiresApproval).expect("serializes");
        assert_eq!(json, "\"REQUIRES_APPROVAL\"");
        let json = serde_json::to_string(&AuditAction::RejectedTransition).expect("serializes");
        assert_eq!(json, "\"rejected-transition\"");
    }
}
