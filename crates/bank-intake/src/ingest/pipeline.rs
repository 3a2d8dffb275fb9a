use super::archive::{Archive, ArchiveError};
use super::downstream::{DownstreamError, DownstreamGateway, DownstreamRequest};
use super::monitor::IngestMonitor;
use super::remote::{DropSession, RemoteDrop, RemoteEntry, TransportError};
use crate::config::IngestConfig;
use crate::jobs::{
    split_drop_name, ActivityCategory, ActivityEvent, ActivitySink, ForwardingState, Job, JobId,
    JobLifecycle, JobOrigin, JobRequest, JobStatus, LifecycleError, Severity,
};
use crate::routing::{RoutingCode, RoutingError};
use crate::statements::{DecodeError, DecoderRegistry, FileType, ProcessingSummary};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Actor recorded on jobs the loop creates.
pub const INGEST_ACTOR: &str = "ingest";

/// How long `run` sleeps between checks of the stop flag while waiting for the next cycle.
const STOP_POLL: Duration = Duration::from_millis(200);

/// Errors that end a cycle early. Files not yet reached stay in the drop for the next one.
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("cannot prepare staging directory {path}: {source}")]
    Staging {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

/// What happened to one listed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileDisposition {
    Completed,
    Failed,
    /// The file's job had already finished; it was archived and removed untouched.
    AlreadyFinished,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileOutcome {
    pub name: String,
    pub job_id: JobId,
    pub disposition: FileDisposition,
    pub archived_to: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub remote_removed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub listed: usize,
    pub skipped: Vec<String>,
    pub files: Vec<FileOutcome>,
    pub settled: Vec<String>,
    pub pending_removals: Vec<String>,
}

/// Work left over for a file whose job already reached a terminal state.
#[derive(Debug, Clone)]
enum Settlement {
    Archive { job_id: JobId, staged: PathBuf },
    Remove { job_id: JobId },
}

/// Job a listed file belongs to.
#[derive(Debug)]
enum Target {
    Existing(Job),
    New(RoutingCode),
}

#[derive(Debug, thiserror::Error)]
enum FileFailure {
    #[error("cannot read staged file: {0}")]
    Read(#[source] io::Error),
    #[error(transparent)]
    Decode(DecodeError),
    #[error("content decoded as {decoded} but the job is routed as {routed}")]
    WrongFormat { decoded: FileType, routed: String },
    #[error("validation failed: {0}")]
    Validation(String),
    #[error(transparent)]
    Downstream(DownstreamError),
}

/// Collaborators the loop drives.
#[derive(Clone)]
pub struct IngestParts {
    pub drop: Arc<dyn RemoteDrop>,
    pub registry: Arc<DecoderRegistry>,
    pub lifecycle: JobLifecycle,
    pub downstream: Arc<dyn DownstreamGateway>,
    pub monitor: Arc<IngestMonitor>,
    pub activity: Arc<dyn ActivitySink>,
}

/// Poll, fetch, process, archive. One cycle at a time; a file is removed from the drop
/// only after its staged copy is safely archived.
pub struct IngestionLoop {
    parts: IngestParts,
    archive: Archive,
    staging_dir: PathBuf,
    department: String,
    downstream_function: String,
    poll_interval: Duration,
    settlements: Mutex<BTreeMap<String, Settlement>>,
}

impl IngestionLoop {
    /// Fails when the configured department cannot own unattended files.
    pub fn new(parts: IngestParts, config: &IngestConfig) -> Result<Self, RoutingError> {
        let department = parts
            .lifecycle
            .catalog()
            .check_drop_department(&config.department)?
            .code
            .to_string();

        Ok(Self {
            parts,
            archive: Archive::new(&config.archive_dir),
            staging_dir: config.staging_dir.clone(),
            department,
            downstream_function: config.downstream_function.clone(),
            poll_interval: config.poll_interval,
            settlements: Mutex::new(BTreeMap::new()),
        })
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn drop_location(&self) -> String {
        self.parts.drop.location()
    }

    pub fn monitor(&self) -> &Arc<IngestMonitor> {
        &self.parts.monitor
    }

    /// Names whose remote copy still has to be removed.
    pub fn pending_removals(&self) -> Vec<String> {
        self.settlements
            .lock()
            .expect("settlement mutex poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Repeats cycles until `stop` is set, waiting the poll interval between them.
    pub fn run(&self, stop: &AtomicBool) {
        info!(
            drop = %self.parts.drop.location(),
            interval_secs = self.poll_interval.as_secs(),
            department = %self.department,
            "ingestion loop started"
        );
        while !stop.load(Ordering::Relaxed) {
            match self.run_cycle() {
                Ok(report) => {
                    if !report.files.is_empty() {
                        info!(
                            listed = report.listed,
                            handled = report.files.len(),
                            skipped = report.skipped.len(),
                            "ingestion cycle finished"
                        );
                    }
                }
                Err(err) => error!(error = %err, "ingestion cycle aborted"),
            }

            let mut waited = Duration::ZERO;
            while waited < self.poll_interval && !stop.load(Ordering::Relaxed) {
                let step = STOP_POLL.min(self.poll_interval - waited);
                thread::sleep(step);
                waited += step;
            }
        }
        info!("ingestion loop stopped");
    }

    pub fn run_cycle(&self) -> Result<CycleReport, CycleError> {
        let location = self.parts.drop.location();
        let session = self.parts.drop.connect().and_then(|mut session| {
            let entries = session.list()?;
            Ok((session, entries))
        });
        let (mut session, entries) = match session {
            Ok(connected) => {
                self.parts.monitor.record_poll(&location, true);
                connected
            }
            Err(err) => {
                self.parts.monitor.record_poll(&location, false);
                self.parts.monitor.record_error(None, &err.to_string());
                self.emit(Severity::Error, format!("drop {location} unavailable: {err}"));
                return Err(err.into());
            }
        };

        let mut report = CycleReport {
            listed: entries.len(),
            ..CycleReport::default()
        };
        debug!(listed = entries.len(), "drop listed");

        fs::create_dir_all(&self.staging_dir).map_err(|source| CycleError::Staging {
            path: self.staging_dir.clone(),
            source,
        })?;

        // Parked names are settled below and never reprocessed, even once settled.
        let parked = self.pending_removals();
        self.settle(session.as_mut(), &entries, &mut report)?;

        let fresh: Vec<&RemoteEntry> = entries
            .iter()
            .filter(|entry| !parked.contains(&entry.name))
            .collect();
        self.parts.monitor.record_found(fresh.len());

        for entry in fresh {
            self.handle_entry(session.as_mut(), entry, &mut report)?;
        }

        report.pending_removals = self.pending_removals();
        Ok(report)
    }

    /// Finishes archive/remove work left over from earlier cycles.
    fn settle(
        &self,
        session: &mut dyn DropSession,
        entries: &[RemoteEntry],
        report: &mut CycleReport,
    ) -> Result<(), CycleError> {
        let pending: Vec<(String, Settlement)> = self
            .settlements
            .lock()
            .expect("settlement mutex poisoned")
            .iter()
            .map(|(name, settlement)| (name.clone(), settlement.clone()))
            .collect();

        for (name, settlement) in pending {
            if !entries.iter().any(|entry| entry.name == name) {
                if let Settlement::Archive { staged, .. } = &settlement {
                    self.archive.store(staged, &name)?;
                }
                self.forget(&name);
                report.settled.push(name);
                continue;
            }

            let job_id = match settlement {
                Settlement::Archive { job_id, staged } => {
                    self.archive.store(&staged, &name)?;
                    self.remember(&name, Settlement::Remove { job_id: job_id.clone() });
                    job_id
                }
                Settlement::Remove { job_id } => job_id,
            };
            if self.remove_remote(session, &name, &job_id) {
                report.settled.push(name);
            }
        }
        Ok(())
    }

    fn handle_entry(
        &self,
        session: &mut dyn DropSession,
        entry: &RemoteEntry,
        report: &mut CycleReport,
    ) -> Result<(), CycleError> {
        let Some(decoder) = self.parts.registry.claim(&entry.name) else {
            debug!(file = %entry.name, "no decoder claims file, leaving it in the drop");
            report.skipped.push(entry.name.clone());
            return Ok(());
        };

        let existing = match split_drop_name(&entry.name) {
            Some((job_id, _)) => self.parts.lifecycle.find(&job_id)?,
            None => None,
        };

        match existing.as_ref().map(Job::status) {
            Some(status) if status.is_held() => {
                debug!(file = %entry.name, %status, "job not released yet");
                report.skipped.push(entry.name.clone());
                return Ok(());
            }
            Some(JobStatus::Processing) => {
                warn!(file = %entry.name, "job already processing, leaving file for now");
                report.skipped.push(entry.name.clone());
                return Ok(());
            }
            _ => {}
        }

        let target = match existing {
            Some(job) => Target::Existing(job),
            None => match self.drop_routing(decoder.file_type()) {
                Some(code) => Target::New(code),
                None => {
                    warn!(
                        file = %entry.name,
                        department = %self.department,
                        file_type = %decoder.file_type(),
                        "department has no process for this file type"
                    );
                    report.skipped.push(entry.name.clone());
                    return Ok(());
                }
            },
        };

        let staged = self.staging_dir.join(&entry.name);
        let fetched = session.fetch(&entry.name, &staged)?;
        debug!(file = %entry.name, bytes = fetched, "fetched to staging");

        let job = match target {
            Target::Existing(job) if job.status().is_terminal() => {
                return self.archive_finished(session, entry, &job, &staged, report);
            }
            Target::Existing(job) => job,
            Target::New(routing_code) => self.parts.lifecycle.create_job(JobRequest {
                routing_code,
                original_filename: entry.name.clone(),
                file_size: fetched,
                priority: None,
                origin: JobOrigin::Drop,
                actor: INGEST_ACTOR.to_string(),
            })?,
        };
        let job_id = job.id().clone();

        if !self.parts.lifecycle.start_processing(&job_id)?.is_applied() {
            warn!(job_id = %job_id, file = %entry.name, "job refused to start, leaving file");
            if let Err(err) = fs::remove_file(&staged) {
                debug!(error = %err, "staged copy already gone");
            }
            report.skipped.push(entry.name.clone());
            return Ok(());
        }

        let (disposition, error) = match self.process(&entry.name, &staged, &job) {
            Ok(summary) => {
                self.parts
                    .lifecycle
                    .complete_processing(&job_id, Some(summary))?;
                self.parts.monitor.record_processed(&summary);
                (FileDisposition::Completed, None)
            }
            Err(failure) => {
                let message = failure.to_string();
                self.parts.lifecycle.fail_processing(&job_id, &message)?;
                self.parts.monitor.record_failed(&entry.name, &message);
                (FileDisposition::Failed, Some(message))
            }
        };

        let archived_to = self.archive_staged(&entry.name, &staged, &job_id)?;
        let remote_removed = self.remove_remote(session, &entry.name, &job_id);

        report.files.push(FileOutcome {
            name: entry.name.clone(),
            job_id,
            disposition,
            archived_to,
            error,
            remote_removed,
        });
        Ok(())
    }

    fn drop_routing(&self, file_type: FileType) -> Option<RoutingCode> {
        self.parts
            .lifecycle
            .catalog()
            .first_process_for(&self.department, file_type)
    }

    /// Decode, validate, forward. Every failure is per file. The decoded format must be
    /// the one the job's routing code names.
    fn process(
        &self,
        name: &str,
        staged: &Path,
        job: &Job,
    ) -> Result<ProcessingSummary, FileFailure> {
        let job_id = job.id();
        let bytes = fs::read(staged).map_err(FileFailure::Read)?;
        let parsed = self
            .parts
            .registry
            .decode(name, &bytes)
            .map_err(FileFailure::Decode)?;

        let routed = &job.routing_code().file_type;
        if !parsed.file_type().routing_token().eq_ignore_ascii_case(routed) {
            return Err(FileFailure::WrongFormat {
                decoded: parsed.file_type(),
                routed: routed.clone(),
            });
        }

        let structurally_sound = self
            .parts
            .registry
            .decoder_for(parsed.file_type())
            .map(|decoder| decoder.validate(&parsed))
            .unwrap_or(false);
        if !structurally_sound {
            return Err(FileFailure::Validation(format!(
                "{} output is incomplete or inconsistent",
                parsed.file_type()
            )));
        }

        let forwarded = serde_json::to_value(&parsed)
            .map_err(|err| DownstreamError::Encoding(err.to_string()))
            .and_then(|parsed_representation| {
                self.parts.downstream.notify(&DownstreamRequest {
                    function_name: self.downstream_function.clone(),
                    source_name: name.to_string(),
                    file_type: parsed.file_type(),
                    raw_bytes: bytes,
                    parsed_representation,
                })
            });

        match forwarded {
            Ok(reply) => {
                self.record_forwarding(job_id, ForwardingState::Delivered, &reply.acknowledgement);
                Ok(parsed.summary())
            }
            Err(err) => {
                self.record_forwarding(job_id, ForwardingState::Failed, &err.to_string());
                Err(FileFailure::Downstream(err))
            }
        }
    }

    fn record_forwarding(&self, job_id: &JobId, state: ForwardingState, detail: &str) {
        if let Err(err) = self
            .parts
            .lifecycle
            .record_forwarding(job_id, state, detail)
        {
            warn!(job_id = %job_id, error = %err, "forwarding state not recorded");
        }
    }

    fn archive_finished(
        &self,
        session: &mut dyn DropSession,
        entry: &RemoteEntry,
        job: &Job,
        staged: &Path,
        report: &mut CycleReport,
    ) -> Result<(), CycleError> {
        info!(
            job_id = %job.id(),
            file = %entry.name,
            status = %job.status(),
            "job already finished, archiving without reprocessing"
        );
        let archived_to = self.archive_staged(&entry.name, staged, job.id())?;
        self.parts.lifecycle.append_note(
            job.id(),
            &format!(
                "drop copy archived as {} without reprocessing",
                archived_to.display()
            ),
            INGEST_ACTOR,
        )?;
        let remote_removed = self.remove_remote(session, &entry.name, job.id());

        report.files.push(FileOutcome {
            name: entry.name.clone(),
            job_id: job.id().clone(),
            disposition: FileDisposition::AlreadyFinished,
            archived_to,
            error: None,
            remote_removed,
        });
        Ok(())
    }

    /// On failure the file is parked so the next cycle retries the archive instead of
    /// processing it again.
    fn archive_staged(
        &self,
        name: &str,
        staged: &Path,
        job_id: &JobId,
    ) -> Result<PathBuf, CycleError> {
        match self.archive.store(staged, name) {
            Ok(path) => {
                info!(file = %name, archived_to = %path.display(), "file archived");
                Ok(path)
            }
            Err(err) => {
                self.remember(
                    name,
                    Settlement::Archive {
                        job_id: job_id.clone(),
                        staged: staged.to_path_buf(),
                    },
                );
                self.parts.monitor.record_error(Some(name), &err.to_string());
                self.emit(Severity::Error, format!("archiving {name} failed: {err}"));
                Err(err.into())
            }
        }
    }

    /// Returns whether the remote copy is gone. Failures are parked for later cycles.
    fn remove_remote(&self, session: &mut dyn DropSession, name: &str, job_id: &JobId) -> bool {
        match session.remove(name) {
            Ok(()) => {
                self.forget(name);
                debug!(file = %name, "removed from drop");
                true
            }
            Err(err) => {
                warn!(file = %name, error = %err, "remote removal failed, will retry");
                self.parts.monitor.record_error(Some(name), &err.to_string());
                self.remember(
                    name,
                    Settlement::Remove {
                        job_id: job_id.clone(),
                    },
                );
                false
            }
        }
    }

    fn remember(&self, name: &str, settlement: Settlement) {
        self.settlements
            .lock()
            .expect("settlement mutex poisoned")
            .insert(name.to_string(), settlement);
    }

    fn forget(&self, name: &str) {
        self.settlements
            .lock()
            .expect("settlement mutex poisoned")
            .remove(name);
    }

    fn emit(&self, severity: Severity, message: String) {
        self.parts
            .activity
            .emit(ActivityEvent::new(ActivityCategory::Ingest, severity, message));
    }
}
