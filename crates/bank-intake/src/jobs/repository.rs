use super::domain::{Job, JobId};
use std::collections::HashMap;
use std::sync::Mutex;

/// Storage abstraction for jobs. Reads hand out copies; mutation happens in place under
/// the store's own lock through [`JobRepository::apply`].
pub trait JobRepository: Send + Sync {
    fn insert(&self, job: Job) -> Result<Job, RepositoryError>;
    fn fetch(&self, id: &JobId) -> Result<Option<Job>, RepositoryError>;
    /// All jobs in insertion order.
    fn list(&self) -> Result<Vec<Job>, RepositoryError>;
    fn apply(&self, id: &JobId, mutation: &mut dyn FnMut(&mut Job)) -> Result<Job, RepositoryError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("job {0} already exists")]
    Conflict(JobId),
    #[error("job {0} not found")]
    NotFound(JobId),
    #[error("job store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Default)]
struct Store {
    jobs: HashMap<JobId, Job>,
    order: Vec<JobId>,
}

/// Process-local job store; everything is lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryJobRepository {
    store: Mutex<Store>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobRepository for InMemoryJobRepository {
    fn insert(&self, job: Job) -> Result<Job, RepositoryError> {
        let mut guard = self.store.lock().expect("job store mutex poisoned");
        if guard.jobs.contains_key(job.id()) {
            return Err(RepositoryError::Conflict(job.id().clone()));
        }
        guard.order.push(job.id().clone());
        guard.jobs.insert(job.id().clone(), job.clone());
        Ok(job)
    }

    fn fetch(&self, id: &JobId) -> Result<Option<Job>, RepositoryError> {
        let guard = self.store.lock().expect("job store mutex poisoned");
        Ok(guard.jobs.get(id).cloned())
    }

    fn list(&self) -> Result<Vec<Job>, RepositoryError> {
        let guard = self.store.lock().expect("job store mutex poisoned");
        Ok(guard
            .order
            .iter()
            .filter_map(|id| guard.jobs.get(id).cloned())
            .collect())
    }

    fn apply(&self, id: &JobId, mutation: &mut dyn FnMut(&mut Job)) -> Result<Job, RepositoryError> {
        let mut guard = self.store.lock().expect("job store mutex poisoned");
        let job = guard
            .jobs
            .get_mut(id)
            .ok_or_else(|| RepositoryError::NotFound(id.clone()))?;
        mutation(job);
        Ok(job.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::domain::{JobOrigin, JobStatus, NewJob};
    use crate::routing::{Priority, RoutingCode};

    fn job(name: &str) -> Job {
        Job::open(NewJob {
            routing_code: RoutingCode::new("HR", "BENEFITS", "CSV"),
            original_filename: name.to_string(),
            file_size: 1,
            uploaded_by: "tester".to_string(),
            priority: Priority::Low,
            requires_approval: false,
            origin: JobOrigin::Upload,
        })
    }

    #[test]
    fn insert_rejects_duplicates() {
        let repository = InMemoryJobRepository::new();
        let stored = repository.insert(job("a.csv")).expect("inserts");
        assert_eq!(
            repository.insert(stored.clone()),
            Err(RepositoryError::Conflict(stored.id().clone()))
        );
    }

    #[test]
    fn list_keeps_insertion_order() {
        let repository = InMemoryJobRepository::new();
        for name in ["a.csv", "b.csv", "c.csv"] {
            repository.insert(job(name)).expect("inserts");
        }
        let names: Vec<String> = repository
            .list()
            .expect("lists")
            .iter()
            .map(|job| job.original_filename().to_string())
            .collect();
        assert_eq!(names, ["a.csv", "b.csv", "c.csv"]);
    }

    #[test]
    fn apply_mutates_in_place_and_returns_copy() {
        let repository = InMemoryJobRepository::new();
        let stored = repository.insert(job("a.csv")).expect("inserts");
        let updated = repository
            .apply(stored.id(), &mut |job| job.set_status(JobStatus::Validated))
            .expect("applies");
        assert_eq!(updated.status(), JobStatus::Validated);
        let fetched = repository.fetch(stored.id()).expect("fetches").expect("present");
        assert_eq!(fetched.status(), JobStatus::Validated);

        let missing = JobId::from("missing");
        assert_eq!(
            repository.apply(&missing, &mut |_| {}),
            Err(RepositoryError::NotFound(missing.clone()))
        );
    }
}
