//! In-memory job registry
//!
//! Owns every analysis job for the life of the process. All reads return
//! copies, so a caller never observes a partially applied update. Each job
//! carries a watch channel that is refreshed on every mutation; progress
//! streams subscribe to it instead of polling the map.
//!
//! The map sits behind a `std::sync::Mutex` rather than an async lock: the
//! job finalizer runs from `Drop`, where awaiting is not possible, and no
//! critical section here does I/O.

use chipnote_common::{JobId, JobSnapshot};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::models::{AnalysisResult, Job, TransitionError};

/// Registry operation errors
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Job already exists: {0}")]
    AlreadyExists(JobId),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("Job {0} has not finished")]
    NotTerminal(JobId),

    #[error("Job {0} still has a running task")]
    TaskStillRunning(JobId),
}

/// Diagnostic view of one registry entry
#[derive(Debug, Clone, Serialize)]
pub struct JobDebugInfo {
    pub job_id: JobId,
    #[serde(flatten)]
    pub snapshot: JobSnapshot,
    pub has_result: bool,
    pub has_task: bool,
    pub task_finished: bool,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Outcome of a cleanup sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupReport {
    pub cleaned: usize,
    pub remaining: usize,
}

struct JobEntry {
    job: Job,
    watch_tx: watch::Sender<JobSnapshot>,
    task: Option<JoinHandle<()>>,
}

impl JobEntry {
    fn new(job: Job) -> Self {
        let (watch_tx, _) = watch::channel(job.snapshot());
        Self {
            job,
            watch_tx,
            task: None,
        }
    }

    fn task_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

/// Shared job table
#[derive(Clone, Default)]
pub struct JobRegistry {
    inner: Arc<Mutex<HashMap<JobId, JobEntry>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, JobEntry>> {
        // A panic while holding the lock cannot leave a job half-written:
        // every mutation validates before assigning.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new `Starting` job for `filename`
    pub fn create(&self, filename: impl Into<String>) -> JobId {
        let job = Job::new(JobId::new(), filename);
        let id = job.id;
        self.lock().insert(id, JobEntry::new(job));
        debug!(job_id = %id, "Job created");
        id
    }

    /// Register a job built by the caller
    pub fn insert(&self, job: Job) -> Result<(), RegistryError> {
        let mut jobs = self.lock();
        if jobs.contains_key(&job.id) {
            return Err(RegistryError::AlreadyExists(job.id));
        }
        jobs.insert(job.id, JobEntry::new(job));
        Ok(())
    }

    /// Record stage progress; moves a `Starting` job to `Running`
    pub fn update_progress(
        &self,
        id: JobId,
        stage: u8,
        message: impl Into<String>,
        progress: f64,
        debug: Option<String>,
    ) -> Result<JobSnapshot, RegistryError> {
        let message = message.into();
        self.mutate(id, |job| job.record_progress(stage, message, progress, debug))
    }

    /// Mark a job completed and store its result
    pub fn complete(&self, id: JobId, result: AnalysisResult) -> Result<JobSnapshot, RegistryError> {
        let result = Arc::new(result);
        let snapshot = self.mutate(id, |job| job.complete(result))?;
        info!(job_id = %id, status_message = %snapshot.message, "Job completed");
        Ok(snapshot)
    }

    /// Mark a job failed
    pub fn fail(&self, id: JobId, message: impl Into<String>) -> Result<JobSnapshot, RegistryError> {
        let message = message.into();
        let snapshot = self.mutate(id, |job| job.fail(message))?;
        warn!(job_id = %id, status_message = %snapshot.message, "Job failed");
        Ok(snapshot)
    }

    /// Fail the job unless it already reached a terminal state
    ///
    /// Returns true if this call changed the status.
    pub fn fail_if_unfinished(&self, id: JobId, message: &str) -> bool {
        let mut jobs = self.lock();
        let Some(entry) = jobs.get_mut(&id) else {
            return false;
        };
        if entry.job.is_terminal() {
            return false;
        }
        if entry.job.fail(message).is_err() {
            return false;
        }
        entry.watch_tx.send_replace(entry.job.snapshot());
        warn!(job_id = %id, reason = message, "Job force-failed");
        true
    }

    /// Copy of the job record
    pub fn get(&self, id: JobId) -> Option<Job> {
        self.lock().get(&id).map(|e| e.job.clone())
    }

    pub fn snapshot(&self, id: JobId) -> Option<JobSnapshot> {
        self.lock().get(&id).map(|e| e.job.snapshot())
    }

    /// Snapshots of every job, oldest first
    pub fn list(&self) -> Vec<(JobId, JobSnapshot)> {
        self.debug_entries()
            .into_iter()
            .map(|info| (info.job_id, info.snapshot))
            .collect()
    }

    /// Diagnostic view of every job, oldest first
    pub fn debug_entries(&self) -> Vec<JobDebugInfo> {
        let mut entries: Vec<JobDebugInfo> = self
            .lock()
            .values()
            .map(|e| JobDebugInfo {
                job_id: e.job.id,
                snapshot: e.job.snapshot(),
                has_result: e.job.result.is_some(),
                has_task: e.task.is_some(),
                task_finished: e.task.as_ref().map_or(true, |t| t.is_finished()),
                created_at: e.job.created_at,
                finished_at: e.job.finished_at,
            })
            .collect();
        entries.sort_by_key(|info| info.created_at);
        entries
    }

    /// Jobs not yet terminal
    pub fn active_count(&self) -> usize {
        self.lock().values().filter(|e| !e.job.is_terminal()).count()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Watch channel carrying the job's latest snapshot
    pub fn subscribe(&self, id: JobId) -> Option<watch::Receiver<JobSnapshot>> {
        self.lock().get(&id).map(|e| e.watch_tx.subscribe())
    }

    /// Wait until the job reaches a terminal state
    pub async fn wait_until_terminal(&self, id: JobId) -> Result<JobSnapshot, RegistryError> {
        let mut rx = self.subscribe(id).ok_or(RegistryError::NotFound(id))?;
        let waited = rx.wait_for(|s| s.is_terminal()).await.map(|s| s.clone());
        match waited {
            Ok(snapshot) => Ok(snapshot),
            // Entry removed while waiting
            Err(_) => self.snapshot(id).ok_or(RegistryError::NotFound(id)),
        }
    }

    /// Associate the background task running this job
    pub fn attach_task(&self, id: JobId, handle: JoinHandle<()>) -> Result<(), RegistryError> {
        let mut jobs = self.lock();
        let entry = jobs.get_mut(&id).ok_or(RegistryError::NotFound(id))?;
        entry.task = Some(handle);
        Ok(())
    }

    /// Drop the task handle without aborting the task
    pub fn detach_task(&self, id: JobId) {
        if let Some(entry) = self.lock().get_mut(&id) {
            entry.task = None;
        }
    }

    /// Take the task handle, leaving none attached
    pub fn take_task(&self, id: JobId) -> Option<JoinHandle<()>> {
        self.lock().get_mut(&id).and_then(|e| e.task.take())
    }

    /// Abort the job's task if one is attached and still running
    pub fn abort(&self, id: JobId) -> bool {
        let abort_handle = self
            .lock()
            .get(&id)
            .and_then(|e| e.task.as_ref())
            .filter(|t| !t.is_finished())
            .map(|t| t.abort_handle());

        // Abort outside the lock; the task's finalizer takes it again
        match abort_handle {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Wait for the job's task (if any) and its terminal state
    pub async fn join(&self, id: JobId) -> Result<JobSnapshot, RegistryError> {
        if let Some(task) = self.take_task(id) {
            if let Err(e) = task.await {
                debug!(job_id = %id, error = %e, "Job task ended abnormally");
            }
        }
        self.wait_until_terminal(id).await
    }

    /// Remove one finished job
    pub fn remove(&self, id: JobId) -> Result<Job, RegistryError> {
        let mut jobs = self.lock();
        let entry = jobs.get(&id).ok_or(RegistryError::NotFound(id))?;
        if !entry.job.is_terminal() {
            return Err(RegistryError::NotTerminal(id));
        }
        if entry.task_running() {
            return Err(RegistryError::TaskStillRunning(id));
        }
        jobs.remove(&id)
            .map(|e| e.job)
            .ok_or(RegistryError::NotFound(id))
    }

    /// Remove every terminal job whose task has finished
    pub fn cleanup_finished(&self) -> CleanupReport {
        let mut jobs = self.lock();
        let before = jobs.len();
        jobs.retain(|_, entry| !entry.job.is_terminal() || entry.task_running());
        let report = CleanupReport {
            cleaned: before - jobs.len(),
            remaining: jobs.len(),
        };
        info!(
            cleaned = report.cleaned,
            remaining = report.remaining,
            "Cleaned up finished jobs"
        );
        report
    }

    fn mutate<F>(&self, id: JobId, apply: F) -> Result<JobSnapshot, RegistryError>
    where
        F: FnOnce(&mut Job) -> Result<(), TransitionError>,
    {
        let mut jobs = self.lock();
        let entry = jobs.get_mut(&id).ok_or(RegistryError::NotFound(id))?;
        apply(&mut entry.job)?;
        let snapshot = entry.job.snapshot();
        entry.watch_tx.send_replace(snapshot.clone());
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chipnote_common::JobStatus;
    use std::time::Duration;

    #[test]
    fn test_create_registers_starting_job() {
        let registry = JobRegistry::new();
        let id = registry.create("theme.wav");

        let snapshot = registry.snapshot(id).unwrap();
        assert_eq!(snapshot.status, JobStatus::Starting);
        assert_eq!(snapshot.filename, "theme.wav");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_insert_rejects_duplicate_id() {
        let registry = JobRegistry::new();
        let job = Job::new(JobId::new(), "a.wav");
        registry.insert(job.clone()).unwrap();
        assert!(matches!(
            registry.insert(job),
            Err(RegistryError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_unknown_job_is_not_found() {
        let registry = JobRegistry::new();
        let id = JobId::new();
        assert!(registry.get(id).is_none());
        assert!(registry.subscribe(id).is_none());
        assert!(matches!(
            registry.update_progress(id, 1, "x", 10.0, None),
            Err(RegistryError::NotFound(_))
        ));
    }

    #[test]
    fn test_lifecycle_to_completed() {
        let registry = JobRegistry::new();
        let id = registry.create("a.wav");

        registry.update_progress(id, 1, "Loading audio file", 10.0, None).unwrap();
        let snapshot = registry
            .complete(id, AnalysisResult::empty_for_tests())
            .unwrap();

        assert_eq!(snapshot.status, JobStatus::Completed);
        assert_eq!(snapshot.progress, 100.0);
        assert!(registry.get(id).unwrap().result.is_some());
    }

    #[test]
    fn test_terminal_job_is_not_overwritten() {
        let registry = JobRegistry::new();
        let id = registry.create("a.wav");
        registry.fail(id, "Analysis failed: bad header").unwrap();

        assert!(matches!(
            registry.update_progress(id, 2, "late", 30.0, None),
            Err(RegistryError::Transition(_))
        ));
        assert!(!registry.fail_if_unfinished(id, "Analysis terminated unexpectedly"));
        assert_eq!(registry.snapshot(id).unwrap().message, "Analysis failed: bad header");
    }

    #[test]
    fn test_subscriber_sees_every_mutation() {
        let registry = JobRegistry::new();
        let id = registry.create("a.wav");
        let mut rx = registry.subscribe(id).unwrap();

        registry.update_progress(id, 2, "Separating audio stems", 25.0, None).unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().stage, 2);

        registry.fail_if_unfinished(id, "Analysis terminated unexpectedly");
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().status, JobStatus::Failed);
    }

    #[test]
    fn test_list_is_ordered_by_creation() {
        let registry = JobRegistry::new();
        let first = registry.create("1.wav");
        std::thread::sleep(Duration::from_millis(2));
        let second = registry.create("2.wav");

        let ids: Vec<JobId> = registry.list().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![first, second]);
    }

    #[test]
    fn test_remove_requires_terminal() {
        let registry = JobRegistry::new();
        let id = registry.create("a.wav");
        assert!(matches!(registry.remove(id), Err(RegistryError::NotTerminal(_))));

        registry.fail(id, "Analysis failed: x").unwrap();
        assert_eq!(registry.remove(id).unwrap().id, id);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_skips_active_jobs() {
        let registry = JobRegistry::new();

        let running = registry.create("running.wav");
        registry.update_progress(running, 1, "Loading", 10.0, None).unwrap();

        let failed = registry.create("failed.wav");
        registry.fail(failed, "Analysis failed: x").unwrap();

        // Terminal, but its task has not returned yet
        let lingering = registry.create("lingering.wav");
        registry.fail(lingering, "Analysis failed: y").unwrap();
        let gate = Arc::new(tokio::sync::Notify::new());
        let waiter = gate.clone();
        registry
            .attach_task(lingering, tokio::spawn(async move { waiter.notified().await }))
            .unwrap();
        assert!(matches!(
            registry.remove(lingering),
            Err(RegistryError::TaskStillRunning(_))
        ));

        let report = registry.cleanup_finished();
        assert_eq!(report, CleanupReport { cleaned: 1, remaining: 2 });
        assert!(registry.get(failed).is_none());

        gate.notify_one();
        registry.take_task(lingering).unwrap().await.unwrap();
        let report = registry.cleanup_finished();
        assert_eq!(report, CleanupReport { cleaned: 1, remaining: 1 });
        assert!(registry.get(running).is_some());
    }

    #[tokio::test]
    async fn test_wait_until_terminal() {
        let registry = JobRegistry::new();
        let id = registry.create("a.wav");

        let worker = registry.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            worker.update_progress(id, 1, "Loading", 10.0, None).unwrap();
            worker.fail(id, "Analysis failed: late").unwrap();
        });

        let snapshot = tokio::time::timeout(Duration::from_secs(2), registry.wait_until_terminal(id))
            .await
            .expect("job never finished")
            .unwrap();
        assert_eq!(snapshot.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_concurrent_updates_on_distinct_jobs() {
        let registry = JobRegistry::new();
        let ids: Vec<JobId> = (0..16).map(|i| registry.create(format!("{i}.wav"))).collect();

        let mut handles = Vec::new();
        for &id in &ids {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                for step in 1..=50u32 {
                    registry
                        .update_progress(id, 4, "Detecting pitch and notes", step as f64, None)
                        .unwrap();
                    tokio::task::yield_now().await;
                }
                registry.complete(id, AnalysisResult::empty_for_tests()).unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        for id in ids {
            let snapshot = registry.snapshot(id).unwrap();
            assert_eq!(snapshot.status, JobStatus::Completed);
            assert_eq!(snapshot.progress, 100.0);
        }
    }
}
