//! Job progress wire types
//!
//! These are the payloads emitted by the analyzer's poll and stream
//! endpoints. The field names match what the sequencer frontend reads.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Number of pipeline stages reported in every snapshot
pub const TOTAL_STAGES: u8 = 7;

/// Opaque job identifier handed to clients on submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Generate a fresh random id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for JobId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Job lifecycle status
///
/// Ordered: a job only ever moves forward through
/// `Starting` → `Running` → (`Completed` | `Failed`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Job created, background work not yet reporting
    Starting,
    /// Pipeline is executing stages
    Running,
    /// Pipeline produced a result
    Completed,
    /// Pipeline stopped with an error
    Failed,
}

impl JobStatus {
    /// Completed or Failed
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether moving from `self` to `next` is a legal lifecycle step
    ///
    /// `Starting → Failed` is allowed so a job whose task dies before its
    /// first progress report can still be finalized.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Starting, JobStatus::Running) => true,
            (JobStatus::Starting, JobStatus::Failed) => true,
            (JobStatus::Running, JobStatus::Running) => true,
            (JobStatus::Running, JobStatus::Completed) => true,
            (JobStatus::Running, JobStatus::Failed) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Starting => "starting",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a job, as sent to poll and stream clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    /// Current stage number (0 = not started, 1..=7 pipeline stages)
    pub stage: u8,
    /// Always [`TOTAL_STAGES`]
    pub total_stages: u8,
    /// Human readable stage message
    pub message: String,
    /// Percent complete (0 - 100)
    pub progress: f64,
    pub status: JobStatus,
    /// Name of the uploaded file
    pub filename: String,
    /// Diagnostic detail for the current stage
    pub debug: String,
}

impl JobSnapshot {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
