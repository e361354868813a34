//! Per-client progress streams
//!
//! A stream emits the job's current snapshot immediately, then again at a
//! fixed cadence until the job is terminal. A terminal status wakes the
//! stream early, so the final snapshot is delivered without waiting out the
//! interval. Exactly one terminal snapshot is emitted, after which the
//! stream ends. An unknown job yields a single not-found event.

use async_stream::stream;
use chipnote_common::{JobId, JobSnapshot};
use futures::Stream;
use std::time::Duration;
use tracing::debug;

use super::job_registry::JobRegistry;

/// Default snapshot cadence
pub const DEFAULT_STREAM_INTERVAL: Duration = Duration::from_millis(500);

/// One item of a progress stream
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Snapshot(JobSnapshot),
    /// Job id was never registered (or already cleaned up)
    NotFound(JobId),
}

impl ProgressEvent {
    /// Whether this event ends the stream
    pub fn is_final(&self) -> bool {
        match self {
            ProgressEvent::Snapshot(snapshot) => snapshot.is_terminal(),
            ProgressEvent::NotFound(_) => true,
        }
    }
}

/// Builds progress streams over the job registry
#[derive(Clone)]
pub struct ProgressStreamer {
    registry: JobRegistry,
    interval: Duration,
}

impl ProgressStreamer {
    pub fn new(registry: JobRegistry, interval: Duration) -> Self {
        Self { registry, interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Stream progress for one job
    ///
    /// Each call is independent; any number of clients may follow the same
    /// job. The stream holds no registry lock between items.
    pub fn stream(&self, id: JobId) -> impl Stream<Item = ProgressEvent> + Send + 'static {
        let registry = self.registry.clone();
        let interval = self.interval;

        stream! {
            let Some(mut rx) = registry.subscribe(id) else {
                debug!(job_id = %id, "Progress requested for unknown job");
                yield ProgressEvent::NotFound(id);
                return;
            };

            loop {
                let snapshot = rx.borrow_and_update().clone();
                let terminal = snapshot.is_terminal();
                yield ProgressEvent::Snapshot(snapshot);
                if terminal {
                    break;
                }

                let sender_gone = tokio::select! {
                    _ = tokio::time::sleep(interval) => false,
                    waited = rx.wait_for(|s| s.is_terminal()) => waited.is_err(),
                };

                if sender_gone {
                    // Job removed from the registry mid-stream
                    let last = rx.borrow().clone();
                    yield ProgressEvent::Snapshot(last);
                    break;
                }
            }

            debug!(job_id = %id, "Progress stream finished");
        }
    }
}
