//! In-process job queue: a due-time ordered scheduled set plus an immediate
//! FIFO, guarded by one lock so promotion has no partial-state window.

use std::collections::{BTreeMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use scn_core::{Job, ScheduledEntry};
use thiserror::Error;
use tokio::sync::{Mutex, Notify};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum QueueError {
    /// The job id is already scheduled, queued, or in flight.
    #[error("job {0} is already tracked by the queue")]
    Duplicate(Uuid),
}

#[derive(Debug, Default)]
struct QueueInner {
    /// Ordered by (due epoch ms, job id); the id disambiguates equal scores.
    scheduled: BTreeMap<(i64, Uuid), ScheduledEntry>,
    immediate: VecDeque<Job>,
    in_flight: HashSet<Uuid>,
}

impl QueueInner {
    fn tracks(&self, job_id: Uuid) -> bool {
        self.in_flight.contains(&job_id)
            || self.immediate.iter().any(|j| j.id == job_id)
            || self.scheduled.keys().any(|(_, id)| *id == job_id)
    }
}

/// Invariant: a job id lives in at most one of {scheduled set, immediate
/// queue, in-flight set} at any time.
#[derive(Debug, Default)]
pub struct JobQueue {
    inner: Mutex<QueueInner>,
    ready: Notify,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a job until its due time. Rejects ids the queue already tracks.
    pub async fn schedule(&self, entry: ScheduledEntry) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        if inner.tracks(entry.job.id) {
            return Err(QueueError::Duplicate(entry.job.id));
        }
        debug!(job_id = %entry.job.id, due_at = %entry.due_at, "scheduled job");
        inner.scheduled.insert((entry.due_ms(), entry.job.id), entry);
        Ok(())
    }

    /// Push a job straight onto the immediate FIFO (ad hoc/manual runs).
    pub async fn enqueue_immediate(&self, job: Job) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        if inner.tracks(job.id) {
            return Err(QueueError::Duplicate(job.id));
        }
        inner.immediate.push_back(job);
        drop(inner);
        self.ready.notify_one();
        Ok(())
    }

    /// Move every entry with `due_at <= now` onto the immediate FIFO, in due
    /// order. Removal and push happen under the same lock, so a promoted job
    /// is never visible in both views and never dropped between them.
    pub async fn promote_due(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        let cutoff = now.timestamp_millis();
        let mut inner = self.inner.lock().await;

        let due_keys: Vec<(i64, Uuid)> = inner
            .scheduled
            .range(..=(cutoff, Uuid::max()))
            .map(|(k, _)| *k)
            .collect();

        let mut promoted = Vec::with_capacity(due_keys.len());
        for key in due_keys {
            if let Some(entry) = inner.scheduled.remove(&key) {
                promoted.push(entry.job.id);
                inner.immediate.push_back(entry.job);
            }
        }
        drop(inner);

        for _ in &promoted {
            self.ready.notify_one();
        }
        promoted
    }

    /// Pop the next immediate job, marking it in flight. Returns `None` when
    /// the FIFO is empty.
    pub async fn try_pop(&self) -> Option<Job> {
        let mut inner = self.inner.lock().await;
        let job = inner.immediate.pop_front()?;
        inner.in_flight.insert(job.id);
        Some(job)
    }

    /// Blocking pop for worker loops: waits until a job is available.
    pub async fn pop(&self) -> Job {
        loop {
            if let Some(job) = self.try_pop().await {
                return job;
            }
            self.ready.notified().await;
        }
    }

    /// Forget an in-flight job once its run reached a terminal state.
    pub async fn release(&self, job_id: Uuid) {
        self.inner.lock().await.in_flight.remove(&job_id);
    }

    pub async fn is_in_flight(&self, job_id: Uuid) -> bool {
        self.inner.lock().await.in_flight.contains(&job_id)
    }

    pub async fn scheduled_len(&self) -> usize {
        self.inner.lock().await.scheduled.len()
    }

    pub async fn immediate_len(&self) -> usize {
        self.inner.lock().await.immediate.len()
    }
}
