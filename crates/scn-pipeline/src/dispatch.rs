//! Job delivery with idempotent semantics.
//!
//! The transport is at-least-once (redelivery can happen after promotion or
//! over HTTP), so the job id is the idempotency key: a job whose id is
//! already in flight, or whose run has already progressed, is dropped.

use std::sync::Arc;

use scn_core::Job;
use scn_storage::StoreError;
use tokio::sync::watch;
use tracing::{error, info};
use uuid::Uuid;

use crate::context::PipelineContext;
use crate::queue::QueueError;
use crate::run::{RunExecutor, RunOutcome};

#[derive(Debug)]
pub enum DispatchOutcome {
    /// The job was accepted onto the immediate queue.
    Accepted(Uuid),
    /// The job id is already scheduled, queued, or in flight.
    DuplicateJob(Uuid),
}

pub struct Dispatcher {
    ctx: PipelineContext,
    executor: RunExecutor,
}

impl Dispatcher {
    pub fn new(ctx: PipelineContext) -> Self {
        let executor = RunExecutor::new(ctx.clone());
        Self { ctx, executor }
    }

    /// Entry point for push transports (HTTP POST /jobs). Deduplicates by
    /// job id and hands the job to the worker loop via the immediate queue.
    pub async fn submit(&self, job: Job) -> DispatchOutcome {
        let id = job.id;
        match self.ctx.queue.enqueue_immediate(job).await {
            Ok(()) => DispatchOutcome::Accepted(id),
            Err(QueueError::Duplicate(_)) => {
                info!(job_id = %id, "dropping duplicate job submission");
                DispatchOutcome::DuplicateJob(id)
            }
        }
    }

    /// Exactly one delivery attempt for a popped job: run it to a terminal
    /// state, then release the in-flight marker.
    pub async fn deliver(&self, job: Job) -> Result<RunOutcome, StoreError> {
        let outcome = self.executor.execute(&job).await;
        self.ctx.queue.release(job.id).await;
        outcome
    }

    /// Worker loop: blocking-pop the immediate queue and deliver each job.
    /// Store errors on a single job are logged; the loop keeps serving.
    pub async fn run_worker(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("dispatch worker started");
        loop {
            tokio::select! {
                job = self.ctx.queue.pop() => {
                    let job_id = job.id;
                    match self.deliver(job).await {
                        Ok(RunOutcome::Completed(run)) => {
                            info!(job_id = %job_id, run_id = %run.id, status = %run.status, "job delivered");
                        }
                        Ok(RunOutcome::Duplicate(run_id)) => {
                            info!(job_id = %job_id, run_id = %run_id, "redelivery dropped");
                        }
                        Err(err) => {
                            error!(job_id = %job_id, error = %err, "job delivery failed");
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("dispatch worker stopping");
                        return;
                    }
                }
            }
        }
    }
}
