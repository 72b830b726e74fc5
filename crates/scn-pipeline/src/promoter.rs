//! Fixed-tick promotion of due scheduled entries.
//!
//! Worst-case scheduling latency is one tick interval; that imprecision is
//! accepted and bounded by configuration.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::queue::JobQueue;

pub struct QueuePromoter {
    queue: Arc<JobQueue>,
    tick: Duration,
}

impl QueuePromoter {
    pub fn new(queue: Arc<JobQueue>, tick: Duration) -> Self {
        Self { queue, tick }
    }

    /// Tick loop; exits when the shutdown signal flips. The first tick fires
    /// immediately, so entries already past due at startup promote right
    /// away rather than waiting a full interval.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(tick_secs = self.tick.as_secs(), "queue promoter started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let promoted = self.queue.promote_due(Utc::now()).await;
                    if !promoted.is_empty() {
                        debug!(count = promoted.len(), "promoted due jobs");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("queue promoter stopping");
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use scn_core::{Job, ScheduledEntry};
    use uuid::Uuid;

    #[tokio::test]
    async fn past_due_entry_promotes_on_the_first_tick() {
        let queue = Arc::new(JobQueue::new());
        let entry = ScheduledEntry::new(
            Job::scheduled(Uuid::new_v4(), "https://example.com/"),
            Utc::now() - ChronoDuration::days(1),
        );
        queue.schedule(entry).await.unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let promoter = QueuePromoter::new(queue.clone(), Duration::from_millis(10));
        let handle = tokio::spawn(promoter.run(shutdown_rx));

        let job = tokio::time::timeout(Duration::from_secs(1), queue.pop())
            .await
            .expect("promotion within a tick");
        assert!(job.is_scheduled);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("promoter stops on shutdown")
            .unwrap();
    }

    #[tokio::test]
    async fn future_entries_stay_scheduled_across_ticks() {
        let queue = Arc::new(JobQueue::new());
        let entry = ScheduledEntry::new(
            Job::scheduled(Uuid::new_v4(), "https://example.com/"),
            Utc::now() + ChronoDuration::hours(1),
        );
        queue.schedule(entry).await.unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let promoter = QueuePromoter::new(queue.clone(), Duration::from_millis(5));
        let handle = tokio::spawn(promoter.run(shutdown_rx));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(queue.scheduled_len().await, 1);
        assert_eq!(queue.immediate_len().await, 0);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
