//! Queue-fed worker loop
//!
//! Moves submission ids from the shared queue into the scheduler until a
//! shutdown is requested. A pop in progress is always allowed to finish, so
//! an id taken off the queue is either scheduled or pushed back.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::core::JudgeError;
use crate::scheduler::JudgeScheduler;
use crate::store::SubmissionQueue;

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Longest single wait on the queue; bounds how late shutdown is noticed
    pub poll_timeout: Duration,
    /// Scheduling attempts before an id is returned to the queue
    pub enqueue_attempts: u32,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(5),
            enqueue_attempts: 8,
        }
    }
}

/// Run until `shutdown` turns true. The scheduler is left running.
pub async fn run(
    queue: &dyn SubmissionQueue,
    scheduler: &JudgeScheduler,
    options: &WorkerOptions,
    shutdown: &watch::Receiver<bool>,
) {
    info!("Waiting for jobs...");

    while !*shutdown.borrow() {
        let Some(submission_id) = queue.pop_submission_id(options.poll_timeout).await else {
            continue;
        };

        info!("Received judge job: submission_id={}", submission_id);

        match scheduler
            .enqueue_with_backoff(submission_id, options.enqueue_attempts)
            .await
        {
            Ok(_) => {}
            Err(JudgeError::QueueFull(id)) => {
                warn!("Judge queue still full, requeueing submission {}", id);
                requeue(queue, id).await;
            }
            Err(e) => {
                error!("Failed to schedule submission {}: {}", submission_id, e);
                requeue(queue, submission_id).await;
                break;
            }
        }
    }

    info!("Worker loop stopped");
}

async fn requeue(queue: &dyn SubmissionQueue, submission_id: i64) {
    if let Err(e) = queue.push_submission_id(submission_id).await {
        error!("Failed to requeue submission {}: {}", submission_id, e);
    }
}
