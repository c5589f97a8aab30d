//! Bounded job queue and worker pool
//!
//! Jobs are fire-and-forget: the coordinator pushes [`IngestionJob`]s into a
//! bounded channel and a dispatcher runs them on a [`JoinSet`], holding at
//! most `worker_count` semaphore permits at a time. A task waiting out a
//! retry delay gives its permit back.
//!
//! A terminal state is written with bounded backoff. A task whose final
//! state still cannot be written stays unfinished in the store, so
//! [`resume_unfinished`] runs it again, and [`WorkerPool::join`] reports it.

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use super::retry::{RetryDecision, RetryPolicy};
use super::state::TaskStateStore;
use super::types::{FailureReason, IngestionJob, TaskContext, TaskOutcome, TaskState};
use super::worker::TaskExecutor;
use crate::error::{IngestError, IngestResult};
use crate::ingest::IngestConfig;

/// Writes of a terminal state before the task is left for resume
const TERMINAL_RECORD_ATTEMPTS: u32 = 5;

/// First backoff between terminal writes; doubles each time
const TERMINAL_RECORD_BACKOFF: Duration = Duration::from_millis(50);

/// Sending side of the job queue
#[derive(Clone)]
pub struct TaskQueue {
    sender: mpsc::Sender<IngestionJob>,
}

impl TaskQueue {
    /// Enqueue a job, waiting while the queue is full
    pub async fn enqueue(&self, job: IngestionJob) -> IngestResult<()> {
        self.sender.send(job).await.map_err(|_| IngestError::QueueClosed)
    }
}

struct Worker {
    executor: Arc<TaskExecutor>,
    store: Arc<dyn TaskStateStore>,
    policy: RetryPolicy,
    permits: Arc<Semaphore>,
    unrecorded: Arc<AtomicUsize>,
}

/// Handle on the running dispatcher
pub struct WorkerPool {
    dispatcher: JoinHandle<()>,
    unrecorded: Arc<AtomicUsize>,
}

impl WorkerPool {
    /// Spawn the dispatcher and return the queue feeding it
    pub fn start(
        executor: Arc<TaskExecutor>,
        store: Arc<dyn TaskStateStore>,
        config: &IngestConfig,
    ) -> (TaskQueue, WorkerPool) {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let unrecorded = Arc::new(AtomicUsize::new(0));
        let worker = Arc::new(Worker {
            executor,
            store,
            policy: RetryPolicy::from_config(config),
            permits: Arc::new(Semaphore::new(config.worker_count.max(1))),
            unrecorded: Arc::clone(&unrecorded),
        });

        info!(
            workers = config.worker_count,
            queue_capacity = config.queue_capacity,
            max_attempts = worker.policy.max_attempts,
            "Worker pool started"
        );

        let dispatcher = tokio::spawn(dispatch(receiver, worker));
        (TaskQueue { sender }, WorkerPool { dispatcher, unrecorded })
    }

    /// Wait until every queue handle is dropped and all jobs have finished
    ///
    /// Fails with [`IngestError::UnrecordedTasks`] when some task finished
    /// but its final state could not be written.
    pub async fn join(self) -> IngestResult<()> {
        self.dispatcher.await?;

        match self.unrecorded.load(Ordering::SeqCst) {
            0 => Ok(()),
            n => Err(IngestError::UnrecordedTasks(n)),
        }
    }
}

/// Re-enqueue every task the store still lists as unfinished
///
/// Used after a restart. Executors are idempotent, so a task that was
/// mid-flight when the process died is safely run again.
pub async fn resume_unfinished(queue: &TaskQueue, store: &dyn TaskStateStore) -> IngestResult<usize> {
    let jobs = store.unfinished_jobs().await?;
    let count = jobs.len();

    for job in jobs {
        debug!(task_id = %job.task_id, group_id = %job.group_id, "Re-enqueueing task");
        queue.enqueue(job).await?;
    }

    info!(count, "Resumed unfinished tasks");
    Ok(count)
}

async fn dispatch(mut receiver: mpsc::Receiver<IngestionJob>, worker: Arc<Worker>) {
    let mut running = JoinSet::new();

    while let Some(job) = receiver.recv().await {
        let Ok(permit) = Arc::clone(&worker.permits).acquire_owned().await else {
            error!("Worker semaphore closed; dropping remaining jobs");
            break;
        };

        let worker = Arc::clone(&worker);
        running.spawn(async move { worker.run_job(job, permit).await });

        while let Some(finished) = running.try_join_next() {
            log_join(finished);
        }
    }

    while let Some(finished) = running.join_next().await {
        log_join(finished);
    }
    debug!("Dispatcher stopped");
}

fn log_join(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        error!(error = %e, "Worker task aborted");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

impl Worker {
    async fn run_job(&self, job: IngestionJob, permit: OwnedSemaphorePermit) {
        let mut permit = Some(permit);
        let mut attempt = 1;

        loop {
            if permit.is_none() {
                match Arc::clone(&self.permits).acquire_owned().await {
                    Ok(p) => permit = Some(p),
                    Err(_) => {
                        let reason = FailureReason::Infrastructure {
                            message: "worker pool shut down".to_string(),
                        };
                        self.record_terminal(&job, TaskState::Failed { reason }).await;
                        return;
                    },
                }
            }

            let ctx = TaskContext::new(&job, attempt);
            self.record(&job, TaskState::Running { attempt }).await;

            let result = AssertUnwindSafe(self.executor.execute(&job, &ctx))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| {
                    Err(IngestError::Internal(format!(
                        "executor panicked: {}",
                        panic_message(payload.as_ref())
                    )))
                });

            match self.policy.decide(attempt, job.gallery_id, result) {
                RetryDecision::Retry { next_attempt, delay } => {
                    info!(
                        parent: &ctx.span,
                        gallery_id = job.gallery_id,
                        next_attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Gallery not committed yet, retrying"
                    );
                    self.record(&job, TaskOutcome::Retrying(next_attempt).into()).await;

                    permit = None;
                    tokio::time::sleep(delay).await;
                    attempt = next_attempt;
                },
                RetryDecision::Finish(outcome) => {
                    match &outcome {
                        TaskOutcome::Failed(reason) => {
                            error!(parent: &ctx.span, source_key = %job.source_key, %reason, "Task failed")
                        },
                        other => debug!(parent: &ctx.span, outcome = ?other, "Task finished"),
                    }
                    self.record_terminal(&job, outcome.into()).await;
                    return;
                },
            }
        }
    }

    async fn record(&self, job: &IngestionJob, state: TaskState) {
        match self.store.record_state(job.task_id, &state).await {
            Ok(true) => {},
            Ok(false) => {
                warn!(task_id = %job.task_id, state = state.kind(), "Task already finished; state not recorded")
            },
            Err(e) => {
                error!(task_id = %job.task_id, state = state.kind(), error = %e, "Failed to record task state")
            },
        }
    }

    /// Write a terminal state, backing off between failed writes
    async fn record_terminal(&self, job: &IngestionJob, state: TaskState) {
        let mut delay = TERMINAL_RECORD_BACKOFF;

        for attempt in 1..=TERMINAL_RECORD_ATTEMPTS {
            match self.store.record_state(job.task_id, &state).await {
                Ok(true) => return,
                Ok(false) => {
                    warn!(task_id = %job.task_id, state = state.kind(), "Task already finished; state not recorded");
                    return;
                },
                Err(e) if attempt < TERMINAL_RECORD_ATTEMPTS => {
                    warn!(
                        task_id = %job.task_id,
                        state = state.kind(),
                        attempt,
                        error = %e,
                        "Failed to record final task state, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                },
                Err(e) => {
                    error!(
                        task_id = %job.task_id,
                        state = state.kind(),
                        error = %e,
                        "Could not record final task state; task is left for resume"
                    );
                    self.unrecorded.fetch_add(1, Ordering::SeqCst);
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");

        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");

        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
