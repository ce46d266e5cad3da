//! Background job queue with bounded concurrency
//!
//! Jobs are processed with at most `max_concurrent` running at once. Each
//! job receives a [`QueueHandle`] so it can requeue itself with a delay.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rand::Rng;
use tokio::sync::{Notify, Semaphore, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Configuration for a job queue
#[derive(Debug, Clone)]
pub struct JobQueueConfig {
    /// Maximum concurrent jobs
    pub max_concurrent: usize,
    /// Queue capacity (pending jobs)
    pub queue_capacity: usize,
}

impl Default for JobQueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            queue_capacity: 1000,
        }
    }
}

/// A queued job
pub struct Job<T> {
    pub id: Uuid,
    pub payload: T,
}

impl<T> Job<T> {
    pub fn new(payload: T) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
        }
    }
}

/// Error returned when the queue is no longer running
#[derive(Debug, thiserror::Error)]
#[error("work queue '{0}' is closed")]
pub struct QueueClosed(pub String);

#[derive(Default)]
struct Tracker {
    outstanding: AtomicUsize,
    idle: Notify,
}

impl Tracker {
    fn start(&self) {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
    }

    fn finish(&self) {
        if self.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Submission side of a [`WorkQueue`]
pub struct QueueHandle<T> {
    sender: mpsc::Sender<Job<T>>,
    tracker: Arc<Tracker>,
    name: Arc<str>,
}

impl<T> Clone for QueueHandle<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            tracker: self.tracker.clone(),
            name: self.name.clone(),
        }
    }
}

impl<T: Send + 'static> QueueHandle<T> {
    /// Submit a job to the queue
    pub async fn submit(&self, payload: T) -> Result<Uuid, QueueClosed> {
        let job = Job::new(payload);
        let id = job.id;
        self.tracker.start();
        if self.sender.send(job).await.is_err() {
            self.tracker.finish();
            return Err(QueueClosed(self.name.to_string()));
        }
        debug!(queue = %self.name, job_id = %id, "Job submitted");
        Ok(id)
    }

    /// Submit a job once `delay` has elapsed. The job counts as outstanding
    /// while it waits.
    pub fn submit_after(&self, payload: T, delay: Duration) -> Uuid {
        let job = Job::new(payload);
        let id = job.id;
        self.tracker.start();
        debug!(
            queue = %self.name,
            job_id = %id,
            delay_secs = delay.as_secs(),
            "Job scheduled"
        );

        let handle = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if handle.sender.send(job).await.is_err() {
                warn!(queue = %handle.name, job_id = %id, "Queue closed before delayed job ran");
                handle.tracker.finish();
            }
        });
        id
    }

    /// Jobs submitted or scheduled and not yet finished
    pub fn outstanding(&self) -> usize {
        self.tracker.outstanding.load(Ordering::SeqCst)
    }

    /// Wait until no job is queued, scheduled or running
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.tracker.idle.notified();
            if self.outstanding() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// A bounded work queue that processes jobs with limited concurrency
pub struct WorkQueue<T> {
    handle: QueueHandle<T>,
    semaphore: Arc<Semaphore>,
    config: JobQueueConfig,
}

impl<T: Send + 'static> WorkQueue<T> {
    /// Create a new work queue with a processor function
    pub fn new<F, Fut>(name: &str, config: JobQueueConfig, processor: F) -> Self
    where
        F: Fn(T, QueueHandle<T>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let (sender, mut receiver) = mpsc::channel::<Job<T>>(config.queue_capacity.max(1));
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        let handle = QueueHandle {
            sender,
            tracker: Arc::new(Tracker::default()),
            name: Arc::from(name),
        };

        let sem_clone = semaphore.clone();
        let processor = Arc::new(processor);
        let loop_handle = handle.clone();

        tokio::spawn(async move {
            info!(queue = %loop_handle.name, "Work queue started");

            while let Some(job) = receiver.recv().await {
                let Ok(permit) = sem_clone.clone().acquire_owned().await else {
                    break;
                };
                let proc = processor.clone();
                let handle = loop_handle.clone();

                tokio::spawn(async move {
                    let _permit = permit;
                    debug!(queue = %handle.name, job_id = %job.id, "Processing job");

                    proc(job.payload, handle.clone()).await;

                    debug!(queue = %handle.name, job_id = %job.id, "Job completed");
                    handle.tracker.finish();
                });
            }

            info!(queue = %loop_handle.name, "Work queue stopped");
        });

        Self {
            handle,
            semaphore,
            config,
        }
    }

    pub fn handle(&self) -> QueueHandle<T> {
        self.handle.clone()
    }

    pub async fn submit(&self, payload: T) -> Result<Uuid, QueueClosed> {
        self.handle.submit(payload).await
    }

    pub fn submit_after(&self, payload: T, delay: Duration) -> Uuid {
        self.handle.submit_after(payload, delay)
    }

    pub async fn wait_idle(&self) {
        self.handle.wait_idle().await
    }

    /// Get current queue statistics
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            max_concurrent: self.config.max_concurrent,
            available_permits: self.semaphore.available_permits(),
            queue_capacity: self.config.queue_capacity,
            outstanding: self.handle.outstanding(),
        }
    }
}

/// Queue statistics
#[derive(Debug, Clone)]
pub struct QueueStats {
    pub max_concurrent: usize,
    pub available_permits: usize,
    pub queue_capacity: usize,
    pub outstanding: usize,
}

/// Randomized delay before retrying work that could not get its lease
#[derive(Debug, Clone)]
pub struct RequeuePolicy {
    pub min_delay: Duration,
    pub max_delay: Duration,
    /// Attempts, the first one included, before the job is abandoned
    pub max_attempts: u32,
}

impl Default for RequeuePolicy {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_secs(45 * 60),
            max_delay: Duration::from_secs(75 * 60),
            max_attempts: 10,
        }
    }
}

impl RequeuePolicy {
    /// Uniformly jittered delay in `[min_delay, max_delay]`
    pub fn delay(&self) -> Duration {
        let min = self.min_delay.as_millis() as u64;
        let max = (self.max_delay.as_millis() as u64).max(min);
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }

    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn test_queue_limits_concurrency() {
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let queue = {
            let inside = inside.clone();
            let max_seen = max_seen.clone();
            WorkQueue::new(
                "test",
                JobQueueConfig {
                    max_concurrent: 3,
                    queue_capacity: 100,
                },
                move |_: u32, _| {
                    let inside = inside.clone();
                    let max_seen = max_seen.clone();
                    async move {
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                },
            )
        };

        for i in 0..10 {
            queue.submit(i).await.unwrap();
        }
        queue.wait_idle().await;

        assert!(max_seen.load(Ordering::SeqCst) <= 3);
        assert_eq!(queue.stats().outstanding, 0);
    }

    #[tokio::test]
    async fn test_job_can_requeue_itself() {
        let runs = Arc::new(AtomicU32::new(0));
        let queue = {
            let runs = runs.clone();
            WorkQueue::new("requeue", JobQueueConfig::default(), move |attempt: u32, handle| {
                let runs = runs.clone();
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    if attempt < 3 {
                        handle.submit_after(attempt + 1, Duration::from_millis(5));
                    }
                }
            })
        };

        queue.submit(1).await.unwrap();
        queue.wait_idle().await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_wait_idle_on_empty_queue_returns() {
        let queue = WorkQueue::new("empty", JobQueueConfig::default(), |_: (), _| async {});
        queue.wait_idle().await;
    }

    #[test]
    fn test_requeue_delay_within_bounds() {
        let policy = RequeuePolicy {
            min_delay: Duration::from_secs(45 * 60),
            max_delay: Duration::from_secs(75 * 60),
            max_attempts: 3,
        };
        for _ in 0..100 {
            let d = policy.delay();
            assert!(d >= policy.min_delay && d <= policy.max_delay, "{d:?}");
        }
        assert!(policy.allows_retry(2));
        assert!(!policy.allows_retry(3));
    }

    #[test]
    fn test_requeue_delay_degenerate_range() {
        let policy = RequeuePolicy {
            min_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(1),
            max_attempts: 1,
        };
        assert_eq!(policy.delay(), Duration::from_secs(10));
    }
}
