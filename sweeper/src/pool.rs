//! Resolution Pool
//!
//! Fixed-width worker pool for metric queries.
//!
//! The pool is an explicitly constructed resource: whoever builds it owns its
//! lifetime and shuts it down. Jobs are queued in submission order and each
//! worker runs one job at a time, so no more than `width` store queries are
//! outstanding at once no matter how many levels are alive.

use crate::error::{Error, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How long shutdown waits for each worker to finish its current job
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

type Job = BoxFuture<'static, ()>;

/// Shared state for the resolution pool
struct SharedPoolState {
    /// Queue of submitted jobs, shared by all workers
    queue: Mutex<mpsc::UnboundedReceiver<Job>>,

    /// Stop signal for shutdown
    stop: CancellationToken,

    /// Jobs submitted but not yet picked up
    queued: AtomicUsize,

    /// Jobs currently running on a worker
    active: AtomicUsize,
}

/// Fixed-width metric resolution pool
pub struct ResolutionPool {
    /// Shared state between workers
    state: Arc<SharedPoolState>,

    /// Job submission side of the queue
    sender: mpsc::UnboundedSender<Job>,

    /// Worker task handles, taken on shutdown
    workers: StdMutex<Vec<JoinHandle<()>>>,

    width: usize,
}

impl ResolutionPool {
    /// Start a pool with `width` workers on the current Tokio runtime
    pub fn new(width: usize) -> Self {
        let width = width.max(1);
        let (sender, receiver) = mpsc::unbounded_channel();
        let state = Arc::new(SharedPoolState {
            queue: Mutex::new(receiver),
            stop: CancellationToken::new(),
            queued: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
        });

        let workers = (0..width)
            .map(|worker_id| {
                let state = Arc::clone(&state);
                tokio::spawn(Self::worker_loop(worker_id, state))
            })
            .collect();

        info!("Resolution pool started with {} workers", width);

        Self {
            state,
            sender,
            workers: StdMutex::new(workers),
            width,
        }
    }

    /// Queue a job
    pub fn submit<F>(&self, job: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.state.stop.is_cancelled() {
            return Err(Error::PoolClosed);
        }

        self.state.queued.fetch_add(1, Ordering::SeqCst);
        if self.sender.send(Box::pin(job)).is_err() {
            self.state.queued.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::PoolClosed);
        }
        Ok(())
    }

    async fn worker_loop(worker_id: usize, state: Arc<SharedPoolState>) {
        debug!("Worker {} started", worker_id);

        loop {
            let job = {
                let mut queue = state.queue.lock().await;
                tokio::select! {
                    biased;
                    _ = state.stop.cancelled() => None,
                    job = queue.recv() => job,
                }
            };

            let Some(job) = job else {
                break;
            };

            state.queued.fetch_sub(1, Ordering::SeqCst);
            state.active.fetch_add(1, Ordering::SeqCst);
            if let Err(panic) = AssertUnwindSafe(job).catch_unwind().await {
                error!("Worker {} job panicked: {}", worker_id, panic_message(&*panic));
            }
            state.active.fetch_sub(1, Ordering::SeqCst);
        }

        debug!("Worker {} exiting", worker_id);
    }

    /// Stop accepting work and wait for workers to finish their current job
    ///
    /// Jobs still queued are dropped without running.
    pub async fn shutdown(&self) {
        if self.state.stop.is_cancelled() {
            return;
        }
        info!("Shutting down resolution pool");
        self.state.stop.cancel();

        let workers: Vec<JoinHandle<()>> = std::mem::take(
            &mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner),
        );

        for (idx, handle) in workers.into_iter().enumerate() {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await {
                Ok(Ok(())) => debug!("Worker {} joined successfully", idx),
                Ok(Err(e)) => error!("Worker {} join failed: {:?}", idx, e),
                Err(_) => warn!("Worker {} did not stop within {:?}", idx, SHUTDOWN_TIMEOUT),
            }
        }

        info!("Resolution pool shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.stop.is_cancelled()
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Jobs waiting for a worker (for diagnostics)
    pub fn queue_len(&self) -> usize {
        self.state.queued.load(Ordering::SeqCst)
    }

    /// Jobs currently running (for diagnostics)
    pub fn active_count(&self) -> usize {
        self.state.active.load(Ordering::SeqCst)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

impl Drop for ResolutionPool {
    fn drop(&mut self) {
        self.state.stop.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::{oneshot, Semaphore};

    #[tokio::test]
    async fn test_submitted_job_runs() {
        let pool = ResolutionPool::new(2);
        let (tx, rx) = oneshot::channel();

        pool.submit(async move {
            let _ = tx.send(42);
        })
        .unwrap();

        assert_eq!(rx.await.unwrap(), 42);
        pool.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_bounded_by_width() {
        let pool = ResolutionPool::new(3);
        let gate = Arc::new(Semaphore::new(0));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();

        for _ in 0..10 {
            let gate = Arc::clone(&gate);
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            let done_tx = done_tx.clone();
            pool.submit(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                if let Ok(permit) = gate.acquire().await {
                    permit.forget();
                }
                running.fetch_sub(1, Ordering::SeqCst);
                let _ = done_tx.send(());
            })
            .unwrap();
        }

        while pool.active_count() < 3 {
            tokio::task::yield_now().await;
        }
        assert_eq!(pool.queue_len(), 7);

        gate.add_permits(10);
        for _ in 0..10 {
            done_rx.recv().await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 3);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_rejected() {
        let pool = ResolutionPool::new(1);
        pool.shutdown().await;

        assert!(pool.is_shut_down());
        assert!(matches!(pool.submit(async {}), Err(Error::PoolClosed)));
    }

    #[tokio::test]
    async fn test_worker_survives_panicking_job() {
        let pool = ResolutionPool::new(1);
        pool.submit(async {
            panic!("store exploded");
        })
        .unwrap();

        let (tx, rx) = oneshot::channel();
        pool.submit(async move {
            let _ = tx.send("still here");
        })
        .unwrap();

        assert_eq!(rx.await.unwrap(), "still here");
        assert_eq!(pool.active_count(), 0);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_zero_width_clamped_to_one() {
        let pool = ResolutionPool::new(0);
        assert_eq!(pool.width(), 1);
        pool.shutdown().await;
    }
}
