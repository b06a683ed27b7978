//! Shared pool of fetch workers.
//!
//! The pool is created on first use and torn down by [`WorkerPoolManager::evict_idle`]
//! once nothing has been submitted for the idle timeout. Tearing it down only
//! closes the queue: jobs already queued or running still finish and deliver
//! their results.

use crate::http::{Fetch, FetchResult, FetchSpec};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

/// Queued jobs allowed per worker before `submit` waits.
const QUEUE_DEPTH_PER_WORKER: usize = 16;

struct Job {
    spec: FetchSpec,
    reply: oneshot::Sender<FetchResult>,
}

/// Awaitable result of a submitted fetch.
pub struct FetchHandle {
    rx: oneshot::Receiver<FetchResult>,
}

impl Future for FetchHandle {
    type Output = FetchResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<FetchResult> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.unwrap_or_else(|_| FetchResult::error("worker dropped the request")))
    }
}

/// N worker tasks pulling from one bounded queue.
struct WorkerPool {
    queue: mpsc::Sender<Job>,
}

impl WorkerPool {
    fn spawn(workers: usize, fetcher: Arc<dyn Fetch>) -> Self {
        let (queue, rx) = mpsc::channel(workers * QUEUE_DEPTH_PER_WORKER);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        for id in 0..workers {
            tokio::spawn(worker_loop(id, rx.clone(), fetcher.clone()));
        }
        Self { queue }
    }
}

async fn worker_loop(
    id: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>,
    fetcher: Arc<dyn Fetch>,
) {
    loop {
        let job = rx.lock().await.recv().await;
        let Some(job) = job else { break };
        let result = fetcher.fetch(job.spec).await;
        // The submitter may have gone away
        let _ = job.reply.send(result);
    }
    tracing::trace!(worker = id, "worker exiting");
}

struct Slot {
    pool: Option<WorkerPool>,
    last_used: Instant,
}

/// Lazily created, idle-evicted [`WorkerPool`] owner.
pub struct WorkerPoolManager {
    fetcher: Arc<dyn Fetch>,
    workers: usize,
    idle_timeout: Duration,
    slot: Mutex<Slot>,
}

impl WorkerPoolManager {
    pub fn new(fetcher: Arc<dyn Fetch>, workers: usize, idle_timeout: Duration) -> Self {
        Self {
            fetcher,
            workers: workers.max(1),
            idle_timeout,
            slot: Mutex::new(Slot {
                pool: None,
                last_used: Instant::now(),
            }),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// True while a pool exists.
    pub fn is_active(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pool
            .is_some()
    }

    /// Queues `spec`, creating the pool if needed.
    pub async fn submit(&self, spec: FetchSpec) -> FetchHandle {
        let queue = {
            let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
            slot.last_used = Instant::now();
            let pool = slot.pool.get_or_insert_with(|| {
                tracing::info!(workers = self.workers, "starting worker pool");
                WorkerPool::spawn(self.workers, self.fetcher.clone())
            });
            pool.queue.clone()
        };

        let (reply, rx) = oneshot::channel();
        if let Err(mpsc::error::SendError(job)) = queue.send(Job { spec, reply }).await {
            // Workers exit only after every sender is dropped
            let _ = job.reply.send(FetchResult::error("worker pool unavailable"));
        }
        FetchHandle { rx }
    }

    /// Submits every spec and waits for all of them. Results follow input order.
    pub async fn run_batch(&self, specs: Vec<FetchSpec>) -> Vec<FetchResult> {
        let mut handles = Vec::with_capacity(specs.len());
        for spec in specs {
            handles.push(self.submit(spec).await);
        }
        futures::future::join_all(handles).await
    }

    /// Tears the pool down if it has been idle past the timeout. Returns true
    /// when a pool was removed.
    pub fn evict_idle(&self) -> bool {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.pool.is_none() || slot.last_used.elapsed() <= self.idle_timeout {
            return false;
        }
        slot.pool = None;
        tracing::info!(idle_ms = self.idle_timeout.as_millis() as u64, "worker pool idle, shut down");
        true
    }

    /// Drops the pool without waiting for running jobs.
    pub fn shutdown(&self) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.pool.take().is_some() {
            tracing::info!("worker pool shut down");
        }
    }
}

impl std::fmt::Debug for WorkerPoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPoolManager")
            .field("workers", &self.workers)
            .field("idle_timeout", &self.idle_timeout)
            .field("active", &self.is_active())
            .finish()
    }
}
