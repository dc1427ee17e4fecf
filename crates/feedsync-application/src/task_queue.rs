//! Single-writer task queue.
//!
//! Every structural mutation runs as a task on this queue. One worker drains
//! a bounded FIFO channel and runs each task to completion before starting the
//! next, so tasks never overlap. Tasks submitted before the initialization task
//! are held back and run, in submission order, right after it.

use feedsync_core::error::{FeedError, Result};
use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{mpsc, oneshot};
use tracing::Instrument;

type Task = BoxFuture<'static, ()>;

enum QueueMessage {
    Initialization { name: &'static str, task: Task },
    Task { name: &'static str, task: Task },
}

/// Counters for monitoring queue health.
#[derive(Debug, Default)]
pub struct QueueStats {
    submitted: AtomicU64,
    executed: AtomicU64,
    initialized: AtomicBool,
}

/// Handle to the serializer. Cloning shares the same worker.
#[derive(Clone)]
pub struct TaskQueue {
    sender: mpsc::Sender<QueueMessage>,
    stats: Arc<QueueStats>,
}

impl TaskQueue {
    /// Creates the queue and spawns its worker on the current tokio runtime.
    ///
    /// The worker stops once every handle has been dropped.
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let stats = Arc::new(QueueStats::default());
        tokio::spawn(run_worker(receiver, stats.clone()));
        Self { sender, stats }
    }

    /// Enqueues a task.
    ///
    /// # Errors
    ///
    /// Returns `FeedError::QueueClosed` if the worker is gone.
    pub async fn execute<F>(&self, name: &'static str, task: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.submit(QueueMessage::Task {
            name,
            task: Box::pin(task),
        })
        .await
    }

    /// Enqueues the initialization task; every other task waits for it.
    pub async fn execute_initialization<F>(&self, name: &'static str, task: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.submit(QueueMessage::Initialization {
            name,
            task: Box::pin(task),
        })
        .await
    }

    /// Enqueues a task and waits for its output.
    ///
    /// Must not be awaited from inside another queued task: the worker would
    /// wait on itself.
    pub async fn run<F, T>(&self, name: &'static str, task: F) -> Result<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.execute(name, async move {
            let _ = tx.send(task.await);
        })
        .await?;
        rx.await.map_err(|_| FeedError::QueueClosed)
    }

    /// Enqueues the initialization task and waits for its output.
    pub async fn run_initialization<F, T>(&self, name: &'static str, task: F) -> Result<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.execute_initialization(name, async move {
            let _ = tx.send(task.await);
        })
        .await?;
        rx.await.map_err(|_| FeedError::QueueClosed)
    }

    pub fn is_initialized(&self) -> bool {
        self.stats.initialized.load(Ordering::SeqCst)
    }

    /// Returns `(submitted, executed)` task counts.
    pub fn stats(&self) -> (u64, u64) {
        (
            self.stats.submitted.load(Ordering::Relaxed),
            self.stats.executed.load(Ordering::Relaxed),
        )
    }

    async fn submit(&self, message: QueueMessage) -> Result<()> {
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);
        self.sender
            .send(message)
            .await
            .map_err(|_| FeedError::QueueClosed)
    }
}

async fn run_worker(mut receiver: mpsc::Receiver<QueueMessage>, stats: Arc<QueueStats>) {
    let mut held: VecDeque<(&'static str, Task)> = VecDeque::new();

    while let Some(message) = receiver.recv().await {
        match message {
            QueueMessage::Initialization { name, task } => {
                run_task(name, task, &stats).await;
                if !stats.initialized.swap(true, Ordering::SeqCst) && !held.is_empty() {
                    tracing::debug!(
                        "[TaskQueue] Initialized, running {} held task(s)",
                        held.len()
                    );
                }
                while let Some((name, task)) = held.pop_front() {
                    run_task(name, task, &stats).await;
                }
            }
            QueueMessage::Task { name, task } => {
                if stats.initialized.load(Ordering::SeqCst) {
                    run_task(name, task, &stats).await;
                } else {
                    tracing::debug!("[TaskQueue] Holding task '{}' until initialization", name);
                    held.push_back((name, task));
                }
            }
        }
    }

    tracing::debug!("[TaskQueue] All handles dropped, worker stopping");
}

async fn run_task(name: &'static str, task: Task, stats: &QueueStats) {
    task.instrument(tracing::debug_span!("feed_task", task = name))
        .await;
    stats.executed.fetch_add(1, Ordering::Relaxed);
}
