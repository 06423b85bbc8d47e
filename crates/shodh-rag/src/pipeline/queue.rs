//! Bounded-worker FIFO task queue (spec §4.10), translated from
//! `background.py`'s `asyncio.Queue` + fixed worker pool + `None`
//! poison-pill shutdown.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, warn};

type BoxedTask = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Runs enqueued async tasks across a fixed pool of `max_concurrent`
/// workers. A task's own error is logged and contained — one failing task
/// never stops the queue or its siblings (spec §4.10).
pub struct TaskQueue {
    sender: mpsc::Sender<Option<BoxedTask>>,
    workers: Vec<JoinHandle<()>>,
}

impl TaskQueue {
    pub fn start(max_concurrent: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<Option<BoxedTask>>(1024);
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..max_concurrent.max(1))
            .map(|worker_id| {
                let receiver = receiver.clone();
                tokio::spawn(async move { Self::worker_loop(worker_id, receiver).await })
            })
            .collect();

        Self { sender, workers }
    }

    async fn worker_loop(worker_id: usize, receiver: Arc<Mutex<mpsc::Receiver<Option<BoxedTask>>>>) {
        loop {
            let next = { receiver.lock().await.recv().await };
            match next {
                None | Some(None) => break,
                Some(Some(task)) => {
                    if let Err(e) = task.await {
                        error!(worker_id, error = %e, "background task failed");
                    }
                }
            }
        }
        warn!(worker_id, "task queue worker stopped");
    }

    /// Enqueue a task; fails only if the queue has already been stopped.
    pub async fn enqueue<F>(&self, task: F) -> anyhow::Result<()>
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.sender
            .send(Some(Box::pin(task)))
            .await
            .map_err(|_| anyhow::anyhow!("task queue is stopped"))
    }

    /// Send one poison pill per worker, then wait for all workers to drain
    /// and exit.
    pub async fn stop(self) {
        for _ in &self.workers {
            let _ = self.sender.send(None).await;
        }
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}
