//! Per-session workers: one bounded FIFO queue per session key.
//!
//! Requests to the same (provider, work_dir) pair must run strictly in
//! submission order because each cycle owns the pane's input line. Distinct
//! session keys proceed independently.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::adapter::QueuedTask;

/// Queue capacity per session worker.
const QUEUE_DEPTH: usize = 16;

type TaskFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type TaskHandler = Arc<dyn Fn(QueuedTask) -> TaskFuture + Send + Sync>;

struct SessionWorker {
    tx: mpsc::Sender<QueuedTask>,
    join: JoinHandle<()>,
}

/// Maps session keys to dedicated workers.
pub struct WorkerPool {
    handler: TaskHandler,
    workers: Mutex<HashMap<String, SessionWorker>>,
}

impl WorkerPool {
    /// Create a pool; `handler` runs every task to completion.
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(QueuedTask) -> TaskFuture + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Submit a task for the given session key, creating a worker on first
    /// use.
    ///
    /// A full queue does not block: the task escapes to its own task instead,
    /// trading strict serialization for liveness. Expected queue depth is
    /// 0–1, so the escape hatch is rare.
    pub fn submit(&self, session_key: &str, task: QueuedTask) {
        let tx = {
            let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
            let worker = workers.entry(session_key.to_string()).or_insert_with(|| {
                let (tx, mut rx) = mpsc::channel::<QueuedTask>(QUEUE_DEPTH);
                let handler = self.handler.clone();
                let join = tokio::spawn(async move {
                    while let Some(task) = rx.recv().await {
                        handler(task).await;
                    }
                });
                SessionWorker { tx, join }
            });
            worker.tx.clone()
        };

        if let Err(err) = tx.try_send(task) {
            let task = match err {
                mpsc::error::TrySendError::Full(task) => task,
                mpsc::error::TrySendError::Closed(task) => task,
            };
            let handler = self.handler.clone();
            tokio::spawn(async move {
                handler(task).await;
            });
        }
    }

    /// Stop every worker.
    pub fn shutdown(&self) {
        let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
        for (_, worker) in workers.drain() {
            worker.join.abort();
        }
    }

    /// Number of live session workers, for diagnostics.
    pub fn active_workers(&self) -> usize {
        self.workers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::adapter::{ProviderRequest, ProviderResult};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn task(tag: &str) -> (QueuedTask, oneshot::Receiver<ProviderResult>) {
        let (tx, rx) = oneshot::channel();
        (
            QueuedTask {
                provider: "codex".into(),
                request: ProviderRequest {
                    message: tag.into(),
                    ..Default::default()
                },
                result_tx: tx,
            },
            rx,
        )
    }

    #[tokio::test]
    async fn tasks_for_one_key_run_in_fifo_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let order_ref = order.clone();
        let pool = WorkerPool::new(move |task: QueuedTask| {
            let order = order_ref.clone();
            Box::pin(async move {
                // A small stagger would expose reordering.
                tokio::time::sleep(Duration::from_millis(10)).await;
                order.lock().unwrap().push(task.request.message.clone());
                let _ = task.result_tx.send(ProviderResult::default());
            }) as TaskFuture
        });

        let mut receivers = Vec::new();
        for i in 0..5 {
            let (t, rx) = task(&format!("t{i}"));
            pool.submit("codex:/proj", t);
            receivers.push(rx);
        }
        for rx in receivers {
            rx.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec!["t0", "t1", "t2", "t3", "t4"]);
        assert_eq!(pool.active_workers(), 1);
    }

    #[tokio::test]
    async fn distinct_keys_get_distinct_workers() {
        let pool = WorkerPool::new(|task: QueuedTask| {
            Box::pin(async move {
                let _ = task.result_tx.send(ProviderResult::default());
            }) as TaskFuture
        });

        let (t1, rx1) = task("a");
        let (t2, rx2) = task("b");
        pool.submit("codex:/a", t1);
        pool.submit("gemini:/b", t2);
        rx1.await.unwrap();
        rx2.await.unwrap();
        assert_eq!(pool.active_workers(), 2);
    }

    #[tokio::test]
    async fn queue_overflow_still_executes_every_task() {
        let started = Arc::new(AtomicUsize::new(0));
        let started_ref = started.clone();
        let pool = WorkerPool::new(move |task: QueuedTask| {
            let started = started_ref.clone();
            Box::pin(async move {
                started.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                let _ = task.result_tx.send(ProviderResult::default());
            }) as TaskFuture
        });

        let mut receivers = Vec::new();
        for i in 0..(QUEUE_DEPTH + 8) {
            let (t, rx) = task(&format!("t{i}"));
            pool.submit("codex:/flood", t);
            receivers.push(rx);
        }
        for rx in receivers {
            rx.await.unwrap();
        }
        assert_eq!(started.load(Ordering::SeqCst), QUEUE_DEPTH + 8);
    }

    #[tokio::test]
    async fn shutdown_clears_workers() {
        let pool = WorkerPool::new(|task: QueuedTask| {
            Box::pin(async move {
                let _ = task.result_tx.send(ProviderResult::default());
            }) as TaskFuture
        });
        let (t, rx) = task("x");
        pool.submit("codex:/p", t);
        rx.await.unwrap();
        pool.shutdown();
        assert_eq!(pool.active_workers(), 0);
    }
}
