//! Background processing loop.
//!
//! One task drives the queue: every `tick_interval` it processes up to
//! `jobs_per_tick` jobs, and every `sweep_interval` it promotes deferred jobs.
//! Shutdown is signalled over a broadcast channel and only observed between
//! steps, so an in-flight job always finishes. The task holds the queue
//! weakly and exits once every queue handle has been dropped.

use crate::error::{QueueError, QueueResult};
use crate::manager::{EmbeddingQueue, WeakQueue};
use embedq_log::{error, info};
use std::time::Duration;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};

struct WorkerTask {
    handle: JoinHandle<()>,
    shutdown: broadcast::Sender<()>,
}

/// Handle to the processing task, owned by the queue.
#[derive(Default)]
pub(crate) struct WorkerState {
    task: Mutex<Option<WorkerTask>>,
}

impl EmbeddingQueue {
    /// Start the processing loop.
    ///
    /// # Errors
    ///
    /// [`QueueError::WorkerAlreadyRunning`] if a loop is active.
    pub async fn start_processing(&self) -> QueueResult<()> {
        let mut task = self.worker().task.lock().await;
        if task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            return Err(QueueError::WorkerAlreadyRunning);
        }

        let (shutdown, rx) = broadcast::channel(1);
        let handle = tokio::spawn(run(
            self.downgrade(),
            self.config().tick_interval,
            self.config().sweep_interval,
            rx,
        ));
        *task = Some(WorkerTask { handle, shutdown });

        info!(
            { tick_ms = self.config().tick_interval.as_millis(), jobs_per_tick = self.config().jobs_per_tick },
            "Embedding queue processing started"
        );
        Ok(())
    }

    /// Stop the processing loop, letting an in-flight job finish.
    ///
    /// # Errors
    ///
    /// [`QueueError::WorkerNotRunning`] if no loop is active.
    pub async fn stop_processing(&self) -> QueueResult<()> {
        let task = self.worker().task.lock().await.take();
        let Some(task) = task else {
            return Err(QueueError::WorkerNotRunning);
        };

        let _ = task.shutdown.send(());
        if let Err(e) = task.handle.await {
            error!({ error = e }, "Processing task ended abnormally");
        }

        info!("Embedding queue processing stopped");
        Ok(())
    }

    /// Whether the processing loop is active.
    pub async fn is_processing(&self) -> bool {
        self.worker()
            .task
            .lock()
            .await
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }

    pub(crate) async fn ensure_processing(&self) {
        match self.start_processing().await {
            Ok(()) | Err(QueueError::WorkerAlreadyRunning) => {}
            Err(e) => error!({ error = e }, "Failed to start processing"),
        }
    }

    /// Process up to `jobs_per_tick` jobs, stopping early when the head of
    /// the queue cannot be processed. Returns the number of jobs handled.
    pub async fn run_tick(&self) -> usize {
        let mut handled = 0;
        for _ in 0..self.config().jobs_per_tick {
            match self.process_next().await {
                Ok(outcome) if outcome.claimed_job() => handled += 1,
                Ok(_) => break,
                Err(e) => {
                    error!({ error = e }, "Error processing embedding queue");
                    break;
                }
            }
        }
        handled
    }
}

async fn run(
    queue: WeakQueue,
    tick_every: Duration,
    sweep_every: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut tick = interval(tick_every);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut sweep = interval(sweep_every);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        // A closed channel means the queue was dropped without a stop
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = tick.tick() => {
                let Some(queue) = queue.upgrade() else { break };
                queue.run_tick().await;
            }
            _ = sweep.tick() => {
                let Some(queue) = queue.upgrade() else { break };
                if let Err(e) = queue.sweep_deferred().await {
                    error!({ error = e }, "Deferred sweep failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::QueueConfig;
    use crate::error::QueueError;
    use crate::manager::{EmbeddingQueue, EnqueueOptions};
    use crate::operation::Operation;
    use crate::testing::{ManualClock, ScriptedBackend};
    use std::sync::Arc;
    use std::time::Duration;

    fn queue(config: QueueConfig, backend: Arc<ScriptedBackend>) -> EmbeddingQueue {
        EmbeddingQueue::builder(backend)
            .config(config)
            .clock(Arc::new(ManualClock::new(1_700_000_000_000, 14)))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_start_stop() {
        let q = queue(QueueConfig::default(), Arc::new(ScriptedBackend::new(4)));

        assert!(!q.is_processing().await);
        q.start_processing().await.unwrap();
        assert!(q.is_processing().await);
        assert!(matches!(
            q.start_processing().await,
            Err(QueueError::WorkerAlreadyRunning)
        ));

        q.stop_processing().await.unwrap();
        assert!(!q.is_processing().await);
        assert!(matches!(
            q.stop_processing().await,
            Err(QueueError::WorkerNotRunning)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_starts_loop_and_drains() {
        let backend = Arc::new(ScriptedBackend::new(4));
        let q = queue(QueueConfig::default(), backend.clone());

        q.enqueue("a", Operation::PostIndexing, EnqueueOptions::default())
            .await
            .unwrap();
        q.enqueue("b", Operation::MemoryStorage, EnqueueOptions::default())
            .await
            .unwrap();
        assert!(q.is_processing().await);

        tokio::time::sleep(Duration::from_millis(1_600)).await;

        assert_eq!(backend.calls(), 2);
        assert_eq!(q.stats().await.unwrap().completed, 2);
        q.stop_processing().await.unwrap();
    }

    #[tokio::test]
    async fn test_auto_start_disabled() {
        let q = queue(
            QueueConfig::default().with_auto_start(false),
            Arc::new(ScriptedBackend::new(4)),
        );
        q.enqueue("a", Operation::PostIndexing, EnqueueOptions::default())
            .await
            .unwrap();
        assert!(!q.is_processing().await);
    }

    #[tokio::test]
    async fn test_run_tick_honours_jobs_per_tick() {
        let backend = Arc::new(ScriptedBackend::new(4));
        let q = queue(
            QueueConfig::default()
                .with_auto_start(false)
                .with_jobs_per_tick(2),
            backend.clone(),
        );
        for text in ["a", "b", "c"] {
            q.enqueue(text, Operation::PostIndexing, EnqueueOptions::default())
                .await
                .unwrap();
        }

        assert_eq!(q.run_tick().await, 2);
        assert_eq!(q.run_tick().await, 1);
        assert_eq!(q.run_tick().await, 0);
        assert_eq!(backend.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_exits_when_queue_dropped() {
        let backend = Arc::new(ScriptedBackend::new(4));
        let q = queue(QueueConfig::default(), backend.clone());

        q.enqueue("a", Operation::PostIndexing, EnqueueOptions::default())
            .await
            .unwrap();
        assert!(q.is_processing().await);
        drop(q);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(Arc::strong_count(&backend), 1);
    }
}
