//! FIFO queue serializing signaling operations.
//!
//! Operations never run on the caller's stack: [`OperationQueue::enqueue`]
//! only appends, and a worker task runs one operation at a time. A panic in
//! one operation fails that operation and the queue moves on.

use crate::error::SignalingError;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

type Operation = Pin<Box<dyn Future<Output = ()> + Send>>;
type DrainHook = Box<dyn Fn() + Send + Sync>;

/// Single-consumer operation queue.
pub struct OperationQueue {
    tx: mpsc::UnboundedSender<Operation>,
    queued: Arc<AtomicUsize>,
    succeeded: Arc<AtomicBool>,
}

impl OperationQueue {
    /// Creates a queue and spawns its worker on the current runtime.
    ///
    /// `on_drain` runs when the queue empties, provided at least one
    /// operation since the previous drain succeeded.
    pub fn new(on_drain: impl Fn() + Send + Sync + 'static) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let queued = Arc::new(AtomicUsize::new(0));
        let succeeded = Arc::new(AtomicBool::new(false));
        tokio::spawn(run_worker(
            rx,
            queued.clone(),
            succeeded.clone(),
            Box::new(on_drain),
        ));
        Self {
            tx,
            queued,
            succeeded,
        }
    }

    /// Appends an operation and returns a future for its result.
    pub fn enqueue<F, T>(
        &self,
        operation: F,
    ) -> impl Future<Output = Result<T, SignalingError>> + Send + 'static
    where
        F: Future<Output = Result<T, SignalingError>> + Send + 'static,
        T: Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        self.queued.fetch_add(1, Ordering::SeqCst);

        let succeeded = self.succeeded.clone();
        let wrapped: Operation = Box::pin(async move {
            let result = operation.await;
            if result.is_ok() {
                succeeded.store(true, Ordering::SeqCst);
            }
            let _ = done_tx.send(result);
        });
        if self.tx.send(wrapped).is_err() {
            self.queued.fetch_sub(1, Ordering::SeqCst);
        }

        async move {
            match done_rx.await {
                Ok(result) => result,
                Err(_) => Err(SignalingError::Operation(
                    "operation was abandoned".to_string(),
                )),
            }
        }
    }

    /// Operations queued or running.
    pub fn len(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<Operation>,
    queued: Arc<AtomicUsize>,
    succeeded: Arc<AtomicBool>,
    on_drain: DrainHook,
) {
    while let Some(operation) = rx.recv().await {
        if let Err(e) = tokio::spawn(operation).await {
            tracing::error!("Queued operation failed: {}", e);
        }
        if queued.fetch_sub(1, Ordering::SeqCst) == 1 && succeeded.swap(false, Ordering::SeqCst) {
            on_drain();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[tokio::test]
    async fn test_operations_run_in_submission_order() {
        let queue = OperationQueue::new(|| {});
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut pending = Vec::new();
        for i in 0..5u64 {
            let log = log.clone();
            pending.push(queue.enqueue(async move {
                // Earlier operations sleep longer
                tokio::time::sleep(Duration::from_millis(10 * (5 - i))).await;
                log.lock().push(i);
                Ok(i)
            }));
        }
        for (i, p) in pending.into_iter().enumerate() {
            assert_eq!(p.await.unwrap(), i as u64);
        }
        assert_eq!(*log.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_enqueue_never_runs_synchronously() {
        let queue = OperationQueue::new(|| {});
        let ran = Arc::new(AtomicUsize::new(0));
        let flag = ran.clone();
        let result = queue.enqueue(async move {
            flag.store(1, Ordering::SeqCst);
            Ok(())
        });
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(queue.len(), 1);
        result.await.unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panic_does_not_stall_queue() {
        let queue = OperationQueue::new(|| {});
        let failed = queue.enqueue(async {
            let missing: Option<u32> = None;
            Ok(missing.expect("operation blew up"))
        });
        let next = queue.enqueue(async { Ok(7) });

        assert_eq!(failed.await.unwrap_err().name(), "OperationError");
        assert_eq!(next.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_drain_hook_runs_when_empty() {
        let drains = Arc::new(AtomicUsize::new(0));
        let counter = drains.clone();
        let queue = OperationQueue::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let a = queue.enqueue(async { Ok(()) });
        let b = queue.enqueue(async { Ok(()) });
        a.await.unwrap();
        b.await.unwrap();
        // The hook runs right after the last result is delivered
        for _ in 0..100 {
            if drains.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(drains.load(Ordering::SeqCst), 1);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_drain_hook_skipped_when_every_operation_failed() {
        let drains = Arc::new(AtomicUsize::new(0));
        let counter = drains.clone();
        let queue = OperationQueue::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let failed: Result<(), _> = queue
            .enqueue(async { Err(SignalingError::Operation("refused".to_string())) })
            .await;
        assert!(failed.is_err());
        // A later successful cycle still reaches the hook
        queue.enqueue(async { Ok(()) }).await.unwrap();
        for _ in 0..100 {
            if drains.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(drains.load(Ordering::SeqCst), 1);
    }
}
