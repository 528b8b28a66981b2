//! Bounded FIFO task queue.
//!
//! Strict enqueue-order delivery, no priorities; retried tasks re-enter
//! at the tail. Capacity overflow either rejects with QUEUE_FULL or
//! blocks, per configuration. `close()` refuses further enqueues and
//! lets workers drain what is left before they observe end-of-queue.

use std::sync::Mutex;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

use crate::config::QueueFullPolicy;
use crate::error::{ErrorKind, ServiceError, ServiceResult};

pub struct TaskQueue {
    /// Dropped on close; enqueue fails once this is None.
    tx: Mutex<Option<mpsc::Sender<Uuid>>>,
    /// Workers share the receiver; one dequeue wakes one worker.
    rx: tokio::sync::Mutex<mpsc::Receiver<Uuid>>,
    policy: QueueFullPolicy,
    capacity: usize,
}

impl TaskQueue {
    pub fn new(capacity: usize, policy: QueueFullPolicy) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx: Mutex::new(Some(tx)),
            rx: tokio::sync::Mutex::new(rx),
            policy,
            capacity,
        }
    }

    /// Append a task reference at the tail.
    pub async fn enqueue(&self, id: Uuid) -> ServiceResult<()> {
        let tx = {
            let guard = self.tx.lock().unwrap_or_else(|e| e.into_inner());
            guard.clone()
        };
        let Some(tx) = tx else {
            return Err(ServiceError::new(ErrorKind::QueueFull, "task queue is closed"));
        };

        match self.policy {
            QueueFullPolicy::Reject => tx.try_send(id).map_err(|e| match e {
                TrySendError::Full(_) => ServiceError::new(
                    ErrorKind::QueueFull,
                    format!("task queue is at capacity ({})", self.capacity),
                )
                .with_suggestion("poll running tasks and retry, or raise QUEUE_CAPACITY"),
                TrySendError::Closed(_) => {
                    ServiceError::new(ErrorKind::QueueFull, "task queue is closed")
                }
            }),
            QueueFullPolicy::Block => tx
                .send(id)
                .await
                .map_err(|_| ServiceError::new(ErrorKind::QueueFull, "task queue is closed")),
        }
    }

    /// Next task reference in FIFO order; `None` after close once the
    /// queue has drained. At most one waiting worker wakes per item.
    pub async fn dequeue(&self) -> Option<Uuid> {
        let mut rx = self.rx.lock().await;
        rx.recv().await
    }

    /// Stop accepting work. Queued items remain dequeuable.
    pub fn close(&self) {
        let mut guard = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        guard.take();
    }

    /// Current queue depth.
    pub fn len(&self) -> usize {
        let guard = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some(tx) => self.capacity - tx.capacity(),
            None => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
