//! Task model for decomposed filesystem operations
//!
//! Compound operations (directory copy, move, delete) are not executed
//! inline: the facade decomposes them into ordered batches of [`Task`]s,
//! each one atomic, independently schedulable and cancellable. The host
//! application runs them on its own worker pool; within one batch, tasks
//! touching overlapping paths must run in emitted order (parent directory
//! before its contents on create, contents before the directory on delete).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

use crate::error::VfsError;

/// Cancellation signal plus transfer progress for one task.
///
/// The cancel flag is a watch channel so async transfer loops can also
/// `await` a change; blocking FTP loops just poll [`is_cancelled`].
///
/// [`is_cancelled`]: TaskControl::is_cancelled
#[derive(Debug)]
pub struct TaskControl {
    cancel_tx: watch::Sender<bool>,
    cancel_rx: watch::Receiver<bool>,
    transferred: AtomicU64,
}

impl TaskControl {
    pub fn new() -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        Self {
            cancel_tx,
            cancel_rx,
            transferred: AtomicU64::new(0),
        }
    }

    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    /// Record `bytes` more transferred.
    pub fn record(&self, bytes: u64) {
        self.transferred.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Bytes transferred so far.
    pub fn transferred(&self) -> u64 {
        self.transferred.load(Ordering::Relaxed)
    }
}

impl Default for TaskControl {
    fn default() -> Self {
        Self::new()
    }
}

/// The deferred work of one task: a one-shot future factory so the task
/// can be queued now and executed later on any worker.
pub type TaskOp =
    Box<dyn FnOnce(Arc<TaskControl>) -> BoxFuture<'static, Result<(), VfsError>> + Send>;

/// One atomic unit of a decomposed operation.
pub struct Task {
    id: String,
    label: String,
    byte_size: Option<u64>,
    control: Arc<TaskControl>,
    op: TaskOp,
}

impl Task {
    pub fn new(label: impl Into<String>, byte_size: Option<u64>, op: TaskOp) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            label: label.into(),
            byte_size,
            control: Arc::new(TaskControl::new()),
            op,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Expected transfer size, when known up front (used for progress).
    pub fn byte_size(&self) -> Option<u64> {
        self.byte_size
    }

    /// Handle for cancelling this task and observing its progress, safe to
    /// keep after the task has been handed to a worker.
    pub fn control(&self) -> Arc<TaskControl> {
        Arc::clone(&self.control)
    }

    /// Execute the task to completion. A task cancelled before it started
    /// reports [`VfsError::Cancelled`] without touching the remote side.
    pub async fn run(self) -> Result<(), VfsError> {
        if self.control.is_cancelled() {
            debug!("Task {} ({}) dropped before start", self.id, self.label);
            return Err(VfsError::Cancelled);
        }
        debug!("Task {} starting: {}", self.id, self.label);
        let result = (self.op)(Arc::clone(&self.control)).await;
        match &result {
            Ok(()) => debug!("Task {} done", self.id),
            Err(e) => debug!("Task {} failed: {}", self.id, e),
        }
        result
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("byte_size", &self.byte_size)
            .finish()
    }
}

/// An ordered batch of tasks from one decomposition.
///
/// Tasks targeting overlapping paths must execute in order; independent
/// leaf transfers may run concurrently. A batch from a move fallback must
/// fully complete before the next batch (the source delete) starts.
#[derive(Debug, Default)]
pub struct TaskBatch {
    pub tasks: Vec<Task>,
}

impl TaskBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, task: Task) {
        self.tasks.push(task);
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Run every task in order, collecting per-task outcomes. One task's
    /// failure does not abort its already-queued siblings.
    pub async fn run_all(self) -> Vec<Result<(), VfsError>> {
        let mut results = Vec::with_capacity(self.tasks.len());
        for task in self.tasks {
            results.push(task.run().await);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_cancel_flag() {
        let control = TaskControl::new();
        assert!(!control.is_cancelled());
        control.cancel();
        assert!(control.is_cancelled());
    }

    #[test]
    fn test_control_progress() {
        let control = TaskControl::new();
        control.record(100);
        control.record(28);
        assert_eq!(control.transferred(), 128);
    }

    #[tokio::test]
    async fn test_task_runs_operation() {
        let task = Task::new(
            "noop",
            Some(4),
            Box::new(|ctl| {
                Box::pin(async move {
                    ctl.record(4);
                    Ok(())
                })
            }),
        );
        assert_eq!(task.byte_size(), Some(4));
        let control = task.control();
        task.run().await.unwrap();
        assert_eq!(control.transferred(), 4);
    }

    #[tokio::test]
    async fn test_cancelled_task_never_starts() {
        let task = Task::new(
            "cancelled",
            None,
            Box::new(|_ctl| Box::pin(async move { panic!("must not run") })),
        );
        task.control().cancel();
        assert!(matches!(task.run().await, Err(VfsError::Cancelled)));
    }

    #[tokio::test]
    async fn test_batch_failure_does_not_abort_siblings() {
        let mut batch = TaskBatch::new();
        batch.push(Task::new(
            "fails",
            None,
            Box::new(|_| {
                Box::pin(async { Err(VfsError::NotFound("gone".to_string())) })
            }),
        ));
        batch.push(Task::new(
            "succeeds",
            None,
            Box::new(|_| Box::pin(async { Ok(()) })),
        ));
        let results = batch.run_all().await;
        assert!(results[0].is_err());
        assert!(results[1].is_ok());
    }
}
