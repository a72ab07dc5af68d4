use thiserror::Error;

use crate::scheduler::TaskId;

/// Errors raised by the task scheduler.
#[derive(Debug, Error)]
pub enum KernelError {
    #[error("scheduler is shutting down, no new work accepted")]
    SchedulerShutdown,

    #[error("task {task_id} not found")]
    TaskNotFound { task_id: TaskId },

    #[error("task {task_id} timed out after {elapsed_ms}ms")]
    Timeout { task_id: TaskId, elapsed_ms: u64 },

    #[error("task {task_id} was cancelled")]
    Cancelled { task_id: TaskId },

    #[error("task {task_id} panicked or was dropped before completion")]
    Lost { task_id: TaskId },
}

pub type Result<T> = std::result::Result<T, KernelError>;
