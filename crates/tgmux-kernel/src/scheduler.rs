//! Cooperative task scheduler.
//!
//! Every outbound call into the Telegram protocol library — warmup loops,
//! entity resolution, message sends — is submitted here rather than spawned
//! directly by the HTTP handler that needs it. This keeps all protocol
//! traffic visible in one place for status reporting and gives callers a
//! uniform submit-future primitive with a per-operation timeout, instead of
//! each handler hand-rolling its own `tokio::spawn` + `timeout` pair.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::{KernelError, Result};

pub type TaskId = Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Running,
    Completed,
    Failed(String),
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct TaskInfo {
    pub id: TaskId,
    pub name: String,
    pub status: TaskStatus,
    pub submitted_at: Instant,
}

struct SchedulerInner {
    tasks: DashMap<TaskId, TaskInfo>,
    shutdown: AtomicBool,
}

/// Handle to the scheduler. Cheap to clone; every clone shares the same
/// task table.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                tasks: DashMap::new(),
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    /// Submit a future for execution and await its typed result, bounded by
    /// `timeout`. The future runs as its own tokio task so a slow account
    /// can never block another account's work, matching the "single
    /// cooperative scheduler, many concurrent protocol calls" shape of the
    /// system this replaces.
    pub async fn submit_and_wait<T, F>(&self, name: impl Into<String>, timeout: Duration, fut: F) -> Result<T>
    where
        T: Send + 'static,
        F: Future<Output = T> + Send + 'static,
    {
        if self.inner.shutdown.load(Ordering::SeqCst) {
            return Err(KernelError::SchedulerShutdown);
        }

        let id = Uuid::now_v7();
        let name = name.into();
        self.inner.tasks.insert(
            id,
            TaskInfo {
                id,
                name: name.clone(),
                status: TaskStatus::Running,
                submitted_at: Instant::now(),
            },
        );
        tracing::debug!(task_id = %id, task_name = %name, "task submitted");

        let (tx, rx) = oneshot::channel();
        let inner = Arc::clone(&self.inner);
        let task_name = name.clone();
        tokio::spawn(async move {
            let value = fut.await;
            if let Some(mut entry) = inner.tasks.get_mut(&id) {
                entry.status = TaskStatus::Completed;
            }
            tracing::debug!(task_id = %id, task_name = %task_name, "task completed");
            let _ = tx.send(value);
        });

        let started = Instant::now();
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => {
                if let Some(mut entry) = self.inner.tasks.get_mut(&id) {
                    entry.status = TaskStatus::Failed("task dropped before completion".into());
                }
                tracing::warn!(task_id = %id, task_name = %name, "task dropped before completion");
                Err(KernelError::Lost { task_id: id })
            }
            Err(_) => {
                if let Some(mut entry) = self.inner.tasks.get_mut(&id) {
                    entry.status = TaskStatus::Failed("timed out".into());
                }
                tracing::warn!(task_id = %id, task_name = %name, elapsed_ms = started.elapsed().as_millis() as u64, "task timed out");
                Err(KernelError::Timeout {
                    task_id: id,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                })
            }
        }
    }

    pub fn status(&self, id: TaskId) -> Option<TaskInfo> {
        self.inner.tasks.get(&id).map(|e| e.clone())
    }

    pub fn active_count(&self) -> usize {
        self.inner
            .tasks
            .iter()
            .filter(|e| e.status == TaskStatus::Running)
            .count()
    }

    pub fn recent_tasks(&self, limit: usize) -> Vec<TaskInfo> {
        let mut all: Vec<TaskInfo> = self.inner.tasks.iter().map(|e| e.clone()).collect();
        all.sort_by_key(|t| std::cmp::Reverse(t.submitted_at));
        all.truncate(limit);
        all
    }

    /// Stop accepting new work. In-flight tasks run to completion.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        tracing::info!("scheduler shutdown requested");
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn submit_and_complete() {
        let sched = Scheduler::new();
        let result = sched
            .submit_and_wait("ping", Duration::from_secs(1), async { 40 + 2 })
            .await
            .unwrap();
        assert_eq!(result, 42);
        assert_eq!(sched.active_count(), 0);
    }

    #[tokio::test]
    async fn submit_times_out() {
        let sched = Scheduler::new();
        let result = sched
            .submit_and_wait("slow", Duration::from_millis(20), async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                1
            })
            .await;
        assert!(matches!(result, Err(KernelError::Timeout { .. })));
    }

    #[tokio::test]
    async fn shutdown_rejects_new_work() {
        let sched = Scheduler::new();
        sched.shutdown();
        let result = sched
            .submit_and_wait("ping", Duration::from_secs(1), async { 1 })
            .await;
        assert!(matches!(result, Err(KernelError::SchedulerShutdown)));
    }

    #[tokio::test]
    async fn concurrent_submissions_do_not_block_each_other() {
        let sched = Scheduler::new();
        let slow = sched.submit_and_wait("slow", Duration::from_secs(2), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            "slow"
        });
        let fast = sched.submit_and_wait("fast", Duration::from_secs(2), async { "fast" });
        let (slow, fast) = tokio::join!(slow, fast);
        assert_eq!(fast.unwrap(), "fast");
        assert_eq!(slow.unwrap(), "slow");
    }
}
