//! Delayed verb execution.
//!
//! Tasks are persisted rows, so they survive restarts. The scheduler itself
//! is a thin timer: it scans due rows and hands each one to an execution
//! callback supplied by the host (which re-enters the interpreter). Task
//! failures are logged, never re-thrown into the loop.

use crate::store::{ScheduledTask, StoreError, WorldStore};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

pub struct Scheduler {
    store: Arc<Mutex<WorldStore>>,
    interval_ms: u64,
}

impl Scheduler {
    pub fn new(store: Arc<Mutex<WorldStore>>, interval_ms: u64) -> Self {
        Self { store, interval_ms }
    }

    /// Persist a task due `delay_ms` from now.
    pub async fn schedule(
        &self,
        entity_id: i64,
        verb: &str,
        args: serde_json::Value,
        delay_ms: u64,
    ) -> Result<i64, SchedulerError> {
        let execute_at = (now_ms() + delay_ms) as i64;
        let store = self.store.lock().await;
        Ok(store.schedule_task(entity_id, verb, args, execute_at).await?)
    }

    /// Run every due task through `execute`. Each task is deleted before it
    /// runs so a crashing task cannot wedge the loop into re-execution.
    pub async fn process<F, Fut>(&self, mut execute: F) -> Result<(), SchedulerError>
    where
        F: FnMut(ScheduledTask) -> Fut,
        Fut: std::future::Future<Output = Result<(), String>>,
    {
        let tasks = {
            let store = self.store.lock().await;
            store.due_tasks(now_ms() as i64).await?
        };

        for task in tasks {
            {
                let store = self.store.lock().await;
                store.delete_task(task.id).await?;
            }
            if let Err(e) = execute(task.clone()).await {
                tracing::warn!(
                    task_id = task.id,
                    entity_id = task.entity_id,
                    verb = %task.verb,
                    error = %e,
                    "scheduled task failed"
                );
            }
        }
        Ok(())
    }

    /// Drive `process` on a fixed interval until the host drops the future.
    pub async fn run<F, Fut>(self: Arc<Self>, execute: F)
    where
        F: Fn(ScheduledTask) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), String>> + Send,
    {
        let mut interval = time::interval(Duration::from_millis(self.interval_ms));
        loop {
            interval.tick().await;
            if let Err(e) = self.process(&execute).await {
                tracing::warn!(error = %e, "scheduler tick failed");
            }
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before Unix epoch")
        .as_millis() as u64
}
