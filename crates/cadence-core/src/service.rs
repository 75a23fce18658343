//! Registration surface and lifecycle glue
//!
//! Tasks may be submitted before the scheduler exists; they wait in a
//! bounded buffer that initialization drains, parsing each task's cron
//! expression on the way in. A steady-state ticker watches for the buffer
//! to empty with at least one entry registered, then reconciles in-memory
//! entries with storage exactly once and retires itself.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info};

use crate::cron;
use crate::entry::{EntrySnapshot, TaskHistory};
use crate::scheduler::{Scheduler, SchedulerHandle};
use crate::store::Store;
use crate::task::Task;

/// Tasks parked before initialization.
const TASK_BUFFER: usize = 5_000;

/// How often the steady-state detector looks at the buffer.
const STEADY_STATE_TICK: Duration = Duration::from_millis(1500);

/// Display-oriented view of one entry, as serialized to observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayTask {
    pub id: String,
    pub status: String,
    pub schedule: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_run: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
    pub history: Vec<TaskHistory>,
}

impl From<EntrySnapshot> for DisplayTask {
    fn from(snapshot: EntrySnapshot) -> Self {
        let last_run = snapshot.history.last().map(|h| h.execution_time);
        Self {
            id: snapshot.id.to_string(),
            status: snapshot.status.as_str().to_string(),
            schedule: snapshot.schedule,
            next_run: snapshot.next,
            last_run,
            history: snapshot.history,
        }
    }
}

/// Init-then-register handle around one scheduler.
pub struct SchedulerService {
    location: Tz,
    buffer_tx: mpsc::Sender<Arc<dyn Task>>,
    buffer_rx: Mutex<Option<mpsc::Receiver<Arc<dyn Task>>>>,
    handle: RwLock<Option<SchedulerHandle>>,
}

impl SchedulerService {
    pub fn new(location: Tz) -> Self {
        let (buffer_tx, buffer_rx) = mpsc::channel(TASK_BUFFER);
        Self {
            location,
            buffer_tx,
            buffer_rx: Mutex::new(Some(buffer_rx)),
            handle: RwLock::new(None),
        }
    }

    fn handle(&self) -> Option<SchedulerHandle> {
        self.handle
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Register a task. Before initialization the task waits in the buffer;
    /// afterwards it goes straight to the running scheduler. Cron parse
    /// errors surface here for direct submissions.
    pub async fn schedule_task(&self, task: Arc<dyn Task>) -> Result<()> {
        if let Some(handle) = self.handle() {
            let schedule = cron::parse_standard(&task.schedule())?;
            handle.schedule(Arc::new(schedule), task).await?;
            return Ok(());
        }
        self.buffer_tx
            .try_send(task)
            .map_err(|_| anyhow::anyhow!("task buffer is full"))
    }

    /// Build and start the scheduler, drain the submission buffer, and run
    /// the steady-state detector until it has reconciled with storage once.
    pub async fn init(&self, store: Arc<dyn Store>) -> Result<()> {
        let mut buffer_rx = self
            .buffer_rx
            .lock()
            .await
            .take()
            .context("scheduler already initialized")?;

        let handle = Scheduler::with_location(self.location).start();
        {
            let mut slot = self.handle.write().unwrap_or_else(|e| e.into_inner());
            *slot = Some(handle.clone());
        }

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(STEADY_STATE_TICK);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    Some(task) = buffer_rx.recv() => {
                        match cron::parse_standard(&task.schedule()) {
                            Ok(schedule) => {
                                if let Err(err) =
                                    handle.schedule(Arc::new(schedule), task.clone()).await
                                {
                                    error!(task = %task.task_id(), "failed to schedule: {:#}", err);
                                }
                            }
                            Err(err) => {
                                error!(task = %task.task_id(), "invalid cron expression: {:#}", err);
                            }
                        }
                    }
                    _ = ticker.tick() => {
                        if handle.is_stopped() {
                            return;
                        }
                        if buffer_rx.is_empty() {
                            let entries = handle.entries().await;
                            if entries.is_empty() {
                                continue;
                            }
                            if let Err(err) =
                                store.update_in_memory_entries_from_storage(&entries).await
                            {
                                error!("failed to update entries from storage: {:#}", err);
                            } else {
                                info!("entries reconciled with storage");
                            }
                            return;
                        }
                    }
                }
            }
        });

        Ok(())
    }

    /// Current entries as display views, answered by the running loop.
    pub async fn task_list(&self) -> Vec<DisplayTask> {
        let Some(handle) = self.handle() else {
            return Vec::new();
        };
        handle
            .snapshot()
            .await
            .into_iter()
            .map(DisplayTask::from)
            .collect()
    }

    /// Stop the loop and persist every entry. In-flight runs are left to
    /// finish on their own.
    pub async fn stop(&self, store: &dyn Store) -> Result<()> {
        let Some(handle) = self.handle() else {
            return Ok(());
        };
        let entries = handle.entries().await;
        handle.stop().await;
        let result = store.update_entries(&entries).await;
        store.close().await?;
        result
    }
}
