//! Scheduler entries and their persisted form
//!
//! An [`Entry`] is the scheduler's record of one registered task: the
//! compiled schedule, the task itself, the next/previous firing instants,
//! the run status, and the accumulated history and errors. Firing times are
//! owned by the scheduler loop; history, errors, and status are written by
//! the run executor. Everything mutable sits behind the entry's lock so the
//! two (plus any readers) can coexist.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::Context as _;
use chrono::{DateTime, SecondsFormat, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Semaphore;

use crate::cron::Schedule;
use crate::task::{Task, TaskId};

/// Retained history/error rows per entry; the oldest rows are dropped past
/// this bound.
pub const MAX_HISTORY: usize = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryStatus {
    Stopped,
    #[serde(rename = "Pending Run")]
    PendingRun,
    Running,
    Failing,
    Success,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Stopped => "Stopped",
            EntryStatus::PendingRun => "Pending Run",
            EntryStatus::Running => "Running",
            EntryStatus::Failing => "Failing",
            EntryStatus::Success => "Success",
        }
    }
}

impl FromStr for EntryStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "Stopped" => Ok(EntryStatus::Stopped),
            "Pending Run" => Ok(EntryStatus::PendingRun),
            "Running" => Ok(EntryStatus::Running),
            "Failing" => Ok(EntryStatus::Failing),
            "Success" => Ok(EntryStatus::Success),
            _ => Err(anyhow::anyhow!("invalid entry status: {}", s)),
        }
    }
}

/// One completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskHistory {
    pub execution_time: DateTime<Utc>,
    pub status: EntryStatus,
    pub logs: String,
}

struct EntryState {
    /// Next firing instant; `None` before the loop has computed it or when
    /// the schedule is unsatisfiable.
    next: Option<DateTime<Tz>>,
    /// Previous firing instant; `None` until the entry has fired once.
    prev: Option<DateTime<Tz>>,
    status: EntryStatus,
    history: Vec<TaskHistory>,
    errors: BTreeMap<DateTime<Utc>, String>,
}

/// The scheduler's record of one registered task.
pub struct Entry {
    pub schedule: Arc<dyn Schedule>,
    pub task: Arc<dyn Task>,
    /// One permit, held for the duration of a run when overlap is
    /// disallowed; runs of the same entry serialize on it.
    pub run_gate: Semaphore,
    state: RwLock<EntryState>,
}

impl Entry {
    pub fn new(schedule: Arc<dyn Schedule>, task: Arc<dyn Task>) -> Arc<Self> {
        Arc::new(Self {
            schedule,
            task,
            run_gate: Semaphore::new(1),
            state: RwLock::new(EntryState {
                next: None,
                prev: None,
                status: EntryStatus::PendingRun,
                history: Vec::new(),
                errors: BTreeMap::new(),
            }),
        })
    }

    pub fn task_id(&self) -> TaskId {
        self.task.task_id()
    }

    fn read(&self) -> RwLockReadGuard<'_, EntryState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, EntryState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn change_status(&self, status: EntryStatus) {
        self.write().status = status;
    }

    pub fn status(&self) -> EntryStatus {
        self.read().status
    }

    pub fn next(&self) -> Option<DateTime<Tz>> {
        self.read().next
    }

    pub fn prev(&self) -> Option<DateTime<Tz>> {
        self.read().prev
    }

    /// Firing-time updates; called only by the scheduler loop.
    pub(crate) fn set_next(&self, next: Option<DateTime<Tz>>) {
        self.write().next = next;
    }

    pub(crate) fn set_prev(&self, prev: Option<DateTime<Tz>>) {
        self.write().prev = prev;
    }

    /// Append one run record, dropping the oldest past the retention bound.
    pub fn append_history(&self, record: TaskHistory) {
        let mut state = self.write();
        state.history.push(record);
        if state.history.len() > MAX_HISTORY {
            let excess = state.history.len() - MAX_HISTORY;
            state.history.drain(..excess);
        }
    }

    pub fn record_error(&self, at: DateTime<Utc>, error: String) {
        let mut state = self.write();
        state.errors.insert(at, error);
        while state.errors.len() > MAX_HISTORY {
            state.errors.pop_first();
        }
    }

    pub fn history(&self) -> Vec<TaskHistory> {
        self.read().history.clone()
    }

    pub fn errors(&self) -> BTreeMap<DateTime<Utc>, String> {
        self.read().errors.clone()
    }

    /// Execution time of the most recent run, if any.
    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        self.read().history.last().map(|h| h.execution_time)
    }

    /// Deep copy for observers; detached from the live entry.
    pub fn snapshot(&self) -> EntrySnapshot {
        let state = self.read();
        EntrySnapshot {
            id: self.task.task_id(),
            schedule: self.task.schedule(),
            status: state.status,
            next: state.next.map(|t| t.with_timezone(&Utc)),
            prev: state.prev.map(|t| t.with_timezone(&Utc)),
            history: state.history.clone(),
            errors: state.errors.clone(),
        }
    }

    // ------------------------------------------------------------------
    // Store document codec
    // ------------------------------------------------------------------

    /// Serialize history and errors into the persisted document shape:
    /// rows keyed by their stringified execution timestamp.
    pub fn to_store_doc(&self) -> Value {
        let state = self.read();
        let history: Vec<Value> = state
            .history
            .iter()
            .map(|h| {
                json!({ store_key(&h.execution_time): {
                    "logs": h.logs,
                    "status": h.status.as_str(),
                }})
            })
            .collect();
        let errors: Vec<Value> = state
            .errors
            .iter()
            .map(|(at, error)| json!({ store_key(at): { "error": error } }))
            .collect();
        json!({ "history": history, "errors": errors })
    }

    /// Merge a persisted document back into this entry. Rows whose
    /// execution time is already present in memory are skipped, so the
    /// merge is additive and idempotent.
    pub fn merge_store_doc(&self, doc: &Value) -> anyhow::Result<()> {
        let mut state = self.write();

        if let Some(rows) = doc.get("history").and_then(Value::as_array) {
            for row in rows {
                let row = row.as_object().context("history row is not an object")?;
                for (key, value) in row {
                    let at = parse_store_key(key)?;
                    if state.history.iter().any(|h| h.execution_time == at) {
                        continue;
                    }
                    let status = value
                        .get("status")
                        .and_then(Value::as_str)
                        .context("history row missing status")?
                        .parse()?;
                    let logs = value
                        .get("logs")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    state.history.push(TaskHistory {
                        execution_time: at,
                        status,
                        logs,
                    });
                }
            }
            state.history.sort_by_key(|h| h.execution_time);
            if state.history.len() > MAX_HISTORY {
                let excess = state.history.len() - MAX_HISTORY;
                state.history.drain(..excess);
            }
        }

        if let Some(rows) = doc.get("errors").and_then(Value::as_array) {
            for row in rows {
                let row = row.as_object().context("error row is not an object")?;
                for (key, value) in row {
                    let at = parse_store_key(key)?;
                    let error = value
                        .get("error")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    state.errors.entry(at).or_insert(error);
                }
            }
        }

        Ok(())
    }
}

/// Timestamp key format used in persisted documents.
fn store_key(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_store_key(key: &str) -> anyhow::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(key)
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("invalid timestamp key: {}", key))
}

/// Display-oriented deep copy of an entry.
#[derive(Debug, Clone)]
pub struct EntrySnapshot {
    pub id: TaskId,
    pub schedule: String,
    pub status: EntryStatus,
    pub next: Option<DateTime<Utc>>,
    pub prev: Option<DateTime<Utc>>,
    pub history: Vec<TaskHistory>,
    pub errors: BTreeMap<DateTime<Utc>, String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TaskContext;
    use crate::cron;
    use crate::options::{ScheduleOptions, StartImmediately};
    use async_trait::async_trait;
    use chrono::TimeZone;

    struct NoopTask;

    #[async_trait]
    impl Task for NoopTask {
        fn task_id(&self) -> TaskId {
            TaskId::new("noop")
        }

        async fn run(&self, _ctx: TaskContext) -> anyhow::Result<()> {
            Ok(())
        }

        fn schedule(&self) -> String {
            "* * * * *".to_string()
        }

        fn schedule_options(&self) -> Arc<dyn ScheduleOptions> {
            Arc::new(StartImmediately::default())
        }
    }

    fn entry() -> Arc<Entry> {
        let schedule = Arc::new(cron::parse_standard("* * * * *").unwrap());
        Entry::new(schedule, Arc::new(NoopTask))
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, h, m, s).unwrap()
    }

    #[test]
    fn status_changes_are_visible() {
        let e = entry();
        assert_eq!(e.status(), EntryStatus::PendingRun);
        e.change_status(EntryStatus::Running);
        assert_eq!(e.status(), EntryStatus::Running);
    }

    #[test]
    fn history_is_append_only_and_bounded() {
        let e = entry();
        for i in 0..(MAX_HISTORY + 10) {
            e.append_history(TaskHistory {
                execution_time: at(0, 0, 0) + chrono::Duration::seconds(i as i64),
                status: EntryStatus::Success,
                logs: String::new(),
            });
        }
        let history = e.history();
        assert_eq!(history.len(), MAX_HISTORY);
        // Oldest rows were dropped; the newest survives.
        assert_eq!(
            history.last().unwrap().execution_time,
            at(0, 0, 0) + chrono::Duration::seconds((MAX_HISTORY + 9) as i64)
        );
        assert_eq!(e.last_run(), Some(history.last().unwrap().execution_time));
    }

    #[test]
    fn store_doc_round_trip() {
        let e = entry();
        e.append_history(TaskHistory {
            execution_time: at(8, 30, 0),
            status: EntryStatus::Success,
            logs: "ran fine\n".to_string(),
        });
        e.append_history(TaskHistory {
            execution_time: at(8, 31, 0),
            status: EntryStatus::Failing,
            logs: "boom\n".to_string(),
        });
        e.record_error(at(8, 31, 0), "task returned error".to_string());

        let doc = e.to_store_doc();

        let restored = entry();
        restored.merge_store_doc(&doc).unwrap();
        assert_eq!(restored.history(), e.history());
        assert_eq!(restored.errors(), e.errors());
    }

    #[test]
    fn merge_skips_rows_already_in_memory() {
        let e = entry();
        e.append_history(TaskHistory {
            execution_time: at(9, 0, 0),
            status: EntryStatus::Success,
            logs: "original".to_string(),
        });

        let mut doc = e.to_store_doc();
        // A second merge of the same document must not duplicate rows.
        e.merge_store_doc(&doc).unwrap();
        assert_eq!(e.history().len(), 1);
        assert_eq!(e.history()[0].logs, "original");

        // New rows from storage are appended in time order.
        doc["history"]
            .as_array_mut()
            .unwrap()
            .push(json!({ store_key(&at(8, 59, 0)): {
                "logs": "earlier run",
                "status": "Success",
            }}));
        e.merge_store_doc(&doc).unwrap();
        let history = e.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].logs, "earlier run");
    }

    #[test]
    fn merge_rejects_bad_timestamp_keys() {
        let e = entry();
        let doc = json!({ "history": [ { "not a timestamp": { "status": "Success" } } ] });
        assert!(e.merge_store_doc(&doc).is_err());
    }

    #[test]
    fn snapshot_is_detached() {
        let e = entry();
        e.append_history(TaskHistory {
            execution_time: at(10, 0, 0),
            status: EntryStatus::Success,
            logs: String::new(),
        });
        let snap = e.snapshot();
        e.change_status(EntryStatus::Failing);
        assert_eq!(snap.status, EntryStatus::PendingRun);
        assert_eq!(snap.history.len(), 1);
        assert_eq!(snap.id, TaskId::new("noop"));
    }
}
