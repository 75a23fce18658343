//! Time-ordered entry runner
//!
//! The loop owns the entry list: it computes every entry's next firing
//! instant, sorts ascending (unsatisfiable entries parked at the end),
//! sleeps until the earliest, and dispatches whatever came due. Everything
//! else (new entries, snapshot requests, shared-entry queries, stop) comes
//! in over channels so the list has a single owner.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use crate::cron::{self, Schedule};
use crate::entry::{Entry, EntrySnapshot};
use crate::runner::run_entry;
use crate::task::Task;

/// Sleep applied when no entry has a next firing time.
const IDLE_SLEEP: Duration = Duration::from_secs(100_000 * 3600);

/// Requests answered by the running loop.
enum Query {
    /// Deep copies for observers.
    Snapshot(oneshot::Sender<Vec<EntrySnapshot>>),
    /// Shared references, for store reconciliation and shutdown
    /// persistence.
    Entries(oneshot::Sender<Vec<Arc<Entry>>>),
}

/// A cron scheduler before it has been started. Entries registered here are
/// picked up when the loop starts.
pub struct Scheduler {
    entries: Vec<Arc<Entry>>,
    location: Tz,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::with_location(Tz::UTC)
    }

    pub fn with_location(location: Tz) -> Self {
        Self {
            entries: Vec::new(),
            location,
        }
    }

    pub fn location(&self) -> Tz {
        self.location
    }

    /// Parse the expression and register the task.
    pub fn add_task(&mut self, expr: &str, task: Arc<dyn Task>) -> anyhow::Result<Arc<Entry>> {
        let schedule = cron::parse(expr)?;
        Ok(self.schedule(Arc::new(schedule), task))
    }

    /// Register a task under an already-compiled schedule.
    pub fn schedule(&mut self, schedule: Arc<dyn Schedule>, task: Arc<dyn Task>) -> Arc<Entry> {
        let entry = Entry::new(schedule, task);
        self.entries.push(entry.clone());
        entry
    }

    /// Entries registered so far; once started, go through
    /// [`SchedulerHandle::entries`] instead.
    pub fn entries(&self) -> Vec<Arc<Entry>> {
        self.entries.clone()
    }

    /// Spawn the loop on its own task and return the handle. Consuming
    /// `self` makes a double start unrepresentable.
    pub fn start(self) -> SchedulerHandle {
        let (handle, looped) = self.into_loop();
        tokio::spawn(looped);
        handle
    }

    /// Like [`Scheduler::start`], but hands the loop future back so the
    /// caller can drive it inline.
    pub fn into_loop(self) -> (SchedulerHandle, impl std::future::Future<Output = ()>) {
        let (add_tx, add_rx) = mpsc::channel(1);
        let (query_tx, query_rx) = mpsc::channel(1);
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let handle = SchedulerHandle {
            add_tx,
            query_tx,
            stop_tx,
            location: self.location,
        };
        let looped = run_loop(self.entries, self.location, add_rx, query_rx, stop_rx);
        (handle, looped)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Channel-backed handle to a running scheduler. Cloneable; the loop exits
/// when asked to stop or when every handle has been dropped.
#[derive(Clone)]
pub struct SchedulerHandle {
    add_tx: mpsc::Sender<Arc<Entry>>,
    query_tx: mpsc::Sender<Query>,
    stop_tx: mpsc::Sender<()>,
    location: Tz,
}

impl SchedulerHandle {
    pub fn location(&self) -> Tz {
        self.location
    }

    /// Parse the expression and hand the task to the running loop.
    pub async fn add_task(&self, expr: &str, task: Arc<dyn Task>) -> anyhow::Result<Arc<Entry>> {
        let schedule = cron::parse(expr)?;
        self.schedule(Arc::new(schedule), task).await
    }

    pub async fn schedule(
        &self,
        schedule: Arc<dyn Schedule>,
        task: Arc<dyn Task>,
    ) -> anyhow::Result<Arc<Entry>> {
        let entry = Entry::new(schedule, task);
        self.add_tx
            .send(entry.clone())
            .await
            .map_err(|_| anyhow::anyhow!("scheduler loop has stopped"))?;
        Ok(entry)
    }

    /// Deep-copied view of the current entries, answered by the loop
    /// between iterations so observers never see a half-updated list.
    pub async fn snapshot(&self) -> Vec<EntrySnapshot> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.query_tx.send(Query::Snapshot(reply_tx)).await.is_err() {
            return Vec::new();
        }
        reply_rx.await.unwrap_or_default()
    }

    /// Shared references to the live entries.
    pub async fn entries(&self) -> Vec<Arc<Entry>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.query_tx.send(Query::Entries(reply_tx)).await.is_err() {
            return Vec::new();
        }
        reply_rx.await.unwrap_or_default()
    }

    /// Signal the loop to exit. In-flight runs are not cancelled; they
    /// finish against their own detached contexts.
    pub async fn stop(&self) {
        let _ = self.stop_tx.send(()).await;
    }

    /// True once the loop has exited.
    pub fn is_stopped(&self) -> bool {
        self.query_tx.is_closed()
    }
}

/// Zero times sort to the end of the list.
fn by_next(a: &Arc<Entry>, b: &Arc<Entry>) -> Ordering {
    match (a.next(), b.next()) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(x), Some(y)) => x.cmp(&y),
    }
}

async fn run_loop(
    mut entries: Vec<Arc<Entry>>,
    location: Tz,
    mut add_rx: mpsc::Receiver<Arc<Entry>>,
    mut query_rx: mpsc::Receiver<Query>,
    mut stop_rx: mpsc::Receiver<()>,
) {
    // Figure out the next activation time for each entry.
    let mut now = Utc::now().with_timezone(&location);
    for entry in &entries {
        entry.set_next(entry.schedule.next(now));
    }

    loop {
        entries.sort_by(by_next);

        let sleep_for = match entries.first().and_then(|e| e.next()) {
            Some(next) => duration_until(next),
            None => IDLE_SLEEP,
        };

        tokio::select! {
            _ = tokio::time::sleep(sleep_for) => {
                now = Utc::now().with_timezone(&location);
                // Run every entry whose next time has come.
                let peers = Arc::new(entries.clone());
                for entry in &entries {
                    let Some(next) = entry.next() else { break };
                    if next > now {
                        break;
                    }
                    dispatch(entry.clone(), peers.clone());
                    entry.set_prev(Some(next));
                    entry.set_next(entry.schedule.next(now));
                }
            }

            Some(entry) = add_rx.recv() => {
                now = Utc::now().with_timezone(&location);
                entry.set_next(entry.schedule.next(now));
                debug!(task = %entry.task_id(), "entry added");
                entries.push(entry);
            }

            Some(query) = query_rx.recv() => {
                match query {
                    Query::Snapshot(reply) => {
                        let _ = reply.send(entries.iter().map(|e| e.snapshot()).collect());
                    }
                    Query::Entries(reply) => {
                        let _ = reply.send(entries.clone());
                    }
                }
            }

            // Stop on signal, or once every handle is gone.
            _ = stop_rx.recv() => {
                debug!("scheduler loop stopping");
                return;
            }
        }
    }
}

fn duration_until(next: DateTime<Tz>) -> Duration {
    (next.with_timezone(&Utc) - Utc::now())
        .to_std()
        .unwrap_or(Duration::ZERO)
}

/// Fire one entry on its own task, honoring the overlap policy: entries
/// that disallow overlap serialize on their run gate.
fn dispatch(entry: Arc<Entry>, peers: Arc<Vec<Arc<Entry>>>) {
    tokio::spawn(async move {
        if entry.task.schedule_options().allow_overlap() {
            run_entry(entry, peers, None).await;
        } else {
            let permit = match entry.run_gate.acquire().await {
                Ok(permit) => permit,
                Err(_) => {
                    error!(task = %entry.task_id(), "run gate closed");
                    return;
                }
            };
            run_entry(entry.clone(), peers, None).await;
            drop(permit);
        }
    });
}
