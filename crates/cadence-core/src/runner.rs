//! Panic-safe execution of one entry
//!
//! One call runs one entry once: context construction, status transitions,
//! history append, error capture, and the sub-task cascade. The task body is
//! spawned on its own task so a panic unwinds there and is turned into a
//! Failing history record instead of taking the scheduler down.
//!
//! Status machine:
//!
//! ```text
//! PendingRun ──run start──▶ Running
//! Running  ──success──▶ PendingRun
//! Running  ──failure/panic──▶ Failing
//! Failing  ──next run starts──▶ Running
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::context::{LogSink, SubTaskGate, TaskContext};
use crate::entry::{Entry, EntryStatus, TaskHistory};

/// Run one entry to completion, then cascade into its declared sub-tasks.
///
/// `inherited` is set for sub-task runs: the context (sharing the parent's
/// stream and log sink) and the gate the child's own cascade will wait on.
/// Top-level dispatches pass `None` and get a fresh context.
///
/// Boxed because the sub-task cascade recurses.
pub(crate) fn run_entry(
    entry: Arc<Entry>,
    peers: Arc<Vec<Arc<Entry>>>,
    inherited: Option<(TaskContext, SubTaskGate)>,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        let execution_time = Utc::now();

        // Past the end of the activation window: skip silently.
        if entry.task.schedule_options().end_date() < execution_time {
            return;
        }

        let (ctx, mut gate) = match inherited {
            Some((ctx, gate)) => (ctx, gate),
            None => TaskContext::new(
                execution_time,
                Utc::now(),
                entry.next().map(|t| t.with_timezone(&Utc)),
                entry.prev().map(|t| t.with_timezone(&Utc)),
                None,
                LogSink::new(),
            ),
        };
        let sink = ctx.log_sink();

        info!(task = %entry.task_id(), "run started");
        entry.change_status(EntryStatus::Running);

        let body = {
            let task = entry.task.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move { task.run(ctx).await })
        };

        match body.await {
            Ok(Ok(())) => {
                sink.sync();
                entry.append_history(TaskHistory {
                    execution_time,
                    status: EntryStatus::Success,
                    logs: sink.snapshot(),
                });
                entry.change_status(EntryStatus::PendingRun);
            }
            Ok(Err(err)) => {
                sink.sync();
                entry.append_history(TaskHistory {
                    execution_time,
                    status: EntryStatus::Failing,
                    logs: sink.snapshot(),
                });
                entry.record_error(execution_time, format!("{err:#}"));
                entry.change_status(EntryStatus::Failing);
            }
            Err(join_err) => {
                let message = if join_err.is_panic() {
                    let payload = join_err.into_panic();
                    if let Some(s) = payload.downcast_ref::<&str>() {
                        (*s).to_string()
                    } else if let Some(s) = payload.downcast_ref::<String>() {
                        s.clone()
                    } else {
                        "non-string panic payload".to_string()
                    }
                } else {
                    "task body cancelled".to_string()
                };
                sink.sync();
                entry.append_history(TaskHistory {
                    execution_time,
                    status: EntryStatus::Failing,
                    logs: sink.snapshot(),
                });
                // Panics are keyed under the previous firing instant.
                let key = entry
                    .prev()
                    .map(|t| t.with_timezone(&Utc))
                    .unwrap_or(execution_time);
                entry.record_error(key, format!("task panicked: {}", message));
                entry.change_status(EntryStatus::Failing);
            }
        }
        info!(task = %entry.task_id(), "run finished");

        let (is_parallel, sub_tasks) = entry.task.sub_tasks();
        if sub_tasks.is_empty() {
            return;
        }

        // Children start only once the parent has signalled; a dropped gate
        // means the parent context went away without releasing them.
        if !gate.wait().await {
            return;
        }

        let mut handles = Vec::new();
        for sub_task in sub_tasks {
            let Some(child) = peers
                .iter()
                .find(|e| e.task_id() == sub_task.task_id())
                .cloned()
            else {
                warn!(
                    task = %entry.task_id(),
                    sub_task = %sub_task.task_id(),
                    "sub-task has no registered entry; skipping"
                );
                continue;
            };

            let (child_ctx, child_gate) = TaskContext::new(
                Utc::now(),
                Utc::now(),
                entry.next().map(|t| t.with_timezone(&Utc)),
                entry.prev().map(|t| t.with_timezone(&Utc)),
                Some(ctx.stream()),
                sink.clone(),
            );

            let handle = tokio::spawn(run_entry(
                child,
                peers.clone(),
                Some((child_ctx, child_gate)),
            ));
            if is_parallel {
                handles.push(handle);
            } else {
                // Serial fan-out: the k-th child finishes before the next
                // one starts.
                let _ = handle.await;
            }
        }
        for handle in handles {
            let _ = handle.await;
        }
    })
}
