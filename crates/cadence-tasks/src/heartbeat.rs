//! Periodic liveness task
//!
//! Logs one line per firing through a `tracing` subscriber pointed at the
//! run's log sink, so the output lands in the entry's history instead of
//! the process log.

use std::sync::Arc;

use async_trait::async_trait;
use cadence_core::{ScheduleOptions, StartImmediately, Task, TaskContext, TaskId};
use tracing::info;

pub struct Heartbeat;

#[async_trait]
impl Task for Heartbeat {
    fn task_id(&self) -> TaskId {
        TaskId::new("heartbeat")
    }

    async fn run(&self, ctx: TaskContext) -> anyhow::Result<()> {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(ctx.log_sink())
            .with_ansi(false)
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            info!(
                next_run = ?ctx.next_run_date(),
                previous_run = ?ctx.previous_run_date(),
                "heartbeat"
            );
        });

        Ok(())
    }

    fn schedule(&self) -> String {
        "0 * * * *".to_string()
    }

    fn schedule_options(&self) -> Arc<dyn ScheduleOptions> {
        Arc::new(StartImmediately::new(false, false, false))
    }
}
