//! Daily digest pipeline
//!
//! `DigestBuilder` assembles the digest sections and streams them to its
//! declared sub-task, `DigestWriter`, which drains the stream and renders
//! whatever arrived. The writer is also a registered entry of its own, so a
//! standalone firing simply finds the stream empty.

use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use cadence_core::{ScheduleOptions, StartImmediately, Task, TaskContext, TaskId};
use serde_json::json;

pub struct DigestBuilder {
    writer: Arc<dyn Task>,
}

impl DigestBuilder {
    pub fn new(writer: Arc<dyn Task>) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl Task for DigestBuilder {
    fn task_id(&self) -> TaskId {
        TaskId::new("digest-builder")
    }

    async fn run(&self, ctx: TaskContext) -> anyhow::Result<()> {
        let sections = [
            json!({ "section": "schedules", "detail": "entries due in the next 24h" }),
            json!({ "section": "failures", "detail": "entries currently failing" }),
            json!({ "section": "history", "detail": "runs completed since the last digest" }),
        ];

        for section in sections {
            ctx.stream_to_sub_tasks(section).await?;
        }

        writeln!(ctx.log_sink(), "digest sections streamed")?;
        ctx.notify_sub_tasks();
        Ok(())
    }

    fn schedule(&self) -> String {
        "0 6 * * *".to_string()
    }

    fn schedule_options(&self) -> Arc<dyn ScheduleOptions> {
        Arc::new(StartImmediately::new(false, false, false))
    }

    fn sub_tasks(&self) -> (bool, Vec<Arc<dyn Task>>) {
        (false, vec![self.writer.clone()])
    }
}

pub struct DigestWriter;

#[async_trait]
impl Task for DigestWriter {
    fn task_id(&self) -> TaskId {
        TaskId::new("digest-writer")
    }

    async fn run(&self, ctx: TaskContext) -> anyhow::Result<()> {
        let mut sink = ctx.log_sink();

        let mut count = 0;
        while let Some(section) = ctx.try_recv_from_parent() {
            writeln!(sink, "digest: {}", section)?;
            count += 1;
        }

        if count == 0 {
            writeln!(sink, "digest: nothing to write")?;
        }
        Ok(())
    }

    fn schedule(&self) -> String {
        "30 6 * * *".to_string()
    }

    fn schedule_options(&self) -> Arc<dyn ScheduleOptions> {
        Arc::new(StartImmediately::new(false, false, false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::context::LogSink;
    use chrono::Utc;

    #[tokio::test]
    async fn builder_streams_sections_to_writer() {
        let sink = LogSink::new();
        let (parent_ctx, mut gate) =
            TaskContext::new(Utc::now(), Utc::now(), None, None, None, sink.clone());

        let writer: Arc<dyn Task> = Arc::new(DigestWriter);
        let builder = DigestBuilder::new(writer);
        builder.run(parent_ctx.clone()).await.unwrap();

        // The builder released its sub-tasks before returning.
        assert!(gate.wait().await);

        let (child_ctx, _child_gate) = TaskContext::new(
            Utc::now(),
            Utc::now(),
            None,
            None,
            Some(parent_ctx.stream()),
            sink.clone(),
        );
        DigestWriter.run(child_ctx).await.unwrap();

        sink.sync();
        let rendered = sink.snapshot();
        assert!(rendered.contains("digest sections streamed"));
        assert!(rendered.contains("schedules"));
        assert!(rendered.contains("failures"));
        assert!(rendered.contains("history"));
    }

    #[tokio::test]
    async fn writer_handles_an_empty_stream() {
        let sink = LogSink::new();
        let (ctx, _gate) =
            TaskContext::new(Utc::now(), Utc::now(), None, None, None, sink.clone());

        DigestWriter.run(ctx).await.unwrap();

        sink.sync();
        assert!(sink.snapshot().contains("nothing to write"));
    }
}
