//! Cadence Tasks - task implementations run by the scheduler
//!
//! Tasks are organized by module:
//! - heartbeat: periodic liveness task logging through the run's sink
//! - digest: parent/child pair exercising sub-task streaming

pub mod digest;
pub mod heartbeat;

use std::sync::Arc;

use anyhow::Result;
use cadence_core::{SchedulerService, Task};

pub use digest::{DigestBuilder, DigestWriter};
pub use heartbeat::Heartbeat;

/// Register every task with the service. Called before initialization, so
/// submissions land in the buffer and drain once the scheduler starts.
pub async fn register(service: &SchedulerService) -> Result<()> {
    service.schedule_task(Arc::new(Heartbeat)).await?;

    // The writer is both a registered entry and the builder's declared
    // sub-task; the cascade finds it by task id.
    let writer: Arc<dyn Task> = Arc::new(DigestWriter);
    service.schedule_task(writer.clone()).await?;
    service
        .schedule_task(Arc::new(DigestBuilder::new(writer)))
        .await?;

    Ok(())
}
