//! Per-run execution context and log capture
//!
//! Every run gets a [`TaskContext`] carrying the relevant timestamps, a
//! [`LogSink`] that collects whatever the task body writes, and the sub-task
//! plumbing: a one-shot gate that releases the children and a bounded stream
//! for parent→child hand-off.

use std::io::{self, Write};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tracing_subscriber::fmt::MakeWriter;

/// Capacity of the parent→child hand-off channel. Senders block once this
/// many values are in flight.
const STREAM_CAPACITY: usize = 100;

// ============================================================================
// Log sink
// ============================================================================

/// Thread-safe buffered log capture for one run.
///
/// Writes land in a staging buffer; [`LogSink::sync`] moves staged bytes into
/// the snapshot returned by [`LogSink::bytes`]. One writer per run, any
/// number of concurrent readers.
#[derive(Clone, Default)]
pub struct LogSink {
    inner: Arc<RwLock<SinkBuffers>>,
}

#[derive(Default)]
struct SinkBuffers {
    staged: Vec<u8>,
    flushed: Vec<u8>,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flush staged writes into the readable snapshot.
    pub fn sync(&self) {
        let mut buffers = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let staged = std::mem::take(&mut buffers.staged);
        buffers.flushed.extend_from_slice(&staged);
    }

    /// Snapshot of everything synced so far.
    pub fn bytes(&self) -> Vec<u8> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .flushed
            .clone()
    }

    /// Synced content as a string, lossy on invalid UTF-8.
    pub fn snapshot(&self) -> String {
        String::from_utf8_lossy(&self.bytes()).into_owned()
    }
}

impl Write for LogSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut buffers = self.inner.write().unwrap_or_else(|e| e.into_inner());
        buffers.staged.extend_from_slice(buf);
        Ok(buf.len())
    }

    // Staged bytes only become visible through sync().
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Lets a per-run `tracing` subscriber be pointed straight at the sink.
impl<'a> MakeWriter<'a> for LogSink {
    type Writer = LogSink;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

// ============================================================================
// Sub-task plumbing
// ============================================================================

/// Bounded parent→child data channel shared across one run cascade.
#[derive(Clone)]
pub struct SubTaskStream {
    tx: mpsc::Sender<Value>,
    rx: Arc<Mutex<mpsc::Receiver<Value>>>,
}

impl SubTaskStream {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    async fn send(&self, value: Value) -> anyhow::Result<()> {
        self.tx
            .send(value)
            .await
            .map_err(|_| anyhow::anyhow!("sub-task stream closed"))
    }

    async fn recv(&self) -> Option<Value> {
        self.rx.lock().await.recv().await
    }

    fn try_recv(&self) -> Option<Value> {
        self.rx.try_lock().ok()?.try_recv().ok()
    }
}

impl Default for SubTaskStream {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of the one-slot signal a parent emits to release its
/// children. Held by the run executor, not by task bodies.
pub struct SubTaskGate {
    rx: mpsc::Receiver<()>,
}

impl SubTaskGate {
    /// Block until the parent signals, or return immediately if the context
    /// was dropped without signalling.
    pub async fn wait(&mut self) -> bool {
        self.rx.recv().await.is_some()
    }
}

// ============================================================================
// Task context
// ============================================================================

/// What a task body sees while it runs.
#[derive(Clone)]
pub struct TaskContext {
    execution_date: DateTime<Utc>,
    start_date: DateTime<Utc>,
    next_run_date: Option<DateTime<Utc>>,
    previous_run_date: Option<DateTime<Utc>>,
    sink: LogSink,
    notify_tx: mpsc::Sender<()>,
    stream: SubTaskStream,
}

impl TaskContext {
    /// Build a context for one run. The returned gate is what the executor
    /// waits on before starting the entry's sub-tasks; the stream is either
    /// inherited from the parent run or freshly allocated.
    pub fn new(
        execution_date: DateTime<Utc>,
        start_date: DateTime<Utc>,
        next_run_date: Option<DateTime<Utc>>,
        previous_run_date: Option<DateTime<Utc>>,
        parent_stream: Option<SubTaskStream>,
        sink: LogSink,
    ) -> (Self, SubTaskGate) {
        let (notify_tx, notify_rx) = mpsc::channel(1);
        let stream = parent_stream.unwrap_or_default();
        (
            Self {
                execution_date,
                start_date,
                next_run_date,
                previous_run_date,
                sink,
                notify_tx,
                stream,
            },
            SubTaskGate { rx: notify_rx },
        )
    }

    /// The instant this firing was due.
    pub fn execution_date(&self) -> DateTime<Utc> {
        self.execution_date
    }

    /// When the run actually started.
    pub fn start_date(&self) -> DateTime<Utc> {
        self.start_date
    }

    pub fn next_run_date(&self) -> Option<DateTime<Utc>> {
        self.next_run_date
    }

    pub fn previous_run_date(&self) -> Option<DateTime<Utc>> {
        self.previous_run_date
    }

    pub fn log_sink(&self) -> LogSink {
        self.sink.clone()
    }

    /// One-shot signal releasing this run's sub-tasks. Extra signals are
    /// dropped.
    pub fn notify_sub_tasks(&self) {
        let _ = self.notify_tx.try_send(());
    }

    /// Hand a value to this run's sub-tasks, blocking while the stream is
    /// full. Delivery preserves send order.
    pub async fn stream_to_sub_tasks(&self, value: Value) -> anyhow::Result<()> {
        self.stream.send(value).await
    }

    /// Receive the next value the parent streamed, waiting for one to
    /// arrive.
    pub async fn recv_from_parent(&self) -> Option<Value> {
        self.stream.recv().await
    }

    /// Non-blocking variant of [`TaskContext::recv_from_parent`].
    pub fn try_recv_from_parent(&self) -> Option<Value> {
        self.stream.try_recv()
    }

    /// The hand-off channel shared by this run's cascade; child contexts
    /// are built over it.
    pub fn stream(&self) -> SubTaskStream {
        self.stream.clone()
    }
}
